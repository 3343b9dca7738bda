use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::WaphlError;

/// Local staging layout for a migration run.
///
/// ```text
/// <root>/terra_tbls/<table>.tsv   exported workspace tables
/// <root>/tmp/                     blobs and metadata awaiting upload
/// ```
#[derive(Debug, Clone)]
pub struct Staging {
    root: Utf8PathBuf,
}

impl Staging {
    pub const TABLES_DIR: &'static str = "terra_tbls";
    pub const TMP_DIR: &'static str = "tmp";

    pub fn new() -> Result<Self, WaphlError> {
        let cwd =
            std::env::current_dir().map_err(|err| WaphlError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| WaphlError::Filesystem("invalid working directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn tables_dir(&self) -> Utf8PathBuf {
        self.root.join(Self::TABLES_DIR)
    }

    pub fn tmp_dir(&self) -> Utf8PathBuf {
        self.root.join(Self::TMP_DIR)
    }

    pub fn table_path(&self, table: &str) -> Utf8PathBuf {
        self.tables_dir().join(table_file_name(table))
    }

    pub fn tmp_path(&self, file_name: &str) -> Utf8PathBuf {
        self.tmp_dir().join(file_name)
    }

    pub fn ensure(&self) -> Result<(), WaphlError> {
        for dir in [self.tables_dir(), self.tmp_dir()] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| WaphlError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    pub fn file_size(path: &Utf8Path) -> Result<u64, WaphlError> {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.len())
            .map_err(|err| WaphlError::Filesystem(format!("stat {path}: {err}")))
    }

    pub fn remove_file(path: &Utf8Path) -> Result<(), WaphlError> {
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| WaphlError::Filesystem(format!("remove {path}: {err}")))?;
        }
        Ok(())
    }
}

pub fn table_file_name(table: &str) -> String {
    format!("{table}.tsv")
}

/// Writes through a sibling temp file so readers never see a partial file.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), WaphlError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| WaphlError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".waphl-write")
        .tempfile_in(parent)
        .map_err(|err| WaphlError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| WaphlError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| WaphlError::Filesystem(err.to_string()))?;
    Ok(())
}
