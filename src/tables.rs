use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::config::AccessConfig;
use crate::error::WaphlError;
use crate::s3::S3Client;
use crate::store::{Staging, table_file_name};
use crate::terra::TerraClient;

#[derive(Debug, Clone, Copy, Default)]
pub struct TableSyncOptions {
    pub pull: bool,
    pub push: bool,
    pub clean: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSyncItem {
    pub table: String,
    pub local_path: String,
    pub pulled: bool,
    pub pushed_to: Option<String>,
    pub cleaned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSyncResult {
    pub items: Vec<TableSyncItem>,
}

/// Moves whole workspace tables between Terra, the working directory and S3.
pub struct TableSync<T: TerraClient, S: S3Client> {
    dir: Utf8PathBuf,
    terra: T,
    s3: S,
}

impl<T: TerraClient, S: S3Client> TableSync<T, S> {
    pub fn new(dir: Utf8PathBuf, terra: T, s3: S) -> Self {
        Self { dir, terra, s3 }
    }

    pub fn run(
        &self,
        access: &AccessConfig,
        tables: &[String],
        options: TableSyncOptions,
    ) -> Result<TableSyncResult, WaphlError> {
        let (bucket, prefix) = split_dest(&access.dest_s3)?;
        let workspace = access.workspace_ref();
        let mut items = Vec::with_capacity(tables.len());

        for table in tables {
            let local = self.dir.join(table_file_name(table));
            let mut item = TableSyncItem {
                table: table.clone(),
                local_path: local.to_string(),
                pulled: false,
                pushed_to: None,
                cleaned: false,
            };
            if options.pull {
                info!(table = table.as_str(), workspace = %workspace, "pulling table");
                self.terra
                    .export_table(&workspace, table, local.as_std_path())?;
                item.pulled = true;
            }
            if options.push {
                let key = format!("{prefix}{}", table_file_name(table));
                info!(table = table.as_str(), bucket, key = key.as_str(), "pushing table");
                self.s3.upload(local.as_std_path(), bucket, &key)?;
                item.pushed_to = Some(format!("s3://{bucket}/{key}"));
            }
            if options.clean {
                Staging::remove_file(&local)?;
                info!(table = table.as_str(), "removed from local environment");
                item.cleaned = true;
            }
            items.push(item);
        }

        Ok(TableSyncResult { items })
    }
}

/// `dest_s3` is `bucket/prefix/` concatenated with the table file name.
fn split_dest(dest: &str) -> Result<(&str, &str), WaphlError> {
    let dest = dest.strip_prefix("s3://").unwrap_or(dest);
    let (bucket, prefix) = dest.split_once('/').unwrap_or((dest, ""));
    if bucket.is_empty() {
        return Err(WaphlError::InvalidS3Uri(dest.to_string()));
    }
    Ok((bucket, prefix))
}
