use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::BaseDirs;
use ini::Ini;
use serde::{Deserialize, Serialize};

use crate::domain::{S3Uri, SamplePatterns, WorkspaceRef, normalize_outdir};
use crate::error::WaphlError;

pub const CONFIG_FILE: &str = "waphl.json";
pub const DEFAULT_OUTDIR: &str = "data";
pub const DEFAULT_PLATFORM: &str = "Terra";
pub const LIMS_USER_ENV: &str = "LIMS_USER";
pub const LIMS_PASSWORD_ENV: &str = "LIMS_PASSWORD";

/// `terra2aws` settings as written in `waphl.json` or given on the command
/// line. Every field is optional until resolved.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MigrationSettings {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub target_workflow: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub sample_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub outdir: Option<String>,
}

impl MigrationSettings {
    /// Values present in `overrides` replace ours.
    pub fn merge(self, overrides: MigrationSettings) -> MigrationSettings {
        MigrationSettings {
            project: overrides.project.or(self.project),
            workspace: overrides.workspace.or(self.workspace),
            target_workflow: overrides.target_workflow.or(self.target_workflow),
            workflow_name: overrides.workflow_name.or(self.workflow_name),
            sample_patterns: overrides.sample_patterns.or(self.sample_patterns),
            uri: overrides.uri.or(self.uri),
            outdir: overrides.outdir.or(self.outdir),
        }
    }
}

/// Fully validated inputs of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub workspace: WorkspaceRef,
    pub target_workflow: String,
    pub workflow_name: String,
    pub sample_patterns: SamplePatterns,
    pub destination: S3Uri,
    pub outdir: String,
    pub platform: String,
}

impl TryFrom<MigrationSettings> for MigrationConfig {
    type Error = WaphlError;

    fn try_from(settings: MigrationSettings) -> Result<Self, Self::Error> {
        let namespace = settings
            .project
            .ok_or(WaphlError::MissingSetting("project"))?;
        let name = settings
            .workspace
            .ok_or(WaphlError::MissingSetting("workspace"))?;
        let target_workflow = settings
            .target_workflow
            .ok_or(WaphlError::MissingSetting("target_workflow"))?;
        let workflow_name = settings
            .workflow_name
            .ok_or(WaphlError::MissingSetting("workflow_name"))?;
        let destination: S3Uri = settings
            .uri
            .ok_or(WaphlError::MissingSetting("uri"))?
            .parse()?;
        let patterns = settings.sample_patterns.unwrap_or_default();
        let sample_patterns = SamplePatterns::new(patterns.as_slice())?;
        let outdir = normalize_outdir(settings.outdir.as_deref().unwrap_or(DEFAULT_OUTDIR));

        Ok(Self {
            workspace: WorkspaceRef { namespace, name },
            target_workflow,
            workflow_name,
            sample_patterns,
            destination,
            outdir,
            platform: DEFAULT_PLATFORM.to_string(),
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads settings from `path`, else `waphl.json` in the working
    /// directory, else the user config directory. No file at the implicit
    /// locations yields empty settings; an explicit path must exist.
    pub fn load(path: Option<&str>) -> Result<MigrationSettings, WaphlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(MigrationSettings::default()),
            },
        };
        let content = fs::read_to_string(&config_path)
            .map_err(|_| WaphlError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<MigrationSettings, WaphlError> {
        serde_json::from_str(content).map_err(|err| WaphlError::ConfigParse(err.to_string()))
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("waphl").join(CONFIG_FILE))
            .filter(|path| path.exists())
    }
}

/// Workspace access details for `tables`, read from the first data row of
/// a TSV with `project_billing`, `workspace`, `bucket` and `dest_s3` columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessConfig {
    pub project_billing: String,
    pub workspace: String,
    pub bucket: String,
    pub dest_s3: String,
}

impl AccessConfig {
    pub fn load(path: &Path) -> Result<Self, WaphlError> {
        let content = fs::read_to_string(path)
            .map_err(|_| WaphlError::ConfigRead(path.to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, WaphlError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(content.as_bytes());
        reader
            .deserialize::<AccessConfig>()
            .next()
            .ok_or_else(|| WaphlError::ConfigParse("access file has no data row".to_string()))?
            .map_err(|err| WaphlError::ConfigParse(err.to_string()))
    }

    pub fn workspace_ref(&self) -> WorkspaceRef {
        WorkspaceRef {
            namespace: self.project_billing.clone(),
            name: self.workspace.clone(),
        }
    }
}

/// Database server given as `host,port`, the form used in LIMS `.ini` files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = WaphlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (host, port) = value
            .split_once(',')
            .ok_or_else(|| WaphlError::ConfigParse(format!("SERVER must be host,port: {value}")))?;
        let host = host.trim();
        if host.is_empty() {
            return Err(WaphlError::ConfigParse(format!("SERVER has no host: {value}")));
        }
        let port = port
            .trim()
            .parse()
            .map_err(|err| WaphlError::ConfigParse(format!("SERVER port {port}: {err}")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Resolved connection details for the LIMS database.
#[derive(Clone)]
pub struct LimsConnection {
    pub server: ServerAddress,
    pub user: String,
    password: String,
}

impl LimsConnection {
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for LimsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimsConnection")
            .field("server", &self.server)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// `lims-query` inputs. An `.ini` file takes precedence over the
/// `--server`/`--port` pair; one of the two is required.
#[derive(Debug, Clone, Default)]
pub struct LimsSettings {
    pub config: Option<PathBuf>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct LimsIni {
    server: Option<ServerAddress>,
    user: Option<String>,
    password: Option<String>,
}

impl LimsSettings {
    pub fn resolve(self) -> Result<LimsConnection, WaphlError> {
        self.resolve_with_env(|name| std::env::var(name).ok())
    }

    /// Credentials come from the `.ini` file, then `--user`, then the
    /// `LIMS_USER`/`LIMS_PASSWORD` variables.
    pub fn resolve_with_env<F>(self, env: F) -> Result<LimsConnection, WaphlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ini = match &self.config {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .map_err(|_| WaphlError::ConfigRead(path.clone()))?;
                parse_lims_ini(&content)?
            }
            None => LimsIni::default(),
        };

        let server = match (ini.server, self.server, self.port) {
            (Some(server), _, _) => server,
            (None, Some(host), Some(port)) => ServerAddress { host, port },
            _ => return Err(WaphlError::MissingSetting("server and port")),
        };
        let user = ini
            .user
            .or(self.user)
            .or_else(|| env(LIMS_USER_ENV))
            .ok_or(WaphlError::MissingSetting("LIMS user"))?;
        let password = ini
            .password
            .or_else(|| env(LIMS_PASSWORD_ENV))
            .ok_or(WaphlError::MissingSetting("LIMS password"))?;

        Ok(LimsConnection {
            server,
            user,
            password,
        })
    }
}

fn parse_lims_ini(content: &str) -> Result<LimsIni, WaphlError> {
    let ini = Ini::load_from_str(content).map_err(|err| WaphlError::ConfigParse(err.to_string()))?;
    let lookup = |key: &str| {
        [Some("DEFAULT"), None].into_iter().find_map(|section| {
            let properties = ini.section(section)?;
            properties
                .get(key)
                .or_else(|| properties.get(key.to_lowercase()))
                .map(str::to_string)
        })
    };
    let server = lookup("SERVER")
        .ok_or_else(|| WaphlError::ConfigParse("no SERVER entry in the DEFAULT section".to_string()))?
        .parse()?;
    Ok(LimsIni {
        server: Some(server),
        user: lookup("USER"),
        password: lookup("PASSWORD"),
    })
}
