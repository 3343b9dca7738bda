use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::S3_SCHEME;
use crate::error::WaphlError;
use crate::tools;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Destination object store.
pub trait S3Client: Send + Sync {
    /// Every object under `prefix`, across all result pages.
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>, WaphlError>;
    fn upload(&self, source: &Path, bucket: &str, key: &str) -> Result<(), WaphlError>;
    fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<(), WaphlError>;
}

/// `S3Client` backed by the `aws` command line tool, which carries the
/// caller's credential chain and paginates listings itself.
#[derive(Clone)]
pub struct AwsCliS3Client {
    aws: Option<PathBuf>,
}

impl AwsCliS3Client {
    pub fn new() -> Self {
        Self {
            aws: tools::find_in_path("aws"),
        }
    }

    fn run(&self, args: Vec<String>) -> Result<tools::ToolOutput, WaphlError> {
        let aws = self
            .aws
            .as_ref()
            .ok_or_else(|| WaphlError::MissingTool("aws".to_string()))?;
        tools::run_tool(aws, &args, WaphlError::S3Command)
    }
}

impl Default for AwsCliS3Client {
    fn default() -> Self {
        Self::new()
    }
}

impl S3Client for AwsCliS3Client {
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>, WaphlError> {
        let output = self.run(vec![
            "s3api".to_string(),
            "list-objects-v2".to_string(),
            "--bucket".to_string(),
            bucket.to_string(),
            "--prefix".to_string(),
            prefix.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ])?;
        parse_listing(&output.stdout)
    }

    fn upload(&self, source: &Path, bucket: &str, key: &str) -> Result<(), WaphlError> {
        self.run(vec![
            "s3".to_string(),
            "cp".to_string(),
            source.to_string_lossy().to_string(),
            format!("{S3_SCHEME}{bucket}/{key}"),
            "--only-show-errors".to_string(),
        ])?;
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<(), WaphlError> {
        self.run(vec![
            "s3".to_string(),
            "cp".to_string(),
            format!("{S3_SCHEME}{bucket}/{key}"),
            destination.to_string_lossy().to_string(),
            "--only-show-errors".to_string(),
        ])?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsOutput {
    #[serde(default)]
    contents: Option<Vec<RawObject>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawObject {
    key: String,
    #[serde(default)]
    size: u64,
}

/// Parses `aws s3api list-objects-v2 --output json`. An empty listing may be
/// printed as nothing at all.
pub fn parse_listing(stdout: &str) -> Result<Vec<ObjectEntry>, WaphlError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: ListObjectsOutput = serde_json::from_str(stdout)
        .map_err(|err| WaphlError::S3Command(format!("unreadable listing: {err}")))?;
    Ok(parsed
        .contents
        .unwrap_or_default()
        .into_iter()
        .map(|raw| ObjectEntry {
            key: raw.key,
            size: raw.size,
        })
        .collect())
}
