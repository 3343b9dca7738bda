use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WaphlError {
    #[error("invalid gs:// URI: {0}")]
    InvalidGcsUri(String),

    #[error("invalid s3:// URI: {0}")]
    InvalidS3Uri(String),

    #[error("unexpected source path layout for {uri}: expected at least {expected} path segments after the bucket, found {found}")]
    #[diagnostic(help("the workflow name is read from the third path segment of the object name"))]
    UnexpectedSourceLayout {
        uri: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid sample pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("missing required setting: {0}")]
    #[diagnostic(help("pass it on the command line or add it to the settings file"))]
    MissingSetting(&'static str),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Terra request failed: {0}")]
    TerraHttp(String),

    #[error("Terra returned status {status}: {message}")]
    TerraStatus { status: u16, message: String },

    #[error("GCS request failed: {0}")]
    GcsHttp(String),

    #[error("GCS returned status {status}: {message}")]
    GcsStatus { status: u16, message: String },

    #[error("access token unavailable: {0}")]
    #[diagnostic(help("set GOOGLE_OAUTH_ACCESS_TOKEN or run `gcloud auth login`"))]
    AccessToken(String),

    #[error("aws s3 command failed: {0}")]
    S3Command(String),

    #[error("no objects found under {0}")]
    #[diagnostic(help("check the URI path"))]
    NoObjects(String),

    #[error("cannot determine if {0} is a forward or reverse read")]
    AmbiguousRead(String),

    #[error("sample {sample} has {found} read file(s), expected a pair")]
    UnpairedReads { sample: String, found: usize },

    #[error("LIMS query failed: {0}")]
    Lims(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Whether retrying the failed operation could plausibly succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

impl WaphlError {
    pub fn class(&self) -> FailureClass {
        match self {
            WaphlError::TerraHttp(_) | WaphlError::GcsHttp(_) => FailureClass::Transient,
            WaphlError::Lims(message) => {
                if is_transient_cli_message(message) {
                    FailureClass::Transient
                } else {
                    FailureClass::Fatal
                }
            }
            WaphlError::TerraStatus { status, .. } | WaphlError::GcsStatus { status, .. } => {
                if is_retryable_status(*status) {
                    FailureClass::Transient
                } else {
                    FailureClass::Fatal
                }
            }
            WaphlError::S3Command(message) => {
                if is_transient_cli_message(message) {
                    FailureClass::Transient
                } else {
                    FailureClass::Fatal
                }
            }
            _ => FailureClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

fn is_transient_cli_message(message: &str) -> bool {
    const MARKERS: [&str; 7] = [
        "SlowDown",
        "Throttl",
        "RequestTimeout",
        "timed out",
        "Could not connect",
        "Connection reset",
        "InternalError",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let throttled = WaphlError::GcsStatus {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert!(throttled.is_retryable());

        let forbidden = WaphlError::TerraStatus {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(forbidden.class(), FailureClass::Fatal);
    }

    #[test]
    fn aws_cli_messages() {
        let slow = WaphlError::S3Command("An error occurred (SlowDown) when calling".to_string());
        assert!(slow.is_retryable());

        let missing = WaphlError::S3Command("An error occurred (NoSuchBucket)".to_string());
        assert!(!missing.is_retryable());
    }
}
