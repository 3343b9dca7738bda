use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WaphlError;

pub const GCS_SCHEME: &str = "gs://";
pub const S3_SCHEME: &str = "s3://";

/// Index of the workflow directory within the object name of a Terra
/// submission output (`<submissions>/<id>/<workflow>/...`).
const WORKFLOW_SEGMENT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for WorkspaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A `gs://bucket/object` reference into the source store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GcsUri {
    bucket: String,
    object: String,
}

impl GcsUri {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn file_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or(&self.object)
    }

    /// Workflow directory of a submission output path. Fails when the
    /// object name is too shallow to hold one below the bucket.
    pub fn workflow(&self) -> Result<&str, WaphlError> {
        let segments = self.object.split('/').collect::<Vec<_>>();
        let expected = WORKFLOW_SEGMENT + 2;
        if segments.len() < expected {
            return Err(WaphlError::UnexpectedSourceLayout {
                uri: self.to_string(),
                expected,
                found: segments.len(),
            });
        }
        Ok(segments[WORKFLOW_SEGMENT])
    }
}

impl fmt::Display for GcsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GCS_SCHEME}{}/{}", self.bucket, self.object)
    }
}

impl FromStr for GcsUri {
    type Err = WaphlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let rest = value
            .trim()
            .strip_prefix(GCS_SCHEME)
            .ok_or_else(|| WaphlError::InvalidGcsUri(value.to_string()))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| WaphlError::InvalidGcsUri(value.to_string()))?;
        if bucket.is_empty() || object.is_empty() || object.ends_with('/') {
            return Err(WaphlError::InvalidGcsUri(value.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }
}

/// An `s3://bucket[/prefix]` location in the destination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Uri {
    bucket: String,
    prefix: String,
}

impl S3Uri {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key for `relative` beneath this location's prefix.
    pub fn key(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if self.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    pub fn object_uri(&self, key: &str) -> String {
        format!("{S3_SCHEME}{}/{}", self.bucket, key)
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{S3_SCHEME}{}", self.bucket)
        } else {
            write!(f, "{S3_SCHEME}{}/{}", self.bucket, self.prefix)
        }
    }
}

impl FromStr for S3Uri {
    type Err = WaphlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let rest = value
            .trim()
            .strip_prefix(S3_SCHEME)
            .ok_or_else(|| WaphlError::InvalidS3Uri(value.to_string()))?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(WaphlError::InvalidS3Uri(value.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }
}

/// Ordered sample-name patterns. The last pattern that matches a sample id
/// decides its alias.
#[derive(Debug, Clone)]
pub struct SamplePatterns {
    patterns: Vec<Regex>,
}

impl SamplePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, WaphlError> {
        if patterns.is_empty() {
            return Self::new(default_sample_patterns().as_slice());
        }
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|err| WaphlError::InvalidPattern {
                    pattern: pattern.as_ref().to_string(),
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Alias decided by the last matching pattern. An empty match leaves
    /// the sample unmatched.
    pub fn resolve(&self, sample_id: &str) -> Option<String> {
        self.patterns
            .iter()
            .filter_map(|pattern| pattern.find(sample_id))
            .last()
            .filter(|found| !found.is_empty())
            .map(|found| found.as_str().to_string())
    }

    pub fn as_strings(&self) -> Vec<String> {
        self.patterns
            .iter()
            .map(|pattern| pattern.as_str().to_string())
            .collect()
    }
}

pub fn default_sample_patterns() -> Vec<String> {
    vec![".+".to_string()]
}

/// Blob creation time rendered as fractional Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(DateTime<Utc>);

impl Epoch {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self.0.timestamp_subsec_micros();
        if micros == 0 {
            return write!(f, "{}.0", self.0.timestamp());
        }
        let fraction = format!("{micros:06}");
        write!(f, "{}.{}", self.0.timestamp(), fraction.trim_end_matches('0'))
    }
}

/// Partitioned destination layout for a migrated file.
pub fn destination_key(
    outdir: &str,
    alias: &str,
    workflow: &str,
    file_name: &str,
    timestamp: &Epoch,
) -> String {
    format!(
        "source={outdir}/sample={alias}/workflow={workflow}/file={file_name}/timestamp={timestamp}/{file_name}"
    )
}

pub fn metadata_key(alias: &str, workflow: &str, file_name: &str, timestamp: &Epoch) -> String {
    format!("meta/{}", metadata_file_name(alias, workflow, file_name, timestamp))
}

pub fn metadata_file_name(
    alias: &str,
    workflow: &str,
    file_name: &str,
    timestamp: &Epoch,
) -> String {
    format!("{alias}_{workflow}_{file_name}_{timestamp}_meta.csv")
}

pub fn normalize_outdir(outdir: &str) -> String {
    outdir.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parse_gcs_uri() {
        let uri: GcsUri = "gs://fc-bucket/submissions/abc/assembly/call/out.fasta"
            .parse()
            .unwrap();
        assert_eq!(uri.bucket(), "fc-bucket");
        assert_eq!(uri.file_name(), "out.fasta");
        assert_eq!(uri.workflow().unwrap(), "assembly");
    }

    #[test]
    fn parse_gcs_uri_invalid() {
        assert_matches!(
            "s3://bucket/key".parse::<GcsUri>(),
            Err(WaphlError::InvalidGcsUri(_))
        );
        assert_matches!("gs://bucket".parse::<GcsUri>(), Err(WaphlError::InvalidGcsUri(_)));
        assert_matches!(
            "gs://bucket/dir/".parse::<GcsUri>(),
            Err(WaphlError::InvalidGcsUri(_))
        );
    }

    #[test]
    fn shallow_source_path_is_reported() {
        let uri: GcsUri = "gs://bucket/run/out.fasta".parse().unwrap();
        assert_matches!(
            uri.workflow(),
            Err(WaphlError::UnexpectedSourceLayout { found: 2, .. })
        );
    }

    #[test]
    fn parse_s3_uri_with_prefix() {
        let uri: S3Uri = "s3://lab-bucket/archive/".parse().unwrap();
        assert_eq!(uri.bucket(), "lab-bucket");
        assert_eq!(uri.key("meta/x.csv"), "archive/meta/x.csv");
        assert_eq!(uri.object_uri("k"), "s3://lab-bucket/k");

        let bare: S3Uri = "s3://lab-bucket/".parse().unwrap();
        assert_eq!(bare.key("meta/x.csv"), "meta/x.csv");
    }

    #[test]
    fn last_matching_pattern_wins() {
        let patterns = SamplePatterns::new(&["WA\\d+", "WA\\d+_S\\d"]).unwrap();
        assert_eq!(patterns.resolve("WA1234_S1").as_deref(), Some("WA1234_S1"));

        let reversed = SamplePatterns::new(&["WA\\d+_S\\d", "WA\\d+"]).unwrap();
        assert_eq!(reversed.resolve("WA1234_S1").as_deref(), Some("WA1234"));
        assert_eq!(reversed.resolve("CDC-99"), None);
    }

    #[test]
    fn empty_last_match_leaves_sample_unmatched() {
        let patterns = SamplePatterns::new(&["WA\\d+", "X*"]).unwrap();
        assert_eq!(patterns.resolve("WA1234_S1"), None);

        let nonempty_last = SamplePatterns::new(&["X*", "WA\\d+"]).unwrap();
        assert_eq!(nonempty_last.resolve("WA1234_S1").as_deref(), Some("WA1234"));
    }

    #[test]
    fn invalid_pattern() {
        let err = SamplePatterns::new(&["WA("]).unwrap_err();
        assert_matches!(err, WaphlError::InvalidPattern { .. });
    }

    #[test]
    fn epoch_renders_like_a_float() {
        let whole = Epoch::new(Utc.timestamp_opt(1_690_000_000, 0).unwrap());
        assert_eq!(whole.to_string(), "1690000000.0");

        let fractional = Epoch::new(Utc.timestamp_opt(1_690_000_000, 120_000_000).unwrap());
        assert_eq!(fractional.to_string(), "1690000000.12");
    }
}
