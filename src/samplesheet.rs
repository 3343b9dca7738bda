use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::domain::S3Uri;
use crate::error::WaphlError;
use crate::s3::S3Client;
use crate::store;

pub const SAMPLESHEET_FILE: &str = "samplesheet.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleReads {
    pub sample: String,
    pub fastq_1: String,
    pub fastq_2: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplesheetResult {
    pub samples: usize,
    pub output: String,
}

pub fn is_fastq(file_name: &str) -> bool {
    file_name
        .split('.')
        .any(|part| part == "fastq" || part == "fq")
}

/// Sample id and mate of an Illumina-style read file name such as
/// `WA1234_S1_L001_R1_001.fastq.gz` or `WA1234_2.fq`.
pub fn classify_read(file_name: &str) -> Result<(String, ReadDirection), WaphlError> {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let mut tokens = stem.split('_');
    let sample = tokens.next().unwrap_or(stem).to_string();
    let tokens = tokens.collect::<Vec<_>>();
    if tokens.iter().any(|token| matches!(*token, "R1" | "1")) {
        Ok((sample, ReadDirection::Forward))
    } else if tokens.iter().any(|token| matches!(*token, "R2" | "2")) {
        Ok((sample, ReadDirection::Reverse))
    } else {
        Err(WaphlError::AmbiguousRead(file_name.to_string()))
    }
}

/// Pairs the read files among `keys`, sorted by sample id.
pub fn pair_reads(bucket: &str, keys: &[String]) -> Result<Vec<SampleReads>, WaphlError> {
    let mut pairs: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
    for key in keys {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        if !is_fastq(file_name) {
            continue;
        }
        let (sample, direction) = classify_read(file_name)?;
        let uri = format!("s3://{bucket}/{key}");
        let entry = pairs.entry(sample).or_default();
        match direction {
            ReadDirection::Forward => entry.0 = Some(uri),
            ReadDirection::Reverse => entry.1 = Some(uri),
        }
    }

    pairs
        .into_iter()
        .map(|(sample, mates)| match mates {
            (Some(fastq_1), Some(fastq_2)) => Ok(SampleReads {
                sample,
                fastq_1,
                fastq_2,
            }),
            (first, second) => Err(WaphlError::UnpairedReads {
                found: usize::from(first.is_some()) + usize::from(second.is_some()),
                sample,
            }),
        })
        .collect()
}

pub fn render_samplesheet(samples: &[SampleReads]) -> Result<Vec<u8>, WaphlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for sample in samples {
        writer
            .serialize(sample)
            .map_err(|err| WaphlError::Table(err.to_string()))?;
    }
    if samples.is_empty() {
        writer
            .write_record(["sample", "fastq_1", "fastq_2"])
            .map_err(|err| WaphlError::Table(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| WaphlError::Table(err.to_string()))
}

/// Prefix to list for `location`. A trailing `/` is kept so that
/// `runs/run1/` does not also match `runs/run10/`.
pub fn listing_prefix(uri: &S3Uri, location: &str) -> String {
    if location.trim().ends_with('/') && !uri.prefix().is_empty() {
        format!("{}/", uri.prefix())
    } else {
        uri.prefix().to_string()
    }
}

pub fn build<S: S3Client>(
    s3: &S,
    location: &str,
    out_dir: &Path,
) -> Result<SamplesheetResult, WaphlError> {
    let uri: S3Uri = location.parse()?;
    let keys = s3
        .list_objects(uri.bucket(), &listing_prefix(&uri, location))?
        .into_iter()
        .map(|entry| entry.key)
        .collect::<Vec<_>>();
    if keys.is_empty() {
        return Err(WaphlError::NoObjects(uri.to_string()));
    }
    let samples = pair_reads(uri.bucket(), &keys)?;
    let output = out_dir.join(SAMPLESHEET_FILE);
    store::write_bytes_atomic(&output, &render_samplesheet(&samples)?)?;
    info!(samples = samples.len(), output = %output.display(), "samplesheet saved");
    Ok(SamplesheetResult {
        samples: samples.len(),
        output: output.display().to_string(),
    })
}
