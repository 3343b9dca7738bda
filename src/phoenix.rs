use std::io::Read;

use serde::Serialize;
use tracing::info;

use crate::error::WaphlError;
use crate::s3::S3Client;
use crate::samplesheet::{SampleReads, render_samplesheet};
use crate::store;

pub const SUMMARY_FILE: &str = "Phoenix_Summary.tsv";
pub const MANIFEST_FILE: &str = "manifest.csv";

#[derive(Debug, Clone, Serialize)]
pub struct PhoenixFixResult {
    pub samples: Vec<String>,
    pub summary_key: String,
    pub manifest_key: String,
}

/// Sample directories of a run: directory markers directly named after a
/// sample, recognised by the trailing digit of the sample id.
pub fn samples_from_listing(prefix: &str, keys: &[String]) -> Vec<String> {
    let run_marker = format!("{prefix}/");
    keys.iter()
        .filter(|key| key.as_str() != run_marker && key.ends_with('/'))
        .filter_map(|key| {
            let trimmed = key.trim_end_matches('/');
            let name = trimmed.rsplit('/').next()?;
            name.chars()
                .last()
                .filter(char::is_ascii_digit)
                .map(|_| name.to_string())
        })
        .collect()
}

/// Whether `key` is a read file of `sample` under a `reads/` directory.
pub fn is_read_of(key: &str, sample: &str) -> bool {
    let marker = format!("/reads/{sample}");
    key.match_indices(&marker).any(|(index, _)| {
        key[index + marker.len()..]
            .chars()
            .next()
            .is_some_and(|next| !next.is_ascii_alphanumeric())
    })
}

pub fn manifest_rows(
    bucket: &str,
    keys: &[String],
    samples: &[String],
) -> Result<Vec<SampleReads>, WaphlError> {
    samples
        .iter()
        .map(|sample| {
            let mut reads = keys
                .iter()
                .filter(|key| !key.ends_with('/') && is_read_of(key, sample))
                .map(|key| format!("s3://{bucket}/{key}"))
                .collect::<Vec<_>>();
            reads.sort();
            match <[String; 2]>::try_from(reads) {
                Ok([fastq_1, fastq_2]) => Ok(SampleReads {
                    sample: sample.clone(),
                    fastq_1,
                    fastq_2,
                }),
                Err(reads) => Err(WaphlError::UnpairedReads {
                    sample: sample.clone(),
                    found: reads.len(),
                }),
            }
        })
        .collect()
}

/// Concatenates TSV tables. Columns are the union of all headers in
/// first-seen order; cells a table lacks stay empty.
pub fn merge_tables<R: Read>(tables: Vec<R>) -> Result<Vec<u8>, WaphlError> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<(usize, String)>> = Vec::new();
    for table in tables {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(table);
        let header_positions = reader
            .headers()
            .map_err(|err| WaphlError::Table(err.to_string()))?
            .iter()
            .map(|name| match columns.iter().position(|column| column == name) {
                Some(position) => position,
                None => {
                    columns.push(name.to_string());
                    columns.len() - 1
                }
            })
            .collect::<Vec<_>>();
        for record in reader.records() {
            let record = record.map_err(|err| WaphlError::Table(err.to_string()))?;
            rows.push(
                header_positions
                    .iter()
                    .zip(record.iter())
                    .map(|(&position, value)| (position, value.to_string()))
                    .collect(),
            );
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|err| WaphlError::Table(err.to_string()))?;
    for cells in rows {
        let mut record = vec![String::new(); columns.len()];
        for (position, value) in cells {
            record[position] = value;
        }
        writer
            .write_record(&record)
            .map_err(|err| WaphlError::Table(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| WaphlError::Table(err.to_string()))
}

/// Rebuilds `Phoenix_Summary.tsv` and `manifest.csv` for a run that was
/// processed in several batches, each of which overwrote the previous files.
pub fn fix_run<S: S3Client>(
    s3: &S,
    bucket: &str,
    prefix: &str,
) -> Result<PhoenixFixResult, WaphlError> {
    let prefix = prefix.trim_end_matches('/');
    let keys = s3
        .list_objects(bucket, &format!("{prefix}/"))?
        .into_iter()
        .map(|entry| entry.key)
        .collect::<Vec<_>>();
    let samples = samples_from_listing(prefix, &keys);
    if samples.is_empty() {
        return Err(WaphlError::NoObjects(format!("s3://{bucket}/{prefix}/")));
    }
    info!(samples = samples.len(), "found run samples");
    let manifest = manifest_rows(bucket, &keys, &samples)?;

    let temp = tempfile::Builder::new()
        .prefix("waphl-phoenix")
        .tempdir()
        .map_err(|err| WaphlError::Filesystem(err.to_string()))?;
    let mut summaries = Vec::with_capacity(samples.len());
    for sample in &samples {
        let key = format!("{prefix}/{sample}/{sample}_summaryline.tsv");
        let local = temp.path().join(format!("{sample}_summaryline.tsv"));
        s3.download(bucket, &key, &local)?;
        let file = std::fs::File::open(&local)
            .map_err(|err| WaphlError::Filesystem(format!("open {}: {err}", local.display())))?;
        summaries.push(file);
    }

    let summary_local = temp.path().join(SUMMARY_FILE);
    store::write_bytes_atomic(&summary_local, &merge_tables(summaries)?)?;
    let summary_key = format!("{prefix}/{SUMMARY_FILE}");
    s3.upload(&summary_local, bucket, &summary_key)?;

    let manifest_local = temp.path().join(MANIFEST_FILE);
    store::write_bytes_atomic(&manifest_local, &render_samplesheet(&manifest)?)?;
    let manifest_key = format!("{prefix}/{MANIFEST_FILE}");
    s3.upload(&manifest_local, bucket, &manifest_key)?;

    Ok(PhoenixFixResult {
        samples,
        summary_key,
        manifest_key,
    })
}
