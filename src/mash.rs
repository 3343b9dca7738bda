use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::WaphlError;
use crate::store;

/// Minimum ANI (percent) for an assembly to be kept against the best reference.
pub const ANI_THRESHOLD: f64 = 95.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MashHit {
    pub reference: String,
    pub sample: String,
    pub ani: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MashSummary {
    pub best_reference: String,
    pub total: usize,
    pub kept: Vec<String>,
    pub output: String,
}

pub fn read_hits<R: Read>(reader: R) -> Result<Vec<MashHit>, WaphlError> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<MashHit>, _>>()
        .map_err(|err| WaphlError::Table(err.to_string()))
}

/// The reference whose worst hit is best. Ties keep the earlier reference.
pub fn best_reference(hits: &[MashHit]) -> Option<&str> {
    let mut references: Vec<&str> = Vec::new();
    for hit in hits {
        if !references.contains(&hit.reference.as_str()) {
            references.push(&hit.reference);
        }
    }
    let mut best = *references.first()?;
    let mut best_ani = 0.0;
    for reference in references {
        let min_ani = hits
            .iter()
            .filter(|hit| hit.reference == reference)
            .map(|hit| hit.ani)
            .fold(f64::INFINITY, f64::min);
        if min_ani > best_ani {
            best_ani = min_ani;
            best = reference;
        }
    }
    Some(best)
}

pub fn close_samples<'a>(hits: &'a [MashHit], reference: &str) -> (usize, Vec<&'a str>) {
    let against = hits
        .iter()
        .filter(|hit| hit.reference == reference)
        .collect::<Vec<_>>();
    let kept = against
        .iter()
        .filter(|hit| hit.ani >= ANI_THRESHOLD)
        .map(|hit| hit.sample.as_str())
        .collect();
    (against.len(), kept)
}

/// File stem up to `_genomic`, as NCBI assembly files are named.
pub fn genome_base(path: &str) -> &str {
    let name = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path);
    name.split("_genomic").next().unwrap_or(name)
}

pub fn summarize(table: &Path, out_dir: &Path) -> Result<MashSummary, WaphlError> {
    let file = std::fs::File::open(table)
        .map_err(|err| WaphlError::Filesystem(format!("open {}: {err}", table.display())))?;
    let hits = read_hits(file)?;
    let best = best_reference(&hits)
        .ok_or_else(|| WaphlError::Table(format!("{} has no rows", table.display())))?;
    let (total, kept) = close_samples(&hits, best);
    info!(
        "{}/{} assemblies are within {ANI_THRESHOLD} ANI of the reference genome",
        kept.len(),
        total
    );

    let mut content = String::new();
    for sample in &kept {
        content.push_str(&format!("{}\t{}\n", genome_base(sample), sample));
    }
    let output: PathBuf = out_dir.join(format!("{}_pp-input.tsv", genome_base(best)));
    store::write_bytes_atomic(&output, content.as_bytes())?;

    Ok(MashSummary {
        best_reference: best.to_string(),
        total,
        kept: kept.iter().map(|sample| sample.to_string()).collect(),
        output: output.display().to_string(),
    })
}
