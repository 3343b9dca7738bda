use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::WaphlError;
use crate::store;
use crate::tools;

pub const SCORE_COLUMNS: [&str; 5] = [
    "K",
    "avg entropy",
    "Score",
    "Score (w/ betweenness)",
    "Score (w/ weighted-betweenness)",
];

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub db: String,
    pub min_clusters: u32,
    pub max_clusters: u32,
    pub step: u32,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterScore {
    pub k: u32,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub scores: Vec<ClusterScore>,
    pub failed: Vec<u32>,
    pub output: String,
}

/// Fits a BGMM model with a fixed number of mixture components and returns
/// the tool's diagnostic output.
pub trait ModelFitter {
    fn fit_bgmm(&self, options: &SweepOptions, k: u32) -> Result<String, WaphlError>;
}

pub struct PoppunkCli {
    poppunk: Option<PathBuf>,
}

impl PoppunkCli {
    pub fn new() -> Self {
        Self {
            poppunk: tools::find_in_path("poppunk"),
        }
    }

    pub fn command_args(options: &SweepOptions, k: u32) -> Vec<String> {
        let mut args = vec![
            "--fit-model".to_string(),
            "bgmm".to_string(),
            "--ref-db".to_string(),
            options.db.clone(),
            "--output".to_string(),
            options.db.clone(),
            "--overwrite".to_string(),
            "--K".to_string(),
            k.to_string(),
        ];
        args.extend(options.extra_args.iter().cloned());
        args
    }
}

impl Default for PoppunkCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelFitter for PoppunkCli {
    fn fit_bgmm(&self, options: &SweepOptions, k: u32) -> Result<String, WaphlError> {
        let poppunk = self
            .poppunk
            .as_ref()
            .ok_or_else(|| WaphlError::MissingTool("poppunk".to_string()))?;
        let args = Self::command_args(options, k);
        info!(command = %format!("poppunk {}", args.join(" ")), "running --fit-model bgmm");
        let output = tools::run_tool(poppunk, &args, |message| WaphlError::ToolFailed {
            tool: "poppunk".to_string(),
            message,
        })?;
        Ok(output.stderr)
    }
}

/// Last tab-separated field of every score or entropy line, in order.
pub fn parse_scores(log: &str) -> Vec<String> {
    log.lines()
        .filter(|line| line.contains("Score") || line.contains("Avg. entropy of assignment"))
        .filter_map(|line| line.split('\t').last())
        .map(|value| value.trim().to_string())
        .collect()
}

pub fn output_path(options: &SweepOptions) -> String {
    format!(
        "{}_min-clust{}_max-clust{}.csv",
        options.db, options.min_clusters, options.max_clusters
    )
}

pub fn sweep<F: ModelFitter>(fitter: &F, options: &SweepOptions) -> Result<SweepResult, WaphlError> {
    if options.step == 0 {
        return Err(WaphlError::InvalidArgument("step size must be at least 1".to_string()));
    }
    if options.min_clusters > options.max_clusters {
        return Err(WaphlError::InvalidArgument(format!(
            "min clusters {} exceeds max clusters {}",
            options.min_clusters, options.max_clusters
        )));
    }

    let mut scores = Vec::new();
    let mut failed = Vec::new();
    for k in (options.min_clusters..=options.max_clusters).step_by(options.step as usize) {
        match fitter.fit_bgmm(options, k) {
            Ok(log) => scores.push(ClusterScore {
                k,
                values: parse_scores(&log),
            }),
            Err(err) => {
                warn!(k, error = %err, "distinct component(s) could not be found");
                failed.push(k);
            }
        }
    }

    let output = output_path(options);
    store::write_bytes_atomic(std::path::Path::new(&output), &render_scores(&scores)?)?;
    info!(output = output.as_str(), "see results");
    Ok(SweepResult {
        scores,
        failed,
        output,
    })
}

fn render_scores(scores: &[ClusterScore]) -> Result<Vec<u8>, WaphlError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer
        .write_record(SCORE_COLUMNS)
        .map_err(|err| WaphlError::Table(err.to_string()))?;
    for score in scores {
        let mut record = vec![score.k.to_string()];
        record.extend(score.values.iter().take(SCORE_COLUMNS.len() - 1).cloned());
        record.resize(SCORE_COLUMNS.len(), String::new());
        writer
            .write_record(&record)
            .map_err(|err| WaphlError::Table(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| WaphlError::Table(err.to_string()))
}
