use std::collections::{BTreeSet, HashMap};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::domain::{
    Epoch, GCS_SCHEME, GcsUri, destination_key, metadata_file_name, metadata_key,
};
use crate::error::WaphlError;
use crate::gcs::GcsClient;
use crate::s3::S3Client;
use crate::store::{Staging, table_file_name};
use crate::table::WorkspaceTable;
use crate::terra::TerraClient;

/// Entity types containing this marker group other tables' rows.
pub const SET_MARKER: &str = "_set";

/// Metadata row written beside every migrated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ALT_ID")]
    pub alt_id: String,
    #[serde(rename = "FILE")]
    pub file: String,
    #[serde(rename = "ORIGIN_PATH")]
    pub origin_path: String,
    #[serde(rename = "CURRENT_PATH")]
    pub current_path: String,
    #[serde(rename = "TIMESTAMP")]
    pub timestamp: String,
    #[serde(rename = "PLATFORM")]
    pub platform: String,
    #[serde(rename = "WORKSPACE")]
    pub workspace: String,
    #[serde(rename = "WORKFLOW")]
    pub workflow: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CellOutcome {
    Transferred {
        column: String,
        record: TransferRecord,
        metadata_key: String,
    },
    NoSourceFile {
        column: String,
    },
    OtherWorkflow {
        column: String,
        workflow: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CellReport {
    pub sample: String,
    pub alias: String,
    #[serde(flatten)]
    pub outcome: CellOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// The destination already holds a snapshot of the same size.
    Mirrored,
    NoSourcePaths,
    Migrated,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    pub candidate_columns: Vec<String>,
    pub unmatched_samples: Vec<String>,
    pub cells: Vec<CellReport>,
}

impl TableReport {
    fn new(table: &str, status: TableStatus) -> Self {
        Self {
            table: table.to_string(),
            status,
            candidate_columns: Vec::new(),
            unmatched_samples: Vec::new(),
            cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub workspace: String,
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn transferred(&self) -> impl Iterator<Item = &TransferRecord> {
        self.tables
            .iter()
            .flat_map(|table| table.cells.iter())
            .filter_map(|cell| match &cell.outcome {
                CellOutcome::Transferred { record, .. } => Some(record),
                _ => None,
            })
    }

    pub fn tables_with_status(&self, status: TableStatus) -> usize {
        self.tables
            .iter()
            .filter(|table| table.status == status)
            .count()
    }
}

/// Copies workflow outputs referenced by a Terra workspace's tables into an
/// S3 bucket, one partitioned object plus one metadata CSV per file.
pub struct Migrator<T: TerraClient, G: GcsClient, S: S3Client> {
    staging: Staging,
    terra: T,
    gcs: G,
    s3: S,
}

impl<T: TerraClient, G: GcsClient, S: S3Client> Migrator<T, G, S> {
    pub fn new(staging: Staging, terra: T, gcs: G, s3: S) -> Self {
        Self {
            staging,
            terra,
            gcs,
            s3,
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn run(&self, config: &MigrationConfig) -> Result<MigrationReport, WaphlError> {
        self.staging.ensure()?;

        let tables = self
            .terra
            .list_entity_types(&config.workspace)?
            .into_iter()
            .filter(|table| !table.contains(SET_MARKER))
            .collect::<Vec<_>>();

        for table in &tables {
            info!(table = table.as_str(), "downloading table");
            let path = self.staging.table_path(table);
            self.terra
                .export_table(&config.workspace, table, path.as_std_path())?;
        }

        let pending = self.changed_tables(config, &tables)?;
        let mut reports = Vec::with_capacity(tables.len());
        for table in &tables {
            if !pending.contains(table.as_str()) {
                info!(table = table.as_str(), "table already mirrored, skipping");
                reports.push(TableReport::new(table, TableStatus::Mirrored));
                continue;
            }
            info!(table = table.as_str(), "migrating files from table");
            reports.push(self.migrate_table(config, table)?);
            self.upload_snapshot(config, table)?;
        }

        Ok(MigrationReport {
            workspace: config.workspace.to_string(),
            tables: reports,
        })
    }

    /// Tables whose staged export differs in size from the destination's
    /// snapshot, or that have no snapshot yet.
    fn changed_tables<'a>(
        &self,
        config: &MigrationConfig,
        tables: &'a [String],
    ) -> Result<BTreeSet<&'a str>, WaphlError> {
        let prefix = config
            .destination
            .key(&format!("{}/", Staging::TABLES_DIR));
        let remote = self
            .s3
            .list_objects(config.destination.bucket(), &prefix)?
            .into_iter()
            .filter_map(|entry| {
                let name = entry.key.strip_prefix(prefix.as_str())?.to_string();
                Some((name, entry.size))
            })
            .collect::<HashMap<_, _>>();

        let mut changed = BTreeSet::new();
        for table in tables {
            let local = Staging::file_size(&self.staging.table_path(table))?;
            match remote.get(&table_file_name(table)) {
                Some(&size) if size == local => {
                    debug!(table = table.as_str(), size, "snapshot size matches");
                }
                _ => {
                    changed.insert(table.as_str());
                }
            }
        }
        Ok(changed)
    }

    fn upload_snapshot(&self, config: &MigrationConfig, table: &str) -> Result<(), WaphlError> {
        let key = config.destination.key(&format!(
            "{}/{}",
            Staging::TABLES_DIR,
            table_file_name(table)
        ));
        self.s3.upload(
            self.staging.table_path(table).as_std_path(),
            config.destination.bucket(),
            &key,
        )
    }

    fn migrate_table(
        &self,
        config: &MigrationConfig,
        table: &str,
    ) -> Result<TableReport, WaphlError> {
        let data = WorkspaceTable::read(table, &self.staging.table_path(table))?;
        let candidates = data.candidate_columns();
        if candidates.is_empty() {
            info!(table, "no Google file paths detected, no files will be migrated");
            return Ok(TableReport::new(data.name(), TableStatus::NoSourcePaths));
        }

        let mut report = TableReport::new(data.name(), TableStatus::Migrated);
        report.candidate_columns = candidates
            .iter()
            .map(|&column| data.headers()[column].clone())
            .collect();
        info!(table, columns = ?report.candidate_columns, "columns selected for migration");

        for row in data.rows() {
            let sample_id = &row[0];
            let Some(alias) = config.sample_patterns.resolve(sample_id) else {
                warn!(
                    sample = sample_id.as_str(),
                    patterns = ?config.sample_patterns.as_strings(),
                    "sample matches none of the supplied patterns, its files will not be transferred"
                );
                report.unmatched_samples.push(sample_id.clone());
                continue;
            };

            for &column in &candidates {
                let outcome =
                    self.migrate_cell(config, sample_id, &alias, &data.headers()[column], &row[column])?;
                report.cells.push(CellReport {
                    sample: sample_id.clone(),
                    alias: alias.clone(),
                    outcome,
                });
            }
        }
        Ok(report)
    }

    /// Decides one (row, column) cell from that cell's value alone.
    fn migrate_cell(
        &self,
        config: &MigrationConfig,
        sample_id: &str,
        alias: &str,
        column: &str,
        value: &str,
    ) -> Result<CellOutcome, WaphlError> {
        let value = value.trim();
        if !value.starts_with(GCS_SCHEME) {
            info!(sample = sample_id, column, "no Google file detected");
            return Ok(CellOutcome::NoSourceFile {
                column: column.to_string(),
            });
        }

        let uri: GcsUri = value.parse()?;
        let workflow = uri.workflow()?;
        if workflow != config.target_workflow {
            debug!(sample = sample_id, column, workflow, "output of another workflow");
            return Ok(CellOutcome::OtherWorkflow {
                column: column.to_string(),
                workflow: workflow.to_string(),
            });
        }

        let (record, metadata_key) = self.transfer(config, sample_id, alias, &uri)?;
        Ok(CellOutcome::Transferred {
            column: column.to_string(),
            record,
            metadata_key,
        })
    }

    fn transfer(
        &self,
        config: &MigrationConfig,
        sample_id: &str,
        alias: &str,
        uri: &GcsUri,
    ) -> Result<(TransferRecord, String), WaphlError> {
        let bucket = config.destination.bucket();
        let file_name = uri.file_name();
        let created = Epoch::new(self.gcs.created_at(uri)?);

        let local = self.staging.tmp_path(file_name);
        self.gcs.download(uri, local.as_std_path())?;
        let key = config.destination.key(&destination_key(
            &config.outdir,
            alias,
            &config.workflow_name,
            file_name,
            &created,
        ));
        self.s3.upload(local.as_std_path(), bucket, &key)?;
        Staging::remove_file(&local)?;
        info!(sample = sample_id, file = file_name, key = key.as_str(), "transferred");

        let record = TransferRecord {
            id: sample_id.to_string(),
            alt_id: alias.to_string(),
            file: file_name.to_string(),
            origin_path: uri.to_string(),
            current_path: config.destination.object_uri(&key),
            timestamp: created.to_string(),
            platform: config.platform.clone(),
            workspace: config.workspace.name.clone(),
            workflow: config.workflow_name.clone(),
        };

        let meta_local = self.staging.tmp_path(&metadata_file_name(
            alias,
            &config.workflow_name,
            file_name,
            &created,
        ));
        write_metadata_csv(&record, &meta_local)?;
        let meta_key = config.destination.key(&metadata_key(
            alias,
            &config.workflow_name,
            file_name,
            &created,
        ));
        self.s3.upload(meta_local.as_std_path(), bucket, &meta_key)?;
        Staging::remove_file(&meta_local)?;

        Ok((record, meta_key))
    }
}

pub fn write_metadata_csv(record: &TransferRecord, path: &Utf8Path) -> Result<(), WaphlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .serialize(record)
        .map_err(|err| WaphlError::Table(err.to_string()))?;
    let content = writer
        .into_inner()
        .map_err(|err| WaphlError::Table(err.to_string()))?;
    crate::store::write_bytes_atomic(path.as_std_path(), &content)
}
