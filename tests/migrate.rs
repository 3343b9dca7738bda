use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{DateTime, TimeZone, Utc};

use waphl_tools::config::{MigrationConfig, MigrationSettings};
use waphl_tools::domain::{GcsUri, WorkspaceRef};
use waphl_tools::error::WaphlError;
use waphl_tools::gcs::GcsClient;
use waphl_tools::migrate::{CellOutcome, Migrator, TableStatus};
use waphl_tools::s3::{ObjectEntry, S3Client};
use waphl_tools::store::Staging;
use waphl_tools::terra::TerraClient;

const CREATED_SECS: i64 = 1_690_000_000;

struct FakeTerra {
    tables: Vec<(String, String)>,
    exports: Mutex<usize>,
}

impl FakeTerra {
    fn new(tables: &[(&str, &str)]) -> Self {
        Self {
            tables: tables
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect(),
            exports: Mutex::new(0),
        }
    }
}

impl TerraClient for &FakeTerra {
    fn list_entity_types(&self, _workspace: &WorkspaceRef) -> Result<Vec<String>, WaphlError> {
        Ok(self.tables.iter().map(|(name, _)| name.clone()).collect())
    }

    fn export_table(
        &self,
        _workspace: &WorkspaceRef,
        entity_type: &str,
        destination: &Path,
    ) -> Result<(), WaphlError> {
        let (_, content) = self
            .tables
            .iter()
            .find(|(name, _)| name == entity_type)
            .ok_or_else(|| WaphlError::Table(entity_type.to_string()))?;
        *self.exports.lock().unwrap() += 1;
        std::fs::write(destination, content).map_err(|err| WaphlError::Filesystem(err.to_string()))
    }
}

#[derive(Default)]
struct FakeGcs {
    downloads: Mutex<Vec<String>>,
}

impl GcsClient for &FakeGcs {
    fn created_at(&self, _uri: &GcsUri) -> Result<DateTime<Utc>, WaphlError> {
        Ok(Utc.timestamp_opt(CREATED_SECS, 0).unwrap())
    }

    fn download(&self, uri: &GcsUri, destination: &Path) -> Result<(), WaphlError> {
        self.downloads.lock().unwrap().push(uri.to_string());
        std::fs::write(destination, uri.object()).map_err(|err| WaphlError::Filesystem(err.to_string()))
    }
}

/// Keeps uploaded content keyed by `bucket/key` and lists it back.
#[derive(Default)]
struct FakeS3 {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    uploads: Mutex<Vec<String>>,
}

impl FakeS3 {
    fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    fn content(&self, bucket: &str, key: &str) -> String {
        let objects = self.objects.lock().unwrap();
        String::from_utf8(objects[&format!("{bucket}/{key}")].clone()).unwrap()
    }
}

impl S3Client for &FakeS3 {
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>, WaphlError> {
        let full = format!("{bucket}/{prefix}");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&full))
            .map(|(key, content)| ObjectEntry {
                key: key[bucket.len() + 1..].to_string(),
                size: content.len() as u64,
            })
            .collect())
    }

    fn upload(&self, source: &Path, bucket: &str, key: &str) -> Result<(), WaphlError> {
        let content = std::fs::read(source).map_err(|err| WaphlError::Filesystem(err.to_string()))?;
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), content);
        self.uploads.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn download(&self, _bucket: &str, _key: &str, _destination: &Path) -> Result<(), WaphlError> {
        Err(WaphlError::S3Command("not used".to_string()))
    }
}

fn config(patterns: &[&str]) -> MigrationConfig {
    config_for("s3://lab", patterns)
}

fn config_for(uri: &str, patterns: &[&str]) -> MigrationConfig {
    MigrationConfig::try_from(MigrationSettings {
        project: Some("wa-phl".to_string()),
        workspace: Some("micro".to_string()),
        target_workflow: Some("assembly".to_string()),
        workflow_name: Some("theiaprok".to_string()),
        sample_patterns: Some(patterns.iter().map(|p| p.to_string()).collect()),
        uri: Some(uri.to_string()),
        outdir: Some("data/".to_string()),
    })
    .unwrap()
}

fn staging(temp: &tempfile::TempDir) -> Staging {
    Staging::new_with_root(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap())
}

#[test]
fn table_without_source_paths_transfers_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[("sample", "entity:sample_id\treads\nWA1\ts3://lab/r1.fq\n")]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let report = migrator.run(&config(&["WA\\d+"])).unwrap();

    assert_eq!(report.tables[0].status, TableStatus::NoSourcePaths);
    assert_eq!(report.transferred().count(), 0);
    assert!(gcs.downloads.lock().unwrap().is_empty());
    assert_eq!(s3.uploads(), vec!["terra_tbls/sample.tsv"]);
}

#[test]
fn file_lands_under_partitioned_key_with_matching_metadata() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\nWA1234_S1\tgs://bucket/proj/run/assembly/out.fasta\n",
    )]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let report = migrator.run(&config(&["WA\\d+"])).unwrap();

    let expected =
        "source=data/sample=WA1234/workflow=theiaprok/file=out.fasta/timestamp=1690000000.0/out.fasta";
    let records = report.transferred().collect::<Vec<_>>();
    assert_eq!(records.len(), 1);
    let record = records[0];
    assert_eq!(record.id, "WA1234_S1");
    assert_eq!(record.alt_id, "WA1234");
    assert_eq!(record.current_path, format!("s3://lab/{expected}"));
    assert_eq!(record.workspace, "micro");
    assert_eq!(s3.content("lab", expected), "proj/run/assembly/out.fasta");

    let meta_key = "meta/WA1234_theiaprok_out.fasta_1690000000.0_meta.csv";
    let metadata = s3.content("lab", meta_key);
    assert!(metadata.contains(&format!(",s3://lab/{expected},")));
    assert!(s3.uploads().contains(&"terra_tbls/sample.tsv".to_string()));

    // staged blobs do not outlive their upload
    let leftover = std::fs::read_dir(temp.path().join("tmp")).unwrap().count();
    assert_eq!(leftover, 0);
}

#[test]
fn last_matching_pattern_names_the_sample() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\nWA1234_S1\tgs://bucket/proj/run/assembly/out.fasta\n",
    )]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let report = migrator.run(&config(&["WA\\d+_S\\d", "WA\\d+"])).unwrap();

    let record = report.transferred().next().unwrap();
    assert_eq!(record.alt_id, "WA1234");
}

#[test]
fn unmatched_rows_fetch_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\n\
         CDC-99\tgs://bucket/proj/run/assembly/cdc.fasta\n\
         WA7\tgs://bucket/proj/run/assembly/wa7.fasta\n",
    )]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let report = migrator.run(&config(&["WA\\d+"])).unwrap();

    assert_eq!(report.tables[0].unmatched_samples, vec!["CDC-99"]);
    assert_eq!(
        *gcs.downloads.lock().unwrap(),
        vec!["gs://bucket/proj/run/assembly/wa7.fasta"]
    );
    assert!(report.transferred().all(|record| record.id == "WA7"));
}

#[test]
fn empty_cells_do_not_inherit_earlier_files() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\tqc_report\n\
         WA1\tgs://bucket/proj/run/assembly/wa1.fasta\t\n\
         WA2\t\tgs://bucket/proj/run/qc/wa2.html\n",
    )]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let report = migrator.run(&config(&["WA\\d+"])).unwrap();

    let cells = &report.tables[0].cells;
    assert_eq!(cells.len(), 4);
    assert_matches!(&cells[0].outcome, CellOutcome::Transferred { record, .. } if record.file == "wa1.fasta");
    assert_matches!(&cells[1].outcome, CellOutcome::NoSourceFile { column } if column == "qc_report");
    assert_matches!(&cells[2].outcome, CellOutcome::NoSourceFile { column } if column == "assembly_fasta");
    assert_matches!(&cells[3].outcome, CellOutcome::OtherWorkflow { workflow, .. } if workflow == "qc");
    assert_eq!(report.transferred().count(), 1);
    let metadata = s3
        .uploads()
        .into_iter()
        .filter(|key| key.starts_with("meta/"))
        .count();
    assert_eq!(metadata, 1);
}

#[test]
fn rerun_against_mirrored_snapshots_moves_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let tables = [
        (
            "sample",
            "entity:sample_id\tassembly_fasta\nWA1\tgs://bucket/proj/run/assembly/wa1.fasta\n",
        ),
        ("run", "entity:run_id\tnotes\nr1\tok\n"),
        ("sample_set", "entity:sample_set_id\tsamples\nall\tWA1\n"),
    ];

    let terra = FakeTerra::new(&tables);
    let first_gcs = FakeGcs::default();
    let first = Migrator::new(staging(&temp), &terra, &first_gcs, &s3);
    let report = first.run(&config(&["WA\\d+"])).unwrap();
    assert_eq!(report.tables.len(), 2);
    assert_eq!(report.transferred().count(), 1);
    let uploads_after_first = s3.uploads().len();

    let second_gcs = FakeGcs::default();
    let second = Migrator::new(staging(&temp), &terra, &second_gcs, &s3);
    let report = second.run(&config(&["WA\\d+"])).unwrap();

    assert_eq!(report.tables_with_status(TableStatus::Mirrored), 2);
    assert!(second_gcs.downloads.lock().unwrap().is_empty());
    assert_eq!(s3.uploads().len(), uploads_after_first);
}

#[test]
fn changed_snapshot_is_migrated_again() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let before = [(
        "sample",
        "entity:sample_id\tassembly_fasta\nWA1\tgs://bucket/proj/run/assembly/wa1.fasta\n",
    )];
    let terra = FakeTerra::new(&before);
    Migrator::new(staging(&temp), &terra, &gcs, &s3)
        .run(&config(&["WA\\d+"]))
        .unwrap();

    let after = [(
        "sample",
        "entity:sample_id\tassembly_fasta\n\
         WA1\tgs://bucket/proj/run/assembly/wa1.fasta\n\
         WA2\tgs://bucket/proj/run/assembly/wa2.fasta\n",
    )];
    let terra = FakeTerra::new(&after);
    let report = Migrator::new(staging(&temp), &terra, &gcs, &s3)
        .run(&config(&["WA\\d+"]))
        .unwrap();

    assert_eq!(report.tables[0].status, TableStatus::Migrated);
    assert_eq!(report.transferred().count(), 2);
}

#[test]
fn shallow_source_path_stops_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\nWA1\tgs://bucket/out.fasta\n",
    )]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let err = migrator.run(&config(&["WA\\d+"])).unwrap_err();

    assert_matches!(err, WaphlError::UnexpectedSourceLayout { expected: 4, found: 1, .. });
    assert!(gcs.downloads.lock().unwrap().is_empty());
}

#[test]
fn set_tables_are_not_exported() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[
        ("sample", "entity:sample_id\tnotes\nWA1\tok\n"),
        ("sample_set", "entity:sample_set_id\tsamples\nall\tWA1\n"),
    ]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    migrator.run(&config(&[])).unwrap();

    assert_eq!(*terra.exports.lock().unwrap(), 1);
    assert!(!migrator.staging().table_path("sample_set").exists());
}

#[test]
fn empty_alias_leaves_row_unmatched() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let gcs = FakeGcs::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\nWA1234_S1\tgs://bucket/proj/run/assembly/out.fasta\n",
    )]);
    let migrator = Migrator::new(staging(&temp), &terra, &gcs, &s3);

    let report = migrator.run(&config(&["WA\\d+", "X*"])).unwrap();

    assert_eq!(report.tables[0].unmatched_samples, vec!["WA1234_S1"]);
    assert_eq!(report.transferred().count(), 0);
    assert!(gcs.downloads.lock().unwrap().is_empty());
    assert!(s3.uploads().iter().all(|key| !key.starts_with("meta/")));
}

#[test]
fn prefixed_destination_holds_every_key() {
    let temp = tempfile::tempdir().unwrap();
    let s3 = FakeS3::default();
    let terra = FakeTerra::new(&[(
        "sample",
        "entity:sample_id\tassembly_fasta\nWA1234_S1\tgs://bucket/proj/run/assembly/out.fasta\n",
    )]);
    let config = config_for("s3://lab/archive/", &["WA\\d+"]);

    let gcs = FakeGcs::default();
    let report = Migrator::new(staging(&temp), &terra, &gcs, &s3)
        .run(&config)
        .unwrap();

    let expected = "archive/source=data/sample=WA1234/workflow=theiaprok/file=out.fasta/timestamp=1690000000.0/out.fasta";
    let record = report.transferred().next().unwrap();
    assert_eq!(record.current_path, format!("s3://lab/{expected}"));
    assert_eq!(s3.content("lab", expected), "proj/run/assembly/out.fasta");
    let metadata = s3.content(
        "lab",
        "archive/meta/WA1234_theiaprok_out.fasta_1690000000.0_meta.csv",
    );
    assert!(metadata.contains(&format!(",{},", record.current_path)));
    assert!(s3.uploads().contains(&"archive/terra_tbls/sample.tsv".to_string()));
    assert!(s3.uploads().iter().all(|key| key.starts_with("archive/")));
    let uploads_after_first = s3.uploads().len();

    let rerun_gcs = FakeGcs::default();
    let report = Migrator::new(staging(&temp), &terra, &rerun_gcs, &s3)
        .run(&config)
        .unwrap();

    assert_eq!(report.tables_with_status(TableStatus::Mirrored), 1);
    assert!(rerun_gcs.downloads.lock().unwrap().is_empty());
    assert_eq!(s3.uploads().len(), uploads_after_first);
}
