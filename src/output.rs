use std::io::{self, Write};

use serde::Serialize;

use crate::lims::LimsExport;
use crate::mash::MashSummary;
use crate::migrate::{MigrationReport, TableStatus};
use crate::phoenix::PhoenixFixResult;
use crate::poppunk::SweepResult;
use crate::samplesheet::SamplesheetResult;
use crate::tables::TableSyncResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// One-screen summaries for interactive use.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_migration(report: &MigrationReport) {
        println!("Workspace {}", report.workspace);
        println!(
            "  tables: {} migrated, {} already mirrored, {} without source paths",
            report.tables_with_status(TableStatus::Migrated),
            report.tables_with_status(TableStatus::Mirrored),
            report.tables_with_status(TableStatus::NoSourcePaths),
        );
        for table in &report.tables {
            if !table.unmatched_samples.is_empty() {
                println!(
                    "  {}: {} unmatched sample(s): {}",
                    table.table,
                    table.unmatched_samples.len(),
                    table.unmatched_samples.join(", ")
                );
            }
        }
        let records = report.transferred().collect::<Vec<_>>();
        println!("  files transferred: {}", records.len());
        for record in records {
            println!("    {} -> {}", record.origin_path, record.current_path);
        }
    }

    pub fn print_tables(result: &TableSyncResult) {
        for item in &result.items {
            let mut actions = Vec::new();
            if item.pulled {
                actions.push(format!("pulled to {}", item.local_path));
            }
            if let Some(target) = &item.pushed_to {
                actions.push(format!("pushed to {target}"));
            }
            if item.cleaned {
                actions.push("removed locally".to_string());
            }
            if actions.is_empty() {
                actions.push("nothing to do".to_string());
            }
            println!("{}: {}", item.table, actions.join(", "));
        }
    }

    pub fn print_mash(summary: &MashSummary) {
        println!("best reference: {}", summary.best_reference);
        println!(
            "{}/{} assemblies kept, written to {}",
            summary.kept.len(),
            summary.total,
            summary.output
        );
    }

    pub fn print_sweep(result: &SweepResult) {
        for k in &result.failed {
            println!("{k} distinct component(s) could not be found.");
        }
        println!("see results in {}", result.output);
    }

    pub fn print_samplesheet(result: &SamplesheetResult) {
        println!("{} sample(s); file saved to {}", result.samples, result.output);
    }

    pub fn print_phoenix(result: &PhoenixFixResult) {
        println!("{} sample(s) merged", result.samples.len());
        println!("  uploaded {}", result.summary_key);
        println!("  uploaded {}", result.manifest_key);
    }

    pub fn print_lims(export: &LimsExport) {
        println!(
            "{} row(s) x {} column(s) written to {}",
            export.rows, export.columns, export.output
        );
    }
}
