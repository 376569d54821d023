//! `sfmload import` - run the batch import into a SQLite database.

use std::fs;

use colored::Colorize;
use indicatif::ProgressBar;
use tracing::info;

use crate::cli::progress::ProgressReporter;
use crate::cli::ImportArgs;
use crate::convert::ConverterRegistry;
use crate::driver::{BatchObserver, Importer};
use crate::error::Result;
use crate::scanner::ScanResult;
use crate::settings::{read_settings, FieldOptions, ImportSettings};
use crate::store::{ListId, ObjectStore, SqliteStore};

/// Bridges the driver's observer to the progress bar. Never cancels.
struct BarObserver {
    bar: ProgressBar,
}

impl BatchObserver for BarObserver {
    fn record_done(&mut self, _number: usize, _total: usize, error: Option<&str>) -> bool {
        if let Some(message) = error {
            self.bar.println(format!("{} {message}", "failed:".red()));
        }
        self.bar.inc(1);
        true
    }

    fn insertion_failed(&mut self, list: ListId, value: &str, reason: &str) {
        self.bar.println(format!(
            "{} could not add '{value}' to list {list}: {reason}",
            "warning:".yellow()
        ));
    }
}

pub fn run(args: &ImportArgs, quiet: bool) -> Result<()> {
    let mut settings = read_settings(&fs::read_to_string(&args.settings)?)?;
    settings.validate()?;
    let bytes = fs::read(&args.file)?;
    let scan = ScanResult::scan_bytes(&bytes);

    let mut store = SqliteStore::open(&args.db)?;
    let project = store.ensure_project(&args.project)?;
    ensure_lists(&mut store, &mut settings)?;

    let converters = ConverterRegistry::new();
    let mut importer = Importer::new(&mut store, &converters, settings, project)?;

    let reporter = ProgressReporter::new(quiet);
    let total = scan.records(&importer.settings().record_marker).len();
    let mut observer = BarObserver {
        bar: reporter.bar(total as u64, "importing"),
    };
    let report = importer.run(&scan, &mut observer)?;
    observer.bar.finish_and_clear();

    if !quiet {
        println!(
            "imported {} of {} records into '{}'",
            report.records_imported.to_string().green(),
            report.records_total,
            args.project
        );
        if report.new_possibilities > 0 {
            println!("added {} new list items", report.new_possibilities);
        }
        if report.skipped_values > 0 {
            println!("dropped {} values on closed lists", report.skipped_values);
        }
        for failure in &report.failures {
            println!("{} {}", "failed:".red(), failure.message);
        }
        if !report.failures.is_empty() {
            println!(
                "{}",
                format!("{} records failed", report.failed_count()).red()
            );
        }
    }

    if report.records_total > 0 && report.records_imported == 0 {
        return Err(crate::error::ImportError::TransactionFailed(
            "no record could be imported".to_string(),
        ));
    }
    Ok(())
}

/// Point every choice mapping at an existing list, creating lists named
/// after the mapping when the configured id is not in this database.
fn ensure_lists(store: &mut SqliteStore, settings: &mut ImportSettings) -> Result<()> {
    for mapping in settings.mappings.values_mut() {
        let FieldOptions::Choice(opts) = &mut mapping.options else {
            continue;
        };
        if store.load_possibility_list(opts.list).is_ok() {
            continue;
        }
        let name = if mapping.name.is_empty() {
            format!("{} list", mapping.marker)
        } else {
            mapping.name.clone()
        };
        let id = store.ensure_possibility_list(&name)?;
        info!(marker = %mapping.marker, list = id, name = %name, "bound choice field to list");
        opts.list = id;
    }
    Ok(())
}
