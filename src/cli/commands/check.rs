//! `sfmload check` - review a settings file against a data file.

use std::fs;

use colored::Colorize;

use crate::cli::CheckArgs;
use crate::dates::infer_formats;
use crate::error::Result;
use crate::scanner::ScanResult;
use crate::settings::{read_settings, FieldOptions};

pub fn run(args: &CheckArgs) -> Result<()> {
    let settings = read_settings(&fs::read_to_string(&args.settings)?)?;
    settings.validate()?;
    let bytes = fs::read(&args.file)?;
    let scan = ScanResult::scan_bytes(&bytes);

    println!(
        "settings '{}', record marker \\{}",
        settings.name, settings.record_marker
    );
    println!(
        "records in {}: {}",
        args.file.display(),
        scan.records(&settings.record_marker).len()
    );

    let mut unmapped: Vec<&str> = scan
        .markers()
        .filter(|m| settings.mapping(m).is_none())
        .collect();
    unmapped.sort_unstable();
    for marker in &unmapped {
        println!(
            "{} \\{} occurs {} times but has no mapping",
            "unmapped:".yellow(),
            marker,
            scan.occurrences(marker).len()
        );
    }

    for (marker, mapping) in &settings.mappings {
        if scan.occurrences(marker).is_empty() {
            println!(
                "{} \\{} ({}) never occurs in the file",
                "unused:".yellow(),
                marker,
                mapping.options.kind_name()
            );
        }
    }

    // Preview what the inference prepass would derive for empty date
    // mappings.
    for (marker, mapping) in &settings.mappings {
        let FieldOptions::Date(opts) = &mapping.options else {
            continue;
        };
        if !opts.formats.is_empty() {
            println!("date \\{marker}: declared formats {:?}", opts.formats);
            continue;
        }
        let samples: Vec<&str> = scan.values(marker).collect();
        let mut formats = Vec::new();
        infer_formats(samples.iter().copied(), &mut formats);
        if formats.is_empty() && !samples.is_empty() {
            println!(
                "{} date \\{marker}: no format inferred from {} samples",
                "warning:".red(),
                samples.len()
            );
        } else if !formats.is_empty() {
            println!("date \\{marker}: inferred formats {formats:?}");
        }
    }

    if unmapped.is_empty() {
        println!("{}", "every marker in the file is mapped".green());
    }
    Ok(())
}
