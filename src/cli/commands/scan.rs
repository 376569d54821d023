//! `sfmload scan` - marker inventory for an SFM file.

use std::collections::BTreeMap;
use std::fs;

use crate::cli::ScanArgs;
use crate::error::Result;
use crate::scanner::ScanResult;

pub fn run(args: &ScanArgs) -> Result<()> {
    let bytes = fs::read(&args.file)?;
    let scan = ScanResult::scan_bytes(&bytes);

    // Sorted marker -> (count, first sample).
    let mut table: BTreeMap<&str, (usize, &str)> = BTreeMap::new();
    for marker in scan.markers() {
        let occurrences = scan.occurrences(marker);
        let sample = scan
            .values(marker)
            .find(|v| !v.is_empty())
            .unwrap_or_default();
        table.insert(marker, (occurrences.len(), sample));
    }

    if table.is_empty() {
        println!("no markers found in {}", args.file.display());
        return Ok(());
    }

    println!("{:<12} {:>6}  {}", "marker", "count", "first value");
    for (marker, (count, sample)) in &table {
        println!("\\{:<11} {:>6}  {}", marker, count, truncate(sample, 50));
    }

    if let Some(record_marker) = &args.record_marker {
        let records = scan.records(record_marker);
        println!();
        println!("records delimited by \\{record_marker}: {}", records.len());
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_and_long() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long sample value", 10), "a very ...");
    }
}
