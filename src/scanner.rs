//! SFM record scanner.
//!
//! Turns raw file bytes into an ordered sequence of (marker, value) fields
//! plus a marker -> occurrences index, and slices the sequence into records
//! at the configured record marker. No semantic validation happens here;
//! a file without markers simply yields zero fields and zero records.

use std::collections::HashMap;

use memchr::memchr2;

/// Character that introduces a marker at the start of a line.
pub const MARKER_ESCAPE: u8 = b'\\';

/// Markers starting with this character are reserved metadata and skipped.
pub const PRIVATE_ESCAPE: u8 = b'_';

/// One field occurrence: a marker and everything up to the next marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfmField {
    /// Marker text without the leading escape.
    pub marker: String,
    /// Space-joined, trimmed field value.
    pub value: String,
    /// Logical source lines of the value: the marker-line remainder first,
    /// then continuation lines with leading whitespace preserved and blank
    /// lines kept. Paragraph merging needs this shape.
    pub lines: Vec<String>,
    /// 1-based line number of the marker line.
    pub line: usize,
}

/// One record: the ordered field slice between two successive occurrences
/// of the record marker, the first field being the record marker itself.
#[derive(Debug, Clone, Copy)]
pub struct ImportRecord<'a> {
    /// 0-based record number in file order.
    pub number: usize,
    pub fields: &'a [SfmField],
}

impl ImportRecord<'_> {
    /// The record-marker field that opened this record.
    #[must_use]
    pub fn head(&self) -> &SfmField {
        &self.fields[0]
    }
}

/// Scanner output: fields in file order plus the marker index.
#[derive(Debug, Default)]
pub struct ScanResult {
    fields: Vec<SfmField>,
    index: HashMap<String, Vec<usize>>,
}

impl ScanResult {
    /// Scan raw file bytes. Invalid UTF-8 is replaced, never an error;
    /// CR, LF and CRLF line endings are all accepted.
    #[must_use]
    pub fn scan_bytes(input: &[u8]) -> Self {
        Self::scan(&String::from_utf8_lossy(input))
    }

    /// Scan already-decoded text.
    #[must_use]
    pub fn scan(input: &str) -> Self {
        let mut result = Self::default();
        for (line_no, line) in split_lines(input).enumerate() {
            let bytes = line.as_bytes();
            if bytes.first() == Some(&MARKER_ESCAPE) && bytes.get(1) != Some(&PRIVATE_ESCAPE) {
                let rest = &line[1..];
                let (marker, value) = match rest.find(char::is_whitespace) {
                    Some(pos) => (&rest[..pos], rest[pos..].trim()),
                    None => (rest, ""),
                };
                if marker.is_empty() {
                    // A bare backslash line is not a marker; treat it as
                    // continuation text like any other line.
                    result.push_continuation(line);
                    continue;
                }
                result
                    .index
                    .entry(marker.to_string())
                    .or_default()
                    .push(result.fields.len());
                result.fields.push(SfmField {
                    marker: marker.to_string(),
                    value: value.to_string(),
                    lines: vec![value.to_string()],
                    line: line_no + 1,
                });
            } else if bytes.first() == Some(&MARKER_ESCAPE) {
                // Reserved "\_" metadata line.
                continue;
            } else {
                result.push_continuation(line);
            }
        }
        result
    }

    fn push_continuation(&mut self, line: &str) {
        let Some(field) = self.fields.last_mut() else {
            // Text before the first marker belongs to no field.
            return;
        };
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if !field.value.is_empty() {
                field.value.push(' ');
            }
            field.value.push_str(trimmed);
        }
        field.lines.push(line.trim_end().to_string());
    }

    /// All fields in file order.
    #[must_use]
    pub fn fields(&self) -> &[SfmField] {
        &self.fields
    }

    /// Distinct markers seen, in arbitrary order.
    pub fn markers(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Field indices at which `marker` occurs, in file order.
    #[must_use]
    pub fn occurrences(&self, marker: &str) -> &[usize] {
        self.index.get(marker).map_or(&[], Vec::as_slice)
    }

    /// All values recorded for `marker`, in file order.
    pub fn values<'a>(&'a self, marker: &str) -> impl Iterator<Item = &'a str> {
        self.occurrences(marker)
            .iter()
            .map(|&i| self.fields[i].value.as_str())
    }

    /// Slice the field sequence into records at `record_marker`.
    /// The last record runs to end of input; fields before the first
    /// occurrence belong to no record.
    #[must_use]
    pub fn records<'a>(&'a self, record_marker: &str) -> Vec<ImportRecord<'a>> {
        let starts = self.occurrences(record_marker);
        starts
            .iter()
            .enumerate()
            .map(|(number, &start)| {
                let end = starts.get(number + 1).copied().unwrap_or(self.fields.len());
                ImportRecord {
                    number,
                    fields: &self.fields[start..end],
                }
            })
            .collect()
    }
}

/// Split on CR, LF or CRLF without allocating.
pub(crate) fn split_lines(input: &str) -> impl Iterator<Item = &str> {
    let mut rest = input;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match memchr2(b'\n', b'\r', rest.as_bytes()) {
            Some(pos) => {
                let line = &rest[..pos];
                let mut next = pos + 1;
                if rest.as_bytes()[pos] == b'\r' && rest.as_bytes().get(next) == Some(&b'\n') {
                    next += 1;
                }
                rest = &rest[next..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\\_sh v3.0 400 Anthro\n\
        \\nt first record\n\
        \\de The quick brown fox\n\
        jumps over the dog.\n\
        \\dt 12/Mar/99\n\
        \\nt second record\n\
        \\de short\n";

    #[test]
    fn test_marker_lines_and_continuations() {
        let scan = ScanResult::scan(SAMPLE);
        assert_eq!(scan.fields().len(), 5);
        let de = &scan.fields()[1];
        assert_eq!(de.marker, "de");
        assert_eq!(de.value, "The quick brown fox jumps over the dog.");
        assert_eq!(de.lines.len(), 2);
    }

    #[test]
    fn test_reserved_metadata_lines_are_skipped() {
        let scan = ScanResult::scan(SAMPLE);
        assert!(scan.occurrences("_sh").is_empty());
        assert!(!scan.markers().any(|m| m.starts_with('_')));
    }

    #[test]
    fn test_record_count_equals_marker_occurrences() {
        let scan = ScanResult::scan(SAMPLE);
        let records = scan.records("nt");
        assert_eq!(records.len(), scan.occurrences("nt").len());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields.len(), 3);
        assert_eq!(records[1].fields.len(), 2);
        assert_eq!(records[0].head().value, "first record");
    }

    #[test]
    fn test_crlf_and_bare_cr_line_endings() {
        let scan = ScanResult::scan("\\aa one\r\n\\bb two\rmore\r\n\\cc three");
        assert_eq!(scan.fields().len(), 3);
        assert_eq!(scan.fields()[1].value, "two more");
        assert_eq!(scan.fields()[2].value, "three");
    }

    #[test]
    fn test_markerless_input_yields_nothing() {
        let scan = ScanResult::scan("no markers here\njust prose\n");
        assert!(scan.fields().is_empty());
        assert!(scan.records("nt").is_empty());
    }

    #[test]
    fn test_value_whitespace_is_trimmed() {
        let scan = ScanResult::scan("\\mk   padded value   \n");
        assert_eq!(scan.fields()[0].value, "padded value");
    }

    #[test]
    fn test_blank_continuation_lines_preserved_in_lines() {
        let scan = ScanResult::scan("\\de para one\n\npara two\n");
        let field = &scan.fields()[0];
        assert_eq!(field.value, "para one para two");
        assert_eq!(field.lines, vec!["para one", "", "para two"]);
    }

    #[test]
    fn test_marker_without_value() {
        let scan = ScanResult::scan("\\nt\n\\de text\n");
        assert_eq!(scan.fields()[0].marker, "nt");
        assert_eq!(scan.fields()[0].value, "");
    }
}
