//! Structured-text parsing: merge source lines into paragraphs.

use crate::scanner::split_lines;
use crate::settings::TextOptions;

/// Paragraph break character in merged text, distinct from the spaces that
/// join lines inside a paragraph. U+2029 cannot occur in line-based SFM
/// values.
pub const PARA_SEP: char = '\u{2029}';

/// Merge the logical lines of a field value into paragraphs according to
/// the configured policy.
///
/// A new paragraph starts when the policy forces one per line, when the
/// previous line was blank, when the current line is indented, or when the
/// previous line was shorter than the configured threshold; otherwise lines
/// are joined with a single space. Bare CR, LF and CRLF are all accepted.
#[must_use]
pub fn merge_paragraphs(text: &str, opts: &TextOptions) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_blank = false;
    let mut prev_width: Option<usize> = None;

    for line in split_lines(text) {
        let content = line.trim();
        if content.is_empty() {
            prev_blank = true;
            continue;
        }
        let indented = line.starts_with(|c: char| c.is_whitespace());
        let prev_short = prev_width.is_some_and(|w| w < opts.short_line_limit as usize);

        let break_before = opts.para_every_line
            || (opts.para_after_blank && prev_blank)
            || (opts.para_after_indent && indented)
            || (opts.para_after_short_line && prev_short);

        if break_before && !current.is_empty() {
            paragraphs.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(content);

        prev_blank = false;
        prev_width = Some(content.chars().count());
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    let mut out = String::new();
    for (i, para) in paragraphs.iter().enumerate() {
        if i > 0 {
            out.push(PARA_SEP);
        }
        out.push_str(para);
    }
    out
}

/// Split merged text back into its paragraphs, dropping empties.
pub fn paragraphs(merged: &str) -> impl Iterator<Item = &str> {
    merged.split(PARA_SEP).filter(|p| !p.is_empty())
}
