//! Annotated-text composition.
//!
//! Builds a run-segmented string from raw text with embedded begin/end
//! character markers. Runs carry writing system, style and emphasis; the
//! walk keeps a stack of currently open ranges so partially nested markers
//! degrade instead of erroring: a range whose end marker never shows up
//! closes implicitly at end of text.
//!
//! Following SFM convention, a single space immediately after a begin or
//! end marker belongs to the marker, not to the text.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::convert::ConverterRegistry;
use crate::error::Result;
use crate::settings::{CharEffect, CharMapping};

/// Formatting carried by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProps {
    pub writing_system: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
}

impl RunProps {
    fn plain(writing_system: &str) -> Self {
        Self {
            writing_system: writing_system.to_string(),
            style: None,
            bold: false,
            italic: false,
        }
    }
}

/// A maximal span of text under one formatting effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub props: RunProps,
}

/// Compose a fresh run sequence from `text`.
pub fn compose(
    text: &str,
    default_ws: &str,
    mappings: &[CharMapping],
    converters: &ConverterRegistry,
) -> Result<Vec<TextRun>> {
    let mut runs = Vec::new();
    append_to(&mut runs, text, default_ws, mappings, converters)?;
    Ok(runs)
}

/// Append `text` to an existing run sequence, merging adjacent runs that
/// share properties.
pub fn append_to(
    runs: &mut Vec<TextRun>,
    text: &str,
    default_ws: &str,
    mappings: &[CharMapping],
    converters: &ConverterRegistry,
) -> Result<()> {
    // Every occurrence of every begin marker, in position order. When two
    // mappings share a begin marker the first declared wins.
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for (mi, mapping) in mappings.iter().enumerate() {
        if mapping.begin.is_empty() || !seen.insert(mapping.begin.as_str()) {
            continue;
        }
        for (pos, _) in text.match_indices(mapping.begin.as_str()) {
            candidates.push((pos, mi));
        }
    }
    candidates.sort_by_key(|&(pos, _)| pos);

    let next_start = |candidates: &[(usize, usize)], from: usize, cursor: usize| {
        candidates[from..]
            .iter()
            .map(|&(pos, _)| pos)
            .find(|&pos| pos >= cursor)
            .unwrap_or(text.len())
    };

    let mut stack: Vec<usize> = Vec::new();
    let mut cursor = 0usize;

    for ci in 0..candidates.len() {
        let (pos, mi) = candidates[ci];
        if pos < cursor {
            // Inside a range already emitted or past a consumed marker.
            continue;
        }
        let open_effect = stack.last().map(|&i| &mappings[i].effect);
        emit(runs, &text[cursor..pos], open_effect, default_ws, converters)?;
        cursor = skip_marker(text, pos, &mappings[mi].begin);

        let upcoming = next_start(&candidates, ci + 1, cursor);
        match find_end(text, cursor, &mappings[mi].end) {
            Some(end) if end < upcoming => {
                // Range closes before anything else starts.
                emit(
                    runs,
                    &text[cursor..end],
                    Some(&mappings[mi].effect),
                    default_ws,
                    converters,
                )?;
                cursor = skip_marker(text, end, &mappings[mi].end);
            }
            _ => stack.push(mi),
        }

        // A start directly after a close, consecutive same-level ranges:
        // keep closing the innermost open range while its end marker comes
        // before the next candidate start.
        while let Some(&top) = stack.last() {
            let upcoming = next_start(&candidates, ci + 1, cursor);
            match find_end(text, cursor, &mappings[top].end) {
                Some(end) if end < upcoming => {
                    emit(
                        runs,
                        &text[cursor..end],
                        Some(&mappings[top].effect),
                        default_ws,
                        converters,
                    )?;
                    stack.pop();
                    cursor = skip_marker(text, end, &mappings[top].end);
                }
                _ => break,
            }
        }
    }

    // Tail: close remaining open ranges at their end markers where found,
    // implicitly at end of text otherwise.
    loop {
        match stack.last().copied() {
            Some(top) => match find_end(text, cursor, &mappings[top].end) {
                Some(end) => {
                    emit(
                        runs,
                        &text[cursor..end],
                        Some(&mappings[top].effect),
                        default_ws,
                        converters,
                    )?;
                    cursor = skip_marker(text, end, &mappings[top].end);
                    stack.pop();
                }
                None => {
                    emit(
                        runs,
                        &text[cursor..],
                        Some(&mappings[top].effect),
                        default_ws,
                        converters,
                    )?;
                    cursor = text.len();
                    stack.pop();
                }
            },
            None => {
                emit(runs, &text[cursor..], None, default_ws, converters)?;
                break;
            }
        }
    }
    Ok(())
}

/// Position just past a marker at `pos`, absorbing one following space.
fn skip_marker(text: &str, pos: usize, marker: &str) -> usize {
    let after = pos + marker.len();
    if text.as_bytes().get(after) == Some(&b' ') {
        after + 1
    } else {
        after
    }
}

fn find_end(text: &str, from: usize, end: &str) -> Option<usize> {
    if end.is_empty() {
        return None;
    }
    text[from..].find(end).map(|p| from + p)
}

/// Emit one segment under the innermost open effect, NFC-normalized,
/// merged into the previous run when properties agree.
fn emit(
    runs: &mut Vec<TextRun>,
    segment: &str,
    effect: Option<&CharEffect>,
    default_ws: &str,
    converters: &ConverterRegistry,
) -> Result<()> {
    if segment.is_empty() {
        return Ok(());
    }

    let mut props = RunProps::plain(default_ws);
    let mut text = segment.to_string();
    match effect {
        None | Some(CharEffect::Ignore) => {}
        Some(CharEffect::Bold) => props.bold = true,
        Some(CharEffect::Italic) => props.italic = true,
        Some(CharEffect::Style(name)) => props.style = Some(name.clone()),
        Some(CharEffect::OldWritingSystem(ws)) => {
            text = converters.convert(ws, &text)?;
            props.writing_system = ws.clone();
        }
    }
    let text: String = text.nfc().collect();

    if let Some(last) = runs.last_mut() {
        if last.props == props {
            last.text.push_str(&text);
            return Ok(());
        }
    }
    runs.push(TextRun { text, props });
    Ok(())
}
