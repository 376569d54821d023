//! Choice-field parsing: raw value -> normalized possibility candidates.

use crate::possibility::HIER_SEP;
use crate::settings::{ChoiceOptions, Substitution};
use crate::store::ObjectId;

/// A normalized value extracted from one field occurrence, pending matching
/// or insertion into a possibility list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCandidate {
    /// Normalized text; hierarchical paths use the canonical separator.
    pub text: String,
    /// True while the text still contains unresolved hierarchy separators.
    pub has_hierarchy: bool,
    /// Owning item once partially matched; `None` means the list root.
    pub owner: Option<ObjectId>,
    /// Number of leading path segments already matched against the list.
    pub matched_prefix: usize,
}

impl ParsedCandidate {
    fn new(text: String, has_hierarchy: bool) -> Self {
        Self {
            text,
            has_hierarchy,
            owner: None,
            matched_prefix: 0,
        }
    }

    /// Path segments of the candidate text.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.text.split(HIER_SEP)
    }
}

/// Parse one choice-field value into an ordered, deduplicated candidate
/// list. An empty value yields the configured default, or nothing at all
/// when `ignore_empty` is set.
#[must_use]
pub fn parse_candidates(
    value: &str,
    opts: &ChoiceOptions,
    ignore_empty: bool,
) -> Vec<ParsedCandidate> {
    let value = value.trim();
    let value = if value.is_empty() {
        if ignore_empty {
            return Vec::new();
        }
        match &opts.empty_default {
            Some(default) if !default.is_empty() => default.clone(),
            _ => return Vec::new(),
        }
    } else {
        value.to_string()
    };

    let value = apply_substitutions(&value, &opts.substitutions);

    // Multi-value split: every delimiter is tried against every current
    // fragment, in declaration order, producing ever-finer fragments.
    let mut fragments = vec![value];
    for delim in opts.delimiters.iter().filter(|d| !d.is_empty()) {
        fragments = fragments
            .iter()
            .flat_map(|f| f.split(delim.as_str()))
            .map(str::to_string)
            .collect();
    }

    let mut candidates: Vec<ParsedCandidate> = Vec::new();
    for fragment in &fragments {
        let mut fragment = fragment.as_str();

        if let Some(before) = opts.before.as_deref().filter(|b| !b.is_empty()) {
            if let Some(pos) = fragment.find(before) {
                fragment = &fragment[..pos];
            }
        }

        let fragment = match between(fragment, &opts.between) {
            Some(inner) => inner,
            None => continue,
        };

        let (text, has_hierarchy) = normalize_hierarchy(fragment, &opts.hierarchy_delimiters);
        if text.is_empty() {
            continue;
        }
        if candidates.iter().any(|c| c.text == text) {
            continue;
        }
        candidates.push(ParsedCandidate::new(text, has_hierarchy));
    }
    candidates
}

/// Literal substitutions: longest match first, scanning left to right,
/// restarting the scan at the substitution's end.
fn apply_substitutions(text: &str, subs: &[Substitution]) -> String {
    let mut active: Vec<&Substitution> = subs.iter().filter(|s| !s.from.is_empty()).collect();
    if active.is_empty() {
        return text.to_string();
    }
    active.sort_by_key(|s| std::cmp::Reverse(s.from.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for sub in &active {
            if let Some(tail) = rest.strip_prefix(sub.from.as_str()) {
                out.push_str(&sub.to);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.char_indices();
        if let Some((_, ch)) = chars.next() {
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    out
}

/// Keep only text strictly inside the nearest matching start/end pair.
/// Returns `None` when markers are configured but the fragment lacks a
/// valid pair; a half-configured pair degrades to "no filtering".
fn between<'a>(fragment: &'a str, markers: &Option<(String, String)>) -> Option<&'a str> {
    let Some((begin, end)) = markers else {
        return Some(fragment);
    };
    if begin.is_empty() || end.is_empty() {
        return Some(fragment);
    }
    let start = fragment.find(begin.as_str())? + begin.len();
    let len = fragment[start..].find(end.as_str())?;
    Some(&fragment[start..start + len])
}

/// Split a fragment into path segments on the configured sub-hierarchy
/// delimiters and rejoin with the canonical separator.
fn normalize_hierarchy(fragment: &str, delimiters: &[String]) -> (String, bool) {
    let delimiters: Vec<&String> = delimiters.iter().filter(|d| !d.is_empty()).collect();
    if delimiters.is_empty() {
        return (fragment.trim().to_string(), false);
    }

    let mut segments = vec![fragment.to_string()];
    for delim in delimiters {
        segments = segments
            .iter()
            .flat_map(|s| s.split(delim.as_str()))
            .map(str::to_string)
            .collect();
    }
    let segments: Vec<&str> = segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let has_hierarchy = segments.len() > 1;
    let sep = HIER_SEP.to_string();
    (segments.join(sep.as_str()), has_hierarchy)
}
