//! Import settings model.
//!
//! One [`FieldMapping`] per distinct marker found in the source file, plus
//! the designated record marker and the character-mapping table. This is the
//! fully formed configuration value the UI (here: the CLI and the settings
//! file reader) hands to the pure import components; nothing in here touches
//! a store or a terminal.

mod sfm_io;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::{FieldId, ListId};

pub use sfm_io::{read_settings, write_settings};

/// Default short-line threshold for the paragraph heuristic, in characters.
pub const DEFAULT_SHORT_LINE_LIMIT: u32 = 60;

/// Record classification carried by a marker.
///
/// The record marker itself is never `None`; a level of 1 denotes a
/// top-level record, higher levels open sub-records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    None,
    Event,
    Analysis,
}

/// Whether choice values match list items by name or by abbreviation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBy {
    #[default]
    Name,
    Abbreviation,
}

/// A literal match -> replace pair applied before delimiter splitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

/// Options for markers that land in structured-text fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOptions {
    /// Every source line starts a new paragraph.
    #[serde(default)]
    pub para_every_line: bool,
    /// A blank source line ends the current paragraph.
    #[serde(default)]
    pub para_after_blank: bool,
    /// An indented source line starts a new paragraph.
    #[serde(default)]
    pub para_after_indent: bool,
    /// A line shorter than [`TextOptions::short_line_limit`] ends its
    /// paragraph.
    #[serde(default)]
    pub para_after_short_line: bool,
    #[serde(default = "default_short_line_limit")]
    pub short_line_limit: u32,
    /// Paragraph style name, empty for the store default.
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub writing_system: String,
}

fn default_short_line_limit() -> u32 {
    DEFAULT_SHORT_LINE_LIMIT
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            para_every_line: false,
            para_after_blank: true,
            para_after_indent: true,
            para_after_short_line: false,
            short_line_limit: DEFAULT_SHORT_LINE_LIMIT,
            style: String::new(),
            writing_system: String::new(),
        }
    }
}

/// Options for markers resolved against a possibility list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOptions {
    /// Multi-value delimiters, tried in declaration order.
    #[serde(default)]
    pub delimiters: Vec<String>,
    /// Sub-hierarchy delimiters; fragments containing one become
    /// hierarchical candidates.
    #[serde(default)]
    pub hierarchy_delimiters: Vec<String>,
    /// Keep only text strictly between these markers when both are present.
    #[serde(default)]
    pub between: Option<(String, String)>,
    /// Truncate each fragment at the first occurrence of this marker.
    #[serde(default)]
    pub before: Option<String>,
    /// Literal substitutions, longest match first.
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
    /// Value substituted when the field is empty (unless ignore-empty).
    #[serde(default)]
    pub empty_default: Option<String>,
    #[serde(default)]
    pub match_by: MatchBy,
    /// Target possibility list.
    #[serde(default)]
    pub list: ListId,
}

/// Options for date markers: the ordered format-picture list, either
/// declared by the user or filled in by inference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOptions {
    #[serde(default)]
    pub formats: Vec<String>,
}

/// Options for markers stored as one alternative of a multilingual field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiLingualOptions {
    pub writing_system: String,
}

/// Destination-kind specific options, mutually exclusive per marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldOptions {
    /// Field is discarded (destination 0).
    #[default]
    Discard,
    Text(TextOptions),
    Choice(ChoiceOptions),
    Date(DateOptions),
    MultiLingual(MultiLingualOptions),
}

impl FieldOptions {
    /// Short lowercase tag, used in log lines and the check report.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Discard => "discard",
            Self::Text(_) => "text",
            Self::Choice(_) => "choice",
            Self::Date(_) => "date",
            Self::MultiLingual(_) => "multilingual",
        }
    }
}

/// Configuration for one marker of the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Marker text without the leading escape, unique per settings object.
    pub marker: String,
    /// Display name shown in reports.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub record_kind: RecordKind,
    /// Record hierarchy level, >= 1; meaningful only when
    /// `record_kind != None`.
    #[serde(default = "default_level")]
    pub level: u32,
    /// Destination field in the store; 0 discards the value.
    #[serde(default)]
    pub field: FieldId,
    /// Default writing system for this marker's text.
    #[serde(default)]
    pub writing_system: String,
    /// Skip the field entirely when its value is empty.
    #[serde(default)]
    pub ignore_empty: bool,
    #[serde(default)]
    pub options: FieldOptions,
}

fn default_level() -> u32 {
    1
}

impl FieldMapping {
    /// Create a mapping for `marker` with default (discard) options.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self {
            name: marker.clone(),
            marker,
            record_kind: RecordKind::None,
            level: 1,
            field: 0,
            writing_system: String::new(),
            ignore_empty: false,
            options: FieldOptions::Discard,
        }
    }

    /// Reset everything but the marker key to defaults.
    pub fn clear(&mut self) {
        let marker = std::mem::take(&mut self.marker);
        *self = Self::new(marker);
    }

    /// True when this marker opens a record or sub-record.
    #[must_use]
    pub fn starts_record(&self) -> bool {
        self.record_kind != RecordKind::None
    }
}

/// Effect applied to text enclosed by a character mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", content = "value", rename_all = "snake_case")]
pub enum CharEffect {
    /// Strip the markers, keep the interior under the surrounding effect.
    Ignore,
    Bold,
    Italic,
    /// Named character style.
    Style(String),
    /// Reinterpret the interior through a legacy writing-system converter.
    OldWritingSystem(String),
}

/// Inline begin/end marker pair with its effect.
///
/// Begin markers are distinct across the table; when two mappings share a
/// begin marker the first one declared wins on search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharMapping {
    pub begin: String,
    pub end: String,
    pub effect: CharEffect,
}

/// The complete import configuration: one mapping per marker, the record
/// marker, and the character-mapping table.
///
/// Two settings objects are equal iff every mapping compares field-for-field
/// equal, nested option sets included; substitution and date-format lists
/// compare length-then-element-wise. Equality and serialization see exactly
/// the same fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSettings {
    #[serde(default)]
    pub name: String,
    /// Marker whose occurrences delimit records.
    #[serde(default)]
    pub record_marker: String,
    #[serde(default)]
    pub mappings: BTreeMap<String, FieldMapping>,
    #[serde(default)]
    pub char_mappings: Vec<CharMapping>,
}

impl ImportSettings {
    /// Create empty settings with a display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Look up the mapping for a marker.
    #[must_use]
    pub fn mapping(&self, marker: &str) -> Option<&FieldMapping> {
        self.mappings.get(marker)
    }

    /// Insert or replace a mapping, keyed by its marker.
    pub fn insert(&mut self, mapping: FieldMapping) {
        self.mappings.insert(mapping.marker.clone(), mapping);
    }

    /// Mapping for the configured record marker.
    #[must_use]
    pub fn record_mapping(&self) -> Option<&FieldMapping> {
        self.mappings.get(&self.record_marker)
    }

    /// Reset every mapping to defaults, keeping the marker set.
    pub fn clear(&mut self) {
        for mapping in self.mappings.values_mut() {
            mapping.clear();
        }
        self.char_mappings.clear();
    }

    /// Check the §4.1 invariants: a record marker is configured, it has a
    /// mapping, and that mapping's classification is not `None`.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.record_marker.is_empty() {
            return Err(crate::error::ImportError::NoRecordMarker);
        }
        match self.record_mapping() {
            None => Err(crate::error::ImportError::UnknownMarker(
                self.record_marker.clone(),
            )),
            Some(m) if !m.starts_record() => Err(crate::error::ImportError::Settings(format!(
                "record marker '\\{}' has no record classification",
                self.record_marker
            ))),
            Some(m) if m.level == 0 => Err(crate::error::ImportError::Settings(format!(
                "record marker '\\{}' has level 0",
                self.record_marker
            ))),
            Some(_) => Ok(()),
        }
    }
}
