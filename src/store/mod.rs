//! Persistent object store boundary.
//!
//! The import engine never issues raw queries; everything it needs from the
//! backing database is the [`ObjectStore`] trait: object creation, field
//! writes, reference appends, per-record transactions and possibility-list
//! loading. Two implementations ship with the crate: [`SqliteStore`] for the
//! CLI and [`MemoryStore`] for tests.

mod memory;
mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::compose::TextRun;
use crate::error::Result;
use crate::possibility::PossibilityList;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store object identifier. 0 is never a valid id.
pub type ObjectId = u64;

/// Field identifier inside the store schema. 0 discards the value.
pub type FieldId = u32;

/// Possibility lists are ordinary store objects.
pub type ListId = ObjectId;

/// Object kinds known to the notebook schema.
pub mod kind {
    pub const PROJECT: &str = "project";
    pub const EVENT: &str = "event";
    pub const ANALYSIS: &str = "analysis";
    pub const PARAGRAPH: &str = "paragraph";
    pub const POSSIBILITY_LIST: &str = "possibility-list";
    pub const POSSIBILITY: &str = "possibility";
}

/// Built-in field ids shared by every backend.
pub mod fields {
    use super::FieldId;

    /// Project -> owned records.
    pub const RECORDS: FieldId = 101;
    /// Record -> owned sub-records.
    pub const SUB_RECORDS: FieldId = 102;
    /// Record title (value of the record-marker field).
    pub const TITLE: FieldId = 103;
    /// Paragraph -> run contents.
    pub const PARA_CONTENTS: FieldId = 201;
    /// Paragraph -> style name.
    pub const PARA_STYLE: FieldId = 202;
    /// Possibility / list -> display name.
    pub const NAME: FieldId = 301;
    /// Possibility -> abbreviation.
    pub const ABBREVIATION: FieldId = 302;
    /// List -> top-level items.
    pub const POSSIBILITIES: FieldId = 303;
    /// Possibility -> child items.
    pub const SUB_POSSIBILITIES: FieldId = 304;
    /// List -> closed flag (no insertions allowed).
    pub const IS_CLOSED: FieldId = 305;
    /// List -> drop unmatched values instead of inserting.
    pub const IGNORE_NEW: FieldId = 306;
    pub const DATE_CREATED: FieldId = 901;
    pub const DATE_MODIFIED: FieldId = 902;
}

/// A field value as the store persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    /// One alternative of a multilingual string.
    MultiStr { ws: String, text: String },
    /// Formatted text as a run sequence.
    Runs(Vec<TextRun>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

/// Insertion position for a newly created object among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Append,
    At(usize),
}

/// The §6 boundary: everything the import engine may ask of the database.
///
/// Transactions are per-record and non-nested; a rollback undoes every
/// write since the matching `begin_transaction`.
pub trait ObjectStore {
    /// Create an object of `kind` owned by `owner` in owning slot `slot`.
    fn create_object(
        &mut self,
        kind: &str,
        owner: Option<ObjectId>,
        slot: FieldId,
        position: Position,
    ) -> Result<ObjectId>;

    fn set_field(&mut self, id: ObjectId, field: FieldId, value: Value) -> Result<()>;

    fn append_references(
        &mut self,
        id: ObjectId,
        field: FieldId,
        targets: &[ObjectId],
    ) -> Result<()>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Load a possibility list into its pre-order in-memory form.
    fn load_possibility_list(&self, list: ListId) -> Result<PossibilityList>;
}
