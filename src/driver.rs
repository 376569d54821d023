//! Import driver.
//!
//! One state machine transition per record: begin a transaction, create the
//! record (or sub-record) owner, route every field through its destination
//! handler, stamp timestamps, commit. A failing record is rolled back,
//! counted and reported; the batch keeps going. Only fatal conditions (the
//! store is unreachable, no record marker configured) abort the batch.
//!
//! The driver owns exclusive access to every possibility list it touches:
//! lists are loaded once, mutated in place by insertions, and reloaded from
//! the store after a rollback so the in-memory tree never diverges.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::compose::compose;
use crate::convert::ConverterRegistry;
use crate::dates::{infer_formats, parse_date};
use crate::error::Result;
use crate::parse::{merge_paragraphs, paragraphs, parse_candidates};
use crate::possibility::PossibilityList;
use crate::scanner::{ImportRecord, ScanResult, SfmField};
use crate::settings::{FieldMapping, FieldOptions, ImportSettings, RecordKind};
use crate::store::{fields, kind, ListId, ObjectId, ObjectStore, Position, Value};

/// Observer for batch progress.
///
/// `record_done` is the cooperative yield point of the batch loop and the
/// only place cancellation can take effect: returning `false` stops the
/// import at the record boundary.
pub trait BatchObserver {
    fn record_done(&mut self, number: usize, total: usize, error: Option<&str>) -> bool {
        let _ = (number, total, error);
        true
    }

    /// Blocking notification: the store refused to create a list item.
    fn insertion_failed(&mut self, list: ListId, value: &str, reason: &str) {
        warn!(list, value, reason, "possibility insertion failed");
    }
}

/// Observer that lets the batch run to completion silently.
#[derive(Debug, Default)]
pub struct NullObserver;

impl BatchObserver for NullObserver {}

/// One failed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// 0-based record number in file order.
    pub record: usize,
    pub message: String,
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub records_total: usize,
    pub records_imported: usize,
    pub failures: Vec<RecordFailure>,
    /// List items created by hierarchy insertion across the batch.
    pub new_possibilities: usize,
    /// Values dropped by closed-list / ignore-new escape hatches.
    pub skipped_values: usize,
    /// True when the observer cancelled at a record boundary.
    pub cancelled: bool,
}

impl ImportReport {
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Per-record working state, merged into the batch state only on commit.
#[derive(Debug, Default)]
struct RecordScratch {
    created_owners: Vec<ObjectId>,
    touched_lists: HashSet<ListId>,
    new_items: HashMap<ListId, Vec<ObjectId>>,
    insert_failures: Vec<(ListId, String, String)>,
    skipped_values: usize,
}

/// The batch orchestrator.
pub struct Importer<'a> {
    settings: ImportSettings,
    converters: &'a ConverterRegistry,
    store: &'a mut dyn ObjectStore,
    project: ObjectId,
    /// List cache; the driver has exclusive access for the batch.
    lists: HashMap<ListId, PossibilityList>,
    /// Inserted item ids per list, for the final timestamp pass.
    new_items: HashMap<ListId, Vec<ObjectId>>,
    /// Open record owners by level, persisting across records so
    /// sub-records attach to the most recent owner one level up.
    open_records: Vec<(u32, ObjectId)>,
}

impl<'a> Importer<'a> {
    /// Build an importer; fails fast when the settings violate the
    /// record-marker invariants.
    pub fn new(
        store: &'a mut dyn ObjectStore,
        converters: &'a ConverterRegistry,
        settings: ImportSettings,
        project: ObjectId,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            converters,
            store,
            project,
            lists: HashMap::new(),
            new_items: HashMap::new(),
            open_records: Vec::new(),
        })
    }

    /// Date formats as they stand after construction and inference.
    #[must_use]
    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Run the batch over a scanned file.
    pub fn run(
        &mut self,
        scan: &ScanResult,
        observer: &mut dyn BatchObserver,
    ) -> Result<ImportReport> {
        self.infer_date_formats(scan);

        let records = scan.records(&self.settings.record_marker);
        let mut report = ImportReport {
            records_total: records.len(),
            ..ImportReport::default()
        };
        info!(records = records.len(), "starting import batch");

        for record in &records {
            let open_before = self.open_records.clone();
            let mut scratch = RecordScratch::default();

            let outcome = self.import_record(record, &mut scratch);
            let error = match outcome {
                Ok(()) => {
                    report.records_imported += 1;
                    report.new_possibilities +=
                        scratch.new_items.values().map(Vec::len).sum::<usize>();
                    report.skipped_values += scratch.skipped_values;
                    for (list, items) in scratch.new_items.drain() {
                        self.new_items.entry(list).or_default().extend(items);
                    }
                    None
                }
                Err(e) if e.is_fatal() => {
                    let _ = self.store.rollback();
                    return Err(e);
                }
                Err(e) => {
                    if let Err(rb) = self.store.rollback() {
                        debug!(error = %rb, "rollback after failed record");
                    }
                    self.open_records = open_before;
                    self.reload_lists(&scratch.touched_lists);
                    let message = format!("record {}: {e}", record.number + 1);
                    warn!(record = record.number, error = %e, "record failed, continuing");
                    report.failures.push(RecordFailure {
                        record: record.number,
                        message,
                    });
                    Some(e.to_string())
                }
            };

            for (list, value, reason) in &scratch.insert_failures {
                observer.insertion_failed(*list, value, reason);
            }
            if !observer.record_done(record.number, records.len(), error.as_deref()) {
                report.cancelled = true;
                info!(record = record.number, "import cancelled at record boundary");
                break;
            }
        }

        self.finalize(&mut report);
        info!(
            imported = report.records_imported,
            failed = report.failed_count(),
            new_items = report.new_possibilities,
            "import batch finished"
        );
        Ok(report)
    }

    /// Fill empty date-format lists from all samples seen for each marker.
    fn infer_date_formats(&mut self, scan: &ScanResult) {
        let markers: Vec<String> = self
            .settings
            .mappings
            .iter()
            .filter(|(_, m)| matches!(&m.options, FieldOptions::Date(d) if d.formats.is_empty()))
            .map(|(marker, _)| marker.clone())
            .collect();
        for marker in markers {
            let samples: Vec<&str> = scan.values(&marker).collect();
            if samples.is_empty() {
                continue;
            }
            if let Some(mapping) = self.settings.mappings.get_mut(&marker) {
                if let FieldOptions::Date(opts) = &mut mapping.options {
                    infer_formats(samples.iter().copied(), &mut opts.formats);
                    debug!(marker = %marker, formats = ?opts.formats, "inferred date formats");
                }
            }
        }
    }

    /// One state-machine transition: begin, create owner, route fields,
    /// stamp, commit.
    fn import_record(&mut self, record: &ImportRecord<'_>, scratch: &mut RecordScratch) -> Result<()> {
        self.store.begin_transaction()?;

        for field in record.fields {
            let Some(mapping) = self.settings.mapping(&field.marker).cloned() else {
                debug!(marker = %field.marker, "unmapped marker skipped");
                continue;
            };
            if mapping.starts_record() {
                self.open_owner(&mapping, scratch)?;
            }
            let Some(&(_, owner)) = self.open_records.last() else {
                debug!(marker = %field.marker, "field before any record owner, skipped");
                continue;
            };
            self.write_field(owner, &mapping, field, scratch)?;
        }

        let now = Utc::now();
        for &owner in &scratch.created_owners {
            self.store
                .set_field(owner, fields::DATE_CREATED, Value::Timestamp(now))?;
            self.store
                .set_field(owner, fields::DATE_MODIFIED, Value::Timestamp(now))?;
        }
        self.store.commit()
    }

    /// Create the record or sub-record owner for a classifying marker,
    /// clamping its level to one below the deepest open ancestor.
    fn open_owner(&mut self, mapping: &FieldMapping, scratch: &mut RecordScratch) -> Result<()> {
        let object_kind = match mapping.record_kind {
            RecordKind::Event => kind::EVENT,
            RecordKind::Analysis => kind::ANALYSIS,
            RecordKind::None => return Ok(()),
        };
        let requested = mapping.level.max(1);
        while self
            .open_records
            .last()
            .is_some_and(|&(level, _)| level >= requested)
        {
            self.open_records.pop();
        }
        let (level, parent, slot) = match self.open_records.last() {
            None => (1, self.project, fields::RECORDS),
            Some(&(parent_level, parent_id)) => {
                (requested.min(parent_level + 1), parent_id, fields::SUB_RECORDS)
            }
        };
        let id = self
            .store
            .create_object(object_kind, Some(parent), slot, Position::Append)?;
        debug!(record = id, level, kind = object_kind, "opened record owner");
        self.open_records.push((level, id));
        scratch.created_owners.push(id);
        Ok(())
    }

    /// Route one field value to its destination.
    fn write_field(
        &mut self,
        owner: ObjectId,
        mapping: &FieldMapping,
        field: &SfmField,
        scratch: &mut RecordScratch,
    ) -> Result<()> {
        if mapping.field == 0 {
            return Ok(());
        }
        if field.value.is_empty() && mapping.ignore_empty {
            return Ok(());
        }

        match &mapping.options {
            FieldOptions::Discard => {
                if !field.value.is_empty() {
                    self.store
                        .set_field(owner, mapping.field, Value::Str(field.value.clone()))?;
                }
            }
            FieldOptions::Text(opts) => {
                let ws = if opts.writing_system.is_empty() {
                    &mapping.writing_system
                } else {
                    &opts.writing_system
                };
                let merged = merge_paragraphs(&field.lines.join("\n"), opts);
                for para in paragraphs(&merged) {
                    let runs =
                        compose(para, ws, &self.settings.char_mappings, self.converters)?;
                    let para_obj = self.store.create_object(
                        kind::PARAGRAPH,
                        Some(owner),
                        mapping.field,
                        Position::Append,
                    )?;
                    self.store
                        .set_field(para_obj, fields::PARA_CONTENTS, Value::Runs(runs))?;
                    if !opts.style.is_empty() {
                        self.store.set_field(
                            para_obj,
                            fields::PARA_STYLE,
                            Value::Str(opts.style.clone()),
                        )?;
                    }
                }
            }
            FieldOptions::Choice(opts) => {
                let candidates = parse_candidates(&field.value, opts, mapping.ignore_empty);
                if candidates.is_empty() {
                    return Ok(());
                }
                let mut list = match self.lists.remove(&opts.list) {
                    Some(list) => list,
                    None => self.store.load_possibility_list(opts.list)?,
                };
                let resolution = list.resolve(self.store, candidates, opts.match_by);
                self.lists.insert(opts.list, list);

                scratch.touched_lists.insert(opts.list);
                scratch
                    .new_items
                    .entry(opts.list)
                    .or_default()
                    .extend(resolution.created.iter().copied());
                scratch.skipped_values += resolution.skipped.len();
                for (value, reason) in resolution.failed {
                    scratch.insert_failures.push((opts.list, value, reason));
                }
                if !resolution.ids.is_empty() {
                    self.store
                        .append_references(owner, mapping.field, &resolution.ids)?;
                }
            }
            FieldOptions::Date(opts) => {
                if field.value.is_empty() {
                    return Ok(());
                }
                match parse_date(&field.value, &opts.formats) {
                    Some(date) => {
                        self.store
                            .set_field(owner, mapping.field, Value::Date(date))?;
                    }
                    None => {
                        warn!(marker = %field.marker, value = %field.value, "unparseable date skipped");
                    }
                }
            }
            FieldOptions::MultiLingual(opts) => {
                if !field.value.is_empty() {
                    self.store.set_field(
                        owner,
                        mapping.field,
                        Value::MultiStr {
                            ws: opts.writing_system.clone(),
                            text: field.value.clone(),
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Re-read lists mutated inside a rolled-back record.
    fn reload_lists(&mut self, touched: &HashSet<ListId>) {
        for &list_id in touched {
            match self.store.load_possibility_list(list_id) {
                Ok(list) => {
                    self.lists.insert(list_id, list);
                }
                Err(e) => {
                    warn!(list = list_id, error = %e, "list reload failed, dropping cache");
                    self.lists.remove(&list_id);
                }
            }
        }
    }

    /// After the batch: stamp every inserted item, each touched list once,
    /// and the project once.
    fn finalize(&mut self, report: &mut ImportReport) {
        if let Err(e) = self.finalize_inner() {
            warn!(error = %e, "timestamp pass failed");
            report.failures.push(RecordFailure {
                record: report.records_total,
                message: format!("timestamp pass: {e}"),
            });
        }
    }

    fn finalize_inner(&mut self) -> Result<()> {
        let now = Utc::now();
        self.store.begin_transaction()?;
        for (&list_id, items) in &self.new_items {
            for &item in items {
                self.store
                    .set_field(item, fields::DATE_CREATED, Value::Timestamp(now))?;
                self.store
                    .set_field(item, fields::DATE_MODIFIED, Value::Timestamp(now))?;
            }
            if !items.is_empty() {
                self.store
                    .set_field(list_id, fields::DATE_CREATED, Value::Timestamp(now))?;
                self.store
                    .set_field(list_id, fields::DATE_MODIFIED, Value::Timestamp(now))?;
            }
        }
        self.store
            .set_field(self.project, fields::DATE_MODIFIED, Value::Timestamp(now))?;
        self.store.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{
        ChoiceOptions, DateOptions, MatchBy, MultiLingualOptions, TextOptions,
    };
    use crate::store::MemoryStore;

    const F_TITLE: u32 = fields::TITLE;
    const F_DESC: u32 = 401;
    const F_CATS: u32 = 402;
    const F_DATE: u32 = 403;
    const F_GLOSS: u32 = 404;

    fn settings(list: ListId) -> ImportSettings {
        let mut settings = ImportSettings::new("test map");
        settings.record_marker = "nt".to_string();

        let mut nt = FieldMapping::new("nt");
        nt.record_kind = RecordKind::Event;
        nt.level = 1;
        nt.field = F_TITLE;
        settings.insert(nt);

        let mut sub = FieldMapping::new("sub");
        sub.record_kind = RecordKind::Analysis;
        sub.level = 2;
        sub.field = F_TITLE;
        settings.insert(sub);

        let mut de = FieldMapping::new("de");
        de.field = F_DESC;
        de.writing_system = "en".to_string();
        de.options = FieldOptions::Text(TextOptions::default());
        settings.insert(de);

        let mut anth = FieldMapping::new("anth");
        anth.field = F_CATS;
        anth.options = FieldOptions::Choice(ChoiceOptions {
            delimiters: vec![";".to_string()],
            hierarchy_delimiters: vec!["::".to_string()],
            match_by: MatchBy::Name,
            list,
            ..ChoiceOptions::default()
        });
        settings.insert(anth);

        let mut dt = FieldMapping::new("dt");
        dt.field = F_DATE;
        dt.options = FieldOptions::Date(DateOptions::default());
        settings.insert(dt);

        let mut gl = FieldMapping::new("gl");
        gl.field = F_GLOSS;
        gl.options = FieldOptions::MultiLingual(MultiLingualOptions {
            writing_system: "fr".to_string(),
        });
        settings.insert(gl);

        settings
    }

    fn fixture() -> (MemoryStore, ObjectId, ListId) {
        let mut store = MemoryStore::new();
        let project = store.add_project("anthro");
        let list = store.add_possibility_list("categories");
        let economy = store.add_possibility(list, None, "Economy");
        store.add_possibility(list, Some(economy), "Market");
        (store, project, list)
    }

    const SAMPLE: &str = "\\nt first\n\
        \\de A description that spans\ntwo source lines.\n\
        \\anth Economy; Economy::Market::Prices\n\
        \\dt 16-Aug-02\n\
        \\gl bonjour\n\
        \\nt second\n\
        \\anth Unknown Topic\n\
        \\dt 20-Aug-02\n";

    #[test]
    fn test_full_batch_imports_records() {
        let (mut store, project, list) = fixture();
        let converters = ConverterRegistry::new();
        let scan = ScanResult::scan(SAMPLE);
        let mut importer =
            Importer::new(&mut store, &converters, settings(list), project).unwrap();
        let report = importer.run(&scan, &mut NullObserver).unwrap();

        assert_eq!(report.records_total, 2);
        assert_eq!(report.records_imported, 2);
        assert!(report.failures.is_empty());
        // "Prices" under Economy:Market plus top-level "Unknown Topic".
        assert_eq!(report.new_possibilities, 2);

        let records = store.children(project, fields::RECORDS);
        assert_eq!(records.len(), 2);
        assert_eq!(
            store.field(records[0], F_TITLE),
            Some(&Value::Str("first".to_string()))
        );

        // Choice references: Economy and the new Prices node.
        assert_eq!(store.references(records[0], F_CATS).len(), 2);

        // Date parsed through the inferred format.
        assert_eq!(
            store.field(records[0], F_DATE),
            Some(&Value::Date(
                chrono::NaiveDate::from_ymd_opt(2002, 8, 16).unwrap()
            ))
        );

        // Multilingual alternative.
        assert_eq!(
            store.field(records[0], F_GLOSS),
            Some(&Value::MultiStr {
                ws: "fr".to_string(),
                text: "bonjour".to_string()
            })
        );

        // Text paragraphs composed into runs.
        let paras = store.children(records[0], F_DESC);
        assert_eq!(paras.len(), 1);
        match store.field(paras[0], fields::PARA_CONTENTS) {
            Some(Value::Runs(runs)) => {
                assert_eq!(runs[0].text, "A description that spans two source lines.");
            }
            other => panic!("expected runs, got {other:?}"),
        }

        // Owners stamped.
        assert!(matches!(
            store.field(records[0], fields::DATE_CREATED),
            Some(Value::Timestamp(_))
        ));
    }

    #[test]
    fn test_sub_records_nest_under_parent() {
        let (mut store, project, list) = fixture();
        let converters = ConverterRegistry::new();
        let scan = ScanResult::scan(
            "\\nt parent\n\\sub child analysis\n\\de text for child\n\\nt next parent\n",
        );
        let mut importer =
            Importer::new(&mut store, &converters, settings(list), project).unwrap();
        let report = importer.run(&scan, &mut NullObserver).unwrap();
        assert_eq!(report.records_imported, 2);

        let records = store.children(project, fields::RECORDS);
        assert_eq!(records.len(), 2);
        let subs = store.children(records[0], fields::SUB_RECORDS);
        assert_eq!(subs.len(), 1);
        assert_eq!(store.kind_of(subs[0]), Some(kind::ANALYSIS));
        // The description landed on the sub-record, not the parent.
        assert_eq!(store.children(subs[0], F_DESC).len(), 1);
        assert!(store.children(records[0], F_DESC).is_empty());
    }

    #[test]
    fn test_level_clamped_to_parent_plus_one() {
        let (mut store, project, list) = fixture();
        let mut settings = settings(list);
        if let Some(m) = settings.mappings.get_mut("sub") {
            m.level = 5;
        }
        let converters = ConverterRegistry::new();
        let scan = ScanResult::scan("\\nt parent\n\\sub deep child\n");
        let mut importer = Importer::new(&mut store, &converters, settings, project).unwrap();
        importer.run(&scan, &mut NullObserver).unwrap();

        let records = store.children(project, fields::RECORDS);
        // Clamped to level 2: still a direct sub-record of the parent.
        assert_eq!(store.children(records[0], fields::SUB_RECORDS).len(), 1);
    }

    #[test]
    fn test_failed_record_rolls_back_and_batch_continues() {
        let (mut store, project, list) = fixture();
        let converters = ConverterRegistry::new();
        let scan = ScanResult::scan("\\nt one\n\\nt two\n\\nt three\n");

        // Each record costs four writes (create, title, two timestamps);
        // the fifth write is the second record's owner creation.
        store.fail_nth_write(5);
        let mut importer =
            Importer::new(&mut store, &converters, settings(list), project).unwrap();
        let report = importer.run(&scan, &mut NullObserver).unwrap();

        assert_eq!(report.records_total, 3);
        assert_eq!(report.records_imported, 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failures[0].record, 1);

        let records = store.children(project, fields::RECORDS);
        assert_eq!(records.len(), 2);
        assert_eq!(
            store.field(records[0], F_TITLE),
            Some(&Value::Str("one".to_string()))
        );
        assert_eq!(
            store.field(records[1], F_TITLE),
            Some(&Value::Str("three".to_string()))
        );
    }

    #[test]
    fn test_list_reloaded_after_rollback() {
        let (mut store, project, list) = fixture();
        let converters = ConverterRegistry::new();
        // Record 1 inserts "Novel" then fails on the title write; record 2
        // inserts it again. After the rollback the cached list must not
        // remember the phantom node.
        let scan = ScanResult::scan("\\nt one\n\\anth Novel\n\\nt two\n\\anth Novel\n");

        // Record 1 writes: create owner, title, create item, item name,
        // item abbr, refs; fail on the reference append.
        store.fail_nth_write(6);
        let mut importer =
            Importer::new(&mut store, &converters, settings(list), project).unwrap();
        let report = importer.run(&scan, &mut NullObserver).unwrap();

        assert_eq!(report.records_imported, 1);
        assert_eq!(report.failed_count(), 1);

        // Exactly one "Novel" item exists, referenced by record two.
        let loaded = store.load_possibility_list(list).unwrap();
        let novel: Vec<_> = loaded.nodes.iter().filter(|n| n.name == "Novel").collect();
        assert_eq!(novel.len(), 1);
        let records = store.children(project, fields::RECORDS);
        assert_eq!(records.len(), 1);
        assert_eq!(store.references(records[0], F_CATS), &[novel[0].id]);
    }

    #[test]
    fn test_observer_cancels_at_boundary() {
        struct StopAfterFirst;
        impl BatchObserver for StopAfterFirst {
            fn record_done(&mut self, number: usize, _total: usize, _error: Option<&str>) -> bool {
                number == 0
            }
        }

        let (mut store, project, list) = fixture();
        let converters = ConverterRegistry::new();
        let scan = ScanResult::scan("\\nt one\n\\nt two\n\\nt three\n");
        let mut importer =
            Importer::new(&mut store, &converters, settings(list), project).unwrap();
        let report = importer.run(&scan, &mut StopAfterFirst).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.records_imported, 2);
        assert_eq!(store.children(project, fields::RECORDS).len(), 2);
    }

    #[test]
    fn test_markerless_file_imports_nothing() {
        let (mut store, project, list) = fixture();
        let converters = ConverterRegistry::new();
        let scan = ScanResult::scan("just some prose\nwithout any markers\n");
        let mut importer =
            Importer::new(&mut store, &converters, settings(list), project).unwrap();
        let report = importer.run(&scan, &mut NullObserver).unwrap();
        assert_eq!(report.records_total, 0);
        assert!(store.children(project, fields::RECORDS).is_empty());
    }

    #[test]
    fn test_invalid_settings_fail_fast() {
        let (mut store, project, _) = fixture();
        let converters = ConverterRegistry::new();
        let empty = ImportSettings::new("empty");
        assert!(Importer::new(&mut store, &converters, empty, project).is_err());
    }
}
