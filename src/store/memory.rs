//! In-memory [`ObjectStore`] for tests.
//!
//! Keeps the whole object graph in a map, implements transactions as a
//! snapshot-and-restore of that map, and supports one-shot write-failure
//! injection for exercising the driver's rollback-and-continue path without
//! a real database.

use std::collections::{BTreeMap, HashMap};

use crate::error::{ImportError, Result};
use crate::possibility::{PossibilityList, PossibilityNode};
use crate::store::{fields, kind, FieldId, ListId, ObjectId, ObjectStore, Position, Value};

#[derive(Debug, Clone, Default)]
struct MemObject {
    kind: String,
    owner: Option<ObjectId>,
    slot: FieldId,
    pos: usize,
    fields: HashMap<FieldId, Value>,
    refs: HashMap<FieldId, Vec<ObjectId>>,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: BTreeMap<ObjectId, MemObject>,
    next_id: ObjectId,
    snapshot: Option<(BTreeMap<ObjectId, MemObject>, ObjectId)>,
    /// Countdown to an injected write failure; the failing write clears it.
    fail_write_in: Option<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Make the n-th upcoming mutating call fail (1 = the very next one).
    /// The failure fires once; later writes succeed again.
    pub fn fail_nth_write(&mut self, n: usize) {
        self.fail_write_in = Some(n);
    }

    fn check_injection(&mut self) -> Result<()> {
        if let Some(n) = self.fail_write_in {
            if n <= 1 {
                self.fail_write_in = None;
                return Err(ImportError::TransactionFailed(
                    "injected write failure".to_string(),
                ));
            }
            self.fail_write_in = Some(n - 1);
        }
        Ok(())
    }

    fn alloc(&mut self, object: MemObject) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    fn next_pos(&self, owner: Option<ObjectId>, slot: FieldId) -> usize {
        self.objects
            .values()
            .filter(|o| o.owner == owner && o.slot == slot)
            .map(|o| o.pos + 1)
            .max()
            .unwrap_or(0)
    }

    /// Children of `owner` in `slot`, ordered by position then id.
    #[must_use]
    pub fn children(&self, owner: ObjectId, slot: FieldId) -> Vec<ObjectId> {
        let mut found: Vec<(usize, ObjectId)> = self
            .objects
            .iter()
            .filter(|(_, o)| o.owner == Some(owner) && o.slot == slot)
            .map(|(&id, o)| (o.pos, id))
            .collect();
        found.sort();
        found.into_iter().map(|(_, id)| id).collect()
    }

    #[must_use]
    pub fn kind_of(&self, id: ObjectId) -> Option<&str> {
        self.objects.get(&id).map(|o| o.kind.as_str())
    }

    #[must_use]
    pub fn field(&self, id: ObjectId, field: FieldId) -> Option<&Value> {
        self.objects.get(&id).and_then(|o| o.fields.get(&field))
    }

    #[must_use]
    pub fn references(&self, id: ObjectId, field: FieldId) -> &[ObjectId] {
        self.objects
            .get(&id)
            .and_then(|o| o.refs.get(&field))
            .map_or(&[], Vec::as_slice)
    }

    /// Count of objects of one kind, snapshot-visible state only.
    #[must_use]
    pub fn count_kind(&self, wanted: &str) -> usize {
        self.objects.values().filter(|o| o.kind == wanted).count()
    }

    // -------------------------------------------------------------------
    // Fixture helpers: build pre-existing graph outside any transaction.
    // -------------------------------------------------------------------

    /// Create a project root object.
    pub fn add_project(&mut self, name: &str) -> ObjectId {
        let id = self.alloc(MemObject {
            kind: kind::PROJECT.to_string(),
            ..MemObject::default()
        });
        if let Some(o) = self.objects.get_mut(&id) {
            o.fields
                .insert(fields::NAME, Value::Str(name.to_string()));
        }
        id
    }

    /// Create an empty possibility list.
    pub fn add_possibility_list(&mut self, name: &str) -> ListId {
        let id = self.alloc(MemObject {
            kind: kind::POSSIBILITY_LIST.to_string(),
            ..MemObject::default()
        });
        if let Some(o) = self.objects.get_mut(&id) {
            o.fields
                .insert(fields::NAME, Value::Str(name.to_string()));
        }
        id
    }

    /// Add one list item under `parent` (`None` for the list root).
    pub fn add_possibility(
        &mut self,
        list: ListId,
        parent: Option<ObjectId>,
        name: &str,
    ) -> ObjectId {
        let (owner, slot) = match parent {
            None => (list, fields::POSSIBILITIES),
            Some(p) => (p, fields::SUB_POSSIBILITIES),
        };
        let pos = self.next_pos(Some(owner), slot);
        let id = self.alloc(MemObject {
            kind: kind::POSSIBILITY.to_string(),
            owner: Some(owner),
            slot,
            pos,
            ..MemObject::default()
        });
        if let Some(o) = self.objects.get_mut(&id) {
            o.fields
                .insert(fields::NAME, Value::Str(name.to_string()));
            o.fields
                .insert(fields::ABBREVIATION, Value::Str(name.to_string()));
        }
        id
    }

    /// Flip the closed flag on a list.
    pub fn set_list_closed(&mut self, list: ListId, closed: bool) {
        if let Some(o) = self.objects.get_mut(&list) {
            o.fields.insert(fields::IS_CLOSED, Value::Bool(closed));
        }
    }

    fn collect_items(&self, owner: ObjectId, slot: FieldId, level: u32, out: &mut Vec<PossibilityNode>) {
        for id in self.children(owner, slot) {
            let name = match self.field(id, fields::NAME) {
                Some(Value::Str(s)) => s.clone(),
                _ => String::new(),
            };
            let abbreviation = match self.field(id, fields::ABBREVIATION) {
                Some(Value::Str(s)) => s.clone(),
                _ => name.clone(),
            };
            out.push(PossibilityNode {
                id,
                level,
                name,
                abbreviation,
            });
            self.collect_items(id, fields::SUB_POSSIBILITIES, level + 1, out);
        }
    }
}

impl ObjectStore for MemoryStore {
    fn create_object(
        &mut self,
        kind: &str,
        owner: Option<ObjectId>,
        slot: FieldId,
        position: Position,
    ) -> Result<ObjectId> {
        self.check_injection()?;
        let pos = match position {
            Position::Append => self.next_pos(owner, slot),
            Position::At(p) => p,
        };
        Ok(self.alloc(MemObject {
            kind: kind.to_string(),
            owner,
            slot,
            pos,
            ..MemObject::default()
        }))
    }

    fn set_field(&mut self, id: ObjectId, field: FieldId, value: Value) -> Result<()> {
        self.check_injection()?;
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(ImportError::ObjectNotFound(id))?;
        object.fields.insert(field, value);
        Ok(())
    }

    fn append_references(
        &mut self,
        id: ObjectId,
        field: FieldId,
        targets: &[ObjectId],
    ) -> Result<()> {
        self.check_injection()?;
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(ImportError::ObjectNotFound(id))?;
        object.refs.entry(field).or_default().extend(targets);
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(ImportError::TransactionFailed(
                "transaction already open".to_string(),
            ));
        }
        self.snapshot = Some((self.objects.clone(), self.next_id));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| ImportError::TransactionFailed("no open transaction".to_string()))
    }

    fn rollback(&mut self) -> Result<()> {
        let (objects, next_id) = self
            .snapshot
            .take()
            .ok_or_else(|| ImportError::TransactionFailed("no open transaction".to_string()))?;
        self.objects = objects;
        self.next_id = next_id;
        Ok(())
    }

    fn load_possibility_list(&self, list: ListId) -> Result<PossibilityList> {
        let object = self
            .objects
            .get(&list)
            .filter(|o| o.kind == kind::POSSIBILITY_LIST)
            .ok_or(ImportError::ListNotFound(list))?;
        let name = match object.fields.get(&fields::NAME) {
            Some(Value::Str(s)) => s.clone(),
            _ => String::new(),
        };
        let closed = matches!(object.fields.get(&fields::IS_CLOSED), Some(Value::Bool(true)));
        let ignore_new = matches!(
            object.fields.get(&fields::IGNORE_NEW),
            Some(Value::Bool(true))
        );
        let mut nodes = Vec::new();
        self.collect_items(list, fields::POSSIBILITIES, 1, &mut nodes);
        Ok(PossibilityList {
            id: list,
            name,
            closed,
            ignore_new,
            nodes,
        })
    }
}
