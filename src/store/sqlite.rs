//! SQLite-backed [`ObjectStore`].
//!
//! The schema is a generic owned-object graph: `objects` with kind, owner,
//! owning slot and sibling position; `fields` holding JSON-encoded values;
//! `refs` holding ordered reference collections. Transactions map directly
//! onto SQL transactions, so a record rollback is exactly `ROLLBACK`.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::possibility::{PossibilityList, PossibilityNode};
use crate::store::{fields, kind, FieldId, ListId, ObjectId, ObjectStore, Position, Value};

const MIGRATIONS: [&str; 1] = [include_str!("../../migrations/001_initial_schema.sql")];

/// Current schema version after all migrations.
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// SQLite database wrapper implementing the store boundary.
pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (and migrate) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ImportError::StoreUnavailable(format!("{}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ImportError::StoreUnavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    /// Find or create the project root object with the given name.
    pub fn ensure_project(&mut self, name: &str) -> Result<ObjectId> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT o.id FROM objects o JOIN fields f ON f.object = o.id \
                 WHERE o.kind = ?1 AND f.field = ?2 AND f.value = ?3",
                params![kind::PROJECT, fields::NAME, encode(&Value::Str(name.to_string()))?],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id as ObjectId);
        }
        let id = self.create_object(kind::PROJECT, None, 0, Position::Append)?;
        self.set_field(id, fields::NAME, Value::Str(name.to_string()))?;
        debug!(project = id, name, "created project");
        Ok(id)
    }

    /// Find or create a possibility list by name.
    pub fn ensure_possibility_list(&mut self, name: &str) -> Result<ListId> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT o.id FROM objects o JOIN fields f ON f.object = o.id \
                 WHERE o.kind = ?1 AND f.field = ?2 AND f.value = ?3",
                params![
                    kind::POSSIBILITY_LIST,
                    fields::NAME,
                    encode(&Value::Str(name.to_string()))?
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id as ListId);
        }
        let id = self.create_object(kind::POSSIBILITY_LIST, None, 0, Position::Append)?;
        self.set_field(id, fields::NAME, Value::Str(name.to_string()))?;
        Ok(id)
    }

    /// Read one decoded field value.
    pub fn field(&self, id: ObjectId, field: FieldId) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM fields WHERE object = ?1 AND field = ?2",
                params![id as i64, field],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(ImportError::from))
            .transpose()
    }

    /// Ordered children of `owner` in `slot`.
    pub fn children(&self, owner: ObjectId, slot: FieldId) -> Result<Vec<ObjectId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM objects WHERE owner = ?1 AND slot = ?2 ORDER BY pos, id",
        )?;
        let rows = stmt.query_map(params![owner as i64, slot], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row? as ObjectId);
        }
        Ok(out)
    }

    /// Ordered reference targets of one object field.
    pub fn references(&self, id: ObjectId, field: FieldId) -> Result<Vec<ObjectId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT target FROM refs WHERE object = ?1 AND field = ?2 ORDER BY ord")?;
        let rows = stmt.query_map(params![id as i64, field], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row? as ObjectId);
        }
        Ok(out)
    }

    /// Count objects of one kind.
    pub fn count_kind(&self, wanted: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE kind = ?1",
            params![wanted],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn load_items(
        &self,
        owner: ObjectId,
        slot: FieldId,
        level: u32,
        out: &mut Vec<PossibilityNode>,
    ) -> Result<()> {
        for id in self.children(owner, slot)? {
            let name = match self.field(id, fields::NAME)? {
                Some(Value::Str(s)) => s,
                _ => String::new(),
            };
            let abbreviation = match self.field(id, fields::ABBREVIATION)? {
                Some(Value::Str(s)) => s,
                _ => name.clone(),
            };
            out.push(PossibilityNode {
                id,
                level,
                name,
                abbreviation,
            });
            self.load_items(id, fields::SUB_POSSIBILITIES, level + 1, out)?;
        }
        Ok(())
    }
}

fn encode(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(ImportError::from)
}

fn run_migrations(conn: &Connection) -> Result<u32> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let target = (idx + 1) as u32;
        if current >= target {
            continue;
        }
        conn.execute_batch(sql).map_err(|e| {
            ImportError::TransactionFailed(format!("migration {target} failed: {e}"))
        })?;
        conn.pragma_update(None, "user_version", target)?;
    }
    Ok(SCHEMA_VERSION)
}

impl ObjectStore for SqliteStore {
    fn create_object(
        &mut self,
        kind: &str,
        owner: Option<ObjectId>,
        slot: FieldId,
        position: Position,
    ) -> Result<ObjectId> {
        let owner_sql = owner.map(|o| o as i64);
        let pos: i64 = match position {
            Position::At(p) => p as i64,
            Position::Append => self.conn.query_row(
                "SELECT COALESCE(MAX(pos) + 1, 0) FROM objects WHERE owner IS ?1 AND slot = ?2",
                params![owner_sql, slot],
                |row| row.get(0),
            )?,
        };
        self.conn.execute(
            "INSERT INTO objects (kind, owner, slot, pos) VALUES (?1, ?2, ?3, ?4)",
            params![kind, owner_sql, slot, pos],
        )?;
        Ok(self.conn.last_insert_rowid() as ObjectId)
    }

    fn set_field(&mut self, id: ObjectId, field: FieldId, value: Value) -> Result<()> {
        let changed = self.conn.execute(
            "INSERT INTO fields (object, field, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT (object, field) DO UPDATE SET value = excluded.value",
            params![id as i64, field, encode(&value)?],
        )?;
        if changed == 0 {
            return Err(ImportError::FieldRejected {
                object: id,
                field,
                reason: "no row written".to_string(),
            });
        }
        Ok(())
    }

    fn append_references(
        &mut self,
        id: ObjectId,
        field: FieldId,
        targets: &[ObjectId],
    ) -> Result<()> {
        let mut ord: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(ord) + 1, 0) FROM refs WHERE object = ?1 AND field = ?2",
            params![id as i64, field],
            |row| row.get(0),
        )?;
        let mut stmt = self
            .conn
            .prepare("INSERT INTO refs (object, field, ord, target) VALUES (?1, ?2, ?3, ?4)")?;
        for target in targets {
            stmt.execute(params![id as i64, field, ord, *target as i64])?;
            ord += 1;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(ImportError::TransactionFailed(
                "transaction already open".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(ImportError::TransactionFailed(
                "no open transaction".to_string(),
            ));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(ImportError::TransactionFailed(
                "no open transaction".to_string(),
            ));
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    fn load_possibility_list(&self, list: ListId) -> Result<PossibilityList> {
        let kind_row: Option<String> = self
            .conn
            .query_row(
                "SELECT kind FROM objects WHERE id = ?1",
                params![list as i64],
                |row| row.get(0),
            )
            .optional()?;
        if kind_row.as_deref() != Some(kind::POSSIBILITY_LIST) {
            return Err(ImportError::ListNotFound(list));
        }
        let name = match self.field(list, fields::NAME)? {
            Some(Value::Str(s)) => s,
            _ => String::new(),
        };
        let closed = matches!(self.field(list, fields::IS_CLOSED)?, Some(Value::Bool(true)));
        let ignore_new = matches!(
            self.field(list, fields::IGNORE_NEW)?,
            Some(Value::Bool(true))
        );
        let mut nodes = Vec::new();
        self.load_items(list, fields::POSSIBILITIES, 1, &mut nodes)?;
        Ok(PossibilityList {
            id: list,
            name,
            closed,
            ignore_new,
            nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version: u32 = store
            .conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.db");
        let id = {
            let mut store = SqliteStore::open(&path).unwrap();
            store.ensure_project("anthro")
        }
        .unwrap();
        let mut store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.ensure_project("anthro").unwrap(), id);
    }

    #[test]
    fn test_value_roundtrip_through_fields() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let project = store.ensure_project("p").unwrap();
        store
            .set_field(
                project,
                fields::TITLE,
                Value::MultiStr {
                    ws: "fr".to_string(),
                    text: "titre".to_string(),
                },
            )
            .unwrap();
        assert_eq!(
            store.field(project, fields::TITLE).unwrap(),
            Some(Value::MultiStr {
                ws: "fr".to_string(),
                text: "titre".to_string(),
            })
        );
    }

    #[test]
    fn test_rollback_discards_objects() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let project = store.ensure_project("p").unwrap();
        store.begin_transaction().unwrap();
        store
            .create_object(kind::EVENT, Some(project), fields::RECORDS, Position::Append)
            .unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count_kind(kind::EVENT).unwrap(), 0);

        store.begin_transaction().unwrap();
        store
            .create_object(kind::EVENT, Some(project), fields::RECORDS, Position::Append)
            .unwrap();
        store.commit().unwrap();
        assert_eq!(store.count_kind(kind::EVENT).unwrap(), 1);
    }

    #[test]
    fn test_references_keep_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let project = store.ensure_project("p").unwrap();
        let list = store.ensure_possibility_list("cats").unwrap();
        let a = store
            .create_object(kind::POSSIBILITY, Some(list), fields::POSSIBILITIES, Position::Append)
            .unwrap();
        let b = store
            .create_object(kind::POSSIBILITY, Some(list), fields::POSSIBILITIES, Position::Append)
            .unwrap();
        store.append_references(project, 555, &[b, a]).unwrap();
        store.append_references(project, 555, &[b]).unwrap();

        let mut stmt = store
            .conn
            .prepare("SELECT target FROM refs WHERE object = ?1 AND field = 555 ORDER BY ord")
            .unwrap();
        let targets: Vec<i64> = stmt
            .query_map(params![project as i64], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(targets, vec![b as i64, a as i64, b as i64]);
    }

    #[test]
    fn test_possibility_list_preorder() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let list = store.ensure_possibility_list("cats").unwrap();
        let a = store
            .create_object(kind::POSSIBILITY, Some(list), fields::POSSIBILITIES, Position::Append)
            .unwrap();
        store
            .set_field(a, fields::NAME, Value::Str("A".to_string()))
            .unwrap();
        let a1 = store
            .create_object(kind::POSSIBILITY, Some(a), fields::SUB_POSSIBILITIES, Position::Append)
            .unwrap();
        store
            .set_field(a1, fields::NAME, Value::Str("A1".to_string()))
            .unwrap();
        let b = store
            .create_object(kind::POSSIBILITY, Some(list), fields::POSSIBILITIES, Position::Append)
            .unwrap();
        store
            .set_field(b, fields::NAME, Value::Str("B".to_string()))
            .unwrap();

        let loaded = store.load_possibility_list(list).unwrap();
        let names: Vec<&str> = loaded.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["A", "A1", "B"]);
        assert_eq!(
            loaded.nodes.iter().map(|n| n.level).collect::<Vec<_>>(),
            vec![1, 2, 1]
        );
    }
}
