// Record targets stored in SQLite

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{params_from_iter, Connection};

use sheetsync_recon::{
    EntityRef, Query, Record, ReferenceResolver, Repository, RepositoryError, Value,
};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    data TEXT NOT NULL   -- JSON object: field -> tagged value
);

CREATE INDEX IF NOT EXISTS records_target ON records (target);
"#;

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Field names safe to splice into a JSON path.
fn is_plain_field(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// `Repository<Record>` over the `records` table, scoped to one target.
///
/// Writes are kept in an overlay until `flush`, which applies them in a
/// single transaction. Reads merge the overlay over the table.
pub struct SqliteRecordRepository {
    conn: Connection,
    target: String,
    /// Pending state per id; `None` marks a delete.
    overlay: HashMap<String, Option<Record>>,
    /// Ids added since the last flush, in insertion order.
    added: Vec<String>,
}

impl SqliteRecordRepository {
    pub fn open(path: &Path, target: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self::with_connection(open_connection(path)?, target))
    }

    pub fn open_in_memory(target: impl Into<String>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(conn, target))
    }

    fn with_connection(conn: Connection, target: impl Into<String>) -> Self {
        Self {
            conn,
            target: target.into(),
            overlay: HashMap::new(),
            added: Vec::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of unflushed writes.
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    /// Stored rows of this target, narrowed in SQL where the query allows it.
    fn load(&self, query: &Query) -> Result<Vec<(String, Record)>, StoreError> {
        let mut sql = String::from("SELECT id, data FROM records WHERE target = ?");
        let mut args: Vec<rusqlite::types::Value> = vec![self.target.clone().into()];

        for c in query.constraints() {
            if !is_plain_field(&c.field) {
                continue;
            }
            match &c.value {
                Value::Text(s) => {
                    sql.push_str(&format!(
                        " AND json_extract(data, '$.\"{}\".type') = 'text' AND json_extract(data, '$.\"{}\".value') = ?",
                        c.field, c.field
                    ));
                    args.push(s.clone().into());
                }
                Value::Number(n) => {
                    sql.push_str(&format!(" AND json_extract(data, '$.\"{}\".value') = ?", c.field));
                    args.push((*n).into());
                }
                _ => {}
            }
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let record: Record = serde_json::from_str(&data)
                .map_err(|e| StoreError::Corrupt(format!("record {id}: {e}")))?;
            out.push((id, record));
        }
        Ok(out)
    }

    fn stored_exists(&self, id: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE id = ?1 AND target = ?2",
            [id, self.target.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match self.overlay.get(id) {
            Some(state) => Ok(state.is_some()),
            None => self.stored_exists(id),
        }
    }

    /// Current view: stored rows with the overlay applied, then new rows.
    fn visible(&self, query: &Query) -> Result<Vec<(String, Record)>, StoreError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for (id, record) in self.load(query)? {
            seen.insert(id.clone());
            match self.overlay.get(&id) {
                Some(Some(pending)) => {
                    if query.matches(pending) {
                        out.push((id, pending.clone()));
                    }
                }
                Some(None) => {}
                None => {
                    if query.matches(&record) {
                        out.push((id, record));
                    }
                }
            }
        }

        // Updated rows that no longer pass the SQL prefilter
        for (id, state) in &self.overlay {
            if seen.contains(id) || self.added.contains(id) {
                continue;
            }
            if let Some(record) = state {
                if query.matches(record) {
                    out.push((id.clone(), record.clone()));
                }
            }
        }

        for id in &self.added {
            if let Some(Some(record)) = self.overlay.get(id) {
                if query.matches(record) {
                    out.push((id.clone(), record.clone()));
                }
            }
        }
        Ok(out)
    }

    fn write_pending(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO records (id, target, data) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            )?;
            let mut delete = tx.prepare("DELETE FROM records WHERE id = ?1")?;
            for (id, state) in &self.overlay {
                match state {
                    Some(record) => {
                        let data = serde_json::to_string(record)?;
                        upsert.execute([id.as_str(), self.target.as_str(), data.as_str()])?;
                    }
                    None => {
                        delete.execute([id.as_str()])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl Repository<Record> for SqliteRecordRepository {
    type Id = String;

    fn find_first(&self, query: &Query) -> Result<Option<(String, Record)>, RepositoryError> {
        Ok(self.visible(query)?.into_iter().next())
    }

    fn find_all(&self, query: &Query) -> Result<Vec<(String, Record)>, RepositoryError> {
        Ok(self.visible(query)?)
    }

    fn add(&mut self, entity: Record) -> Result<String, RepositoryError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.overlay.insert(id.clone(), Some(entity));
        self.added.push(id.clone());
        Ok(id)
    }

    fn update(&mut self, id: &String, entity: Record) -> Result<(), RepositoryError> {
        if !self.exists(id)? {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        self.overlay.insert(id.clone(), Some(entity));
        Ok(())
    }

    fn remove(&mut self, id: &String) -> Result<(), RepositoryError> {
        if !self.exists(id)? {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        if let Some(pos) = self.added.iter().position(|a| a == id) {
            // Never stored; dropping it from the overlay is enough
            self.added.remove(pos);
            self.overlay.remove(id);
        } else {
            self.overlay.insert(id.clone(), None);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RepositoryError> {
        if self.overlay.is_empty() {
            return Ok(());
        }
        let writes = self.overlay.len();
        self.write_pending()?;
        self.overlay.clear();
        self.added.clear();
        log::debug!("flushed {writes} record writes for target '{}'", self.target);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reference lookup
// ---------------------------------------------------------------------------

/// Resolves reference arguments against stored records: the domain is the
/// record target, the raw id either a record id or the value of the
/// domain's key field.
pub struct RecordLookup {
    conn: Connection,
    keys: HashMap<String, String>,
}

impl RecordLookup {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: open_connection(path)?,
            keys: HashMap::new(),
        })
    }

    /// Also accept the text of `field` as an id for `domain`.
    pub fn with_key(mut self, domain: impl Into<String>, field: impl Into<String>) -> Self {
        self.keys.insert(domain.into(), field.into());
        self
    }

    fn find(&self, domain: &str, raw: &str) -> Result<Option<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM records WHERE target = ?1 AND id = ?2")?;
        let mut rows = stmt.query([domain, raw])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }

        let Some(field) = self.keys.get(domain).filter(|f| is_plain_field(f)) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT id FROM records WHERE target = ?1 AND json_extract(data, '$.\"{field}\".value') = ?2 \
             ORDER BY rowid LIMIT 1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([domain, raw])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

impl ReferenceResolver for RecordLookup {
    fn resolve(&self, reference: &EntityRef) -> Result<Value, String> {
        Ok(Value::Reference(reference.clone()))
    }

    fn lookup(&self, domain: &str, raw: &str) -> Result<EntityRef, String> {
        let raw = raw.trim();
        match self.find(domain, raw).map_err(|e| e.to_string())? {
            Some(id) => Ok(EntityRef::new(domain, id)),
            None => Err(format!("no {domain} record '{raw}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, name: &str) -> Record {
        Record::new().with("id", id).with("name", name)
    }

    #[test]
    fn buffered_writes_are_visible_before_flush() {
        let mut repo = SqliteRecordRepository::open_in_memory("person").unwrap();
        let id = repo.add(person("00001", "Hans")).unwrap();
        let q = Query::new().equals("id", "00001".into());

        assert_eq!(repo.find_first(&q).unwrap().unwrap().0, id);
        assert_eq!(repo.pending(), 1);
        assert_eq!(repo.load(&Query::new()).unwrap().len(), 0);

        repo.flush().unwrap();
        assert_eq!(repo.pending(), 0);
        assert_eq!(repo.load(&q).unwrap().len(), 1);
    }

    #[test]
    fn update_and_remove_through_flush() {
        let mut repo = SqliteRecordRepository::open_in_memory("person").unwrap();
        let hans = repo.add(person("00001", "Hans")).unwrap();
        let lisa = repo.add(person("00002", "Lisa")).unwrap();
        repo.flush().unwrap();

        repo.update(&hans, person("00001", "Hansi")).unwrap();
        repo.remove(&lisa).unwrap();
        let all = repo.find_all(&Query::new()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.get("name"), &Value::from("Hansi"));

        // Old name no longer matches although the stored row still has it
        let by_old_name = Query::new().equals("name", "Hans".into());
        assert!(repo.find_first(&by_old_name).unwrap().is_none());

        repo.flush().unwrap();
        let stored = repo.load(&Query::new()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1.get("name"), &Value::from("Hansi"));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut repo = SqliteRecordRepository::open_in_memory("person").unwrap();
        assert!(matches!(
            repo.update(&"nope".to_string(), Record::new()),
            Err(RepositoryError::NotFound(_))
        ));
        let id = repo.add(Record::new()).unwrap();
        repo.remove(&id).unwrap();
        assert_eq!(repo.pending(), 0);
        assert!(repo.remove(&id).is_err());
    }

    #[test]
    fn targets_do_not_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        let mut people = SqliteRecordRepository::open(&path, "person").unwrap();
        people.add(person("1", "Hans")).unwrap();
        people.flush().unwrap();

        let products = SqliteRecordRepository::open(&path, "product").unwrap();
        assert!(products.find_all(&Query::new()).unwrap().is_empty());
    }

    #[test]
    fn prefilter_keeps_types_apart() {
        let mut repo = SqliteRecordRepository::open_in_memory("item").unwrap();
        repo.add(Record::new().with("code", 1.0)).unwrap();
        repo.add(Record::new().with("code", "1")).unwrap();
        repo.flush().unwrap();

        let text = repo.find_all(&Query::new().equals("code", "1".into())).unwrap();
        assert_eq!(text.len(), 1);
        let number = repo.find_all(&Query::new().equals("code", Value::Number(1.0))).unwrap();
        assert_eq!(number.len(), 1);
    }

    #[test]
    fn lookup_by_id_or_key_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        let mut categories = SqliteRecordRepository::open(&path, "category").unwrap();
        let id = categories.add(Record::new().with("code", "tools")).unwrap();
        categories.flush().unwrap();

        let lookup = RecordLookup::open(&path).unwrap().with_key("category", "code");
        assert_eq!(lookup.lookup("category", &id).unwrap().id, id);
        assert_eq!(lookup.lookup("category", "tools").unwrap().id, id);
        assert!(lookup.lookup("category", "garden").is_err());
        assert!(lookup.lookup("person", &id).is_err());
    }
}
