// Import job queue stored in SQLite

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use sheetsync_recon::job::JOB_RECORD_VERSION;
use sheetsync_recon::{ArgumentValue, ImportCounters, ImportFlags, ImportJob, ImportStatus};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS import_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL,
    context TEXT NOT NULL,
    file TEXT NOT NULL,
    schedule_date TEXT NOT NULL,   -- RFC 3339, UTC, microseconds
    mapping TEXT NOT NULL,         -- JSON array of mapped properties
    arguments TEXT NOT NULL,       -- JSON object, keys sorted
    flag_insert INTEGER NOT NULL DEFAULT 0,
    flag_update INTEGER NOT NULL DEFAULT 0,
    flag_delete INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL,       -- 0=draft, 1=queued, 2=in progress, 3=completed, 4=failed
    inserted INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS import_jobs_queue ON import_jobs (status, schedule_date);
"#;

const COLUMNS: &str = "id, version, context, file, schedule_date, mapping, arguments, \
    flag_insert, flag_update, flag_delete, status, inserted, updated, deleted, skipped";

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Persist a new job and assign its id.
    pub fn insert(&self, job: &mut ImportJob) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO import_jobs (version, context, file, schedule_date, mapping, arguments, \
             flag_insert, flag_update, flag_delete, status, inserted, updated, deleted, skipped) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                JOB_RECORD_VERSION,
                job.context,
                job.file.to_string_lossy().into_owned(),
                format_date(&job.schedule_date),
                serde_json::to_string(&job.mapping)?,
                serde_json::to_string(&job.arguments)?,
                job.flags.insert,
                job.flags.update,
                job.flags.delete,
                job.status.code(),
                job.counters.inserted as i64,
                job.counters.updated as i64,
                job.counters.deleted as i64,
                job.counters.skipped as i64,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        job.id = Some(id);
        job.version = JOB_RECORD_VERSION;
        log::debug!("stored import job {id} for context '{}'", job.context);
        Ok(id)
    }

    /// Write back status, counters and schedule of a stored job.
    pub fn update(&self, job: &ImportJob) -> Result<(), StoreError> {
        let id = job
            .id
            .ok_or_else(|| StoreError::NotFound("unsaved import job".into()))?;
        let changed = self.conn.execute(
            "UPDATE import_jobs SET schedule_date = ?2, mapping = ?3, arguments = ?4, \
             flag_insert = ?5, flag_update = ?6, flag_delete = ?7, status = ?8, \
             inserted = ?9, updated = ?10, deleted = ?11, skipped = ?12 WHERE id = ?1",
            params![
                id,
                format_date(&job.schedule_date),
                serde_json::to_string(&job.mapping)?,
                serde_json::to_string(&job.arguments)?,
                job.flags.insert,
                job.flags.update,
                job.flags.delete,
                job.status.code(),
                job.counters.inserted as i64,
                job.counters.updated as i64,
                job.counters.deleted as i64,
                job.counters.skipped as i64,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("import job {id}")));
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<ImportJob>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM import_jobs WHERE id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![id], RawJob::from_row)
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Oldest queued job whose schedule date has passed.
    pub fn find_next_in_queue(&self, now: DateTime<Utc>) -> Result<Option<ImportJob>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM import_jobs WHERE status = ?1 AND schedule_date <= ?2 \
             ORDER BY schedule_date ASC, id ASC LIMIT 1"
        );
        let raw = self
            .conn
            .query_row(
                &sql,
                params![ImportStatus::Queued.code(), format_date(&now)],
                RawJob::from_row,
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    pub fn count_by_status(&self, status: ImportStatus) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM import_jobs WHERE status = ?1",
            params![status.code()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Jobs of `context` carrying exactly `arguments`, newest first.
    pub fn find_by_context_and_arguments(
        &self,
        context: &str,
        arguments: &BTreeMap<String, ArgumentValue>,
    ) -> Result<Vec<ImportJob>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM import_jobs WHERE context = ?1 AND arguments = ?2 \
             ORDER BY schedule_date DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![context, serde_json::to_string(arguments)?],
            RawJob::from_row,
        )?;
        let mut jobs = Vec::new();
        for raw in rows {
            jobs.push(raw?.into_job()?);
        }
        Ok(jobs)
    }

    /// Delete jobs scheduled before `date`, whatever their status.
    pub fn remove_scheduled_before(&self, date: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM import_jobs WHERE schedule_date < ?1",
            params![format_date(&date)],
        )?;
        log::info!("removed {removed} import jobs scheduled before {date}");
        Ok(removed)
    }
}

/// Row as stored, decoded into a job after the query finishes so decode
/// errors keep their own error type.
struct RawJob {
    id: i64,
    version: u32,
    context: String,
    file: String,
    schedule_date: String,
    mapping: String,
    arguments: String,
    flags: ImportFlags,
    status: i64,
    counters: [i64; 4],
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            version: row.get(1)?,
            context: row.get(2)?,
            file: row.get(3)?,
            schedule_date: row.get(4)?,
            mapping: row.get(5)?,
            arguments: row.get(6)?,
            flags: ImportFlags {
                insert: row.get(7)?,
                update: row.get(8)?,
                delete: row.get(9)?,
            },
            status: row.get(10)?,
            counters: [row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?],
        })
    }

    fn into_job(self) -> Result<ImportJob, StoreError> {
        if self.version > JOB_RECORD_VERSION {
            return Err(StoreError::UnsupportedVersion {
                id: self.id,
                version: self.version,
            });
        }
        let status = ImportStatus::from_code(self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("job {}: unknown status {}", self.id, self.status))
        })?;
        let schedule_date = DateTime::parse_from_rfc3339(&self.schedule_date)
            .map_err(|e| StoreError::Corrupt(format!("job {}: bad schedule date: {e}", self.id)))?
            .with_timezone(&Utc);
        let [inserted, updated, deleted, skipped] = self.counters.map(|n| n.max(0) as usize);

        Ok(ImportJob {
            id: Some(self.id),
            version: self.version,
            context: self.context,
            file: PathBuf::from(self.file),
            schedule_date,
            mapping: serde_json::from_str(&self.mapping)?,
            arguments: serde_json::from_str(&self.arguments)?,
            flags: self.flags,
            status,
            counters: ImportCounters {
                inserted,
                updated,
                deleted,
                skipped,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use sheetsync_recon::{MappedProperty, MappingMetadata};

    fn queued(context: &str, offset_minutes: i64) -> ImportJob {
        let mut job = ImportJob::new(context, "/tmp/persons.csv");
        job.schedule_date = (Utc::now() + Duration::minutes(offset_minutes)).trunc_subsecs(6);
        job.status = ImportStatus::Queued;
        job.flags = ImportFlags::all();
        job.mapping = vec![MappedProperty {
            property: "id".into(),
            column: "C".into(),
            mapping: MappingMetadata::identifier().with_query_property("id"),
        }];
        job
    }

    #[test]
    fn insert_and_reload() {
        let store = JobStore::open_in_memory().unwrap();
        let mut job = queued("persons", 0);
        job.arguments.insert(
            "category".into(),
            ArgumentValue::Reference {
                domain: "category".into(),
                id: "c1".into(),
            },
        );
        let id = store.insert(&mut job).unwrap();
        assert_eq!(job.id, Some(id));

        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(store.get(id + 1).unwrap().is_none());
    }

    #[test]
    fn queue_returns_oldest_due_job() {
        let store = JobStore::open_in_memory().unwrap();
        let mut later = queued("a", -5);
        let mut earlier = queued("b", -10);
        let mut future = queued("c", 60);
        let mut draft = queued("d", -20);
        draft.status = ImportStatus::Draft;
        for job in [&mut later, &mut earlier, &mut future, &mut draft] {
            store.insert(job).unwrap();
        }

        let next = store.find_next_in_queue(Utc::now()).unwrap().unwrap();
        assert_eq!(next.context, "b");
        assert_eq!(store.count_by_status(ImportStatus::Queued).unwrap(), 3);
    }

    #[test]
    fn update_changes_status_and_counters() {
        let store = JobStore::open_in_memory().unwrap();
        let mut job = queued("persons", -1);
        store.insert(&mut job).unwrap();

        job.status = ImportStatus::Completed;
        job.counters = ImportCounters {
            inserted: 2,
            updated: 0,
            deleted: 1,
            skipped: 3,
        };
        store.update(&job).unwrap();

        let loaded = store.get(job.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded.status, ImportStatus::Completed);
        assert_eq!(loaded.counters.skipped, 3);
        assert!(store.find_next_in_queue(Utc::now()).unwrap().is_none());

        let unsaved = queued("x", 0);
        assert!(matches!(store.update(&unsaved), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn find_by_arguments_matches_exactly() {
        let store = JobStore::open_in_memory().unwrap();
        let mut a = queued("products", 0);
        a.arguments.insert("category".into(), ArgumentValue::Request { value: "c1".into() });
        let mut b = queued("products", 0);
        b.arguments.insert("category".into(), ArgumentValue::Request { value: "c2".into() });
        store.insert(&mut a).unwrap();
        store.insert(&mut b).unwrap();

        let found = store
            .find_by_context_and_arguments("products", &a.arguments)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
        assert!(store
            .find_by_context_and_arguments("persons", &a.arguments)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cleanup_removes_old_jobs() {
        let store = JobStore::open_in_memory().unwrap();
        store.insert(&mut queued("old", -60 * 24 * 40)).unwrap();
        store.insert(&mut queued("new", -60)).unwrap();

        let removed = store
            .remove_scheduled_before(Utc::now() - Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_by_status(ImportStatus::Queued).unwrap(), 1);
    }

    #[test]
    fn newer_record_version_is_rejected() {
        let store = JobStore::open_in_memory().unwrap();
        let id = store.insert(&mut queued("persons", 0)).unwrap();
        store
            .conn
            .execute("UPDATE import_jobs SET version = 99 WHERE id = ?1", params![id])
            .unwrap();
        assert!(matches!(
            store.get(id),
            Err(StoreError::UnsupportedVersion { version: 99, .. })
        ));
    }
}
