use std::collections::BTreeMap;

use crate::repository::{Entity, Query, Repository, RepositoryError};

/// In-memory repository.
///
/// Writes are visible to reads immediately and become `committed` at the
/// next flush. Used for previews, dry runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryRepository<E> {
    next_id: u64,
    records: BTreeMap<u64, E>,
    committed: BTreeMap<u64, E>,
    flushes: usize,
    fail_on_flush: Option<usize>,
}

impl<E> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
            committed: BTreeMap::new(),
            flushes: 0,
            fail_on_flush: None,
        }
    }
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-filled with committed records.
    pub fn with_records(records: impl IntoIterator<Item = E>) -> Self {
        let mut repo = Self::default();
        for entity in records {
            let id = repo.next_id;
            repo.next_id += 1;
            repo.records.insert(id, entity);
        }
        repo.committed = repo.records.clone();
        repo
    }

    /// Make the `n`th flush (1-based) fail with a backend error.
    pub fn fail_on_flush(mut self, n: usize) -> Self {
        self.fail_on_flush = Some(n);
        self
    }

    /// Current state including unflushed writes.
    pub fn records(&self) -> &BTreeMap<u64, E> {
        &self.records
    }

    /// State as of the last successful flush.
    pub fn committed(&self) -> &BTreeMap<u64, E> {
        &self.committed
    }

    /// Number of flush calls, failed ones included.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<E: Entity> Repository<E> for MemoryRepository<E> {
    type Id = u64;

    fn find_first(&self, query: &Query) -> Result<Option<(u64, E)>, RepositoryError> {
        Ok(self
            .records
            .iter()
            .find(|(_, e)| query.matches(*e))
            .map(|(id, e)| (*id, e.clone())))
    }

    fn find_all(&self, query: &Query) -> Result<Vec<(u64, E)>, RepositoryError> {
        Ok(self
            .records
            .iter()
            .filter(|(_, e)| query.matches(*e))
            .map(|(id, e)| (*id, e.clone()))
            .collect())
    }

    fn add(&mut self, entity: E) -> Result<u64, RepositoryError> {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, entity);
        Ok(id)
    }

    fn update(&mut self, id: &u64, entity: E) -> Result<(), RepositoryError> {
        match self.records.get_mut(id) {
            Some(slot) => {
                *slot = entity;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(id.to_string())),
        }
    }

    fn remove(&mut self, id: &u64) -> Result<(), RepositoryError> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    fn flush(&mut self) -> Result<(), RepositoryError> {
        self.flushes += 1;
        if self.fail_on_flush == Some(self.flushes) {
            return Err(RepositoryError::Backend(format!(
                "flush {} rejected",
                self.flushes
            )));
        }
        self.committed = self.records.clone();
        Ok(())
    }
}
