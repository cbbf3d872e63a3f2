use std::fmt;
use std::hash::Hash;

use crate::error::ValidationErrors;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A synchronizable domain entity.
///
/// `field` exposes the stored form of a field for equality queries; a field
/// the entity doesn't know reads as `None` and never matches.
pub trait Entity: Clone + Default {
    fn field(&self, name: &str) -> Option<Value>;

    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub field: String,
    pub value: Value,
}

/// Conjunction of equality constraints. An empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    constraints: Vec<Constraint>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: Value) -> Self {
        self.push(field, value);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: Value) {
        self.constraints.push(Constraint {
            field: field.into(),
            value,
        });
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.constraints
            .iter()
            .all(|c| entity.field(&c.field).as_ref() == Some(&c.value))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|c| format!("{} = '{}'", c.field, c.value))
            .collect();
        f.write_str(&parts.join(" AND "))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Storage backend failure (connection, SQL, serialization).
    Backend(String),
    /// Id passed to update/remove is unknown.
    NotFound(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "{msg}"),
            Self::NotFound(id) => write!(f, "record '{id}' not found"),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Persistence for one entity type.
///
/// Writes may be buffered until `flush`; reads must observe buffered writes
/// so a row can find the record an earlier row of the same file created.
pub trait Repository<E: Entity> {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display;

    fn find_first(&self, query: &Query) -> Result<Option<(Self::Id, E)>, RepositoryError>;

    fn find_all(&self, query: &Query) -> Result<Vec<(Self::Id, E)>, RepositoryError>;

    /// Add a new entity; its id is known immediately.
    fn add(&mut self, entity: E) -> Result<Self::Id, RepositoryError>;

    fn update(&mut self, id: &Self::Id, entity: E) -> Result<(), RepositoryError>;

    fn remove(&mut self, id: &Self::Id) -> Result<(), RepositoryError>;

    /// Make buffered writes durable.
    fn flush(&mut self) -> Result<(), RepositoryError>;
}
