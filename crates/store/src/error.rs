use std::fmt;

use sheetsync_recon::RepositoryError;

#[derive(Debug)]
pub enum StoreError {
    /// SQLite reported an error.
    Sqlite(rusqlite::Error),
    /// A stored JSON column could not be encoded or decoded.
    Serialization(String),
    /// A stored row holds a value this build cannot interpret.
    Corrupt(String),
    /// Job record written by a newer version.
    UnsupportedVersion { id: i64, version: u32 },
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "database error: {e}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
            Self::Corrupt(msg) => write!(f, "corrupt store: {msg}"),
            Self::UnsupportedVersion { id, version } => {
                write!(f, "job {id} has unsupported record version {version}")
            }
            Self::NotFound(what) => write!(f, "{what} not found"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RepositoryError::NotFound(id),
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}
