use std::fmt;

use sheetsync_io::SourceError;

use crate::job::ImportCounters;
use crate::repository::RepositoryError;

/// Validation messages collected for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

#[derive(Debug)]
pub enum ImportError {
    /// Unknown context or target, bad mapping, missing setter, bad config file.
    Configuration(String),
    /// Entity failed validation. Recovered per row by the orchestrator.
    Validation(ValidationErrors),
    /// Repository write, read or flush failed.
    Persistence(RepositoryError),
    /// Spreadsheet could not be read.
    SourceRead(SourceError),
    /// A reference argument could not be converted.
    Reference { domain: String, id: String, message: String },
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::Validation(errors) => write!(f, "validation failed: {errors}"),
            Self::Persistence(e) => write!(f, "persistence error: {e}"),
            Self::SourceRead(e) => write!(f, "source read error: {e}"),
            Self::Reference { domain, id, message } => {
                write!(f, "cannot resolve {domain} '{id}': {message}")
            }
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Persistence(e) => Some(e),
            Self::SourceRead(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SourceError> for ImportError {
    fn from(e: SourceError) -> Self {
        Self::SourceRead(e)
    }
}

impl From<RepositoryError> for ImportError {
    fn from(e: RepositoryError) -> Self {
        Self::Persistence(e)
    }
}

/// An aborted run. `committed` holds the counters as of the last
/// successful flush, i.e. work that is durably in the store.
#[derive(Debug)]
pub struct ImportFailure {
    pub error: ImportError,
    pub committed: ImportCounters,
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (committed before failure: {})", self.error, self.committed)
    }
}

impl std::error::Error for ImportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
