//! Job files: the TOML a user writes to describe one import.
//!
//! ```toml
//! context = "persons"
//! file = "persons.csv"          # relative to the job file
//! schedule = "2026-01-31T22:00:00Z"
//!
//! [flags]
//! insert = true
//! update = true
//! delete = false
//!
//! [columns]                     # property -> column
//! firstname = "A"
//! id = "C"
//!
//! [arguments]
//! team = "blue"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sheetsync_io::ColumnId;
use sheetsync_recon::{Engine, ImportError, ImportFlags, ImportJob, MappedProperty};

#[derive(Debug)]
pub enum JobFileError {
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
    Import(ImportError),
}

impl fmt::Display for JobFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read {}: {message}", path.display()),
            Self::Parse(msg) => write!(f, "invalid job file: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid job: {msg}"),
            Self::Import(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for JobFileError {}

impl From<ImportError> for JobFileError {
    fn from(e: ImportError) -> Self {
        Self::Import(e)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub context: String,
    pub file: PathBuf,
    /// RFC 3339 timestamp; absent means "now".
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub flags: JobFlags,
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// Deletion has to be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobFlags {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl Default for JobFlags {
    fn default() -> Self {
        Self {
            insert: true,
            update: true,
            delete: false,
        }
    }
}

impl From<JobFlags> for ImportFlags {
    fn from(flags: JobFlags) -> Self {
        ImportFlags {
            insert: flags.insert,
            update: flags.update,
            delete: flags.delete,
        }
    }
}

impl JobFile {
    pub fn from_toml(input: &str) -> Result<Self, JobFileError> {
        toml::from_str(input).map_err(|e| JobFileError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, JobFileError> {
        let input = fs::read_to_string(path).map_err(|e| JobFileError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&input)
    }

    /// Load `path` and turn it into a draft job, resolving the spreadsheet
    /// path against the job file's directory.
    pub fn load_job(path: &Path, engine: &Engine) -> Result<ImportJob, JobFileError> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::load(path)?.into_job(engine, base_dir, Utc::now())
    }

    /// Build a draft job: mapping from `[columns]`, arguments through the
    /// context (references are checked against the engine's resolver).
    pub fn into_job(
        self,
        engine: &Engine,
        base_dir: &Path,
        now: DateTime<Utc>,
    ) -> Result<ImportJob, JobFileError> {
        let context = engine.contexts().get(&self.context)?;
        let table = engine.registry().mapping_metadata(&context.target)?;

        for (property, column) in &self.columns {
            if table.get(property).is_none() {
                return Err(JobFileError::Invalid(format!(
                    "target '{}' has no property '{property}' (known: {})",
                    context.target,
                    table.iter().map(|(p, _)| p).collect::<Vec<_>>().join(", ")
                )));
            }
            if !column.trim().is_empty() && column.trim().parse::<ColumnId>().is_err() {
                return Err(JobFileError::Invalid(format!(
                    "property '{property}' maps to invalid column '{column}'"
                )));
            }
        }

        for name in self.arguments.keys() {
            match context.argument(name) {
                None => {
                    return Err(JobFileError::Invalid(format!(
                        "context '{}' has no argument '{name}'",
                        self.context
                    )))
                }
                Some(spec) if spec.static_value.is_some() => {
                    log::warn!("argument '{name}' is static in context '{}'; ignoring job value", self.context);
                }
                Some(_) => {}
            }
        }

        let schedule_date = match &self.schedule {
            Some(text) => DateTime::parse_from_rfc3339(text)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| JobFileError::Invalid(format!("schedule '{text}': {e}")))?,
            None => now,
        };

        let file = if self.file.is_absolute() {
            self.file.clone()
        } else {
            base_dir.join(&self.file)
        };

        let columns: HashMap<String, String> = self.columns.into_iter().collect();
        let params: HashMap<String, String> = self.arguments.into_iter().collect();

        let mut job = ImportJob::new(self.context.as_str(), file);
        job.schedule_date = schedule_date;
        job.mapping = MappedProperty::from_columns(table, &columns);
        job.arguments = context.arguments_for_request(&params, engine.resolver())?;
        job.flags = self.flags.into();
        Ok(job)
    }
}
