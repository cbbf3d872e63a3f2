use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mapping::{MappingMetadata, MappingTable};

/// Schema version written with every persisted job.
pub const JOB_RECORD_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Mapping entries
// ---------------------------------------------------------------------------

/// One entry of a job's field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedProperty {
    pub property: String,
    /// Column letters, empty when the property is not assigned.
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub mapping: MappingMetadata,
}

impl MappedProperty {
    pub fn is_assigned(&self) -> bool {
        !self.column.trim().is_empty()
    }

    /// Build a job mapping from the registered table and a property -> column
    /// assignment. Every registered property appears once, in table order;
    /// properties missing from `assignments` stay unassigned.
    pub fn from_columns(table: &MappingTable, assignments: &HashMap<String, String>) -> Vec<Self> {
        table
            .iter()
            .map(|(property, mapping)| Self {
                property: property.to_string(),
                column: assignments
                    .get(property)
                    .map(|c| c.trim().to_ascii_uppercase())
                    .unwrap_or_default(),
                mapping: mapping.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Contextual argument stored with a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgumentValue {
    /// Configured in the context, never supplied by a caller.
    Static { value: String },
    /// Plain value supplied with the request.
    Request { value: String },
    /// Id of another persisted entity, converted at run time.
    Reference { domain: String, id: String },
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { value } | Self::Request { value } => f.write_str(value),
            Self::Reference { domain, id } => write!(f, "{domain}#{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Flags, status, counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFlags {
    #[serde(default)]
    pub insert: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub delete: bool,
}

impl ImportFlags {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    #[default]
    Draft,
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl ImportStatus {
    /// Integer stored in the job table.
    pub fn code(self) -> i64 {
        match self {
            Self::Draft => 0,
            Self::Queued => 1,
            Self::InProgress => 2,
            Self::Completed => 3,
            Self::Failed => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Draft),
            1 => Some(Self::Queued),
            2 => Some(Self::InProgress),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Queued => write!(f, "queued"),
            Self::InProgress => write!(f, "in progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl fmt::Display for ImportCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted, {} skipped",
            self.inserted, self.updated, self.deleted, self.skipped
        )
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A persisted request to synchronize one file into one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    #[serde(default)]
    pub id: Option<i64>,
    pub version: u32,
    pub context: String,
    pub file: PathBuf,
    pub schedule_date: DateTime<Utc>,
    #[serde(default)]
    pub mapping: Vec<MappedProperty>,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentValue>,
    #[serde(default)]
    pub flags: ImportFlags,
    #[serde(default)]
    pub status: ImportStatus,
    #[serde(default)]
    pub counters: ImportCounters,
}

impl ImportJob {
    /// Draft job scheduled for now with no mapping, arguments or flags.
    pub fn new(context: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            version: JOB_RECORD_VERSION,
            context: context.into(),
            file: file.into(),
            schedule_date: Utc::now(),
            mapping: Vec::new(),
            arguments: BTreeMap::new(),
            flags: ImportFlags::default(),
            status: ImportStatus::Draft,
            counters: ImportCounters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        for status in [
            ImportStatus::Draft,
            ImportStatus::Queued,
            ImportStatus::InProgress,
            ImportStatus::Completed,
            ImportStatus::Failed,
        ] {
            assert_eq!(ImportStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ImportStatus::Queued.code(), 1);
        assert_eq!(ImportStatus::Failed.code(), 4);
        assert_eq!(ImportStatus::from_code(9), None);
    }

    #[test]
    fn from_columns_keeps_table_order_and_leaves_gaps() {
        let mut table = MappingTable::default();
        table.insert("id", MappingMetadata::identifier());
        table.insert("firstname", MappingMetadata::default());
        table.insert("lastname", MappingMetadata::default());

        let assignments = HashMap::from([
            ("lastname".to_string(), "b".to_string()),
            ("id".to_string(), "C".to_string()),
        ]);
        let mapping = MappedProperty::from_columns(&table, &assignments);

        let props: Vec<_> = mapping.iter().map(|m| m.property.as_str()).collect();
        assert_eq!(props, vec!["id", "firstname", "lastname"]);
        assert_eq!(mapping[0].column, "C");
        assert!(mapping[0].mapping.identifier);
        assert!(!mapping[1].is_assigned());
        assert_eq!(mapping[2].column, "B");
    }

    #[test]
    fn arguments_serialize_with_kind_tag() {
        let arg = ArgumentValue::Reference {
            domain: "category".into(),
            id: "7".into(),
        };
        let json = serde_json::to_string(&arg).unwrap();
        assert_eq!(json, r#"{"kind":"reference","domain":"category","id":"7"}"#);
        assert_eq!(arg.to_string(), "category#7");
    }

    #[test]
    fn counters_display() {
        let c = ImportCounters {
            inserted: 2,
            updated: 1,
            deleted: 0,
            skipped: 3,
        };
        assert_eq!(c.to_string(), "2 inserted, 1 updated, 0 deleted, 3 skipped");
    }
}
