//! Dynamic records: targets declared in configuration instead of code.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TargetConfig;
use crate::error::ValidationErrors;
use crate::mapping::{default_setter, MappingMetadata, TargetSchema};
use crate::repository::Entity;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A field map entity. Every field name is valid; unset fields read as
/// `Value::Empty`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value.into());
        self
    }

    pub fn get(&self, field: &str) -> &Value {
        static EMPTY: Value = Value::Empty;
        self.fields.get(field).unwrap_or(&EMPTY)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Entity for Record {
    fn field(&self, name: &str) -> Option<Value> {
        Some(self.get(name).clone())
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Conversion a record setter applies before storing a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldTransform {
    /// Store the cell as read.
    #[default]
    Raw,
    Text,
    Trim,
    Upper,
    Lower,
    Number,
    /// Integer left-padded with zeros to the given width.
    Pad(usize),
}

impl FieldTransform {
    pub fn apply(self, value: &Value) -> Result<Value, String> {
        if value.is_empty() {
            return Ok(Value::Empty);
        }
        let text = || value.to_string();
        Ok(match self {
            Self::Raw => value.clone(),
            Self::Text => Value::Text(text()),
            Self::Trim => Value::Text(text().trim().to_string()),
            Self::Upper => Value::Text(text().to_uppercase()),
            Self::Lower => Value::Text(text().to_lowercase()),
            Self::Number => Value::Number(
                value
                    .as_f64()
                    .ok_or_else(|| format!("'{value}' is not a number"))?,
            ),
            Self::Pad(width) => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| format!("'{value}' is not an integer"))?;
                Value::Text(format!("{n:0width$}"))
            }
        })
    }
}

impl TryFrom<String> for FieldTransform {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "" | "raw" => Ok(Self::Raw),
            "text" => Ok(Self::Text),
            "trim" => Ok(Self::Trim),
            "upper" => Ok(Self::Upper),
            "lower" => Ok(Self::Lower),
            "number" => Ok(Self::Number),
            _ => match s.strip_prefix("pad:") {
                Some(width) => width
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|w| (1..=64).contains(w))
                    .map(Self::Pad)
                    .ok_or_else(|| format!("invalid pad width in '{s}'")),
                None => Err(format!("unknown transform '{s}'")),
            },
        }
    }
}

impl From<FieldTransform> for String {
    fn from(t: FieldTransform) -> Self {
        t.to_string()
    }
}

impl fmt::Display for FieldTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Text => write!(f, "text"),
            Self::Trim => write!(f, "trim"),
            Self::Upper => write!(f, "upper"),
            Self::Lower => write!(f, "lower"),
            Self::Number => write!(f, "number"),
            Self::Pad(w) => write!(f, "pad:{w}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Build the schema of a configured target.
///
/// Each field gets default accessors storing the transformed cell under the
/// field's own name. `extra_setters` names plain fields (context arguments)
/// stored as-is.
pub fn record_schema<'a>(
    name: &str,
    target: &TargetConfig,
    extra_setters: impl IntoIterator<Item = &'a str>,
) -> TargetSchema<Record> {
    let mut schema = TargetSchema::new(name);

    for (field, config) in &target.fields {
        let mut metadata = if config.identifier {
            MappingMetadata::identifier()
        } else {
            MappingMetadata::default()
        };
        if let Some(label) = &config.label {
            metadata = metadata.with_label(label.clone());
        }
        if let Some(query) = &config.query_property {
            metadata = metadata.with_query_property(query.clone());
        }

        let transform = config.transform;
        let get_key = field.clone();
        let set_key = field.clone();
        schema = schema.property(
            field,
            metadata,
            move |r: &Record| r.get(&get_key).clone(),
            move |r: &mut Record, v: &Value| {
                r.set(set_key.clone(), transform.apply(v)?);
                Ok(())
            },
        );
    }

    for field in extra_setters {
        if target.fields.contains_key(field) {
            continue;
        }
        let key = field.to_string();
        schema = schema.setter(&default_setter(field), move |r: &mut Record, v: &Value| {
            r.set(key.clone(), v.clone());
            Ok(())
        });
    }

    let required: Vec<String> = target
        .fields
        .iter()
        .filter(|(_, c)| c.required)
        .map(|(f, _)| f.clone())
        .collect();
    if !required.is_empty() {
        schema = schema.validator(move |r: &Record, errors: &mut ValidationErrors| {
            for field in &required {
                if r.get(field).is_empty() {
                    errors.push(format!("{field} is required"));
                }
            }
        });
    }

    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;

    #[test]
    fn pad_transform() {
        let pad = FieldTransform::try_from("pad:5".to_string()).unwrap();
        assert_eq!(pad, FieldTransform::Pad(5));
        assert_eq!(pad.apply(&Value::from("1")).unwrap(), Value::from("00001"));
        assert_eq!(pad.apply(&Value::Number(42.0)).unwrap(), Value::from("00042"));
        assert_eq!(pad.apply(&Value::Empty).unwrap(), Value::Empty);
        assert!(pad.apply(&Value::from("x")).is_err());
        assert_eq!(pad.to_string(), "pad:5");
    }

    #[test]
    fn transform_parsing() {
        assert_eq!(FieldTransform::try_from("Upper".to_string()), Ok(FieldTransform::Upper));
        assert_eq!(FieldTransform::try_from(String::new()), Ok(FieldTransform::Raw));
        assert!(FieldTransform::try_from("pad:0".to_string()).is_err());
        assert!(FieldTransform::try_from("reverse".to_string()).is_err());
    }

    #[test]
    fn text_transforms() {
        assert_eq!(FieldTransform::Trim.apply(&Value::from("  a ")).unwrap(), Value::from("a"));
        assert_eq!(FieldTransform::Lower.apply(&Value::from("AB")).unwrap(), Value::from("ab"));
        assert_eq!(FieldTransform::Text.apply(&Value::Number(3.0)).unwrap(), Value::from("3"));
        assert_eq!(FieldTransform::Number.apply(&Value::from("2.5")).unwrap(), Value::Number(2.5));
    }

    #[test]
    fn schema_from_target_config() {
        let mut target = TargetConfig::default();
        target.fields.insert(
            "id".into(),
            FieldConfig {
                identifier: true,
                label: Some("Number".into()),
                query_property: Some("id".into()),
                transform: FieldTransform::Pad(5),
                required: true,
                ..FieldConfig::default()
            },
        );
        target.fields.insert("name".into(), FieldConfig::default());

        let schema = record_schema("person", &target, ["category"]);
        assert!(schema.has_setter("set_id"));
        assert!(schema.has_setter("set_category"));
        assert!(schema.has_getter("get_name"));
        let id = schema.table().get("id").unwrap();
        assert!(id.identifier);
        assert_eq!(id.label.as_deref(), Some("Number"));
        assert_eq!(id.query_field("id"), "id");

        let mut record = Record::new();
        schema.apply("set_id", &mut record, &Value::from("7")).unwrap();
        schema.apply("set_category", &mut record, &Value::from("c1")).unwrap();
        assert_eq!(record.get("id"), &Value::from("00007"));
        assert_eq!(record.get("category"), &Value::from("c1"));
        assert!(schema.validate(&record).is_ok());
        assert!(schema.validate(&Record::new()).is_err());
    }

    #[test]
    fn records_serialize_as_plain_maps() {
        let record = Record::new().with("name", "Hans");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"name":{"type":"text","value":"Hans"}}"#);
        assert_eq!(record.field("missing"), Some(Value::Empty));
    }
}
