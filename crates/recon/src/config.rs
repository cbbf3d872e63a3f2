use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::context::{ArgumentSpec, ContextDefinition, ContextRegistry};
use crate::error::ImportError;
use crate::mapping::FieldMappingRegistry;
use crate::record::{record_schema, FieldTransform};

/// Records written between two flushes unless configured otherwise.
pub const DEFAULT_RECORDS_PER_FLUSH: usize = 20;

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EngineSettings {
    /// Writes (insert, update, delete) between repository flushes. Must be >= 1.
    #[serde(default = "default_records_per_flush")]
    pub records_per_flush: usize,
}

fn default_records_per_flush() -> usize {
    DEFAULT_RECORDS_PER_FLUSH
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            records_per_flush: DEFAULT_RECORDS_PER_FLUSH,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.records_per_flush == 0 {
            return Err(ImportError::Configuration(
                "records_per_flush must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contexts file
// ---------------------------------------------------------------------------

/// Parsed `contexts.toml`: contexts plus the record targets they write.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldConfig {
    #[serde(default)]
    pub identifier: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub query_property: Option<String>,
    #[serde(default)]
    pub transform: FieldTransform,
    /// Row is skipped when the field ends up empty.
    #[serde(default)]
    pub required: bool,
}

impl SyncConfig {
    pub fn from_toml(input: &str) -> Result<Self, ImportError> {
        let config: SyncConfig = toml::from_str(input)
            .map_err(|e| ImportError::Configuration(format!("invalid contexts file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ImportError> {
        let input = std::fs::read_to_string(path).map_err(|e| {
            ImportError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), ImportError> {
        for (name, context) in &self.contexts {
            if !self.targets.contains_key(&context.target) {
                return Err(ImportError::Configuration(format!(
                    "context '{name}': unknown target '{}'",
                    context.target
                )));
            }

            let mut seen = HashSet::new();
            for arg in &context.arguments {
                if arg.name.trim().is_empty() {
                    return Err(ImportError::Configuration(format!(
                        "context '{name}': argument without a name"
                    )));
                }
                if !seen.insert(arg.name.as_str()) {
                    return Err(ImportError::Configuration(format!(
                        "context '{name}': argument '{}' declared twice",
                        arg.name
                    )));
                }
                if arg.static_value.is_some() && arg.domain.is_some() {
                    return Err(ImportError::Configuration(format!(
                        "context '{name}': argument '{}' cannot be both static and a reference",
                        arg.name
                    )));
                }
            }
        }

        // A record field's setter only writes that field, so it is the only
        // one an identity query can compare against.
        for (name, target) in &self.targets {
            for (field, config) in &target.fields {
                let Some(query) = config.query_property.as_deref() else {
                    continue;
                };
                if query.trim().is_empty() {
                    return Err(ImportError::Configuration(format!(
                        "target '{name}': field '{field}' has an empty query_property"
                    )));
                }
                if query != field {
                    return Err(ImportError::Configuration(format!(
                        "target '{name}': query_property '{query}' of field '{field}' is never \
                         written by its setter (use '{field}')"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn context_registry(&self) -> ContextRegistry {
        let mut registry = ContextRegistry::new();
        for (name, context) in &self.contexts {
            registry.insert(ContextDefinition {
                name: name.clone(),
                target: context.target.clone(),
                arguments: context.arguments.clone(),
            });
        }
        registry
    }

    /// Record schemas for every configured target. Arguments of the contexts
    /// writing a target become plain record fields.
    pub fn mapping_registry(&self) -> Result<FieldMappingRegistry, ImportError> {
        let mut registry = FieldMappingRegistry::new();
        for (name, target) in &self.targets {
            let arguments = self
                .contexts
                .values()
                .filter(|c| c.target == *name)
                .flat_map(|c| c.arguments.iter().map(|a| a.name.as_str()));
            registry.register(record_schema(name, target, arguments))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERSONS: &str = r#"
[contexts.persons]
target = "person"

[[contexts.persons.arguments]]
name = "category"
identifier = true
domain = "category"

[[contexts.persons.arguments]]
name = "origin"
static = "spreadsheet"

[targets.person.fields.id]
identifier = true
label = "Person number"
query_property = "id"
transform = "pad:5"

[targets.person.fields.firstname]
required = true

[targets.person.fields.lastname]
transform = "trim"
"#;

    #[test]
    fn parse_contexts_file() {
        let config = SyncConfig::from_toml(PERSONS).unwrap();
        let ctx = &config.contexts["persons"];
        assert_eq!(ctx.target, "person");
        assert_eq!(ctx.arguments.len(), 2);
        assert_eq!(ctx.arguments[1].static_value.as_deref(), Some("spreadsheet"));

        let id = &config.targets["person"].fields["id"];
        assert!(id.identifier);
        assert_eq!(id.transform, FieldTransform::Pad(5));
        assert_eq!(id.label.as_deref(), Some("Person number"));
    }

    #[test]
    fn registries_from_config() {
        let config = SyncConfig::from_toml(PERSONS).unwrap();
        let contexts = config.context_registry();
        assert_eq!(contexts.get("persons").unwrap().target, "person");

        let registry = config.mapping_registry().unwrap();
        let table = registry.mapping_metadata("person").unwrap();
        assert_eq!(table.len(), 3);
        let schema = registry.schema::<crate::record::Record>("person").unwrap();
        assert!(schema.has_setter("set_category"));
        assert!(schema.has_setter("set_origin"));
    }

    #[test]
    fn unknown_target_rejected() {
        let err = SyncConfig::from_toml("[contexts.x]\ntarget = \"missing\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown target 'missing'"));
    }

    #[test]
    fn query_property_must_be_the_stored_field() {
        let input = r#"
[targets.person.fields.id]
identifier = true
query_property = "code"
transform = "pad:5"
"#;
        let err = SyncConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ImportError::Configuration(_)));
        assert!(err.to_string().contains("'code'"));

        let empty = "[targets.person.fields.id]\nquery_property = \" \"\n";
        assert!(SyncConfig::from_toml(empty).is_err());
    }

    #[test]
    fn bad_transform_rejected() {
        let input = "[targets.t.fields.a]\ntransform = \"pad:x\"\n";
        assert!(SyncConfig::from_toml(input).is_err());
    }

    #[test]
    fn duplicate_argument_rejected() {
        let input = r#"
[contexts.c]
target = "t"
[[contexts.c.arguments]]
name = "a"
[[contexts.c.arguments]]
name = "a"
[targets.t]
"#;
        let err = SyncConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn engine_settings_default_and_validate() {
        assert_eq!(EngineSettings::default().records_per_flush, 20);
        assert!(EngineSettings { records_per_flush: 0 }.validate().is_err());
    }
}
