//! Field mapping registry.
//!
//! Each target type registers a [`TargetSchema`] once at startup: the
//! ordered property -> [`MappingMetadata`] table plus a dispatch table from
//! setter/getter names to typed closures. The engine never inspects entity
//! types at run time; it only calls what was registered here.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, ValidationErrors};
use crate::repository::Entity;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Per-property mapping options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingMetadata {
    /// Property participates in record lookup.
    #[serde(default)]
    pub identifier: bool,
    /// Display label for mapping UIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
    /// Stored field queried instead of the property itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_property: Option<String>,
}

impl MappingMetadata {
    pub fn identifier() -> Self {
        Self {
            identifier: true,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_setter(mut self, name: impl Into<String>) -> Self {
        self.setter = Some(name.into());
        self
    }

    pub fn with_query_property(mut self, field: impl Into<String>) -> Self {
        self.query_property = Some(field.into());
        self
    }

    pub fn setter_name(&self, property: &str) -> String {
        self.setter
            .clone()
            .unwrap_or_else(|| default_setter(property))
    }

    pub fn getter_name(&self, property: &str) -> String {
        self.getter
            .clone()
            .unwrap_or_else(|| default_getter(property))
    }

    /// Field used in identity queries for `property`.
    pub fn query_field<'a>(&'a self, property: &'a str) -> &'a str {
        self.query_property.as_deref().unwrap_or(property)
    }
}

pub fn default_setter(property: &str) -> String {
    format!("set_{property}")
}

pub fn default_getter(property: &str) -> String {
    format!("get_{property}")
}

/// Ordered property -> metadata table of one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    entries: Vec<(String, MappingMetadata)>,
}

impl MappingTable {
    /// Insert or replace; a replaced property keeps its position.
    pub fn insert(&mut self, property: impl Into<String>, metadata: MappingMetadata) {
        let property = property.into();
        match self.entries.iter_mut().find(|(p, _)| *p == property) {
            Some(entry) => entry.1 = metadata,
            None => self.entries.push((property, metadata)),
        }
    }

    pub fn get(&self, property: &str) -> Option<&MappingMetadata> {
        self.entries
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappingMetadata)> + '_ {
        self.entries.iter().map(|(p, m)| (p.as_str(), m))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .filter(|(_, m)| m.identifier)
            .map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Target schema
// ---------------------------------------------------------------------------

pub type SetterFn<E> = Box<dyn Fn(&mut E, &Value) -> Result<(), String> + Send + Sync>;
pub type GetterFn<E> = Box<dyn Fn(&E) -> Value + Send + Sync>;
pub type ValidatorFn<E> = Box<dyn Fn(&E, &mut ValidationErrors) + Send + Sync>;

/// Static description of one target type.
pub struct TargetSchema<E> {
    name: String,
    table: MappingTable,
    setters: HashMap<String, SetterFn<E>>,
    getters: HashMap<String, GetterFn<E>>,
    validators: Vec<ValidatorFn<E>>,
}

impl<E: Entity> TargetSchema<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: MappingTable::default(),
            setters: HashMap::new(),
            getters: HashMap::new(),
            validators: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Register a mapped property with its default accessors
    /// (`get_<property>` / `set_<property>`).
    pub fn property<G, S>(mut self, property: &str, metadata: MappingMetadata, getter: G, setter: S) -> Self
    where
        G: Fn(&E) -> Value + Send + Sync + 'static,
        S: Fn(&mut E, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.getters.insert(default_getter(property), Box::new(getter));
        self.setters.insert(default_setter(property), Box::new(setter));
        self.table.insert(property, metadata);
        self
    }

    /// Register a named setter, e.g. a custom one referenced by metadata or
    /// the setter of a context argument.
    pub fn setter<S>(mut self, name: &str, setter: S) -> Self
    where
        S: Fn(&mut E, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.setters.insert(name.to_string(), Box::new(setter));
        self
    }

    pub fn getter<G>(mut self, name: &str, getter: G) -> Self
    where
        G: Fn(&E) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.to_string(), Box::new(getter));
        self
    }

    /// Extra validation on top of [`Entity::validate`].
    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&E, &mut ValidationErrors) + Send + Sync + 'static,
    {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn has_setter(&self, name: &str) -> bool {
        self.setters.contains_key(name)
    }

    pub fn has_getter(&self, name: &str) -> bool {
        self.getters.contains_key(name)
    }

    /// Call setter `name`. A rejected value becomes a validation error.
    pub fn apply(&self, name: &str, entity: &mut E, value: &Value) -> Result<(), ImportError> {
        let setter = self.setters.get(name).ok_or_else(|| {
            ImportError::Configuration(format!("target '{}' has no setter '{name}'", self.name))
        })?;
        setter(entity, value).map_err(|msg| {
            ImportError::Validation(ValidationErrors::single(format!("{name}: {msg}")))
        })
    }

    pub fn get(&self, name: &str, entity: &E) -> Result<Value, ImportError> {
        let getter = self.getters.get(name).ok_or_else(|| {
            ImportError::Configuration(format!("target '{}' has no getter '{name}'", self.name))
        })?;
        Ok(getter(entity))
    }

    pub fn validate(&self, entity: &E) -> Result<(), ValidationErrors> {
        let mut errors = match entity.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };
        for validator in &self.validators {
            validator(entity, &mut errors);
        }
        errors.into_result()
    }
}

impl<E> fmt::Debug for TargetSchema<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut setters: Vec<_> = self.setters.keys().collect();
        setters.sort();
        f.debug_struct("TargetSchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("setters", &setters)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All registered targets. Built once, read-only afterwards.
#[derive(Default)]
pub struct FieldMappingRegistry {
    schemas: BTreeMap<String, Box<dyn Any + Send + Sync>>,
    tables: BTreeMap<String, MappingTable>,
}

impl FieldMappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Entity + 'static>(&mut self, schema: TargetSchema<E>) -> Result<(), ImportError> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(ImportError::Configuration(format!(
                "target '{name}' registered twice"
            )));
        }
        self.tables.insert(name.clone(), schema.table().clone());
        self.schemas.insert(name, Box::new(schema));
        Ok(())
    }

    /// Property -> metadata table for `target`.
    pub fn mapping_metadata(&self, target: &str) -> Result<&MappingTable, ImportError> {
        self.tables
            .get(target)
            .ok_or_else(|| ImportError::Configuration(format!("unknown target '{target}'")))
    }

    /// Typed schema for `target`; fails when `E` is not the registered type.
    pub fn schema<E: Entity + 'static>(&self, target: &str) -> Result<&TargetSchema<E>, ImportError> {
        let schema = self
            .schemas
            .get(target)
            .ok_or_else(|| ImportError::Configuration(format!("unknown target '{target}'")))?;
        schema.downcast_ref::<TargetSchema<E>>().ok_or_else(|| {
            ImportError::Configuration(format!(
                "target '{target}' is not registered for {}",
                std::any::type_name::<E>()
            ))
        })
    }

}

impl fmt::Debug for FieldMappingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.tables.iter()).finish()
    }
}
