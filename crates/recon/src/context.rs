//! Import contexts: which target a job writes to and which arguments
//! scope it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::job::ArgumentValue;
use crate::mapping::default_setter;
use crate::reference::ReferenceResolver;

/// A contextual argument declared by a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    /// Constrains identity lookup in addition to the mapped identifiers.
    #[serde(default)]
    pub identifier: bool,
    /// Fixed value; the argument is never read from a request.
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
    /// Argument holds the id of an entity in this domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Used when the job carries no value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ArgumentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: false,
            static_value: None,
            domain: None,
            default: None,
        }
    }

    pub fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }

    pub fn with_static(mut self, value: impl Into<String>) -> Self {
        self.static_value = Some(value.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn setter_name(&self) -> String {
        default_setter(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDefinition {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentSpec>,
}

impl ContextDefinition {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: ArgumentSpec) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Build the arguments stored with a new job from request parameters.
    ///
    /// Static arguments take their configured value, reference arguments are
    /// checked through `resolver`, everything else is copied from `params`.
    /// Arguments with no value are left out.
    pub fn arguments_for_request(
        &self,
        params: &HashMap<String, String>,
        resolver: &dyn ReferenceResolver,
    ) -> Result<BTreeMap<String, ArgumentValue>, ImportError> {
        let mut out = BTreeMap::new();
        for spec in &self.arguments {
            if let Some(value) = &spec.static_value {
                out.insert(spec.name.clone(), ArgumentValue::Static { value: value.clone() });
                continue;
            }
            let Some(raw) = params.get(&spec.name) else {
                continue;
            };
            let value = match &spec.domain {
                Some(domain) => {
                    let reference =
                        resolver
                            .lookup(domain, raw)
                            .map_err(|message| ImportError::Reference {
                                domain: domain.clone(),
                                id: raw.clone(),
                                message,
                            })?;
                    ArgumentValue::Reference {
                        domain: reference.domain,
                        id: reference.id,
                    }
                }
                None => ArgumentValue::Request { value: raw.clone() },
            };
            out.insert(spec.name.clone(), value);
        }
        Ok(out)
    }
}

/// Context name -> definition.
#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    contexts: BTreeMap<String, ContextDefinition>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, context: ContextDefinition) {
        self.contexts.insert(context.name.clone(), context);
    }

    pub fn get(&self, name: &str) -> Result<&ContextDefinition, ImportError> {
        self.contexts
            .get(name)
            .ok_or_else(|| ImportError::Configuration(format!("unknown context '{name}'")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextDefinition> + '_ {
        self.contexts.values()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
