//! Populating entities from rows and job arguments.

use std::collections::BTreeMap;

use sheetsync_io::Row;

use crate::binding::ColumnBinding;
use crate::context::ContextDefinition;
use crate::error::{ImportError, ValidationErrors};
use crate::job::ArgumentValue;
use crate::mapping::TargetSchema;
use crate::reference::ReferenceResolver;
use crate::repository::{Constraint, Entity};
use crate::value::{EntityRef, Value};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// A context argument with its value for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArgument {
    pub name: String,
    pub setter: String,
    /// `None` when neither the job nor the context supplies a value.
    pub value: Option<Value>,
    pub identifier: bool,
    /// Value came from the job rather than a context default.
    pub in_job: bool,
}

impl ResolvedArgument {
    fn constraint(&self) -> Option<Constraint> {
        match (&self.value, self.in_job) {
            (Some(value), true) => Some(Constraint {
                field: self.name.clone(),
                value: value.clone(),
            }),
            _ => None,
        }
    }
}

/// Resolve the job's argument values against the context declaration.
/// References are converted once here, not per row.
pub fn resolve_arguments(
    context: &ContextDefinition,
    job_arguments: &BTreeMap<String, ArgumentValue>,
    resolver: &dyn ReferenceResolver,
) -> Result<Vec<ResolvedArgument>, ImportError> {
    if let Some(name) = job_arguments
        .keys()
        .find(|name| context.argument(name).is_none())
    {
        return Err(ImportError::Configuration(format!(
            "argument '{name}' is not declared by context '{}'",
            context.name
        )));
    }

    let resolve = |reference: EntityRef| {
        resolver
            .resolve(&reference)
            .map_err(|message| ImportError::Reference {
                domain: reference.domain.clone(),
                id: reference.id.clone(),
                message,
            })
    };

    let mut out = Vec::with_capacity(context.arguments.len());
    for spec in &context.arguments {
        let (value, in_job) = match job_arguments.get(&spec.name) {
            Some(ArgumentValue::Reference { domain, id }) => {
                (Some(resolve(EntityRef::new(domain, id))?), true)
            }
            Some(ArgumentValue::Static { value } | ArgumentValue::Request { value }) => {
                match &spec.domain {
                    Some(domain) => {
                        let reference = resolver.lookup(domain, value).map_err(|message| {
                            ImportError::Reference {
                                domain: domain.clone(),
                                id: value.clone(),
                                message,
                            }
                        })?;
                        (Some(resolve(reference)?), true)
                    }
                    None => (Some(Value::from(value.as_str())), true),
                }
            }
            None => (
                spec.static_value
                    .as_deref()
                    .or(spec.default.as_deref())
                    .map(Value::from),
                false,
            ),
        };
        out.push(ResolvedArgument {
            name: spec.name.clone(),
            setter: spec.setter_name(),
            value,
            identifier: spec.identifier,
            in_job,
        });
    }
    Ok(out)
}

/// Equality constraints added to every identity query.
pub fn identity_constraints(arguments: &[ResolvedArgument]) -> Vec<Constraint> {
    arguments
        .iter()
        .filter(|a| a.identifier)
        .filter_map(ResolvedArgument::constraint)
        .collect()
}

/// Constraints selecting the records a delete pass may touch: every
/// argument the job carries.
pub fn delete_scope(arguments: &[ResolvedArgument]) -> Vec<Constraint> {
    arguments
        .iter()
        .filter_map(ResolvedArgument::constraint)
        .collect()
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

pub struct RowMaterializer<'a, E> {
    schema: &'a TargetSchema<E>,
    binding: &'a ColumnBinding,
    arguments: &'a [ResolvedArgument],
}

impl<'a, E: Entity> RowMaterializer<'a, E> {
    pub fn new(
        schema: &'a TargetSchema<E>,
        binding: &'a ColumnBinding,
        arguments: &'a [ResolvedArgument],
    ) -> Self {
        Self {
            schema,
            binding,
            arguments,
        }
    }

    /// Apply arguments, then every bound column of `row`.
    ///
    /// Rejected values are collected; the entity is still filled with
    /// everything that was accepted.
    pub fn populate(&self, entity: &mut E, row: &Row) -> Result<(), ImportError> {
        let mut rejected = ValidationErrors::new();
        self.apply_arguments(entity, &mut rejected)?;

        for (column, cell) in row.cells() {
            let bound = self.binding.inverse_by_column(&column);
            if bound.is_empty() {
                continue;
            }
            let value = Value::from(cell);
            for b in bound {
                let setter = b.mapping.setter_name(&b.property);
                collect(self.schema.apply(&setter, entity, &value), &mut rejected)?;
            }
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(ImportError::Validation(rejected))
        }
    }

    /// A default entity with the session's arguments applied, the state
    /// every row starts from before its cells are set.
    pub fn scratch(&self) -> Result<E, ImportError> {
        let mut entity = E::default();
        let mut rejected = ValidationErrors::new();
        self.apply_arguments(&mut entity, &mut rejected)?;
        if rejected.is_empty() {
            Ok(entity)
        } else {
            Err(ImportError::Validation(rejected))
        }
    }

    pub fn schema(&self) -> &'a TargetSchema<E> {
        self.schema
    }

    pub fn binding(&self) -> &'a ColumnBinding {
        self.binding
    }

    fn apply_arguments(&self, entity: &mut E, rejected: &mut ValidationErrors) -> Result<(), ImportError> {
        for argument in self.arguments {
            if let Some(value) = &argument.value {
                collect(self.schema.apply(&argument.setter, entity, value), rejected)?;
            }
        }
        Ok(())
    }
}

fn collect(result: Result<(), ImportError>, rejected: &mut ValidationErrors) -> Result<(), ImportError> {
    match result {
        Err(ImportError::Validation(errors)) => {
            for message in errors.messages() {
                rejected.push(message.clone());
            }
            Ok(())
        }
        other => other,
    }
}
