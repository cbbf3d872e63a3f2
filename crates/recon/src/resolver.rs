use sheetsync_io::Row;

use crate::binding::BoundProperty;
use crate::error::ImportError;
use crate::materializer::RowMaterializer;
use crate::repository::{Constraint, Entity, Query, Repository};
use crate::value::Value;

/// Finds the persisted record a row refers to.
pub struct IdentityResolver<'a, E> {
    materializer: &'a RowMaterializer<'a, E>,
    arguments: &'a [Constraint],
}

impl<'a, E: Entity> IdentityResolver<'a, E> {
    pub fn new(materializer: &'a RowMaterializer<'a, E>, arguments: &'a [Constraint]) -> Self {
        Self {
            materializer,
            arguments,
        }
    }

    /// Identity query for `row`, `None` when nothing identifies it.
    ///
    /// An identifier with a `query_property` is compared in stored form: the
    /// raw cell goes through the property's setter on an entity that already
    /// carries the session's arguments, and that entity's `query_property`
    /// field is used.
    pub fn query_for(&self, row: &Row) -> Result<Option<Query>, ImportError> {
        let mut query = Query::new();
        let mut base: Option<E> = None;

        for bound in self.materializer.binding().identifier_properties() {
            let raw = Value::from(row.cell(&bound.column));
            let value = if bound.mapping.query_property.is_some() {
                let scratch = match base.as_ref() {
                    Some(entity) => entity.clone(),
                    None => {
                        let entity = self.materializer.scratch()?;
                        base = Some(entity.clone());
                        entity
                    }
                };
                self.normalized(bound, scratch, &raw)?
            } else {
                raw
            };
            query.push(bound.mapping.query_field(&bound.property), value);
        }

        for constraint in self.arguments {
            query.push(constraint.field.clone(), constraint.value.clone());
        }

        Ok((!query.is_empty()).then_some(query))
    }

    pub fn find_existing<R: Repository<E>>(
        &self,
        row: &Row,
        repo: &R,
    ) -> Result<Option<(R::Id, E)>, ImportError> {
        match self.query_for(row)? {
            Some(query) => {
                log::trace!("row {}: lookup {query}", row.number());
                Ok(repo.find_first(&query)?)
            }
            None => Ok(None),
        }
    }

    fn normalized(&self, bound: &BoundProperty, mut scratch: E, raw: &Value) -> Result<Value, ImportError> {
        let schema = self.materializer.schema();
        let setter = bound.mapping.setter_name(&bound.property);
        let field = bound.mapping.query_field(&bound.property);
        schema.apply(&setter, &mut scratch, raw)?;

        match scratch.field(field) {
            None => Err(ImportError::Configuration(format!(
                "target '{}' has no field '{field}' (query_property of '{}')",
                schema.name(),
                bound.property
            ))),
            // Empty cells stay empty; anything else must land in the field.
            Some(value) if value.is_empty() && !raw.to_string().trim().is_empty() => {
                Err(ImportError::Configuration(format!(
                    "setter '{setter}' of '{}' does not write query field '{field}'",
                    bound.property
                )))
            }
            Some(value) => Ok(value),
        }
    }
}
