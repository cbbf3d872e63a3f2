use crate::value::{EntityRef, Value};

/// Converts reference arguments into the values setters receive.
pub trait ReferenceResolver {
    /// Value handed to the argument's setter for `reference`.
    fn resolve(&self, reference: &EntityRef) -> Result<Value, String>;

    /// Check a raw id supplied with a request and turn it into a reference.
    fn lookup(&self, domain: &str, raw: &str) -> Result<EntityRef, String> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(format!("empty {domain} id"));
        }
        Ok(EntityRef::new(domain, id))
    }
}

/// Hands references through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

impl ReferenceResolver for PassthroughResolver {
    fn resolve(&self, reference: &EntityRef) -> Result<Value, String> {
        Ok(Value::Reference(reference.clone()))
    }
}
