use std::collections::HashMap;

use sheetsync_io::ColumnId;

use crate::error::ImportError;
use crate::job::MappedProperty;
use crate::mapping::MappingMetadata;

/// A property assigned to a column.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundProperty {
    pub property: String,
    pub column: ColumnId,
    pub mapping: MappingMetadata,
}

/// Property <-> column lookup for one job mapping.
///
/// Unassigned properties are dropped. Properties sharing a column keep their
/// declared order in the inverse view.
#[derive(Debug, Clone, Default)]
pub struct ColumnBinding {
    bound: Vec<BoundProperty>,
    by_column: HashMap<ColumnId, Vec<BoundProperty>>,
}

impl ColumnBinding {
    pub fn new(mapping: &[MappedProperty]) -> Result<Self, ImportError> {
        let mut bound = Vec::new();
        let mut by_column: HashMap<ColumnId, Vec<BoundProperty>> = HashMap::new();

        for entry in mapping.iter().filter(|m| m.is_assigned()) {
            let column: ColumnId = entry.column.parse().map_err(|_| {
                ImportError::Configuration(format!(
                    "property '{}' is bound to invalid column '{}'",
                    entry.property, entry.column
                ))
            })?;
            let binding = BoundProperty {
                property: entry.property.clone(),
                column: column.clone(),
                mapping: entry.mapping.clone(),
            };
            by_column.entry(column).or_default().push(binding.clone());
            bound.push(binding);
        }

        Ok(Self { bound, by_column })
    }

    /// Properties fed by `column`, in declared order.
    pub fn inverse_by_column(&self, column: &ColumnId) -> &[BoundProperty] {
        self.by_column
            .get(column)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn identifier_properties(&self) -> impl Iterator<Item = &BoundProperty> + '_ {
        self.bound.iter().filter(|b| b.mapping.identifier)
    }

    pub fn bindings(&self) -> &[BoundProperty] {
        &self.bound
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mapped(property: &str, column: &str, identifier: bool) -> MappedProperty {
        MappedProperty {
            property: property.into(),
            column: column.into(),
            mapping: MappingMetadata {
                identifier,
                ..MappingMetadata::default()
            },
        }
    }

    fn col(s: &str) -> ColumnId {
        s.parse().unwrap()
    }

    #[test]
    fn forward_and_inverse() {
        let binding = ColumnBinding::new(&[
            mapped("firstname", "A", false),
            mapped("lastname", "B", false),
            mapped("id", "C", true),
            mapped("unused", "", false),
        ])
        .unwrap();

        assert_eq!(binding.bindings().len(), 3);
        assert!(binding.bindings().iter().all(|b| b.property != "unused"));
        assert_eq!(binding.inverse_by_column(&col("C"))[0].property, "id");
        assert_eq!(binding.inverse_by_column(&col("A"))[0].property, "firstname");
        assert!(binding.inverse_by_column(&col("D")).is_empty());
        let ids: Vec<_> = binding.identifier_properties().map(|b| b.property.as_str()).collect();
        assert_eq!(ids, vec!["id"]);
    }

    #[test]
    fn shared_column_keeps_declared_order() {
        let binding = ColumnBinding::new(&[
            mapped("display", "A", false),
            mapped("name", "A", false),
        ])
        .unwrap();
        let props: Vec<_> = binding
            .inverse_by_column(&col("A"))
            .iter()
            .map(|b| b.property.as_str())
            .collect();
        assert_eq!(props, vec!["display", "name"]);
    }

    #[test]
    fn invalid_column_is_a_configuration_error() {
        let err = ColumnBinding::new(&[mapped("id", "1A", true)]).unwrap_err();
        assert!(matches!(err, ImportError::Configuration(_)));
    }

    proptest! {
        #[test]
        fn inverse_covers_each_assigned_property_once(
            columns in proptest::collection::vec(prop_oneof![Just(""), Just("A"), Just("B"), Just("C"), Just("AA")], 0..12)
        ) {
            let mapping: Vec<MappedProperty> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| mapped(&format!("p{i}"), c, false))
                .collect();
            let binding = ColumnBinding::new(&mapping).unwrap();

            let mut seen: Vec<String> = ["A", "B", "C", "AA"]
                .iter()
                .flat_map(|c| binding.inverse_by_column(&col(c)).iter().map(|b| b.property.clone()))
                .collect();
            seen.sort();
            let mut expected: Vec<String> = mapping
                .iter()
                .filter(|m| m.is_assigned())
                .map(|m| m.property.clone())
                .collect();
            expected.sort();
            prop_assert_eq!(seen, expected);
        }
    }
}
