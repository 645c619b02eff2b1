//! Offline configuration checks used by the `strata` binary

use crate::error::{StrataError, StrataResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use strata_spec::{evaluate_computed_fields, CompositeKind, Config, SpecError};

/// Spec counts per store and kind of a validated configuration
///
/// # Errors
/// [`StrataError::Configuration`] when the configuration is invalid
pub fn spec_counts(config: &Config) -> StrataResult<BTreeMap<String, BTreeMap<CompositeKind, usize>>> {
    Ok(config
        .registries()?
        .into_iter()
        .map(|(store, registry)| (store, registry.counts()))
        .collect())
}

/// Evaluate the computed fields of table spec `spec` against `row`
///
/// Temporary fields are removed from the result.
///
/// # Errors
/// [`StrataError::Configuration`] for unknown or non-table specs and for
/// expressions that fail on this row
pub fn compute_row(config: &Config, spec: &str, mut row: Map<String, Value>) -> StrataResult<Map<String, Value>> {
    let registries = config.registries()?;
    let registered = registries
        .values()
        .find_map(|r| r.get(spec).cloned())
        .ok_or_else(|| StrataError::Configuration(SpecError::UnknownSpec(spec.to_string())))?;
    if registered.kind != CompositeKind::Table {
        return Err(StrataError::Configuration(SpecError::invalid(
            spec,
            "computed fields only apply to table specifications",
        )));
    }

    evaluate_computed_fields(&registered.spec.computed_fields, &mut row).map_err(|(field, source)| {
        StrataError::Configuration(SpecError::Expression {
            spec: format!("{spec}.{field}"),
            source,
        })
    })?;
    for field in registered.spec.temporary_fields() {
        row.remove(&field);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> Config {
        Config::from_json_str(
            r#"{
                "default_context": "http://talisaspire.com/",
                "stores": {
                    "tripod_php_testing": {
                        "pods": ["CBD_testing"],
                        "table_specifications": [{
                            "_id": "t_price",
                            "type": "bibo:Book",
                            "from": "CBD_testing",
                            "fields": [{"fieldName": "price", "predicates": ["ex:price"]}],
                            "computed_fields": [
                                {"fieldName": "net", "value": {"arithmetic": {"operands": ["$price", 2], "operator": "*"}}, "temporary": true},
                                {"fieldName": "total", "value": {"arithmetic": {"operands": ["$net", 1], "operator": "+"}}}
                            ]
                        }]
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn compute_row_strips_temporaries() {
        let row = json!({"price": 10}).as_object().cloned().unwrap();
        let out = compute_row(&config(), "t_price", row).unwrap();
        assert_eq!(out.get("net"), None);
        assert_eq!(out["total"].as_f64(), Some(21.0));
    }

    #[test]
    fn unknown_spec_is_a_configuration_error() {
        let err = compute_row(&config(), "t_missing", Map::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn counts_per_kind() {
        let counts = spec_counts(&config()).unwrap();
        assert_eq!(counts["tripod_php_testing"].get(&CompositeKind::Table), Some(&1));
    }
}
