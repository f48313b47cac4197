//! Field value types shared by the resolver and the substitution engine.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Flat field name → string value mapping. No nested values survive past
/// [`normalize_value`].
pub type FieldValues = BTreeMap<String, String>;

/// One implicit-mode field: its current literal in the template and the value
/// that should replace it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub original: String,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpecBody {
    #[serde(default)]
    original: String,
    #[serde(default)]
    new: String,
}

/// Ordered field specs. Serializes as `{"<name>": {"original", "new"}}` in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSpecs(Vec<FieldSpec>);

impl FieldSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the spec for `spec.name`, keeping its first position.
    pub fn push(&mut self, spec: FieldSpec) {
        match self.0.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.0.push(spec),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FieldSpec> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|spec| spec.name.clone()).collect()
    }

    /// `{name: new}` projection shown to the caller.
    pub fn values(&self) -> FieldValues {
        self.0
            .iter()
            .map(|spec| (spec.name.clone(), spec.new.clone()))
            .collect()
    }
}

impl FromIterator<FieldSpec> for FieldSpecs {
    fn from_iter<I: IntoIterator<Item = FieldSpec>>(iter: I) -> Self {
        let mut specs = FieldSpecs::new();
        for spec in iter {
            specs.push(spec);
        }
        specs
    }
}

impl Serialize for FieldSpecs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for spec in &self.0 {
            map.serialize_entry(
                &spec.name,
                &SpecBody {
                    original: spec.original.clone(),
                    new: spec.new.clone(),
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldSpecs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecsVisitor;

        impl<'de> Visitor<'de> for SpecsVisitor {
            type Value = FieldSpecs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field name to {original, new}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldSpecs, A::Error> {
                let mut specs = FieldSpecs::new();
                while let Some((name, body)) = access.next_entry::<String, SpecBody>()? {
                    specs.push(FieldSpec {
                        name,
                        original: body.original,
                        new: body.new,
                    });
                }
                Ok(specs)
            }
        }

        deserializer.deserialize_map(SpecsVisitor)
    }
}

/// Flatten a JSON value into the string form used for substitution.
///
/// Strings pass through, `null` becomes empty, a list of strings is joined
/// with `", "`, and any other compound value becomes compact JSON text.
pub fn normalize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Normalize a JSON object into [`FieldValues`], trimming keys. Non-object
/// input yields an empty mapping.
pub fn flatten_object(value: &Value) -> FieldValues {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| (key.trim().to_string(), normalize_value(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Trim the keys of caller-supplied values.
pub fn clean_field_values(values: FieldValues) -> FieldValues {
    values
        .into_iter()
        .map(|(key, value)| (key.trim().to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_lists_are_joined() {
        assert_eq!(normalize_value(&json!(["cough", "fever"])), "cough, fever");
    }

    #[test]
    fn test_compound_values_become_json_text() {
        assert_eq!(normalize_value(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(normalize_value(&json!([1, "two"])), "[1,\"two\"]");
    }

    #[test]
    fn test_scalars_and_null() {
        assert_eq!(normalize_value(&Value::Null), "");
        assert_eq!(normalize_value(&json!(42)), "42");
        assert_eq!(normalize_value(&json!(true)), "true");
        assert_eq!(normalize_value(&json!("x")), "x");
    }

    #[test]
    fn test_flatten_object_trims_keys_and_ignores_non_objects() {
        let values = flatten_object(&json!({" Name ": "Jane", "Symptoms": ["a", "b"]}));
        assert_eq!(values.get("Name").map(String::as_str), Some("Jane"));
        assert_eq!(values.get("Symptoms").map(String::as_str), Some("a, b"));
        assert!(flatten_object(&json!(["not", "an", "object"])).is_empty());
    }

    #[test]
    fn test_field_specs_keep_order_through_json() {
        let specs: FieldSpecs = [
            FieldSpec { name: "Zeta".into(), original: "z".into(), new: "Z".into() },
            FieldSpec { name: "Alpha".into(), original: "a".into(), new: "A".into() },
        ]
        .into_iter()
        .collect();

        let text = serde_json::to_string(&specs).unwrap();
        assert_eq!(
            text,
            "{\"Zeta\":{\"original\":\"z\",\"new\":\"Z\"},\"Alpha\":{\"original\":\"a\",\"new\":\"A\"}}"
        );

        let back: FieldSpecs = serde_json::from_str(&text).unwrap();
        assert_eq!(back, specs);
        assert_eq!(back.names(), vec!["Zeta".to_string(), "Alpha".to_string()]);
    }

    #[test]
    fn test_field_specs_tolerate_missing_members() {
        let specs: FieldSpecs = serde_json::from_str("{\"Name\": {\"original\": \"Ali\"}}").unwrap();
        let spec = specs.iter().next().unwrap();
        assert_eq!(spec.original, "Ali");
        assert_eq!(spec.new, "");
    }
}
