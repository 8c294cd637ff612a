use crate::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Named parameters passed to or returned from a skill.
pub type Params = serde_json::Map<String, Value>;

/// Convert a JSON value into [`Params`], rejecting anything that is not an object.
pub fn into_params(value: Value) -> ConductorResult<Params> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ConductorError::Validation(format!(
            "expected a parameter object, got {}",
            ParamType::describe(&other)
        ))),
    }
}

/// Primitive type a parameter value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// JSON string.
    String,
    /// JSON number without a fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Any non-null value.
    Any,
}

impl ParamType {
    /// Whether `value` is compatible with this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => !value.is_null(),
        }
    }

    fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Declaration of one named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Accepted JSON type.
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Whether the field must be present and non-null.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Shown in discovery documents.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn default_required() -> bool {
    true
}

/// Mapping of parameter name to expected type.
///
/// Fields not declared in the schema are accepted and passed through
/// untouched. A `null` value counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// A schema with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required field.
    pub fn required(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.field(name, ty, true, "")
    }

    /// Declare an optional field.
    pub fn optional(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.field(name, ty, false, "")
    }

    /// Declare a field with every attribute spelled out.
    pub fn field(
        mut self,
        name: impl Into<String>,
        ty: ParamType,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                ty,
                required,
                description: description.into(),
            },
        );
        self
    }

    /// Spec for field `name`.
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter()
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of required fields that are absent (or null) in `params`.
    pub fn missing_required(&self, params: &Params) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(name, spec)| {
                spec.required && params.get(*name).map_or(true, Value::is_null)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Check `params` against every declared field.
    ///
    /// All violations are reported together in a single
    /// [`ConductorError::Validation`].
    pub fn validate(&self, params: &Params) -> ConductorResult<()> {
        let mut violations = Vec::new();

        for (name, spec) in &self.fields {
            match params.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(format!("missing required field '{name}'"));
                    }
                }
                Some(value) if !spec.ty.accepts(value) => {
                    violations.push(format!(
                        "field '{name}' expected {}, got {}",
                        spec.ty,
                        ParamType::describe(value)
                    ));
                }
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::Validation(violations.join("; ")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn sql_schema() -> Schema {
        Schema::new()
            .required("requirement", ParamType::String)
            .optional("tables", ParamType::Array)
            .optional("execute", ParamType::Boolean)
            .optional("limit", ParamType::Integer)
    }

    #[test]
    fn test_valid_input_passes() {
        let input = params(json!({
            "requirement": "Total revenue by region",
            "tables": ["sales_transactions"],
            "execute": true,
            "limit": 10
        }));
        assert!(sql_schema().validate(&input).is_ok());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let err = sql_schema()
            .validate(&params(json!({"tables": []})))
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        assert!(err.to_string().contains("missing required field 'requirement'"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let input = params(json!({"requirement": null}));
        assert_eq!(sql_schema().missing_required(&input), vec!["requirement"]);
        assert!(sql_schema().validate(&input).is_err());
    }

    #[test]
    fn test_type_mismatch_reports_every_violation() {
        let input = params(json!({
            "requirement": 42,
            "execute": "yes",
            "limit": 1.5
        }));
        let msg = sql_schema().validate(&input).unwrap_err().to_string();
        assert!(msg.contains("field 'requirement' expected string, got integer"));
        assert!(msg.contains("field 'execute' expected boolean, got string"));
        assert!(msg.contains("field 'limit' expected integer, got number"));
    }

    #[test]
    fn test_undeclared_fields_pass_through() {
        let input = params(json!({"requirement": "x", "extra": {"a": 1}}));
        assert!(sql_schema().validate(&input).is_ok());
    }

    #[test]
    fn test_into_params_rejects_non_objects() {
        assert_eq!(into_params(json!({"a": 1})).unwrap().len(), 1);
        let err = into_params(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("got array"));
    }

    #[test]
    fn test_schema_wire_format() {
        let schema = Schema::new()
            .field("question", ParamType::String, true, "User question")
            .optional("context", ParamType::Object);
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["question"]["type"], "string");
        assert_eq!(json["question"]["required"], true);
        assert_eq!(json["context"]["required"], false);
        assert!(json["context"].get("description").is_none());

        let parsed: Schema =
            serde_json::from_value(json!({"rows": {"type": "array"}})).unwrap();
        assert!(parsed.get("rows").unwrap().required);
        assert_eq!(parsed.get("rows").unwrap().ty, ParamType::Array);
    }
}
