//! Tool input validation.
//!
//! Tool input schemas arrive as JSON Schema documents. They are compiled once
//! at discovery into a tagged [`Schema`] tree, and arguments are checked
//! against it before a call is sent. Keywords this validator does not
//! understand (`$ref`, `pattern`, `format`, ...) are accepted
//! permissively: the server remains the final authority.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Any,
    Never,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array(Option<Box<Schema>>),
    Object(ObjectSchema),
    Enum(Vec<Value>),
    AnyOf(Vec<Schema>),
    AllOf(Vec<Schema>),
    /// `minLength`/`maxLength` in characters. Non-strings pass.
    Length {
        min: Option<u64>,
        max: Option<u64>,
    },
    /// Numeric bounds. Non-numbers pass.
    Range(NumberRange),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberRange {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
}

impl NumberRange {
    fn from_keywords(map: &Map<String, Value>) -> Option<Self> {
        let bound = |key: &str| map.get(key).and_then(Value::as_f64);
        let range = Self {
            minimum: bound("minimum"),
            maximum: bound("maximum"),
            exclusive_minimum: bound("exclusiveMinimum"),
            exclusive_maximum: bound("exclusiveMaximum"),
        };
        (range != Self::default()).then_some(range)
    }

    fn violation(&self, n: f64) -> Option<String> {
        if let Some(min) = self.minimum
            && n < min
        {
            return Some(format!("{} is less than the minimum {}", n, min));
        }
        if let Some(max) = self.maximum
            && n > max
        {
            return Some(format!("{} is greater than the maximum {}", n, max));
        }
        if let Some(min) = self.exclusive_minimum
            && n <= min
        {
            return Some(format!("{} must be greater than {}", n, min));
        }
        if let Some(max) = self.exclusive_maximum
            && n >= max
        {
            return Some(format!("{} must be less than {}", n, max));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, Schema>,
    pub required: Vec<String>,
    pub additional: AdditionalProperties,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    Allowed,
    Forbidden,
    Matching(Box<Schema>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<SchemaViolation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn into_result(self) -> Result<(), Vec<SchemaViolation>> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(violations) => Err(violations),
        }
    }
}

impl Schema {
    /// Compile a JSON Schema document
    pub fn compile(document: &Value) -> Self {
        match document {
            Value::Bool(true) => Schema::Any,
            Value::Bool(false) => Schema::Never,
            Value::Object(map) => compile_object(map),
            _ => Schema::Any,
        }
    }

    pub fn validate(&self, value: &Value) -> ValidationResult {
        let mut violations = Vec::new();
        self.check(value, "$", &mut violations);
        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }

    fn check(&self, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
        match self {
            Schema::Any => {}
            Schema::Never => out.push(SchemaViolation::new(path, "no value is allowed here")),
            Schema::Null => expect(value.is_null(), "null", value, path, out),
            Schema::Boolean => expect(value.is_boolean(), "boolean", value, path, out),
            Schema::Integer => expect(is_integer(value), "integer", value, path, out),
            Schema::Number => expect(value.is_number(), "number", value, path, out),
            Schema::String => expect(value.is_string(), "string", value, path, out),
            Schema::Array(items) => match value {
                Value::Array(elements) => {
                    if let Some(items) = items {
                        for (index, element) in elements.iter().enumerate() {
                            items.check(element, &format!("{}[{}]", path, index), out);
                        }
                    }
                }
                other => expect(false, "array", other, path, out),
            },
            Schema::Object(object) => match value {
                Value::Object(fields) => object.check(fields, path, out),
                other => expect(false, "object", other, path, out),
            },
            Schema::Enum(allowed) => {
                if !allowed.contains(value) {
                    let choices = allowed
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    out.push(SchemaViolation::new(
                        path,
                        format!("value {} is not one of [{}]", value, choices),
                    ));
                }
            }
            Schema::AnyOf(branches) => {
                let matched = branches
                    .iter()
                    .any(|branch| branch.validate(value).is_valid());
                if !matched {
                    out.push(SchemaViolation::new(
                        path,
                        "value does not match any of the allowed schemas",
                    ));
                }
            }
            Schema::AllOf(parts) => {
                for part in parts {
                    part.check(value, path, out);
                }
            }
            Schema::Length { min, max } => {
                if let Value::String(text) = value {
                    let length = text.chars().count() as u64;
                    if min.is_some_and(|min| length < min) || max.is_some_and(|max| length > max) {
                        out.push(SchemaViolation::new(
                            path,
                            format!(
                                "string of length {} is outside [{}, {}]",
                                length,
                                min.unwrap_or(0),
                                max.map(|m| m.to_string()).unwrap_or_else(|| "inf".to_string())
                            ),
                        ));
                    }
                }
            }
            Schema::Range(range) => {
                if let Some(message) = value.as_f64().and_then(|n| range.violation(n)) {
                    out.push(SchemaViolation::new(path, message));
                }
            }
        }
    }
}

impl ObjectSchema {
    fn check(&self, fields: &Map<String, Value>, path: &str, out: &mut Vec<SchemaViolation>) {
        for name in &self.required {
            if !fields.contains_key(name) {
                out.push(SchemaViolation::new(
                    path,
                    format!("missing required property '{}'", name),
                ));
            }
        }

        for (name, field) in fields {
            let field_path = format!("{}.{}", path, name);
            match self.properties.get(name) {
                Some(schema) => schema.check(field, &field_path, out),
                None => match &self.additional {
                    AdditionalProperties::Allowed => {}
                    AdditionalProperties::Forbidden => out.push(SchemaViolation::new(
                        path,
                        format!("unexpected property '{}'", name),
                    )),
                    AdditionalProperties::Matching(schema) => {
                        schema.check(field, &field_path, out)
                    }
                },
            }
        }
    }
}

fn expect(ok: bool, expected: &str, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
    if !ok {
        out.push(SchemaViolation::new(
            path,
            format!("expected {}, found {}", expected, type_name(value)),
        ));
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compile_object(map: &Map<String, Value>) -> Schema {
    let mut parts = Vec::new();

    match map.get("type") {
        Some(Value::String(name)) => parts.push(compile_type(name, map)),
        Some(Value::Array(names)) => {
            let branches: Vec<Schema> = names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| compile_type(name, map))
                .collect();
            if !branches.is_empty() {
                parts.push(Schema::AnyOf(branches));
            }
        }
        _ => {
            if map.contains_key("properties") || map.contains_key("required") {
                parts.push(compile_type("object", map));
            } else if map.contains_key("items") {
                parts.push(compile_type("array", map));
            }
        }
    }

    if let Some(Value::Array(allowed)) = map.get("enum") {
        parts.push(Schema::Enum(allowed.clone()));
    }
    if let Some(constant) = map.get("const") {
        parts.push(Schema::Enum(vec![constant.clone()]));
    }

    let min_length = map.get("minLength").and_then(Value::as_u64);
    let max_length = map.get("maxLength").and_then(Value::as_u64);
    if min_length.is_some() || max_length.is_some() {
        parts.push(Schema::Length {
            min: min_length,
            max: max_length,
        });
    }
    if let Some(range) = NumberRange::from_keywords(map) {
        parts.push(Schema::Range(range));
    }

    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = map.get(keyword) {
            parts.push(Schema::AnyOf(branches.iter().map(Schema::compile).collect()));
        }
    }
    if let Some(Value::Array(all)) = map.get("allOf") {
        parts.push(Schema::AllOf(all.iter().map(Schema::compile).collect()));
    }

    match parts.len() {
        0 => Schema::Any,
        1 => parts.remove(0),
        _ => Schema::AllOf(parts),
    }
}

fn compile_type(name: &str, map: &Map<String, Value>) -> Schema {
    match name {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "integer" => Schema::Integer,
        "number" => Schema::Number,
        "string" => Schema::String,
        "array" => Schema::Array(map.get("items").map(|items| Box::new(Schema::compile(items)))),
        "object" => {
            let properties = map
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, schema)| (name.clone(), Schema::compile(schema)))
                        .collect()
                })
                .unwrap_or_default();
            let required = map
                .get("required")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let additional = match map.get("additionalProperties") {
                Some(Value::Bool(false)) => AdditionalProperties::Forbidden,
                Some(schema @ Value::Object(_)) => {
                    AdditionalProperties::Matching(Box::new(Schema::compile(schema)))
                }
                _ => AdditionalProperties::Allowed,
            };
            Schema::Object(ObjectSchema {
                properties,
                required,
                additional,
            })
        }
        _ => Schema::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Schema {
        Schema::compile(&json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["query"]
        }))
    }

    #[test]
    fn test_accepts_matching_arguments() {
        let schema = search_schema();
        assert!(schema.validate(&json!({"query": "rust"})).is_valid());
        assert!(schema.validate(&json!({"query": "rust", "limit": 5})).is_valid());
        // Additional properties are allowed unless the schema forbids them
        assert!(schema.validate(&json!({"query": "rust", "extra": true})).is_valid());
    }

    #[test]
    fn test_reports_missing_required_property() {
        let result = search_schema().validate(&json!({"badField": 1}));
        let violations = result.into_result().unwrap_err();
        assert_eq!(
            violations,
            vec![SchemaViolation::new("$", "missing required property 'query'")]
        );
    }

    #[test]
    fn test_reports_wrong_types_with_paths() {
        let result = search_schema().validate(&json!({"query": 42, "limit": 2.5}));
        let violations = result.into_result().unwrap_err();
        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&SchemaViolation::new(
            "$.query",
            "expected string, found number"
        )));
        assert!(violations.contains(&SchemaViolation::new(
            "$.limit",
            "expected integer, found number"
        )));
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let result = search_schema().validate(&json!(["query"]));
        assert_eq!(
            result,
            ValidationResult::Invalid(vec![SchemaViolation::new(
                "$",
                "expected object, found array"
            )])
        );
    }

    #[test]
    fn test_forbidden_additional_properties() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "additionalProperties": false
        }));
        let violations = schema
            .validate(&json!({"path": "/tmp", "mode": "rw"}))
            .into_result()
            .unwrap_err();
        assert_eq!(violations[0].message, "unexpected property 'mode'");
    }

    #[test]
    fn test_nested_arrays_and_enums() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "order": {"type": "string", "enum": ["asc", "desc"]}
            }
        }));

        assert!(schema
            .validate(&json!({"tags": ["a", "b"], "order": "asc"}))
            .is_valid());

        let violations = schema
            .validate(&json!({"tags": ["a", 3], "order": "sideways"}))
            .into_result()
            .unwrap_err();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].path, "$.order");
        assert_eq!(violations[1].path, "$.tags[1]");
    }

    #[test]
    fn test_type_unions_and_any_of() {
        let nullable = Schema::compile(&json!({"type": ["string", "null"]}));
        assert!(nullable.validate(&json!(null)).is_valid());
        assert!(nullable.validate(&json!("x")).is_valid());
        assert!(!nullable.validate(&json!(1)).is_valid());

        let any_of = Schema::compile(&json!({"anyOf": [{"type": "integer"}, {"type": "boolean"}]}));
        assert!(any_of.validate(&json!(true)).is_valid());
        assert!(!any_of.validate(&json!("nope")).is_valid());
    }

    #[test]
    fn test_unknown_or_missing_schema_is_permissive() {
        assert_eq!(Schema::compile(&json!({})), Schema::Any);
        assert_eq!(Schema::compile(&json!({"$ref": "#/defs/x"})), Schema::Any);
        assert!(Schema::compile(&json!(null)).validate(&json!({"a": 1})).is_valid());
        assert!(!Schema::compile(&json!(false)).validate(&json!({})).is_valid());
    }

    #[test]
    fn test_integral_floats_count_as_integers() {
        let schema = Schema::compile(&json!({"type": "integer"}));
        assert!(schema.validate(&json!(3.0)).is_valid());
        assert!(schema.validate(&json!(-4)).is_valid());
    }

    #[test]
    fn test_string_and_number_bounds() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1, "maxLength": 5},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                "ratio": {"type": "number", "exclusiveMinimum": 0}
            }
        }));

        assert!(schema.validate(&json!({"query": "héllo", "limit": 50, "ratio": 0.5})).is_valid());

        let violations = schema
            .validate(&json!({"query": "", "limit": 51, "ratio": 0}))
            .into_result()
            .unwrap_err();
        let mut paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, ["$.limit", "$.query", "$.ratio"]);
        let limit = violations.iter().find(|v| v.path == "$.limit").unwrap();
        assert!(limit.message.contains("maximum"));
    }

    #[test]
    fn test_bounds_ignore_values_of_other_types() {
        let schema = Schema::compile(&json!({"minLength": 3, "minimum": 10}));
        assert!(schema.validate(&json!(true)).is_valid());
        assert!(schema.validate(&json!("long enough")).is_valid());
        assert!(!schema.validate(&json!("ab")).is_valid());
        assert!(!schema.validate(&json!(2)).is_valid());
    }
}
