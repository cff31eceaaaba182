//! Structural model of tool input schemas.
//!
//! Servers describe tool parameters with JSON Schema. We parse the subset MCP
//! servers actually emit into a [`Schema`] tree once, when the tool list is
//! enumerated, and validate call arguments against that tree before anything
//! goes over the wire.
//!
//! Supported keywords: `type` (single or list), `properties`, `required`,
//! `additionalProperties`, `items`, `minItems`, `maxItems`, `minLength`,
//! `maxLength`, `minimum`, `maximum`, `exclusiveMinimum`, `exclusiveMaximum`,
//! `enum`, `const`, `anyOf`, `oneOf`, `allOf`. Other keywords are ignored.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A parsed parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Accepts every value.
    Any,
    /// Accepts nothing (`false` schema).
    Never,
    Null,
    Boolean,
    Integer(NumberRules),
    Number(NumberRules),
    String(StringRules),
    Array(ArrayRules),
    Object(ObjectRules),
    Enum(Vec<Value>),
    Const(Value),
    /// At least one branch must match (`anyOf`, `oneOf`, type lists).
    AnyOf(Vec<Schema>),
    /// Every branch must match.
    AllOf(Vec<Schema>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberRules {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayRules {
    pub items: Option<Box<Schema>>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRules {
    pub properties: BTreeMap<String, Schema>,
    pub required: Vec<String>,
    pub additional: AdditionalProperties,
}

/// What to do with object members not named in `properties`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AdditionalProperties {
    #[default]
    Allowed,
    Forbidden,
    Schema(Box<Schema>),
}

/// A schema document we could not make sense of.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

/// A value that does not satisfy its schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {message}")]
pub struct Violation {
    /// Path to the offending value (`root`, `root.query`, `root.items[2]`).
    pub path: String,
    pub message: String,
}

fn violation(path: &str, message: impl Into<String>) -> Violation {
    Violation {
        path: path.to_string(),
        message: message.into(),
    }
}

fn schema_error(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError {
        path: path.to_string(),
        message: message.into(),
    }
}

impl Schema {
    /// Parse a JSON Schema document.
    pub fn parse(doc: &Value) -> Result<Schema, SchemaError> {
        parse_at(doc, "root")
    }

    /// Check `value` against this schema, reporting the first violation.
    pub fn validate(&self, value: &Value) -> Result<(), Violation> {
        self.check(value, "root")
    }

    fn check(&self, value: &Value, path: &str) -> Result<(), Violation> {
        match self {
            Schema::Any => Ok(()),
            Schema::Never => Err(violation(path, "no value is allowed here")),
            Schema::Null => expect_type(value.is_null(), "null", value, path),
            Schema::Boolean => expect_type(value.is_boolean(), "boolean", value, path),
            Schema::Integer(rules) => {
                expect_type(is_integer(value), "integer", value, path)?;
                check_number(rules, value, path)
            }
            Schema::Number(rules) => {
                expect_type(value.is_number(), "number", value, path)?;
                check_number(rules, value, path)
            }
            Schema::String(rules) => {
                let Some(s) = value.as_str() else {
                    return expect_type(false, "string", value, path);
                };
                let len = s.chars().count();
                if let Some(min) = rules.min_length.filter(|min| len < *min) {
                    return Err(violation(path, format!("string shorter than {min} characters")));
                }
                if let Some(max) = rules.max_length.filter(|max| len > *max) {
                    return Err(violation(path, format!("string longer than {max} characters")));
                }
                Ok(())
            }
            Schema::Array(rules) => {
                let Some(items) = value.as_array() else {
                    return expect_type(false, "array", value, path);
                };
                if let Some(min) = rules.min_items.filter(|min| items.len() < *min) {
                    return Err(violation(path, format!("expected at least {min} items")));
                }
                if let Some(max) = rules.max_items.filter(|max| items.len() > *max) {
                    return Err(violation(path, format!("expected at most {max} items")));
                }
                if let Some(item_schema) = &rules.items {
                    for (i, item) in items.iter().enumerate() {
                        item_schema.check(item, &format!("{path}[{i}]"))?;
                    }
                }
                Ok(())
            }
            Schema::Object(rules) => {
                let Some(members) = value.as_object() else {
                    return expect_type(false, "object", value, path);
                };
                check_object(rules, members, path)
            }
            Schema::Enum(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(violation(
                        path,
                        format!("value must be one of: {}", Value::Array(allowed.clone())),
                    ))
                }
            }
            Schema::Const(expected) => {
                if value == expected {
                    Ok(())
                } else {
                    Err(violation(path, format!("value must equal {expected}")))
                }
            }
            Schema::AnyOf(branches) => {
                if branches.iter().any(|b| b.check(value, path).is_ok()) {
                    Ok(())
                } else {
                    Err(violation(path, "value does not match any allowed schema"))
                }
            }
            Schema::AllOf(parts) => parts.iter().try_for_each(|p| p.check(value, path)),
        }
    }
}

fn check_object(
    rules: &ObjectRules,
    members: &Map<String, Value>,
    path: &str,
) -> Result<(), Violation> {
    for name in &rules.required {
        if !members.contains_key(name) {
            return Err(violation(path, format!("missing required property '{name}'")));
        }
    }
    for (name, member) in members {
        let member_path = format!("{path}.{name}");
        match rules.properties.get(name) {
            Some(schema) => schema.check(member, &member_path)?,
            None => match &rules.additional {
                AdditionalProperties::Allowed => {}
                AdditionalProperties::Forbidden => {
                    return Err(violation(path, format!("unexpected property '{name}'")));
                }
                AdditionalProperties::Schema(schema) => schema.check(member, &member_path)?,
            },
        }
    }
    Ok(())
}

fn check_number(rules: &NumberRules, value: &Value, path: &str) -> Result<(), Violation> {
    let Some(n) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = rules.minimum.filter(|min| n < *min) {
        return Err(violation(path, format!("must be >= {min}")));
    }
    if let Some(max) = rules.maximum.filter(|max| n > *max) {
        return Err(violation(path, format!("must be <= {max}")));
    }
    if let Some(min) = rules.exclusive_minimum.filter(|min| n <= *min) {
        return Err(violation(path, format!("must be > {min}")));
    }
    if let Some(max) = rules.exclusive_maximum.filter(|max| n >= *max) {
        return Err(violation(path, format!("must be < {max}")));
    }
    Ok(())
}

fn expect_type(ok: bool, expected: &str, value: &Value, path: &str) -> Result<(), Violation> {
    if ok {
        Ok(())
    } else {
        Err(violation(
            path,
            format!("expected type {expected}, got {}", type_name(value)),
        ))
    }
}

/// `1.0` counts as an integer, as it does in JSON Schema.
fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_at(doc: &Value, path: &str) -> Result<Schema, SchemaError> {
    let obj = match doc {
        Value::Bool(true) => return Ok(Schema::Any),
        Value::Bool(false) => return Ok(Schema::Never),
        Value::Object(obj) => obj,
        _ => return Err(schema_error(path, "schema must be an object or a boolean")),
    };

    let mut parts = Vec::new();

    match obj.get("type") {
        Some(Value::String(name)) => parts.push(parse_typed(name, obj, path)?),
        Some(Value::Array(names)) => {
            let branches = names
                .iter()
                .map(|n| match n.as_str() {
                    Some(name) => parse_typed(name, obj, path),
                    None => Err(schema_error(path, "type list must contain strings")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            parts.push(Schema::AnyOf(branches));
        }
        Some(_) => return Err(schema_error(path, "type must be a string or a list of strings")),
        None if obj.contains_key("properties") || obj.contains_key("required") => {
            parts.push(parse_typed("object", obj, path)?);
        }
        None if obj.contains_key("items") => parts.push(parse_typed("array", obj, path)?),
        None => {}
    }

    if let Some(values) = obj.get("enum") {
        let Some(values) = values.as_array() else {
            return Err(schema_error(path, "enum must be a list"));
        };
        parts.push(Schema::Enum(values.clone()));
    }
    if let Some(value) = obj.get("const") {
        parts.push(Schema::Const(value.clone()));
    }
    for keyword in ["anyOf", "oneOf"] {
        if let Some(branches) = obj.get(keyword) {
            parts.push(Schema::AnyOf(parse_list(branches, &format!("{path}.{keyword}"))?));
        }
    }
    if let Some(branches) = obj.get("allOf") {
        parts.extend(parse_list(branches, &format!("{path}.allOf"))?);
    }

    Ok(match parts.len() {
        0 => Schema::Any,
        1 => parts.remove(0),
        _ => Schema::AllOf(parts),
    })
}

fn parse_list(branches: &Value, path: &str) -> Result<Vec<Schema>, SchemaError> {
    let Some(branches) = branches.as_array() else {
        return Err(schema_error(path, "expected a list of schemas"));
    };
    branches
        .iter()
        .enumerate()
        .map(|(i, b)| parse_at(b, &format!("{path}[{i}]")))
        .collect()
}

fn parse_typed(name: &str, obj: &Map<String, Value>, path: &str) -> Result<Schema, SchemaError> {
    Ok(match name {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "integer" => Schema::Integer(number_rules(obj)),
        "number" => Schema::Number(number_rules(obj)),
        "string" => Schema::String(StringRules {
            min_length: usize_keyword(obj, "minLength"),
            max_length: usize_keyword(obj, "maxLength"),
        }),
        "array" => Schema::Array(ArrayRules {
            items: match obj.get("items") {
                // Tuple form: validate nothing per-position
                Some(Value::Array(_)) | None => None,
                Some(items) => Some(Box::new(parse_at(items, &format!("{path}.items"))?)),
            },
            min_items: usize_keyword(obj, "minItems"),
            max_items: usize_keyword(obj, "maxItems"),
        }),
        "object" => Schema::Object(parse_object(obj, path)?),
        other => {
            tracing::debug!("Unknown schema type '{other}' at {path}, accepting any value");
            Schema::Any
        }
    })
}

fn parse_object(obj: &Map<String, Value>, path: &str) -> Result<ObjectRules, SchemaError> {
    let mut rules = ObjectRules::default();

    match obj.get("properties") {
        Some(Value::Object(props)) => {
            for (name, doc) in props {
                rules
                    .properties
                    .insert(name.clone(), parse_at(doc, &format!("{path}.{name}"))?);
            }
        }
        Some(_) => return Err(schema_error(path, "properties must be an object")),
        None => {}
    }

    match obj.get("required") {
        Some(Value::Array(names)) => {
            for name in names {
                let Some(name) = name.as_str() else {
                    return Err(schema_error(path, "required must list property names"));
                };
                rules.required.push(name.to_string());
            }
        }
        Some(_) => return Err(schema_error(path, "required must be a list")),
        None => {}
    }

    rules.additional = match obj.get("additionalProperties") {
        None | Some(Value::Bool(true)) => AdditionalProperties::Allowed,
        Some(Value::Bool(false)) => AdditionalProperties::Forbidden,
        Some(doc) => AdditionalProperties::Schema(Box::new(parse_at(
            doc,
            &format!("{path}.additionalProperties"),
        )?)),
    };

    Ok(rules)
}

fn number_rules(obj: &Map<String, Value>) -> NumberRules {
    let f = |key: &str| obj.get(key).and_then(Value::as_f64);
    NumberRules {
        minimum: f("minimum"),
        maximum: f("maximum"),
        exclusive_minimum: f("exclusiveMinimum"),
        exclusive_maximum: f("exclusiveMaximum"),
    }
}

fn usize_keyword(obj: &Map<String, Value>, key: &str) -> Option<usize> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}
