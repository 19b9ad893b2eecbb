//! Schema documents and validation of model trees against them.
//!
//! Schemas are YAML documents using a subset of JSON Schema, extended with
//! `ndarray` and `time` types and the `datatype` / `ndim` array constraints.

use super::{array::DType, meta::parse_isot, node::Node, registry::get_schema};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// A tree failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed at {path}: {message}")]
pub struct ValidationError {
    /// Dotted path to the offending node, rooted at `roman`
    pub path: String,
    /// What is wrong
    pub message: String,
}

impl ValidationError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// The `type` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// a mapping
    Object,
    /// a string
    String,
    /// an integer
    Integer,
    /// an integer or a float
    Number,
    /// a boolean
    Boolean,
    /// a list
    Array,
    /// an n-dimensional array
    Ndarray,
    /// a string holding an ISO-8601 UTC time
    Time,
}

/// A schema document, or a sub-schema within one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    /// The schema's URI, top-level documents only
    #[serde(default)]
    pub id: Option<String>,
    /// Short title
    #[serde(default)]
    pub title: Option<String>,
    /// Longer description
    #[serde(default)]
    pub description: Option<String>,
    /// Required node kind
    #[serde(default, rename = "type")]
    pub schema_type: Option<SchemaType>,
    /// Sub-schemas for mapping entries
    #[serde(default)]
    pub properties: BTreeMap<String, Schema>,
    /// Mapping entries that must be present
    #[serde(default)]
    pub required: Vec<String>,
    /// The only values the node may take
    #[serde(default, rename = "enum")]
    pub allowed: Option<Vec<serde_yaml::Value>>,
    /// Schemas the node must also satisfy
    #[serde(default, rename = "allOf")]
    pub all_of: Vec<Schema>,
    /// URI of another schema the node must satisfy
    #[serde(default, rename = "$ref")]
    pub reference: Option<String>,
    /// Schema for every item of a list
    #[serde(default)]
    pub items: Option<Box<Schema>>,
    /// Required element type of an ndarray
    #[serde(default)]
    pub datatype: Option<DType>,
    /// Required dimensionality of an ndarray
    #[serde(default)]
    pub ndim: Option<usize>,
    /// Inclusive lower bound of a number
    #[serde(default)]
    pub minimum: Option<f64>,
    /// Inclusive upper bound of a number
    #[serde(default)]
    pub maximum: Option<f64>,
}

impl Schema {
    /// Parse a schema document.
    ///
    /// # Errors
    ///
    /// Will return a [`serde_yaml::Error`] if the document is not a valid schema.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Every `$ref` URI in this schema and its sub-schemas.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.reference.iter().map(String::as_str).collect();
        for sub in self
            .all_of
            .iter()
            .chain(self.properties.values())
            .chain(self.items.as_deref())
        {
            refs.extend(sub.references());
        }
        refs
    }

    /// Check `node` against this schema. `path` locates `node` for error messages.
    ///
    /// # Errors
    ///
    /// Will return the first [`ValidationError`] found.
    pub fn check(&self, node: &Node, path: &str) -> Result<(), ValidationError> {
        if let Some(uri) = &self.reference {
            let target = get_schema(uri)
                .ok_or_else(|| ValidationError::new(path, format!("unresolved $ref {uri}")))?;
            target.check(node, path)?;
        }
        for sub in &self.all_of {
            sub.check(node, path)?;
        }
        if let Some(schema_type) = self.schema_type {
            self.check_type(schema_type, node, path)?;
        }
        if let Some(allowed) = &self.allowed {
            let matched = allowed
                .iter()
                .filter_map(|value| Node::from_value(value.clone()).ok())
                .any(|value| &value == node);
            if !matched {
                return Err(ValidationError::new(
                    path,
                    format!("{} is not one of {}", describe(node), describe_allowed(allowed)),
                ));
            }
        }
        self.check_bounds(node, path)?;
        if let Node::Map(map) = node {
            for key in &self.required {
                if !map.contains_key(key) {
                    return Err(ValidationError::new(
                        path,
                        format!("required property {key} is missing"),
                    ));
                }
            }
            for (key, sub) in &self.properties {
                if let Some(child) = map.get(key) {
                    sub.check(child, &format!("{path}.{key}"))?;
                }
            }
        }
        Ok(())
    }

    fn check_type(
        &self,
        schema_type: SchemaType,
        node: &Node,
        path: &str,
    ) -> Result<(), ValidationError> {
        let ok = match (schema_type, node) {
            (SchemaType::Object, Node::Map(_))
            | (SchemaType::String, Node::Str(_))
            | (SchemaType::Integer, Node::Int(_))
            | (SchemaType::Number, Node::Int(_) | Node::Float(_))
            | (SchemaType::Boolean, Node::Bool(_)) => true,
            (SchemaType::Array, Node::List(items)) => {
                if let Some(item_schema) = &self.items {
                    for (idx, item) in items.iter().enumerate() {
                        item_schema.check(item, &format!("{path}.{idx}"))?;
                    }
                }
                true
            }
            (SchemaType::Ndarray, Node::Array(array)) => {
                if let Some(datatype) = self.datatype {
                    if array.dtype() != datatype {
                        return Err(ValidationError::new(
                            path,
                            format!("datatype {} is not {}", array.dtype(), datatype),
                        ));
                    }
                }
                if let Some(ndim) = self.ndim {
                    if array.ndim() != ndim {
                        return Err(ValidationError::new(
                            path,
                            format!("array has {} dimensions, expected {}", array.ndim(), ndim),
                        ));
                    }
                }
                true
            }
            (SchemaType::Time, Node::Str(time)) => {
                parse_isot(time).map_err(|message| ValidationError::new(path, message))?;
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::new(
                path,
                format!("{} is not of type {:?}", node.kind(), schema_type),
            ))
        }
    }

    fn check_bounds(&self, node: &Node, path: &str) -> Result<(), ValidationError> {
        let value = match node {
            Node::Int(i) => *i as f64,
            Node::Float(f) => *f,
            _ => return Ok(()),
        };
        if let Some(minimum) = self.minimum {
            if value < minimum {
                return Err(ValidationError::new(
                    path,
                    format!("{value} is less than the minimum of {minimum}"),
                ));
            }
        }
        if let Some(maximum) = self.maximum {
            if value > maximum {
                return Err(ValidationError::new(
                    path,
                    format!("{value} is greater than the maximum of {maximum}"),
                ));
            }
        }
        Ok(())
    }
}

fn describe(node: &Node) -> String {
    match node {
        Node::Str(s) => format!("'{s}'"),
        Node::Int(i) => i.to_string(),
        Node::Float(f) => f.to_string(),
        Node::Bool(b) => b.to_string(),
        other => other.kind().to_string(),
    }
}

fn describe_allowed(allowed: &[serde_yaml::Value]) -> String {
    let names: Vec<String> = allowed
        .iter()
        .map(|value| match value {
            serde_yaml::Value::String(s) => format!("'{s}'"),
            other => format!("{other:?}"),
        })
        .collect();
    format!("[{}]", names.join(", "))
}

/// Validate a model tree against the schema with the given URI.
///
/// The tree is addressed as `roman` in error paths.
///
/// # Errors
///
/// Will return a [`ValidationError`] if the schema is unknown or the tree violates it.
pub fn validate(node: &Node, schema_uri: &str) -> Result<(), ValidationError> {
    let schema = get_schema(schema_uri)
        .ok_or_else(|| ValidationError::new("roman", format!("unknown schema {schema_uri}")))?;
    schema.check(node, "roman")
}
