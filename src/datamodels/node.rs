//! The untyped tree every data model serialises to, and the promotion merge rule.

use super::{array::NdArray, error::ModelError};
use log::debug;
use ndarray::{Array, Dimension};
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml::{Mapping, Number, Value};
use std::collections::BTreeMap;

/// A mapping node. Keys are kept sorted so serialised trees are stable.
pub type Map = BTreeMap<String, Node>;

/// A node in a data model tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// An absent value
    Null,
    /// A boolean
    Bool(bool),
    /// An integer
    Int(i64),
    /// A floating point number
    Float(f64),
    /// A string
    Str(String),
    /// A sequence of nodes
    List(Vec<Node>),
    /// A mapping of names to nodes
    Map(Map),
    /// An n-dimensional array
    Array(NdArray),
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

impl Node {
    /// A short name for the kind of node, used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Int(_) => "integer",
            Node::Float(_) => "number",
            Node::Str(_) => "string",
            Node::List(_) => "array",
            Node::Map(_) => "object",
            Node::Array(_) => "ndarray",
        }
    }

    /// Build a tree from any serializable value, e.g. a metadata struct.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::Metadata`] if `value` cannot be serialized.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ModelError> {
        Self::from_value(serde_yaml::to_value(value)?)
    }

    /// Deserialize this tree into a typed value.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidNode`] if the tree contains arrays
    /// - [`ModelError::Metadata`] if the tree does not fit `T`
    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T, ModelError> {
        Ok(serde_yaml::from_value(self.to_value()?)?)
    }

    /// Convert a YAML value. Tags are dropped, non-string keys are an error.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::InvalidNode`] for mapping keys that are not strings.
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        Self::from_value_at(value, "")
    }

    fn from_value_at(value: Value, path: &str) -> Result<Self, ModelError> {
        Ok(match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Self::from_number(&n, path)?,
            Value::String(s) => Node::Str(s),
            Value::Sequence(seq) => Node::List(
                seq.into_iter()
                    .enumerate()
                    .map(|(idx, item)| Self::from_value_at(item, &join_path(path, &idx.to_string())))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(mapping) => {
                let mut map = Map::new();
                for (key, item) in mapping {
                    let key = match key {
                        Value::String(key) => key,
                        other => {
                            return Err(ModelError::InvalidNode {
                                path: path.to_string(),
                                message: format!("mapping key {other:?} is not a string"),
                            })
                        }
                    };
                    let item = Self::from_value_at(item, &join_path(path, &key))?;
                    map.insert(key, item);
                }
                Node::Map(map)
            }
            Value::Tagged(tagged) => Self::from_value_at(tagged.value, path)?,
        })
    }

    /// Convert a YAML number, preferring integers.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::InvalidNode`] if the number fits neither i64 nor f64.
    pub fn from_number(number: &Number, path: &str) -> Result<Self, ModelError> {
        if let Some(int) = number.as_i64() {
            Ok(Node::Int(int))
        } else if let Some(float) = number.as_f64() {
            Ok(Node::Float(float))
        } else {
            Err(ModelError::InvalidNode {
                path: path.to_string(),
                message: format!("number {number} is out of range"),
            })
        }
    }

    /// Convert to a YAML value.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::InvalidNode`] if the tree contains arrays,
    /// which have no plain YAML form.
    pub fn to_value(&self) -> Result<Value, ModelError> {
        self.to_value_at("")
    }

    fn to_value_at(&self, path: &str) -> Result<Value, ModelError> {
        Ok(match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::Number((*i).into()),
            Node::Float(f) => Value::Number((*f).into()),
            Node::Str(s) => Value::String(s.clone()),
            Node::List(items) => Value::Sequence(
                items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| item.to_value_at(&join_path(path, &idx.to_string())))
                    .collect::<Result<_, _>>()?,
            ),
            Node::Map(map) => {
                let mut mapping = Mapping::new();
                for (key, item) in map {
                    mapping.insert(
                        Value::String(key.clone()),
                        item.to_value_at(&join_path(path, key))?,
                    );
                }
                Value::Mapping(mapping)
            }
            Node::Array(_) => {
                return Err(ModelError::InvalidNode {
                    path: path.to_string(),
                    message: "arrays cannot be converted to plain values".into(),
                })
            }
        })
    }

    /// Look up a node by dotted path, e.g. `meta.instrument.detector`.
    pub fn get_path(&self, path: &str) -> Option<&Node> {
        path.split('.')
            .filter(|key| !key.is_empty())
            .try_fold(self, |node, key| node.as_map()?.get(key))
    }

    /// Mutable lookup by dotted path.
    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Node> {
        path.split('.')
            .filter(|key| !key.is_empty())
            .try_fold(self, |node, key| node.as_map_mut()?.get_mut(key))
    }

    /// The mapping, if this is a mapping node.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The mutable mapping, if this is a mapping node.
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The string, if this is a string node.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The array, if this is an array node.
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Node::Array(array) => Some(array),
            _ => None,
        }
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::Bool(value)
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Int(value)
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Node::Float(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Str(value.to_string())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Str(value)
    }
}

impl From<Map> for Node {
    fn from(value: Map) -> Self {
        Node::Map(value)
    }
}

impl From<NdArray> for Node {
    fn from(value: NdArray) -> Self {
        Node::Array(value)
    }
}

impl<T: super::array::Element, D: Dimension> From<Array<T, D>> for Node {
    fn from(value: Array<T, D>) -> Self {
        Node::Array(value.into())
    }
}

/// Merge the top-level fields of `input` into `target`, the way a model of
/// one type is promoted into another.
///
/// For each key of `input`:
/// - a mapping in both trees is updated shallowly, so entries of the target
///   mapping that the input lacks survive
/// - an array in the target receives the input array cast to the target's
///   dtype, keeping the input's shape
/// - anything else replaces the target value
///
/// Keys the target does not have are carried over as they are.
///
/// # Errors
///
/// - [`ModelError::InvalidNode`] if either tree is not a mapping
/// - [`ModelError::ArrayMerge`] if the target holds an array and the input does not
pub fn merge_into(target: &mut Node, input: Node) -> Result<(), ModelError> {
    let input = match input {
        Node::Map(input) => input,
        other => {
            return Err(ModelError::InvalidNode {
                path: String::new(),
                message: format!("cannot merge a {} into a model", other.kind()),
            })
        }
    };
    let target = target.as_map_mut().ok_or_else(|| ModelError::InvalidNode {
        path: String::new(),
        message: "merge target is not a mapping".into(),
    })?;

    for (key, value) in input {
        match target.get_mut(&key) {
            Some(slot) => match (slot, value) {
                (Node::Map(existing), Node::Map(update)) => existing.extend(update),
                (Node::Array(existing), Node::Array(array)) => {
                    *existing = array.astype(existing.dtype());
                }
                (Node::Array(_), _) => return Err(ModelError::ArrayMerge { key }),
                (slot, value) => *slot = value,
            },
            None => {
                debug!("carrying input field {key} that the target model does not define");
                target.insert(key, value);
            }
        }
    }
    Ok(())
}
