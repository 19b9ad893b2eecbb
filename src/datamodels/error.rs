//! Errors that can occur while building, validating, reading or writing data models

use super::{array::DType, schema::ValidationError};
use crate::io::error::IOError;
use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur in the datamodels module
pub enum ModelError {
    /// The tree does not conform to the model's schema
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The file backing the model could not be read or written
    #[error(transparent)]
    IO(#[from] IOError),

    /// Typed metadata could not be converted to or from the tree
    #[error("could not convert metadata: {0}")]
    Metadata(#[from] serde_yaml::Error),

    /// A datatype name that is not supported
    #[error("unknown array datatype {name}")]
    UnknownDType {
        /// The name found
        name: String,
    },

    /// An array does not have the expected element type
    #[error("array {field} has datatype {found}, expected {expected}")]
    DTypeMismatch {
        /// The name of the array
        field: String,
        /// The dtype the model requires
        expected: DType,
        /// The dtype that was found
        found: DType,
    },

    /// An array could not take the required shape or dimensionality
    #[error("array {field} has the wrong shape: {source}")]
    ArrayShape {
        /// The name of the array
        field: String,
        /// The underlying ndarray error
        source: ndarray::ShapeError,
    },

    /// Block data does not match the declared shape
    #[error("{dtype} array of shape {shape:?} needs {expected} bytes, found {found}")]
    ArrayByteCount {
        /// The dtype of the array
        dtype: DType,
        /// The declared shape
        shape: Vec<usize>,
        /// The number of bytes required
        expected: usize,
        /// The number of bytes available
        found: usize,
    },

    /// A required top-level field is absent from the tree
    #[error("{model} is missing required field {field}")]
    MissingField {
        /// The model class being decoded
        model: &'static str,
        /// The field that is absent
        field: String,
    },

    /// A field holds the wrong kind of node
    #[error("{model}.{field} should be {expected}")]
    WrongNodeKind {
        /// The model class being decoded
        model: &'static str,
        /// The offending field
        field: String,
        /// What kind of node was expected
        expected: &'static str,
    },

    /// A tree node could not be represented
    #[error("invalid tree node at {path}: {message}")]
    InvalidNode {
        /// Dotted path to the node
        path: String,
        /// What is wrong with it
        message: String,
    },

    /// The tag URI does not name a known model
    #[error("unknown model tag {tag}")]
    UnknownTag {
        /// The tag URI
        tag: String,
    },

    /// The tag names a known model, but a version this crate does not support
    #[error("unsupported version {found} of {name}, expected {expected}")]
    UnsupportedVersion {
        /// The tag name
        name: String,
        /// The supported version
        expected: &'static str,
        /// The version in the tag
        found: String,
    },

    /// A model of one type was found where another was required
    #[error("expected a {expected}, found a {found}")]
    WrongModelType {
        /// The class name required
        expected: &'static str,
        /// The class name found
        found: &'static str,
    },

    /// Promotion found an array in the target where the input has something else
    #[error("cannot merge non-array input into array field {key}")]
    ArrayMerge {
        /// The top-level key
        key: String,
    },
}
