//! Errors that can occur in calibration steps

use crate::{datamodels::ModelError, references::ReferenceError};
use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur while running a step
pub enum StepError {
    /// An array argument does not have the shape the step needs
    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    /// The step cannot work on this kind of model
    #[error("{step} cannot process a {model}")]
    UnsupportedInput {
        /// The step class name
        step: &'static str,
        /// The class name of the input model
        model: &'static str,
    },

    /// Exposure metadata the step depends on is unusable
    #[error("{step} needs a usable {field}, found {value}")]
    InvalidMetadata {
        /// The step class name
        step: &'static str,
        /// Dotted path of the field
        field: &'static str,
        /// The value found
        value: String,
    },

    #[error(transparent)]
    /// Error derived from [`crate::datamodels::ModelError`]
    Model(#[from] ModelError),

    #[error(transparent)]
    /// Error derived from [`crate::references::ReferenceError`]
    Reference(#[from] ReferenceError),
}

/// Compare the shape of an array argument against the shape a function needs.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if they differ.
pub fn check_shape(
    argument: &str,
    function: &str,
    expected: &[usize],
    received: &[usize],
) -> Result<(), StepError> {
    if expected == received {
        Ok(())
    } else {
        Err(StepError::BadArrayShape {
            argument: argument.to_string(),
            function: function.to_string(),
            expected: format!("{expected:?}"),
            received: format!("{received:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape() {
        assert!(check_shape("mask", "apply_mask", &[2, 3], &[2, 3]).is_ok());
        match check_shape("mask", "apply_mask", &[2, 3], &[3, 2]) {
            Err(err @ StepError::BadArrayShape { .. }) => {
                assert_eq!(
                    err.to_string(),
                    "bad array shape supplied to argument mask of function apply_mask. expected [2, 3], received [3, 2]"
                );
            }
            other => panic!("expected BadArrayShape, got {other:?}"),
        }
    }
}
