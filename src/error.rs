//! Errors that can occur in romancal

use crate::{
    datamodels::{ModelError, ValidationError},
    io::error::IOError,
    references::ReferenceError,
    steps::StepError,
};
use thiserror::Error;

/// Errors in command line arguments or parameter files.
#[derive(Error, Debug)]
pub enum CLIError {
    /// Error for when an argument does not have the expected value
    #[error("Invalid Command Line Argument: --{option}: expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The argument name within the function
        option: String,
        /// The argument value that was expected
        expected: String,
        /// The argument value that was received instead
        received: String,
    },

    /// Error for when a parameter file cannot be used
    #[error("couldn't read parameters from {path}: {message}")]
    InvalidConfig {
        /// The parameter file
        path: String,
        /// What is wrong
        message: String,
    },
}

/// An enum of all the errors possible in romancal
#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum RomanCalError {
    /// Error derived from [`crate::datamodels::ModelError`]
    #[error(transparent)]
    ModelError(#[from] ModelError),

    /// Error derived from [`crate::datamodels::ValidationError`]
    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    /// Error derived from [`crate::io::error::IOError`]
    #[error(transparent)]
    IOError(#[from] IOError),

    /// Error derived from [`crate::steps::StepError`]
    #[error(transparent)]
    StepError(#[from] StepError),

    /// Error derived from [`crate::references::ReferenceError`]
    #[error(transparent)]
    ReferenceError(#[from] ReferenceError),

    /// Error derived from [`CLIError`]
    #[error(transparent)]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    /// Requested a dry run, nothing was processed
    #[error("Dry run")]
    DryRun {},
}
