#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Romancal is a calibration pipeline for exposures from the Wide Field
//! Instrument (WFI) of the Nancy Grace Roman Space Telescope.
//!
//! Exposures are schema-validated [`datamodels`], stored in ASDF files. The
//! [`steps`] each apply one correction, consulting reference files found
//! through a [`references::ReferenceProvider`], and the [`pipeline`] chains
//! them from level 1 resultants to a flat fielded count rate image.
//!
//! # Examples
//!
//! Calibrating a level 1 exposure with the reference files in a directory
//!
//! ```rust
//! use romancal::{
//!     datamodels::{maker::mk_level1_science_raw, DataModel},
//!     pipeline::{ExposurePipeline, PipelineContext},
//!     references::LocalReferenceStore,
//!     steps::{Step, StepContextBuilder},
//! };
//! use std::sync::Arc;
//! use tempfile::tempdir;
//!
//! // an empty reference directory, so every step is skipped
//! let ref_dir = tempdir().unwrap();
//! let step_ctx = StepContextBuilder::default()
//!     .references(Arc::new(LocalReferenceStore::open(ref_dir.path()).unwrap()))
//!     .draw_progress(false)
//!     .build()
//!     .unwrap();
//!
//! let pipeline = ExposurePipeline::new(PipelineContext::default());
//! let raw = mk_level1_science_raw((4, 8, 8));
//! let result = pipeline.process(raw.into_any(), &step_ctx).unwrap();
//! assert_eq!(result.class_name(), "RampModel");
//! ```

use std::{collections::HashMap, sync::Mutex, time::Duration};

pub use ndarray;

pub mod datamodels;
pub mod error;
pub use error::RomanCalError;
pub mod io;
pub mod pipeline;
pub mod references;
pub mod steps;
pub mod stpipe;

cfg_if::cfg_if! {
    if #[cfg(feature = "cli")] {
        pub mod cli;
        pub use cli::RomancalContext;
    }
}

#[cfg(test)]
pub(crate) mod test_common;

lazy_static::lazy_static! {
    static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Add `duration` to the running total for `name`.
pub fn increment_duration(name: &str, duration: Duration) {
    if let Ok(mut durations) = DURATIONS.lock() {
        *durations.entry(name.to_string()).or_insert(Duration::ZERO) += duration;
    }
}

/// A copy of the running totals of every timed operation.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .map(|durations| durations.clone())
        .unwrap_or_default()
}

#[macro_export]
/// Time an expression and increment the timer given by the name in the table of durations
macro_rules! with_increment_duration {
    ($name:expr, $e:expr) => {{
        let _now = std::time::Instant::now();
        let _res = $e;
        $crate::increment_duration($name, _now.elapsed());
        _res
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_increment_duration() {
        let result = with_increment_duration!("test_timer", 2 + 2);
        assert_eq!(result, 4);
        with_increment_duration!("test_timer", std::thread::sleep(Duration::from_millis(1)));
        assert!(get_durations()["test_timer"] >= Duration::from_millis(1));
    }
}
