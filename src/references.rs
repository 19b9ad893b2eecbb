//! Reference file lookup.
//!
//! Steps ask a [`ReferenceProvider`] for the best reference file of a given
//! [`RefType`] for an exposure. [`LocalReferenceStore`] indexes a directory of
//! reference files by reading only their YAML headers.

use crate::{
    datamodels::{
        meta::{Meta, RefMeta, NOT_APPLICABLE},
        registry::ModelType,
        ModelError,
    },
    io::{asdf::read_header, error::IOError, list_asdf_files},
};
use hifitime::Epoch;
use log::{debug, trace, warn};
use serde::Deserialize;
use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

/// Errors that can occur while looking up reference files.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// The reference directory could not be listed
    #[error("couldn't index reference directory {dir}: {source}")]
    Index {
        /// The directory
        dir: String,
        /// The cause
        source: IOError,
    },

    /// The reference type name is not known
    #[error("unknown reference type {0}, expected one of dark, flat, gain, linearity, mask, readnoise, saturation")]
    UnknownRefType(String),

    /// An override points at a file that does not exist
    #[error("override for {reftype} refers to {path}, which does not exist")]
    MissingOverride {
        /// The reference type
        reftype: RefType,
        /// The path given
        path: String,
    },

    /// A reference file could not be opened
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// The kinds of reference file steps can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    /// Dark current
    Dark,
    /// Flat field
    Flat,
    /// Gain, electrons per DN
    Gain,
    /// Classic non-linearity coefficients
    Linearity,
    /// Bad pixel mask
    Mask,
    /// Read noise
    #[serde(rename = "readnoise")]
    ReadNoise,
    /// Saturation thresholds
    Saturation,
}

impl RefType {
    /// All reference types, alphabetically.
    pub const ALL: [RefType; 7] = [
        RefType::Dark,
        RefType::Flat,
        RefType::Gain,
        RefType::Linearity,
        RefType::Mask,
        RefType::ReadNoise,
        RefType::Saturation,
    ];

    /// Lower case name, as used in `meta.ref_file` and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            RefType::Dark => "dark",
            RefType::Flat => "flat",
            RefType::Gain => "gain",
            RefType::Linearity => "linearity",
            RefType::Mask => "mask",
            RefType::ReadNoise => "readnoise",
            RefType::Saturation => "saturation",
        }
    }

    /// Upper case name, as stored in `meta.reftype` of a reference file.
    pub fn keyword(&self) -> &'static str {
        match self {
            RefType::Dark => "DARK",
            RefType::Flat => "FLAT",
            RefType::Gain => "GAIN",
            RefType::Linearity => "LINEARITY",
            RefType::Mask => "MASK",
            RefType::ReadNoise => "READNOISE",
            RefType::Saturation => "SATURATION",
        }
    }

    /// The model that holds this kind of reference file.
    pub fn model_type(&self) -> ModelType {
        match self {
            RefType::Dark => ModelType::Dark,
            RefType::Flat => ModelType::Flat,
            RefType::Gain => ModelType::Gain,
            RefType::Linearity => ModelType::Linearity,
            RefType::Mask => ModelType::Mask,
            RefType::ReadNoise => ModelType::ReadNoise,
            RefType::Saturation => ModelType::Saturation,
        }
    }

    /// Whether selection must also match the exposure's optical element.
    pub fn depends_on_optical_element(&self) -> bool {
        matches!(self, RefType::Flat)
    }

    /// The command line option that overrides this reference type.
    pub fn override_arg(&self) -> &'static str {
        match self {
            RefType::Dark => "override-dark",
            RefType::Flat => "override-flat",
            RefType::Gain => "override-gain",
            RefType::Linearity => "override-linearity",
            RefType::Mask => "override-mask",
            RefType::ReadNoise => "override-readnoise",
            RefType::Saturation => "override-saturation",
        }
    }
}

impl Display for RefType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for RefType {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|reftype| reftype.name() == lower)
            .ok_or_else(|| ReferenceError::UnknownRefType(s.to_string()))
    }
}

/// A user supplied replacement for reference file selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum RefOverride {
    /// Use this file
    Path(PathBuf),
    /// Use no file, which skips the step
    NotApplicable,
}

impl FromStr for RefOverride {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case(NOT_APPLICABLE) {
            RefOverride::NotApplicable
        } else {
            RefOverride::Path(PathBuf::from(s))
        })
    }
}

impl TryFrom<String> for RefOverride {
    type Error = std::convert::Infallible;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Display for RefOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefOverride::Path(path) => write!(f, "{}", path.display()),
            RefOverride::NotApplicable => write!(f, "{NOT_APPLICABLE}"),
        }
    }
}

/// Something that can choose reference files for an exposure.
pub trait ReferenceProvider: Send + Sync {
    /// The best reference file of type `reftype` for the exposure described
    /// by `meta`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Will return an error if the lookup itself fails.
    fn get_reference_file(
        &self,
        meta: &Meta,
        reftype: RefType,
    ) -> Result<Option<PathBuf>, ReferenceError>;
}

/// A provider that never has a reference file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferences;

impl ReferenceProvider for NoReferences {
    fn get_reference_file(
        &self,
        _meta: &Meta,
        _reftype: RefType,
    ) -> Result<Option<PathBuf>, ReferenceError> {
        Ok(None)
    }
}

/// What the store knows about one reference file.
#[derive(Debug, Clone, PartialEq)]
pub struct RefEntry {
    /// Path of the file
    pub path: PathBuf,
    /// Kind of reference file, from the file's tag
    pub reftype: RefType,
    /// Instrument name, e.g. `WFI`
    pub instrument: String,
    /// Detector, e.g. `WFI01`
    pub detector: String,
    /// Optical element, for reference types that depend on it
    pub optical_element: Option<String>,
    /// The earliest exposure start time this file applies to
    pub useafter: Epoch,
}

impl RefEntry {
    fn matches(&self, meta: &Meta, reftype: RefType, start_time: Epoch) -> bool {
        self.reftype == reftype
            && self.instrument == meta.instrument.name
            && self.detector == meta.instrument.detector
            && (!reftype.depends_on_optical_element()
                || self.optical_element.as_deref() == Some(meta.instrument.optical_element.as_str()))
            && self.useafter <= start_time
    }
}

/// A directory of reference files, indexed by their metadata.
#[derive(Debug, Clone, Default)]
pub struct LocalReferenceStore {
    /// The indexed files, sorted by path
    pub entries: Vec<RefEntry>,
}

fn read_entry(path: &Path) -> Result<RefEntry, String> {
    let header = read_header(path).map_err(|e| e.to_string())?;
    let model_type = ModelType::from_tag(&header.tag).map_err(|e| e.to_string())?;
    let reftype = model_type
        .reftype()
        .ok_or_else(|| format!("{} is not a reference file model", model_type.class_name()))?;
    let meta = header
        .tree
        .get("meta")
        .cloned()
        .ok_or_else(|| "no meta".to_string())?;
    let meta: RefMeta = serde_yaml::from_value(meta).map_err(|e| e.to_string())?;
    Ok(RefEntry {
        path: path.to_path_buf(),
        reftype,
        instrument: meta.instrument.name,
        detector: meta.instrument.detector,
        optical_element: meta.instrument.optical_element,
        useafter: meta.useafter,
    })
}

impl LocalReferenceStore {
    /// Index every `.asdf` file in `dir`. Files that are not readable
    /// reference files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Will return [`ReferenceError::Index`] if `dir` cannot be listed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ReferenceError> {
        let dir = dir.as_ref();
        let paths = list_asdf_files(dir).map_err(|source| ReferenceError::Index {
            dir: dir.display().to_string(),
            source,
        })?;
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            match read_entry(&path) {
                Ok(entry) => {
                    trace!("indexed {} as {}", path.display(), entry.reftype);
                    entries.push(entry);
                }
                Err(message) => warn!("ignoring {}: {}", path.display(), message),
            }
        }
        debug!(
            "indexed {} reference files in {}",
            entries.len(),
            dir.display()
        );
        Ok(Self { entries })
    }
}

impl ReferenceProvider for LocalReferenceStore {
    fn get_reference_file(
        &self,
        meta: &Meta,
        reftype: RefType,
    ) -> Result<Option<PathBuf>, ReferenceError> {
        let start_time = meta.exposure.start_time;
        // latest useafter wins, ties go to the first path
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.matches(meta, reftype, start_time))
            .fold(None::<&RefEntry>, |best, entry| match best {
                Some(best) if best.useafter >= entry.useafter => Some(best),
                _ => Some(entry),
            })
            .map(|entry| entry.path.clone()))
    }
}
