//! Maps tag URIs to model types, and schema URIs to the embedded schema documents.

use super::{error::ModelError, schema::Schema};
use crate::references::RefType;
use lazy_static::lazy_static;
use regex::Regex;
use std::{collections::HashMap, fmt::Display};

/// Prefix of every model tag URI.
pub const TAG_PREFIX: &str = "asdf://stsci.edu/datamodels/roman/tags/";
/// Prefix of every schema URI.
pub const SCHEMA_PREFIX: &str = "asdf://stsci.edu/datamodels/roman/schemas/";
/// The schema every exposure model's metadata references.
pub const COMMON_SCHEMA: &str = "asdf://stsci.edu/datamodels/roman/schemas/common-1.0.0";
/// The schema every reference model's metadata references.
pub const REF_COMMON_SCHEMA: &str =
    "asdf://stsci.edu/datamodels/roman/schemas/reference_files/ref_common-1.0.0";

/// The kinds of data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelType {
    /// Level 1 uncalibrated resultants
    ScienceRaw,
    /// Resultants with data quality, the input of most ramp steps
    Ramp,
    /// Level 2 rate image
    Image,
    /// Dark current reference
    Dark,
    /// Flat field reference
    Flat,
    /// Gain reference
    Gain,
    /// Classic non-linearity reference
    Linearity,
    /// Bad pixel mask reference
    Mask,
    /// Read noise reference
    ReadNoise,
    /// Saturation threshold reference
    Saturation,
}

impl ModelType {
    /// Every model type.
    pub const ALL: [ModelType; 10] = [
        ModelType::ScienceRaw,
        ModelType::Ramp,
        ModelType::Image,
        ModelType::Dark,
        ModelType::Flat,
        ModelType::Gain,
        ModelType::Linearity,
        ModelType::Mask,
        ModelType::ReadNoise,
        ModelType::Saturation,
    ];

    /// The tag name, relative to [`TAG_PREFIX`] and without a version.
    pub fn tag_name(&self) -> &'static str {
        match self {
            ModelType::ScienceRaw => "wfi_science_raw",
            ModelType::Ramp => "ramp",
            ModelType::Image => "wfi_image",
            ModelType::Dark => "reference_files/dark",
            ModelType::Flat => "reference_files/flat",
            ModelType::Gain => "reference_files/gain",
            ModelType::Linearity => "reference_files/linearity",
            ModelType::Mask => "reference_files/mask",
            ModelType::ReadNoise => "reference_files/readnoise",
            ModelType::Saturation => "reference_files/saturation",
        }
    }

    /// The supported schema version.
    pub fn version(&self) -> &'static str {
        "1.0.0"
    }

    /// The full tag URI, e.g. `asdf://stsci.edu/datamodels/roman/tags/ramp-1.0.0`.
    pub fn tag_uri(&self) -> String {
        format!("{}{}-{}", TAG_PREFIX, self.tag_name(), self.version())
    }

    /// The full schema URI.
    pub fn schema_uri(&self) -> String {
        format!("{}{}-{}", SCHEMA_PREFIX, self.tag_name(), self.version())
    }

    /// The class name recorded in `meta.model_type`.
    pub fn class_name(&self) -> &'static str {
        match self {
            ModelType::ScienceRaw => "ScienceRawModel",
            ModelType::Ramp => "RampModel",
            ModelType::Image => "ImageModel",
            ModelType::Dark => "DarkRefModel",
            ModelType::Flat => "FlatRefModel",
            ModelType::Gain => "GainRefModel",
            ModelType::Linearity => "LinearityRefModel",
            ModelType::Mask => "MaskRefModel",
            ModelType::ReadNoise => "ReadnoiseRefModel",
            ModelType::Saturation => "SaturationRefModel",
        }
    }

    /// The reference file type, for reference models.
    pub fn reftype(&self) -> Option<RefType> {
        match self {
            ModelType::Dark => Some(RefType::Dark),
            ModelType::Flat => Some(RefType::Flat),
            ModelType::Gain => Some(RefType::Gain),
            ModelType::Linearity => Some(RefType::Linearity),
            ModelType::Mask => Some(RefType::Mask),
            ModelType::ReadNoise => Some(RefType::ReadNoise),
            ModelType::Saturation => Some(RefType::Saturation),
            ModelType::ScienceRaw | ModelType::Ramp | ModelType::Image => None,
        }
    }

    /// Whether this is a reference file model.
    pub fn is_reference(&self) -> bool {
        self.reftype().is_some()
    }

    /// Find the model type a tag URI names.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownTag`] if the URI is malformed or names no model
    /// - [`ModelError::UnsupportedVersion`] if the version is not supported
    pub fn from_tag(tag: &str) -> Result<Self, ModelError> {
        lazy_static! {
            static ref RE_TAG: Regex = Regex::new(
                r"^asdf://stsci\.edu/datamodels/roman/tags/(?P<name>(?:reference_files/)?[a-z_]+)-(?P<version>\d+\.\d+\.\d+)$"
            )
            .unwrap();
        }
        let tag = tag.trim_start_matches('!');
        let captures = RE_TAG.captures(tag).ok_or_else(|| ModelError::UnknownTag {
            tag: tag.to_string(),
        })?;
        let name = &captures["name"];
        let version = &captures["version"];
        let model_type = Self::ALL
            .into_iter()
            .find(|model_type| model_type.tag_name() == name)
            .ok_or_else(|| ModelError::UnknownTag {
                tag: tag.to_string(),
            })?;
        if version != model_type.version() {
            return Err(ModelError::UnsupportedVersion {
                name: name.to_string(),
                expected: model_type.version(),
                found: version.to_string(),
            });
        }
        Ok(model_type)
    }

    /// Find the model type with a given class name.
    pub fn from_class_name(class_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|model_type| model_type.class_name() == class_name)
    }
}

impl Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// Embedded schema documents, keyed by their `id` once parsed.
const SCHEMA_SOURCES: [&str; 12] = [
    include_str!("../../schemas/common-1.0.0.yaml"),
    include_str!("../../schemas/wfi_science_raw-1.0.0.yaml"),
    include_str!("../../schemas/ramp-1.0.0.yaml"),
    include_str!("../../schemas/wfi_image-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/ref_common-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/dark-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/flat-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/gain-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/linearity-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/mask-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/readnoise-1.0.0.yaml"),
    include_str!("../../schemas/reference_files/saturation-1.0.0.yaml"),
];

lazy_static! {
    static ref SCHEMAS: HashMap<String, Schema> = SCHEMA_SOURCES
        .iter()
        .map(|source| {
            let schema = Schema::from_yaml(source).expect("embedded schema is malformed");
            let id = schema.id.clone().expect("embedded schema has no id");
            (id, schema)
        })
        .collect();
}

/// Look up a schema by URI.
pub fn get_schema(uri: &str) -> Option<&'static Schema> {
    SCHEMAS.get(uri)
}

/// URIs of every known schema.
pub fn schema_uris() -> Vec<&'static str> {
    let mut uris: Vec<&str> = SCHEMAS.keys().map(String::as_str).collect();
    uris.sort_unstable();
    uris
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_model_has_a_schema() {
        for model_type in ModelType::ALL {
            let schema = get_schema(&model_type.schema_uri())
                .unwrap_or_else(|| panic!("no schema for {model_type}"));
            assert_eq!(schema.id.as_deref(), Some(model_type.schema_uri().as_str()));
        }
    }

    #[test]
    fn test_every_reference_resolves() {
        for uri in schema_uris() {
            for reference in get_schema(uri).unwrap().references() {
                assert!(
                    get_schema(reference).is_some(),
                    "{uri} references unknown {reference}"
                );
            }
        }
    }

    #[test]
    fn test_meta_references_common_schema() {
        for model_type in ModelType::ALL {
            let schema = get_schema(&model_type.schema_uri()).unwrap();
            let meta = &schema.properties["meta"];
            let expected = if model_type.is_reference() {
                REF_COMMON_SCHEMA
            } else {
                COMMON_SCHEMA
            };
            assert!(
                meta.all_of
                    .iter()
                    .any(|sub| sub.reference.as_deref() == Some(expected)),
                "{model_type} meta does not reference {expected}"
            );
        }
    }

    #[test]
    fn test_from_tag() {
        for model_type in ModelType::ALL {
            assert_eq!(ModelType::from_tag(&model_type.tag_uri()).unwrap(), model_type);
        }
        assert_eq!(
            ModelType::from_tag("!asdf://stsci.edu/datamodels/roman/tags/ramp-1.0.0").unwrap(),
            ModelType::Ramp
        );
        assert_eq!(
            ModelType::Flat.tag_uri(),
            "asdf://stsci.edu/datamodels/roman/tags/reference_files/flat-1.0.0"
        );
    }

    #[test]
    fn test_from_tag_errors() {
        assert!(matches!(
            ModelType::from_tag("asdf://stsci.edu/datamodels/roman/tags/guidewindow-1.0.0"),
            Err(ModelError::UnknownTag { .. })
        ));
        assert!(matches!(
            ModelType::from_tag("tag:stsci.edu:asdf/core/ndarray-1.0.0"),
            Err(ModelError::UnknownTag { .. })
        ));
        assert!(matches!(
            ModelType::from_tag("asdf://stsci.edu/datamodels/roman/tags/ramp-2.0.0"),
            Err(ModelError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_class_names() {
        assert_eq!(ModelType::Flat.class_name(), "FlatRefModel");
        assert_eq!(
            ModelType::from_class_name("RampModel"),
            Some(ModelType::Ramp)
        );
        assert_eq!(ModelType::Ramp.reftype(), None);
        assert_eq!(ModelType::Mask.reftype(), Some(RefType::Mask));
    }
}
