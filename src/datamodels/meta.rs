//! Typed metadata shared by the data models.

use crate::references::RefType;
use hifitime::Epoch;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The value recorded for a reference file that was not used.
pub const NOT_APPLICABLE: &str = "N/A";

/// Format an epoch as an ISO-8601 UTC string.
///
/// Fractional seconds carry nanosecond precision, with trailing zeros trimmed
/// down to no fewer than three digits.
pub fn format_isot(epoch: &Epoch) -> String {
    let (y, mo, d, h, mi, s, ns) = epoch.to_gregorian_utc();
    let mut fraction = format!("{ns:09}");
    while fraction.len() > 3 && fraction.ends_with('0') {
        fraction.pop();
    }
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}.{fraction}")
}

/// Parse an ISO-8601 UTC string.
///
/// # Errors
///
/// Will return a description of the problem if `s` is not a valid time.
pub fn parse_isot(s: &str) -> Result<Epoch, String> {
    Epoch::from_gregorian_str(s).map_err(|e| format!("'{s}' is not a valid time: {e}"))
}

/// Serialize an [`Epoch`] as an ISO-8601 string, for `#[serde(with = "isot")]`.
pub mod isot {
    use super::{format_isot, parse_isot};
    use hifitime::Epoch;
    use serde::{Deserialize, Deserializer, Serializer};

    /// serializer
    ///
    /// # Errors
    ///
    /// propagates serializer errors
    pub fn serialize<S: Serializer>(epoch: &Epoch, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_isot(epoch))
    }

    /// deserializer
    ///
    /// # Errors
    ///
    /// fails if the string is not a valid time
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Epoch, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_isot(&s).map_err(serde::de::Error::custom)
    }
}

/// Whether a calibration step has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    /// Not run yet
    #[default]
    Incomplete,
    /// Applied
    Complete,
    /// Ran, but did nothing
    Skipped,
}

impl Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                StepStatus::Incomplete => "INCOMPLETE",
                StepStatus::Complete => "COMPLETE",
                StepStatus::Skipped => "SKIPPED",
            }
        )
    }
}

/// Status of each calibration step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalStep {
    /// Data quality initialisation
    pub dq_init: StepStatus,
    /// Saturation flagging
    pub saturation: StepStatus,
    /// Classic linearity correction
    pub linearity: StepStatus,
    /// Dark current subtraction
    pub dark: StepStatus,
    /// Ramp fitting
    pub ramp_fit: StepStatus,
    /// Flat fielding
    pub flat_field: StepStatus,
}

impl CalStep {
    /// The status field for a `cal_step` key such as `dark`.
    pub fn status_mut(&mut self, key: &str) -> Option<&mut StepStatus> {
        match key {
            "dq_init" => Some(&mut self.dq_init),
            "saturation" => Some(&mut self.saturation),
            "linearity" => Some(&mut self.linearity),
            "dark" => Some(&mut self.dark),
            "ramp_fit" => Some(&mut self.ramp_fit),
            "flat_field" => Some(&mut self.flat_field),
            _ => None,
        }
    }

    /// The status for a `cal_step` key.
    pub fn status(&self, key: &str) -> Option<StepStatus> {
        match key {
            "dq_init" => Some(self.dq_init),
            "saturation" => Some(self.saturation),
            "linearity" => Some(self.linearity),
            "dark" => Some(self.dark),
            "ramp_fit" => Some(self.ramp_fit),
            "flat_field" => Some(self.flat_field),
            _ => None,
        }
    }
}

/// Where the telescope was pointed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    /// Aperture name, e.g. `WFI_CEN`
    pub name: String,
    /// Position angle in degrees
    pub position_angle: f64,
}

/// Exposure timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    /// Exposure type, e.g. `WFI_IMAGE`
    #[serde(rename = "type")]
    pub exposure_type: String,
    /// UTC start of the exposure
    #[serde(with = "isot")]
    pub start_time: Epoch,
    /// UTC midpoint of the exposure
    #[serde(with = "isot")]
    pub mid_time: Epoch,
    /// UTC end of the exposure
    #[serde(with = "isot")]
    pub end_time: Epoch,
    /// Number of resultants in the ramp
    pub ngroups: u32,
    /// Number of frames averaged into each resultant
    pub nframes: u32,
    /// Seconds per frame
    pub frame_time: f64,
    /// Seconds per resultant
    pub group_time: f64,
    /// Total integration time in seconds
    pub exposure_time: f64,
    /// Name of the multi-accumulation table
    pub ma_table_name: String,
}

/// Instrument configuration of an exposure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WfiMode {
    /// Always `WFI`
    pub name: String,
    /// `WFI01` to `WFI18`
    pub detector: String,
    /// Filter or disperser
    pub optical_element: String,
}

/// Identifiers of the observation an exposure belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Full observation identifier
    pub obs_id: String,
    /// Visit identifier
    pub visit_id: String,
    /// Program number
    pub program: String,
    /// Execution plan number
    pub execution_plan: u32,
    /// Pass number
    pub pass: u32,
    /// Segment number
    pub segment: u32,
    /// Observation number
    pub observation: u32,
    /// Visit number
    pub visit: u32,
    /// Exposure number within the visit
    pub exposure: u32,
}

/// Reference-file-system bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crds {
    /// Version of the software that selected the files
    pub sw_version: String,
    /// Selection context, `local` for a reference directory
    pub context_used: String,
}

impl Default for Crds {
    fn default() -> Self {
        Self {
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
            context_used: "local".to_string(),
        }
    }
}

/// Which reference file each step used, `N/A` for none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefFile {
    /// How the files were selected
    pub crds: Crds,
    /// Dark
    pub dark: String,
    /// Flat
    pub flat: String,
    /// Gain
    pub gain: String,
    /// Linearity
    pub linearity: String,
    /// Mask
    pub mask: String,
    /// Read noise
    pub readnoise: String,
    /// Saturation
    pub saturation: String,
}

impl Default for RefFile {
    fn default() -> Self {
        Self {
            crds: Crds::default(),
            dark: NOT_APPLICABLE.into(),
            flat: NOT_APPLICABLE.into(),
            gain: NOT_APPLICABLE.into(),
            linearity: NOT_APPLICABLE.into(),
            mask: NOT_APPLICABLE.into(),
            readnoise: NOT_APPLICABLE.into(),
            saturation: NOT_APPLICABLE.into(),
        }
    }
}

impl RefFile {
    fn slot(&mut self, reftype: RefType) -> &mut String {
        match reftype {
            RefType::Dark => &mut self.dark,
            RefType::Flat => &mut self.flat,
            RefType::Gain => &mut self.gain,
            RefType::Linearity => &mut self.linearity,
            RefType::Mask => &mut self.mask,
            RefType::ReadNoise => &mut self.readnoise,
            RefType::Saturation => &mut self.saturation,
        }
    }

    /// Record the reference file used for `reftype`.
    pub fn set(&mut self, reftype: RefType, name: impl Into<String>) {
        *self.slot(reftype) = name.into();
    }

    /// The reference file recorded for `reftype`.
    pub fn get(&self, reftype: RefType) -> &str {
        match reftype {
            RefType::Dark => &self.dark,
            RefType::Flat => &self.flat,
            RefType::Gain => &self.gain,
            RefType::Linearity => &self.linearity,
            RefType::Mask => &self.mask,
            RefType::ReadNoise => &self.readnoise,
            RefType::Saturation => &self.saturation,
        }
    }
}

/// Metadata of a science exposure model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Version of the software that wrote the file
    pub calibration_software_version: String,
    /// File name the model was last written to
    pub filename: String,
    /// When the file was created
    #[serde(with = "isot")]
    pub file_date: Epoch,
    /// Class name of the model, rewritten on every write
    pub model_type: String,
    /// Institution that created the file
    pub origin: String,
    /// Always `ROMAN`
    pub telescope: String,
    /// Pointing aperture
    pub aperture: Aperture,
    /// Which steps have run
    pub cal_step: CalStep,
    /// Exposure timing
    pub exposure: Exposure,
    /// Instrument configuration
    pub instrument: WfiMode,
    /// Observation identifiers
    pub observation: Observation,
    /// Reference files used
    pub ref_file: RefFile,
}

/// Instrument a reference file applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefInstrument {
    /// Always `WFI`
    pub name: String,
    /// Detector the file applies to
    pub detector: String,
    /// Only set for reference files that depend on the optical element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optical_element: Option<String>,
}

/// Metadata of a reference file model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefMeta {
    /// e.g. `FLAT`
    pub reftype: String,
    /// e.g. `GROUND`, `DUMMY`
    pub pedigree: String,
    /// Free-text description
    pub description: String,
    /// Who made the file
    pub author: String,
    /// The earliest exposure start time this file applies to
    #[serde(with = "isot")]
    pub useafter: Epoch,
    /// Always `ROMAN`
    pub telescope: String,
    /// Institution that made the file
    pub origin: String,
    /// Instrument the file applies to
    pub instrument: RefInstrument,
}

/// Metadata that knows the model type it belongs to.
pub trait ModelMeta {
    /// Record the class name of the owning model. A no-op for metadata
    /// without a `model_type` field.
    fn set_model_type(&mut self, _class_name: &str) {}
}

impl ModelMeta for Meta {
    fn set_model_type(&mut self, class_name: &str) {
        self.model_type = class_name.to_string();
    }
}

impl ModelMeta for RefMeta {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isot_round_trip() {
        let epoch = Epoch::from_gregorian_utc(2020, 2, 1, 12, 30, 15, 250_000_000);
        let formatted = format_isot(&epoch);
        assert_eq!(formatted, "2020-02-01T12:30:15.250");
        assert_eq!(parse_isot(&formatted).unwrap(), epoch);
    }

    #[test]
    fn test_isot_sub_millisecond() {
        let epoch = Epoch::from_gregorian_utc(2020, 2, 1, 0, 0, 0, 123_456_000);
        let formatted = format_isot(&epoch);
        assert_eq!(formatted, "2020-02-01T00:00:00.123456");
        assert_eq!(parse_isot(&formatted).unwrap(), epoch);
        assert_eq!(
            format_isot(&Epoch::from_gregorian_utc(2020, 2, 1, 0, 0, 0, 7)),
            "2020-02-01T00:00:00.000000007"
        );
    }

    #[test]
    fn test_parse_isot_invalid() {
        assert!(parse_isot("not a time").is_err());
    }

    #[test]
    fn test_step_status_serde() {
        assert_eq!(
            serde_yaml::to_string(&StepStatus::Skipped).unwrap().trim(),
            "SKIPPED"
        );
        let status: StepStatus = serde_yaml::from_str("COMPLETE").unwrap();
        assert_eq!(status, StepStatus::Complete);
        assert_eq!(StepStatus::default(), StepStatus::Incomplete);
    }

    #[test]
    fn test_cal_step_keys() {
        let mut cal_step = CalStep::default();
        *cal_step.status_mut("dark").unwrap() = StepStatus::Complete;
        assert_eq!(cal_step.dark, StepStatus::Complete);
        assert_eq!(cal_step.status("dark"), Some(StepStatus::Complete));
        assert_eq!(cal_step.status("jump"), None);
    }

    #[test]
    fn test_ref_file_defaults() {
        let mut ref_file = RefFile::default();
        for reftype in RefType::ALL {
            assert_eq!(ref_file.get(reftype), NOT_APPLICABLE);
        }
        ref_file.set(RefType::Mask, "roman_wfi_mask_0001.asdf");
        assert_eq!(ref_file.mask, "roman_wfi_mask_0001.asdf");
    }

    #[test]
    fn test_ref_instrument_optional_element() {
        let instrument = RefInstrument {
            name: "WFI".into(),
            detector: "WFI01".into(),
            optical_element: None,
        };
        let yaml = serde_yaml::to_string(&instrument).unwrap();
        assert!(!yaml.contains("optical_element"));
    }
}
