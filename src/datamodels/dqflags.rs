//! Roman data quality flag bits.
//!
//! Pixel flags are `u32` and live in `pixeldq` / `dq` arrays. Group flags are
//! the low-byte subset that applies to individual resultants and live in `groupdq`.

/// Bad pixel. Do not use.
pub const DO_NOT_USE: u32 = 1 << 0;
/// Pixel saturated during exposure
pub const SATURATED: u32 = 1 << 1;
/// Jump detected during exposure
pub const JUMP_DET: u32 = 1 << 2;
/// Data lost in transmission
pub const DROPOUT: u32 = 1 << 3;
/// Data affected by the GW read window
pub const GW_AFFECTED_DATA: u32 = 1 << 4;
/// High persistence
pub const PERSISTENCE: u32 = 1 << 5;
/// Below A/D floor
pub const AD_FLOOR: u32 = 1 << 6;
/// Flagged by outlier detection
pub const OUTLIER: u32 = 1 << 7;
/// Uncertainty exceeds quoted error
pub const UNRELIABLE_ERROR: u32 = 1 << 8;
/// Pixel not on science portion of detector
pub const NON_SCIENCE: u32 = 1 << 9;
/// Dead pixel
pub const DEAD: u32 = 1 << 10;
/// Hot pixel
pub const HOT: u32 = 1 << 11;
/// Warm pixel
pub const WARM: u32 = 1 << 12;
/// Low quantum efficiency
pub const LOW_QE: u32 = 1 << 13;
/// Telegraph pixel
pub const TELEGRAPH: u32 = 1 << 15;
/// Pixel highly nonlinear
pub const NONLINEAR: u32 = 1 << 16;
/// Reference pixel cannot be used
pub const BAD_REF_PIXEL: u32 = 1 << 17;
/// Flat field cannot be measured
pub const NO_FLAT_FIELD: u32 = 1 << 18;
/// Gain cannot be measured
pub const NO_GAIN_VALUE: u32 = 1 << 19;
/// Linearity correction not available
pub const NO_LIN_CORR: u32 = 1 << 20;
/// Saturation check not available
pub const NO_SAT_CHECK: u32 = 1 << 21;
/// Bias variance large
pub const UNRELIABLE_BIAS: u32 = 1 << 22;
/// Dark variance large
pub const UNRELIABLE_DARK: u32 = 1 << 23;
/// Slope variance large (i.e., noisy pixel)
pub const UNRELIABLE_SLOPE: u32 = 1 << 24;
/// Flat variance large
pub const UNRELIABLE_FLAT: u32 = 1 << 25;
/// Sensitive to reset anomaly
pub const UNRELIABLE_RESET: u32 = 1 << 27;
/// A catch-all flag
pub const OTHER_BAD_PIXEL: u32 = 1 << 28;
/// Pixel is a reference pixel
pub const REFERENCE_PIXEL: u32 = 1 << 31;

/// Flags that can be set on individual resultants.
pub mod group {
    /// Bad resultant. Do not use.
    pub const DO_NOT_USE: u8 = super::DO_NOT_USE as u8;
    /// Resultant at or above saturation
    pub const SATURATED: u8 = super::SATURATED as u8;
    /// Jump detected in this resultant
    pub const JUMP_DET: u8 = super::JUMP_DET as u8;
    /// Resultant lost in transmission
    pub const DROPOUT: u8 = super::DROPOUT as u8;
    /// Resultant below the A/D floor
    pub const AD_FLOOR: u8 = super::AD_FLOOR as u8;
}

/// Names of all pixel flags, in bit order.
pub const PIXEL_FLAGS: [(&str, u32); 28] = [
    ("DO_NOT_USE", DO_NOT_USE),
    ("SATURATED", SATURATED),
    ("JUMP_DET", JUMP_DET),
    ("DROPOUT", DROPOUT),
    ("GW_AFFECTED_DATA", GW_AFFECTED_DATA),
    ("PERSISTENCE", PERSISTENCE),
    ("AD_FLOOR", AD_FLOOR),
    ("OUTLIER", OUTLIER),
    ("UNRELIABLE_ERROR", UNRELIABLE_ERROR),
    ("NON_SCIENCE", NON_SCIENCE),
    ("DEAD", DEAD),
    ("HOT", HOT),
    ("WARM", WARM),
    ("LOW_QE", LOW_QE),
    ("TELEGRAPH", TELEGRAPH),
    ("NONLINEAR", NONLINEAR),
    ("BAD_REF_PIXEL", BAD_REF_PIXEL),
    ("NO_FLAT_FIELD", NO_FLAT_FIELD),
    ("NO_GAIN_VALUE", NO_GAIN_VALUE),
    ("NO_LIN_CORR", NO_LIN_CORR),
    ("NO_SAT_CHECK", NO_SAT_CHECK),
    ("UNRELIABLE_BIAS", UNRELIABLE_BIAS),
    ("UNRELIABLE_DARK", UNRELIABLE_DARK),
    ("UNRELIABLE_SLOPE", UNRELIABLE_SLOPE),
    ("UNRELIABLE_FLAT", UNRELIABLE_FLAT),
    ("UNRELIABLE_RESET", UNRELIABLE_RESET),
    ("OTHER_BAD_PIXEL", OTHER_BAD_PIXEL),
    ("REFERENCE_PIXEL", REFERENCE_PIXEL),
];

/// The names of the flags set in `value`.
pub fn flag_names(value: u32) -> Vec<&'static str> {
    PIXEL_FLAGS
        .iter()
        .filter(|(_, bit)| value & bit != 0)
        .map(|(name, _)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_flags_match_pixel_flags() {
        assert_eq!(group::DO_NOT_USE as u32, DO_NOT_USE);
        assert_eq!(group::SATURATED as u32, SATURATED);
        assert_eq!(group::AD_FLOOR as u32, AD_FLOOR);
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(flag_names(0), Vec::<&str>::new());
        assert_eq!(
            flag_names(DO_NOT_USE | NO_FLAT_FIELD),
            vec!["DO_NOT_USE", "NO_FLAT_FIELD"]
        );
    }
}
