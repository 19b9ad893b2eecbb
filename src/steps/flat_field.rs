//! Flat field correction of count rate images.

use super::{error::check_shape, set_status, skip_step, Step, StepContext, StepError};
use crate::{
    datamodels::{dqflags, meta::StepStatus, AnyModel, FlatRefModel, ImageModel},
    ndarray::Zip,
    references::RefType,
};
use log::{trace, warn};

#[inline]
fn usable_flat(value: f32) -> bool {
    value > 0.0 && value.is_finite()
}

/// Divide an image by a flat, in place.
///
/// Variances are scaled by the square of the flat, and the flat's own error
/// is added into `err`. Pixels where the flat is NaN or not positive are left
/// undivided and get [`dqflags::NO_FLAT_FIELD`]. `flat.dq` is ORed into the
/// image's dq.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if the flat and image differ in shape.
pub fn apply_flat(image: &mut ImageModel, flat: &FlatRefModel) -> Result<(), StepError> {
    let shape = image.data.shape().to_vec();
    check_shape("flat.data", "apply_flat", &shape, flat.data.shape())?;
    check_shape("flat.err", "apply_flat", &shape, flat.err.shape())?;
    check_shape("flat.dq", "apply_flat", &shape, flat.dq.shape())?;
    trace!("start apply_flat");

    Zip::from(&mut image.data)
        .and(&mut image.err)
        .and(&mut image.var_poisson)
        .and(&mut image.var_rnoise)
        .and(&flat.data)
        .and(&flat.err)
        .par_for_each(|value, err, var_poisson, var_rnoise, &flat, &flat_err| {
            if !usable_flat(flat) {
                return;
            }
            let flat_squared = flat * flat;
            *value /= flat;
            *var_poisson /= flat_squared;
            *var_rnoise /= flat_squared;
            let var_flat = *value * *value / flat_squared * flat_err * flat_err;
            *err = (*var_poisson + *var_rnoise + var_flat).sqrt();
        });
    Zip::from(&mut image.dq)
        .and(&flat.data)
        .and(&flat.dq)
        .par_for_each(|flags, &flat, &flat_flags| {
            *flags |= flat_flags;
            if !usable_flat(flat) {
                *flags |= dqflags::NO_FLAT_FIELD;
            }
        });
    Ok(())
}

/// Flat field a count rate image using the `flat` reference file.
///
/// Ramps and level 1 exposures have no count rates to correct, so they are
/// passed through with the step marked skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatFieldStep;

impl Step for FlatFieldStep {
    fn class_name(&self) -> &'static str {
        "FlatFieldStep"
    }

    fn alias(&self) -> &'static str {
        "flat_field"
    }

    fn cal_step(&self) -> Option<&'static str> {
        Some("flat_field")
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        vec![RefType::Flat]
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        let mut image = match input {
            AnyModel::Image(image) => image,
            mut other @ (AnyModel::Ramp(_) | AnyModel::ScienceRaw(_)) => {
                warn!(
                    "{} needs count rates, but got a {}.",
                    self.class_name(),
                    other.class_name()
                );
                if let Some(meta) = other.science_meta_mut() {
                    skip_step(meta, self.class_name(), "flat_field");
                }
                return Ok(other);
            }
            other => {
                return Err(StepError::UnsupportedInput {
                    step: self.class_name(),
                    model: other.class_name(),
                })
            }
        };
        match ctx.load_reference::<FlatRefModel>(&mut image.meta, self.class_name())? {
            Some(flat) => {
                apply_flat(&mut image, &flat)?;
                set_status(&mut image.meta, "flat_field", StepStatus::Complete);
            }
            None => skip_step(&mut image.meta, self.class_name(), "flat_field"),
        }
        Ok(AnyModel::Image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datamodels::{maker::*, DataModel, RampModel},
        steps::tests::context_with,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_apply_flat() {
        let mut image = mk_level2_image((1, 3));
        image.data = array![[10.0, 10.0, 10.0]];
        image.var_poisson = array![[4.0, 4.0, 4.0]];
        image.var_rnoise = array![[1.0, 1.0, 1.0]];
        let mut flat = mk_flat((1, 3));
        flat.data = array![[2.0, 0.0, f32::NAN]];
        flat.err = array![[0.1, 0.1, 0.1]];
        flat.dq = array![[dqflags::LOW_QE, 0, 0]];

        apply_flat(&mut image, &flat).unwrap();

        assert_abs_diff_eq!(image.data[[0, 0]], 5.0);
        assert_abs_diff_eq!(image.var_poisson[[0, 0]], 1.0);
        assert_abs_diff_eq!(image.var_rnoise[[0, 0]], 0.25);
        // 5^2 / 4 * 0.01
        assert_abs_diff_eq!(image.err[[0, 0]], (1.25_f32 + 0.0625).sqrt(), epsilon = 1e-6);
        assert_eq!(image.dq[[0, 0]], dqflags::LOW_QE);

        assert_eq!(image.data[[0, 1]], 10.0);
        assert_eq!(image.data[[0, 2]], 10.0);
        assert_eq!(image.dq[[0, 1]], dqflags::NO_FLAT_FIELD);
        assert_eq!(image.dq[[0, 2]], dqflags::NO_FLAT_FIELD);
    }

    #[test]
    fn test_flat_field_step() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("flat.asdf");
        let mut flat = mk_flat((2, 2));
        flat.data.fill(0.5);
        flat.write_to(&path).unwrap();

        let mut image = mk_level2_image((2, 2));
        image.data.fill(3.0);
        let ctx = context_with(BTreeMap::from([(RefType::Flat, path)]));
        let result = FlatFieldStep.process(image.into_any(), &ctx).unwrap();
        let image = ImageModel::from_any(result).unwrap();

        assert_eq!(image.meta.cal_step.flat_field, StepStatus::Complete);
        assert!(image.data.iter().all(|&v| v == 6.0));
    }

    #[test]
    fn test_flat_field_step_passes_ramps_through() {
        let ctx = context_with(BTreeMap::new());
        let ramp = mk_ramp((2, 2, 2));
        let result = FlatFieldStep.process(ramp.clone().into_any(), &ctx).unwrap();
        let result = RampModel::from_any(result).unwrap();
        assert_eq!(result.meta.cal_step.flat_field, StepStatus::Skipped);
        assert_eq!(result.data, ramp.data);

        assert!(matches!(
            FlatFieldStep.process(mk_dark((2, 2, 2)).into_any(), &ctx),
            Err(StepError::UnsupportedInput { .. })
        ));
    }
}
