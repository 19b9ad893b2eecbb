//! Data quality initialisation from a bad pixel mask.

use super::{error::check_shape, set_status, skip_step, to_ramp_model, Step, StepContext, StepError};
use crate::{
    datamodels::{meta::StepStatus, AnyModel, MaskRefModel},
    ndarray::{ArrayView2, ArrayViewMut2, Zip},
    references::RefType,
};
use log::trace;

/// OR the flags of a bad pixel mask into a pixel dq array.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if `mask` and `dq` differ in shape.
pub fn apply_mask(mut dq: ArrayViewMut2<u32>, mask: ArrayView2<u32>) -> Result<(), StepError> {
    check_shape("mask", "apply_mask", dq.shape(), mask.shape())?;
    trace!("start apply_mask");
    Zip::from(&mut dq)
        .and(&mask)
        .par_for_each(|flags, &mask_flags| *flags |= mask_flags);
    Ok(())
}

/// Initialise pixel data quality from the `mask` reference file.
///
/// Level 1 input is promoted to a ramp first. Image input has the mask
/// applied to its `dq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DQInitStep;

impl Step for DQInitStep {
    fn class_name(&self) -> &'static str {
        "DQInitStep"
    }

    fn alias(&self) -> &'static str {
        "dq_init"
    }

    fn cal_step(&self) -> Option<&'static str> {
        Some("dq_init")
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        vec![RefType::Mask]
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        if let AnyModel::Image(mut image) = input {
            match ctx.load_reference::<MaskRefModel>(&mut image.meta, self.class_name())? {
                Some(mask) => {
                    apply_mask(image.dq.view_mut(), mask.dq.view())?;
                    set_status(&mut image.meta, "dq_init", StepStatus::Complete);
                }
                None => skip_step(&mut image.meta, self.class_name(), "dq_init"),
            }
            return Ok(AnyModel::Image(image));
        }

        let mut ramp = to_ramp_model(input, self.class_name())?;
        match ctx.load_reference::<MaskRefModel>(&mut ramp.meta, self.class_name())? {
            Some(mask) => {
                apply_mask(ramp.pixeldq.view_mut(), mask.dq.view())?;
                set_status(&mut ramp.meta, "dq_init", StepStatus::Complete);
            }
            None => skip_step(&mut ramp.meta, self.class_name(), "dq_init"),
        }
        Ok(AnyModel::Ramp(ramp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datamodels::{dqflags, maker::*, DataModel, RampModel},
        steps::tests::context_with,
    };
    use ndarray::array;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_apply_mask() {
        let mut dq = array![[0, dqflags::SATURATED], [0, 0]];
        let mask = array![[dqflags::DEAD, dqflags::HOT], [0, dqflags::DO_NOT_USE]];
        apply_mask(dq.view_mut(), mask.view()).unwrap();
        assert_eq!(
            dq,
            array![
                [dqflags::DEAD, dqflags::SATURATED | dqflags::HOT],
                [0, dqflags::DO_NOT_USE]
            ]
        );
    }

    #[test]
    fn test_apply_mask_bad_shape() {
        let mut dq = ndarray::Array2::<u32>::zeros((2, 3));
        let mask = ndarray::Array2::<u32>::zeros((3, 2));
        assert!(matches!(
            apply_mask(dq.view_mut(), mask.view()),
            Err(StepError::BadArrayShape { .. })
        ));
    }

    #[test]
    fn test_dq_init_promotes_level1() {
        let tmp_dir = tempdir().unwrap();
        let mask_path = tmp_dir.path().join("mask.asdf");
        let mut mask = mk_mask((3, 4));
        mask.dq[[1, 2]] = dqflags::DEAD | dqflags::DO_NOT_USE;
        mask.write_to(&mask_path).unwrap();

        let mut raw = mk_level1_science_raw((2, 3, 4));
        raw.data.fill(42);
        let ctx = context_with(BTreeMap::from([(RefType::Mask, mask_path)]));
        let result = DQInitStep.process(raw.into_any(), &ctx).unwrap();

        let ramp = RampModel::from_any(result).unwrap();
        assert_eq!(ramp.meta.model_type, "RampModel");
        assert_eq!(ramp.meta.cal_step.dq_init, StepStatus::Complete);
        assert_eq!(ramp.meta.ref_file.mask, "mask.asdf");
        assert_eq!(ramp.pixeldq[[1, 2]], dqflags::DEAD | dqflags::DO_NOT_USE);
        assert_eq!(ramp.pixeldq[[0, 0]], 0);
        assert!(ramp.data.iter().all(|&v| v == 42.));
        ramp.validate().unwrap();
    }

    #[test]
    fn test_dq_init_image() {
        let tmp_dir = tempdir().unwrap();
        let mask_path = tmp_dir.path().join("mask.asdf");
        let mut mask = mk_mask((3, 4));
        mask.dq[[0, 1]] = dqflags::WARM;
        mask.write_to(&mask_path).unwrap();

        let ctx = context_with(BTreeMap::from([(RefType::Mask, mask_path)]));
        let result = DQInitStep
            .process(mk_level2_image((3, 4)).into_any(), &ctx)
            .unwrap();
        let image = crate::datamodels::ImageModel::from_any(result).unwrap();
        assert_eq!(image.dq[[0, 1]], dqflags::WARM);
        assert_eq!(image.meta.cal_step.dq_init, StepStatus::Complete);
    }

    #[test]
    fn test_dq_init_skips_without_mask() {
        let ctx = context_with(BTreeMap::new());
        let ramp = mk_ramp((2, 3, 4));
        let result = DQInitStep.process(ramp.clone().into_any(), &ctx).unwrap();

        let result = RampModel::from_any(result).unwrap();
        assert_eq!(result.meta.cal_step.dq_init, StepStatus::Skipped);
        assert_eq!(result.meta.ref_file.mask, "N/A");
        assert_eq!(result.pixeldq, ramp.pixeldq);
        assert_eq!(result.data, ramp.data);
    }

    #[test]
    fn test_dq_init_mask_shape_mismatch() {
        let tmp_dir = tempdir().unwrap();
        let mask_path = tmp_dir.path().join("mask.asdf");
        mk_mask((5, 5)).write_to(&mask_path).unwrap();

        let ctx = context_with(BTreeMap::from([(RefType::Mask, mask_path)]));
        assert!(matches!(
            DQInitStep.process(mk_ramp((2, 3, 4)).into_any(), &ctx),
            Err(StepError::BadArrayShape { .. })
        ));
    }

    #[test]
    fn test_dq_init_rejects_reference_input() {
        let ctx = context_with(BTreeMap::new());
        assert!(matches!(
            DQInitStep.process(mk_gain((2, 2)).into_any(), &ctx),
            Err(StepError::UnsupportedInput { .. })
        ));
    }
}
