//! Saturation flagging.

use super::{error::check_shape, set_status, skip_step, to_ramp_model, Step, StepContext, StepError};
use crate::{
    datamodels::{
        dqflags::{self, group},
        meta::StepStatus,
        AnyModel, SaturationRefModel,
    },
    ndarray::{ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, Zip},
    references::RefType,
};
use log::trace;

/// Flag resultants at or above each pixel's saturation threshold.
///
/// Once a resultant saturates, it and every later resultant of that pixel
/// get [`group::SATURATED`]. Pixels whose threshold is NaN, or whose
/// reference dq has [`dqflags::NO_SAT_CHECK`], are not checked and get
/// `NO_SAT_CHECK` instead. `ref_dq` is ORed into `pixeldq`.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if the arrays do not agree on the
/// detector shape.
pub fn flag_saturation(
    data: ArrayView3<f32>,
    mut groupdq: ArrayViewMut3<u8>,
    mut pixeldq: ArrayViewMut2<u32>,
    threshold: ArrayView2<f32>,
    ref_dq: ArrayView2<u32>,
) -> Result<(), StepError> {
    check_shape("groupdq", "flag_saturation", data.shape(), groupdq.shape())?;
    check_shape("pixeldq", "flag_saturation", &data.shape()[1..], pixeldq.shape())?;
    check_shape("threshold", "flag_saturation", pixeldq.shape(), threshold.shape())?;
    check_shape("ref_dq", "flag_saturation", pixeldq.shape(), ref_dq.shape())?;
    trace!("start flag_saturation");

    Zip::from(data.lanes(Axis(0)))
        .and(groupdq.lanes_mut(Axis(0)))
        .and(&mut pixeldq)
        .and(&threshold)
        .and(&ref_dq)
        .par_for_each(|ramp, mut ramp_dq, pixel_dq, &threshold, &ref_flags| {
            *pixel_dq |= ref_flags;
            if threshold.is_nan() || ref_flags & dqflags::NO_SAT_CHECK != 0 {
                *pixel_dq |= dqflags::NO_SAT_CHECK;
                return;
            }
            if let Some(first) = ramp.iter().position(|&value| value >= threshold) {
                for flags in ramp_dq.iter_mut().skip(first) {
                    *flags |= group::SATURATED;
                }
            }
        });
    Ok(())
}

/// Flag saturated resultants using the `saturation` reference file.
#[derive(Debug, Default, Clone, Copy)]
pub struct SaturationStep;

impl Step for SaturationStep {
    fn class_name(&self) -> &'static str {
        "SaturationStep"
    }

    fn alias(&self) -> &'static str {
        "saturation"
    }

    fn cal_step(&self) -> Option<&'static str> {
        Some("saturation")
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        vec![RefType::Saturation]
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        let mut ramp = to_ramp_model(input, self.class_name())?;
        match ctx.load_reference::<SaturationRefModel>(&mut ramp.meta, self.class_name())? {
            Some(saturation) => {
                flag_saturation(
                    ramp.data.view(),
                    ramp.groupdq.view_mut(),
                    ramp.pixeldq.view_mut(),
                    saturation.data.view(),
                    saturation.dq.view(),
                )?;
                set_status(&mut ramp.meta, "saturation", StepStatus::Complete);
            }
            None => skip_step(&mut ramp.meta, self.class_name(), "saturation"),
        }
        Ok(AnyModel::Ramp(ramp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datamodels::{maker::*, DataModel, RampModel},
        steps::tests::context_with,
    };
    use ndarray::{array, Array2, Array3};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_flag_saturation() {
        // one row of three pixels, four resultants
        let data = Array3::from_shape_vec(
            (4, 1, 3),
            vec![
                10., 10., 10., //
                20., 100., 20., //
                30., 50., 30., //
                40., 50., 200., //
            ],
        )
        .unwrap();
        let mut groupdq = Array3::<u8>::zeros((4, 1, 3));
        let mut pixeldq = Array2::<u32>::zeros((1, 3));
        let threshold = array![[100., 100., 100.]];
        let ref_dq = array![[0, 0, dqflags::HOT]];

        flag_saturation(
            data.view(),
            groupdq.view_mut(),
            pixeldq.view_mut(),
            threshold.view(),
            ref_dq.view(),
        )
        .unwrap();

        let sat = group::SATURATED;
        // resultants after the first saturated one stay flagged even below threshold
        assert_eq!(
            groupdq.slice(ndarray::s![.., 0, ..]),
            array![[0, 0, 0], [0, sat, 0], [0, sat, 0], [0, sat, sat]]
        );
        assert_eq!(pixeldq, array![[0, 0, dqflags::HOT]]);
    }

    #[test]
    fn test_flag_saturation_no_check() {
        let data = Array3::<f32>::from_elem((2, 1, 2), 1e6);
        let mut groupdq = Array3::<u8>::zeros((2, 1, 2));
        let mut pixeldq = Array2::<u32>::zeros((1, 2));
        let threshold = array![[f32::NAN, 10.]];
        let ref_dq = array![[0, dqflags::NO_SAT_CHECK]];

        flag_saturation(
            data.view(),
            groupdq.view_mut(),
            pixeldq.view_mut(),
            threshold.view(),
            ref_dq.view(),
        )
        .unwrap();

        assert!(groupdq.iter().all(|&flags| flags == 0));
        assert_eq!(pixeldq, array![[dqflags::NO_SAT_CHECK, dqflags::NO_SAT_CHECK]]);
    }

    #[test]
    fn test_saturation_step() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("saturation.asdf");
        mk_saturation((3, 4)).write_to(&path).unwrap();

        let mut ramp = mk_ramp((3, 3, 4));
        ramp.data[[2, 1, 1]] = 65000.;
        let ctx = context_with(BTreeMap::from([(RefType::Saturation, path)]));
        let result = SaturationStep.process(ramp.into_any(), &ctx).unwrap();
        let ramp = RampModel::from_any(result).unwrap();

        assert_eq!(ramp.meta.cal_step.saturation, StepStatus::Complete);
        assert_eq!(ramp.groupdq[[2, 1, 1]], group::SATURATED);
        assert_eq!(ramp.groupdq[[1, 1, 1]], 0);
        assert_eq!(ramp.groupdq.iter().filter(|&&flags| flags != 0).count(), 1);
    }

    #[test]
    fn test_saturation_step_skips_without_reference() {
        let ctx = context_with(BTreeMap::new());
        let result = SaturationStep
            .process(mk_ramp((2, 2, 2)).into_any(), &ctx)
            .unwrap();
        let ramp = RampModel::from_any(result).unwrap();
        assert_eq!(ramp.meta.cal_step.saturation, StepStatus::Skipped);
    }
}
