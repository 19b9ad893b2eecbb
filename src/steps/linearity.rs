//! Classic non-linearity correction.

use super::{error::check_shape, set_status, skip_step, to_ramp_model, Step, StepContext, StepError};
use crate::{
    datamodels::{
        dqflags::{self, group},
        meta::StepStatus,
        AnyModel, LinearityRefModel,
    },
    ndarray::{ArrayView1, ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, Zip},
    references::RefType,
};
use log::trace;

/// Evaluate the polynomial with coefficients `coeffs` (lowest order first) at `x`.
#[inline]
pub fn eval_polynomial(coeffs: ArrayView1<f32>, x: f64) -> f64 {
    coeffs
        .iter()
        .rev()
        .fold(0.0, |acc, &coeff| acc * x + coeff as f64)
}

/// Replace each unsaturated resultant `x` with `sum(c_i * x^i)`.
///
/// Pixels with a NaN coefficient, or with [`dqflags::NO_LIN_CORR`] in
/// `ref_dq`, are left as they are and get `NO_LIN_CORR`. `ref_dq` is ORed
/// into `pixeldq`.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if the arrays do not agree on the
/// detector shape, or there are no coefficients.
pub fn correct_linearity(
    mut data: ArrayViewMut3<f32>,
    groupdq: ArrayView3<u8>,
    mut pixeldq: ArrayViewMut2<u32>,
    coeffs: ArrayView3<f32>,
    ref_dq: ArrayView2<u32>,
) -> Result<(), StepError> {
    check_shape("groupdq", "correct_linearity", data.shape(), groupdq.shape())?;
    check_shape("pixeldq", "correct_linearity", &data.shape()[1..], pixeldq.shape())?;
    check_shape("coeffs", "correct_linearity", pixeldq.shape(), &coeffs.shape()[1..])?;
    check_shape("ref_dq", "correct_linearity", pixeldq.shape(), ref_dq.shape())?;
    if coeffs.len_of(Axis(0)) == 0 {
        return Err(StepError::BadArrayShape {
            argument: "coeffs".into(),
            function: "correct_linearity".into(),
            expected: "at least one coefficient".into(),
            received: format!("{:?}", coeffs.shape()),
        });
    }
    trace!("start correct_linearity");

    Zip::from(data.lanes_mut(Axis(0)))
        .and(groupdq.lanes(Axis(0)))
        .and(&mut pixeldq)
        .and(coeffs.lanes(Axis(0)))
        .and(&ref_dq)
        .par_for_each(|mut ramp, ramp_dq, pixel_dq, coeffs, &ref_flags| {
            *pixel_dq |= ref_flags;
            if ref_flags & dqflags::NO_LIN_CORR != 0 || coeffs.iter().any(|c| c.is_nan()) {
                *pixel_dq |= dqflags::NO_LIN_CORR;
                return;
            }
            for (value, &flags) in ramp.iter_mut().zip(ramp_dq.iter()) {
                if flags & group::SATURATED == 0 {
                    *value = eval_polynomial(coeffs, *value as f64) as f32;
                }
            }
        });
    Ok(())
}

/// Correct resultants for detector non-linearity using the `linearity`
/// reference file.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearityStep;

impl Step for LinearityStep {
    fn class_name(&self) -> &'static str {
        "LinearityStep"
    }

    fn alias(&self) -> &'static str {
        "linearity"
    }

    fn cal_step(&self) -> Option<&'static str> {
        Some("linearity")
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        vec![RefType::Linearity]
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        let mut ramp = to_ramp_model(input, self.class_name())?;
        match ctx.load_reference::<LinearityRefModel>(&mut ramp.meta, self.class_name())? {
            Some(linearity) => {
                correct_linearity(
                    ramp.data.view_mut(),
                    ramp.groupdq.view(),
                    ramp.pixeldq.view_mut(),
                    linearity.coeffs.view(),
                    linearity.dq.view(),
                )?;
                set_status(&mut ramp.meta, "linearity", StepStatus::Complete);
            }
            None => skip_step(&mut ramp.meta, self.class_name(), "linearity"),
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
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2, Array3};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_eval_polynomial() {
        let coeffs = array![1.0_f32, 2.0, 0.5];
        assert_abs_diff_eq!(eval_polynomial(coeffs.view(), 0.0), 1.0);
        assert_abs_diff_eq!(eval_polynomial(coeffs.view(), 2.0), 1.0 + 4.0 + 2.0);
        assert_abs_diff_eq!(eval_polynomial(array![3.0_f32].view(), 10.0), 3.0);
    }

    #[test]
    fn test_correct_linearity() {
        let mut data = Array3::<f32>::from_elem((3, 1, 3), 10.0);
        let mut groupdq = Array3::<u8>::zeros((3, 1, 3));
        groupdq[[2, 0, 0]] = group::SATURATED;
        let mut pixeldq = Array2::<u32>::zeros((1, 3));
        // x + 0.01 x^2, except a NaN pixel and a pixel the reference refuses
        let mut coeffs = Array3::<f32>::zeros((3, 1, 3));
        coeffs.index_axis_mut(Axis(0), 1).fill(1.0);
        coeffs.index_axis_mut(Axis(0), 2).fill(0.01);
        coeffs[[0, 0, 1]] = f32::NAN;
        let ref_dq = array![[0, 0, dqflags::NO_LIN_CORR]];

        correct_linearity(
            data.view_mut(),
            groupdq.view(),
            pixeldq.view_mut(),
            coeffs.view(),
            ref_dq.view(),
        )
        .unwrap();

        assert_abs_diff_eq!(data[[0, 0, 0]], 11.0, epsilon = 1e-5);
        assert_abs_diff_eq!(data[[1, 0, 0]], 11.0, epsilon = 1e-5);
        // saturated resultants are left alone
        assert_abs_diff_eq!(data[[2, 0, 0]], 10.0);
        assert!(data.slice(ndarray::s![.., 0, 1..]).iter().all(|&v| v == 10.0));
        assert_eq!(
            pixeldq,
            array![[0, dqflags::NO_LIN_CORR, dqflags::NO_LIN_CORR]]
        );
    }

    #[test]
    fn test_correct_linearity_bad_shape() {
        let mut data = Array3::<f32>::zeros((3, 2, 2));
        let groupdq = Array3::<u8>::zeros((3, 2, 2));
        let mut pixeldq = Array2::<u32>::zeros((2, 2));
        let coeffs = Array3::<f32>::zeros((2, 4, 4));
        let ref_dq = Array2::<u32>::zeros((2, 2));
        assert!(matches!(
            correct_linearity(
                data.view_mut(),
                groupdq.view(),
                pixeldq.view_mut(),
                coeffs.view(),
                ref_dq.view(),
            ),
            Err(StepError::BadArrayShape { .. })
        ));
    }

    #[test]
    fn test_linearity_step_identity() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("linearity.asdf");
        mk_linearity((2, 3, 4)).write_to(&path).unwrap();

        let mut ramp = mk_ramp((2, 3, 4));
        ramp.data.fill(1234.5);
        let ctx = context_with(BTreeMap::from([(RefType::Linearity, path)]));
        let result = LinearityStep.process(ramp.clone().into_any(), &ctx).unwrap();
        let corrected = RampModel::from_any(result).unwrap();

        assert_eq!(corrected.meta.cal_step.linearity, StepStatus::Complete);
        assert_eq!(corrected.data, ramp.data);
    }
}
