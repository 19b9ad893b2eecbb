//! Ordinary least squares ramp fitting.

use super::{error::check_shape, set_status, skip_step, to_ramp_model, Step, StepContext, StepError};
use crate::{
    datamodels::{
        dqflags, meta::StepStatus, AnyModel, DataModel, GainRefModel, ImageModel,
        ReadnoiseRefModel,
    },
    ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis, Zip},
    references::RefType,
};
use log::trace;

/// The fit of a single pixel's ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelFit {
    /// Count rate, DN/s
    pub slope: f32,
    /// Variance of the slope from Poisson noise
    pub var_poisson: f32,
    /// Variance of the slope from read noise
    pub var_rnoise: f32,
    /// Pixel data quality after fitting
    pub dq: u32,
}

impl PixelFit {
    fn unusable(dq: u32) -> Self {
        Self {
            slope: f32::NAN,
            var_poisson: f32::NAN,
            var_rnoise: f32::NAN,
            dq,
        }
    }
}

/// Fit one pixel's ramp over resultants with no group flags set.
///
/// `group_time` is the time between resultants in seconds, `gain` is in
/// electrons per DN and `readnoise` in DN.
pub fn fit_pixel(
    ramp: ArrayView1<f32>,
    ramp_dq: ArrayView1<u8>,
    pixel_dq: u32,
    group_time: f64,
    gain: f32,
    readnoise: f32,
) -> PixelFit {
    if pixel_dq & dqflags::DO_NOT_USE != 0 {
        return PixelFit::unusable(pixel_dq);
    }
    if !(gain > 0.0) {
        return PixelFit::unusable(pixel_dq | dqflags::NO_GAIN_VALUE | dqflags::DO_NOT_USE);
    }
    let good: Vec<(f64, f64)> = ramp
        .iter()
        .zip(ramp_dq.iter())
        .enumerate()
        .filter(|(_, (_, &flags))| flags == 0)
        .map(|(idx, (&value, _))| (idx as f64 * group_time, value as f64))
        .collect();
    if good.len() < 2 {
        return PixelFit::unusable(pixel_dq | dqflags::DO_NOT_USE);
    }

    let n = good.len() as f64;
    let mean_t = good.iter().map(|(t, _)| t).sum::<f64>() / n;
    let mean_v = good.iter().map(|(_, v)| v).sum::<f64>() / n;
    let (s_tt, s_tv) = good.iter().fold((0.0, 0.0), |(s_tt, s_tv), (t, v)| {
        let dt = t - mean_t;
        (s_tt + dt * dt, s_tv + dt * (v - mean_v))
    });
    let slope = s_tv / s_tt;
    let duration = good[good.len() - 1].0 - good[0].0;
    let var_poisson = (slope / (gain as f64 * duration)).max(0.0);
    let var_rnoise = (readnoise as f64).powi(2) / s_tt;
    PixelFit {
        slope: slope as f32,
        var_poisson: var_poisson as f32,
        var_rnoise: var_rnoise as f32,
        dq: pixel_dq,
    }
}

/// Fit every pixel of a ramp.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if the arrays do not agree on the
/// detector shape.
pub fn fit_ramps(
    data: ArrayView3<f32>,
    groupdq: ArrayView3<u8>,
    pixeldq: ArrayView2<u32>,
    group_time: f64,
    gain: ArrayView2<f32>,
    readnoise: ArrayView2<f32>,
) -> Result<Array2<PixelFit>, StepError> {
    check_shape("groupdq", "fit_ramps", data.shape(), groupdq.shape())?;
    check_shape("pixeldq", "fit_ramps", &data.shape()[1..], pixeldq.shape())?;
    check_shape("gain", "fit_ramps", pixeldq.shape(), gain.shape())?;
    check_shape("readnoise", "fit_ramps", pixeldq.shape(), readnoise.shape())?;
    trace!("start fit_ramps");

    Ok(Zip::from(data.lanes(Axis(0)))
        .and(groupdq.lanes(Axis(0)))
        .and(&pixeldq)
        .and(&gain)
        .and(&readnoise)
        .par_map_collect(|ramp, ramp_dq, &pixel_dq, &gain, &readnoise| {
            fit_pixel(ramp, ramp_dq, pixel_dq, group_time, gain, readnoise)
        }))
}

/// Fit count rates to a ramp, producing an [`ImageModel`].
///
/// Needs both the `gain` and `readnoise` reference files; without either the
/// ramp is returned unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct RampFitStep;

impl Step for RampFitStep {
    fn class_name(&self) -> &'static str {
        "RampFitStep"
    }

    fn alias(&self) -> &'static str {
        "ramp_fit"
    }

    fn cal_step(&self) -> Option<&'static str> {
        Some("ramp_fit")
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        vec![RefType::Gain, RefType::ReadNoise]
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        let mut ramp = to_ramp_model(input, self.class_name())?;
        let gain = ctx.load_reference::<GainRefModel>(&mut ramp.meta, self.class_name())?;
        let readnoise =
            ctx.load_reference::<ReadnoiseRefModel>(&mut ramp.meta, self.class_name())?;
        let (gain, readnoise) = match (gain, readnoise) {
            (Some(gain), Some(readnoise)) => (gain, readnoise),
            _ => {
                skip_step(&mut ramp.meta, self.class_name(), "ramp_fit");
                return Ok(AnyModel::Ramp(ramp));
            }
        };

        let group_time = ramp.meta.exposure.group_time;
        if !(group_time > 0.0) {
            return Err(StepError::InvalidMetadata {
                step: self.class_name(),
                field: "meta.exposure.group_time",
                value: group_time.to_string(),
            });
        }
        let fits = fit_ramps(
            ramp.data.view(),
            ramp.groupdq.view(),
            ramp.pixeldq.view(),
            group_time,
            gain.data.view(),
            readnoise.data.view(),
        )?;

        let var_poisson = fits.mapv(|fit| fit.var_poisson);
        let var_rnoise = fits.mapv(|fit| fit.var_rnoise);
        let mut meta = ramp.meta;
        set_status(&mut meta, "ramp_fit", StepStatus::Complete);
        meta.model_type = ImageModel::MODEL_TYPE.class_name().to_string();
        let image = ImageModel {
            meta,
            data: fits.mapv(|fit| fit.slope),
            dq: fits.mapv(|fit| fit.dq),
            err: Zip::from(&var_poisson)
                .and(&var_rnoise)
                .map_collect(|&poisson, &rnoise| (poisson + rnoise).sqrt()),
            var_poisson,
            var_rnoise,
        };
        Ok(AnyModel::Image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datamodels::{dqflags::group, maker::*, RampModel},
        steps::tests::context_with,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_fit_pixel_straight_line() {
        let ramp = array![10.0_f32, 20.0, 30.0, 40.0];
        let ramp_dq = array![0_u8, 0, 0, 0];
        let fit = fit_pixel(ramp.view(), ramp_dq.view(), 0, 2.0, 1.0, 2.0);
        assert_abs_diff_eq!(fit.slope, 5.0, epsilon = 1e-6);
        // times 0, 2, 4, 6 give s_tt = 20
        assert_abs_diff_eq!(fit.var_rnoise, 4.0 / 20.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.var_poisson, 5.0 / 6.0, epsilon = 1e-6);
        assert_eq!(fit.dq, 0);
    }

    #[test]
    fn test_fit_pixel_ignores_flagged_groups() {
        let ramp = array![10.0_f32, 20.0, 1000.0, 40.0];
        let ramp_dq = array![0, 0, group::JUMP_DET, 0];
        let fit = fit_pixel(ramp.view(), ramp_dq.view(), 0, 1.0, 1.0, 1.0);
        assert_abs_diff_eq!(fit.slope, 10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_fit_pixel_unusable() {
        let ramp = array![10.0_f32, 20.0, 30.0];
        let saturated = array![0, group::SATURATED, group::SATURATED];
        let fit = fit_pixel(ramp.view(), saturated.view(), 0, 1.0, 1.0, 1.0);
        assert!(fit.slope.is_nan());
        assert_eq!(fit.dq, dqflags::DO_NOT_USE);

        let clean = array![0_u8, 0, 0];
        let bad_pixel = dqflags::DEAD | dqflags::DO_NOT_USE;
        let fit = fit_pixel(ramp.view(), clean.view(), bad_pixel, 1.0, 1.0, 1.0);
        assert!(fit.slope.is_nan());
        assert_eq!(fit.dq, dqflags::DEAD | dqflags::DO_NOT_USE);

        let fit = fit_pixel(ramp.view(), clean.view(), 0, 1.0, f32::NAN, 1.0);
        assert!(fit.slope.is_nan());
        assert_eq!(fit.dq, dqflags::NO_GAIN_VALUE | dqflags::DO_NOT_USE);
    }

    #[test]
    fn test_ramp_fit_step() {
        let tmp_dir = tempdir().unwrap();
        let gain_path = tmp_dir.path().join("gain.asdf");
        let readnoise_path = tmp_dir.path().join("readnoise.asdf");
        mk_gain((3, 4)).write_to(&gain_path).unwrap();
        mk_readnoise((3, 4)).write_to(&readnoise_path).unwrap();

        let mut ramp = mk_ramp((4, 3, 4));
        let group_time = ramp.meta.exposure.group_time;
        ramp.data = Array3::from_shape_fn((4, 3, 4), |(g, y, _)| {
            (g as f64 * group_time * (y + 1) as f64) as f32
        });
        let ctx = context_with(BTreeMap::from([
            (RefType::Gain, gain_path),
            (RefType::ReadNoise, readnoise_path),
        ]));
        let result = RampFitStep.process(ramp.into_any(), &ctx).unwrap();
        let image = ImageModel::from_any(result).unwrap();

        assert_eq!(image.meta.model_type, "ImageModel");
        assert_eq!(image.meta.cal_step.ramp_fit, StepStatus::Complete);
        assert_eq!(image.meta.ref_file.gain, "gain.asdf");
        assert_eq!(image.meta.ref_file.readnoise, "readnoise.asdf");
        assert_eq!(image.data.dim(), (3, 4));
        for ((y, _), &slope) in image.data.indexed_iter() {
            assert_abs_diff_eq!(slope, (y + 1) as f32, epsilon = 1e-4);
        }
        for (&err, (&vp, &vr)) in image
            .err
            .iter()
            .zip(image.var_poisson.iter().zip(image.var_rnoise.iter()))
        {
            assert_abs_diff_eq!(err * err, vp + vr, epsilon = 1e-6);
        }
        image.validate().unwrap();
    }

    #[test]
    fn test_ramp_fit_step_skips_without_readnoise() {
        let tmp_dir = tempdir().unwrap();
        let gain_path = tmp_dir.path().join("gain.asdf");
        mk_gain((2, 2)).write_to(&gain_path).unwrap();

        let ctx = context_with(BTreeMap::from([(RefType::Gain, gain_path)]));
        let result = RampFitStep
            .process(mk_ramp((3, 2, 2)).into_any(), &ctx)
            .unwrap();
        let ramp = RampModel::from_any(result).unwrap();
        assert_eq!(ramp.meta.cal_step.ramp_fit, StepStatus::Skipped);
        assert_eq!(ramp.meta.ref_file.readnoise, "N/A");
    }
}
