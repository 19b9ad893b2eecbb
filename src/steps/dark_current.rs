//! Dark current subtraction.

use super::{error::check_shape, set_status, skip_step, to_ramp_model, Step, StepContext, StepError};
use crate::{
    datamodels::{meta::StepStatus, AnyModel, DarkRefModel, DataModel},
    ndarray::{s, ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, Zip},
    references::RefType,
};
use log::{info, trace};

/// Subtract the dark from each resultant, combining errors in quadrature.
///
/// Only the first `ngroups` resultants of the dark are used. `dark_dq` is
/// ORed into `pixeldq`.
///
/// # Errors
///
/// Will return [`StepError::BadArrayShape`] if the dark has fewer resultants
/// than the data, or the detector shapes differ.
pub fn subtract_dark(
    mut data: ArrayViewMut3<f32>,
    mut err: ArrayViewMut3<f32>,
    mut pixeldq: ArrayViewMut2<u32>,
    dark: ArrayView3<f32>,
    dark_err: ArrayView3<f32>,
    dark_dq: ArrayView2<u32>,
) -> Result<(), StepError> {
    let ngroups = data.len_of(Axis(0));
    check_shape("err", "subtract_dark", data.shape(), err.shape())?;
    check_shape("pixeldq", "subtract_dark", &data.shape()[1..], pixeldq.shape())?;
    check_shape("dark", "subtract_dark", &data.shape()[1..], &dark.shape()[1..])?;
    check_shape("dark_err", "subtract_dark", dark.shape(), dark_err.shape())?;
    check_shape("dark_dq", "subtract_dark", pixeldq.shape(), dark_dq.shape())?;
    if dark.len_of(Axis(0)) < ngroups {
        return Err(StepError::BadArrayShape {
            argument: "dark".into(),
            function: "subtract_dark".into(),
            expected: format!("at least {ngroups} resultants"),
            received: format!("{:?}", dark.shape()),
        });
    }
    trace!("start subtract_dark");

    Zip::from(&mut data)
        .and(&mut err)
        .and(&dark.slice(s![..ngroups, .., ..]))
        .and(&dark_err.slice(s![..ngroups, .., ..]))
        .par_for_each(|value, error, &dark, &dark_error| {
            *value -= dark;
            *error = error.hypot(dark_error);
        });
    Zip::from(&mut pixeldq)
        .and(&dark_dq)
        .par_for_each(|flags, &dark_flags| *flags |= dark_flags);
    Ok(())
}

/// Subtract the `dark` reference file from a ramp.
#[derive(Debug, Default, Clone, Copy)]
pub struct DarkCurrentStep;

impl Step for DarkCurrentStep {
    fn class_name(&self) -> &'static str {
        "DarkCurrentStep"
    }

    fn alias(&self) -> &'static str {
        "dark_current"
    }

    fn cal_step(&self) -> Option<&'static str> {
        Some("dark")
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        vec![RefType::Dark]
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        let mut ramp = to_ramp_model(input, self.class_name())?;
        let dark = match ctx.load_reference::<DarkRefModel>(&mut ramp.meta, self.class_name())? {
            Some(dark) => dark,
            None => {
                skip_step(&mut ramp.meta, self.class_name(), "dark");
                return Ok(AnyModel::Ramp(ramp));
            }
        };
        subtract_dark(
            ramp.data.view_mut(),
            ramp.err.view_mut(),
            ramp.pixeldq.view_mut(),
            dark.data.view(),
            dark.err.view(),
            dark.dq.view(),
        )?;
        set_status(&mut ramp.meta, "dark", StepStatus::Complete);

        if let Some(dark_output) = &ctx.dark_output {
            let ngroups = ramp.data.len_of(Axis(0));
            let used = DarkRefModel {
                data: dark.data.slice(s![..ngroups, .., ..]).to_owned(),
                err: dark.err.slice(s![..ngroups, .., ..]).to_owned(),
                ..dark
            };
            info!("Writing dark current data to {}", dark_output.display());
            used.write_to(dark_output)?;
        }
        Ok(AnyModel::Ramp(ramp))
    }
}
