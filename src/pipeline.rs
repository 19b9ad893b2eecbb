//! The exposure level pipeline, chaining every calibration step.

use crate::{
    datamodels::{meta::StepStatus, AnyModel},
    references::RefType,
    steps::{all_steps, set_status, Step, StepContext, StepError},
    with_increment_duration,
};
use derive_builder::Builder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{info, trace};
use std::fmt::Display;

/// Which steps of the exposure pipeline to run
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct PipelineContext {
    /// Whether to initialise data quality from the mask
    #[builder(default = "true")]
    pub dq_init: bool,
    /// Whether to flag saturation
    #[builder(default = "true")]
    pub saturation: bool,
    /// Whether to correct non-linearity
    #[builder(default = "true")]
    pub linearity: bool,
    /// Whether to subtract the dark
    #[builder(default = "true")]
    pub dark_current: bool,
    /// Whether to fit ramps
    #[builder(default = "true")]
    pub ramp_fit: bool,
    /// Whether to flat field
    #[builder(default = "true")]
    pub flat_field: bool,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self {
            dq_init: true,
            saturation: true,
            linearity: true,
            dark_current: true,
            ramp_fit: true,
            flat_field: true,
        }
    }
}

fn will(enabled: bool) -> &'static str {
    if enabled {
        "Will"
    } else {
        "Will not"
    }
}

impl Display for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} initialise data quality.", will(self.dq_init))?;
        writeln!(f, "{} flag saturation.", will(self.saturation))?;
        writeln!(f, "{} correct non-linearity.", will(self.linearity))?;
        writeln!(f, "{} subtract dark current.", will(self.dark_current))?;
        writeln!(f, "{} fit ramps.", will(self.ramp_fit))?;
        writeln!(f, "{} flat field.", will(self.flat_field))?;
        Ok(())
    }
}

impl PipelineContext {
    /// Whether the step with this alias will run.
    pub fn is_enabled(&self, alias: &str) -> bool {
        match alias {
            "dq_init" => self.dq_init,
            "saturation" => self.saturation,
            "linearity" => self.linearity,
            "dark_current" => self.dark_current,
            "ramp_fit" => self.ramp_fit,
            "flat_field" => self.flat_field,
            _ => false,
        }
    }

    /// Switch the step with this alias on or off. Returns false for an
    /// unknown alias.
    pub fn set_enabled(&mut self, alias: &str, enabled: bool) -> bool {
        let switch = match alias {
            "dq_init" => &mut self.dq_init,
            "saturation" => &mut self.saturation,
            "linearity" => &mut self.linearity,
            "dark_current" => &mut self.dark_current,
            "ramp_fit" => &mut self.ramp_fit,
            "flat_field" => &mut self.flat_field,
            _ => return false,
        };
        *switch = enabled;
        true
    }

    /// A one line description of the steps that will run.
    pub fn as_comment(&self) -> String {
        [
            (self.dq_init, "dq init"),
            (self.saturation, "saturation"),
            (self.linearity, "linearity"),
            (self.dark_current, "dark current"),
            (self.ramp_fit, "ramp fit"),
            (self.flat_field, "flat field"),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .join(", ")
    }
}

/// Calibrates a level 1 exposure into a count rate image:
/// `dq_init → saturation → linearity → dark_current → ramp_fit → flat_field`.
#[derive(Debug, Clone, Default)]
pub struct ExposurePipeline {
    /// Which steps to run
    pub ctx: PipelineContext,
}

impl ExposurePipeline {
    /// A pipeline running the steps enabled in `ctx`.
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// The steps, in order.
    pub fn steps(&self) -> Vec<Box<dyn Step>> {
        all_steps()
    }
}

impl Step for ExposurePipeline {
    fn class_name(&self) -> &'static str {
        "ExposurePipeline"
    }

    fn alias(&self) -> &'static str {
        "roman_elp"
    }

    fn cal_step(&self) -> Option<&'static str> {
        None
    }

    fn default_suffix(&self) -> String {
        "cal".into()
    }

    fn reference_file_types(&self) -> Vec<RefType> {
        let mut reftypes: Vec<RefType> = self
            .steps()
            .iter()
            .filter(|step| self.ctx.is_enabled(step.alias()))
            .flat_map(|step| step.reference_file_types())
            .collect();
        reftypes.sort();
        reftypes.dedup();
        reftypes
    }

    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError> {
        if input.model_type().is_reference() {
            return Err(StepError::UnsupportedInput {
                step: self.class_name(),
                model: input.class_name(),
            });
        }
        let steps = self.steps();

        let draw_target = if ctx.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let progress = ProgressBar::with_draw_target(Some(steps.len() as u64), draw_target);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})",
                )
                .map(|style| style.progress_chars("=> "))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut model = input;
        for step in steps {
            progress.set_message(step.alias());
            if self.ctx.is_enabled(step.alias()) {
                trace!("running {}", step.class_name());
                model = with_increment_duration!(step.alias(), step.process(model, ctx)?);
            } else {
                info!("{} is switched off.", step.class_name());
                if let (Some(meta), Some(cal_step)) = (model.science_meta_mut(), step.cal_step()) {
                    set_status(meta, cal_step, StepStatus::Skipped);
                }
            }
            progress.inc(1);
        }
        progress.finish_with_message("calibrated");
        Ok(model)
    }
}
