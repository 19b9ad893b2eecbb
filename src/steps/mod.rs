//! Calibration steps.
//!
//! A step is a stateless transformation of a model, optionally guided by
//! reference files found through the [`StepContext`]. Every step records its
//! outcome in `meta.cal_step`; a missing reference file is a skip, not a
//! failure.

pub mod dark_current;
pub mod dq_init;
pub mod error;
pub mod flat_field;
pub mod linearity;
pub mod ramp_fit;
pub mod saturation;

pub use dark_current::DarkCurrentStep;
pub use dq_init::DQInitStep;
pub use error::StepError;
pub use flat_field::FlatFieldStep;
pub use linearity::LinearityStep;
pub use ramp_fit::RampFitStep;
pub use saturation::SaturationStep;

use crate::{
    datamodels::{
        maker::mk_ramp,
        meta::{Meta, StepStatus, NOT_APPLICABLE},
        promote, AnyModel, DataModel, RampModel, ReadOptions,
    },
    references::{NoReferences, RefOverride, RefType, ReferenceError, ReferenceProvider},
};
use derive_builder::Builder;
use log::{debug, info, warn};
use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

/// A calibration step.
pub trait Step: Send + Sync {
    /// e.g. `DarkCurrentStep`
    fn class_name(&self) -> &'static str;

    /// Short name, e.g. `dark_current`
    fn alias(&self) -> &'static str;

    /// The `meta.cal_step` key this step records its status under, if any.
    fn cal_step(&self) -> Option<&'static str>;

    /// The reference file types this step may use.
    fn reference_file_types(&self) -> Vec<RefType>;

    /// Run the step on `input`.
    ///
    /// # Errors
    ///
    /// Will return an error if the input cannot be processed by this step, or
    /// if a reference file that was found cannot be used.
    fn process(&self, input: AnyModel, ctx: &StepContext) -> Result<AnyModel, StepError>;

    /// Suffix for output file names.
    fn default_suffix(&self) -> String {
        self.class_name().to_lowercase()
    }
}

/// Everything a step needs besides its input.
#[derive(Builder, Clone)]
pub struct StepContext {
    /// Where reference files come from
    #[builder(default = "Arc::new(NoReferences)")]
    pub references: Arc<dyn ReferenceProvider>,
    /// Reference files chosen by the user, per type
    #[builder(default)]
    pub overrides: BTreeMap<RefType, RefOverride>,
    /// How reference files are opened
    #[builder(default)]
    pub read_options: ReadOptions,
    /// Whether to draw progress bars
    #[builder(default = "false")]
    pub draw_progress: bool,
    /// Where [`DarkCurrentStep`] writes the dark it used
    #[builder(default)]
    pub dark_output: Option<PathBuf>,
}

impl Default for StepContext {
    fn default() -> Self {
        Self {
            references: Arc::new(NoReferences),
            overrides: BTreeMap::new(),
            read_options: ReadOptions::default(),
            draw_progress: false,
            dark_output: None,
        }
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("overrides", &self.overrides)
            .field("read_options", &self.read_options)
            .field("draw_progress", &self.draw_progress)
            .field("dark_output", &self.dark_output)
            .finish_non_exhaustive()
    }
}

impl Display for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (reftype, ref_override) in &self.overrides {
            writeln!(f, "Will use {ref_override} as the {reftype} reference file.")?;
        }
        writeln!(
            f,
            "{} validate reference files on read.",
            if self.read_options.validate_on_read {
                "Will"
            } else {
                "Will not"
            }
        )?;
        if let Some(dark_output) = &self.dark_output {
            writeln!(f, "Will write the dark used to {}.", dark_output.display())?;
        }
        Ok(())
    }
}

impl StepContext {
    /// Choose the reference file of type `reftype` for the exposure in
    /// `meta`, honouring overrides. The file name chosen, or `N/A`, is
    /// recorded in `meta.ref_file`.
    ///
    /// # Errors
    ///
    /// - [`ReferenceError::MissingOverride`] if an override names a missing file
    /// - errors from the [`ReferenceProvider`]
    pub fn get_reference_file(
        &self,
        meta: &mut Meta,
        reftype: RefType,
    ) -> Result<Option<PathBuf>, StepError> {
        let path = match self.overrides.get(&reftype) {
            Some(RefOverride::NotApplicable) => {
                debug!("{reftype} reference file overridden with {NOT_APPLICABLE}");
                None
            }
            Some(RefOverride::Path(path)) => {
                if !path.is_file() {
                    return Err(ReferenceError::MissingOverride {
                        reftype,
                        path: path.display().to_string(),
                    }
                    .into());
                }
                Some(path.clone())
            }
            None => self.references.get_reference_file(meta, reftype)?,
        };
        let recorded = match &path {
            Some(path) => {
                info!(
                    "Using {} reference file: {}",
                    reftype.keyword(),
                    path.display()
                );
                path.file_name().map_or_else(
                    || path.display().to_string(),
                    |name| name.to_string_lossy().to_string(),
                )
            }
            None => NOT_APPLICABLE.to_string(),
        };
        meta.ref_file.set(reftype, recorded);
        Ok(path)
    }

    /// Open a reference file as a model of type `M`.
    ///
    /// # Errors
    ///
    /// see [`DataModel::open`]
    pub fn open_reference<M: DataModel, P: AsRef<Path>>(&self, path: P) -> Result<M, StepError> {
        Ok(M::open(path, &self.read_options)?)
    }

    /// Find and open the reference file of `M`'s type for `meta`, or warn
    /// and return `None` if there is none.
    ///
    /// # Errors
    ///
    /// see [`StepContext::get_reference_file`] and [`DataModel::open`]
    pub fn load_reference<M: DataModel>(
        &self,
        meta: &mut Meta,
        step: &'static str,
    ) -> Result<Option<M>, StepError> {
        let reftype = M::MODEL_TYPE
            .reftype()
            .ok_or(StepError::UnsupportedInput {
                step,
                model: M::MODEL_TYPE.class_name(),
            })?;
        match self.get_reference_file(meta, reftype)? {
            Some(path) => Ok(Some(self.open_reference(path)?)),
            None => {
                warn!("No {} reference file found.", reftype.keyword());
                Ok(None)
            }
        }
    }
}

/// Record `status` for the `cal_step` key in `meta`.
pub fn set_status(meta: &mut Meta, cal_step: &str, status: StepStatus) {
    match meta.cal_step.status_mut(cal_step) {
        Some(slot) => *slot = status,
        None => warn!("no cal_step entry named {cal_step}"),
    }
}

/// Log a skip and record it in `meta`.
pub fn skip_step(meta: &mut Meta, class_name: &str, cal_step: &str) {
    warn!("{class_name} will be skipped.");
    set_status(meta, cal_step, StepStatus::Skipped);
}

/// Turn `input` into a [`RampModel`], promoting level 1 data.
///
/// # Errors
///
/// Will return [`StepError::UnsupportedInput`] for models that are not
/// ramps or level 1 exposures.
pub fn to_ramp_model(input: AnyModel, step: &'static str) -> Result<RampModel, StepError> {
    match input {
        AnyModel::Ramp(ramp) => Ok(ramp),
        AnyModel::ScienceRaw(raw) => {
            let shape = raw.data.dim();
            Ok(promote(AnyModel::ScienceRaw(raw), mk_ramp(shape))?)
        }
        other => Err(StepError::UnsupportedInput {
            step,
            model: other.class_name(),
        }),
    }
}

/// Every calibration step, in exposure pipeline order.
pub fn all_steps() -> Vec<Box<dyn Step>> {
    vec![
        Box::new(DQInitStep),
        Box::new(SaturationStep),
        Box::new(LinearityStep),
        Box::new(DarkCurrentStep),
        Box::new(RampFitStep),
        Box::new(FlatFieldStep),
    ]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::datamodels::{maker::*, ModelError};
    use tempfile::tempdir;

    /// A provider that hands out one file per reference type.
    pub(crate) struct FixedReferences(pub BTreeMap<RefType, PathBuf>);

    impl ReferenceProvider for FixedReferences {
        fn get_reference_file(
            &self,
            _meta: &Meta,
            reftype: RefType,
        ) -> Result<Option<PathBuf>, ReferenceError> {
            Ok(self.0.get(&reftype).cloned())
        }
    }

    pub(crate) fn context_with(references: BTreeMap<RefType, PathBuf>) -> StepContext {
        StepContextBuilder::default()
            .references(Arc::new(FixedReferences(references)))
            .draw_progress(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_get_reference_file_records_name() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("roman_wfi_mask_0001.asdf");
        mk_mask((2, 2)).write_to(&path).unwrap();

        let ctx = context_with(BTreeMap::from([(RefType::Mask, path.clone())]));
        let mut meta = mk_meta(2);
        assert_eq!(
            ctx.get_reference_file(&mut meta, RefType::Mask).unwrap(),
            Some(path)
        );
        assert_eq!(meta.ref_file.mask, "roman_wfi_mask_0001.asdf");

        assert_eq!(ctx.get_reference_file(&mut meta, RefType::Dark).unwrap(), None);
        assert_eq!(meta.ref_file.dark, "N/A");
    }

    #[test]
    fn test_builder_defaults_match_default() {
        let built = StepContextBuilder::default().build().unwrap();
        let default = StepContext::default();
        assert_eq!(built.draw_progress, default.draw_progress);
        assert!(!built.draw_progress);
        assert_eq!(built.overrides, default.overrides);
        assert_eq!(built.dark_output, default.dark_output);
    }

    #[test]
    fn test_overrides() {
        let tmp_dir = tempdir().unwrap();
        let found = tmp_dir.path().join("found.asdf");
        let chosen = tmp_dir.path().join("chosen.asdf");
        mk_mask((2, 2)).write_to(&found).unwrap();
        mk_mask((2, 2)).write_to(&chosen).unwrap();

        let mut ctx = context_with(BTreeMap::from([
            (RefType::Mask, found.clone()),
            (RefType::Dark, found),
        ]));
        ctx.overrides = BTreeMap::from([
            (RefType::Mask, RefOverride::Path(chosen.clone())),
            (RefType::Dark, RefOverride::NotApplicable),
        ]);
        let mut meta = mk_meta(2);
        assert_eq!(
            ctx.get_reference_file(&mut meta, RefType::Mask).unwrap(),
            Some(chosen)
        );
        assert_eq!(ctx.get_reference_file(&mut meta, RefType::Dark).unwrap(), None);

        ctx.overrides.insert(
            RefType::Gain,
            RefOverride::Path(tmp_dir.path().join("missing.asdf")),
        );
        assert!(matches!(
            ctx.get_reference_file(&mut meta, RefType::Gain),
            Err(StepError::Reference(ReferenceError::MissingOverride {
                reftype: RefType::Gain,
                ..
            }))
        ));
    }

    #[test]
    fn test_load_reference_of_wrong_type() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("gain.asdf");
        mk_gain((2, 2)).write_to(&path).unwrap();

        // a gain file offered as the mask
        let ctx = context_with(BTreeMap::from([(RefType::Mask, path)]));
        let mut meta = mk_meta(2);
        assert!(matches!(
            ctx.load_reference::<crate::datamodels::MaskRefModel>(&mut meta, "DQInitStep"),
            Err(StepError::Model(ModelError::WrongModelType { .. }))
        ));
    }

    #[test]
    fn test_to_ramp_model() {
        let raw = mk_level1_science_raw((2, 3, 4));
        let ramp = to_ramp_model(raw.into_any(), "DQInitStep").unwrap();
        assert_eq!(ramp.data.dim(), (2, 3, 4));

        assert!(matches!(
            to_ramp_model(mk_flat((3, 4)).into_any(), "DQInitStep"),
            Err(StepError::UnsupportedInput {
                step: "DQInitStep",
                model: "FlatRefModel"
            })
        ));
    }

    #[test]
    fn test_all_steps_names() {
        let names: Vec<_> = all_steps().iter().map(|step| step.alias()).collect();
        assert_eq!(
            names,
            vec![
                "dq_init",
                "saturation",
                "linearity",
                "dark_current",
                "ramp_fit",
                "flat_field"
            ]
        );
        assert_eq!(DarkCurrentStep.default_suffix(), "darkcurrentstep");
    }
}
