//! Running a single step, or the whole pipeline, from files.
//!
//! A [`StepConfig`] holds everything a command line or parameter file can
//! say about a run. [`run_step`] opens the input, runs the step and writes
//! the result to `<output_dir>/<basename>_<suffix>.asdf`.

use crate::{
    datamodels::{meta::StepStatus, open, AnyModel, ReadOptions},
    error::CLIError,
    io::ASDF_EXTENSION,
    pipeline::{ExposurePipeline, PipelineContext},
    references::{LocalReferenceStore, NoReferences, RefOverride, RefType, ReferenceProvider},
    steps::{all_steps, set_status, Step, StepContext},
    with_increment_duration, RomanCalError,
};
use log::{debug, info, warn};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Per-step switch in a pipeline parameter file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepSwitch {
    /// Leave this step out of the pipeline
    pub skip: bool,
}

/// Parameters of a step run.
///
/// Parameter files are YAML mappings of these fields, e.g.
///
/// ```yaml
/// output_dir: /data/out
/// suffix: cal
/// ref_dir: /data/refs
/// overrides:
///   dark: /data/refs/my_dark.asdf
///   flat: N/A
/// steps:
///   linearity:
///     skip: true
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepConfig {
    /// Base name of the output file. Only its stem is used.
    pub output_file: Option<PathBuf>,
    /// Directory to write output to
    pub output_dir: Option<PathBuf>,
    /// Suffix appended to the output base name
    pub suffix: Option<String>,
    /// Pass the input through without running the step
    pub skip: bool,
    /// Write the result to disk
    pub save_results: bool,
    /// Validate files against their schema as they are read
    pub validate_on_read: bool,
    /// Directory of reference files
    pub ref_dir: Option<PathBuf>,
    /// Where the dark current step writes the dark it used
    pub dark_output: Option<PathBuf>,
    /// Reference files chosen by the user, per type
    pub overrides: BTreeMap<RefType, RefOverride>,
    /// Draw progress bars
    pub draw_progress: bool,
    /// Pipeline step switches, by step alias
    pub steps: BTreeMap<String, StepSwitch>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            output_file: None,
            output_dir: None,
            suffix: None,
            skip: false,
            save_results: true,
            validate_on_read: true,
            ref_dir: None,
            dark_output: None,
            overrides: BTreeMap::new(),
            draw_progress: true,
            steps: BTreeMap::new(),
        }
    }
}

impl StepConfig {
    /// Parse a YAML parameter document. `source` names it in errors.
    ///
    /// # Errors
    ///
    /// Will return [`CLIError::InvalidConfig`] for malformed YAML or unknown
    /// parameters.
    pub fn from_yaml_str(yaml: &str, source: &str) -> Result<Self, CLIError> {
        serde_yaml::from_str(yaml).map_err(|e| CLIError::InvalidConfig {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    /// Read a YAML parameter file.
    ///
    /// # Errors
    ///
    /// Will return [`CLIError::InvalidConfig`] if the file can't be read or
    /// parsed.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, CLIError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| CLIError::InvalidConfig {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&yaml, &path.display().to_string())
    }

    /// Options for opening input and reference files.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            validate_on_read: self.validate_on_read,
        }
    }

    /// The pipeline switches described by [`StepConfig::steps`].
    ///
    /// # Errors
    ///
    /// Will return [`CLIError::InvalidConfig`] for a switch naming a step that
    /// is not part of the pipeline.
    pub fn pipeline_context(&self) -> Result<PipelineContext, CLIError> {
        let mut ctx = PipelineContext::default();
        for (alias, switch) in &self.steps {
            if !ctx.set_enabled(alias, !switch.skip) {
                return Err(CLIError::InvalidConfig {
                    path: "steps".to_string(),
                    message: format!("no pipeline step named {alias}"),
                });
            }
        }
        Ok(ctx)
    }

    /// Build the context steps run in, indexing `ref_dir` if one is given.
    ///
    /// # Errors
    ///
    /// Will return [`crate::references::ReferenceError::Index`] if `ref_dir`
    /// can't be listed.
    pub fn step_context(&self) -> Result<StepContext, RomanCalError> {
        let references: Arc<dyn ReferenceProvider> = match &self.ref_dir {
            Some(dir) => Arc::new(LocalReferenceStore::open(dir)?),
            None => {
                debug!("no reference directory, only overrides will be used");
                Arc::new(NoReferences)
            }
        };
        Ok(StepContext {
            references,
            overrides: self.overrides.clone(),
            read_options: self.read_options(),
            draw_progress: self.draw_progress,
            dark_output: self.dark_output.clone(),
        })
    }
}

/// What a step runs on.
#[derive(Debug, Clone)]
pub enum StepInput {
    /// A model file to open
    Path(PathBuf),
    /// A model already in memory
    Model(AnyModel),
}

/// The outcome of [`run_step`].
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The processed model
    pub model: AnyModel,
    /// Where it was written, if it was saved
    pub output: Option<PathBuf>,
}

/// Find a step by class name (`DarkCurrentStep`), dotted class path
/// (`romancal.step.DarkCurrentStep`) or alias (`dark_current`), ignoring
/// case. The exposure pipeline is `ExposurePipeline` or `roman_elp`, and
/// runs the steps enabled in `pipeline_ctx`.
pub fn step_from_name(name: &str, pipeline_ctx: &PipelineContext) -> Option<Box<dyn Step>> {
    let name = name.rsplit('.').next().unwrap_or(name);
    let pipeline = ExposurePipeline::new(pipeline_ctx.clone());
    let is_named = |step: &dyn Step| {
        step.class_name().eq_ignore_ascii_case(name) || step.alias().eq_ignore_ascii_case(name)
    };
    if is_named(&pipeline as &dyn Step) {
        return Some(Box::new(pipeline));
    }
    all_steps().into_iter().find(|step| is_named(step.as_ref()))
}

/// Class names of everything [`step_from_name`] can find.
pub fn step_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = all_steps().iter().map(|step| step.class_name()).collect();
    names.push(ExposurePipeline::default().class_name());
    names
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
}

/// Where the output of `step` on an input named `input_stem` is written:
/// `<output_dir>/<basename>_<suffix>.asdf`.
///
/// The basename is the stem of `output_file` if given, else `input_stem`.
/// The suffix is the configured one, with any surrounding quotes removed,
/// or the step's default. Without `output_dir`, output goes next to
/// `output_file`, or into the working directory.
pub fn output_path(config: &StepConfig, step: &dyn Step, input_stem: &str) -> PathBuf {
    let basename = config
        .output_file
        .as_deref()
        .and_then(file_stem)
        .unwrap_or_else(|| input_stem.to_string());
    let suffix = config
        .suffix
        .as_deref()
        .map(|suffix| suffix.trim_matches(|c| c == '"' || c == '\''))
        .filter(|suffix| !suffix.is_empty())
        .map_or_else(|| step.default_suffix(), str::to_string);
    let dir = match (&config.output_dir, &config.output_file) {
        (Some(dir), _) => dir.clone(),
        (None, Some(file)) => file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        (None, None) => PathBuf::from("."),
    };
    dir.join(format!("{basename}_{suffix}.{ASDF_EXTENSION}"))
}

/// Run `step` on `input` with the parameters in `config`, saving the result
/// if `config.save_results` is set.
///
/// # Errors
///
/// Will return an error if the input or a reference file can't be read, the
/// step fails, or the result doesn't validate.
pub fn run_step(
    step: &dyn Step,
    input: StepInput,
    config: &StepConfig,
) -> Result<StepResult, RomanCalError> {
    let ctx = config.step_context()?;
    run_step_with_context(step, input, config, &ctx)
}

/// [`run_step`], with a context that has already been built from `config`.
///
/// # Errors
///
/// see [`run_step`]
pub fn run_step_with_context(
    step: &dyn Step,
    input: StepInput,
    config: &StepConfig,
    ctx: &StepContext,
) -> Result<StepResult, RomanCalError> {
    let (mut model, input_stem) = match input {
        StepInput::Path(path) => {
            info!("Opening {}", path.display());
            let model = open(&path, &ctx.read_options)?;
            let stem = file_stem(&path).unwrap_or_else(|| step.alias().to_string());
            (model, stem)
        }
        StepInput::Model(model) => {
            let stem = model
                .science_meta()
                .and_then(|meta| file_stem(Path::new(&meta.filename)))
                .unwrap_or_else(|| step.alias().to_string());
            (model, stem)
        }
    };

    if config.skip {
        info!("{} skipped by request.", step.class_name());
        if let (Some(meta), Some(cal_step)) = (model.science_meta_mut(), step.cal_step()) {
            set_status(meta, cal_step, StepStatus::Skipped);
        }
        return Ok(StepResult {
            model,
            output: None,
        });
    }

    info!("{} running on {}", step.class_name(), model.class_name());
    let mut model = with_increment_duration!(step.alias(), step.process(model, ctx)?);
    info!("{} done", step.class_name());

    if !config.save_results {
        return Ok(StepResult {
            model,
            output: None,
        });
    }
    let output = output_path(config, step, &input_stem);
    match model.science_meta_mut() {
        Some(meta) => {
            meta.filename = output
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
        }
        None => warn!("{} has no science metadata to name", model.class_name()),
    }
    model.write_to(&output)?;
    info!("Saved model in {}", output.display());
    Ok(StepResult {
        model,
        output: Some(output),
    })
}
