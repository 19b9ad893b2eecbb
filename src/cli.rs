//! Command Line Interface helpers for romancal

use crate::{
    datamodels::{
        meta::{format_isot, Meta},
        ModelType,
    },
    error::{CLIError::InvalidCommandLineArgument, RomanCalError, RomanCalError::DryRun},
    get_durations,
    io::asdf::read_header,
    pipeline::PipelineContext,
    references::{RefOverride, RefType},
    steps::{Step, StepContext},
    stpipe::{
        output_path, run_step_with_context, step_from_name, step_names, StepConfig, StepInput,
        StepResult,
    },
};
use clap::{
    arg, command, Arg,
    ErrorKind::{DisplayHelp, DisplayVersion},
    ValueHint::{DirPath, FilePath},
};
use log::{debug, info, trace};
use prettytable::{format as prettyformat, row, table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
    time::Duration,
};

/// Everything needed to run one step on one input file.
pub struct RomancalContext {
    /// The step, or pipeline, to run
    pub step: Box<dyn Step>,
    /// Pipeline switches, when `step` is the exposure pipeline
    pub pipeline_ctx: Option<PipelineContext>,
    /// The file to calibrate
    pub input: PathBuf,
    /// Model type of the input, from its tag
    pub input_type: ModelType,
    /// Exposure metadata of the input, if it is a science model
    pub input_meta: Option<Meta>,
    /// Parameters of the run
    pub config: StepConfig,
    /// Context the step runs in
    pub step_ctx: StepContext,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (GIT_HEAD_REF, GIT_COMMIT_HASH) {
        (Some(hr), Some(hash)) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                hash,
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {hr}")?;
        }
        _ => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {BUILT_TIME_UTC}")?;
    writeln!(f, "         with compiler {RUSTC_VERSION}")?;
    writeln!(f)?;
    Ok(())
}

impl RomancalContext {
    /// Where the reference file of type `reftype` will come from, and the
    /// file chosen if it can be known before running.
    fn reference_source(&self, reftype: RefType) -> (&'static str, String) {
        match self.step_ctx.overrides.get(&reftype) {
            Some(ref_override @ RefOverride::Path(_)) => ("override", ref_override.to_string()),
            Some(RefOverride::NotApplicable) => ("override", "N/A (skip)".into()),
            None => match &self.input_meta {
                Some(meta) => match self.step_ctx.references.get_reference_file(meta, reftype) {
                    Ok(Some(path)) => ("ref dir", path.display().to_string()),
                    Ok(None) => ("ref dir", "none found".into()),
                    Err(e) => ("ref dir", format!("error: {e}")),
                },
                None => ("ref dir", "unknown".into()),
            },
        }
    }
}

impl Display for RomancalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        writeln!(
            f,
            "Step:                 {} ({})",
            self.step.class_name(),
            self.step.alias()
        )?;
        writeln!(
            f,
            "Input:                {} ({})",
            self.input.display(),
            self.input_type.class_name()
        )?;
        if let Some(meta) = &self.input_meta {
            writeln!(
                f,
                "Exposure:             {} {} {}, {}, {} resultants, start {}",
                meta.instrument.name,
                meta.instrument.detector,
                meta.instrument.optical_element,
                meta.exposure.exposure_type,
                meta.exposure.ngroups,
                format_isot(&meta.exposure.start_time),
            )?;
        }
        if self.config.skip {
            writeln!(f, "Will skip {}.", self.step.class_name())?;
        }
        if self.config.save_results {
            let input_stem = self
                .input
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            writeln!(
                f,
                "Output:               {}",
                output_path(&self.config, self.step.as_ref(), &input_stem).display()
            )?;
        } else {
            writeln!(f, "Output:               not saved")?;
        }

        if let Some(pipeline_ctx) = &self.pipeline_ctx {
            writeln!(f, "Pipeline Context: \n{pipeline_ctx}")?;
        }
        writeln!(f, "Step Context: \n{}", &self.step_ctx)?;

        let mut reference_table = table!(["type", "keyword", "source", "file"]);
        reference_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for reftype in self.step.reference_file_types() {
            let (source, file) = self.reference_source(reftype);
            reference_table.add_row(row![reftype.name(), reftype.keyword(), source, file]);
        }
        writeln!(f, "Reference files:\n{reference_table}")?;

        Ok(())
    }
}

impl RomancalContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, RomanCalError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about(
                "Calibrate Roman Space Telescope Wide Field Instrument exposures, \
                    one step or the whole exposure pipeline at a time.",
            )
            .args(&[
                // input options
                arg!(<STEP> "Step to run, by class name or alias, e.g. DarkCurrentStep or roman_elp")
                    .help_heading("INPUT"),
                arg!(<INPUT> "ASDF file to calibrate")
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(--config <PATH> "YAML parameter file. Command line options take precedence")
                    .value_hint(FilePath)
                    .required(false)
                    .help_heading("INPUT"),
                arg!(--"no-validate-on-read" "Do not validate files against their schemas when reading")
                    .alias("no_validate_on_read")
                    .help_heading("INPUT"),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),

                // step options
                arg!(--skip "Pass the input through without running the step")
                    .help_heading("STEP"),
                arg!(--"skip-step" <ALIAS> "Switch off a step of the exposure pipeline, e.g. linearity")
                    .multiple_occurrences(true)
                    .required(false)
                    .help_heading("STEP"),
                arg!(--"dark-output" <PATH> "Write the dark used by the dark current step to <PATH>")
                    .alias("dark_output")
                    .value_hint(FilePath)
                    .required(false)
                    .help_heading("STEP"),

                // references
                arg!(--"ref-dir" <DIR> "Directory of reference files to choose from")
                    .alias("ref_dir")
                    .value_hint(DirPath)
                    .required(false)
                    .help_heading("REFERENCES"),

                // output options
                arg!(--"output-file" <NAME> "Base name of the output file")
                    .alias("output_file")
                    .value_hint(FilePath)
                    .required(false)
                    .help_heading("OUTPUT"),
                arg!(--"output-dir" <DIR> "Directory to write the output file to")
                    .alias("output_dir")
                    .value_hint(DirPath)
                    .required(false)
                    .help_heading("OUTPUT"),
                arg!(--suffix <SUFFIX> "Suffix of the output file, default is the step class name")
                    .required(false)
                    .help_heading("OUTPUT"),
                arg!(--"no-save" "Do not write the result")
                    .help_heading("OUTPUT"),
            ]);
        for reftype in RefType::ALL {
            app = app.arg(
                Arg::new(reftype.override_arg())
                    .long(reftype.override_arg())
                    .takes_value(true)
                    .value_name("PATH")
                    .value_hint(FilePath)
                    .help("Use this reference file, or N/A to skip")
                    .help_heading("REFERENCES"),
            );
        }
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_config_matches(matches: &clap::ArgMatches) -> Result<StepConfig, RomanCalError> {
        let mut config = match matches.value_of("config") {
            Some(path) => {
                debug!("reading parameters from {path}");
                StepConfig::from_yaml_file(path)?
            }
            None => StepConfig::default(),
        };

        if matches.is_present("skip") {
            config.skip = true;
        }
        if matches.is_present("no-save") {
            config.save_results = false;
        }
        if matches.is_present("no-validate-on-read") {
            config.validate_on_read = false;
        }
        if matches.is_present("no-draw-progress") {
            config.draw_progress = false;
        }
        if let Some(output_file) = matches.value_of("output-file") {
            config.output_file = Some(output_file.into());
        }
        if let Some(output_dir) = matches.value_of("output-dir") {
            config.output_dir = Some(output_dir.into());
        }
        if let Some(suffix) = matches.value_of("suffix") {
            config.suffix = Some(suffix.to_string());
        }
        if let Some(ref_dir) = matches.value_of("ref-dir") {
            config.ref_dir = Some(ref_dir.into());
        }
        if let Some(dark_output) = matches.value_of("dark-output") {
            config.dark_output = Some(dark_output.into());
        }
        for reftype in RefType::ALL {
            if let Some(value) = matches.value_of(reftype.override_arg()) {
                let ref_override = match value.parse::<RefOverride>() {
                    Ok(ref_override) => ref_override,
                    Err(never) => match never {},
                };
                config.overrides.insert(reftype, ref_override);
            }
        }
        if let Some(aliases) = matches.values_of("skip-step") {
            for alias in aliases {
                config.steps.entry(alias.to_string()).or_default().skip = true;
            }
        }
        Ok(config)
    }

    /// Parse an iterator of arguments, `args` into a `RomancalContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `CLIError` if the arguments or parameter file are invalid.
    /// - `IOError` if the input can't be read.
    /// - `ReferenceError` if the reference directory can't be listed.
    pub fn from_args<I, T>(args: I) -> Result<Self, RomanCalError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        match shlex::try_join(args.iter().map(|arg| arg.to_str().unwrap_or("<non-utf8>"))) {
            Ok(command_line) => debug!("command line: {command_line}"),
            Err(_) => debug!("args:\n{:?}", &args),
        }

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let config = Self::parse_config_matches(&matches)?;
        let pipeline_ctx = config.pipeline_context()?;

        let step_name = matches.value_of("STEP").unwrap_or_default();
        let step = step_from_name(step_name, &pipeline_ctx).ok_or_else(|| {
            InvalidCommandLineArgument {
                option: "<STEP>".into(),
                expected: format!("one of {}", step_names().join(", ")),
                received: step_name.into(),
            }
        })?;
        let pipeline_ctx = step.cal_step().is_none().then_some(pipeline_ctx);

        let input: PathBuf = match matches.value_of_t("INPUT") {
            Ok(path) => path,
            _ => unreachable!("<INPUT> is required, enforced by clap"),
        };
        let header = read_header(&input)?;
        let input_type = ModelType::from_tag(&header.tag)?;
        let input_meta = header
            .tree
            .get("meta")
            .filter(|_| !input_type.is_reference())
            .cloned()
            .and_then(|meta| serde_yaml::from_value::<Meta>(meta).ok());

        let step_ctx = config.step_context()?;

        let result = Self {
            step,
            pipeline_ctx,
            input,
            input_type,
            input_meta,
            config,
            step_ctx,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Run the step on the input, saving the result unless told not to.
    ///
    /// # Errors
    ///
    /// can raise:
    /// - `ModelError` if the input or a reference file can't be opened, or
    ///     the result doesn't validate.
    /// - `StepError` if the step can't process the input.
    pub fn run(self) -> Result<StepResult, RomanCalError> {
        let RomancalContext {
            step,
            input,
            config,
            step_ctx,
            ..
        } = self;
        run_step_with_context(step.as_ref(), StepInput::Path(input), &config, &step_ctx)
    }
}

/// Parse `args`, run the step and report how it went. Returns the process
/// exit code.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let romancal_ctx = match RomancalContext::from_args(args) {
        Ok(romancal_ctx) => romancal_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(RomanCalError::ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match romancal_ctx.run() {
        Ok(result) => {
            info!(
                "total duration: {:?}",
                get_durations().into_iter().fold(
                    Duration::ZERO,
                    |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    }
                )
            );
            match result.output {
                Some(output) => info!("{} written to {}", result.model.class_name(), output.display()),
                None => info!("{} not saved", result.model.class_name()),
            }
            0
        }
        Err(e) => {
            eprintln!("calibration error: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datamodels::{maker::*, DataModel},
        test_common::write_reference_set,
    };
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_romancal_context_display_doesnt_crash() {
        let tmp_dir = tempdir().unwrap();
        let ref_dir = tmp_dir.path().join("refs");
        fs::create_dir(&ref_dir).unwrap();
        let references = write_reference_set(&ref_dir, (3, 2, 2));
        let input = tmp_dir.path().join("exposure_uncal.asdf");
        mk_level1_science_raw((3, 2, 2)).write_to(&input).unwrap();

        #[rustfmt::skip]
        let args = vec![
            "romancal",
            "roman_elp",
            input.to_str().unwrap(),
            "--ref-dir", ref_dir.to_str().unwrap(),
            "--override-flat", "N/A",
            "--skip-step", "linearity",
            "--no-draw-progress",
        ];
        let romancal_ctx = RomancalContext::from_args(&args).unwrap();

        assert_eq!(romancal_ctx.input_type, ModelType::ScienceRaw);
        assert!(!romancal_ctx.config.draw_progress);
        assert_eq!(
            romancal_ctx.config.overrides[&RefType::Flat],
            RefOverride::NotApplicable
        );
        assert!(!romancal_ctx.pipeline_ctx.as_ref().unwrap().linearity);

        let display = format!("{}", &romancal_ctx);
        assert!(display.contains("ExposurePipeline (roman_elp)"));
        assert!(display.contains("ScienceRawModel"));
        assert!(display.contains("Will not correct non-linearity"));
        assert!(display.contains("N/A (skip)"));
        assert!(display.contains(&references[&RefType::Dark].display().to_string()));
        // linearity is switched off
        assert!(!display.contains(&references[&RefType::Linearity].display().to_string()));
    }

    #[test]
    fn test_parse_missing_input() {
        let args = vec!["romancal", "DarkCurrentStep"];
        match RomancalContext::from_args(&args) {
            Err(RomanCalError::ClapError(inner)) => assert!(matches!(
                inner.kind(),
                clap::error::ErrorKind::MissingRequiredArgument { .. }
            )),
            Err(e) => panic!("expected missing required argument error, not {e}"),
            Ok(_) => panic!("expected error, but got Ok(_)"),
        }
    }

    #[test]
    fn test_parse_nonexistent_input() {
        let args = vec!["romancal", "DarkCurrentStep", "/nonexistent/input.asdf"];
        assert!(matches!(
            RomancalContext::from_args(&args),
            Err(RomanCalError::IOError(_))
        ));
    }

    #[test]
    fn test_parse_unknown_step() {
        let tmp_dir = tempdir().unwrap();
        let input = tmp_dir.path().join("exposure.asdf");
        mk_ramp((2, 2, 2)).write_to(&input).unwrap();

        let args = vec!["romancal", "JumpStep", input.to_str().unwrap()];
        match RomancalContext::from_args(&args) {
            Err(RomanCalError::CLIError(InvalidCommandLineArgument { option, .. })) => {
                assert_eq!(option, "<STEP>");
            }
            Err(e) => panic!("expected invalid step error, not {e}"),
            Ok(_) => panic!("expected error, but got Ok(_)"),
        }
    }

    #[test]
    fn test_parse_unknown_skip_step() {
        let tmp_dir = tempdir().unwrap();
        let input = tmp_dir.path().join("exposure.asdf");
        mk_ramp((2, 2, 2)).write_to(&input).unwrap();

        #[rustfmt::skip]
        let args = vec![
            "romancal", "roman_elp", input.to_str().unwrap(),
            "--skip-step", "jump",
        ];
        assert!(matches!(
            RomancalContext::from_args(&args),
            Err(RomanCalError::CLIError(_))
        ));
    }

    #[test]
    fn test_parse_config_with_command_line_precedence() {
        let tmp_dir = tempdir().unwrap();
        let input = tmp_dir.path().join("exposure.asdf");
        mk_ramp((2, 2, 2)).write_to(&input).unwrap();
        let config_path = tmp_dir.path().join("params.yaml");
        fs::write(
            &config_path,
            "suffix: from_config\noutput_dir: /data/out\nsave_results: false\n",
        )
        .unwrap();

        #[rustfmt::skip]
        let args = vec![
            "romancal", "romancal.step.DarkCurrentStep", input.to_str().unwrap(),
            "--config", config_path.to_str().unwrap(),
            "--suffix", "from_cli",
            "--output_file=Test_dark",
        ];
        let romancal_ctx = RomancalContext::from_args(&args).unwrap();
        assert_eq!(romancal_ctx.step.class_name(), "DarkCurrentStep");
        assert!(romancal_ctx.pipeline_ctx.is_none());
        assert_eq!(romancal_ctx.config.suffix.as_deref(), Some("from_cli"));
        assert_eq!(
            romancal_ctx.config.output_dir,
            Some(PathBuf::from("/data/out"))
        );
        assert_eq!(
            romancal_ctx.config.output_file,
            Some(PathBuf::from("Test_dark"))
        );
        assert!(!romancal_ctx.config.save_results);
    }

    #[test]
    fn test_dry_run() {
        let tmp_dir = tempdir().unwrap();
        let input = tmp_dir.path().join("exposure.asdf");
        mk_ramp((2, 2, 2)).write_to(&input).unwrap();

        let args = vec!["romancal", "dark_current", input.to_str().unwrap(), "--dry-run"];
        assert!(matches!(
            RomancalContext::from_args(&args),
            Err(RomanCalError::DryRun {})
        ));
    }
}
