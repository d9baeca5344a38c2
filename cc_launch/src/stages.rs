//! The pipeline stages known to the launcher and the backend that runs them.
//!
//! Every stage is run by the external pipeline program as
//! `<program> <stage> [<sub-stage>] <arguments>`, with the arguments rebuilt
//! from the resolved configuration in schema order.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Context;

use crate::{
    config::ResolvedConfig,
    errors::Result,
    param::{
        fraction, non_negative, positive, quantization_bits, region, ParamKind, ParamValue,
        ParameterSpec,
    },
    registry::{Registry, Stage, StageDescriptor},
};

pub const DEFAULT_MODEL: &str = "r941_min_hac_g507";

pub const FEATURE_ENCODERS: &[&str] = &[
    "CountsFeatureEncoder",
    "HardRLEFeatureEncoder",
    "SymHardRLEFeatureEncoder",
    "SoftRLEFeatureEncoder",
    "SampleReadsFeatureEncoder",
];

/// Stage run by an external program
pub struct ExternalStage {
    program: PathBuf,
    command: Vec<&'static str>,
    schema: Vec<ParameterSpec>,
}

impl ExternalStage {
    pub fn new<P: AsRef<Path>>(program: P, command: Vec<&'static str>, schema: &[ParameterSpec]) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            command,
            schema: schema.to_vec(),
        }
    }

    /// Argument list handed to the program
    pub fn args(&self, cfg: &ResolvedConfig) -> Vec<OsString> {
        let mut v: Vec<OsString> = self.command.iter().map(OsString::from).collect();
        for p in self.schema.iter() {
            let flag = || OsString::from(format!("--{}", p.name()));
            match cfg.get(p.name()) {
                None | Some(ParamValue::Flag(false)) => {}
                Some(ParamValue::Flag(true)) => v.push(flag()),
                Some(x) if p.is_positional() => v.push(x.to_os_string()),
                Some(x) => {
                    v.push(flag());
                    v.push(x.to_os_string())
                }
            }
        }
        let base = cfg.base();
        let level = base.log_level();
        if base.quiet() || level.is_none() || level.level < 2 {
            v.push("--quiet".into())
        } else if level.is_debug() {
            v.push("--debug".into())
        }
        v
    }
}

impl Stage for ExternalStage {
    fn run(&self, cfg: &ResolvedConfig) -> anyhow::Result<()> {
        let args = self.args(cfg);
        debug!(
            "Executing {} {}",
            self.program.display(),
            args.iter()
                .map(|s| s.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .with_context(|| format!("Could not start {}", self.program.display()))?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} {} exited with {}",
                self.program.display(),
                self.command.join(" "),
                status
            ))
        }
    }
}

// Parameters shared between several stages

fn bam() -> ParameterSpec {
    ParameterSpec::positional("bam", ParamKind::InputPath, "Input alignments of reads to draft")
        .value_name("BAM")
}

fn output(help: &'static str) -> ParameterSpec {
    ParameterSpec::positional("output", ParamKind::OutputPath, help).value_name("OUTPUT")
}

fn model() -> ParameterSpec {
    ParameterSpec::option("model", ParamKind::Model, "Model name or path to model file")
        .default_value(DEFAULT_MODEL)
}

fn batch_size() -> ParameterSpec {
    ParameterSpec::option("batch_size", ParamKind::Int, "Number of chunks per batch")
        .default_value("100")
        .check(positive)
}

fn threads() -> ParameterSpec {
    ParameterSpec::option("threads", ParamKind::Int, "Number of threads")
        .default_value("1")
        .check(positive)
}

fn full_precision() -> ParameterSpec {
    ParameterSpec::option(
        "full_precision",
        ParamKind::Flag,
        "Run the model without reduced precision",
    )
}

fn quantization() -> ParameterSpec {
    ParameterSpec::option(
        "quantization",
        ParamKind::Int,
        "Quantize model weights to this many bits (2, 3, 4 or 8)",
    )
    .check(quantization_bits)
}

fn region_opt() -> ParameterSpec {
    ParameterSpec::option(
        "region",
        ParamKind::Str,
        "Genomic region to process (contig, contig:start-end, contig:-end)",
    )
    .value_name("REGION")
    .check(region)
}

fn chunk_len() -> ParameterSpec {
    ParameterSpec::option("chunk_len", ParamKind::Int, "Chunk length of samples")
        .default_value("10000")
        .check(positive)
}

fn chunk_ovlp() -> ParameterSpec {
    ParameterSpec::option("chunk_ovlp", ParamKind::Int, "Overlap of chunks")
        .default_value("1000")
        .check(non_negative)
}

fn calling_schema(output_help: &'static str) -> Vec<ParameterSpec> {
    vec![
        bam(),
        output(output_help),
        model(),
        batch_size(),
        threads(),
        full_precision(),
        quantization(),
        region_opt(),
        chunk_len(),
        chunk_ovlp(),
    ]
}

fn external(
    program: &Path,
    command: Vec<&'static str>,
    about: &'static str,
    schema: Vec<ParameterSpec>,
) -> StageDescriptor {
    let name = command.last().copied().unwrap_or_default();
    let stage = ExternalStage::new(program, command, &schema);
    StageDescriptor::single(name, about, schema, stage)
}

fn tools(program: &Path) -> StageDescriptor {
    StageDescriptor::namespace(
        "tools",
        "Auxiliary tools",
        vec![
            external(
                program,
                vec!["tools", "list_models"],
                "List available models",
                Vec::new(),
            ),
            external(
                program,
                vec!["tools", "resolve_model"],
                "Resolve a model name to the path of its file",
                vec![ParameterSpec::option(
                    "model",
                    ParamKind::Model,
                    "Model name or path to model file",
                )
                .required()],
            ),
            external(
                program,
                vec!["tools", "download_models"],
                "Download models into a local directory",
                vec![
                    ParameterSpec::option(
                        "save_dir",
                        ParamKind::OutputPath,
                        "Directory for downloaded models [default: package model directory]",
                    ),
                    ParameterSpec::option(
                        "models",
                        ParamKind::Str,
                        "Comma separated model names to download [default: all]",
                    )
                    .value_name("NAMES"),
                ],
            ),
        ],
    )
}

/// Registry with all pipeline stages, run by `program`
pub fn standard_registry<P: AsRef<Path>>(program: P) -> Result<Registry> {
    let program = program.as_ref();
    Ok(Registry::builder()
        .register(external(
            program,
            vec!["features"],
            "Create features for training",
            vec![
                bam(),
                output("Output feature store (HDF)"),
                ParameterSpec::option(
                    "truth",
                    ParamKind::InputPath,
                    "Alignments of truth sequence to draft",
                ),
                threads(),
                region_opt(),
                batch_size(),
                chunk_len(),
                chunk_ovlp(),
                ParameterSpec::option(
                    "feature_encoder",
                    ParamKind::Choice(FEATURE_ENCODERS),
                    "Feature encoder",
                )
                .default_value(FEATURE_ENCODERS[0]),
            ],
        ))?
        .register(external(
            program,
            vec!["train"],
            "Train a model from features",
            vec![
                ParameterSpec::positional(
                    "features",
                    ParamKind::InputPath,
                    "Training feature store (HDF)",
                )
                .value_name("FEATURES"),
                ParameterSpec::option(
                    "train_name",
                    ParamKind::OutputPath,
                    "Output directory for the training run",
                )
                .default_value("training"),
                ParameterSpec::option("epochs", ParamKind::Int, "Maximum number of epochs")
                    .default_value("5000")
                    .check(positive),
                batch_size(),
                quantization(),
                ParameterSpec::option(
                    "model",
                    ParamKind::Model,
                    "Model to continue training from",
                ),
                ParameterSpec::option(
                    "validation_split",
                    ParamKind::Float,
                    "Fraction of data to hold back for validation",
                )
                .default_value("0.2")
                .check(fraction),
            ],
        ))?
        .register(
            external(
                program,
                vec!["quantization"],
                "Quantize a trained model and evaluate it",
                vec![
                    bam(),
                    output("Output consensus probabilities (HDF)"),
                    model(),
                    batch_size(),
                    threads(),
                    full_precision(),
                    quantization(),
                ],
            )
            .exclusive("full_precision", "quantization"),
        )?
        .register(
            external(
                program,
                vec!["consensus"],
                "Run a packaged model to produce consensus probabilities",
                calling_schema("Output consensus probabilities (HDF)"),
            )
            .exclusive("full_precision", "quantization"),
        )?
        .register(
            external(
                program,
                vec!["inference"],
                "Run inference with a named model and dump probabilities",
                calling_schema("Output probabilities (HDF)"),
            )
            .exclusive("full_precision", "quantization"),
        )?
        .register(tools(program))?
        .build())
}
