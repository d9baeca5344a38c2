use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use clap::{parser::ValueSource, value_parser, Arg, ArgAction, ArgMatches};

use utils::{normalize_path, LogLevel, Timestamp};

use crate::{
    config::{BaseConfig, ResolvedConfig},
    errors::{LaunchError, Result},
    param::{ParamKind, ParamValue, ParameterSpec},
    registry::{Registry, StageDescriptor, StageKind},
};

/// ResolveContext
///
/// Information supplied by the caller rather than the argument list
///
/// base_dir - directory that relative paths are resolved against
/// available_cores - upper limit for `--threads`
///
#[derive(Debug, Clone)]
pub struct ResolveContext {
    base_dir: PathBuf,
    available_cores: usize,
}

impl ResolveContext {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_owned(),
            available_cores: num_cpus::get(),
        }
    }

    pub fn set_available_cores(&mut self, n: usize) {
        self.available_cores = n
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn available_cores(&self) -> usize {
        self.available_cores
    }
}

/// Options accepted by every stage.  Global so that they are also accepted
/// after the sub-stage name of a namespace.
pub(crate) fn base_args() -> [Arg; 4] {
    [
        Arg::new("timestamp")
            .short('X')
            .long("timestamp")
            .value_parser(value_parser!(Timestamp))
            .value_name("GRANULARITY")
            .default_value("none")
            .global(true)
            .help("Prepend log entries with a timestamp"),
        Arg::new("loglevel")
            .short('l')
            .long("loglevel")
            .value_name("LOGLEVEL")
            .value_parser(value_parser!(LogLevel))
            .ignore_case(true)
            .default_value("info")
            .global(true)
            .help("Set log level"),
        Arg::new("quiet")
            .short('q')
            .action(ArgAction::SetTrue)
            .long("quiet")
            .conflicts_with("loglevel")
            .global(true)
            .help("Silence all output"),
        Arg::new("base_dir")
            .long("base_dir")
            .value_parser(value_parser!(PathBuf))
            .value_name("PATH")
            .global(true)
            .help("Resolve relative paths against PATH [default: launcher directory]"),
    ]
}

/// Resolve the arguments of a single stage.  `args` holds everything after
/// the stage name.
pub fn resolve<I, T>(desc: &StageDescriptor, args: I, ctx: &ResolveContext) -> Result<ResolvedConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let argv = std::iter::once(OsString::from(desc.name())).chain(args.into_iter().map(Into::into));
    let m = desc.command().try_get_matches_from(argv)?;
    resolve_matches(desc, &m, ctx)
}

/// Resolve a full command line (program name first) against the registry
pub fn resolve_cli<I, T>(registry: &Registry, argv: I, ctx: &ResolveContext) -> Result<ResolvedConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let m = registry.cli_model().try_get_matches_from(argv)?;
    let (name, sm) = m
        .subcommand()
        .ok_or_else(|| LaunchError::UnknownStage(String::new()))?;
    resolve_matches(registry.lookup(name)?, sm, ctx)
}

fn resolve_matches(
    desc: &StageDescriptor,
    m: &ArgMatches,
    ctx: &ResolveContext,
) -> Result<ResolvedConfig> {
    let base = base_config(m, ctx);
    match desc.kind() {
        StageKind::Single {
            schema, exclusive, ..
        } => {
            let values = resolve_values(schema, exclusive, m, &base, ctx)?;
            Ok(ResolvedConfig::new(base, desc.name(), None, values))
        }
        StageKind::Namespace { .. } => match m.subcommand() {
            None => Ok(ResolvedConfig::new(
                base,
                desc.name(),
                None,
                BTreeMap::new(),
            )),
            Some((name, sm)) => {
                let sub = desc.sub_stage(name)?;
                let base = base_config(sm, ctx);
                let values = match sub.kind() {
                    StageKind::Single {
                        schema, exclusive, ..
                    } => resolve_values(schema, exclusive, sm, &base, ctx)?,
                    StageKind::Namespace { .. } => BTreeMap::new(),
                };
                Ok(ResolvedConfig::new(base, desc.name(), Some(sub.name()), values))
            }
        },
    }
}

fn base_config(m: &ArgMatches, ctx: &ResolveContext) -> BaseConfig {
    let base_dir = m
        .get_one::<PathBuf>("base_dir")
        .map(|p| normalize_path(ctx.base_dir(), p))
        .unwrap_or_else(|| ctx.base_dir().to_owned());
    let mut base = BaseConfig::new(base_dir);
    if let Some(l) = m.get_one::<LogLevel>("loglevel") {
        base.set_log_level(*l)
    }
    if let Some(ts) = m.get_one::<Timestamp>("timestamp") {
        base.set_timestamp(*ts)
    }
    if m.get_flag("quiet") {
        base.set_quiet()
    }
    base
}

fn resolve_values(
    schema: &[ParameterSpec],
    exclusive: &[(&'static str, &'static str)],
    m: &ArgMatches,
    base: &BaseConfig,
    ctx: &ResolveContext,
) -> Result<BTreeMap<&'static str, ParamValue>> {
    let mut values = BTreeMap::new();
    for p in schema.iter() {
        if let Some(v) = p.extract(m, base.base_dir())? {
            if let (ParamKind::OutputPath, ParamValue::Path(path)) = (p.kind(), &v) {
                check_output_parent(p.name(), path)?
            }
            values.insert(p.name(), v);
        }
    }

    // Mutually exclusive options are only in conflict when both come from the command line
    let given = |id: &str| m.value_source(id) == Some(ValueSource::CommandLine);
    for &(a, b) in exclusive.iter() {
        if given(a) && given(b) {
            return Err(LaunchError::value(
                b,
                format!("--{} can not be used together with --{}", b, a),
            ));
        }
    }

    check_shared(&values, ctx)?;
    Ok(values)
}

/// Consistency checks between parameters that several stages share
fn check_shared(values: &BTreeMap<&'static str, ParamValue>, ctx: &ResolveContext) -> Result<()> {
    if let Some(ParamValue::Int(t)) = values.get("threads") {
        if *t as usize > ctx.available_cores() {
            return Err(LaunchError::value(
                "threads",
                format!(
                    "{} threads requested but only {} cores available",
                    t,
                    ctx.available_cores()
                ),
            ));
        }
    }
    if let (Some(ParamValue::Int(len)), Some(ParamValue::Int(ovlp))) =
        (values.get("chunk_len"), values.get("chunk_ovlp"))
    {
        if ovlp >= len {
            return Err(LaunchError::value(
                "chunk_ovlp",
                format!("overlap ({}) must be less than chunk length ({})", ovlp, len),
            ));
        }
    }
    Ok(())
}

/// The nearest existing ancestor of an output file must be a directory.
/// Nothing is created.
fn check_output_parent(name: &str, p: &Path) -> Result<()> {
    if p.file_name().is_none() {
        return Err(LaunchError::value(
            name,
            format!("{} does not name a file", p.display()),
        ));
    }
    let mut anc = p.parent();
    while let Some(d) = anc {
        match fs::metadata(d) {
            Ok(md) if md.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(LaunchError::value(
                    name,
                    format!("can not create {}: {} is not a directory", p.display(), d.display()),
                ))
            }
            Err(_) => anc = d.parent(),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{positive, quantization_bits};
    use pretty_assertions::assert_eq;

    fn noop(_: &ResolvedConfig) -> anyhow::Result<()> {
        Ok(())
    }

    fn desc() -> StageDescriptor {
        StageDescriptor::single(
            "consensus",
            "test stage",
            vec![
                ParameterSpec::positional("bam", ParamKind::InputPath, "input"),
                ParameterSpec::positional("output", ParamKind::OutputPath, "output"),
                ParameterSpec::option("threads", ParamKind::Int, "threads")
                    .default_value("1")
                    .check(positive),
                ParameterSpec::option("chunk_len", ParamKind::Int, "len")
                    .default_value("10000")
                    .check(positive),
                ParameterSpec::option("chunk_ovlp", ParamKind::Int, "ovlp").default_value("1000"),
                ParameterSpec::option("full_precision", ParamKind::Flag, "fp"),
                ParameterSpec::option("quantization", ParamKind::Int, "bits")
                    .check(quantization_bits),
            ],
            noop,
        )
        .exclusive("full_precision", "quantization")
    }

    fn ctx(dir: &Path) -> ResolveContext {
        let mut c = ResolveContext::new(dir);
        c.set_available_cores(4);
        c
    }

    #[test]
    fn base_options_defaulted() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = resolve(&desc(), ["a.bam", "out.hdf"], &ctx(tmp.path())).unwrap();
        assert_eq!(cfg.base().log_level(), LogLevel::default());
        assert!(!cfg.base().quiet());
        assert_eq!(cfg.base().timestamp(), Timestamp::Off);
        assert_eq!(cfg.base().base_dir(), tmp.path());
    }

    #[test]
    fn base_dir_option_overrides_context() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("run")).unwrap();
        let cfg = resolve(
            &desc(),
            ["a.bam", "out.hdf", "--base_dir", "run", "-l", "debug"],
            &ctx(tmp.path()),
        )
        .unwrap();
        assert_eq!(cfg.get_path("bam").unwrap(), tmp.path().join("run/a.bam"));
        assert_eq!(cfg.base().log_level().to_string(), "debug");
    }

    #[test]
    fn quiet_conflicts_with_explicit_level() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolve(
            &desc(),
            ["a.bam", "out.hdf", "-q", "-l", "warn"],
            &ctx(tmp.path()),
        );
        assert!(matches!(r, Err(LaunchError::ArgumentSyntax(_))));
    }

    #[test]
    fn exclusive_flags_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolve(
            &desc(),
            ["a.bam", "out.hdf", "--full_precision", "--quantization", "3"],
            &ctx(tmp.path()),
        );
        assert!(matches!(r, Err(LaunchError::ArgumentValue { .. })));
    }

    #[test]
    fn too_many_threads_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolve(
            &desc(),
            ["a.bam", "out.hdf", "--threads", "5"],
            &ctx(tmp.path()),
        );
        assert!(
            matches!(r, Err(LaunchError::ArgumentValue { parameter, .. }) if parameter == "threads")
        );
    }

    #[test]
    fn overlap_must_be_shorter_than_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolve(
            &desc(),
            ["a.bam", "out.hdf", "--chunk_len", "500", "--chunk_ovlp", "500"],
            &ctx(tmp.path()),
        );
        assert!(
            matches!(r, Err(LaunchError::ArgumentValue { parameter, .. }) if parameter == "chunk_ovlp")
        );
    }

    #[test]
    fn output_parent_may_not_exist_yet() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = resolve(
            &desc(),
            ["a.bam", "new/deeper/out.hdf"],
            &ctx(tmp.path()),
        )
        .unwrap();
        assert_eq!(
            cfg.get_path("output").unwrap(),
            tmp.path().join("new/deeper/out.hdf")
        );
        assert!(!tmp.path().join("new").exists());
    }

    #[test]
    fn output_below_a_file_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("plain"), b"x").unwrap();
        let r = resolve(&desc(), ["a.bam", "plain/out.hdf"], &ctx(tmp.path()));
        assert!(
            matches!(r, Err(LaunchError::ArgumentValue { parameter, .. }) if parameter == "output")
        );
    }

    #[test]
    fn missing_positional_is_syntax_error() {
        let tmp = tempfile::tempdir().unwrap();
        let r = resolve(&desc(), ["a.bam"], &ctx(tmp.path()));
        assert!(matches!(r, Err(LaunchError::ArgumentSyntax(_))));
        let r = resolve(&desc(), ["a.bam", "o.hdf", "--threads", "two"], &ctx(tmp.path()));
        assert!(matches!(r, Err(LaunchError::ArgumentSyntax(_))));
        let r = resolve(&desc(), ["a.bam", "o.hdf", "--colour"], &ctx(tmp.path()));
        assert!(matches!(r, Err(LaunchError::ArgumentSyntax(_))));
    }
}
