use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::{builder::PossibleValuesParser, value_parser, Arg, ArgAction, ArgMatches};

use utils::{normalize_path, Region};

use crate::errors::{LaunchError, Result};

/// Bit widths accepted by `--quantization`
pub const QUANTIZATION_BITS: [i64; 4] = [2, 3, 4, 8];

/// File name endings that mark a `--model` value as a path rather than a model name
const MODEL_FILE_SUFFIXES: [&str; 4] = [".tar.gz", ".hdf5", ".hdf", ".onnx"];

/// Validation predicate attached to a parameter
pub type Check = fn(&ParamValue) -> std::result::Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Flag,
    /// File read by the stage; resolved against the base directory
    InputPath,
    /// File written by the stage; resolved against the base directory and
    /// its parent checked as creatable
    OutputPath,
    /// Model name or path to a model file
    Model,
    Choice(&'static [&'static str]),
}

impl ParamKind {
    fn value_name(&self) -> &'static str {
        match self {
            Self::Str | Self::Choice(_) => "STRING",
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Flag => "",
            Self::InputPath | Self::OutputPath => "PATH",
            Self::Model => "MODEL",
        }
    }
}

/// Reference to a model, either by registered name or by file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    Name(String),
    File(PathBuf),
}

impl ModelRef {
    fn parse(s: &str, base: &Path) -> Self {
        if s.contains('/')
            || s.contains(std::path::MAIN_SEPARATOR)
            || MODEL_FILE_SUFFIXES.iter().any(|x| s.ends_with(x))
        {
            Self::File(normalize_path(base, s))
        } else {
            Self::Name(s.to_owned())
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Name(s) => write!(f, "{}", s),
            Self::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Typed value of a resolved parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Flag(bool),
    Path(PathBuf),
    Model(ModelRef),
}

impl ParamValue {
    /// Form used when passing the value on to a stage program
    pub fn to_os_string(&self) -> OsString {
        match self {
            Self::Path(p) => p.as_os_str().to_owned(),
            Self::Model(ModelRef::File(p)) => p.as_os_str().to_owned(),
            v => OsString::from(v.to_string()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", s),
            Self::Int(x) => write!(f, "{}", x),
            Self::Float(x) => write!(f, "{}", x),
            Self::Flag(b) => write!(f, "{}", b),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Model(m) => write!(f, "{}", m),
        }
    }
}

/// Declaration of one stage parameter
#[derive(Clone)]
pub struct ParameterSpec {
    name: &'static str,
    kind: ParamKind,
    positional: bool,
    required: bool,
    default: Option<&'static str>,
    value_name: Option<&'static str>,
    help: &'static str,
    check: Option<Check>,
}

impl fmt::Debug for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("positional", &self.positional)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("check", &self.check.is_some())
            .finish()
    }
}

impl ParameterSpec {
    /// Required positional argument
    pub fn positional(name: &'static str, kind: ParamKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            positional: true,
            required: true,
            default: None,
            value_name: None,
            help,
            check: None,
        }
    }

    /// Optional `--name` argument
    pub fn option(name: &'static str, kind: ParamKind, help: &'static str) -> Self {
        Self {
            positional: false,
            required: false,
            ..Self::positional(name, kind, help)
        }
    }

    pub fn default_value(mut self, d: &'static str) -> Self {
        self.default = Some(d);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn value_name(mut self, s: &'static str) -> Self {
        self.value_name = Some(s);
        self
    }

    pub fn check(mut self, f: Check) -> Self {
        self.check = Some(f);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default(&self) -> Option<&'static str> {
        self.default
    }

    /// clap definition for this parameter
    pub(crate) fn to_arg(&self) -> Arg {
        let mut a = Arg::new(self.name).help(self.help);
        if !self.positional {
            a = a.long(self.name)
        }
        a = match self.kind {
            ParamKind::Flag => a.action(ArgAction::SetTrue),
            ParamKind::Int => a
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true),
            ParamKind::Float => a
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true),
            ParamKind::InputPath | ParamKind::OutputPath => {
                a.value_parser(value_parser!(PathBuf))
            }
            ParamKind::Str | ParamKind::Model => a.value_parser(value_parser!(String)),
            ParamKind::Choice(v) => a.value_parser(PossibleValuesParser::new(v.iter().copied())),
        };
        if self.kind != ParamKind::Flag {
            a = a.value_name(self.value_name.unwrap_or(self.kind.value_name()))
        }
        if self.required {
            a = a.required(true)
        }
        if let Some(d) = self.default {
            a = a.default_value(d)
        }
        a
    }

    /// Pull the typed value of this parameter from parsed matches, resolving
    /// paths against `base` and running the validation predicate.
    pub(crate) fn extract(&self, m: &ArgMatches, base: &Path) -> Result<Option<ParamValue>> {
        let id = self.name;
        let v = match self.kind {
            ParamKind::Flag => Some(ParamValue::Flag(m.get_flag(id))),
            ParamKind::Int => m.get_one::<i64>(id).map(|x| ParamValue::Int(*x)),
            ParamKind::Float => m.get_one::<f64>(id).map(|x| ParamValue::Float(*x)),
            ParamKind::InputPath | ParamKind::OutputPath => m
                .get_one::<PathBuf>(id)
                .map(|p| ParamValue::Path(normalize_path(base, p))),
            ParamKind::Model => m
                .get_one::<String>(id)
                .map(|s| ParamValue::Model(ModelRef::parse(s, base))),
            ParamKind::Str | ParamKind::Choice(_) => {
                m.get_one::<String>(id).map(|s| ParamValue::Str(s.clone()))
            }
        };
        if let (Some(f), Some(x)) = (self.check, v.as_ref()) {
            f(x).map_err(|e| LaunchError::value(id, e))?
        }
        Ok(v)
    }
}

// Validation predicates

pub fn positive(v: &ParamValue) -> std::result::Result<(), String> {
    match v {
        ParamValue::Int(x) if *x > 0 => Ok(()),
        ParamValue::Int(x) => Err(format!("{} is not a positive integer", x)),
        _ => Err(format!("expected an integer, found {}", v)),
    }
}

pub fn non_negative(v: &ParamValue) -> std::result::Result<(), String> {
    match v {
        ParamValue::Int(x) if *x >= 0 => Ok(()),
        ParamValue::Int(x) => Err(format!("{} is negative", x)),
        _ => Err(format!("expected an integer, found {}", v)),
    }
}

pub fn quantization_bits(v: &ParamValue) -> std::result::Result<(), String> {
    match v {
        ParamValue::Int(x) if QUANTIZATION_BITS.contains(x) => Ok(()),
        _ => Err(format!(
            "{} is not a supported bit width (choose from {:?})",
            v, QUANTIZATION_BITS
        )),
    }
}

/// Open interval (0, 1)
pub fn fraction(v: &ParamValue) -> std::result::Result<(), String> {
    match v {
        ParamValue::Float(x) if *x > 0.0 && *x < 1.0 => Ok(()),
        _ => Err(format!("{} is not between 0 and 1", v)),
    }
}

pub fn region(v: &ParamValue) -> std::result::Result<(), String> {
    match v {
        ParamValue::Str(s) => Region::from_str(s)
            .map(|_| ())
            .map_err(|e| format!("{:#}", e)),
        _ => Err(format!("{} is not a region", v)),
    }
}
