use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use utils::{LogLevel, Timestamp};

use crate::param::{ModelRef, ParamValue};

/// BaseConfig
///
/// Settings shared by every stage, whatever its own schema
///
/// log_level - minimum level of messages that will be logged
/// quiet - silence all log output
/// timestamp - granularity of timestamps prepended to log entries
/// base_dir - directory that relative paths are resolved against
///
#[derive(Debug, Clone, PartialEq)]
pub struct BaseConfig {
    log_level: LogLevel,
    quiet: bool,
    timestamp: Timestamp,
    base_dir: PathBuf,
}

impl BaseConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            log_level: LogLevel::default(),
            quiet: false,
            timestamp: Timestamp::default(),
            base_dir,
        }
    }

    pub fn set_log_level(&mut self, l: LogLevel) {
        self.log_level = l
    }

    pub fn set_quiet(&mut self) {
        self.quiet = true
    }

    pub fn set_timestamp(&mut self, ts: Timestamp) {
        self.timestamp = ts
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// ResolvedConfig
///
/// Fully validated parameters for one stage invocation.
/// Built by the resolver; read only afterwards.
/// Optional parameters without a default are absent from `values`.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    base: BaseConfig,
    stage: &'static str,
    sub_stage: Option<&'static str>,
    values: BTreeMap<&'static str, ParamValue>,
}

impl ResolvedConfig {
    pub(crate) fn new(
        base: BaseConfig,
        stage: &'static str,
        sub_stage: Option<&'static str>,
        values: BTreeMap<&'static str, ParamValue>,
    ) -> Self {
        Self {
            base,
            stage,
            sub_stage,
            values,
        }
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn sub_stage(&self) -> Option<&'static str> {
        self.sub_stage
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::Int(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParamValue::Float(x)) => Some(*x),
            _ => None,
        }
    }

    /// Unset or absent flags read as false
    pub fn get_flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(ParamValue::Flag(true)))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_path(&self, name: &str) -> Option<&Path> {
        match self.get(name) {
            Some(ParamValue::Path(p)) => Some(p),
            _ => None,
        }
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelRef> {
        match self.get(name) {
            Some(ParamValue::Model(m)) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.stage)?;
        if let Some(s) = self.sub_stage {
            write!(f, " {}", s)?;
        }
        write!(f, " [log_level={}", self.base.log_level)?;
        for (k, v) in self.values.iter() {
            write!(f, ", {}={}", k, v)?;
        }
        write!(f, "]")
    }
}
