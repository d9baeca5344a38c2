#[macro_use]
extern crate anyhow;

use std::{
    fmt,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

mod region;

pub use region::Region;

/// LogLevel
///
/// Represents minimum level of messages that will be logged
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLevel {
    pub level: usize,
}

impl FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel { level: 0 }),
            "warn" => Ok(LogLevel { level: 1 }),
            "info" => Ok(LogLevel { level: 2 }),
            "debug" => Ok(LogLevel { level: 3 }),
            "trace" => Ok(LogLevel { level: 4 }),
            "none" => Ok(LogLevel { level: 5 }),
            _ => Err("no match"),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel { level: 2 }
    }
}

impl LogLevel {
    pub fn is_none(&self) -> bool {
        self.level > 4
    }
    pub fn get_level(&self) -> usize {
        if self.level > 4 {
            0
        } else {
            self.level
        }
    }
    /// True if debug (or more verbose) messages are shown
    pub fn is_debug(&self) -> bool {
        (3..=4).contains(&self.level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_str = ["error", "warn", "info", "debug", "trace", "none"];
        if self.level < 6 {
            write!(f, "{}", level_str[self.level])
        } else {
            write!(f, "unknown")
        }
    }
}

/// Granularity of timestamps prepended to log entries
///
/// Mirrors `stderrlog::Timestamp`, which has no `PartialEq`, so that configs
/// holding it can be compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timestamp {
    #[default]
    Off,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl FromStr for Timestamp {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::Off),
            "sec" => Ok(Self::Second),
            "ms" => Ok(Self::Millisecond),
            "us" => Ok(Self::Microsecond),
            "ns" => Ok(Self::Nanosecond),
            _ => Err("no match"),
        }
    }
}

impl From<Timestamp> for stderrlog::Timestamp {
    fn from(ts: Timestamp) -> Self {
        match ts {
            Timestamp::Off => stderrlog::Timestamp::Off,
            Timestamp::Second => stderrlog::Timestamp::Second,
            Timestamp::Millisecond => stderrlog::Timestamp::Millisecond,
            Timestamp::Microsecond => stderrlog::Timestamp::Microsecond,
            Timestamp::Nanosecond => stderrlog::Timestamp::Nanosecond,
        }
    }
}

/// Initialize logging
pub fn init_log(verbose: LogLevel, quiet: bool, ts: Timestamp) -> anyhow::Result<()> {
    let quiet = verbose.is_none() || quiet;

    stderrlog::new()
        .quiet(quiet)
        .verbosity(verbose.get_level())
        .timestamp(ts.into())
        .init()
        .map_err(|e| anyhow!("Could not initialize logging: {}", e))
}

/// Resolve `p` against `base` (if `p` is relative) and fold `.` and `..`
/// components lexically.  The filesystem is not consulted, so symbolic links
/// are not followed.  `..` never climbs above the root.
pub fn normalize_path<P: AsRef<Path>, Q: AsRef<Path>>(base: P, p: Q) -> PathBuf {
    let joined = base.as_ref().join(p.as_ref());
    let mut out = PathBuf::new();
    for c in joined.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                // Keep leading .. for relative bases
                match out.components().next_back() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => out.push(".."),
                }
            }
            c => out.push(c.as_os_str()),
        }
    }
    out
}
