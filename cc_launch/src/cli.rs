use std::{env, path::PathBuf};

use anyhow::Context;

use cc_launch::{LaunchError, Launcher, ResolvedConfig};
use utils::init_log;

/// Directory holding the launcher executable.  Relative paths on the command
/// line are resolved against this unless `--base_dir` is given.
pub fn launcher_dir() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe().with_context(|| "Could not locate launcher executable")?;
    exe.parent()
        .map(|p| p.to_owned())
        .ok_or_else(|| anyhow!("Launcher executable {} has no parent directory", exe.display()))
}

/// Handle command line options.  Set up ResolvedConfig
pub fn handle_cli(launcher: &mut Launcher) -> anyhow::Result<ResolvedConfig> {
    let cfg = match launcher.resolve(env::args_os()) {
        Ok(cfg) => cfg,
        // clap prints usage, help and version itself and picks the exit code
        Err(LaunchError::ArgumentSyntax(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    // Setup logging
    let base = cfg.base();
    init_log(base.log_level(), base.quiet(), base.timestamp())?;

    debug!("Processing command line options");
    // Parsing happened before logging was set up
    debug!(
        "Run state {}",
        launcher
            .trail()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    debug!("Relative paths resolved against {}", base.base_dir().display());

    Ok(cfg)
}
