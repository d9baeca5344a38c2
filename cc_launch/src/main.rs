mod cli;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use std::{env, io, path::PathBuf};

use anyhow::Context;

use cc_launch::{stages::standard_registry, Launcher, ResolveContext};

/// Environment variable naming the pipeline program that runs the stages
const PIPELINE_ENV: &str = "CC_LAUNCH_PIPELINE";

fn main() -> anyhow::Result<()> {
    // Some filesystems need HDF5 file locking disabled
    env::set_var("HDF5_USE_FILE_LOCKING", "FALSE");

    let program = env::var_os(PIPELINE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("medaka"));
    let registry = standard_registry(&program).with_context(|| "Error setting up stages")?;

    let ctx = ResolveContext::new(cli::launcher_dir()?);
    let mut launcher = Launcher::new(&registry, ctx);
    let cfg =
        cli::handle_cli(&mut launcher).with_context(|| "Error processing command line arguments")?;

    debug!("Stages run by {}", program.display());
    launcher.dispatch(&cfg, &mut io::stdout().lock())?;
    Ok(())
}
