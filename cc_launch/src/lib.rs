//! Stage selection, argument resolution and dispatch for the
//! consensus-correction pipeline.

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod param;
pub mod registry;
pub mod resolve;
pub mod stages;

pub use config::{BaseConfig, ResolvedConfig};
pub use dispatch::{dispatch, Launcher, RunState, StageResult};
pub use errors::LaunchError;
pub use registry::{Registry, Stage, StageDescriptor};
pub use resolve::{resolve, ResolveContext};
