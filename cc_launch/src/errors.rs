//! Error types for the launcher.

use thiserror::Error;

/// Errors that end a launcher run.
///
/// None of these are recovered from: each is reported at the process boundary
/// and the run exits non-zero.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A stage name that is not in the registry.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// The same stage name registered twice.
    #[error("Stage {0} registered more than once")]
    DuplicateStage(String),

    /// The same parameter name declared twice in one stage schema.
    #[error("Parameter {parameter} declared more than once for stage {stage}")]
    DuplicateParameter { stage: String, parameter: String },

    /// An exclusivity policy naming a parameter missing from the stage schema.
    #[error("Stage {stage} has no parameter {parameter}")]
    UnknownParameter { stage: String, parameter: String },

    /// Malformed command line: unknown flag, wrong type, missing value.
    #[error(transparent)]
    ArgumentSyntax(#[from] clap::Error),

    /// Well formed value that is not acceptable.
    #[error("Invalid value for {parameter}: {message}")]
    ArgumentValue { parameter: String, message: String },

    /// Launcher step taken out of order, e.g. dispatching twice.
    #[error("Can not {action} a run in state {state}")]
    InvalidRunState { state: String, action: &'static str },

    /// Failure reported by the stage implementation.
    #[error("Stage {stage} failed")]
    StageExecution {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn value<P: Into<String>, M: Into<String>>(parameter: P, message: M) -> Self {
        Self::ArgumentValue {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;
