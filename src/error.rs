//! Typed errors raised by the resolution engine.
//!
//! Installer *failures* (a package manager ran and exited non-zero) are not
//! errors in this sense; they are captured as [`InstallResult`]s and
//! classified by the [`analyzer`](crate::analyzer). The variants here cover
//! the cases where the engine cannot even get that far.
//!
//! [`InstallResult`]: crate::dispatcher::InstallResult

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AegisError {
    /// The installer name is not one of the supported package managers.
    #[error("unsupported installer '{0}'")]
    UnsupportedInstaller(String),

    /// An install-command string or mapping record could not be interpreted.
    #[error("could not parse {what}: '{input}'")]
    Parse { what: &'static str, input: String },

    /// The external assistant could not be reached or answered with garbage.
    #[error("assistant unavailable: {0}")]
    AssistantUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AegisError {
    pub fn parse(what: &'static str, input: impl Into<String>) -> Self {
        Self::Parse {
            what,
            input: input.into(),
        }
    }
}
