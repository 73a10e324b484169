//! Aegis - command resolution and installer orchestration.
//!
//! Given a command a user typed, Aegis decides whether it is already
//! available, installable through a known package manager, or unknown. It
//! supports:
//!
//! - **Presence checks** against PATH and the package managers themselves
//! - **Learned mappings** from commands to install strategies, persisted as JSON
//! - **Monitored installs** with a live progress bar driven by installer output
//! - **Failure analysis** with an ordered chain of alternative installers
//! - **Assistant fallback** for commands nobody has mapped yet
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`resolver`] - The resolution state machine
//! - [`mapping_store`] - Persistent command → strategy mappings
//! - [`installers`] - Supported package managers and platform normalisation
//! - [`dispatcher`] - Runs installers and the manual download procedure
//! - [`progress`] - Progress bar animator
//! - [`analyzer`] - Failure classification and fallback chains
//! - [`assistant`] - Natural-language assistant client
//! - [`executor`] - Process plumbing behind the `ProcessRunner` trait
//! - [`ui`] - Output sink and prompt seams, terminal implementations
//! - [`config`] - Configuration file and environment overrides
//! - [`http_client`] - HTTP client abstraction
//! - [`error`] - Engine error types
//!
//! # Example
//!
//! ```ignore
//! use aegis::config::Config;
//! use aegis::resolver::CommandResolver;
//! use aegis::ui::{TerminalSink, stdin_prompt};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let mut resolver = CommandResolver::from_config(config, Arc::new(TerminalSink::new()))?;
//!     let mut prompt = stdin_prompt();
//!
//!     // Installs ripgrep if needed (after asking), then runs the search
//!     resolver.resolve("rg TODO src", prompt.as_mut()).await;
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod assistant;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod installers;
pub mod mapping_store;
pub mod progress;
pub mod resolver;
pub mod ui;

#[cfg(test)]
mod test_support;
