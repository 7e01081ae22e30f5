//! wardenbar-core - Shared plumbing for the wardenbar launcher backend
//!
//! Paths, configuration and process queries used by every command.

pub mod config;
pub mod paths;
pub mod process;

pub use config::Config;
pub use paths::Paths;
