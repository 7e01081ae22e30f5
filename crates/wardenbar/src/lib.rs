//! wardenbar - Launcher backend for a Bitwarden vault
//!
//! Searches run on a redacted, encrypted cache of the item listing.
//! Secrets are resolved on demand: decrypted from the vault CLI's local
//! snapshot when the session allows it, through the CLI otherwise.
//! Syncs and favicon downloads run as single-instance background jobs.

pub mod auth;
pub mod cache;
pub mod cli;
pub mod context;
pub mod crypto;
pub mod error;
pub mod feedback;
pub mod icons;
pub mod jobs;
pub mod model;
pub mod path;
pub mod redact;
pub mod resolve;
pub mod search;
pub mod state;
pub mod token;
pub mod totp;

pub use context::Context;
pub use error::{Result, WardenError};
pub use resolve::{Resolver, SecretRequest};
pub use state::{AuthState, VaultState};
