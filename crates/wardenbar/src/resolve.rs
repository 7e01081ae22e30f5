//! Secret resolution
//!
//! A field is answered from the local snapshot when possible: unwrap the
//! vault key with the session token, find the cipher string under the
//! item, decrypt it. Anything that goes wrong on that path falls back to
//! asking the CLI, which is authoritative. Both paths must produce the
//! same plaintext for the same field.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cli::{CliRequest, CliRunner};
use crate::crypto::{self, KeyUnwrap};
use crate::error::{preview, Result, WardenError};
use crate::path::{self, FieldPath};
use crate::state::{AuthState, VaultState};
use crate::token::TokenStore;
use crate::totp;

/// What the caller wants resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretRequest {
    pub item_id: String,
    pub path: FieldPath,
    pub totp: bool,
    pub attachment_id: Option<String>,
}

impl SecretRequest {
    pub fn field(item_id: &str, path: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            path: FieldPath::parse(path),
            ..Self::default()
        }
    }

    pub fn totp(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            totp: true,
            ..Self::default()
        }
    }

    pub fn attachment(item_id: &str, attachment_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            attachment_id: Some(attachment_id.to_string()).filter(|id| !id.is_empty()),
            ..Self::default()
        }
    }

    /// Path looked up in the snapshot; TOTP requests always read the seed
    fn local_path(&self) -> FieldPath {
        if self.totp {
            path::totp_seed_path()
        } else {
            self.path.clone()
        }
    }
}

/// The resolution pipeline and its collaborators
pub struct Resolver<'a> {
    state: &'a VaultState,
    tokens: &'a dyn TokenStore,
    keys: &'a dyn KeyUnwrap,
    cli: &'a dyn CliRunner,
    output_folder: PathBuf,
}

impl<'a> Resolver<'a> {
    pub fn new(
        state: &'a VaultState,
        tokens: &'a dyn TokenStore,
        keys: &'a dyn KeyUnwrap,
        cli: &'a dyn CliRunner,
        output_folder: &Path,
    ) -> Self {
        Self {
            state,
            tokens,
            keys,
            cli,
            output_folder: output_folder.to_path_buf(),
        }
    }

    /// Resolve one field, TOTP code or attachment
    pub fn resolve(&self, request: &SecretRequest) -> Result<String> {
        match self.state.auth_state() {
            AuthState::NotLoggedIn => return Err(WardenError::NotLoggedIn),
            AuthState::Locked => return Err(WardenError::Locked),
            AuthState::Unlocked => {}
        }
        let token = self.tokens.get()?;

        if request.attachment_id.is_none() {
            match self.resolve_local(request, &token) {
                Ok(value) => return Ok(value),
                Err(e) => debug!("local resolution of {} failed, asking the CLI: {}", request.item_id, e),
            }
        }

        self.resolve_remote(request, &token)
    }

    /// Decrypt straight from the snapshot. Every error here is recoverable.
    fn resolve_local(&self, request: &SecretRequest, token: &str) -> Result<String> {
        let field = request.local_path();
        if field.is_empty() {
            return Err(WardenError::LocalFieldNotFound(
                "whole items are only available from the CLI".to_string(),
            ));
        }

        let key = self.keys.unwrap_key(self.state, token)?;

        let source = self
            .state
            .source_path
            .as_deref()
            .ok_or_else(|| WardenError::LocalFieldNotFound("no snapshot file".to_string()))?;
        // the decoded state keeps no cipher data, so read the file again
        let raw = fs::read(source)
            .map_err(|e| WardenError::LocalFieldNotFound(format!("{}: {e}", source.display())))?;
        let document: Value = serde_json::from_slice(&raw)
            .map_err(|e| WardenError::LocalFieldNotFound(format!("{}: {e}", source.display())))?;

        let full_path = self.state.cipher_path(&request.item_id).join(&field);
        let plaintext = match full_path.lookup(&document) {
            Some(Value::String(cipher)) if !cipher.is_empty() => {
                debug!("found {} locally: {}", full_path, preview(cipher));
                crypto::decrypt_field(cipher, &key)?
            }
            // unencrypted scalars such as `type` or `favorite`
            Some(scalar @ (Value::Number(_) | Value::Bool(_))) if !request.totp => scalar.to_string(),
            _ => return Err(WardenError::LocalFieldNotFound(full_path.to_string())),
        };

        let value = if request.totp {
            totp::current_code(&plaintext)?
        } else {
            plaintext
        };
        debug!("resolved {} locally: {}", field, preview(&value));
        Ok(value)
    }

    fn resolve_remote(&self, request: &SecretRequest, token: &str) -> Result<String> {
        let cli_request = match &request.attachment_id {
            Some(attachment) => {
                info!("getting attachment {} for item {}", attachment, request.item_id);
                CliRequest::get_attachment(attachment, &request.item_id, &self.output_folder, token)
            }
            None if request.totp => CliRequest::get_totp(&request.item_id, token),
            None => CliRequest::get_item(&request.item_id, token),
        };

        let lines = self.cli.run(&cli_request)?;
        if lines.is_empty() {
            debug!("CLI returned nothing for {}", request.item_id);
            return Ok(String::new());
        }
        let output = lines.join("\n");

        if request.totp || request.attachment_id.is_some() || request.path.is_empty() {
            return Ok(output);
        }

        let value = extract_field(&output, &request.path).ok_or_else(|| WardenError::FieldNotFound {
            item: request.item_id.clone(),
            path: request.path.to_string(),
        })?;
        debug!("resolved {} through the CLI: {}", request.path, preview(&value));
        Ok(value)
    }
}

/// Narrow a CLI result to `path`. Output that is not a JSON object or array
/// is returned unchanged.
pub fn extract_field(output: &str, path: &FieldPath) -> Option<String> {
    let document: Value = match serde_json::from_str(output) {
        Ok(document @ (Value::Object(_) | Value::Array(_))) => document,
        Ok(scalar) => return Some(render(&scalar)),
        Err(_) => return Some(output.to_string()),
    };
    path.lookup(&document).map(render)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
