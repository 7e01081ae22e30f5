//! Vault state decoder
//!
//! The Bitwarden CLI keeps its local state in a `data.json` snapshot. Two
//! incompatible layouts exist in the wild:
//!
//! - legacy (CLI 1.21.0 and earlier): everything at the document root
//! - modern (CLI 1.21.1 and later): `activeUserId` at the root, the account
//!   record nested under the user id, protected keys as
//!   `__PROTECTED__<userId>_...` root keys
//!
//! Decoding sniffs the generation first and then deserializes into one of
//! two typed shapes, collapsed into a single [`VaultState`]. Missing or
//! mistyped nested values become empty defaults; only a non-object document
//! is an error.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, WardenError};
use crate::path::FieldPath;

/// Snapshot layout generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schema {
    #[default]
    Legacy,
    Modern,
}

/// Authentication state derived from the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NotLoggedIn,
    Locked,
    Unlocked,
}

/// Decoded snapshot of the local vault metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultState {
    pub schema: Schema,
    pub user_id: String,
    pub active_user_id: String,
    pub protected_master_key: String,
    pub encrypted_symmetric_key: String,
    pub kdf_kind: i64,
    pub kdf_iterations: i64,
    pub email: String,
    pub last_sync: String,
    pub ever_been_unlocked: bool,
    pub installed_version: String,
    pub source_path: Option<PathBuf>,
}

impl VaultState {
    pub fn auth_state(&self) -> AuthState {
        if self.user_id.is_empty() {
            AuthState::NotLoggedIn
        } else if self.protected_master_key.is_empty() {
            AuthState::Locked
        } else {
            AuthState::Unlocked
        }
    }

    /// Path of the encrypted cipher record for `item_id` inside the raw
    /// snapshot document
    pub fn cipher_path(&self, item_id: &str) -> FieldPath {
        match self.schema {
            Schema::Modern => FieldPath::new()
                .key(self.user_id.as_str())
                .key("data")
                .key("ciphers")
                .key("encrypted")
                .key(item_id),
            Schema::Legacy => FieldPath::new()
                .key(format!("ciphers_{}", self.user_id))
                .key(item_id),
        }
    }
}

/// Decode raw snapshot bytes
pub fn decode(raw: &[u8]) -> Result<VaultState> {
    let document: Value = serde_json::from_slice(raw)?;
    let Value::Object(root) = document else {
        return Err(WardenError::Json(de::Error::custom(format!(
            "snapshot root is {}, expected an object",
            kind_of(&document)
        ))));
    };

    let state = match detect_schema(&root) {
        Schema::Legacy => decode_legacy(root),
        Schema::Modern => decode_modern(root),
    };
    debug!(
        schema = ?state.schema,
        user = %state.user_id,
        unlocked = !state.protected_master_key.is_empty(),
        "decoded vault snapshot"
    );
    Ok(state)
}

/// Read and decode the snapshot at `path`.
///
/// A missing file is a logged-out state; a malformed one degrades to
/// logged-out as well, with a warning.
pub fn load(path: &Path) -> VaultState {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no vault snapshot at {}", path.display());
            return VaultState::default();
        }
        Err(e) => {
            warn!("failed to read vault snapshot {}: {}", path.display(), e);
            return VaultState::default();
        }
    };

    match decode(&raw) {
        Ok(mut state) => {
            state.source_path = Some(path.to_path_buf());
            state
        }
        Err(e) => {
            warn!("malformed vault snapshot {}: {}", path.display(), e);
            VaultState::default()
        }
    }
}

/// Modern when `activeUserId` is a non-empty string and no `userId` key
/// (or a null one) sits at the root
pub fn detect_schema(root: &Map<String, Value>) -> Schema {
    let active = root
        .get("activeUserId")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    let has_user_id = root.get("userId").is_some_and(|v| !v.is_null());

    if active && !has_user_id {
        Schema::Modern
    } else {
        Schema::Legacy
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Legacy layout

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LegacySnapshot {
    #[serde(deserialize_with = "lenient_string")]
    user_id: String,
    #[serde(deserialize_with = "lenient_string")]
    active_user_id: String,
    #[serde(deserialize_with = "lenient_string")]
    user_email: String,
    #[serde(rename = "__PROTECTED__key", deserialize_with = "lenient_string")]
    protected_key: String,
    #[serde(deserialize_with = "lenient_string")]
    enc_key: String,
    #[serde(deserialize_with = "lenient_i64")]
    kdf: i64,
    #[serde(deserialize_with = "lenient_i64")]
    kdf_iterations: i64,
    #[serde(deserialize_with = "lenient_string")]
    installed_version: String,
}

fn decode_legacy(root: Map<String, Value>) -> VaultState {
    let legacy: LegacySnapshot = from_value_or_default(Value::Object(root), "legacy snapshot");

    VaultState {
        schema: Schema::Legacy,
        user_id: legacy.user_id,
        active_user_id: legacy.active_user_id,
        protected_master_key: legacy.protected_key,
        encrypted_symmetric_key: legacy.enc_key,
        kdf_kind: legacy.kdf,
        kdf_iterations: legacy.kdf_iterations,
        email: legacy.user_email,
        installed_version: legacy.installed_version,
        ..VaultState::default()
    }
}

// ---------------------------------------------------------------------------
// Modern layout

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModernGlobal {
    #[serde(rename = "installedVersion", deserialize_with = "lenient_string")]
    installed_version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ModernUser {
    keys: ModernKeys,
    profile: ModernProfile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ModernKeys {
    crypto_symmetric_key: EncryptedBlob,
    #[serde(deserialize_with = "lenient_string")]
    master_key_encrypted_user_key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EncryptedBlob {
    #[serde(deserialize_with = "lenient_string")]
    encrypted: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ModernProfile {
    #[serde(deserialize_with = "lenient_string")]
    email: String,
    #[serde(deserialize_with = "lenient_i64")]
    kdf_iterations: i64,
    #[serde(deserialize_with = "lenient_i64")]
    kdf_type: i64,
    #[serde(deserialize_with = "lenient_string")]
    last_sync: String,
    #[serde(deserialize_with = "lenient_bool")]
    ever_been_unlocked: bool,
}

fn decode_modern(mut root: Map<String, Value>) -> VaultState {
    let user_id = root
        .get("activeUserId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let protected_master_key = [
        format!("__PROTECTED__{user_id}_masterkey_auto"),
        format!("__PROTECTED__{user_id}_user_auto"),
    ]
    .iter()
    .find_map(|key| root.get(key).and_then(Value::as_str).filter(|v| !v.is_empty()))
    .unwrap_or_default()
    .to_string();

    let global: ModernGlobal =
        from_value_or_default(root.remove("global").unwrap_or(Value::Null), "global record");
    let user: ModernUser =
        from_value_or_default(root.remove(&user_id).unwrap_or(Value::Null), "account record");

    let encrypted_symmetric_key = if user.keys.crypto_symmetric_key.encrypted.is_empty() {
        user.keys.master_key_encrypted_user_key
    } else {
        user.keys.crypto_symmetric_key.encrypted
    };

    VaultState {
        schema: Schema::Modern,
        active_user_id: user_id.clone(),
        user_id,
        protected_master_key,
        encrypted_symmetric_key,
        kdf_kind: user.profile.kdf_type,
        kdf_iterations: user.profile.kdf_iterations,
        email: user.profile.email,
        last_sync: user.profile.last_sync,
        ever_been_unlocked: user.profile.ever_been_unlocked,
        installed_version: global.installed_version,
        source_path: None,
    }
}

// ---------------------------------------------------------------------------
// Lenient field decoding

fn from_value_or_default<T>(value: Value, what: &str) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    if value.is_null() {
        return T::default();
    }
    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("ignoring malformed {}: {}", what, e);
        T::default()
    })
}

/// Strings; null becomes empty and other scalars their JSON text
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Integers that may arrive as floats or numeric strings. Fractions are
/// truncated toward zero.
fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce_i64(&Value::deserialize(deserializer)?))
}

pub(crate) fn coerce_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or_default(),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64))
            .unwrap_or_default(),
        _ => 0,
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}
