//! Vault key handling and cipher-string decryption
//!
//! The CLI protects the vault key on disk with the session key it hands out
//! on unlock. Both layers use the same construction: AES-256-CBC with PKCS#7
//! padding, authenticated by HMAC-SHA256 over `iv || ciphertext`.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::{hkdf, hmac};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{preview, Result, WardenError};
use crate::state::VaultState;

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
const KEY_LEN: usize = 32;

/// Encryption type tag for AES-256-CBC + HMAC-SHA256
const AES_CBC_HMAC: u8 = 2;

/// A 512-bit symmetric key: 256 bits for AES, 256 bits for the MAC
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    enc: [u8; KEY_LEN],
    mac: [u8; KEY_LEN],
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl SymmetricKey {
    /// Split 64 raw bytes into encryption and MAC halves
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != KEY_LEN * 2 {
            return Err(WardenError::KeyDerivationFailed(format!(
                "expected a {}-byte key, got {} bytes",
                KEY_LEN * 2,
                raw.len()
            )));
        }
        let mut key = Self {
            enc: [0; KEY_LEN],
            mac: [0; KEY_LEN],
        };
        key.enc.copy_from_slice(&raw[..KEY_LEN]);
        key.mac.copy_from_slice(&raw[KEY_LEN..]);
        Ok(key)
    }

    /// Stretch a 256-bit master key into a full symmetric key with
    /// HKDF-SHA256 expand (no extract step)
    pub fn stretch(master: &[u8]) -> Result<Self> {
        let prk = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, master);
        let mut key = Self {
            enc: [0; KEY_LEN],
            mac: [0; KEY_LEN],
        };
        expand_into(&prk, b"enc", &mut key.enc)?;
        expand_into(&prk, b"mac", &mut key.mac)?;
        Ok(key)
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut key = Self {
            enc: [0; KEY_LEN],
            mac: [0; KEY_LEN],
        };
        OsRng.fill_bytes(&mut key.enc);
        OsRng.fill_bytes(&mut key.mac);
        key
    }

    /// Raw 64-byte form, encryption half first
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut raw = Zeroizing::new(Vec::with_capacity(KEY_LEN * 2));
        raw.extend_from_slice(&self.enc);
        raw.extend_from_slice(&self.mac);
        raw
    }

    fn mac_tag(&self, iv: &[u8], ciphertext: &[u8]) -> hmac::Tag {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.mac);
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(iv);
        ctx.update(ciphertext);
        ctx.sign()
    }

    /// Verify the MAC, then decrypt
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8], mac: &[u8]) -> Result<Vec<u8>> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.mac);
        let mut signed = Vec::with_capacity(iv.len() + ciphertext.len());
        signed.extend_from_slice(iv);
        signed.extend_from_slice(ciphertext);
        hmac::verify(&key, &signed, mac)
            .map_err(|_| WardenError::DecryptFailed("MAC mismatch".to_string()))?;

        Aes256CbcDec::new_from_slices(&self.enc, iv)
            .map_err(|e| WardenError::DecryptFailed(format!("bad iv: {e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| WardenError::DecryptFailed("bad padding".to_string()))
    }

    /// Encrypt with a fresh random IV, returning `(iv, ciphertext, mac)`
    pub fn encrypt(&self, plaintext: &[u8]) -> ([u8; IV_LEN], Vec<u8>, [u8; MAC_LEN]) {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext =
            Aes256CbcEnc::new(&self.enc.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(self.mac_tag(&iv, &ciphertext).as_ref());
        (iv, ciphertext, mac)
    }
}

fn expand_into(prk: &hkdf::Prk, info: &[u8], out: &mut [u8; KEY_LEN]) -> Result<()> {
    let info = [info];
    prk.expand(&info, hkdf::HKDF_SHA256)
        .and_then(|okm| okm.fill(out))
        .map_err(|_| WardenError::KeyDerivationFailed("HKDF expand failed".to_string()))
}

/// Decode the CLI session token (base64 of the 64-byte session key)
pub fn parse_session_key(token: &str) -> Result<SymmetricKey> {
    let raw = Zeroizing::new(
        STANDARD
            .decode(token.trim())
            .map_err(|e| WardenError::KeyDerivationFailed(format!("session token: {e}")))?,
    );
    SymmetricKey::from_bytes(&raw)
}

/// Decrypt a session-protected blob: base64 of `type || iv || mac || ct`
pub fn decrypt_protected(blob: &str, session: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>> {
    let raw = STANDARD
        .decode(blob.trim())
        .map_err(|e| WardenError::DecryptFailed(format!("protected key: {e}")))?;

    if raw.len() <= 1 + IV_LEN + MAC_LEN {
        return Err(WardenError::DecryptFailed(format!(
            "protected key too short ({} bytes)",
            raw.len()
        )));
    }
    if raw[0] != AES_CBC_HMAC {
        return Err(WardenError::DecryptFailed(format!(
            "unsupported protected key type {}",
            raw[0]
        )));
    }

    let iv = &raw[1..1 + IV_LEN];
    let mac = &raw[1 + IV_LEN..1 + IV_LEN + MAC_LEN];
    let ciphertext = &raw[1 + IV_LEN + MAC_LEN..];
    session.decrypt(iv, ciphertext, mac).map(Zeroizing::new)
}

/// Encrypt `plaintext` into the session-protected blob format
pub fn encrypt_protected(plaintext: &[u8], session: &SymmetricKey) -> String {
    let (iv, ciphertext, mac) = session.encrypt(plaintext);
    let mut raw = Vec::with_capacity(1 + IV_LEN + MAC_LEN + ciphertext.len());
    raw.push(AES_CBC_HMAC);
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&mac);
    raw.extend_from_slice(&ciphertext);
    STANDARD.encode(raw)
}

/// A cipher string: `2.<iv>|<ciphertext>|<mac>`, each part base64
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncString {
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    mac: Vec<u8>,
}

impl EncString {
    pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Self {
        let (iv, ciphertext, mac) = key.encrypt(plaintext);
        Self {
            iv: iv.to_vec(),
            ciphertext,
            mac: mac.to_vec(),
        }
    }

    pub fn decrypt(&self, key: &SymmetricKey) -> Result<Vec<u8>> {
        key.decrypt(&self.iv, &self.ciphertext, &self.mac)
    }

    /// Decrypt to UTF-8 text
    pub fn decrypt_to_string(&self, key: &SymmetricKey) -> Result<String> {
        let plain = self.decrypt(key)?;
        String::from_utf8(plain)
            .map_err(|_| WardenError::DecryptFailed("plaintext is not UTF-8".to_string()))
    }
}

impl FromStr for EncString {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = |why: &str| WardenError::DecryptFailed(format!("cipher string {why}"));

        let (kind, body) = s.trim().split_once('.').ok_or_else(|| malformed("has no type"))?;
        if kind != AES_CBC_HMAC.to_string() {
            return Err(malformed(&format!("has unsupported type {kind}")));
        }

        let parts: Vec<&str> = body.split('|').collect();
        let &[iv, ciphertext, mac] = parts.as_slice() else {
            return Err(malformed(&format!("has {} parts, expected 3", parts.len())));
        };
        let decode = |part: &str| STANDARD.decode(part).map_err(|e| malformed(&e.to_string()));

        let parsed = Self {
            iv: decode(iv)?,
            ciphertext: decode(ciphertext)?,
            mac: decode(mac)?,
        };
        if parsed.iv.len() != IV_LEN || parsed.mac.len() != MAC_LEN {
            return Err(malformed("has bad iv or mac length"));
        }
        Ok(parsed)
    }
}

impl fmt::Display for EncString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}|{}|{}",
            AES_CBC_HMAC,
            STANDARD.encode(&self.iv),
            STANDARD.encode(&self.ciphertext),
            STANDARD.encode(&self.mac)
        )
    }
}

/// Turns the protected key of a snapshot plus the session token into the
/// key that decrypts vault fields
pub trait KeyUnwrap {
    fn unwrap_key(&self, state: &VaultState, session_token: &str) -> Result<SymmetricKey>;
}

/// Unwrap through the session key, as the CLI itself does
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionKeyUnwrap;

impl KeyUnwrap for SessionKeyUnwrap {
    fn unwrap_key(&self, state: &VaultState, session_token: &str) -> Result<SymmetricKey> {
        let derivation = |e: WardenError| WardenError::KeyDerivationFailed(e.to_string());

        let session = parse_session_key(session_token)?;
        let raw = decrypt_protected(&state.protected_master_key, &session).map_err(derivation)?;

        match raw.len() {
            64 => SymmetricKey::from_bytes(&raw),
            32 => {
                debug!("protected key is a master key, unwrapping user key");
                let stretched = SymmetricKey::stretch(&raw)?;
                let wrapped: EncString = state.encrypted_symmetric_key.parse().map_err(derivation)?;
                let user_key = Zeroizing::new(wrapped.decrypt(&stretched).map_err(derivation)?);
                SymmetricKey::from_bytes(&user_key)
            }
            n => Err(WardenError::KeyDerivationFailed(format!(
                "protected key has unexpected length {n} ({})",
                preview(&state.protected_master_key)
            ))),
        }
    }
}

/// Decrypt a cipher-string field value with `key`
pub fn decrypt_field(value: &str, key: &SymmetricKey) -> Result<String> {
    value.parse::<EncString>()?.decrypt_to_string(key)
}
