//! Time-based one-time codes from a login's TOTP seed
//!
//! Seeds come in three shapes: a bare base32 secret, an `otpauth://totp/`
//! URI carrying its own parameters, or a `steam://` secret that renders
//! five characters from Steam's alphabet instead of digits.

use data_encoding::BASE32_NOPAD;
use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

use crate::error::{Result, WardenError};

const STEAM_ALPHABET: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";
const STEAM_DIGITS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA1" => Some(Self::Sha1),
            "SHA256" => Some(Self::Sha256),
            "SHA512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn hmac(self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

/// Output alphabet of a generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Decimal,
    Steam,
}

/// A parsed TOTP seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totp {
    secret: Vec<u8>,
    pub algorithm: Algorithm,
    pub digits: u32,
    pub period: u64,
    pub encoding: Encoding,
}

impl Totp {
    /// Parse any of the supported seed formats
    pub fn parse(seed: &str) -> Result<Self> {
        let seed = seed.trim();
        let lower = seed.to_ascii_lowercase();

        if lower.starts_with("otpauth://") {
            Self::from_uri(seed)
        } else if let Some(secret) = lower.strip_prefix("steam://") {
            Ok(Self {
                secret: decode_base32(&seed[seed.len() - secret.len()..])?,
                algorithm: Algorithm::Sha1,
                digits: STEAM_DIGITS,
                period: 30,
                encoding: Encoding::Steam,
            })
        } else {
            Ok(Self {
                secret: decode_base32(seed)?,
                algorithm: Algorithm::Sha1,
                digits: 6,
                period: 30,
                encoding: Encoding::Decimal,
            })
        }
    }

    fn from_uri(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| invalid(format!("otpauth uri: {e}")))?;

        let mut totp = Self {
            secret: Vec::new(),
            algorithm: Algorithm::Sha1,
            digits: 6,
            period: 30,
            encoding: Encoding::Decimal,
        };
        let mut has_secret = false;

        for (key, value) in url.query_pairs() {
            match key.to_ascii_lowercase().as_str() {
                "secret" => {
                    totp.secret = decode_base32(&value)?;
                    has_secret = true;
                }
                "digits" => {
                    totp.digits = value
                        .parse()
                        .ok()
                        .filter(|d| (1..=10).contains(d))
                        .ok_or_else(|| invalid(format!("digits {value}")))?;
                }
                "period" => {
                    totp.period = value
                        .parse()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| invalid(format!("period {value}")))?;
                }
                "algorithm" => {
                    totp.algorithm = Algorithm::parse(&value)
                        .ok_or_else(|| invalid(format!("algorithm {value}")))?;
                }
                "encoder" if value.eq_ignore_ascii_case("steam") => {
                    totp.encoding = Encoding::Steam;
                    totp.digits = STEAM_DIGITS;
                }
                _ => {}
            }
        }

        if !has_secret {
            return Err(invalid("otpauth uri has no secret".to_string()));
        }
        Ok(totp)
    }

    /// Code for a unix timestamp in seconds
    pub fn generate(&self, unix_secs: u64) -> String {
        let counter = unix_secs / self.period;
        let key = hmac::Key::new(self.algorithm.hmac(), &self.secret);
        let digest = hmac::sign(&key, &counter.to_be_bytes());
        let digest = digest.as_ref();

        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let truncated = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);

        match self.encoding {
            Encoding::Decimal => {
                let modulus = 10u64.pow(self.digits);
                format!(
                    "{:0width$}",
                    u64::from(truncated) % modulus,
                    width = self.digits as usize
                )
            }
            Encoding::Steam => {
                let mut value = truncated as usize;
                (0..self.digits)
                    .map(|_| {
                        let c = STEAM_ALPHABET[value % STEAM_ALPHABET.len()] as char;
                        value /= STEAM_ALPHABET.len();
                        c
                    })
                    .collect()
            }
        }
    }

    /// Code for the current time
    pub fn now(&self) -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.generate(secs)
    }
}

/// Current code for a decrypted seed
pub fn current_code(seed: &str) -> Result<String> {
    Ok(Totp::parse(seed)?.now())
}

fn decode_base32(raw: &str) -> Result<Vec<u8>> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        return Err(invalid("empty secret".to_string()));
    }
    BASE32_NOPAD
        .decode(cleaned.as_bytes())
        .map_err(|e| invalid(format!("secret is not base32: {e}")))
}

fn invalid(why: String) -> WardenError {
    WardenError::DecryptFailed(format!("invalid TOTP seed: {why}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 reference secret "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_rfc6238_sha1_vectors() {
        let uri = format!("otpauth://totp/test?secret={RFC_SECRET}&digits=8");
        let totp = Totp::parse(&uri).unwrap();
        assert_eq!(totp.generate(59), "94287082");
        assert_eq!(totp.generate(1111111109), "07081804");
        assert_eq!(totp.generate(1234567890), "89005924");
    }

    #[test]
    fn test_bare_secret_defaults() {
        let totp = Totp::parse(RFC_SECRET).unwrap();
        assert_eq!(totp.digits, 6);
        assert_eq!(totp.period, 30);
        assert_eq!(totp.generate(59), "287082");
        assert_eq!(totp.generate(1111111109), "081804");
    }

    #[test]
    fn test_bare_secret_is_normalized() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(Totp::parse(spaced).unwrap(), Totp::parse(RFC_SECRET).unwrap());
    }

    #[test]
    fn test_uri_parameters() {
        let uri = format!(
            "otpauth://totp/Example:alice@example.com?secret={RFC_SECRET}&algorithm=SHA256&digits=8&period=60&issuer=Example"
        );
        let totp = Totp::parse(&uri).unwrap();
        assert_eq!(totp.algorithm, Algorithm::Sha256);
        assert_eq!(totp.digits, 8);
        assert_eq!(totp.period, 60);
        assert_eq!(totp.generate(0).len(), 8);
    }

    #[test]
    fn test_steam_codes() {
        let totp = Totp::parse(&format!("steam://{RFC_SECRET}")).unwrap();
        assert_eq!(totp.encoding, Encoding::Steam);
        let code = totp.generate(1111111109);
        assert_eq!(code.len(), 5);
        assert!(code.bytes().all(|b| STEAM_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_invalid_seeds() {
        assert!(Totp::parse("").is_err());
        assert!(Totp::parse("not*base32!").is_err());
        assert!(Totp::parse("otpauth://totp/label?digits=6").is_err());
        assert!(Totp::parse(&format!("otpauth://totp/x?secret={RFC_SECRET}&algorithm=MD5")).is_err());
    }

    #[test]
    fn test_current_code_shape() {
        let code = current_code(RFC_SECRET).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
