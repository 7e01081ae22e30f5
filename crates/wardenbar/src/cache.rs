//! Search cache
//!
//! Redacted items are stored encrypted under a local cache key that has
//! nothing to do with the vault keys. Folders are stored as plain JSON.
//! Small marker files record when a sync, an icon fetch or a search last
//! happened; their age only decides whether to trigger a refresh, stale
//! data is still served.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;
use zeroize::Zeroizing;

use wardenbar_core::Paths;

use crate::model::{CipherRecord, FolderRecord};

const ITEMS_FILE: &str = "items.enc";
const FOLDERS_FILE: &str = "folders.json";
const KEY_FILE: &str = "cache.key";

/// Freshness markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Written after a completed sync
    Sync,
    /// Written after an icon fetch run
    Icons,
    /// Debounces icon fetches triggered by searches
    AutoFetch,
    /// Written by every search
    LastUsage,
}

impl Marker {
    fn file_name(self) -> &'static str {
        match self {
            Self::Sync => "sync.marker",
            Self::Icons => "icons.marker",
            Self::AutoFetch => "autofetch.marker",
            Self::LastUsage => "lastusage.marker",
        }
    }
}

/// Ciphertext envelope of the item cache
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedBlob {
    nonce: String,
    data: String,
}

/// On-disk cache rooted in the wardenbar cache and data directories
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl CacheStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            cache_dir: paths.cache.clone(),
            data_dir: paths.data.clone(),
        }
    }

    fn marker_path(&self, marker: Marker) -> PathBuf {
        self.cache_dir.join(marker.file_name())
    }

    // Items

    pub fn has_items(&self) -> bool {
        self.cache_dir.join(ITEMS_FILE).exists()
    }

    pub fn store_items(&self, items: &[CipherRecord]) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(items)?);
        let key = self.load_or_create_key()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| anyhow!("Cache encryption failed: {e}"))?;

        let blob = EncryptedBlob {
            nonce: STANDARD.encode(nonce),
            data: STANDARD.encode(ciphertext),
        };
        atomic_write(&self.cache_dir.join(ITEMS_FILE), &serde_json::to_vec(&blob)?)?;
        debug!("cached {} items", items.len());
        Ok(())
    }

    /// Decrypt the item cache. A missing cache is an empty list.
    pub fn load_items(&self) -> Result<Vec<CipherRecord>> {
        let path = self.cache_dir.join(ITEMS_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };
        let blob: EncryptedBlob =
            serde_json::from_slice(&raw).with_context(|| format!("Corrupt item cache {:?}", path))?;

        let key = self.load_or_create_key()?;
        let nonce = STANDARD.decode(&blob.nonce)?;
        let data = STANDARD.decode(&blob.data)?;
        if nonce.len() != 12 {
            return Err(anyhow!("Corrupt item cache nonce"));
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), data.as_ref())
                .map_err(|_| anyhow!("Item cache does not decrypt with the cache key"))?,
        );
        Ok(serde_json::from_slice(&plaintext)?)
    }

    // Folders

    pub fn store_folders(&self, folders: &[FolderRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(folders)?;
        atomic_write(&self.cache_dir.join(FOLDERS_FILE), &json)
    }

    pub fn load_folders(&self) -> Result<Vec<FolderRecord>> {
        let path = self.cache_dir.join(FOLDERS_FILE);
        match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("Corrupt folder cache {:?}", path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", path)),
        }
    }

    // Markers

    pub fn touch(&self, marker: Marker) -> Result<()> {
        let path = self.marker_path(marker);
        let stamp = chrono::Utc::now().to_rfc3339();
        atomic_write(&path, stamp.as_bytes())
    }

    pub fn exists(&self, marker: Marker) -> bool {
        self.marker_path(marker).exists()
    }

    /// Age of a marker, `None` when it was never written
    pub fn age(&self, marker: Marker) -> Option<Duration> {
        let modified = fs::metadata(self.marker_path(marker)).and_then(|m| m.modified()).ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    /// True when the marker is missing or older than `max_age`
    pub fn is_stale(&self, marker: Marker, max_age: Duration) -> bool {
        self.age(marker).map_or(true, |age| age > max_age)
    }

    pub fn remove(&self, marker: Marker) -> Result<()> {
        remove_if_exists(&self.marker_path(marker))
    }

    /// Drop items, folders and the cache-dir markers
    pub fn clear(&self) -> Result<()> {
        for name in [ITEMS_FILE, FOLDERS_FILE] {
            remove_if_exists(&self.cache_dir.join(name))?;
        }
        for marker in [Marker::Sync, Marker::AutoFetch, Marker::LastUsage] {
            self.remove(marker)?;
        }
        debug!("cleared cache in {}", self.cache_dir.display());
        Ok(())
    }

    /// Drop the cached listing before a rebuild, keeping the sync marker
    pub fn reset_listing(&self) -> Result<()> {
        for name in [ITEMS_FILE, FOLDERS_FILE] {
            remove_if_exists(&self.cache_dir.join(name))?;
        }
        self.remove(Marker::AutoFetch)
    }

    fn load_or_create_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let path = self.data_dir.join(KEY_FILE);
        match fs::read_to_string(&path) {
            Ok(encoded) => {
                let key = Zeroizing::new(
                    STANDARD
                        .decode(encoded.trim())
                        .with_context(|| format!("Corrupt cache key {:?}", path))?,
                );
                if key.len() != 32 {
                    return Err(anyhow!("Cache key {:?} has invalid length", path));
                }
                Ok(key)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut key = Zeroizing::new(vec![0u8; 32]);
                OsRng.fill_bytes(&mut key);
                atomic_write(&path, STANDARD.encode(key.as_slice()).as_bytes())?;
                restrict_file(&path)?;
                debug!("created cache key {}", path.display());
                Ok(key)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read cache key {:?}", path)),
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", path)),
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| anyhow!("Invalid target path {:?}", path))?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|e| anyhow!("Atomic write of {:?} failed: {}", path, e.error))?;
    Ok(())
}

fn restrict_file(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
