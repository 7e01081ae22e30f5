//! Favicon prefetch
//!
//! One icon per login item, stored as `<icons>/<item id>.png`. An icon
//! that already exists is never downloaded again.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::model::{CipherRecord, CipherType};

const FAVICON_SERVICE: &str = "https://icons.duckduckgo.com/ip3";

/// Fetches a URL into a file
pub trait Downloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Plain HTTP downloader
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = ureq::get(url)
            .call()
            .with_context(|| format!("Failed to connect to {url}"))?;

        let partial = dest.with_extension("part");
        let result = (|| -> Result<()> {
            let mut reader = response.into_body().into_reader();
            let mut file = File::create(&partial)
                .with_context(|| format!("Failed to create {}", partial.display()))?;
            io::copy(&mut reader, &mut file).context("Failed to read from network")?;
            fs::rename(&partial, dest)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

/// Favicon service URL for a login URL, keyed by its host
pub fn favicon_url(login_url: &str) -> Option<String> {
    let login_url = login_url.trim();
    let absolute = if login_url.starts_with("http") {
        login_url.to_string()
    } else {
        format!("http://{login_url}")
    };
    let parsed = Url::parse(&absolute).ok()?;
    let host = parsed.host_str().filter(|h| !h.is_empty())?;
    Some(format!("{FAVICON_SERVICE}/{host}.ico"))
}

/// Icon file of an item
pub fn icon_path(dir: &Path, item_id: &str) -> PathBuf {
    dir.join(format!("{item_id}.png"))
}

/// Outcome of a prefetch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IconReport {
    pub downloaded: usize,
    pub present: usize,
    pub failed: usize,
}

/// Download missing icons for every login item with a URL. Failures are
/// logged and counted, never returned.
pub fn fetch_icons(items: &[CipherRecord], dir: &Path, downloader: &dyn Downloader) -> Result<IconReport> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create icon directory {:?}", dir))?;
    let mut report = IconReport::default();

    for item in items.iter().filter(|i| i.kind == CipherType::Login) {
        let Some(login_url) = item.first_uri() else { continue };

        let dest = icon_path(dir, &item.id);
        if dest.exists() {
            report.present += 1;
            continue;
        }

        let Some(url) = favicon_url(login_url) else {
            warn!("cannot derive a host from {:?} (item {})", login_url, item.id);
            report.failed += 1;
            continue;
        };

        match downloader.download(&url, &dest) {
            Ok(()) => {
                debug!("downloaded {} for {}", url, item.id);
                report.downloaded += 1;
            }
            Err(e) => {
                warn!("download icon error for {}: {:#}", item.id, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "icons: {} downloaded, {} present, {} failed",
        report.downloaded, report.present, report.failed
    );
    Ok(report)
}
