//! Avatar download worker
//!
//! Fetches a resolved image URL, decodes the bytes, applies the selected
//! effect, and writes the result at the deterministic cache path. Writes go
//! through a temp-file-then-rename so a failure mid-write never leaves a
//! partial file at the destination.

use crate::config::Config;
use crate::effects::Effect;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Downloads avatar images and writes them into the cache directory.
pub struct DownloadWorker {
    client: reqwest::Client,
    resolution: u32,
}

impl DownloadWorker {
    /// Build a worker from the configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            resolution: config.fetch.resolution,
        })
    }

    /// Fetch `url` at the configured resolution, apply `effect`, and write
    /// the result to `dest` atomically.
    pub async fn fetch(&self, url: &Url, effect: Effect, dest: &Path) -> Result<()> {
        let mut url = url.clone();
        url.query_pairs_mut()
            .append_pair("size", &self.resolution.to_string());

        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || write_image(&bytes, effect, &dest))
            .await
            .map_err(|e| Error::Other(format!("image write task failed: {e}")))?
    }
}

/// Decode, transform, and write via a sibling temp file.
fn write_image(bytes: &[u8], effect: Effect, dest: &Path) -> Result<()> {
    let img = image::load_from_memory(bytes)?;
    let img = effect.apply(img);

    let tmp = temp_path(dest);
    if let Err(e) = img.save_with_format(&tmp, image::ImageFormat::Png) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    std::fs::rename(&tmp, dest)?;
    Ok(())
}

/// Sibling temp path in the same directory, so the final rename stays on one
/// filesystem.
fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}
