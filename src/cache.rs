//! On-disk avatar cache
//!
//! Filesystem mapping from (user id, effect) to a PNG file. Paths are a pure
//! function of the key, so a plain file-exists check is enough to detect an
//! already-fetched avatar and skip the network entirely.
//!
//! Eviction is a coarse whole-cache TTL: when the persisted last-cleared
//! stamp is older than the configured interval, every cached file is deleted
//! and the stamp rewritten. There is no per-entry invalidation — a cached
//! avatar can silently diverge from the upstream image until the next full
//! clear. That staleness window is accepted by design of the cache, not an
//! oversight; callers needing fresher images should shorten the interval.

use crate::effects::Effect;
use crate::error::Result;
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the JSON stamp file recording the last full clear
const STAMP_FILE: &str = ".last-cleared.json";

/// Persisted record of the last whole-cache clear
#[derive(Debug, Serialize, Deserialize)]
struct CacheStamp {
    last_cleared: DateTime<Utc>,
}

/// Filesystem store of downloaded avatars, keyed by (user id, effect).
#[derive(Clone, Debug)]
pub struct AvatarCache {
    dir: PathBuf,
    clear_interval: Duration,
}

impl AvatarCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, clear_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            clear_interval,
        })
    }

    /// The cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file path for a (user id, effect) pair:
    /// `{cache_dir}/{effect_code}_{id}.png`
    pub fn path_for(&self, user_id: &UserId, effect: Effect) -> PathBuf {
        self.dir.join(format!("{}_{}.png", effect.code(), user_id))
    }

    /// Whether an avatar file already exists for this key
    pub fn contains(&self, user_id: &UserId, effect: Effect) -> bool {
        self.path_for(user_id, effect).is_file()
    }

    /// Run whole-cache TTL maintenance.
    ///
    /// Reads the persisted last-cleared stamp; when it is unreadable or older
    /// than the configured interval, deletes every file in the cache
    /// directory and rewrites the stamp. A directory without a stamp has
    /// never been maintained: the clock starts now, nothing is deleted.
    ///
    /// Returns true when a clear happened.
    pub fn maintain(&self) -> Result<bool> {
        let now = Utc::now();

        if let Some(stamp) = self.read_stamp() {
            let age = now.signed_duration_since(stamp.last_cleared);
            // A stamp from the future (clock skew) falls through to a clear,
            // which is harmless.
            if age.to_std().is_ok_and(|a| a < self.clear_interval) {
                return Ok(false);
            }
        } else if !self.stamp_path().exists() {
            self.write_stamp(now)?;
            return Ok(false);
        }

        let mut removed = 0usize;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || entry.file_name() == STAMP_FILE {
                continue;
            }
            std::fs::remove_file(&path)?;
            removed += 1;
        }

        self.write_stamp(now)?;
        tracing::info!(removed, dir = %self.dir.display(), "Cleared avatar cache");
        Ok(true)
    }

    fn stamp_path(&self) -> PathBuf {
        self.dir.join(STAMP_FILE)
    }

    fn read_stamp(&self) -> Option<CacheStamp> {
        let raw = std::fs::read_to_string(self.stamp_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_stamp(&self, last_cleared: DateTime<Utc>) -> Result<()> {
        let stamp = CacheStamp { last_cleared };
        std::fs::write(self.stamp_path(), serde_json::to_string_pretty(&stamp)?)?;
        Ok(())
    }
}
