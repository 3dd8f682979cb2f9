//! Configuration types for avatar-dl

use crate::effects::Effect;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolutions the image endpoint accepts for its size query parameter
pub const RESOLUTION_PRESETS: &[u32] = &[16, 32, 64, 80, 100, 128, 256, 512, 1024, 2048];

/// Identity API endpoints and request behavior
///
/// Groups everything that describes the external service: where to resolve
/// identities, where the image CDN lives, and how patient to be with it.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the identity-lookup API (default: the public v10 endpoint)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL of the image CDN
    #[serde(default = "default_cdn_url")]
    pub cdn_url: String,

    /// Per-request timeout in seconds (default: 20)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum inner retries when the API reports rate limiting (default: 3)
    ///
    /// Each retry sleeps the server-provided wait plus a small jittered pad.
    /// Once spent, the id fails transiently and falls back to the
    /// orchestrator's round-level retry budget.
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    /// User id resolved once per credential to verify tokens before a run
    #[serde(default = "default_probe_user_id")]
    pub probe_user_id: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cdn_url: default_cdn_url(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit_retries: default_rate_limit_retries(),
            probe_user_id: default_probe_user_id(),
        }
    }
}

/// Fetch pipeline behavior (resolution, effect, concurrency, retry rounds)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Whether avatars are fetched at all; when false a run is a no-op
    #[serde(default = "default_true")]
    pub avatar_mode: bool,

    /// Image resolution requested from the CDN; must be one of
    /// [`RESOLUTION_PRESETS`] (default: 256)
    #[serde(default = "default_resolution")]
    pub resolution: u32,

    /// Post-processing effect applied to every downloaded avatar
    #[serde(default)]
    pub effect: Effect,

    /// Size of the concurrent resolver worker pool (default: 4)
    ///
    /// An explicit setting rather than something derived from CPU count, so
    /// tests get deterministic concurrency levels.
    #[serde(default = "default_max_concurrent_resolves")]
    pub max_concurrent_resolves: usize,

    /// Maximum number of resolve-and-download rounds before the remaining
    /// ids are reported as permanently unresolved (default: 5)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            avatar_mode: true,
            resolution: default_resolution(),
            effect: Effect::default(),
            max_concurrent_resolves: default_max_concurrent_resolves(),
            max_rounds: default_max_rounds(),
        }
    }
}

/// On-disk cache settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding downloaded avatar files (default: "./avatars")
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Whole-cache time-to-live in seconds (default: 12 hours)
    ///
    /// When the persisted last-cleared stamp is older than this, every file
    /// in the cache directory is deleted before the next run.
    #[serde(default = "default_clear_interval_secs")]
    pub clear_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            clear_interval_secs: default_clear_interval_secs(),
        }
    }
}

/// Release update-check settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Whether to query the forge for a newer release at startup
    #[serde(default = "default_true")]
    pub check: bool,

    /// The forge's latest-release endpoint
    #[serde(default = "default_releases_url")]
    pub releases_url: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check: true,
            releases_url: default_releases_url(),
        }
    }
}

/// Main configuration for the fetch pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`api`](ApiConfig) — endpoints, timeouts, rate-limit retries
/// - [`fetch`](FetchConfig) — resolution, effect, concurrency, rounds
/// - [`cache`](CacheConfig) — cache directory and whole-cache TTL
/// - [`update`](UpdateConfig) — release update check
///
/// All sub-config fields are flattened for serialization, so the on-disk
/// format stays a single flat table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity API settings
    #[serde(flatten)]
    pub api: ApiConfig,

    /// Fetch pipeline settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// Cache settings
    #[serde(flatten)]
    pub cache: CacheConfig,

    /// Update-check settings
    #[serde(flatten)]
    pub update: UpdateConfig,
}

impl Config {
    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if !RESOLUTION_PRESETS.contains(&self.fetch.resolution) {
            return Err(Error::Config {
                message: format!(
                    "resolution {} is not one of the available presets {:?}",
                    self.fetch.resolution, RESOLUTION_PRESETS
                ),
                key: Some("resolution".to_string()),
            });
        }

        if self.fetch.max_concurrent_resolves == 0 {
            return Err(Error::Config {
                message: "max_concurrent_resolves must be at least 1".to_string(),
                key: Some("max_concurrent_resolves".to_string()),
            });
        }

        if self.fetch.max_rounds == 0 {
            return Err(Error::Config {
                message: "max_rounds must be at least 1".to_string(),
                key: Some("max_rounds".to_string()),
            });
        }

        Ok(())
    }
}

fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_cdn_url() -> String {
    "https://cdn.discordapp.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_rate_limit_retries() -> u32 {
    3
}

fn default_probe_user_id() -> String {
    "1010885414850154587".to_string()
}

fn default_resolution() -> u32 {
    256
}

fn default_max_concurrent_resolves() -> usize {
    4
}

fn default_max_rounds() -> u32 {
    5
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./avatars")
}

fn default_clear_interval_secs() -> u64 {
    12 * 60 * 60
}

fn default_releases_url() -> String {
    "https://api.github.com/repos/avatar-dl/avatar-dl/releases/latest".to_string()
}

fn default_true() -> bool {
    true
}
