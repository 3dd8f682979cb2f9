//! # avatar-dl
//!
//! Concurrent, multi-credential avatar download pipeline with on-disk
//! caching.
//!
//! Given a roster of user identifiers, the pipeline resolves each one
//! against an external identity API, downloads the avatar image, applies an
//! optional visual effect, and writes one PNG per (user, effect) pair at a
//! deterministic path a presentation renderer can pick up. Resolution runs
//! on a bounded worker pool spreading load across multiple API credentials;
//! downloads are drained by a single consumer so externally rate-limited
//! lookups never stall bulk transfers. Failures are classified — skipped,
//! transient, fatal-per-credential, permanent — and transient ones are
//! retried over a bounded number of rounds.
//!
//! ## Quick Start
//!
//! ```no_run
//! use avatar_dl::{Config, CredentialPool, FetchOrchestrator, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let credentials = CredentialPool::from_file("token.txt".as_ref())?;
//!
//!     let orchestrator = FetchOrchestrator::new(config, credentials)?;
//!     orchestrator.verify_credentials().await?;
//!
//!     let roster = vec![UserId::new("1010885414850154587")];
//!     let report = orchestrator.run(&roster).await?;
//!
//!     println!(
//!         "downloaded {}, skipped {}, unresolved {}",
//!         report.downloaded.len(),
//!         report.skipped.len(),
//!         report.unresolved.len(),
//!     );
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// On-disk avatar cache with whole-cache TTL maintenance
pub mod cache;
/// Configuration types
pub mod config;
/// Credential pool with round-robin assignment
pub mod credentials;
/// Avatar download worker
pub mod download;
/// Post-processing effects
pub mod effects;
/// Error types
pub mod error;
/// Fetch orchestrator (round state machine)
pub mod fetcher;
/// Release update check
pub mod release;
/// Avatar resolution against the identity API
pub mod resolver;
/// Core types
pub mod types;

// Re-export commonly used types
pub use cache::AvatarCache;
pub use config::{ApiConfig, CacheConfig, Config, FetchConfig, RESOLUTION_PRESETS, UpdateConfig};
pub use credentials::CredentialPool;
pub use download::DownloadWorker;
pub use effects::Effect;
pub use error::{Error, IsTransient, Result};
pub use fetcher::FetchOrchestrator;
pub use release::{ProgramStatus, ReleaseInfo, check_for_update, fetch_latest_release};
pub use resolver::{HttpResolver, IdentityProvider, Resolved};
pub use types::{ColumnValue, FetchReport, UserId, roster_from_column};
