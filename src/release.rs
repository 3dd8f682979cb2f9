//! Release update check
//!
//! Queries the hosting forge's latest-release endpoint at startup and tells
//! the caller whether a newer version exists. Every failure along the way —
//! connection, parse, missing fields — degrades to "no answer": an update
//! check must never get in the way of a run.

use crate::error::{Error, Result};
use std::time::Duration;

/// How the running version compares to the latest published release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramStatus {
    /// A newer release is published
    UpdateAvailable,
    /// Running the latest release
    UpToDate,
    /// Running a version newer than any published release
    Beta,
}

/// The latest published release, as reported by the forge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Version tag with any leading `v` stripped (e.g. "3.11")
    pub tag: String,
    /// First line of the release notes, without heading markers
    pub summary: String,
}

/// Fetch the latest release from `releases_url`.
pub async fn fetch_latest_release(releases_url: &str) -> Result<ReleaseInfo> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .user_agent("avatar-dl")
        .build()?;

    let body: serde_json::Value = client.get(releases_url).send().await?.json().await?;

    let tag = body
        .get("tag_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other("release body has no tag_name".to_string()))?
        .trim_start_matches('v')
        .to_string();

    let summary = body
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .lines()
        .next()
        .unwrap_or("")
        .trim_start_matches(['#', ' '])
        .to_string();

    Ok(ReleaseInfo { tag, summary })
}

/// Compare the running version against the latest release.
///
/// Returns `None` when the check is disabled upstream or anything fails;
/// callers treat that as "nothing to report".
pub async fn check_for_update(
    releases_url: &str,
    current_version: &str,
) -> Option<(ProgramStatus, ReleaseInfo)> {
    let release = match fetch_latest_release(releases_url).await {
        Ok(release) => release,
        Err(e) => {
            tracing::debug!(error = %e, "Update check failed");
            return None;
        }
    };

    let latest = parse_version(&release.tag)?;
    let current = parse_version(current_version)?;

    let status = match latest.cmp(&current) {
        std::cmp::Ordering::Greater => ProgramStatus::UpdateAvailable,
        std::cmp::Ordering::Less => ProgramStatus::Beta,
        std::cmp::Ordering::Equal => ProgramStatus::UpToDate,
    };

    Some((status, release))
}

/// Parse a dotted version tag into numeric components (e.g. "v3.11.1" into
/// [3, 11, 1]); comparison is therefore numeric, so 3.10 sorts after 3.9.
fn parse_version(tag: &str) -> Option<Vec<u64>> {
    tag.trim_start_matches('v')
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_release(server: &MockServer, tag: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tag_name": tag,
                "body": body,
            })))
            .mount(server)
            .await;
    }

    fn url(server: &MockServer) -> String {
        format!("{}/releases/latest", server.uri())
    }

    #[test]
    fn version_comparison_is_numeric_not_lexicographic() {
        assert!(parse_version("3.10") > parse_version("3.9"));
        assert!(parse_version("v3.11.1") > parse_version("3.11"));
        assert_eq!(parse_version("v3.0"), parse_version("3.0"));
    }

    #[test]
    fn malformed_version_parses_to_none() {
        assert_eq!(parse_version("3.x"), None);
        assert_eq!(parse_version(""), None);
    }

    #[tokio::test]
    async fn latest_release_strips_tag_prefix_and_heading() {
        let server = MockServer::start().await;
        mount_release(&server, "v3.11", "# Big update\nDetails below").await;

        let release = fetch_latest_release(&url(&server)).await.unwrap();
        assert_eq!(release.tag, "3.11");
        assert_eq!(release.summary, "Big update");
    }

    #[tokio::test]
    async fn newer_release_reports_update_available() {
        let server = MockServer::start().await;
        mount_release(&server, "v3.11", "notes").await;

        let (status, _) = check_for_update(&url(&server), "3.10").await.unwrap();
        assert_eq!(status, ProgramStatus::UpdateAvailable);
    }

    #[tokio::test]
    async fn matching_release_reports_up_to_date() {
        let server = MockServer::start().await;
        mount_release(&server, "v3.10", "notes").await;

        let (status, _) = check_for_update(&url(&server), "3.10").await.unwrap();
        assert_eq!(status, ProgramStatus::UpToDate);
    }

    #[tokio::test]
    async fn older_release_reports_beta() {
        let server = MockServer::start().await;
        mount_release(&server, "v3.9", "notes").await;

        let (status, _) = check_for_update(&url(&server), "3.10").await.unwrap();
        assert_eq!(status, ProgramStatus::Beta);
    }

    #[tokio::test]
    async fn unreachable_forge_yields_none() {
        let result = check_for_update("http://127.0.0.1:1/releases/latest", "3.10").await;
        assert!(result.is_none(), "a failed check must stay silent");
    }

    #[tokio::test]
    async fn malformed_release_body_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
            .mount(&server)
            .await;

        assert!(check_for_update(&url(&server), "3.10").await.is_none());
    }
}
