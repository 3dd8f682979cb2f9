//! Avatar resolution against the external identity API
//!
//! Given a user id and a credential, the resolver returns the canonical
//! image URL, a terminal "no avatar", or a classified failure. Failures are
//! classified from the response body's message string rather than strict
//! schema validation, because the upstream error format is not versioned.
//!
//! The resolver is defined behind an async trait so the orchestrator can be
//! driven by a scripted in-memory implementation in tests.

use crate::config::Config;
use crate::error::{Error, Result, token_hint};
use crate::types::UserId;
use rand::Rng;
use std::time::Duration;
use url::Url;

/// Extra wait added on top of the server-provided rate-limit duration,
/// jittered so concurrent workers do not stampede the window edge.
const RATE_LIMIT_PAD_MS: u64 = 500;

/// Number of default-avatar variants the CDN serves
const DEFAULT_AVATAR_VARIANTS: u64 = 5;

/// Outcome of a successful identity lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// The canonical URL of the user's avatar image
    Avatar(Url),
    /// Terminal: the id is non-numeric, the account has no avatar, or the
    /// account is unknown upstream. Not an error, and never retried.
    NoAvatar,
}

/// Identity-lookup seam between the orchestrator and the external API.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve one user id with one credential.
    async fn resolve(&self, user_id: &UserId, token: &str) -> Result<Resolved>;
}

/// What one response body turned out to mean
enum Reply {
    Avatar(Url),
    NoAvatar,
    RateLimited { retry_after: Duration },
}

/// Production [`IdentityProvider`] backed by the HTTP identity API.
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: String,
    cdn_url: String,
    rate_limit_retries: u32,
}

impl HttpResolver {
    /// Build a resolver from the API section of the configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            cdn_url: config.api.cdn_url.trim_end_matches('/').to_string(),
            rate_limit_retries: config.api.rate_limit_retries,
        })
    }

    async fn lookup(&self, user_id: &UserId, token: &str) -> Result<serde_json::Value> {
        let endpoint = format!("{}/users/{}", self.base_url, user_id);
        let response = self
            .client
            .get(&endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {token}"))
            .send()
            .await?;

        Ok(response.json().await?)
    }

    /// Interpret one response body.
    ///
    /// Success shapes: an `avatar` hash, or a `discriminator` that either is
    /// the no-avatar sentinel or selects one of the CDN's default images.
    /// Anything else is classified from the `message` string.
    fn interpret(&self, user_id: &UserId, token: &str, body: &serde_json::Value) -> Result<Reply> {
        if let Some(hash) = body.get("avatar").and_then(|v| v.as_str()) {
            let url = format!("{}/avatars/{}/{}.png", self.cdn_url, user_id, hash);
            return Ok(Reply::Avatar(parse_cdn_url(&url)?));
        }

        // No avatar hash means the account has no custom image; fall back to
        // its discriminator-selected default.
        if body.get("avatar").is_none_or(serde_json::Value::is_null) {
            if let Some(discriminator) = body.get("discriminator").and_then(|v| v.as_str()) {
                if discriminator == "0000" {
                    return Ok(Reply::NoAvatar);
                }
                if let Ok(n) = discriminator.parse::<u64>() {
                    let url = format!(
                        "{}/embed/avatars/{}.png",
                        self.cdn_url,
                        n % DEFAULT_AVATAR_VARIANTS
                    );
                    return Ok(Reply::Avatar(parse_cdn_url(&url)?));
                }
            }
        }

        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();

        if message.contains("unauthorized") {
            return Err(Error::InvalidToken {
                token_hint: token_hint(token),
            });
        }

        if message.contains("limit") {
            let retry_after = body
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            return Ok(Reply::RateLimited {
                retry_after: Duration::from_secs_f64(retry_after.max(0.0)),
            });
        }

        // Unknown-user bodies are terminal: retrying a nonexistent account
        // cannot succeed.
        if message.contains("unknown") {
            return Ok(Reply::NoAvatar);
        }

        Err(Error::Api {
            user_id: user_id.to_string(),
            message: if message.is_empty() {
                body.to_string()
            } else {
                message
            },
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for HttpResolver {
    async fn resolve(&self, user_id: &UserId, token: &str) -> Result<Resolved> {
        if !user_id.is_numeric() {
            return Ok(Resolved::NoAvatar);
        }

        let mut rate_limit_hits = 0u32;
        loop {
            let body = self.lookup(user_id, token).await?;

            match self.interpret(user_id, token, &body)? {
                Reply::Avatar(url) => return Ok(Resolved::Avatar(url)),
                Reply::NoAvatar => return Ok(Resolved::NoAvatar),
                Reply::RateLimited { retry_after } => {
                    if rate_limit_hits >= self.rate_limit_retries {
                        return Err(Error::RateLimited {
                            user_id: user_id.to_string(),
                            retries: rate_limit_hits,
                        });
                    }
                    rate_limit_hits += 1;

                    let pad = Duration::from_millis(
                        rand::thread_rng().gen_range(0..=RATE_LIMIT_PAD_MS),
                    );
                    let wait = retry_after + pad;
                    tracing::warn!(
                        user_id = %user_id,
                        wait_ms = wait.as_millis() as u64,
                        attempt = rate_limit_hits,
                        "Rate limited by the identity API, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

fn parse_cdn_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::Config {
        message: format!("invalid CDN URL {url}: {e}"),
        key: Some("cdn_url".to_string()),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "test-token";

    async fn resolver_for(server: &MockServer) -> HttpResolver {
        let mut config = Config::default();
        config.api.base_url = server.uri();
        config.api.cdn_url = "https://cdn.example.com".to_string();
        config.api.rate_limit_retries = 3;
        HttpResolver::new(&config).unwrap()
    }

    #[tokio::test]
    async fn avatar_hash_builds_canonical_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/111"))
            .and(header("Authorization", format!("Bot {TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "avatar": "a1b2c3",
                "discriminator": "0042",
            })))
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("111"), TOKEN)
            .await
            .unwrap();

        assert_eq!(
            resolved,
            Resolved::Avatar(Url::parse("https://cdn.example.com/avatars/111/a1b2c3.png").unwrap())
        );
    }

    #[tokio::test]
    async fn null_avatar_with_sentinel_discriminator_is_no_avatar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/222"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "avatar": null,
                "discriminator": "0000",
            })))
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("222"), TOKEN)
            .await
            .unwrap();

        assert_eq!(resolved, Resolved::NoAvatar);
    }

    #[tokio::test]
    async fn null_avatar_selects_default_by_discriminator_modulo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/333"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "avatar": null,
                "discriminator": "0007",
            })))
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("333"), TOKEN)
            .await
            .unwrap();

        // 7 % 5 = 2
        assert_eq!(
            resolved,
            Resolved::Avatar(Url::parse("https://cdn.example.com/embed/avatars/2.png").unwrap())
        );
    }

    #[tokio::test]
    async fn missing_avatar_field_still_selects_a_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/334"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "discriminator": "0009",
            })))
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("334"), TOKEN)
            .await
            .unwrap();

        // 9 % 5 = 4
        assert_eq!(
            resolved,
            Resolved::Avatar(Url::parse("https://cdn.example.com/embed/avatars/4.png").unwrap())
        );
    }

    #[tokio::test]
    async fn non_numeric_id_never_touches_the_network() {
        let server = MockServer::start().await;
        // Any request at all would violate the expectation
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("abc"), TOKEN)
            .await
            .unwrap();

        assert_eq!(resolved, Resolved::NoAvatar);
    }

    #[tokio::test]
    async fn unauthorized_message_is_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/444"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "401: Unauthorized",
            })))
            .mount(&server)
            .await;

        let err = resolver_for(&server)
            .await
            .resolve(&UserId::new("444"), TOKEN)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn rate_limit_then_success_is_one_eventual_success() {
        let server = MockServer::start().await;

        // First reply: rate limited with a tiny wait. Mounted first with a
        // one-use cap so the follow-up request falls through to the success
        // mock below.
        Mock::given(method("GET"))
            .and(path("/users/555"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "message": "You are being rate limited.",
                "retry_after": 0.01,
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/users/555"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "avatar": "beef",
            })))
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("555"), TOKEN)
            .await
            .unwrap();

        assert!(matches!(resolved, Resolved::Avatar(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn persistent_rate_limiting_exhausts_the_inner_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/666"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "message": "You are being rate limited.",
                "retry_after": 0.0,
            })))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.api.base_url = server.uri();
        config.api.rate_limit_retries = 2;
        let resolver = HttpResolver::new(&config).unwrap();

        let err = resolver
            .resolve(&UserId::new("666"), TOKEN)
            .await
            .unwrap_err();

        match err {
            Error::RateLimited { retries, .. } => assert_eq!(retries, 2),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        // initial attempt + 2 inner retries
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_user_message_is_terminal_no_avatar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/777"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Unknown User",
            })))
            .mount(&server)
            .await;

        let resolved = resolver_for(&server)
            .await
            .resolve(&UserId::new("777"), TOKEN)
            .await
            .unwrap();

        assert_eq!(resolved, Resolved::NoAvatar);
    }

    #[tokio::test]
    async fn unrecognized_error_body_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/888"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "message": "Internal gremlins",
            })))
            .mount(&server)
            .await;

        let err = resolver_for(&server)
            .await
            .resolve(&UserId::new("888"), TOKEN)
            .await
            .unwrap_err();

        match err {
            Error::Api { user_id, message } => {
                assert_eq!(user_id, "888");
                assert!(message.contains("gremlins"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        // A port nothing is listening on
        let mut config = Config::default();
        config.api.base_url = "http://127.0.0.1:1".to_string();
        config.api.request_timeout_secs = 2;
        let resolver = HttpResolver::new(&config).unwrap();

        let err = resolver
            .resolve(&UserId::new("999"), TOKEN)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connection(_)));
    }
}
