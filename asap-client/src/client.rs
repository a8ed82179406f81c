//! ASAP HTTP client.
//!
//! `send` runs every attempt through the circuit breaker for the target
//! base URL and retries transport failures, 5xx and 429 with exponential
//! backoff. JSON-RPC error replies and other 4xx responses are returned to
//! the caller immediately.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use asap_core::constants::{ASAP_PATH, MANIFEST_PATH};
use asap_core::{
    decode_response, encode_request, system_clock, Envelope, JsonRpcRequest, JsonRpcResponse,
    Manifest, RequestId, SharedClock,
};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use url::{Host, Url};

use crate::backoff::parse_retry_after;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::ClientConfig;
use crate::constants::USER_AGENT;
use crate::error::ClientError;
use crate::manifest_cache::ManifestCache;

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`AsapClient`].
#[derive(Debug)]
pub struct AsapClientBuilder {
    base_url: String,
    config: ClientConfig,
    circuit_breakers: Option<Arc<CircuitBreakerRegistry>>,
    manifest_cache: Option<Arc<ManifestCache>>,
    bearer_token: Option<SecretString>,
    clock: Option<SharedClock>,
}

impl AsapClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config: ClientConfig::default(),
            circuit_breakers: None,
            manifest_cache: None,
            bearer_token: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Share breaker state with other clients. Defaults to
    /// [`CircuitBreakerRegistry::global`].
    pub fn circuit_breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.circuit_breakers = Some(registry);
        self
    }

    pub fn manifest_cache(mut self, cache: Arc<ManifestCache>) -> Self {
        self.manifest_cache = Some(cache);
        self
    }

    /// Bearer credential sent with every request.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(SecretString::from(token.into()));
        self
    }

    /// Clock for the manifest cache built by default.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<AsapClient, ClientError> {
        self.config.validate()?;

        let url = Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "https" => {}
            "http" => {
                if self.config.require_https && !is_loopback(&url) {
                    return Err(ClientError::InsecureUrl {
                        url: self.base_url.clone(),
                    });
                }
            }
            other => {
                return Err(ClientError::InvalidUrl {
                    url: self.base_url.clone(),
                    reason: format!("unsupported scheme '{other}'"),
                })
            }
        }
        if url.host().is_none() {
            return Err(ClientError::InvalidUrl {
                url: self.base_url.clone(),
                reason: "missing host".into(),
            });
        }

        let base = url.as_str().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(ClientError::Http)?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let manifest_cache = self.manifest_cache.unwrap_or_else(|| {
            Arc::new(ManifestCache::with_clock(
                self.config.manifest_cache_ttl,
                clock,
            ))
        });

        Ok(AsapClient {
            asap_url: format!("{base}{ASAP_PATH}"),
            manifest_url: format!("{base}{MANIFEST_PATH}"),
            base,
            http,
            config: self.config,
            circuit_breakers: self
                .circuit_breakers
                .unwrap_or_else(CircuitBreakerRegistry::global),
            manifest_cache,
            bearer_token: self.bearer_token,
            next_id: AtomicI64::new(1),
        })
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client bound to one remote agent.
#[derive(Debug)]
pub struct AsapClient {
    base: String,
    asap_url: String,
    manifest_url: String,
    http: reqwest::Client,
    config: ClientConfig,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    manifest_cache: Arc<ManifestCache>,
    bearer_token: Option<SecretString>,
    next_id: AtomicI64,
}

impl AsapClient {
    pub fn builder(base_url: impl Into<String>) -> AsapClientBuilder {
        AsapClientBuilder::new(base_url)
    }

    /// Client with default configuration.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder(base_url).build()
    }

    /// Normalized base URL; also the circuit breaker key.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuit_breakers
    }

    /// Send an envelope and wait for the response envelope.
    pub async fn send(&self, envelope: &Envelope) -> Result<Envelope, ClientError> {
        let request_id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcRequest::new(envelope.clone(), request_id.clone());
        let body = encode_request(&request).map_err(ClientError::Encode)?;

        let breaker = self.circuit_breakers.get(&self.base);
        let policy = self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            let permit = breaker.try_acquire().map_err(|rejected| {
                tracing::debug!(
                    target_url = %self.base,
                    envelope_id = %envelope.id,
                    state = %rejected.state,
                    "Circuit rejected request"
                );
                ClientError::CircuitOpen {
                    url: self.base.clone(),
                }
            })?;

            match self.attempt(&body, &request_id).await {
                Ok(reply) => {
                    permit.success();
                    return Ok(reply);
                }
                Err(err) if err.is_retriable() => {
                    permit.failure();
                    if attempt >= policy.max_retries {
                        tracing::error!(
                            target_url = %self.base,
                            envelope_id = %envelope.id,
                            attempts = attempt + 1,
                            error = %err,
                            "ASAP request failed after retries"
                        );
                        return Err(err);
                    }

                    let delay = err
                        .retry_after()
                        .map(|d| policy.clamp_retry_after(d))
                        .unwrap_or_else(|| policy.delay_for_attempt(attempt));
                    tracing::warn!(
                        target_url = %self.base,
                        envelope_id = %envelope.id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "ASAP request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    // The target answered, so the circuit stays healthy
                    permit.success();
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, body: &[u8], request_id: &RequestId) -> Result<Envelope, ClientError> {
        let mut request = self
            .http
            .post(&self.asap_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(&self.asap_url, e))?;
        let status = response.status();
        let retry_after = self.retry_after(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&self.asap_url, e))?;

        if !status.is_success() {
            let error = match decode_response(&bytes) {
                Ok(JsonRpcResponse::Error { error, .. }) => Some(error),
                _ => None,
            };
            return Err(ClientError::HttpStatus {
                url: self.asap_url.clone(),
                status: status.as_u16(),
                retry_after,
                error,
            });
        }

        match decode_response(&bytes) {
            Ok(JsonRpcResponse::Success { id, envelope }) => {
                if &id != request_id {
                    tracing::warn!(
                        expected = %request_id,
                        received = %id,
                        "Response id does not match request id"
                    );
                    return Err(ClientError::InvalidResponse(format!(
                        "response id {id} does not match request id {request_id}"
                    )));
                }
                Ok(envelope)
            }
            Ok(JsonRpcResponse::Error { error, .. }) => Err(ClientError::Remote(error)),
            Err(e) => Err(ClientError::InvalidResponse(e.to_string())),
        }
    }

    /// Fetch the remote manifest, served from cache while fresh.
    pub async fn discover(&self) -> Result<Arc<Manifest>, ClientError> {
        if let Some(manifest) = self.manifest_cache.get(&self.base) {
            return Ok(manifest);
        }

        let mut request = self.http.get(&self.manifest_url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(&self.manifest_url, e))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::HttpStatus {
                url: self.manifest_url.clone(),
                status: status.as_u16(),
                retry_after: self.retry_after(response.headers()),
                error: None,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&self.manifest_url, e))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::InvalidResponse(format!("manifest: {e}")))?;
        manifest
            .validate()
            .map_err(|e| ClientError::InvalidResponse(format!("manifest: {e}")))?;

        tracing::debug!(target_url = %self.base, agent = %manifest.id, "Manifest discovered");
        Ok(self.manifest_cache.insert(self.base.clone(), manifest))
    }

    /// Drop the cached manifest for this client's target.
    pub fn invalidate_manifest(&self) {
        self.manifest_cache.invalidate(&self.base);
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout {
                url: url.to_string(),
                timeout_ms: u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            ClientError::Connection {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }

    fn retry_after(&self, headers: &HeaderMap) -> Option<std::time::Duration> {
        let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
        parse_retry_after(value, chrono::Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_http_is_allowed() {
        for base in [
            "http://localhost:8000",
            "http://127.0.0.1:8000/",
            "http://[::1]:8000",
        ] {
            let client = AsapClient::new(base).unwrap();
            assert!(!client.base_url().ends_with('/'));
        }
    }

    #[test]
    fn test_remote_http_requires_opt_out() {
        let err = AsapClient::new("http://agents.example.com").unwrap_err();
        assert!(matches!(err, ClientError::InsecureUrl { .. }));

        let config = ClientConfig {
            require_https: false,
            ..ClientConfig::default()
        };
        assert!(AsapClient::builder("http://agents.example.com")
            .config(config)
            .build()
            .is_ok());
        assert!(AsapClient::new("https://agents.example.com").is_ok());
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            AsapClient::new("not a url"),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(matches!(
            AsapClient::new("ftp://127.0.0.1"),
            Err(ClientError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_endpoint_urls() {
        let client = AsapClient::new("http://127.0.0.1:9000/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9000");
        assert_eq!(client.asap_url, "http://127.0.0.1:9000/asap");
        assert_eq!(
            client.manifest_url,
            "http://127.0.0.1:9000/.well-known/asap/manifest.json"
        );
    }
}
