//! Signed-URL prewarm cache.
//!
//! Opening the agent WebSocket dominates first-word latency, and minting
//! the short-lived signed URL is a round trip of its own. The cache keeps a
//! small pool of pre-fetched URLs so a call setup usually skips that round
//! trip; consuming one schedules an asynchronous replacement. Prewarm
//! failures never fail a call: `get_url` always falls back to a
//! synchronous mint.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::Mutex;

use super::config::{DEFAULT_CACHE_TARGET, MAX_CACHE_TARGET, SIGNED_URL_ENDPOINT, SIGNED_URL_TTL};
use crate::errors::{BridgeError, BridgeResult};

/// One minted URL plus its acquisition time.
#[derive(Debug, Clone)]
struct SignedUrl {
    url: String,
    fetched_at: Instant,
}

impl SignedUrl {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < SIGNED_URL_TTL
    }
}

/// Response body of the signed-URL endpoint.
#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Cache of prewarmed signed URLs to the agent provider.
pub struct SignedUrlCache {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    agent_id: String,
    entries: Mutex<VecDeque<SignedUrl>>,
    target: AtomicUsize,
}

impl SignedUrlCache {
    pub fn new(api_key: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: SIGNED_URL_ENDPOINT.to_string(),
            api_key: api_key.into(),
            agent_id: agent_id.into(),
            entries: Mutex::new(VecDeque::new()),
            target: AtomicUsize::new(DEFAULT_CACHE_TARGET),
        }
    }

    /// Override the minting endpoint. Test hook.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Current prewarm target.
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    /// Set the prewarm target, clamped to `1..=MAX_CACHE_TARGET`.
    pub fn set_target(&self, target: usize) {
        let clamped = target.clamp(1, MAX_CACHE_TARGET);
        let previous = self.target.swap(clamped, Ordering::Relaxed);
        if previous != clamped {
            tracing::info!(previous, target = clamped, "Signed-URL cache target adjusted");
        }
    }

    /// Number of fresh entries currently held.
    pub async fn cached_count(&self) -> usize {
        let mut entries = self.entries.lock().await;
        entries.retain(SignedUrl::is_fresh);
        entries.len()
    }

    /// Mint one signed URL from the provider.
    async fn fetch(&self) -> BridgeResult<String> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("agent_id", self.agent_id.as_str())])
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| BridgeError::UpstreamAuth(format!("signed-url request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::UpstreamAuth(format!(
                "signed-url rejected ({status}): {body}"
            )));
        }

        let parsed: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::UpstreamAuth(format!("signed-url response: {e}")))?;
        Ok(parsed.signed_url)
    }

    /// Take a fresh URL for a new call.
    ///
    /// Pops a prewarmed entry when one exists and schedules a background
    /// replacement; otherwise mints synchronously. The provider I/O always
    /// happens outside the lock.
    pub async fn get_url(self: &Arc<Self>) -> BridgeResult<String> {
        let cached = {
            let mut entries = self.entries.lock().await;
            entries.retain(SignedUrl::is_fresh);
            entries.pop_front()
        };

        if let Some(entry) = cached {
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                cache.replenish_one().await;
            });
            tracing::debug!("Using prewarmed signed URL");
            return Ok(entry.url);
        }

        tracing::debug!("Signed-URL cache empty, minting synchronously");
        self.fetch().await
    }

    /// Fill the cache up to the current target.
    pub async fn prewarm(self: &Arc<Self>) {
        loop {
            let needed = {
                let mut entries = self.entries.lock().await;
                entries.retain(SignedUrl::is_fresh);
                let target = self.target();
                if entries.len() >= target {
                    return;
                }
                target - entries.len()
            };

            tracing::debug!(needed, "Prewarming signed URLs");
            if !self.replenish_one().await {
                // One failure likely means the provider is unhappy; retry
                // on the next prewarm tick rather than hammering it.
                return;
            }
        }
    }

    /// Mint one URL and store it if there is still room. Returns whether
    /// the mint succeeded.
    async fn replenish_one(&self) -> bool {
        match self.fetch().await {
            Ok(url) => {
                let mut entries = self.entries.lock().await;
                entries.retain(SignedUrl::is_fresh);
                if entries.len() < self.target() {
                    entries.push_back(SignedUrl {
                        url,
                        fetched_at: Instant::now(),
                    });
                }
                true
            }
            Err(e) => {
                tracing::warn!("Signed-URL prewarm failed: {e}");
                false
            }
        }
    }

    #[cfg(test)]
    async fn push_entry(&self, url: &str, fetched_at: Instant) {
        self.entries.lock().await.push_back(SignedUrl {
            url: url.to_string(),
            fetched_at,
        });
    }
}
