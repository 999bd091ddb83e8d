//! Shared application state.
//!
//! One [`AppState`] exists per process, shared behind an `Arc` by every
//! handler and session. Construction wires the shared registries together
//! and spawns the background maintenance tasks: signed-URL prewarming, AMD
//! registry sweeping, and predictor-driven cache sizing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::predictor::{ADJUST_INTERVAL, CallRatePredictor};
use crate::core::tools::{CalComBackend, ToolDispatcher};
use crate::core::twilio::{AmdRegistry, TwilioClient};
use crate::core::{CalendarBackend, SignedUrlCache};
use crate::errors::BridgeResult;

/// Cadence of AMD registry garbage collection.
const AMD_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state shared across handlers and sessions.
pub struct AppState {
    pub config: ServerConfig,
    pub signed_urls: Arc<SignedUrlCache>,
    pub amd: Arc<AmdRegistry>,
    pub predictor: Arc<CallRatePredictor>,
    pub twilio: Arc<TwilioClient>,
    pub tools: Arc<ToolDispatcher>,
    active_sessions: AtomicUsize,
}

impl AppState {
    /// Build the state and start the background maintenance tasks.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let signed_urls = Arc::new(SignedUrlCache::new(
            config.elevenlabs_api_key.clone(),
            config.elevenlabs_agent_id.clone(),
        ));

        let twilio = Arc::new(TwilioClient::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        ));

        let backend: Option<Arc<dyn CalendarBackend>> = config
            .cal_com_api_key
            .as_ref()
            .map(|key| Arc::new(CalComBackend::new(key.clone())) as Arc<dyn CalendarBackend>);
        if backend.is_none() {
            tracing::warn!("CAL_COM_API_KEY not set; booking tools will return errors");
        }

        let state = Self::assemble_with(
            config,
            signed_urls,
            twilio,
            Arc::new(ToolDispatcher::new(backend)),
        );
        state.spawn_maintenance();
        state
    }

    /// Wire the state from pre-built components without starting the
    /// maintenance tasks. Seam for tests that point the components at
    /// local endpoints.
    pub fn assemble_with(
        config: ServerConfig,
        signed_urls: Arc<SignedUrlCache>,
        twilio: Arc<TwilioClient>,
        tools: Arc<ToolDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            signed_urls,
            amd: Arc::new(AmdRegistry::new()),
            predictor: Arc::new(CallRatePredictor::new()),
            twilio,
            tools,
            active_sessions: AtomicUsize::new(0),
        })
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        // Initial signed-URL prewarm; failure is logged, never fatal.
        let cache = self.signed_urls.clone();
        tokio::spawn(async move {
            cache.prewarm().await;
        });

        // AMD registry garbage collection.
        let amd = self.amd.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AMD_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                amd.sweep().await;
            }
        });

        // Predictor-driven cache sizing.
        let predictor = self.predictor.clone();
        let cache = self.signed_urls.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ADJUST_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let target = predictor.recommended_cache_target().await;
                cache.set_target(target);
                cache.prewarm().await;
            }
        });
    }

    /// Track a media-stream session opening. Pairs with
    /// [`AppState::session_ended`].
    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Track a media-stream session closing.
    pub fn session_ended(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of live media-stream sessions.
    pub fn active_session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Finalize a call exactly once across all triggers (session stop,
    /// AMD watchdog, `/end-call`). Returns `false` if another path already
    /// claimed the finalization.
    pub async fn finalize_call(&self, call_sid: &str) -> BridgeResult<bool> {
        if !self.amd.begin_finalize(call_sid).await {
            tracing::debug!(call_sid, "Call already finalized");
            return Ok(false);
        }
        self.twilio.complete_call(call_sid).await?;
        Ok(true)
    }
}
