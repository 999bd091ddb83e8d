//! Answering-machine detection (AMD) correlation state.
//!
//! Twilio reports the AMD outcome on the status callback, out of band from
//! the media stream. The two arrive in arbitrary order, so classifications
//! are parked here keyed by call SID: the session consults the registry on
//! its `start` frame and can subscribe for a classification that lands
//! late. First write wins for a given call.
//!
//! The registry also owns the process-wide finalize guard so a call is
//! completed through the REST API at most once, whether the trigger is the
//! session's `stop`, the machine watchdog, or `/end-call`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, oneshot};

/// Entries unread for this long are garbage-collected.
pub const ENTRY_TTL: Duration = Duration::from_secs(600);

/// Delay before a machine-classified call is forcibly finalized.
pub const MACHINE_FINALIZE_DELAY: Duration = Duration::from_secs(60);

// =============================================================================
// Classification
// =============================================================================

/// The answering party as classified by the telephony provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmdClassification {
    /// A person answered
    Human,
    /// Machine greeting still playing
    MachineStart,
    /// Machine greeting ended with a beep
    MachineEndBeep,
    /// Machine greeting ended with silence
    MachineEndSilence,
    /// Machine greeting ended some other way
    MachineEndOther,
    /// Fax machine answered
    Fax,
    /// Detection inconclusive
    Unknown,
}

impl AmdClassification {
    /// Parse Twilio's `AnsweredBy` form field.
    pub fn from_answered_by(answered_by: &str) -> Self {
        match answered_by {
            "human" => Self::Human,
            "machine_start" => Self::MachineStart,
            "machine_end_beep" => Self::MachineEndBeep,
            "machine_end_silence" => Self::MachineEndSilence,
            "machine_end_other" => Self::MachineEndOther,
            "fax" => Self::Fax,
            _ => Self::Unknown,
        }
    }

    /// True for any machine or fax outcome. These calls get the voicemail
    /// flow and the finalize watchdog.
    pub fn is_machine(&self) -> bool {
        matches!(
            self,
            Self::MachineStart
                | Self::MachineEndBeep
                | Self::MachineEndSilence
                | Self::MachineEndOther
                | Self::Fax
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::MachineStart => "machine_start",
            Self::MachineEndBeep => "machine_end_beep",
            Self::MachineEndSilence => "machine_end_silence",
            Self::MachineEndOther => "machine_end_other",
            Self::Fax => "fax",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
struct AmdEntry {
    classification: AmdClassification,
    recorded_at: Instant,
}

#[derive(Default)]
struct RegistryInner {
    results: HashMap<String, AmdEntry>,
    waiters: HashMap<String, oneshot::Sender<AmdClassification>>,
    finalized: HashSet<String>,
}

/// Process-wide AMD correlation registry.
#[derive(Default)]
pub struct AmdRegistry {
    inner: Mutex<RegistryInner>,
}

impl AmdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classification for a call. Returns `true` if this was the
    /// first write; repeat writes for the same call are ignored so the
    /// decision stays stable.
    pub async fn record(&self, call_sid: &str, classification: AmdClassification) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.results.contains_key(call_sid) {
            tracing::debug!(
                call_sid,
                classification = classification.as_str(),
                "Ignoring repeat AMD classification"
            );
            return false;
        }

        if let Some(waiter) = inner.waiters.remove(call_sid) {
            // A session is already live for this call; hand the result
            // straight over instead of parking it.
            let _ = waiter.send(classification);
            tracing::info!(
                call_sid,
                classification = classification.as_str(),
                "AMD classification delivered to waiting session"
            );
            return true;
        }

        inner.results.insert(
            call_sid.to_string(),
            AmdEntry {
                classification,
                recorded_at: Instant::now(),
            },
        );
        tracing::info!(
            call_sid,
            classification = classification.as_str(),
            "AMD classification recorded"
        );
        true
    }

    /// Consume the classification for a call, if one was recorded.
    pub async fn take(&self, call_sid: &str) -> Option<AmdClassification> {
        let mut inner = self.inner.lock().await;
        inner.results.remove(call_sid).map(|e| e.classification)
    }

    /// Subscribe to a classification that has not arrived yet. The
    /// returned receiver fires if the status callback lands while the
    /// session is running; it is dropped silently on session teardown.
    pub async fn subscribe(&self, call_sid: &str) -> oneshot::Receiver<AmdClassification> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.results.remove(call_sid) {
            let _ = tx.send(entry.classification);
        } else {
            inner.waiters.insert(call_sid.to_string(), tx);
        }
        rx
    }

    /// Claim the right to finalize a call. Returns `true` exactly once per
    /// call SID; every later claim returns `false`.
    pub async fn begin_finalize(&self, call_sid: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.finalized.insert(call_sid.to_string())
    }

    /// Drop entries older than [`ENTRY_TTL`] and waiters whose session is
    /// gone. Called from the background sweep task.
    pub async fn sweep(&self) {
        let mut inner = self.inner.lock().await;
        let before = inner.results.len();
        inner
            .results
            .retain(|_, entry| entry.recorded_at.elapsed() < ENTRY_TTL);
        let dropped = before - inner.results.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Swept stale AMD entries");
        }
        inner.waiters.retain(|_, waiter| !waiter.is_closed());
    }

    /// Number of parked classifications. For the status snapshot.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answered_by_parsing() {
        assert_eq!(
            AmdClassification::from_answered_by("human"),
            AmdClassification::Human
        );
        assert_eq!(
            AmdClassification::from_answered_by("machine_end_beep"),
            AmdClassification::MachineEndBeep
        );
        assert_eq!(
            AmdClassification::from_answered_by("something_new"),
            AmdClassification::Unknown
        );
    }

    #[test]
    fn test_machine_classification() {
        assert!(AmdClassification::MachineStart.is_machine());
        assert!(AmdClassification::MachineEndSilence.is_machine());
        assert!(AmdClassification::Fax.is_machine());
        assert!(!AmdClassification::Human.is_machine());
        assert!(!AmdClassification::Unknown.is_machine());
    }

    #[tokio::test]
    async fn test_record_then_take() {
        let registry = AmdRegistry::new();
        assert!(
            registry
                .record("CA1", AmdClassification::MachineStart)
                .await
        );
        assert_eq!(
            registry.take("CA1").await,
            Some(AmdClassification::MachineStart)
        );
        // Consumed on read.
        assert_eq!(registry.take("CA1").await, None);
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let registry = AmdRegistry::new();
        assert!(
            registry
                .record("CA2", AmdClassification::MachineStart)
                .await
        );
        assert!(!registry.record("CA2", AmdClassification::Human).await);
        assert_eq!(
            registry.take("CA2").await,
            Some(AmdClassification::MachineStart)
        );
    }

    #[tokio::test]
    async fn test_subscribe_before_record() {
        let registry = AmdRegistry::new();
        let rx = registry.subscribe("CA3").await;
        registry.record("CA3", AmdClassification::Fax).await;
        assert_eq!(rx.await.unwrap(), AmdClassification::Fax);
        // Delivered through the waiter, not parked.
        assert_eq!(registry.take("CA3").await, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_record_fires_immediately() {
        let registry = AmdRegistry::new();
        registry.record("CA4", AmdClassification::Human).await;
        let rx = registry.subscribe("CA4").await;
        assert_eq!(rx.await.unwrap(), AmdClassification::Human);
    }

    #[tokio::test]
    async fn test_finalize_guard_fires_once() {
        let registry = AmdRegistry::new();
        assert!(registry.begin_finalize("CA5").await);
        assert!(!registry.begin_finalize("CA5").await);
        assert!(registry.begin_finalize("CA6").await);
    }

    #[tokio::test]
    async fn test_sweep_drops_dead_waiters() {
        let registry = AmdRegistry::new();
        let rx = registry.subscribe("CA7").await;
        drop(rx);
        registry.sweep().await;
        // A record after the waiter died parks normally.
        registry.record("CA7", AmdClassification::Human).await;
        assert_eq!(registry.take("CA7").await, Some(AmdClassification::Human));
    }

    #[tokio::test]
    async fn test_pending_count() {
        let registry = AmdRegistry::new();
        assert_eq!(registry.pending_count().await, 0);
        registry.record("CA8", AmdClassification::Human).await;
        assert_eq!(registry.pending_count().await, 1);
    }
}
