//! Call-rate predictor.
//!
//! Keeps a sliding 24-hour window of call arrival timestamps bucketed by
//! hour of day. Every adjustment tick it predicts the coming two hours'
//! volume from yesterday's counts for those hours and maps the prediction
//! onto a signed-URL cache target through a step table.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::sync::Mutex;

/// Sliding window the histogram covers.
const WINDOW_HOURS: i64 = 24;

/// Cadence of cache-target adjustment.
pub const ADJUST_INTERVAL: Duration = Duration::from_secs(600);

/// Map a predicted two-hour volume onto a cache target.
pub fn target_for_volume(predicted: usize) -> usize {
    match predicted {
        0..=10 => 3,
        11..=20 => 5,
        21..=50 => 8,
        _ => 10,
    }
}

/// Sliding-window arrival histogram.
#[derive(Default)]
pub struct CallRatePredictor {
    arrivals: Mutex<VecDeque<DateTime<Utc>>>,
}

impl CallRatePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call arriving now.
    pub async fn record_call(&self) {
        self.record_arrival(Utc::now()).await;
    }

    /// Record a call arriving at an explicit time.
    pub async fn record_arrival(&self, at: DateTime<Utc>) {
        let mut arrivals = self.arrivals.lock().await;
        arrivals.push_back(at);
        Self::prune(&mut arrivals, Utc::now());
    }

    fn prune(arrivals: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::hours(WINDOW_HOURS);
        while let Some(front) = arrivals.front() {
            if *front < cutoff {
                arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    /// Calls recorded in the last 24 hours.
    pub async fn calls_last_24h(&self) -> usize {
        let mut arrivals = self.arrivals.lock().await;
        Self::prune(&mut arrivals, Utc::now());
        arrivals.len()
    }

    /// Predicted volume for the two hour-of-day buckets following `now`,
    /// summed from the last 24 hours of arrivals.
    pub async fn predicted_volume_after(&self, now: DateTime<Utc>) -> usize {
        let next = (now.hour() + 1) % 24;
        let after = (now.hour() + 2) % 24;

        let mut arrivals = self.arrivals.lock().await;
        Self::prune(&mut arrivals, now);
        arrivals
            .iter()
            .filter(|ts| {
                let hour = ts.hour();
                hour == next || hour == after
            })
            .count()
    }

    /// Predicted volume for the next two hours from now.
    pub async fn predicted_next_two_hours(&self) -> usize {
        self.predicted_volume_after(Utc::now()).await
    }

    /// The cache target the current prediction calls for.
    pub async fn recommended_cache_target(&self) -> usize {
        target_for_volume(self.predicted_next_two_hours().await)
    }
}
