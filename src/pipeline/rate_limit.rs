use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{ClientState, StoreError, RATE_LIMIT_KEY};

pub const MAX_REQUESTS: usize = 3;
pub const WINDOW: Duration = Duration::from_secs(60);

/// Epoch milliseconds of recent analysis requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateWindow(pub Vec<i64>);

impl RateWindow {
    fn prune(&mut self, now_ms: i64, window_ms: i64) {
        self.0.retain(|&t| t > now_ms - window_ms && t <= now_ms);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: usize,
    /// Seconds until the oldest request leaves the window; 0 when nothing is
    /// in it.
    pub reset_in_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn rate_limit_message(seconds: u64) -> String {
    format!("Rate limit reached. Please wait {seconds} seconds before trying again.")
}

/// Sliding window over the timestamps kept in client state.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    max_requests: usize,
    window_ms: i64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MAX_REQUESTS, WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as i64,
        }
    }

    /// Pure evaluation of an already pruned window.
    pub fn evaluate(&self, window: &RateWindow, now_ms: i64) -> RateLimitStatus {
        let used = window.0.len();
        let reset_in_seconds = window
            .0
            .iter()
            .min()
            .map(|oldest| {
                let remaining_ms = (oldest + self.window_ms - now_ms).max(0);
                ((remaining_ms + 999) / 1000) as u64
            })
            .unwrap_or(0);

        let allowed = used < self.max_requests;
        RateLimitStatus {
            allowed,
            remaining: self.max_requests.saturating_sub(used),
            reset_in_seconds,
            message: (!allowed).then(|| rate_limit_message(reset_in_seconds.max(1))),
        }
    }

    async fn load(&self, state: &ClientState, now_ms: i64) -> Result<RateWindow, StoreError> {
        let mut window: RateWindow = state.get_or_default(RATE_LIMIT_KEY).await?;
        window.prune(now_ms, self.window_ms);
        Ok(window)
    }

    pub async fn status(&self, state: &ClientState, now: DateTime<Utc>) -> Result<RateLimitStatus, StoreError> {
        let now_ms = now.timestamp_millis();
        let window = self.load(state, now_ms).await?;
        Ok(self.evaluate(&window, now_ms))
    }

    /// Claims a slot if one is free. A refused request leaves the window as
    /// is. The read and the write are one atomic store update, so parallel
    /// uploads from one device cannot share a slot.
    pub async fn check_and_record(&self, state: &ClientState, now: DateTime<Utc>) -> Result<RateLimitStatus, StoreError> {
        let now_ms = now.timestamp_millis();
        state
            .update_json(RATE_LIMIT_KEY, |mut window: RateWindow| {
                window.prune(now_ms, self.window_ms);
                let before = self.evaluate(&window, now_ms);
                if !before.allowed {
                    return (None, before);
                }

                window.0.push(now_ms);
                let after = self.evaluate(&window, now_ms);
                (
                    Some(window),
                    RateLimitStatus {
                        allowed: true,
                        message: None,
                        ..after
                    },
                )
            })
            .await
    }
}
