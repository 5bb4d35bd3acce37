//! Request quota tracking over a fixed hourly window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the quota tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length. Boundaries are aligned to multiples of this length.
    pub window: Duration,
}

impl QuotaConfig {
    /// Create a configuration with an hourly window.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(3600),
        }
    }

    /// Set the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self::new(150)
    }
}

/// Budget state for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    pub limit: u32,
    pub used: u32,
    /// None until first needed.
    pub window_reset_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`QuotaTracker::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Tracks remaining request budget and makes admission decisions.
///
/// The window boundary is computed lazily, the first time any method needs
/// it, so a tracker created long before its first call does not drift.
pub struct QuotaTracker {
    config: QuotaConfig,
    window: Mutex<QuotaWindow>,
}

impl QuotaTracker {
    /// Create a tracker with a fresh window.
    pub fn new(config: QuotaConfig) -> Self {
        let window = QuotaWindow {
            limit: config.limit,
            used: 0,
            window_reset_at: None,
        };
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, QuotaWindow> {
        // Counters stay valid even if a holder panicked
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let len = self.config.window.as_secs().max(1) as i64;
        let next = (now.timestamp().div_euclid(len) + 1) * len;
        DateTime::<Utc>::from_timestamp(next, 0)
            .unwrap_or_else(|| now + ChronoDuration::seconds(len))
    }

    /// Establish or roll the window so that it covers `now`.
    fn roll(&self, window: &mut QuotaWindow, now: DateTime<Utc>) -> DateTime<Utc> {
        match window.window_reset_at {
            Some(reset_at) if now < reset_at => reset_at,
            Some(_) => {
                let reset_at = self.next_boundary(now);
                debug!("Quota window reset; {} requests used in previous window", window.used);
                window.used = 0;
                window.window_reset_at = Some(reset_at);
                reset_at
            }
            None => {
                let reset_at = self.next_boundary(now);
                window.window_reset_at = Some(reset_at);
                reset_at
            }
        }
    }

    /// Whether a call may proceed under the current budget.
    pub fn admit(&self) -> bool {
        self.admit_at(Utc::now())
    }

    /// [`admit`](Self::admit) evaluated at `now`.
    pub fn admit_at(&self, now: DateTime<Utc>) -> bool {
        let mut window = self.lock();
        self.roll(&mut window, now);
        window.used < window.limit
    }

    /// Count one request against the budget.
    pub fn record_usage(&self) {
        self.record_usage_at(Utc::now())
    }

    /// [`record_usage`](Self::record_usage) evaluated at `now`.
    pub fn record_usage_at(&self, now: DateTime<Utc>) {
        let mut window = self.lock();
        self.roll(&mut window, now);
        window.used = window.used.saturating_add(1);
    }

    /// Admit and count in one step. Returns false without counting when denied.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut window = self.lock();
        self.roll(&mut window, now);
        if window.used < window.limit {
            window.used += 1;
            true
        } else {
            false
        }
    }

    /// Replace the local reset estimate with one reported by the remote.
    pub fn adopt_reset_time(&self, reset_at: DateTime<Utc>) {
        let mut window = self.lock();
        if window.window_reset_at != Some(reset_at) {
            info!("Adopting remote quota reset time {}", reset_at);
            window.window_reset_at = Some(reset_at);
        }
    }

    /// Current limit, remaining budget and reset time.
    pub fn status(&self) -> QuotaStatus {
        self.status_at(Utc::now())
    }

    /// [`status`](Self::status) evaluated at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> QuotaStatus {
        let mut window = self.lock();
        let reset_at = self.roll(&mut window, now);
        QuotaStatus {
            limit: window.limit,
            remaining: window.limit.saturating_sub(window.used),
            reset_at,
        }
    }

    /// Time left until the budget is restored.
    pub fn time_until_reset(&self) -> Duration {
        self.time_until_reset_at(Utc::now())
    }

    /// [`time_until_reset`](Self::time_until_reset) evaluated at `now`.
    pub fn time_until_reset_at(&self, now: DateTime<Utc>) -> Duration {
        let reset_at = self.status_at(now).reset_at;
        (reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Copy of the raw window state.
    pub fn window(&self) -> QuotaWindow {
        *self.lock()
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
