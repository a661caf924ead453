use crate::config::QuotaConfig;
use crate::domain::types::EndpointClass;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of asking for one call slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Slot granted; the window counter was incremented atomically.
    Allowed,
    /// Window is full; retry after the given wait.
    Deferred(Duration),
    /// Class-wide circuit breaker engaged after an upstream rejection.
    CoolingDown(Instant),
}

#[derive(Debug, Default)]
struct ClassWindow {
    window_start: Option<Instant>,
    calls: u32,
    cooldown_until: Option<Instant>,
}

/// Tracks remaining call budget per endpoint class over a rolling window.
///
/// This is the single source of truth for "may I call now": every scheduler
/// dispatch decision routes through [`QuotaTracker::reserve`], and the
/// check-and-increment happens under one lock so two workers can never both
/// claim the last remaining slot.
pub struct QuotaTracker {
    window_len: Duration,
    min_cooldown: Duration,
    limits: [u32; 4],
    windows: [Mutex<ClassWindow>; 4],
}

impl QuotaTracker {
    pub fn new(config: &QuotaConfig, min_cooldown: Duration) -> Self {
        Self {
            window_len: config.window,
            min_cooldown,
            limits: EndpointClass::ALL.map(|class| config.limit_for(class)),
            windows: Default::default(),
        }
    }

    /// Atomically reserve one call slot for `class`.
    ///
    /// Never returns `Allowed` while the current window already holds
    /// `limit` calls, and never while the class is cooling down.
    pub async fn reserve(&self, class: EndpointClass) -> Reservation {
        let idx = class.index();
        let limit = self.limits[idx];
        let now = Instant::now();
        let mut window = self.windows[idx].lock().await;

        if let Some(until) = window.cooldown_until {
            if now < until {
                return Reservation::CoolingDown(until);
            }
            // Cooldown elapsed; the class starts a fresh window.
            window.cooldown_until = None;
            window.window_start = None;
            window.calls = 0;
        }

        match window.window_start {
            Some(start) if now.duration_since(start) < self.window_len => {
                if window.calls < limit {
                    window.calls += 1;
                    Reservation::Allowed
                } else {
                    let wait = self.window_len - now.duration_since(start);
                    debug!("quota [{}]: window full, deferring {:?}", class, wait);
                    Reservation::Deferred(wait)
                }
            }
            _ => {
                // A call at the boundary is attributed to the window
                // containing its timestamp.
                window.window_start = Some(now);
                window.calls = 1;
                Reservation::Allowed
            }
        }
    }

    /// Record an upstream rate-limit rejection for `class`.
    ///
    /// Engages the class-wide cooldown for at least the configured minimum
    /// retry delay, honoring a longer server-suggested delay, and resets
    /// the window counter.
    pub async fn record_rejection(&self, class: EndpointClass, server_delay: Duration) {
        let idx = class.index();
        let delay = server_delay.max(self.min_cooldown);
        let mut window = self.windows[idx].lock().await;
        let until = Instant::now() + delay;
        warn!(
            "quota [{}]: upstream rejection, cooling down for {:?}",
            class, delay
        );
        window.cooldown_until = Some(until);
        window.window_start = None;
        window.calls = 0;
    }
}
