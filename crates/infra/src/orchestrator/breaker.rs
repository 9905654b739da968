//! Circuit breaker over consecutive transport failures.

use chrono::{DateTime, TimeDelta, Utc};

/// Opens after `threshold` consecutive transport failures and stays open for
/// `pause`. Once the pause expires it is half-open: one success closes it,
/// one more failure reopens it for another full pause.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    pause: TimeDelta,
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, pause: TimeDelta) -> Self {
        Self {
            threshold: threshold.max(1),
            pause,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    /// `Some(until)` while submissions must be deferred.
    pub fn open_until(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.open_until {
            Some(until) if now < until => Some(until),
            Some(_) => {
                self.open_until = None;
                None
            }
            None => None,
        }
    }

    /// Returns `true` when this failure opened the breaker.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold && self.open_until.is_none() {
            let until = now
                .checked_add_signed(self.pause)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.open_until = Some(until);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
