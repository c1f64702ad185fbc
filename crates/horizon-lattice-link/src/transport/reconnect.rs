//! Reconnect and idle policies for the streaming connection.

use std::time::Duration;

use rand::Rng;

/// Configuration for automatic reconnection.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts before the connection
    /// is declared failed. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Spread each delay by up to ±10%.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of reconnection attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retry forever.
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the initial delay between reconnection attempts.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between reconnection attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier for exponential backoff.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disable jitter, making delays deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether `failed` consecutive failures exhaust the budget.
    pub(crate) fn exhausted(&self, failed: u32) -> bool {
        self.max_attempts.is_some_and(|max| failed >= max)
    }

    /// Delay before attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = (base_ms * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_millis() as f64)
            .max(0.0) as u64;

        if !self.jitter {
            return Duration::from_millis(delay_ms);
        }
        let range = (delay_ms / 10) as i64;
        if range == 0 {
            return Duration::from_millis(delay_ms);
        }
        let offset = rand::thread_rng().gen_range(-range..=range);
        Duration::from_millis((delay_ms as i64 + offset).max(0) as u64)
    }
}

/// What to do with the socket once the last subscription is gone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Leave the socket open and idle.
    #[default]
    KeepOpen,
    /// Close the socket once no subscription has been registered for
    /// `grace`. A zero grace closes immediately.
    CloseWhenIdle {
        /// How long the connection may sit idle.
        grace: Duration,
    },
}
