use std::time::Duration;

pub const DEFAULT_MAX_QR_ATTEMPTS: u32 = 6;

/// Bounded linear backoff between reconnect attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive transient closes tolerated before giving up.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub immediate_first_retry: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            immediate_first_retry: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || (attempt == 1 && self.immediate_first_retry) {
            return Duration::ZERO;
        }
        let steps = if self.immediate_first_retry {
            attempt - 1
        } else {
            attempt
        };
        self.base_delay
            .checked_mul(steps)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub max_qr_attempts: u32,
    pub print_qr_in_terminal: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_qr_attempts: DEFAULT_MAX_QR_ATTEMPTS,
            print_qr_in_terminal: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_max_qr_attempts(mut self, max: u32) -> Self {
        self.max_qr_attempts = max.max(1);
        self
    }

    pub fn with_print_qr_in_terminal(mut self, print: bool) -> Self {
        self.print_qr_in_terminal = print;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}
