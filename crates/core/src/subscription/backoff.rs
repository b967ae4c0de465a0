use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Reconnect delay tracker.
///
/// Connections that close soon after opening usually mean the server is down,
/// so each one doubles the wait. A connection that stayed up for a while
/// dropped for a transient reason and is retried straight away.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.initial_delay();
        Self { policy, delay }
    }

    /// Current base delay.
    pub fn current(&self) -> Duration {
        self.delay
    }

    /// Records a closed connection that had been open for `lifetime` and
    /// returns how long to wait before reconnecting.
    pub fn on_close(&mut self, lifetime: Duration) -> Duration {
        if lifetime < self.policy.short_failure_threshold() {
            self.delay = (self.delay * 2).min(self.policy.max_delay());
            self.delay
        } else {
            self.delay = self.policy.initial_delay();
            Duration::ZERO
        }
    }
}
