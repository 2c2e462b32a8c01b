use std::time::Duration;

use catalog_types::{Address, FeedbackScores};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20_000;

/// Client configuration for one acting identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub account: Address,
    /// Interval of the subscription status poll.
    pub poll_interval_ms: u64,
    /// Scores used when estimating a feedback submission; the real scores
    /// are only sent at confirmation.
    pub feedback_placeholder: FeedbackScores,
}

impl ClientConfig {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            account: Address::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            feedback_placeholder: FeedbackScores::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use catalog_types::Address;

    use super::ClientConfig;

    #[test]
    fn defaults_poll_every_twenty_seconds() {
        let config = ClientConfig::new(Address::new([0x01; 20]));
        assert_eq!(config.poll_interval(), Duration::from_secs(20));
        assert_eq!(config.feedback_placeholder.appreciation, 5);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = ClientConfig::default().with_poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
