//! Automatic reconnection logic for transport connections
//!
//! When enabled, a dropped outbound connection is retried with exponential
//! backoff and jitter until it succeeds, the attempt limit is reached or the
//! owner shuts down.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{Result, SyncTransport, TransportError};

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection
    pub enabled: bool,

    /// Maximum number of reconnection attempts (0 = infinite)
    pub max_attempts: u32,

    /// Initial delay between reconnection attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Jitter factor to randomize delays (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Exponential backoff delay for the given attempt (1-based), with jitter
pub fn backoff_delay(config: &ReconnectionConfig, attempt: u32) -> Duration {
    let base_delay = config.initial_delay.as_secs_f64();
    let backoff_delay =
        base_delay * config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

    let clamped_delay = backoff_delay.min(config.max_delay.as_secs_f64());

    let jitter_range = clamped_delay * config.jitter_factor;
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
    let final_delay = (clamped_delay + jitter).max(0.0);

    Duration::from_secs_f64(final_delay)
}

/// Attempt counter for one outage
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    config: ReconnectionConfig,
    attempt_count: u32,
}

impl ReconnectionPolicy {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    pub fn config(&self) -> &ReconnectionConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.attempt_count
    }

    /// Count another attempt and return the delay before it, or `None` when
    /// reconnection is disabled or the attempts are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;
        Some(backoff_delay(&self.config, self.attempt_count))
    }

    /// Start counting from zero after a successful connection
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Retry `address` until connected. Gives up when the policy is
    /// exhausted, the transport was shut down or `shutdown` fires.
    pub async fn reconnect(
        &mut self,
        transport: &SyncTransport,
        address: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let Some(delay) = self.next_delay() else {
                error!(
                    "Giving up on {} after {} reconnection attempts",
                    address, self.attempt_count
                );
                return Err(TransportError::Connection {
                    message: "maximum reconnection attempts exceeded".to_string(),
                });
            };

            debug!(
                "Waiting {:?} before reconnection attempt {}",
                delay, self.attempt_count
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => return Err(TransportError::Closed),
            }
            if *shutdown.borrow() {
                return Err(TransportError::Closed);
            }

            info!(
                "Reconnecting to {} (attempt {})",
                address, self.attempt_count
            );
            match transport.connect(address).await {
                Ok(()) => {
                    self.reset();
                    return Ok(());
                }
                Err(TransportError::Closed) => return Err(TransportError::Closed),
                Err(e) => warn!("Reconnection attempt {} failed: {}", self.attempt_count, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> ReconnectionConfig {
        ReconnectionConfig {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_reconnection_config_default() {
        let config = ReconnectionConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(!config.enabled);
    }

    #[test]
    fn test_backoff_calculation() {
        let config = enabled();
        // 1 * 2^2 with up to 10% jitter
        let delay = backoff_delay(&config, 3);
        assert!(delay >= Duration::from_millis(3600) && delay <= Duration::from_millis(4400));

        let capped = backoff_delay(&config, 30);
        assert!(capped <= Duration::from_secs(66));
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let config = ReconnectionConfig {
            jitter_factor: 0.0,
            ..enabled()
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 8), Duration::from_secs(60));
    }

    #[test]
    fn test_policy_disabled() {
        let mut policy = ReconnectionPolicy::new(ReconnectionConfig::default());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_policy_exhausts_and_resets() {
        let mut policy = ReconnectionPolicy::new(ReconnectionConfig {
            max_attempts: 2,
            ..enabled()
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempts(), 2);

        policy.reset();
        assert!(policy.next_delay().is_some());
    }

    #[test]
    fn test_unlimited_attempts() {
        let mut policy = ReconnectionPolicy::new(ReconnectionConfig {
            max_attempts: 0,
            ..enabled()
        });
        for _ in 0..50 {
            assert!(policy.next_delay().is_some());
        }
    }
}
