use crate::error::ConfigError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the batching queue; producers wait when it is full.
    pub queue_size: usize,
    /// Upper bound on messages taken from the queue per batch.
    pub max_batch: usize,
    /// How long the batch consumer waits for a first message.
    pub poll_timeout: Duration,
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Most entries a leader sends in one append while catching up a
    /// follower.
    pub max_append_entries: usize,
    /// Passed through untouched to the log pruning component.
    pub log_pruning_strategy: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            max_batch: 16,
            poll_timeout: Duration::from_secs(1),
            election_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(100),
            max_append_entries: 64,
            log_pruning_strategy: "1g size".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.max_batch == 0 {
            return Err(ConfigError::ZeroMaxBatch);
        }
        if self.heartbeat_interval >= self.election_timeout {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat_ms: self.heartbeat_interval.as_millis(),
                election_ms: self.election_timeout.as_millis(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> anyhow::Result<()> {
        let config = Config::default();
        config.validate()?;
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.log_pruning_strategy, "1g size");
        Ok(())
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        let config = Config {
            queue_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroQueueSize)));

        let config = Config {
            max_batch: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxBatch)));
    }

    #[test]
    fn test_heartbeat_must_beat_election_timeout() {
        let config = Config {
            heartbeat_interval: Duration::from_millis(600),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HeartbeatTooSlow {
                heartbeat_ms: 600,
                election_ms: 500
            })
        ));
    }
}
