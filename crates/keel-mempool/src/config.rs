use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MempoolError, MempoolResult};

/// Configuration of the mempool pipeline. Fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Transactions per block, including the closing reward transaction.
    pub block_size: usize,
    /// Capacity of the admission queue; `add` fails with `Overflow` beyond it.
    pub admission_capacity: usize,
    /// Capacity of the queue between the check and deliver stages.
    pub checked_capacity: usize,
    /// How long the deliver stage waits for a request before closing the
    /// open block.
    pub idle_timeout_ms: u64,
    /// Identifier reported as behaving in reward transactions.
    pub node_id: String,
    /// How many recent rejection reasons are kept for lookup by reference.
    pub rejection_cache_capacity: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            block_size: 5,
            admission_capacity: 200_000,
            checked_capacity: 200_000,
            idle_timeout_ms: 500,
            node_id: "local".to_string(),
            rejection_cache_capacity: 1000,
        }
    }
}

impl MempoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> MempoolResult<()> {
        if self.block_size < 2 {
            return Err(MempoolError::InvalidConfig(format!(
                "block_size must be at least 2 (one transaction plus the reward), got {}",
                self.block_size
            )));
        }
        if self.admission_capacity == 0
            || self.checked_capacity == 0
            || self.rejection_cache_capacity == 0
        {
            return Err(MempoolError::InvalidConfig(
                "queue and cache capacities must be positive".into(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(MempoolError::InvalidConfig(
                "idle_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MempoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, 5);
        assert_eq!(config.idle_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn block_size_below_two_is_rejected() {
        let config = MempoolConfig {
            block_size: 1,
            ..MempoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MempoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = MempoolConfig {
            admission_capacity: 0,
            ..MempoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rejection_cache_is_rejected() {
        let config = MempoolConfig {
            rejection_cache_capacity: 0,
            ..MempoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let config = MempoolConfig {
            idle_timeout_ms: 0,
            ..MempoolConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
