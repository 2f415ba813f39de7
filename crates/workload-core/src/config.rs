use crate::completion::PacingMode;
use crate::distribution::TransactionDistribution;
use crate::error::ConfigError;
use crate::interval::Interval;
use crate::keygen::{KeyDistribution, KeyParams};
use crate::types::TransactionType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options consumed by the workload manager. Validated once, before any run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_concurrency_level")]
    pub concurrency_level: usize,
    #[serde(default = "default_execution_time_ms")]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub delay_between_requests_ms: u64,
    #[serde(default = "default_transaction_distribution")]
    pub transaction_distribution: TransactionDistribution,
    #[serde(default = "default_customer_range")]
    pub customer_range: Interval,
    #[serde(default = "default_seller_range")]
    pub seller_range: Interval,
    #[serde(default = "default_key_distribution")]
    pub customer_distribution: KeyDistribution,
    #[serde(default = "default_key_distribution")]
    pub seller_distribution: KeyDistribution,
    #[serde(default = "default_zipf_theta")]
    pub zipf_theta: f64,
    #[serde(default = "default_hotspot_fraction")]
    pub hotspot_fraction: f64,
    #[serde(default = "default_hotspot_probability")]
    pub hotspot_probability: f64,
    #[serde(default)]
    pub pacing: PacingMode,
    /// Base seed for every generator. Unset means OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            concurrency_level: default_concurrency_level(),
            execution_time_ms: default_execution_time_ms(),
            delay_between_requests_ms: 0,
            transaction_distribution: default_transaction_distribution(),
            customer_range: default_customer_range(),
            seller_range: default_seller_range(),
            customer_distribution: default_key_distribution(),
            seller_distribution: default_key_distribution(),
            zipf_theta: default_zipf_theta(),
            hotspot_fraction: default_hotspot_fraction(),
            hotspot_probability: default_hotspot_probability(),
            pacing: PacingMode::default(),
            seed: None,
        }
    }
}

impl WorkloadConfig {
    /// Reject anything that would make a run meaningless or hang.
    ///
    /// Interval and distribution shape are already checked when they are
    /// constructed or deserialized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_level == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.execution_time_ms == 0 {
            return Err(ConfigError::ZeroExecutionTime);
        }
        let emits_sessions = self
            .transaction_distribution
            .expected_shares()
            .iter()
            .any(|&(t, share)| t == TransactionType::CustomerSession && share > 0.0);
        if emits_sessions && self.customer_range.len() < self.concurrency_level as u64 {
            return Err(ConfigError::NotEnoughCustomers {
                customers: self.customer_range.len(),
                concurrency: self.concurrency_level,
            });
        }
        self.key_params().validate()
    }

    pub fn key_params(&self) -> KeyParams {
        KeyParams {
            zipf_theta: self.zipf_theta,
            hotspot_fraction: self.hotspot_fraction,
            hotspot_probability: self.hotspot_probability,
        }
    }

    pub fn execution_time(&self) -> Duration {
        Duration::from_millis(self.execution_time_ms)
    }

    pub fn delay_between_requests(&self) -> Duration {
        Duration::from_millis(self.delay_between_requests_ms)
    }
}

fn default_concurrency_level() -> usize {
    16
}
fn default_execution_time_ms() -> u64 {
    60_000
}
fn default_transaction_distribution() -> TransactionDistribution {
    TransactionDistribution::from_pairs(&[
        (TransactionType::CustomerSession, 70),
        (TransactionType::QueryDashboard, 75),
        (TransactionType::PriceUpdate, 85),
        (TransactionType::UpdateProduct, 90),
        (TransactionType::UpdateDelivery, 100),
    ])
    .unwrap_or_else(|e| unreachable!("default distribution is valid: {e}"))
}
fn default_customer_range() -> Interval {
    Interval::new(1, 1000).unwrap_or_else(|e| unreachable!("{e}"))
}
fn default_seller_range() -> Interval {
    Interval::new(1, 100).unwrap_or_else(|e| unreachable!("{e}"))
}
fn default_key_distribution() -> KeyDistribution {
    KeyDistribution::Uniform
}
fn default_zipf_theta() -> f64 {
    0.99
}
fn default_hotspot_fraction() -> f64 {
    0.3
}
fn default_hotspot_probability() -> f64 {
    0.8
}
