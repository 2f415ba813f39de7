use crate::types::TransactionType;

/// Rejected configuration. Always raised before a run starts.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid interval: min {min} is greater than max {max}")]
    InvalidInterval { min: u64, max: u64 },

    #[error("interval {min}..={max} holds more ids than fit in a u64")]
    IntervalTooWide { min: u64, max: u64 },

    #[error("transaction distribution is empty")]
    EmptyDistribution,

    #[error("transaction distribution must not contain {0}")]
    NoneInDistribution(TransactionType),

    #[error("transaction distribution threshold {threshold} for {tx_type} is above 100")]
    ThresholdOutOfRange {
        tx_type: TransactionType,
        threshold: u32,
    },

    #[error(
        "transaction distribution is not non-decreasing: {tx_type} has threshold {threshold} after {previous}"
    )]
    NonMonotonicDistribution {
        tx_type: TransactionType,
        threshold: u32,
        previous: u32,
    },

    #[error("transaction distribution must end at 100, last threshold is {0}")]
    DistributionDoesNotEndAt100(u32),

    #[error("concurrency level must be greater than zero")]
    ZeroConcurrency,

    #[error("execution time must be greater than zero")]
    ZeroExecutionTime,

    #[error(
        "customer range holds {customers} ids, fewer than concurrency level {concurrency}; checkouts would block forever"
    )]
    NotEnoughCustomers { customers: u64, concurrency: usize },

    #[error("zipf theta must be positive and finite, got {0}")]
    InvalidZipfTheta(f64),

    #[error("hotspot {field} must be within (0, 1], got {value}")]
    InvalidHotspot { field: &'static str, value: f64 },
}

/// Idle-entity pool misuse or shutdown.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("idle pool is closed")]
    Closed,

    #[error("id {0} is not currently checked out")]
    NotCheckedOut(u64),

    #[error("id {id} is outside the pool range {min}..={max}")]
    OutOfRange { id: u64, min: u64, max: u64 },
}

/// Failure of a single transaction at the transport boundary.
/// Never propagated past the worker façade.
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status} from {endpoint}")]
    UnexpectedStatus { status: u16, endpoint: String },

    #[error("rejected by target: {0}")]
    Rejected(String),
}

#[derive(thiserror::Error, Debug)]
pub enum WorkloadError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot {action} while manager is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
}
