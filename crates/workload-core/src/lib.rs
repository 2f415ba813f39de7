//! Closed-loop workload emission and completion tracking for benchmarking a
//! partitioned marketplace.
//!
//! The [`manager::WorkloadManager`] picks transaction types from a
//! [`distribution::TransactionDistribution`], targets from
//! [`keygen::KeyGenerator`]s and the customer [`idle_pool::IdlePool`], runs
//! each one through the [`worker::WorkerFacade`], and paces itself on the
//! completion channel fed by the [`tracker::TransactionTracker`].

pub mod completion;
pub mod config;
pub mod distribution;
pub mod error;
pub mod idle_pool;
pub mod interval;
pub mod keygen;
pub mod locks;
pub mod manager;
pub mod tracker;
pub mod types;
pub mod worker;
