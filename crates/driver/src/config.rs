use serde::Deserialize;
use std::path::Path;
use workload_core::config::WorkloadConfig;
use workload_core::interval::Interval;
use workload_core::keygen::KeyDistribution;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// One entry per run. Empty means a single run with the workload settings.
    #[serde(default)]
    pub runs: Vec<RunConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_target_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_products_per_seller")]
    pub products_per_seller: u64,
    #[serde(default = "default_items_per_cart")]
    pub items_per_cart: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ingress_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// How long to wait for in-flight completions after a run before draining.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Append one JSON report per run to this file.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_liveness_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

/// Parameters of the in-process transport used with `--simulate`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Share of customer sessions and deliveries that complete out of band.
    #[serde(default = "default_async_fraction")]
    pub async_fraction: f64,
    #[serde(default)]
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub seller_distribution: Option<KeyDistribution>,
    #[serde(default)]
    pub seller_range: Option<Interval>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DriverConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    InvalidProbability { field: &'static str, value: f64 },

    #[error("simulated latency range is inverted: min {min}ms > max {max}ms")]
    InvertedLatency { min: u64, max: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config::default()
    }

    /// Workload rules plus the driver's own.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.workload.validate()?;
        self.simulation.validate()?;
        if self.target.products_per_seller == 0 {
            return Err(DriverConfigError::Zero("target.products_per_seller").into());
        }
        if self.liveness.failure_threshold == 0 {
            return Err(DriverConfigError::Zero("liveness.failure_threshold").into());
        }
        if self.liveness.interval_ms == 0 {
            return Err(DriverConfigError::Zero("liveness.interval_ms").into());
        }
        Ok(())
    }

    /// Runs to execute, in order.
    pub fn effective_runs(&self) -> Vec<RunConfig> {
        if self.runs.is_empty() {
            vec![RunConfig::default()]
        } else {
            self.runs.clone()
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), DriverConfigError> {
        if self.min_latency_ms > self.max_latency_ms {
            return Err(DriverConfigError::InvertedLatency {
                min: self.min_latency_ms,
                max: self.max_latency_ms,
            });
        }
        for (field, value) in [
            ("simulation.async_fraction", self.async_fraction),
            ("simulation.failure_rate", self.failure_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DriverConfigError::InvalidProbability { field, value });
            }
        }
        Ok(())
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: default_target_url(),
            timeout_ms: default_timeout_ms(),
            products_per_seller: default_products_per_seller(),
            items_per_cart: default_items_per_cart(),
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_ingress_addr(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            output_path: None,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_path: default_health_path(),
            interval_ms: default_liveness_interval_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: default_min_latency_ms(),
            max_latency_ms: default_max_latency_ms(),
            async_fraction: default_async_fraction(),
            failure_rate: 0.0,
        }
    }
}

fn default_target_url() -> String {
    "http://127.0.0.1:8081".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_products_per_seller() -> u64 {
    10
}
fn default_items_per_cart() -> usize {
    3
}
fn default_true() -> bool {
    true
}
fn default_ingress_addr() -> String {
    "0.0.0.0:9091".to_string()
}
fn default_grace_period_ms() -> u64 {
    2000
}
fn default_health_path() -> String {
    "/health".to_string()
}
fn default_liveness_interval_ms() -> u64 {
    1000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_min_latency_ms() -> u64 {
    5
}
fn default_max_latency_ms() -> u64 {
    20
}
fn default_async_fraction() -> f64 {
    0.5
}
