use crate::error::ConfigError;
use crate::interval::Interval;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Zipf;
use serde::{Deserialize, Serialize};

/// Statistical shape of the ids a generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDistribution {
    Uniform,
    Zipfian,
    NonUniform,
}

/// Shape parameters shared by the skewed generators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyParams {
    /// Zipf exponent. Observed configurations use 0.8 to 0.99.
    pub zipf_theta: f64,
    /// Share of the range forming the hot set of the non-uniform generator.
    pub hotspot_fraction: f64,
    /// Probability that a non-uniform draw lands in the hot set.
    pub hotspot_probability: f64,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self {
            zipf_theta: 0.99,
            hotspot_fraction: 0.3,
            hotspot_probability: 0.8,
        }
    }
}

impl KeyParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.zipf_theta.is_finite() || self.zipf_theta <= 0.0 {
            return Err(ConfigError::InvalidZipfTheta(self.zipf_theta));
        }
        check_unit("hotspot_fraction", self.hotspot_fraction)?;
        check_unit("hotspot_probability", self.hotspot_probability)?;
        Ok(())
    }
}

fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidHotspot { field, value })
    }
}

/// Produces entity ids within a bound interval.
///
/// Generators own their RNG and share nothing, so each one is used from a
/// single task without synchronization.
pub trait KeyGenerator: Send {
    /// Next id, always within `[interval.min(), interval.max()]`.
    fn next_value(&mut self) -> u64;

    fn interval(&self) -> Interval;

    fn distribution(&self) -> KeyDistribution;
}

/// Build a generator for `distribution` over `interval`.
///
/// `seed` makes the sequence reproducible; `None` seeds from OS entropy.
pub fn build_generator(
    distribution: KeyDistribution,
    interval: Interval,
    params: &KeyParams,
    seed: Option<u64>,
) -> Result<Box<dyn KeyGenerator>, ConfigError> {
    params.validate()?;
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok(match distribution {
        KeyDistribution::Uniform => Box::new(UniformGenerator::new(interval, rng)),
        KeyDistribution::Zipfian => {
            Box::new(ZipfianGenerator::new(interval, params.zipf_theta, rng)?)
        }
        KeyDistribution::NonUniform => Box::new(HotspotGenerator::new(
            interval,
            params.hotspot_fraction,
            params.hotspot_probability,
            rng,
        )),
    })
}

pub struct UniformGenerator {
    interval: Interval,
    rng: StdRng,
}

impl UniformGenerator {
    pub fn new(interval: Interval, rng: StdRng) -> Self {
        Self { interval, rng }
    }
}

impl KeyGenerator for UniformGenerator {
    fn next_value(&mut self) -> u64 {
        self.rng.gen_range(self.interval.min()..=self.interval.max())
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    fn distribution(&self) -> KeyDistribution {
        KeyDistribution::Uniform
    }
}

/// Power-law generator: rank 1 maps to `interval.min()`, so low ids are hot.
pub struct ZipfianGenerator {
    interval: Interval,
    dist: Zipf<f64>,
    theta: f64,
    rng: StdRng,
}

impl ZipfianGenerator {
    pub fn new(interval: Interval, theta: f64, rng: StdRng) -> Result<Self, ConfigError> {
        let dist =
            Zipf::new(interval.len(), theta).map_err(|_| ConfigError::InvalidZipfTheta(theta))?;
        Ok(Self {
            interval,
            dist,
            theta,
            rng,
        })
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }
}

impl KeyGenerator for ZipfianGenerator {
    fn next_value(&mut self) -> u64 {
        // Zipf samples ranks in [1, n] as floats.
        let rank = self.rng.sample(&self.dist) as u64;
        let offset = rank.saturating_sub(1).min(self.interval.len() - 1);
        self.interval.min() + offset
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    fn distribution(&self) -> KeyDistribution {
        KeyDistribution::Zipfian
    }
}

/// Fixed hot set at the low end of the range that absorbs
/// `hot_probability` of all draws.
pub struct HotspotGenerator {
    interval: Interval,
    hot_len: u64,
    hot_probability: f64,
    rng: StdRng,
}

impl HotspotGenerator {
    pub fn new(interval: Interval, hot_fraction: f64, hot_probability: f64, rng: StdRng) -> Self {
        let hot_len = ((interval.len() as f64 * hot_fraction).round() as u64).clamp(1, interval.len());
        Self {
            interval,
            hot_len,
            hot_probability,
            rng,
        }
    }

    pub fn hot_len(&self) -> u64 {
        self.hot_len
    }
}

impl KeyGenerator for HotspotGenerator {
    fn next_value(&mut self) -> u64 {
        let cold_len = self.interval.len() - self.hot_len;
        let hot = cold_len == 0 || self.rng.gen_bool(self.hot_probability);
        if hot {
            self.interval.min() + self.rng.gen_range(0..self.hot_len)
        } else {
            self.interval.min() + self.hot_len + self.rng.gen_range(0..cold_len)
        }
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    fn distribution(&self) -> KeyDistribution {
        KeyDistribution::NonUniform
    }
}
