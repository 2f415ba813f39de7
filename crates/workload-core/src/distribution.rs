use crate::error::ConfigError;
use crate::types::TransactionType;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One row of the stacked table: `tx_type` is chosen for draws up to and
/// including `threshold` not claimed by an earlier row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionEntry {
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub threshold: u32,
}

/// Ordered cumulative-percentage table used to pick the next transaction type.
///
/// Row order matters: a draw `x` in `[0, 100]` selects the first row whose
/// threshold is `>= x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DistributionEntry>", into = "Vec<DistributionEntry>")]
pub struct TransactionDistribution {
    entries: Vec<DistributionEntry>,
}

impl TransactionDistribution {
    /// Validate and build. Thresholds must be non-decreasing, at most 100,
    /// and the last one must be exactly 100.
    pub fn new(entries: Vec<DistributionEntry>) -> Result<Self, ConfigError> {
        let last = entries.last().ok_or(ConfigError::EmptyDistribution)?;
        if last.threshold != 100 {
            return Err(ConfigError::DistributionDoesNotEndAt100(last.threshold));
        }

        let mut previous = 0;
        for entry in &entries {
            if entry.tx_type == TransactionType::None {
                return Err(ConfigError::NoneInDistribution(entry.tx_type));
            }
            if entry.threshold > 100 {
                return Err(ConfigError::ThresholdOutOfRange {
                    tx_type: entry.tx_type,
                    threshold: entry.threshold,
                });
            }
            if entry.threshold < previous {
                return Err(ConfigError::NonMonotonicDistribution {
                    tx_type: entry.tx_type,
                    threshold: entry.threshold,
                    previous,
                });
            }
            previous = entry.threshold;
        }

        Ok(Self { entries })
    }

    /// Convenience constructor from `(type, threshold)` pairs.
    pub fn from_pairs(pairs: &[(TransactionType, u32)]) -> Result<Self, ConfigError> {
        Self::new(
            pairs
                .iter()
                .map(|&(tx_type, threshold)| DistributionEntry { tx_type, threshold })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[DistributionEntry] {
        &self.entries
    }

    /// Draw uniformly from `[0, 100]` and return the first row covering the draw.
    ///
    /// Returns `TransactionType::None` if nothing matches; callers skip the tick.
    pub fn pick_next<R: Rng + ?Sized>(&self, rng: &mut R) -> TransactionType {
        let x = rng.gen_range(0..=100u32);
        self.lookup(x)
    }

    /// First row whose threshold covers `x`.
    pub fn lookup(&self, x: u32) -> TransactionType {
        self.entries
            .iter()
            .find(|e| e.threshold >= x)
            .map(|e| e.tx_type)
            .unwrap_or(TransactionType::None)
    }

    /// Probability of each row given the `[0, 100]` draw, in table order.
    pub fn expected_shares(&self) -> Vec<(TransactionType, f64)> {
        let mut covered_to: i64 = -1;
        self.entries
            .iter()
            .map(|e| {
                let upper = e.threshold as i64;
                let width = (upper - covered_to).max(0);
                covered_to = covered_to.max(upper);
                (e.tx_type, width as f64 / 101.0)
            })
            .collect()
    }
}

impl TryFrom<Vec<DistributionEntry>> for TransactionDistribution {
    type Error = ConfigError;

    fn try_from(entries: Vec<DistributionEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<TransactionDistribution> for Vec<DistributionEntry> {
    fn from(d: TransactionDistribution) -> Self {
        d.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use TransactionType::*;

    fn marketplace_mix() -> TransactionDistribution {
        TransactionDistribution::from_pairs(&[
            (CustomerSession, 70),
            (PriceUpdate, 85),
            (UpdateProduct, 90),
            (UpdateDelivery, 100),
        ])
        .unwrap()
    }

    fn sample(dist: &TransactionDistribution, n: usize) -> HashMap<TransactionType, usize> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = HashMap::new();
        for _ in 0..n {
            *counts.entry(dist.pick_next(&mut rng)).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn marketplace_mix_frequencies() {
        let n = 100_000;
        let counts = sample(&marketplace_mix(), n);
        let frac = |t| *counts.get(&t).unwrap_or(&0) as f64 / n as f64;

        assert!((0.69..=0.71).contains(&frac(CustomerSession)));
        assert!((0.14..=0.16).contains(&frac(PriceUpdate)));
        assert_eq!(counts.get(&None), Option::None);
    }

    #[test]
    fn converges_to_expected_shares() {
        let dist = TransactionDistribution::from_pairs(&[
            (CustomerSession, 30),
            (QueryDashboard, 40),
            (PriceUpdate, 60),
            (UpdateProduct, 80),
            (UpdateDelivery, 100),
        ])
        .unwrap();
        let n = 200_000;
        let counts = sample(&dist, n);
        for (ty, share) in dist.expected_shares() {
            let observed = *counts.get(&ty).unwrap_or(&0) as f64 / n as f64;
            assert!(
                (observed - share).abs() < 0.01,
                "{ty}: observed {observed:.4}, expected {share:.4}"
            );
        }
    }

    #[test]
    fn first_match_wins() {
        let dist = marketplace_mix();
        assert_eq!(dist.lookup(0), CustomerSession);
        assert_eq!(dist.lookup(70), CustomerSession);
        assert_eq!(dist.lookup(71), PriceUpdate);
        assert_eq!(dist.lookup(86), UpdateProduct);
        assert_eq!(dist.lookup(100), UpdateDelivery);
    }

    #[test]
    fn repeated_threshold_shadows_later_row() {
        let dist =
            TransactionDistribution::from_pairs(&[(PriceUpdate, 100), (QueryDashboard, 100)])
                .unwrap();
        let counts = sample(&dist, 1000);
        assert_eq!(counts.get(&PriceUpdate), Some(&1000));
    }

    #[test]
    fn lookup_past_table_is_none() {
        let dist = marketplace_mix();
        assert_eq!(dist.lookup(101), None);
    }

    #[test]
    fn validation_errors() {
        assert_eq!(
            TransactionDistribution::new(vec![]),
            Err(ConfigError::EmptyDistribution)
        );
        assert_eq!(
            TransactionDistribution::from_pairs(&[(CustomerSession, 70), (PriceUpdate, 90)]),
            Err(ConfigError::DistributionDoesNotEndAt100(90))
        );
        assert_eq!(
            TransactionDistribution::from_pairs(&[(CustomerSession, 70), (PriceUpdate, 50), (UpdateProduct, 100)]),
            Err(ConfigError::NonMonotonicDistribution {
                tx_type: PriceUpdate,
                threshold: 50,
                previous: 70
            })
        );
        assert_eq!(
            TransactionDistribution::from_pairs(&[(None, 50), (PriceUpdate, 100)]),
            Err(ConfigError::NoneInDistribution(None))
        );
    }

    #[test]
    fn deserializes_in_declared_order() {
        #[derive(Deserialize)]
        struct Wrap {
            transaction_distribution: TransactionDistribution,
        }
        let toml = r#"
            transaction_distribution = [
                { type = "customer_session", threshold = 70 },
                { type = "price_update", threshold = 85 },
                { type = "update_product", threshold = 90 },
                { type = "update_delivery", threshold = 100 },
            ]
        "#;
        let w: Wrap = toml::from_str(toml).unwrap();
        assert_eq!(w.transaction_distribution, marketplace_mix());

        let bad = r#"transaction_distribution = [{ type = "price_update", threshold = 99 }]"#;
        assert!(toml::from_str::<Wrap>(bad).is_err());
    }
}
