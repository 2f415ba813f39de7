use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Immutable inclusive `[min, max]` range of entity ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    min: u64,
    max: u64,
}

#[derive(Deserialize)]
struct RawInterval {
    min: u64,
    max: u64,
}

impl TryFrom<RawInterval> for Interval {
    type Error = ConfigError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Interval::new(raw.min, raw.max)
    }
}

impl Interval {
    pub fn new(min: u64, max: u64) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidInterval { min, max });
        }
        // `len` must fit in a u64.
        if max - min == u64::MAX {
            return Err(ConfigError::IntervalTooWide { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of ids in the range (`max - min + 1`).
    pub fn len(&self) -> u64 {
        self.max - self.min + 1
    }

    /// Always false: an interval holds at least one id.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.min && id <= self.max
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<u64> {
        self.min..=self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_bounds() {
        assert_eq!(
            Interval::new(10, 1),
            Err(ConfigError::InvalidInterval { min: 10, max: 1 })
        );
    }

    #[test]
    fn rejects_full_width_range() {
        assert_eq!(
            Interval::new(0, u64::MAX),
            Err(ConfigError::IntervalTooWide {
                min: 0,
                max: u64::MAX
            })
        );
        let widest = Interval::new(1, u64::MAX).unwrap();
        assert_eq!(widest.len(), u64::MAX);
        assert_eq!(Interval::new(0, u64::MAX - 1).unwrap().len(), u64::MAX);
    }

    #[test]
    fn single_point_interval() {
        let i = Interval::new(7, 7).unwrap();
        assert_eq!(i.len(), 1);
        assert!(i.contains(7));
        assert!(!i.contains(8));
    }

    #[test]
    fn deserialize_validates() {
        #[derive(Deserialize)]
        struct Wrap {
            range: Interval,
        }
        let ok: Wrap = toml::from_str("range = { min = 1, max = 10 }").unwrap();
        assert_eq!(ok.range.len(), 10);

        let bad = toml::from_str::<Wrap>("range = { min = 5, max = 2 }");
        assert!(bad.is_err());
    }
}
