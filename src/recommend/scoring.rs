//! Signal normalization and weighting

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ModuleStatus;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Relative weight of each signal; must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub urgency: f64,
    pub unlock: f64,
    pub risk: f64,
    pub staleness: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            urgency: 0.3,
            unlock: 0.3,
            risk: 0.25,
            staleness: 0.15,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.urgency + self.unlock + self.risk + self.staleness
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("urgency", self.urgency),
            ("unlock", self.unlock),
            ("risk", self.risk),
            ("staleness", self.staleness),
        ] {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::InvalidValue(format!(
                    "weight '{}' must be within [0, 1], got {}",
                    name, w
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsSum(sum));
        }
        Ok(())
    }
}

/// The four normalized signals for one candidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SignalVector {
    pub urgency: f64,
    pub unlock: f64,
    pub risk: f64,
    pub staleness: f64,
}

/// Signal that contributed most to a score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Unlock,
    Urgency,
    Risk,
    Staleness,
}

impl Driver {
    pub fn reason(self) -> &'static str {
        match self {
            Driver::Unlock => "prerequisite for upcoming module",
            Driver::Urgency => "due soon",
            Driver::Risk => "low recent performance",
            Driver::Staleness => "stalled in progress",
        }
    }
}

impl SignalVector {
    pub fn score(&self, weights: &Weights) -> f64 {
        weights.urgency * self.urgency
            + weights.unlock * self.unlock
            + weights.risk * self.risk
            + weights.staleness * self.staleness
    }

    /// Largest weighted contribution; ties resolve in declaration order
    pub fn driver(&self, weights: &Weights) -> Option<Driver> {
        let contributions = [
            (Driver::Unlock, weights.unlock * self.unlock),
            (Driver::Urgency, weights.urgency * self.urgency),
            (Driver::Risk, weights.risk * self.risk),
            (Driver::Staleness, weights.staleness * self.staleness),
        ];
        let mut best: Option<(Driver, f64)> = None;
        for (driver, value) in contributions {
            if value <= 0.0 {
                continue;
            }
            match best {
                Some((_, top)) if value <= top => {}
                _ => best = Some((driver, value)),
            }
        }
        best.map(|(driver, _)| driver)
    }
}

/// `1 / (1 + days remaining)`; 1.0 once due, 0 without a due date
pub fn urgency(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(due) = due else {
        return 0.0;
    };
    let remaining = due - now;
    if remaining <= Duration::zero() {
        return 1.0;
    }
    let days = remaining.num_seconds() as f64 / 86_400.0;
    1.0 / (1.0 + days)
}

/// Raw unlock counts scaled by the largest count among candidates
pub fn unlock(raw: usize, max_raw: usize) -> f64 {
    if max_raw == 0 {
        0.0
    } else {
        raw as f64 / max_raw as f64
    }
}

/// `1 - performance`; 0 when no performance is known
pub fn risk(performance: Option<f64>) -> f64 {
    performance.map(|p| 1.0 - p.clamp(0.0, 1.0)).unwrap_or(0.0)
}

/// Grows from 0 at the threshold to 1 at twice the threshold; only
/// in-progress work can be stale
pub fn staleness(
    status: ModuleStatus,
    last_touched: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> f64 {
    if status != ModuleStatus::InProgress {
        return 0.0;
    }
    let Some(last) = last_touched else {
        return 0.0;
    };
    let idle = now - last;
    if idle <= threshold || threshold <= Duration::zero() {
        return 0.0;
    }
    let over = (idle - threshold).num_seconds() as f64;
    (over / threshold.num_seconds() as f64).min(1.0)
}

/// Coarse priority label shown next to a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBand {
    High,
    Medium,
    Low,
}

impl PriorityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.6 {
            PriorityBand::High
        } else if score >= 0.3 {
            PriorityBand::Medium
        } else {
            PriorityBand::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_valid() {
        assert!(Weights::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let w = Weights {
            urgency: 0.5,
            unlock: 0.5,
            risk: 0.5,
            staleness: 0.0,
        };
        assert_eq!(w.validate(), Err(ConfigError::WeightsSum(1.5)));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let w = Weights {
            urgency: -0.2,
            unlock: 0.6,
            risk: 0.3,
            staleness: 0.3,
        };
        assert!(matches!(w.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_urgency() {
        let now = Utc::now();
        assert_eq!(urgency(None, now), 0.0);
        assert_eq!(urgency(Some(now - Duration::hours(1)), now), 1.0);
        assert!((urgency(Some(now + Duration::days(1)), now) - 0.5).abs() < 1e-9);
        assert!(urgency(Some(now + Duration::days(2)), now) < urgency(Some(now + Duration::days(1)), now));
    }

    #[test]
    fn test_risk_and_unlock() {
        assert_eq!(risk(None), 0.0);
        assert!((risk(Some(0.25)) - 0.75).abs() < 1e-9);
        assert_eq!(unlock(0, 0), 0.0);
        assert_eq!(unlock(2, 4), 0.5);
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let threshold = Duration::days(7);
        assert_eq!(
            staleness(ModuleStatus::Available, Some(now - Duration::days(30)), now, threshold),
            0.0
        );
        assert_eq!(
            staleness(ModuleStatus::InProgress, Some(now - Duration::days(3)), now, threshold),
            0.0
        );
        let half = staleness(ModuleStatus::InProgress, Some(now - Duration::days(10) - Duration::hours(12)), now, threshold);
        assert!((half - 0.5).abs() < 1e-6);
        assert_eq!(
            staleness(ModuleStatus::InProgress, Some(now - Duration::days(60)), now, threshold),
            1.0
        );
    }

    #[test]
    fn test_driver_picks_largest_contribution() {
        let w = Weights::default();
        let v = SignalVector {
            urgency: 0.2,
            unlock: 0.0,
            risk: 0.9,
            staleness: 0.0,
        };
        assert_eq!(v.driver(&w), Some(Driver::Risk));
        assert_eq!(SignalVector::default().driver(&w), None);
    }

    #[test]
    fn test_priority_bands() {
        assert_eq!(PriorityBand::from_score(0.75), PriorityBand::High);
        assert_eq!(PriorityBand::from_score(0.3), PriorityBand::Medium);
        assert_eq!(PriorityBand::from_score(0.0), PriorityBand::Low);
    }
}
