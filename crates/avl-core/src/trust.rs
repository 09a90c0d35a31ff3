//! Trust scoring: a weighted composite of a chain's cryptographic health.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tolerance when checking that weights sum to 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Weights for the four trust sub-metrics. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustWeights {
    /// Mean producer-supplied quality/confidence.
    pub quality: f64,
    /// Fraction of records carrying a signature.
    pub signed: f64,
    /// Fraction of signed records that verify.
    pub verified: f64,
    /// Binary chain continuity.
    pub continuity: f64,
}

impl TrustWeights {
    /// Validate that the weights are non-negative and sum to 1.0.
    pub fn validate(&self) -> Result<(), CoreError> {
        let sum = self.quality + self.signed + self.verified + self.continuity;
        let non_negative =
            self.quality >= 0.0 && self.signed >= 0.0 && self.verified >= 0.0 && self.continuity >= 0.0;
        if !non_negative || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::InvalidTrustWeights(sum));
        }
        Ok(())
    }
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            quality: 0.5,
            signed: 0.2,
            verified: 0.2,
            continuity: 0.1,
        }
    }
}

/// The composite trust score of a chain, with its sub-metrics.
///
/// Undefined (absent) for an empty chain; every field is in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    /// Weighted composite.
    pub score: f64,
    /// Mean producer-supplied quality (1.0 when absent).
    pub mean_quality: f64,
    /// Fraction of records carrying a signature.
    pub signed_rate: f64,
    /// Fraction of signed records that verified. Defined as 1.0 when no
    /// record is signed (vacuously true), so unsigned-by-design producers
    /// are not penalized through this sub-metric.
    pub verified_rate: f64,
    /// 1.0 only if no continuity break was found.
    pub continuity: f64,
}

impl TrustScore {
    /// Combine sub-metrics under the given weights.
    pub fn compose(
        weights: &TrustWeights,
        mean_quality: f64,
        signed_rate: f64,
        verified_rate: f64,
        continuity: f64,
    ) -> Self {
        let score = weights.quality * mean_quality
            + weights.signed * signed_rate
            + weights.verified * verified_rate
            + weights.continuity * continuity;
        Self {
            score: score.clamp(0.0, 1.0),
            mean_quality,
            signed_rate,
            verified_rate,
            continuity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_valid() {
        TrustWeights::default().validate().unwrap();
    }

    #[test]
    fn test_bad_sum_rejected() {
        let w = TrustWeights {
            quality: 0.5,
            signed: 0.5,
            verified: 0.5,
            continuity: 0.5,
        };
        assert!(matches!(
            w.validate(),
            Err(CoreError::InvalidTrustWeights(_))
        ));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let w = TrustWeights {
            quality: 1.2,
            signed: -0.2,
            verified: 0.0,
            continuity: 0.0,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_compose_defaults() {
        let score = TrustScore::compose(&TrustWeights::default(), 1.0, 0.0, 1.0, 1.0);
        // 0.5*1 + 0.2*0 + 0.2*1 + 0.1*1
        assert!((score.score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_chain_scores_one() {
        let score = TrustScore::compose(&TrustWeights::default(), 1.0, 1.0, 1.0, 1.0);
        assert!((score.score - 1.0).abs() < 1e-12);
    }
}
