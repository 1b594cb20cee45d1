//! Confidence scoring for RCA answers.
//!
//! Confidence is the mean similarity of the semantic hits that were verified
//! against the graph. Hits that could not be verified because the graph was
//! unreachable are still reported, with the mean scaled by
//! `unverified_penalty`. Keyword fallback answers carry no similarity
//! evidence and score 0.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub unverified_penalty: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            unverified_penalty: 0.5,
        }
    }
}

impl ScoringPolicy {
    pub fn new(unverified_penalty: f64) -> Self {
        Self {
            unverified_penalty: unverified_penalty.clamp(0.0, 1.0),
        }
    }

    pub fn confidence(&self, scores: &[f64], verified: bool) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let scaled = if verified {
            mean
        } else {
            mean * self.unverified_penalty
        };
        scaled.clamp(0.0, 1.0)
    }

    pub fn fallback_confidence(&self) -> f64 {
        0.0
    }
}
