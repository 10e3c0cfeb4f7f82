//! Confidence resolution: decide between automated success and escalation.
//!
//! ```text
//! effective = max(handler, learning)   if a high-confidence learning applies
//!           = handler                  otherwise
//!
//! effective >= success_threshold  =>  ai_completed
//! otherwise                       =>  human_needed
//! ```

use crate::learning::Learning;

/// Outcome of confidence resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    /// Confidence recorded on the attempt.
    pub confidence: f64,
    /// Whether the task completes automatically.
    pub succeeded: bool,
    /// Whether the learning raised the handler's confidence.
    pub boosted_by_learning: bool,
}

/// The top learning, if it clears `threshold`.
///
/// `learnings` must already be ordered best-first.
#[must_use]
pub fn high_confidence_learning(learnings: &[Learning], threshold: f64) -> Option<&Learning> {
    learnings.first().filter(|l| l.confidence >= threshold)
}

/// Combine handler and learning confidence against `success_threshold`.
#[must_use]
pub fn resolve(handler_confidence: f64, learning_confidence: Option<f64>, success_threshold: f64) -> Resolution {
    let (confidence, boosted_by_learning) = match learning_confidence {
        Some(learned) if learned > handler_confidence => (learned, true),
        _ => (handler_confidence, false),
    };
    Resolution {
        confidence,
        succeeded: confidence >= success_threshold,
        boosted_by_learning,
    }
}
