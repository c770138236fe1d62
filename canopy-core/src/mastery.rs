//! Per-node mastery tracking
//!
//! Mastery is quiz-driven proficiency state on each graph node: a score, a
//! streak of consecutive correct answers, and a boolean mastered flag. The
//! merge step is what makes regeneration idempotent with respect to user
//! progress — rebuilt nodes pick up their prior state by label.

use serde::{Deserialize, Serialize};

use crate::config::MasteryConfig;
use crate::graph::Node;

/// Upper bound on the mastery score. The score is deliberately unclamped
/// below: repeated wrong answers keep subtracting.
pub const MASTERY_SCORE_CEILING: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasteryState {
    pub mastered: bool,
    pub mastery_score: f64,
    pub consecutive_correct: i32,
}

impl Default for MasteryState {
    fn default() -> Self {
        Self {
            mastered: false,
            mastery_score: 0.0,
            consecutive_correct: 0,
        }
    }
}

/// Copy prior mastery fields onto a freshly built node, verbatim. With no
/// prior record the node keeps its defaults.
pub fn merge(node: &mut Node, prior: Option<&MasteryState>) {
    if let Some(prior) = prior {
        node.mastered = prior.mastered;
        node.mastery_score = prior.mastery_score;
        node.consecutive_correct = prior.consecutive_correct;
    }
}

/// Update mastery state after a quiz answer has been judged.
pub fn apply_answer(state: &mut MasteryState, correct: bool, config: &MasteryConfig) {
    if correct {
        state.consecutive_correct += 1;
        state.mastery_score = (state.mastery_score + 1.0).min(MASTERY_SCORE_CEILING);
    } else {
        state.consecutive_correct = 0;
        state.mastery_score -= 0.5;
    }
    state.mastered = state.consecutive_correct >= config.mastery_threshold;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(n: i32) -> MasteryConfig {
        MasteryConfig {
            mastery_threshold: n,
            seed_from_extraction: false,
        }
    }

    #[test]
    fn test_merge_copies_prior_state_verbatim() {
        let mut node = Node::new("Ownership", "");
        let prior = MasteryState {
            mastered: true,
            mastery_score: 7.5,
            consecutive_correct: 3,
        };
        merge(&mut node, Some(&prior));
        assert!(node.mastered);
        assert_eq!(node.mastery_score, 7.5);
        assert_eq!(node.consecutive_correct, 3);
    }

    #[test]
    fn test_merge_without_prior_keeps_defaults() {
        let mut node = Node::new("Borrowing", "");
        merge(&mut node, None);
        assert!(!node.mastered);
        assert_eq!(node.mastery_score, 0.0);
        assert_eq!(node.consecutive_correct, 0);
    }

    #[test]
    fn test_correct_answer_bumps_streak_and_score() {
        let mut state = MasteryState::default();
        apply_answer(&mut state, true, &threshold(1));
        assert_eq!(state.consecutive_correct, 1);
        assert_eq!(state.mastery_score, 1.0);
        assert!(state.mastered);
    }

    #[test]
    fn test_score_is_capped_at_ceiling() {
        let mut state = MasteryState {
            mastery_score: 9.7,
            ..Default::default()
        };
        apply_answer(&mut state, true, &threshold(1));
        assert_eq!(state.mastery_score, MASTERY_SCORE_CEILING);
    }

    #[test]
    fn test_incorrect_answer_resets_streak_and_is_unclamped_below() {
        let mut state = MasteryState {
            mastered: true,
            mastery_score: 0.0,
            consecutive_correct: 2,
        };
        apply_answer(&mut state, false, &threshold(1));
        assert_eq!(state.consecutive_correct, 0);
        assert_eq!(state.mastery_score, -0.5);
        assert!(!state.mastered, "a wrong answer drops the mastered flag");
    }

    #[test]
    fn test_threshold_of_three_needs_three_in_a_row() {
        let config = threshold(3);
        let mut state = MasteryState::default();
        apply_answer(&mut state, true, &config);
        apply_answer(&mut state, true, &config);
        assert!(!state.mastered);
        apply_answer(&mut state, true, &config);
        assert!(state.mastered);
    }

    #[test]
    fn test_streak_broken_midway_restarts_count() {
        let config = threshold(3);
        let mut state = MasteryState::default();
        apply_answer(&mut state, true, &config);
        apply_answer(&mut state, true, &config);
        apply_answer(&mut state, false, &config);
        apply_answer(&mut state, true, &config);
        assert_eq!(state.consecutive_correct, 1);
        assert!(!state.mastered);
    }
}
