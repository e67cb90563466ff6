//! One-cancels-the-other pair tracking.
//!
//! The two legs of an OCO order are a linked pair: the moment either
//! leaves the book, its sibling must be cancelled so both cannot fill.

use std::collections::HashSet;

/// What the book says about a linked pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Both legs still resting.
    Resting,
    /// One leg left the book; the sibling must be cancelled now.
    LegFilled { filled_oid: u64, sibling_oid: u64 },
    /// Both legs are gone from the book.
    Closed,
}

/// Classify a linked pair against the currently resting order ids.
#[must_use]
pub fn pair_state(leg_a: u64, leg_b: u64, resting: &HashSet<u64>) -> PairState {
    match (resting.contains(&leg_a), resting.contains(&leg_b)) {
        (true, true) => PairState::Resting,
        (false, true) => PairState::LegFilled {
            filled_oid: leg_a,
            sibling_oid: leg_b,
        },
        (true, false) => PairState::LegFilled {
            filled_oid: leg_b,
            sibling_oid: leg_a,
        },
        (false, false) => PairState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_resting() {
        let resting: HashSet<u64> = [1, 2].into_iter().collect();
        assert_eq!(pair_state(1, 2, &resting), PairState::Resting);
    }

    #[test]
    fn test_fill_identifies_sibling() {
        let resting: HashSet<u64> = [2].into_iter().collect();
        assert_eq!(
            pair_state(1, 2, &resting),
            PairState::LegFilled {
                filled_oid: 1,
                sibling_oid: 2
            }
        );

        let resting: HashSet<u64> = [1].into_iter().collect();
        assert_eq!(
            pair_state(1, 2, &resting),
            PairState::LegFilled {
                filled_oid: 2,
                sibling_oid: 1
            }
        );
    }

    #[test]
    fn test_both_gone_is_closed() {
        let resting = HashSet::new();
        assert_eq!(pair_state(1, 2, &resting), PairState::Closed);
    }
}
