use std::collections::HashSet;

use crate::protocol::UserId;

/// Result of registering a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Threshold reached; the caller must skip and clear the tally.
    Passed,
    /// Not there yet.
    Progress { count: usize, needed: usize },
}

/// Skip and error votes for the currently playing item. Keyed by identity
/// so reconnects and multi-tab don't double count. The source-matching
/// guard lives with the dispatcher, which also clears the tally on every
/// timeline transition.
#[derive(Debug, Default)]
pub struct VoteTally {
    skips: HashSet<UserId>,
    errors: HashSet<UserId>,
}

fn needed(active: usize, threshold: f64) -> usize {
    (active as f64 * threshold).ceil() as usize
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.skips.clear();
        self.errors.clear();
    }

    pub fn vote_skip(&mut self, user_id: UserId, active: usize, threshold: f64) -> VoteOutcome {
        self.skips.insert(user_id);
        Self::outcome(self.skips.len(), active, threshold)
    }

    pub fn vote_error(&mut self, user_id: UserId, active: usize, threshold: f64) -> VoteOutcome {
        self.errors.insert(user_id);
        Self::outcome(self.errors.len(), active, threshold)
    }

    fn outcome(count: usize, active: usize, threshold: f64) -> VoteOutcome {
        let needed = needed(active, threshold);
        if count >= needed {
            VoteOutcome::Passed
        } else {
            VoteOutcome::Progress { count, needed }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_rounds_up() {
        assert_eq!(needed(2, 0.6), 2);
        assert_eq!(needed(3, 0.6), 2);
        assert_eq!(needed(5, 0.6), 3);
        assert_eq!(needed(2, 0.5), 1);
    }

    #[test]
    fn single_vote_passes_a_half_threshold_pair() {
        let mut tally = VoteTally::new();
        assert_eq!(tally.vote_skip(1, 2, 0.5), VoteOutcome::Passed);
    }

    #[test]
    fn repeat_votes_from_one_identity_count_once() {
        let mut tally = VoteTally::new();
        assert_eq!(
            tally.vote_skip(1, 3, 0.6),
            VoteOutcome::Progress { count: 1, needed: 2 }
        );
        assert_eq!(
            tally.vote_skip(1, 3, 0.6),
            VoteOutcome::Progress { count: 1, needed: 2 }
        );
        assert_eq!(tally.vote_skip(2, 3, 0.6), VoteOutcome::Passed);
    }

    #[test]
    fn skip_and_error_votes_are_independent() {
        let mut tally = VoteTally::new();
        let _ = tally.vote_skip(1, 4, 0.5);
        assert_eq!(
            tally.vote_error(2, 4, 0.5),
            VoteOutcome::Progress { count: 1, needed: 2 }
        );
        assert_eq!(tally.vote_error(3, 4, 0.5), VoteOutcome::Passed);
    }

    #[test]
    fn clear_resets_both_kinds() {
        let mut tally = VoteTally::new();
        let _ = tally.vote_skip(1, 4, 0.5);
        let _ = tally.vote_error(1, 4, 0.5);
        tally.clear();
        assert_eq!(
            tally.vote_skip(2, 4, 0.5),
            VoteOutcome::Progress { count: 1, needed: 2 }
        );
    }
}
