// Snake-draft nomination order.

use serde::{Deserialize, Serialize};

use crate::team::TeamId;

/// Whose turn it is to nominate.
///
/// `nominator_index` is a position in the round's turn order, which is the
/// configured team order in odd rounds and its reverse in even rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftState {
    pub nominator_index: usize,
    /// 1-indexed round number.
    pub round: u32,
}

impl Default for DraftState {
    fn default() -> Self {
        DraftState {
            nominator_index: 0,
            round: 1,
        }
    }
}

impl DraftState {
    /// Turn order for the current round.
    pub fn turn_order<'a>(&self, order: &'a [TeamId]) -> Vec<&'a TeamId> {
        let mut turn: Vec<&TeamId> = order.iter().collect();
        if self.round % 2 == 0 {
            turn.reverse();
        }
        turn
    }

    /// The team whose turn it is, or `None` for an empty order or an index
    /// that does not fit it (a corrupt or foreign draft state).
    pub fn current_nominator<'a>(&self, order: &'a [TeamId]) -> Option<&'a TeamId> {
        if self.nominator_index >= order.len() {
            return None;
        }
        let pos = if self.round % 2 == 0 {
            order.len() - 1 - self.nominator_index
        } else {
            self.nominator_index
        };
        order.get(pos)
    }

    /// Next turn: bump the index, wrapping into the next round.
    pub fn advance(&self, order_len: usize) -> DraftState {
        let next = self.nominator_index + 1;
        if next >= order_len {
            DraftState {
                nominator_index: 0,
                round: self.round + 1,
            }
        } else {
            DraftState {
                nominator_index: next,
                round: self.round,
            }
        }
    }

    /// Advance past every team for which `skip` holds, visiting at most one
    /// full cycle so a draft where everyone is skipped terminates.
    pub fn advance_while<F>(&self, order: &[TeamId], mut skip: F) -> DraftState
    where
        F: FnMut(&TeamId) -> bool,
    {
        let mut state = *self;
        for _ in 0..order.len() {
            match state.current_nominator(order) {
                Some(team) if skip(team) => state = state.advance(order.len()),
                _ => break,
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Vec<TeamId> {
        ["teamA", "teamB", "teamC", "teamD", "teamE"]
            .into_iter()
            .map(TeamId::from)
            .collect()
    }

    fn ids(turn: Vec<&TeamId>) -> Vec<&str> {
        turn.into_iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn odd_rounds_use_configured_order() {
        let order = order();
        let state = DraftState {
            nominator_index: 0,
            round: 3,
        };
        assert_eq!(
            ids(state.turn_order(&order)),
            vec!["teamA", "teamB", "teamC", "teamD", "teamE"]
        );
    }

    #[test]
    fn even_rounds_reverse_order() {
        let order = order();
        let state = DraftState {
            nominator_index: 0,
            round: 2,
        };
        assert_eq!(
            ids(state.turn_order(&order)),
            vec!["teamE", "teamD", "teamC", "teamB", "teamA"]
        );
        assert_eq!(state.current_nominator(&order).unwrap().as_str(), "teamE");
    }

    #[test]
    fn advance_walks_a_full_snake() {
        let order = order();
        let mut state = DraftState::default();
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(state.current_nominator(&order).unwrap().as_str().to_string());
            state = state.advance(order.len());
        }
        assert_eq!(
            seen,
            vec![
                "teamA", "teamB", "teamC", "teamD", "teamE", "teamE", "teamD", "teamC", "teamB",
                "teamA"
            ]
        );
        assert_eq!(state, DraftState { nominator_index: 0, round: 3 });
    }

    #[test]
    fn advance_is_deterministic() {
        let state = DraftState {
            nominator_index: 4,
            round: 1,
        };
        assert_eq!(state.advance(5), state.advance(5));
        assert_eq!(state.advance(5), DraftState { nominator_index: 0, round: 2 });
    }

    #[test]
    fn out_of_range_index_has_no_nominator() {
        let order = order();
        let state = DraftState {
            nominator_index: 7,
            round: 1,
        };
        assert!(state.current_nominator(&order).is_none());
        assert!(DraftState::default().current_nominator(&[]).is_none());
    }

    #[test]
    fn advance_while_skips_matching_teams() {
        let order = order();
        let state = DraftState::default();
        let next = state.advance_while(&order, |t| t.as_str() == "teamA" || t.as_str() == "teamB");
        assert_eq!(next.current_nominator(&order).unwrap().as_str(), "teamC");
    }

    #[test]
    fn advance_while_terminates_when_everyone_skipped() {
        let order = order();
        let state = DraftState::default();
        let next = state.advance_while(&order, |_| true);
        assert_eq!(next, DraftState { nominator_index: 0, round: 2 });
    }
}
