// Teams and the roster ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Team identifier (e.g. "teamA").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        TeamId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TeamId {
    fn from(s: &str) -> Self {
        TeamId(s.to_string())
    }
}

/// Static definition of a team, in draft order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSeed {
    pub id: TeamId,
    pub name: String,
}

/// One acquired player and the price paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_name: String,
    pub price: Money,
}

/// Roster slots and money a team may still be charged for outside the
/// purchase under consideration: its own queued nominations (awarded at base
/// price if nobody bids) and any auction it currently stands to win.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reserved {
    pub slots: usize,
    pub money: Money,
}

impl Reserved {
    pub fn add(&mut self, price: Money) {
        self.slots += 1;
        self.money += price;
    }
}

/// Ledger entry for one team: remaining budget, roster and spend.
///
/// `budget + total_spent` always equals the initial budget; only
/// [`Team::credit_sale`] moves money between the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub budget: Money,
    pub roster: Vec<RosterEntry>,
    pub total_spent: Money,
}

impl Team {
    /// A team at the start of the draft: full budget, empty roster.
    pub fn fresh(seed: &TeamSeed, initial_budget: Money) -> Self {
        Team {
            id: seed.id.clone(),
            name: seed.name.clone(),
            budget: initial_budget,
            roster: Vec::new(),
            total_spent: Money::ZERO,
        }
    }

    /// Number of players still needed to fill the roster.
    pub fn players_needed(&self, max_roster_size: usize) -> usize {
        max_roster_size.saturating_sub(self.roster.len())
    }

    pub fn is_full(&self, max_roster_size: usize) -> bool {
        self.players_needed(max_roster_size) == 0
    }

    /// Highest total bid this team may hold while keeping one unit in reserve
    /// for every roster slot it must still fill after this purchase.
    pub fn max_allowed_bid(&self, max_roster_size: usize) -> Money {
        self.headroom(max_roster_size, Reserved::default())
    }

    /// Roster slots not yet filled or promised elsewhere.
    pub fn open_slots(&self, max_roster_size: usize, reserved: Reserved) -> usize {
        self.players_needed(max_roster_size)
            .saturating_sub(reserved.slots)
    }

    /// Like [`Team::max_allowed_bid`], after setting aside what `reserved`
    /// already promises.
    pub fn headroom(&self, max_roster_size: usize, reserved: Reserved) -> Money {
        let reserve_slots = self
            .open_slots(max_roster_size, reserved)
            .saturating_sub(1);
        self.budget - reserved.money - Money::from_units(1).times(reserve_slots)
    }

    /// Append a purchased player and move the price from budget to spend.
    pub fn credit_sale(&mut self, player_name: &str, price: Money) {
        self.roster.push(RosterEntry {
            player_name: player_name.to_string(),
            price,
        });
        self.budget -= price;
        self.total_spent += price;
    }

    /// Whether the redundant spend total matches the roster and the budget.
    pub fn is_balanced(&self, initial_budget: Money) -> bool {
        let roster_sum: Money = self.roster.iter().map(|e| e.price).sum();
        roster_sum == self.total_spent && self.budget + self.total_spent == initial_budget
    }

    pub fn owns_player(&self, player_name: &str) -> bool {
        self.roster
            .iter()
            .any(|e| e.player_name.eq_ignore_ascii_case(player_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_a() -> Team {
        Team::fresh(
            &TeamSeed {
                id: TeamId::from("teamA"),
                name: "Team A".into(),
            },
            Money::from_units(100),
        )
    }

    #[test]
    fn fresh_team_is_balanced() {
        let team = team_a();
        assert_eq!(team.budget, Money::from_units(100));
        assert!(team.roster.is_empty());
        assert!(team.is_balanced(Money::from_units(100)));
    }

    #[test]
    fn credit_sale_moves_budget_to_spend() {
        let mut team = team_a();
        team.credit_sale("Player X", Money::from_units(8));
        team.credit_sale("Player Y", Money::from_tenths(5));

        assert_eq!(team.budget, Money::from_tenths(915));
        assert_eq!(team.total_spent, Money::from_tenths(85));
        assert_eq!(team.roster.len(), 2);
        assert!(team.is_balanced(Money::from_units(100)));
    }

    #[test]
    fn max_allowed_bid_reserves_one_unit_per_remaining_slot() {
        let team = team_a();
        // 16 needed -> keep 15 in reserve.
        assert_eq!(team.max_allowed_bid(16), Money::from_units(85));
    }

    #[test]
    fn max_allowed_bid_last_slot_is_whole_budget() {
        let mut team = team_a();
        for i in 0..15 {
            team.credit_sale(&format!("P{i}"), Money::from_units(1));
        }
        assert_eq!(team.players_needed(16), 1);
        assert_eq!(team.max_allowed_bid(16), Money::from_units(85));
    }

    #[test]
    fn reserved_commitments_shrink_headroom() {
        let team = team_a();
        let mut reserved = Reserved::default();
        reserved.add(Money::from_units(10));
        reserved.add(Money::from_units(5));
        // 100 - 15 promised - 13 kept back for the other open slots.
        assert_eq!(team.open_slots(16, reserved), 14);
        assert_eq!(team.headroom(16, reserved), Money::from_units(72));
    }

    #[test]
    fn full_roster_detected() {
        let mut team = team_a();
        team.credit_sale("Only", Money::from_units(1));
        assert!(team.is_full(1));
        assert!(!team.is_full(2));
    }

    #[test]
    fn owns_player_ignores_case() {
        let mut team = team_a();
        team.credit_sale("Erling Haaland", Money::from_units(40));
        assert!(team.owns_player("erling haaland"));
        assert!(!team.owns_player("Kevin De Bruyne"));
    }
}
