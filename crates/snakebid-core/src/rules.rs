// League and auction parameters consumed by the domain rules.

use std::time::Duration;

use crate::money::Money;
use crate::team::{TeamId, TeamSeed};

/// The fixed parameters of one draft.
///
/// Built from config via `Config::rules()`; `Default` is the classic
/// five-team, 100-unit, 16-player league.
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionRules {
    /// Teams in first-round nomination order.
    pub teams: Vec<TeamSeed>,
    pub initial_budget: Money,
    pub max_roster_size: usize,
    pub min_base_price: Money,
    pub max_base_price: Money,
    pub bid_increments: Vec<Money>,
    /// Countdown start for a freshly opened auction.
    pub timer_secs: u32,
    /// A successful bid raises the countdown to at least this.
    pub bid_extension_secs: u32,
    /// How often the remaining time is written back to the store.
    pub persist_interval_secs: u32,
    /// Pause between a settlement and opening the next queued auction.
    pub next_auction_delay: Duration,
    /// Slack allowed when a client claims the timer has expired.
    pub expiry_grace_secs: u32,
}

impl Default for AuctionRules {
    fn default() -> Self {
        let teams = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|l| TeamSeed {
                id: TeamId::new(format!("team{l}")),
                name: format!("Team {l}"),
            })
            .collect();
        AuctionRules {
            teams,
            initial_budget: Money::from_units(100),
            max_roster_size: 16,
            min_base_price: Money::from_tenths(5),
            max_base_price: Money::from_units(50),
            bid_increments: [5, 10, 20, 50, 100, 200]
                .into_iter()
                .map(Money::from_tenths)
                .collect(),
            timer_secs: 60,
            bid_extension_secs: 30,
            persist_interval_secs: 5,
            next_auction_delay: Duration::from_secs(2),
            expiry_grace_secs: 1,
        }
    }
}

impl AuctionRules {
    /// Team ids in first-round order.
    pub fn team_order(&self) -> Vec<TeamId> {
        self.teams.iter().map(|t| t.id.clone()).collect()
    }

    pub fn is_known_team(&self, id: &TeamId) -> bool {
        self.teams.iter().any(|t| &t.id == id)
    }

    pub fn total_teams(&self) -> usize {
        self.teams.len()
    }

    /// Passes that end an auction early: everyone except the one team that
    /// cannot pass (the leader, or the nominator while nobody has bid).
    pub fn pass_threshold(&self) -> usize {
        self.total_teams().saturating_sub(1)
    }

    pub fn is_allowed_increment(&self, increment: Money) -> bool {
        self.bid_increments.contains(&increment)
    }
}
