// Settlement: who gets the player, at what price, and the resulting sale.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auction::{ActiveAuction, AuctionId, BidStatus};
use crate::money::Money;
use crate::rules::AuctionRules;
use crate::team::{Team, TeamId};

/// What ended an auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementReason {
    TimerExpired,
    AllPassed,
}

impl SettlementReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementReason::TimerExpired => "TIMER_EXPIRED",
            SettlementReason::AllPassed => "ALL_PASSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TIMER_EXPIRED" => Some(SettlementReason::TimerExpired),
            "ALL_PASSED" => Some(SettlementReason::AllPassed),
            _ => None,
        }
    }
}

impl fmt::Display for SettlementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementReason::TimerExpired => f.write_str("timer expired"),
            SettlementReason::AllPassed => f.write_str("all teams passed"),
        }
    }
}

/// How the winner was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleOutcome {
    WonAtBid,
    AwardedToNominator,
}

impl SaleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SaleOutcome::WonAtBid => "WON_AT_BID",
            SaleOutcome::AwardedToNominator => "AWARDED_TO_NOMINATOR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WON_AT_BID" => Some(SaleOutcome::WonAtBid),
            "AWARDED_TO_NOMINATOR" => Some(SaleOutcome::AwardedToNominator),
            _ => None,
        }
    }
}

/// The single outcome of an auction: exactly one team receives the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Award {
    pub team: TeamId,
    pub price: Money,
    pub outcome: SaleOutcome,
}

impl Award {
    /// Leader at the current bid, otherwise the nominator at base price.
    pub fn for_auction(auction: &ActiveAuction) -> Self {
        match &auction.bid_status {
            BidStatus::Leading { team } => Award {
                team: team.clone(),
                price: auction.current_bid,
                outcome: SaleOutcome::WonAtBid,
            },
            BidStatus::NoBidsYet => Award {
                team: auction.nominated_by.clone(),
                price: auction.base_price,
                outcome: SaleOutcome::AwardedToNominator,
            },
        }
    }
}

/// Permanent record of a settled auction. A team's roster is its sales in
/// `sale_number` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub sale_number: i64,
    pub auction_id: AuctionId,
    pub player_name: String,
    pub team_id: TeamId,
    pub price: Money,
    pub outcome: SaleOutcome,
    pub reason: SettlementReason,
    pub settled_at: DateTime<Utc>,
}

/// Whether the pass count ends the auction early.
///
/// Only the leader (or, before any bid, the nominator) cannot pass, so the
/// threshold is every other team.
pub fn all_passed(rules: &AuctionRules, passes: usize) -> bool {
    passes >= rules.pass_threshold()
}

/// Apply an award to an in-memory ledger. Returns `false` if the team is
/// unknown.
pub fn credit_award(teams: &mut [Team], player_name: &str, award: &Award) -> bool {
    match teams.iter_mut().find(|t| t.id == award.team) {
        Some(team) => {
            team.credit_sale(player_name, award.price);
            true
        }
        None => false,
    }
}
