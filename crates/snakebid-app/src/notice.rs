// Notices the engine broadcasts alongside store change events.

use serde::{Deserialize, Serialize};

use snakebid_core::auction::{ActiveAuction, AuctionId};
use snakebid_core::money::Money;
use snakebid_core::settlement::{Sale, SettlementReason};
use snakebid_core::team::TeamId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineNotice {
    AuctionOpened {
        auction: ActiveAuction,
    },
    BidAccepted {
        auction_id: AuctionId,
        team: TeamId,
        amount: Money,
        time_left: u32,
    },
    Passed {
        auction_id: AuctionId,
        team: TeamId,
        passes: usize,
        required: usize,
    },
    /// Authoritative remaining time, sent at the persistence cadence.
    CountdownSync {
        auction_id: AuctionId,
        time_left: u32,
    },
    Settled {
        sale: Sale,
        reason: SettlementReason,
    },
    /// Settlement could not be committed; the auction stays open with its
    /// countdown stopped until someone requests settlement again.
    SettlementFailed {
        auction_id: AuctionId,
        message: String,
    },
    Reset,
}
