// Auction lifecycle state machine: Idle -> Open -> Settling -> Idle.

use snakebid_core::auction::{ActiveAuction, AuctionId};
use snakebid_core::settlement::SettlementReason;
use snakebid_core::team::TeamId;

use crate::countdown::Countdown;

/// The running auction as the engine tracks it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAuction {
    pub auction: ActiveAuction,
    pub countdown: Countdown,
    /// Teams holding a pass record for this auction.
    pub passes: Vec<TeamId>,
}

impl OpenAuction {
    pub fn new(auction: ActiveAuction, countdown: Countdown, passes: Vec<TeamId>) -> Self {
        OpenAuction {
            auction,
            countdown,
            passes,
        }
    }

    pub fn id(&self) -> AuctionId {
        self.auction.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// No active auction.
    Idle,
    /// Bidding is open and the countdown is running.
    Open(OpenAuction),
    /// A terminal trigger was accepted; settlement is in flight.
    Settling {
        open: OpenAuction,
        reason: SettlementReason,
    },
}

impl Lifecycle {
    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Open(_) => "open",
            Lifecycle::Settling { .. } => "settling",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Lifecycle::Idle)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Lifecycle::Open(_))
    }

    pub fn open_auction(&self) -> Option<&OpenAuction> {
        match self {
            Lifecycle::Open(open) => Some(open),
            _ => None,
        }
    }

    pub fn open_auction_mut(&mut self) -> Option<&mut OpenAuction> {
        match self {
            Lifecycle::Open(open) => Some(open),
            _ => None,
        }
    }

    /// Id of the auction that is open or being settled.
    pub fn active_id(&self) -> Option<AuctionId> {
        match self {
            Lifecycle::Idle => None,
            Lifecycle::Open(open) | Lifecycle::Settling { open, .. } => Some(open.id()),
        }
    }

    /// `Open -> Settling` for auction `id`. Returns `false` (and changes
    /// nothing) for any other state or auction, which makes a repeated
    /// trigger a no-op.
    pub fn begin_settlement(&mut self, id: AuctionId, reason: SettlementReason) -> bool {
        match std::mem::replace(self, Lifecycle::Idle) {
            Lifecycle::Open(open) if open.id() == id => {
                *self = Lifecycle::Settling { open, reason };
                true
            }
            other => {
                *self = other;
                false
            }
        }
    }

    /// `Settling -> Idle`.
    pub fn settled(&mut self) {
        if matches!(self, Lifecycle::Settling { .. }) {
            *self = Lifecycle::Idle;
        }
    }

    /// `Settling -> Open` after a settlement that did not commit. The
    /// countdown is left as it was.
    pub fn settlement_failed(&mut self) {
        if let Lifecycle::Settling { open, .. } = std::mem::replace(self, Lifecycle::Idle) {
            *self = Lifecycle::Open(open);
        }
    }
}
