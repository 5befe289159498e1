// Shared store contract: typed collections plus change notifications.

pub mod sqlite;

use std::ops::BitOr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auction::{AcceptedBid, ActiveAuction, AuctionId, BidLogEntry, PassRecord};
use crate::draft_order::DraftState;
use crate::error::StoreError;
use crate::money::Money;
use crate::nomination::{NewNomination, QueuedNomination};
use crate::settlement::{Sale, SettlementReason};
use crate::team::{Team, TeamId, TeamSeed};

pub use sqlite::SqliteStore;

/// The shared collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Teams,
    DraftState,
    ActiveAuction,
    NominationQueue,
    BidLog,
    PassRecords,
    Sales,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Set of [`ChangeKind`]s a subscriber wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const INSERT: EventMask = EventMask(0b001);
    pub const UPDATE: EventMask = EventMask(0b010);
    pub const DELETE: EventMask = EventMask(0b100);
    pub const ALL: EventMask = EventMask(0b111);

    pub fn contains(self, kind: ChangeKind) -> bool {
        let bit = match kind {
            ChangeKind::Insert => Self::INSERT.0,
            ChangeKind::Update => Self::UPDATE.0,
            ChangeKind::Delete => Self::DELETE.0,
        };
        self.0 & bit != 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// A record from one of the collections, tagged with where it lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "data", rename_all = "snake_case")]
pub enum Record {
    Team(Team),
    DraftState(DraftState),
    ActiveAuction(ActiveAuction),
    Nomination(QueuedNomination),
    Bid(BidLogEntry),
    Pass(PassRecord),
    Sale(Sale),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Team(_) => Collection::Teams,
            Record::DraftState(_) => Collection::DraftState,
            Record::ActiveAuction(_) => Collection::ActiveAuction,
            Record::Nomination(_) => Collection::NominationQueue,
            Record::Bid(_) => Collection::BidLog,
            Record::Pass(_) => Collection::PassRecords,
            Record::Sale(_) => Collection::Sales,
        }
    }
}

/// One committed change. Deletes carry the record as it was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, record: Record) -> Self {
        ChangeEvent { kind, record }
    }

    pub fn collection(&self) -> Collection {
        self.record.collection()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `n` events were dropped; its view must
    /// be rebuilt from a fresh read.
    #[error("subscription lagged; {0} events dropped")]
    Lagged(u64),

    #[error("store closed")]
    Closed,
}

/// A standing subscription to one collection (or all of them).
///
/// Dropping it tears the subscription down; nothing else is affected.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    collection: Option<Collection>,
    mask: EventMask,
}

impl Subscription {
    pub fn new(
        rx: broadcast::Receiver<ChangeEvent>,
        collection: Option<Collection>,
        mask: EventMask,
    ) -> Self {
        Subscription {
            rx,
            collection,
            mask,
        }
    }

    fn wants(&self, event: &ChangeEvent) -> bool {
        self.mask.contains(event.kind)
            && match self.collection {
                Some(c) => c == event.collection(),
                None => true,
            }
    }

    /// Next matching event.
    pub async fn recv(&mut self) -> Result<ChangeEvent, SubscriptionError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(SubscriptionError::Lagged(n))
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }
}

/// The shared store every writer goes through.
///
/// Each mutating method is a single all-or-nothing unit and publishes its
/// change events only after it has committed. Preconditions that other
/// writers could invalidate are checked inside the unit, so racing callers
/// see `Constraint` or `NotFound` instead of a half-applied write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert any configured team or draft-state row that is missing.
    async fn ensure_seeded(&self, teams: &[TeamSeed], initial_budget: Money)
        -> Result<(), StoreError>;

    /// All teams in draft order, rosters included.
    async fn teams(&self) -> Result<Vec<Team>, StoreError>;

    async fn team(&self, id: &TeamId) -> Result<Option<Team>, StoreError>;

    async fn draft_state(&self) -> Result<DraftState, StoreError>;

    /// Move the turn from `expected` to `next`. `Constraint` if the stored
    /// turn is no longer `expected`.
    async fn advance_draft(&self, expected: DraftState, next: DraftState)
        -> Result<DraftState, StoreError>;

    /// Append to the queue and advance the turn from `nomination.turn` to
    /// `nomination.next_turn` as one unit. `Constraint` if the turn moved.
    async fn enqueue_nomination(
        &self,
        nomination: &NewNomination,
    ) -> Result<QueuedNomination, StoreError>;

    /// The queue, oldest first.
    async fn queued_nominations(&self) -> Result<Vec<QueuedNomination>, StoreError>;

    async fn active_auction(&self) -> Result<Option<ActiveAuction>, StoreError>;

    /// Claim the queue head as the active auction. `Ok(None)` if the queue is
    /// empty, `Constraint` if an auction is already active.
    async fn open_next_auction(&self, time_left: u32)
        -> Result<Option<ActiveAuction>, StoreError>;

    /// Apply an accepted bid if the stored bid still equals
    /// `bid.expected_bid`, logging it in the same unit. `NotFound` if the
    /// auction is gone, `Constraint` if the bid is stale or the bidder has
    /// passed.
    async fn record_bid(&self, bid: &AcceptedBid) -> Result<ActiveAuction, StoreError>;

    /// Insert a pass and return how many teams have now passed. `NotFound`
    /// if the auction is gone, `Constraint` for a duplicate or the leader.
    async fn record_pass(&self, pass: &PassRecord) -> Result<usize, StoreError>;

    async fn passes(&self, auction: AuctionId) -> Result<Vec<TeamId>, StoreError>;

    async fn bid_log(&self, auction: AuctionId) -> Result<Vec<BidLogEntry>, StoreError>;

    /// Best-effort persistence of the countdown.
    async fn save_time_left(&self, auction: AuctionId, secs: u32) -> Result<(), StoreError>;

    /// Settle the auction: credit the awardee, record the sale and delete the
    /// auction with its pass and bid records. `NotFound` if it is already
    /// gone, in which case nothing changes.
    async fn settle(&self, auction: AuctionId, reason: SettlementReason)
        -> Result<Sale, StoreError>;

    /// Every sale, in order.
    async fn sales(&self) -> Result<Vec<Sale>, StoreError>;

    /// Restore the draft to its starting point in one unit.
    async fn reset(&self, teams: &[TeamSeed], initial_budget: Money) -> Result<(), StoreError>;

    /// Change events for `collection` (or every collection with `None`)
    /// filtered by `mask`.
    fn subscribe(&self, collection: Option<Collection>, mask: EventMask) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_filters_kinds() {
        let mask = EventMask::INSERT | EventMask::DELETE;
        assert!(mask.contains(ChangeKind::Insert));
        assert!(!mask.contains(ChangeKind::Update));
        assert!(mask.contains(ChangeKind::Delete));
        assert!(EventMask::ALL.contains(ChangeKind::Update));
    }

    #[tokio::test]
    async fn subscription_filters_by_collection_and_reports_lag() {
        let (tx, _) = broadcast::channel(2);
        let mut draft_only = Subscription::new(
            tx.subscribe(),
            Some(Collection::DraftState),
            EventMask::ALL,
        );

        tx.send(ChangeEvent::new(
            ChangeKind::Delete,
            Record::Pass(PassRecord {
                auction_id: AuctionId(1),
                team_id: TeamId::from("teamB"),
            }),
        ))
        .unwrap();
        tx.send(ChangeEvent::new(
            ChangeKind::Update,
            Record::DraftState(DraftState::default()),
        ))
        .unwrap();

        let event = draft_only.recv().await.unwrap();
        assert_eq!(event.collection(), Collection::DraftState);

        for _ in 0..3 {
            tx.send(ChangeEvent::new(
                ChangeKind::Update,
                Record::DraftState(DraftState::default()),
            ))
            .unwrap();
        }
        assert_eq!(draft_only.recv().await, Err(SubscriptionError::Lagged(1)));

        drop(tx);
        // Remaining buffered events drain before the close is reported.
        assert!(draft_only.recv().await.is_ok());
        assert!(draft_only.recv().await.is_ok());
        assert_eq!(draft_only.recv().await, Err(SubscriptionError::Closed));
    }
}
