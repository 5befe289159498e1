// Client-side read replica of the shared collections.

use serde::{Deserialize, Serialize};

use crate::auction::ActiveAuction;
use crate::draft_order::DraftState;
use crate::error::StoreError;
use crate::nomination::QueuedNomination;
use crate::settlement::Sale;
use crate::store::{ChangeEvent, ChangeKind, Record, Store};
use crate::team::{Team, TeamId};

/// Everything a connected client renders, kept current by applying
/// [`ChangeEvent`]s on top of a snapshot.
///
/// Applying an event is an upsert or a removal keyed on the record's
/// identity, so replaying an event already reflected in the snapshot is
/// harmless. Subscribe before loading and no change can fall in between.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionView {
    pub teams: Vec<Team>,
    pub draft: DraftState,
    pub queue: Vec<QueuedNomination>,
    pub auction: Option<ActiveAuction>,
    /// Teams that passed on `auction`.
    pub passes: Vec<TeamId>,
    pub sales: Vec<Sale>,
}

impl AuctionView {
    /// Fresh snapshot of the store.
    pub async fn load(store: &dyn Store) -> Result<Self, StoreError> {
        let auction = store.active_auction().await?;
        let passes = match &auction {
            Some(a) => store.passes(a.id).await?,
            None => Vec::new(),
        };
        Ok(AuctionView {
            teams: store.teams().await?,
            draft: store.draft_state().await?,
            queue: store.queued_nominations().await?,
            auction,
            passes,
            sales: store.sales().await?,
        })
    }

    pub fn team(&self, id: &TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| &t.id == id)
    }

    pub fn apply(&mut self, event: &ChangeEvent) {
        let removed = event.kind == ChangeKind::Delete;
        match &event.record {
            Record::Team(team) => {
                let existing = self.teams.iter().position(|t| t.id == team.id);
                match (existing, removed) {
                    (Some(i), true) => {
                        self.teams.remove(i);
                    }
                    (Some(i), false) => self.teams[i] = team.clone(),
                    (None, false) => self.teams.push(team.clone()),
                    (None, true) => {}
                }
            }
            Record::DraftState(draft) => {
                if !removed {
                    self.draft = *draft;
                }
            }
            Record::ActiveAuction(auction) => {
                if removed {
                    if self.auction.as_ref().is_some_and(|a| a.id == auction.id) {
                        self.auction = None;
                        self.passes.clear();
                    }
                } else {
                    if self.auction.as_ref().is_some_and(|a| a.id != auction.id) {
                        self.passes.clear();
                    }
                    self.auction = Some(auction.clone());
                }
            }
            Record::Nomination(nomination) => {
                self.queue.retain(|n| n.id != nomination.id);
                if !removed {
                    self.queue.push(nomination.clone());
                    self.queue.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                }
            }
            Record::Pass(pass) => {
                let current = self.auction.as_ref().map(|a| a.id);
                if removed {
                    self.passes.retain(|t| t != &pass.team_id);
                } else if current == Some(pass.auction_id) && !self.passes.contains(&pass.team_id)
                {
                    self.passes.push(pass.team_id.clone());
                }
            }
            Record::Sale(sale) => {
                self.sales.retain(|s| s.sale_number != sale.sale_number);
                if !removed {
                    self.sales.push(sale.clone());
                    self.sales.sort_by_key(|s| s.sale_number);
                }
            }
            // The audit log is not part of the rendered view.
            Record::Bid(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::{AcceptedBid, PassRecord};
    use crate::money::Money;
    use crate::nomination::NewNomination;
    use crate::rules::AuctionRules;
    use crate::settlement::SettlementReason;
    use crate::store::{EventMask, SqliteStore, Subscription, SubscriptionError};
    use futures_util::FutureExt;

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        let rules = AuctionRules::default();
        store
            .ensure_seeded(&rules.teams, rules.initial_budget)
            .await
            .unwrap();
        store
    }

    async fn nominate(store: &SqliteStore, player: &str, by: &str) {
        let turn = store.draft_state().await.unwrap();
        store
            .enqueue_nomination(&NewNomination {
                player_name: player.into(),
                base_price: Money::from_units(5),
                nominated_by: TeamId::from(by),
                turn,
                next_turn: turn.advance(5),
            })
            .await
            .unwrap();
    }

    /// Apply everything buffered so far.
    fn drain(view: &mut AuctionView, sub: &mut Subscription) {
        loop {
            match sub.recv().now_or_never() {
                Some(Ok(event)) => view.apply(&event),
                Some(Err(SubscriptionError::Lagged(_))) => panic!("test subscriber lagged"),
                Some(Err(SubscriptionError::Closed)) | None => break,
            }
        }
    }

    #[tokio::test]
    async fn replica_converges_with_store() {
        let store = seeded().await;
        let mut sub = store.subscribe(None, EventMask::ALL);
        let mut view = AuctionView::load(&store).await.unwrap();

        nominate(&store, "Player X", "teamA").await;
        nominate(&store, "Player Y", "teamB").await;
        let auction = store.open_next_auction(60).await.unwrap().unwrap();
        let auction = store
            .record_bid(&AcceptedBid {
                auction_id: auction.id,
                team: TeamId::from("teamB"),
                increment: Money::from_units(1),
                expected_bid: auction.current_bid,
                new_bid: auction.current_bid + Money::from_units(1),
                time_left: 60,
            })
            .await
            .unwrap();
        store
            .record_pass(&PassRecord {
                auction_id: auction.id,
                team_id: TeamId::from("teamC"),
            })
            .await
            .unwrap();

        drain(&mut view, &mut sub);
        assert_eq!(view.passes, vec![TeamId::from("teamC")]);
        assert_eq!(view, AuctionView::load(&store).await.unwrap());

        store
            .settle(auction.id, SettlementReason::TimerExpired)
            .await
            .unwrap();
        store.open_next_auction(60).await.unwrap().unwrap();
        drain(&mut view, &mut sub);
        assert!(view.passes.is_empty());
        assert_eq!(view.team(&TeamId::from("teamB")).unwrap().roster.len(), 1);
        assert_eq!(view, AuctionView::load(&store).await.unwrap());

        let rules = AuctionRules::default();
        store.reset(&rules.teams, rules.initial_budget).await.unwrap();
        drain(&mut view, &mut sub);
        assert_eq!(view, AuctionView::load(&store).await.unwrap());
        assert!(view.queue.is_empty());
        assert!(view.auction.is_none());
    }

    #[tokio::test]
    async fn replaying_events_is_harmless() {
        let store = seeded().await;
        let mut sub = store.subscribe(None, EventMask::ALL);
        nominate(&store, "Player X", "teamA").await;

        // Snapshot taken after the change; the buffered event replays it.
        let mut view = AuctionView::load(&store).await.unwrap();
        drain(&mut view, &mut sub);
        assert_eq!(view.queue.len(), 1);
        assert_eq!(view, AuctionView::load(&store).await.unwrap());
    }
}
