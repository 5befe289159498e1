// The single authority over the auction lifecycle.
//
// Every mutating request funnels through one `AuctionEngine`, driven by
// `run` as an actor: commands arrive on an mpsc channel and are handled one
// at a time, interleaved with the countdown tick and the delayed opening of
// the next queued auction. Clients never write contended fields themselves.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use snakebid_core::auction::{authorize_bid, authorize_pass, reserved_for, ActiveAuction, AuctionId};
use snakebid_core::error::{AuctionError, RuleViolation, StoreError, ValidationError};
use snakebid_core::money::Money;
use snakebid_core::nomination::{NominationContext, QueuedNomination};
use snakebid_core::rules::AuctionRules;
use snakebid_core::settlement::{all_passed, Sale, SettlementReason};
use snakebid_core::store::Store;
use snakebid_core::team::TeamId;

use crate::countdown::{Countdown, Tick};
use crate::lifecycle::{Lifecycle, OpenAuction};
use crate::notice::EngineNotice;

const TICK: Duration = Duration::from_secs(1);

/// Requests accepted by the engine, each carrying its reply channel.
#[derive(Debug)]
pub enum Command {
    Nominate {
        team: TeamId,
        player_name: String,
        base_price: Money,
        reply: oneshot::Sender<Result<QueuedNomination, AuctionError>>,
    },
    Bid {
        team: TeamId,
        auction_id: AuctionId,
        increment: Money,
        reply: oneshot::Sender<Result<ActiveAuction, AuctionError>>,
    },
    Pass {
        team: TeamId,
        auction_id: AuctionId,
        reply: oneshot::Sender<Result<usize, AuctionError>>,
    },
    RequestSettlement {
        auction_id: AuctionId,
        reason: SettlementReason,
        reply: oneshot::Sender<Result<Option<Sale>, AuctionError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), AuctionError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, AuctionError>>,
    },
}

/// Where the lifecycle currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub phase: &'static str,
    pub auction_id: Option<AuctionId>,
    /// Authoritative remaining seconds while an auction is open.
    pub time_left: Option<u32>,
}

pub struct AuctionEngine {
    store: Arc<dyn Store>,
    rules: AuctionRules,
    lifecycle: Lifecycle,
    /// Deadline of the next countdown tick while an auction is open.
    next_tick: Option<Instant>,
    /// When to try opening the queue head after a settlement.
    next_open_at: Option<Instant>,
    notices: broadcast::Sender<EngineNotice>,
}

impl AuctionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        rules: AuctionRules,
        notices: broadcast::Sender<EngineNotice>,
    ) -> Self {
        AuctionEngine {
            store,
            rules,
            lifecycle: Lifecycle::Idle,
            next_tick: None,
            next_open_at: None,
            notices,
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn next_open_at(&self) -> Option<Instant> {
        self.next_open_at
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: self.lifecycle.name(),
            auction_id: self.lifecycle.active_id(),
            time_left: self
                .lifecycle
                .open_auction()
                .map(|open| open.countdown.remaining()),
        }
    }

    fn notify(&self, notice: EngineNotice) {
        // No receivers is fine; nobody is connected.
        let _ = self.notices.send(notice);
    }

    // -----------------------------------------------------------------------
    // Start-up
    // -----------------------------------------------------------------------

    /// Seed missing rows, resume a persisted auction (its countdown from the
    /// stored `time_left`, its passes from the store), or open the queue head.
    pub async fn recover(&mut self) -> anyhow::Result<()> {
        use anyhow::Context;

        self.store
            .ensure_seeded(&self.rules.teams, self.rules.initial_budget)
            .await
            .context("failed to seed teams and draft state")?;

        let resumed = self
            .adopt_active_auction()
            .await
            .context("failed to load the active auction")?;
        if resumed {
            if let Some(open) = self.lifecycle.open_auction() {
                info!(
                    "Resumed auction {} for {} with {}s left and {} pass(es)",
                    open.id(),
                    open.auction.player_name,
                    open.countdown.remaining(),
                    open.passes.len()
                );
            }
            return Ok(());
        }

        self.skip_full_nominators()
            .await
            .context("failed to advance past full rosters")?;
        self.open_next_or_retry().await;
        Ok(())
    }

    /// Take over whatever auction the store holds. Returns `false` if none.
    async fn adopt_active_auction(&mut self) -> Result<bool, StoreError> {
        let Some(auction) = self.store.active_auction().await? else {
            return Ok(false);
        };
        let passes = self.store.passes(auction.id).await?;
        let countdown = Countdown::start(auction.time_left, self.rules.persist_interval_secs);
        self.open(OpenAuction::new(auction, countdown, passes));
        Ok(true)
    }

    fn open(&mut self, open: OpenAuction) {
        let auction = open.auction.clone();
        self.lifecycle = Lifecycle::Open(open);
        self.next_tick = Some(Instant::now() + TICK);
        self.next_open_at = None;
        self.notify(EngineNotice::AuctionOpened { auction });
    }

    // -----------------------------------------------------------------------
    // Nomination
    // -----------------------------------------------------------------------

    pub async fn nominate(
        &mut self,
        team: &TeamId,
        player_name: &str,
        base_price: Money,
    ) -> Result<QueuedNomination, AuctionError> {
        let teams = self.store.teams().await?;
        let draft = self.store.draft_state().await?;
        let queue = self.store.queued_nominations().await?;

        let nomination = NominationContext {
            rules: &self.rules,
            draft,
            teams: &teams,
            queue: &queue,
            active: self.lifecycle.open_auction().map(|open| &open.auction),
        }
        .validate(player_name, base_price, team)?;

        let queued = self.store.enqueue_nomination(&nomination).await?;
        info!(
            "{} nominated {} at {} (round {}, queue position {})",
            team,
            queued.player_name,
            queued.base_price,
            draft.round,
            queue.len() + 1
        );

        if let Err(e) = self.skip_full_nominators().await {
            warn!("Failed to advance past full rosters: {}", e);
        }
        if self.lifecycle.is_idle() && self.next_open_at.is_none() {
            self.open_next_or_retry().await;
        }
        Ok(queued)
    }

    /// Move the turn past nominators whose roster is already full, unless
    /// every roster is full and the draft is over.
    async fn skip_full_nominators(&self) -> Result<(), StoreError> {
        let teams = self.store.teams().await?;
        let max = self.rules.max_roster_size;
        if teams.iter().all(|t| t.is_full(max)) {
            return Ok(());
        }

        let draft = self.store.draft_state().await?;
        let next = draft.advance_while(&self.rules.team_order(), |id| {
            teams.iter().any(|t| &t.id == id && t.is_full(max))
        });
        if next == draft {
            return Ok(());
        }

        match self.store.advance_draft(draft, next).await {
            Ok(_) => {
                info!(
                    "Skipped full rosters: turn moves to index {} of round {}",
                    next.nominator_index, next.round
                );
                Ok(())
            }
            Err(StoreError::Constraint(msg)) => {
                debug!("Turn moved while skipping full rosters: {}", msg);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Opening auctions
    // -----------------------------------------------------------------------

    /// Claim the queue head if no auction is active. Losing the claim to an
    /// auction that already exists adopts that auction.
    pub async fn try_open_next(&mut self) -> Result<Option<ActiveAuction>, AuctionError> {
        self.next_open_at = None;
        if !self.lifecycle.is_idle() {
            return Ok(None);
        }

        match self.store.open_next_auction(self.rules.timer_secs).await {
            Ok(Some(auction)) => {
                info!(
                    "Auction {} opened: {} nominated by {} at {}",
                    auction.id, auction.player_name, auction.nominated_by, auction.base_price
                );
                let countdown =
                    Countdown::start(self.rules.timer_secs, self.rules.persist_interval_secs);
                self.open(OpenAuction::new(auction.clone(), countdown, Vec::new()));
                Ok(Some(auction))
            }
            Ok(None) => {
                debug!("Nomination queue is empty; staying idle");
                Ok(None)
            }
            Err(StoreError::Constraint(msg)) => {
                info!("An auction is already active ({}); adopting it", msg);
                self.adopt_active_auction().await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn open_next_or_retry(&mut self) {
        if let Err(e) = self.try_open_next().await {
            warn!(
                "Failed to open the next auction: {}; retrying in {:?}",
                e, self.rules.next_auction_delay
            );
            self.next_open_at = Some(Instant::now() + self.rules.next_auction_delay);
        }
    }

    // -----------------------------------------------------------------------
    // Bids and passes
    // -----------------------------------------------------------------------

    /// The open auction, if it is `auction_id` and still taking bids.
    fn open_for(&self, auction_id: AuctionId) -> Result<&OpenAuction, AuctionError> {
        let open = self
            .lifecycle
            .open_auction()
            .ok_or(RuleViolation::AuctionNotOpen)?;
        if open.id() != auction_id {
            return Err(AuctionError::auction_gone(auction_id));
        }
        if open.countdown.is_expired() {
            return Err(RuleViolation::AuctionNotOpen.into());
        }
        Ok(open)
    }

    pub async fn place_bid(
        &mut self,
        team_id: &TeamId,
        auction_id: AuctionId,
        increment: Money,
    ) -> Result<ActiveAuction, AuctionError> {
        self.open_for(auction_id)?;
        let team = self
            .store
            .team(team_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownTeam(team_id.clone()))?;
        // Queued nominations hold roster slots. The bidder's stake in this
        // auction is what is being decided, so it is left out.
        let queue = self.store.queued_nominations().await?;
        let reserved = reserved_for(team_id, &queue, None);

        let open = self.open_for(auction_id)?;
        let accepted = authorize_bid(
            &self.rules,
            &open.auction,
            &team,
            increment,
            &open.passes,
            reserved,
            open.countdown.remaining(),
        )?;

        let updated = self.store.record_bid(&accepted).await?;
        if let Some(open) = self.lifecycle.open_auction_mut() {
            open.auction = updated.clone();
            open.countdown.extend_to(accepted.time_left);
        }
        info!(
            "{} bid {} on {} (+{}), {}s left",
            team_id, updated.current_bid, updated.player_name, increment, accepted.time_left
        );
        self.notify(EngineNotice::BidAccepted {
            auction_id,
            team: team_id.clone(),
            amount: updated.current_bid,
            time_left: accepted.time_left,
        });
        Ok(updated)
    }

    /// Record a pass. Reaching the pass threshold settles the auction.
    pub async fn pass(&mut self, team: &TeamId, auction_id: AuctionId) -> Result<usize, AuctionError> {
        if !self.rules.is_known_team(team) {
            return Err(ValidationError::UnknownTeam(team.clone()).into());
        }
        let open = self.open_for(auction_id)?;
        let record = authorize_pass(&open.auction, team, &open.passes)?;

        let passes = self.store.record_pass(&record).await?;
        if let Some(open) = self.lifecycle.open_auction_mut() {
            open.passes.push(team.clone());
        }
        let required = self.rules.pass_threshold();
        info!("{} passed on auction {} ({}/{})", team, auction_id, passes, required);
        self.notify(EngineNotice::Passed {
            auction_id,
            team: team.clone(),
            passes,
            required,
        });

        if all_passed(&self.rules, passes) {
            if let Err(e) = self.settle(auction_id, SettlementReason::AllPassed).await {
                debug!("Pass recorded but settlement did not complete: {}", e);
            }
        }
        Ok(passes)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Client-side trigger. `TimerExpired` is honoured only near the end of
    /// the authoritative countdown and `AllPassed` only once the threshold
    /// is met. A request for an auction that is no longer open is a no-op.
    pub async fn request_settlement(
        &mut self,
        auction_id: AuctionId,
        reason: SettlementReason,
    ) -> Result<Option<Sale>, AuctionError> {
        let Some(open) = self
            .lifecycle
            .open_auction()
            .filter(|open| open.id() == auction_id)
        else {
            debug!(
                "Settlement request for auction {} ({}) ignored: not open",
                auction_id, reason
            );
            return Ok(None);
        };

        match reason {
            SettlementReason::TimerExpired => {
                if !open.countdown.within_grace(self.rules.expiry_grace_secs) {
                    return Err(RuleViolation::TimerStillRunning {
                        remaining: open.countdown.remaining(),
                    }
                    .into());
                }
            }
            SettlementReason::AllPassed => {
                let passed = open.passes.len();
                if !all_passed(&self.rules, passed) {
                    return Err(RuleViolation::PassesOutstanding {
                        passed,
                        required: self.rules.pass_threshold(),
                    }
                    .into());
                }
            }
        }
        self.settle(auction_id, reason).await
    }

    /// The one path into `Open -> Settling`. Exactly-once is enforced twice:
    /// by the lifecycle (a second trigger finds nothing open) and by the store
    /// (a second settle of the same id is `NotFound`).
    async fn settle(
        &mut self,
        auction_id: AuctionId,
        reason: SettlementReason,
    ) -> Result<Option<Sale>, AuctionError> {
        if !self.lifecycle.begin_settlement(auction_id, reason) {
            debug!("Auction {} is not open; {} ignored", auction_id, reason);
            return Ok(None);
        }
        info!("Settling auction {}: {}", auction_id, reason);

        match self.store.settle(auction_id, reason).await {
            Ok(sale) => {
                self.lifecycle.settled();
                info!(
                    "Sale #{}: {} to {} for {} ({})",
                    sale.sale_number,
                    sale.player_name,
                    sale.team_id,
                    sale.price,
                    sale.outcome.as_str()
                );
                self.notify(EngineNotice::Settled {
                    sale: sale.clone(),
                    reason,
                });
                self.after_settlement().await;
                Ok(Some(sale))
            }
            Err(e) => {
                let e = AuctionError::from(e);
                if e.is_benign_race() {
                    debug!("Auction {} was already settled: {}", auction_id, e);
                    self.lifecycle.settled();
                    self.after_settlement().await;
                    return Ok(None);
                }
                error!(
                    "Settlement of auction {} failed: {}; auction stays open for a manual retry",
                    auction_id, e
                );
                self.lifecycle.settlement_failed();
                self.notify(EngineNotice::SettlementFailed {
                    auction_id,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn after_settlement(&mut self) {
        self.next_tick = None;
        if let Err(e) = self.skip_full_nominators().await {
            warn!("Failed to advance past full rosters: {}", e);
        }
        self.next_open_at = Some(Instant::now() + self.rules.next_auction_delay);
    }

    // -----------------------------------------------------------------------
    // Countdown
    // -----------------------------------------------------------------------

    /// Advance the countdown one second: persist at the configured cadence
    /// and settle on reaching zero.
    pub async fn on_tick(&mut self) {
        let Some(open) = self.lifecycle.open_auction_mut() else {
            self.next_tick = None;
            return;
        };
        let auction_id = open.id();

        match open.countdown.tick() {
            Tick::Running {
                remaining,
                persist: true,
            } => {
                if let Err(e) = self.store.save_time_left(auction_id, remaining).await {
                    warn!("Failed to persist time left for auction {}: {}", auction_id, e);
                }
                self.notify(EngineNotice::CountdownSync {
                    auction_id,
                    time_left: remaining,
                });
            }
            Tick::Running { .. } => {}
            Tick::Expired => {
                info!("Auction {} timer expired", auction_id);
                if let Err(e) = self.settle(auction_id, SettlementReason::TimerExpired).await {
                    debug!("Timer expiry did not settle auction {}: {}", auction_id, e);
                }
            }
            Tick::Stopped => self.next_tick = None,
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Restore the draft to its starting point. The store applies it as one
    /// unit; on failure nothing local changes and the error is returned.
    pub async fn reset(&mut self) -> Result<(), AuctionError> {
        if let Err(e) = self
            .store
            .reset(&self.rules.teams, self.rules.initial_budget)
            .await
        {
            error!("Reset failed, draft state unchanged: {}", e);
            return Err(e.into());
        }
        self.lifecycle = Lifecycle::Idle;
        self.next_tick = None;
        self.next_open_at = None;
        info!("Draft reset to its starting state");
        self.notify(EngineNotice::Reset);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Actor loop
    // -----------------------------------------------------------------------

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Nominate {
                team,
                player_name,
                base_price,
                reply,
            } => {
                let result = self.nominate(&team, &player_name, base_price).await;
                log_rejection("nomination", &team, &result);
                let _ = reply.send(result);
            }
            Command::Bid {
                team,
                auction_id,
                increment,
                reply,
            } => {
                let result = self.place_bid(&team, auction_id, increment).await;
                log_rejection("bid", &team, &result);
                let _ = reply.send(result);
            }
            Command::Pass {
                team,
                auction_id,
                reply,
            } => {
                let result = self.pass(&team, auction_id).await;
                log_rejection("pass", &team, &result);
                let _ = reply.send(result);
            }
            Command::RequestSettlement {
                auction_id,
                reason,
                reply,
            } => {
                let result = self.request_settlement(auction_id, reason).await;
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.reset().await);
            }
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
        }
    }

    /// Serve commands until every sender is dropped.
    ///
    /// Selects over three sources:
    /// 1. Commands from sessions
    /// 2. The countdown tick, while an auction is open
    /// 3. The delayed opening of the next queued auction
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Auction engine started ({})", self.lifecycle.name());

        loop {
            let tick_at = self.next_tick;
            let open_at = self.next_open_at;

            tokio::select! {
                // --- Commands ---
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                // --- Countdown ---
                _ = sleep_until(tick_at.unwrap_or_else(Instant::now)), if tick_at.is_some() => {
                    self.next_tick = tick_at.map(|t| t + TICK);
                    self.on_tick().await;
                }

                // --- Next auction ---
                _ = sleep_until(open_at.unwrap_or_else(Instant::now)), if open_at.is_some() => {
                    self.open_next_or_retry().await;
                }
            }
        }

        info!("Auction engine exiting");
    }
}

fn log_rejection<T>(action: &str, team: &TeamId, result: &Result<T, AuctionError>) {
    if let Err(e) = result {
        debug!("Rejected {} from {} ({}): {}", action, team, e.kind(), e);
    }
}
