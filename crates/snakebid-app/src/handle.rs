// Cloneable front door to the engine actor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use snakebid_core::auction::{ActiveAuction, AuctionId};
use snakebid_core::error::AuctionError;
use snakebid_core::money::Money;
use snakebid_core::nomination::QueuedNomination;
use snakebid_core::rules::AuctionRules;
use snakebid_core::settlement::{Sale, SettlementReason};
use snakebid_core::store::Store;
use snakebid_core::team::TeamId;

use crate::engine::{AuctionEngine, Command, EngineStatus};
use crate::notice::EngineNotice;

const COMMAND_CAPACITY: usize = 64;
const NOTICE_CAPACITY: usize = 256;

/// Sends requests to the engine and waits for the reply, at most
/// `request_timeout`. Every failure to get an answer is a `Transport` error.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<EngineNotice>,
    request_timeout: Duration,
}

impl EngineHandle {
    pub fn subscribe_notices(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, AuctionError>>) -> Command,
    ) -> Result<T, AuctionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| AuctionError::Transport("auction engine is not running".into()))?;

        match timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuctionError::Transport(
                "auction engine dropped the request".into(),
            )),
            Err(_) => Err(AuctionError::Transport(format!(
                "auction engine did not answer within {:?}",
                self.request_timeout
            ))),
        }
    }

    pub async fn nominate(
        &self,
        team: &TeamId,
        player_name: &str,
        base_price: Money,
    ) -> Result<QueuedNomination, AuctionError> {
        self.request(|reply| Command::Nominate {
            team: team.clone(),
            player_name: player_name.to_string(),
            base_price,
            reply,
        })
        .await
    }

    pub async fn place_bid(
        &self,
        team: &TeamId,
        auction_id: AuctionId,
        increment: Money,
    ) -> Result<ActiveAuction, AuctionError> {
        self.request(|reply| Command::Bid {
            team: team.clone(),
            auction_id,
            increment,
            reply,
        })
        .await
    }

    /// Returns the number of teams that have now passed.
    pub async fn pass(&self, team: &TeamId, auction_id: AuctionId) -> Result<usize, AuctionError> {
        self.request(|reply| Command::Pass {
            team: team.clone(),
            auction_id,
            reply,
        })
        .await
    }

    pub async fn request_settlement(
        &self,
        auction_id: AuctionId,
        reason: SettlementReason,
    ) -> Result<Option<Sale>, AuctionError> {
        self.request(|reply| Command::RequestSettlement {
            auction_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn reset(&self) -> Result<(), AuctionError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, AuctionError> {
        self.request(|reply| Command::Status { reply }).await
    }
}

/// Recover persisted state and start the engine on its own task.
///
/// The task ends when every handle has been dropped.
pub async fn spawn(
    store: Arc<dyn Store>,
    rules: AuctionRules,
    request_timeout: Duration,
) -> anyhow::Result<(EngineHandle, JoinHandle<()>)> {
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
    let mut engine = AuctionEngine::new(store, rules, notices.clone());
    engine
        .recover()
        .await
        .context("failed to recover auction state")?;

    let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let task = tokio::spawn(engine.run(command_rx));
    Ok((
        EngineHandle {
            commands,
            notices,
            request_timeout,
        },
        task,
    ))
}
