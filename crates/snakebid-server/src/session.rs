// Per-connection session: authentication, request dispatch to the engine,
// and a read replica of the shared collections.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use snakebid_app::{EngineHandle, EngineNotice, EngineStatus};
use snakebid_core::config::CredentialsConfig;
use snakebid_core::error::AuctionError;
use snakebid_core::store::{ChangeEvent, Store};
use snakebid_core::team::TeamId;
use snakebid_core::view::AuctionView;

use crate::protocol::{self, ClientMessage, Role, ServerMessage};

/// What every session on this server shares.
#[derive(Clone)]
pub struct ServerContext {
    pub engine: EngineHandle,
    pub store: Arc<dyn Store>,
    pub credentials: Arc<CredentialsConfig>,
}

impl ServerContext {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn Store>,
        credentials: Arc<CredentialsConfig>,
    ) -> Self {
        ServerContext {
            engine,
            store,
            credentials,
        }
    }
}

/// One connected client.
///
/// Nothing is streamed until the client logs in. The replica is loaded at
/// login and on `SYNC`, then kept current by [`Session::apply_change`].
pub struct Session {
    ctx: ServerContext,
    role: Option<Role>,
    view: AuctionView,
}

impl Session {
    pub fn new(ctx: ServerContext) -> Self {
        Session {
            ctx,
            role: None,
            view: AuctionView::default(),
        }
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.role.is_some()
    }

    pub fn view(&self) -> &AuctionView {
        &self.view
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match protocol::decode(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                debug!("Malformed client message: {}", e);
                vec![ServerMessage::error(
                    "validation",
                    format!("malformed message: {e}"),
                )]
            }
        }
    }

    /// Handle one request and return the replies for this client.
    pub async fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        let action = message.action();
        match message {
            ClientMessage::Login { team_id, secret } => self.login(team_id, &secret).await,
            ClientMessage::AdminLogin { secret } => self.admin_login(&secret).await,
            ClientMessage::Sync => {
                if !self.is_authenticated() {
                    return vec![not_logged_in()];
                }
                self.sync().await
            }
            ClientMessage::Nominate {
                player_name,
                base_price,
            } => {
                let team = match self.acting_team() {
                    Ok(team) => team,
                    Err(reply) => return vec![reply],
                };
                reply(
                    action,
                    self.ctx
                        .engine
                        .nominate(&team, &player_name, base_price)
                        .await,
                )
            }
            ClientMessage::Bid {
                auction_id,
                increment,
            } => {
                let team = match self.acting_team() {
                    Ok(team) => team,
                    Err(reply) => return vec![reply],
                };
                reply(
                    action,
                    self.ctx.engine.place_bid(&team, auction_id, increment).await,
                )
            }
            ClientMessage::Pass { auction_id } => {
                let team = match self.acting_team() {
                    Ok(team) => team,
                    Err(reply) => return vec![reply],
                };
                reply(action, self.ctx.engine.pass(&team, auction_id).await)
            }
            ClientMessage::RequestSettlement { auction_id, reason } => {
                if !self.is_authenticated() {
                    return vec![not_logged_in()];
                }
                reply(
                    action,
                    self.ctx.engine.request_settlement(auction_id, reason).await,
                )
            }
            ClientMessage::Reset => {
                if self.role != Some(Role::Admin) {
                    warn!("Reset refused for a non-admin session");
                    return vec![ServerMessage::error(
                        "auth",
                        "only an administrator may reset the draft",
                    )];
                }
                let result = self.ctx.engine.reset().await;
                if let Err(e) = &result {
                    error!("Administrative reset failed: {}", e);
                }
                reply(action, result)
            }
        }
    }

    async fn login(&mut self, team_id: TeamId, secret: &str) -> Vec<ServerMessage> {
        if self.ctx.credentials.team_secret(&team_id) != Some(secret) {
            warn!("Failed login attempt for team {}", team_id);
            return vec![ServerMessage::error("auth", "invalid team or secret")];
        }
        info!("Team {} logged in", team_id);
        self.welcome(Role::Team { team_id }).await
    }

    async fn admin_login(&mut self, secret: &str) -> Vec<ServerMessage> {
        match self.ctx.credentials.admin_secret.as_deref() {
            Some(expected) if expected == secret => {
                info!("Administrator logged in");
                self.welcome(Role::Admin).await
            }
            _ => {
                warn!("Failed administrator login attempt");
                vec![ServerMessage::error("auth", "invalid administrator secret")]
            }
        }
    }

    async fn welcome(&mut self, role: Role) -> Vec<ServerMessage> {
        self.role = Some(role.clone());
        let mut out = vec![ServerMessage::Welcome { role }];
        out.extend(self.sync().await);
        out
    }

    fn acting_team(&self) -> Result<TeamId, ServerMessage> {
        match &self.role {
            Some(Role::Team { team_id }) => Ok(team_id.clone()),
            Some(Role::Admin) => Err(ServerMessage::error(
                "auth",
                "administrators cannot act for a team",
            )),
            None => Err(not_logged_in()),
        }
    }

    /// Reload the replica and report it with the authoritative countdown.
    pub async fn sync(&mut self) -> Vec<ServerMessage> {
        match AuctionView::load(self.ctx.store.as_ref()).await {
            Ok(view) => self.view = view,
            Err(e) => {
                warn!("Failed to load a snapshot: {}", e);
                return vec![ServerMessage::from(&AuctionError::from(e))];
            }
        }

        let mut out = vec![ServerMessage::Snapshot {
            view: self.view.clone(),
        }];
        match self.ctx.engine.status().await {
            Ok(EngineStatus {
                auction_id: Some(auction_id),
                time_left: Some(time_left),
                ..
            }) => out.push(ServerMessage::Notice {
                notice: EngineNotice::CountdownSync {
                    auction_id,
                    time_left,
                },
            }),
            Ok(_) => {}
            Err(e) => debug!("Engine status unavailable during sync: {}", e),
        }
        out
    }

    /// Fold a store change into the replica; forwarded once logged in.
    pub fn apply_change(&mut self, event: ChangeEvent) -> Option<ServerMessage> {
        self.view.apply(&event);
        self.is_authenticated()
            .then_some(ServerMessage::Change { event })
    }

    /// The subscription dropped events; rebuild the replica from scratch.
    pub async fn resync_after_lag(&mut self, dropped: u64) -> Vec<ServerMessage> {
        warn!("Session fell behind by {} change events; resynchronising", dropped);
        if !self.is_authenticated() {
            return Vec::new();
        }
        self.sync().await
    }

    pub fn forward_notice(&self, notice: EngineNotice) -> Option<ServerMessage> {
        self.is_authenticated()
            .then_some(ServerMessage::Notice { notice })
    }
}

fn not_logged_in() -> ServerMessage {
    ServerMessage::error("auth", "log in first")
}

fn reply<T>(action: &str, result: Result<T, AuctionError>) -> Vec<ServerMessage> {
    match result {
        Ok(_) => vec![ServerMessage::ack(action)],
        Err(e) => vec![ServerMessage::from(&e)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use snakebid_core::money::Money;
    use snakebid_core::rules::AuctionRules;
    use snakebid_core::store::{ChangeKind, Record, SqliteStore};

    async fn context() -> ServerContext {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(":memory:").unwrap());
        let (engine, _task) = snakebid_app::spawn(
            store.clone(),
            AuctionRules::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let credentials = CredentialsConfig {
            admin_secret: Some("root".into()),
            team_secrets: HashMap::from([
                ("teamA".to_string(), "a-secret".to_string()),
                ("teamB".to_string(), "b-secret".to_string()),
            ]),
        };
        ServerContext::new(engine, store, Arc::new(credentials))
    }

    fn login(team: &str, secret: &str) -> ClientMessage {
        ClientMessage::Login {
            team_id: TeamId::from(team),
            secret: secret.into(),
        }
    }

    #[tokio::test]
    async fn login_sends_welcome_and_snapshot() {
        let mut session = Session::new(context().await);
        let replies = session.handle(login("teamA", "a-secret")).await;

        assert_eq!(
            replies[0],
            ServerMessage::Welcome {
                role: Role::Team {
                    team_id: TeamId::from("teamA")
                }
            }
        );
        match &replies[1] {
            ServerMessage::Snapshot { view } => assert_eq!(view.teams.len(), 5),
            other => panic!("expected a snapshot, got {other:?}"),
        }
        assert_eq!(replies.len(), 2);
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn wrong_secret_is_refused() {
        let mut session = Session::new(context().await);
        let replies = session.handle(login("teamA", "b-secret")).await;
        assert_eq!(
            replies,
            vec![ServerMessage::error("auth", "invalid team or secret")]
        );
        // Teams without a configured secret cannot log in at all.
        let replies = session.handle(login("teamC", "")).await;
        assert!(matches!(&replies[0], ServerMessage::Error { kind, .. } if kind == "auth"));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn actions_require_login() {
        let mut session = Session::new(context().await);
        let replies = session
            .handle(ClientMessage::Nominate {
                player_name: "Player X".into(),
                base_price: Money::from_units(5),
            })
            .await;
        assert_eq!(replies, vec![not_logged_in()]);
        assert_eq!(session.handle(ClientMessage::Sync).await, vec![not_logged_in()]);
    }

    #[tokio::test]
    async fn team_actions_reach_the_engine() {
        let ctx = context().await;
        let mut a = Session::new(ctx.clone());
        let mut b = Session::new(ctx.clone());
        a.handle(login("teamA", "a-secret")).await;
        b.handle(login("teamB", "b-secret")).await;

        let replies = a
            .handle(ClientMessage::Nominate {
                player_name: "Player X".into(),
                base_price: Money::from_units(5),
            })
            .await;
        assert_eq!(replies, vec![ServerMessage::ack("NOMINATE")]);

        let auction_id = ctx.store.active_auction().await.unwrap().unwrap().id;
        let replies = a
            .handle(ClientMessage::Bid {
                auction_id,
                increment: Money::from_units(1),
            })
            .await;
        assert!(matches!(
            &replies[0],
            ServerMessage::Error { kind, .. } if kind == "rule_violation"
        ));

        let replies = b
            .handle(ClientMessage::Bid {
                auction_id,
                increment: Money::from_units(1),
            })
            .await;
        assert_eq!(replies, vec![ServerMessage::ack("BID")]);
        let auction = ctx.store.active_auction().await.unwrap().unwrap();
        assert_eq!(auction.current_bid, Money::from_units(6));
    }

    #[tokio::test]
    async fn sync_reports_countdown() {
        let ctx = context().await;
        let mut a = Session::new(ctx.clone());
        a.handle(login("teamA", "a-secret")).await;
        a.handle(ClientMessage::Nominate {
            player_name: "Player X".into(),
            base_price: Money::from_units(5),
        })
        .await;

        let replies = a.handle(ClientMessage::Sync).await;
        assert!(replies.iter().any(|m| matches!(
            m,
            ServerMessage::Notice {
                notice: EngineNotice::CountdownSync { .. }
            }
        )));
        assert!(a.view().auction.is_some());
    }

    #[tokio::test]
    async fn only_admin_may_reset() {
        let ctx = context().await;
        let mut team = Session::new(ctx.clone());
        team.handle(login("teamA", "a-secret")).await;
        let replies = team.handle(ClientMessage::Reset).await;
        assert!(matches!(&replies[0], ServerMessage::Error { kind, .. } if kind == "auth"));

        let mut admin = Session::new(ctx);
        let replies = admin
            .handle(ClientMessage::AdminLogin {
                secret: "root".into(),
            })
            .await;
        assert_eq!(replies[0], ServerMessage::Welcome { role: Role::Admin });
        assert_eq!(
            admin.handle(ClientMessage::Reset).await,
            vec![ServerMessage::ack("RESET")]
        );

        // An administrator has no team to act for.
        let replies = admin
            .handle(ClientMessage::Pass {
                auction_id: snakebid_core::auction::AuctionId(1),
            })
            .await;
        assert!(matches!(&replies[0], ServerMessage::Error { kind, .. } if kind == "auth"));
    }

    #[tokio::test]
    async fn changes_are_forwarded_only_after_login() {
        let ctx = context().await;
        let mut session = Session::new(ctx.clone());
        let team = ctx.store.team(&TeamId::from("teamA")).await.unwrap().unwrap();
        let event = ChangeEvent::new(ChangeKind::Update, Record::Team(team));

        assert_eq!(session.apply_change(event.clone()), None);
        assert_eq!(session.forward_notice(EngineNotice::Reset), None);

        session.handle(login("teamA", "a-secret")).await;
        assert_eq!(
            session.apply_change(event.clone()),
            Some(ServerMessage::Change { event })
        );
        assert!(session.forward_notice(EngineNotice::Reset).is_some());
    }
}
