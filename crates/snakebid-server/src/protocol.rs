// JSON messages exchanged with WebSocket clients.

use serde::{Deserialize, Serialize};

use snakebid_app::EngineNotice;
use snakebid_core::auction::AuctionId;
use snakebid_core::error::AuctionError;
use snakebid_core::money::Money;
use snakebid_core::settlement::SettlementReason;
use snakebid_core::store::ChangeEvent;
use snakebid_core::team::TeamId;
use snakebid_core::view::AuctionView;

/// Requests from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Login {
        team_id: TeamId,
        secret: String,
    },
    AdminLogin {
        secret: String,
    },
    Nominate {
        player_name: String,
        base_price: Money,
    },
    Bid {
        auction_id: AuctionId,
        increment: Money,
    },
    Pass {
        auction_id: AuctionId,
    },
    RequestSettlement {
        auction_id: AuctionId,
        reason: SettlementReason,
    },
    Reset,
    /// Ask for a fresh snapshot.
    Sync,
}

impl ClientMessage {
    /// Wire name, echoed back in `ACK`.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Login { .. } => "LOGIN",
            ClientMessage::AdminLogin { .. } => "ADMIN_LOGIN",
            ClientMessage::Nominate { .. } => "NOMINATE",
            ClientMessage::Bid { .. } => "BID",
            ClientMessage::Pass { .. } => "PASS",
            ClientMessage::RequestSettlement { .. } => "REQUEST_SETTLEMENT",
            ClientMessage::Reset => "RESET",
            ClientMessage::Sync => "SYNC",
        }
    }
}

/// Who a session acts as once logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    Team { team_id: TeamId },
    Admin,
}

/// Messages to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Welcome { role: Role },
    Snapshot { view: AuctionView },
    Change { event: ChangeEvent },
    Notice { notice: EngineNotice },
    Ack { action: String },
    Error { kind: String, message: String },
}

impl ServerMessage {
    pub fn ack(action: &str) -> Self {
        ServerMessage::Ack {
            action: action.to_string(),
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl From<&AuctionError> for ServerMessage {
    fn from(e: &AuctionError) -> Self {
        ServerMessage::error(e.kind(), e.to_string())
    }
}

pub fn decode(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snakebid_core::error::RuleViolation;

    #[test]
    fn decodes_client_messages() {
        assert_eq!(
            decode(r#"{"type":"LOGIN","team_id":"teamA","secret":"s3cret"}"#).unwrap(),
            ClientMessage::Login {
                team_id: TeamId::from("teamA"),
                secret: "s3cret".into()
            }
        );
        assert_eq!(
            decode(r#"{"type":"NOMINATE","player_name":"Player X","base_price":5.0}"#).unwrap(),
            ClientMessage::Nominate {
                player_name: "Player X".into(),
                base_price: Money::from_units(5)
            }
        );
        assert_eq!(
            decode(r#"{"type":"BID","auction_id":3,"increment":0.5}"#).unwrap(),
            ClientMessage::Bid {
                auction_id: AuctionId(3),
                increment: Money::from_tenths(5)
            }
        );
        assert_eq!(
            decode(r#"{"type":"REQUEST_SETTLEMENT","auction_id":3,"reason":"TIMER_EXPIRED"}"#)
                .unwrap(),
            ClientMessage::RequestSettlement {
                auction_id: AuctionId(3),
                reason: SettlementReason::TimerExpired
            }
        );
        assert_eq!(decode(r#"{"type":"RESET"}"#).unwrap(), ClientMessage::Reset);
        assert_eq!(decode(r#"{"type":"SYNC"}"#).unwrap(), ClientMessage::Sync);
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"TELEPORT"}"#).is_err());
        assert!(decode(r#"{"type":"PASS"}"#).is_err());
        // Money is in tenths; finer amounts are not representable.
        assert!(decode(r#"{"type":"BID","auction_id":1,"increment":0.25}"#).is_err());
    }

    #[test]
    fn encodes_errors_with_kind() {
        let err = AuctionError::from(RuleViolation::LeaderCannotPass);
        let value = serde_json::to_value(ServerMessage::from(&err)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "ERROR",
                "kind": "rule_violation",
                "message": "you cannot pass while you are the leading bidder",
            })
        );
    }

    #[test]
    fn encodes_welcome_and_ack() {
        let welcome = ServerMessage::Welcome {
            role: Role::Team {
                team_id: TeamId::from("teamC"),
            },
        };
        assert_eq!(
            serde_json::to_value(&welcome).unwrap(),
            json!({"type": "WELCOME", "role": {"kind": "team", "team_id": "teamC"}})
        );
        assert_eq!(
            encode(&ServerMessage::ack("BID")).unwrap(),
            r#"{"type":"ACK","action":"BID"}"#
        );
    }
}
