// Error types shared by the domain rules, the store and the engine.

use thiserror::Error;

use crate::auction::AuctionId;
use crate::money::Money;
use crate::team::TeamId;

/// Bad input from the acting user. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("player name must not be empty")]
    EmptyPlayerName,

    #[error("starting price must be between {min} and {max}, got {got}")]
    BasePriceOutOfRange { min: Money, max: Money, got: Money },

    #[error("it is not your turn to nominate (current nominator: {current})")]
    NotYourTurn { current: TeamId },

    #[error("unknown team `{0}`")]
    UnknownTeam(TeamId),

    #[error("{0} has already been sold or nominated")]
    DuplicatePlayer(String),

    #[error("bid increment {0} is not one of the allowed increments")]
    InvalidIncrement(Money),
}

/// A bid, pass or nomination rejected by the auction rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    #[error("no auction is open for bidding")]
    AuctionNotOpen,

    #[error("passed teams cannot bid on this player")]
    AlreadyPassed,

    #[error("as the nominator, you cannot bid until someone else places a bid first")]
    NominatorCannotOpenBidding,

    #[error("as the nominator, you cannot pass until someone places a bid")]
    NominatorMustWaitForBid,

    #[error("you are already the leading bidder")]
    AlreadyLeading,

    #[error("you cannot pass while you are the leading bidder")]
    LeaderCannotPass,

    #[error("cannot bid {attempted}: maximum allowed is {max_allowed}")]
    InsufficientHeadroom { attempted: Money, max_allowed: Money },

    #[error("your roster is already full")]
    RosterFull,

    #[error("every roster is full; the draft is complete")]
    DraftComplete,

    #[error("the auction timer still has {remaining}s remaining")]
    TimerStillRunning { remaining: u32 },

    #[error("only {passed} of the {required} required teams have passed")]
    PassesOutstanding { passed: usize, required: usize },
}

/// Failures reported by a [`crate::store::Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Uniqueness / at-most-one / compare-and-swap precondition violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store could not complete the operation (I/O, timeout).
    #[error("store unavailable: {0}")]
    Transport(String),
}

/// Every way an auction operation can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuctionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Rule(#[from] RuleViolation),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl AuctionError {
    pub fn auction_gone(id: AuctionId) -> Self {
        AuctionError::NotFound(format!("auction {id} is no longer active"))
    }

    /// Constraint and not-found outcomes are what the loser of a creation or
    /// settlement race observes.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, AuctionError::Constraint(_) | AuctionError::NotFound(_))
    }

    /// Stable, machine-readable error category.
    pub fn kind(&self) -> &'static str {
        match self {
            AuctionError::Validation(_) => "validation",
            AuctionError::Rule(_) => "rule_violation",
            AuctionError::Constraint(_) => "constraint",
            AuctionError::NotFound(_) => "not_found",
            AuctionError::Transport(_) => "transport",
        }
    }
}

impl From<StoreError> for AuctionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Constraint(m) => AuctionError::Constraint(m),
            StoreError::NotFound(m) => AuctionError::NotFound(m),
            StoreError::Transport(m) => AuctionError::Transport(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_messages_are_specific() {
        let err = AuctionError::from(RuleViolation::InsufficientHeadroom {
            attempted: Money::from_units(90),
            max_allowed: Money::from_units(85),
        });
        assert_eq!(err.to_string(), "cannot bid 90.0: maximum allowed is 85.0");
        assert_eq!(err.kind(), "rule_violation");
    }

    #[test]
    fn store_errors_keep_their_category() {
        let err: AuctionError = StoreError::NotFound("auction 3".into()).into();
        assert!(err.is_benign_race());
        let err: AuctionError = StoreError::Transport("disk I/O error".into()).into();
        assert!(!err.is_benign_race());
        assert_eq!(err.kind(), "transport");
    }
}
