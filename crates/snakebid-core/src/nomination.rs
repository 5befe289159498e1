// Nomination validation and the FIFO nomination queue record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auction::{reserved_for, ActiveAuction};
use crate::draft_order::DraftState;
use crate::error::{AuctionError, RuleViolation, ValidationError};
use crate::money::Money;
use crate::rules::AuctionRules;
use crate::team::{Team, TeamId};

/// A player waiting in the queue to be auctioned. The queue is drained in
/// `(created_at, id)` order; `id` becomes the auction id when it opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedNomination {
    pub id: i64,
    pub player_name: String,
    pub base_price: Money,
    pub nominated_by: TeamId,
    pub created_at: DateTime<Utc>,
}

/// A nomination that passed validation and is ready to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNomination {
    pub player_name: String,
    pub base_price: Money,
    pub nominated_by: TeamId,
    /// The turn this nomination consumes.
    pub turn: DraftState,
    /// The turn after it.
    pub next_turn: DraftState,
}

/// Everything nomination validation needs to look at.
pub struct NominationContext<'a> {
    pub rules: &'a AuctionRules,
    pub draft: DraftState,
    pub teams: &'a [Team],
    pub queue: &'a [QueuedNomination],
    pub active: Option<&'a ActiveAuction>,
}

impl NominationContext<'_> {
    fn all_rosters_full(&self) -> bool {
        !self.teams.is_empty()
            && self
                .teams
                .iter()
                .all(|t| t.is_full(self.rules.max_roster_size))
    }

    fn is_taken(&self, player_name: &str) -> bool {
        self.teams.iter().any(|t| t.owns_player(player_name))
            || self
                .queue
                .iter()
                .map(|n| n.player_name.as_str())
                .chain(self.active.map(|a| a.player_name.as_str()))
                .any(|p| p.eq_ignore_ascii_case(player_name))
    }

    /// Validate a nomination request and compute the turn that follows it.
    pub fn validate(
        &self,
        player_name: &str,
        base_price: Money,
        nominator: &TeamId,
    ) -> Result<NewNomination, AuctionError> {
        let player_name = player_name.trim();
        if player_name.is_empty() {
            return Err(ValidationError::EmptyPlayerName.into());
        }

        let rules = self.rules;
        if base_price < rules.min_base_price || base_price > rules.max_base_price {
            return Err(ValidationError::BasePriceOutOfRange {
                min: rules.min_base_price,
                max: rules.max_base_price,
                got: base_price,
            }
            .into());
        }

        let Some(team) = self.teams.iter().find(|t| &t.id == nominator) else {
            return Err(ValidationError::UnknownTeam(nominator.clone()).into());
        };

        if self.all_rosters_full() {
            return Err(RuleViolation::DraftComplete.into());
        }

        let order = rules.team_order();
        let current = self
            .draft
            .current_nominator(&order)
            .ok_or_else(|| {
                AuctionError::NotFound(format!(
                    "no nominator at index {} of round {}",
                    self.draft.nominator_index, self.draft.round
                ))
            })?;
        if current != nominator {
            return Err(ValidationError::NotYourTurn {
                current: current.clone(),
            }
            .into());
        }

        let reserved = reserved_for(nominator, self.queue, self.active);
        if team.open_slots(rules.max_roster_size, reserved) == 0 {
            return Err(RuleViolation::RosterFull.into());
        }

        // An unbid nomination is awarded to the nominator at base price.
        let max_allowed = team.headroom(rules.max_roster_size, reserved);
        if base_price > max_allowed {
            return Err(RuleViolation::InsufficientHeadroom {
                attempted: base_price,
                max_allowed,
            }
            .into());
        }

        if self.is_taken(player_name) {
            return Err(ValidationError::DuplicatePlayer(player_name.to_string()).into());
        }

        Ok(NewNomination {
            player_name: player_name.to_string(),
            base_price,
            nominated_by: nominator.clone(),
            turn: self.draft,
            next_turn: self.draft.advance(order.len()),
        })
    }
}
