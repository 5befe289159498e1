// The active auction record and the bid/pass authority.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuctionError, RuleViolation, ValidationError};
use crate::money::Money;
use crate::nomination::QueuedNomination;
use crate::rules::AuctionRules;
use crate::team::{Reserved, Team, TeamId};

/// Identity of one auction. Equal to the id of the nomination it consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuctionId(pub i64);

impl fmt::Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether anyone has bid yet.
///
/// `current_bid == base_price` exactly while `NoBidsYet`; the first accepted
/// bid moves the auction to `Leading`, and it never moves back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BidStatus {
    NoBidsYet,
    Leading { team: TeamId },
}

/// The single auction currently running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAuction {
    pub id: AuctionId,
    pub player_name: String,
    pub base_price: Money,
    pub current_bid: Money,
    pub bid_status: BidStatus,
    pub nominated_by: TeamId,
    /// Seconds remaining as last persisted.
    pub time_left: u32,
    pub opened_at: DateTime<Utc>,
}

impl ActiveAuction {
    /// Open an auction for a dequeued nomination.
    pub fn open(nomination: &QueuedNomination, time_left: u32, opened_at: DateTime<Utc>) -> Self {
        ActiveAuction {
            id: AuctionId(nomination.id),
            player_name: nomination.player_name.clone(),
            base_price: nomination.base_price,
            current_bid: nomination.base_price,
            bid_status: BidStatus::NoBidsYet,
            nominated_by: nomination.nominated_by.clone(),
            time_left,
            opened_at,
        }
    }

    pub fn leading_bidder(&self) -> Option<&TeamId> {
        match &self.bid_status {
            BidStatus::NoBidsYet => None,
            BidStatus::Leading { team } => Some(team),
        }
    }

    pub fn has_bids(&self) -> bool {
        matches!(self.bid_status, BidStatus::Leading { .. })
    }
}

/// A team's voluntary exit from bidding on one auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    pub auction_id: AuctionId,
    pub team_id: TeamId,
}

/// Audit row for one accepted bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidLogEntry {
    pub auction_id: AuctionId,
    pub team_id: TeamId,
    pub increment: Money,
    pub amount: Money,
    pub placed_at: DateTime<Utc>,
}

/// What `team` is already committed to outside the auction being decided:
/// its queued nominations at base price plus the active auction if it would
/// currently be awarded there.
pub fn reserved_for(
    team: &TeamId,
    queue: &[QueuedNomination],
    active: Option<&ActiveAuction>,
) -> Reserved {
    let mut reserved = Reserved::default();
    for nomination in queue.iter().filter(|n| &n.nominated_by == team) {
        reserved.add(nomination.base_price);
    }
    if let Some(auction) = active {
        let awardee = auction.leading_bidder().unwrap_or(&auction.nominated_by);
        if awardee == team {
            reserved.add(auction.current_bid);
        }
    }
    reserved
}

/// A bid the authority accepted, ready to be applied with compare-and-swap
/// semantics against `expected_bid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedBid {
    pub auction_id: AuctionId,
    pub team: TeamId,
    pub increment: Money,
    /// `current_bid` the decision was made against.
    pub expected_bid: Money,
    pub new_bid: Money,
    pub time_left: u32,
}

/// Decide whether `team` may raise `auction` by `increment` right now.
///
/// `passed` are the teams holding a pass record for this auction,
/// `reserved` the bidder's commitments elsewhere (see [`reserved_for`]) and
/// `time_left` the authoritative countdown. Reserved slots only decide
/// whether the bidder has room on its roster; the price ceiling is
/// [`Team::max_allowed_bid`]. Checks run in a fixed order so the reported
/// reason is deterministic.
pub fn authorize_bid(
    rules: &AuctionRules,
    auction: &ActiveAuction,
    team: &Team,
    increment: Money,
    passed: &[TeamId],
    reserved: Reserved,
    time_left: u32,
) -> Result<AcceptedBid, AuctionError> {
    if !rules.is_allowed_increment(increment) {
        return Err(ValidationError::InvalidIncrement(increment).into());
    }
    if passed.contains(&team.id) {
        return Err(RuleViolation::AlreadyPassed.into());
    }
    if team.id == auction.nominated_by && !auction.has_bids() {
        return Err(RuleViolation::NominatorCannotOpenBidding.into());
    }
    if auction.leading_bidder() == Some(&team.id) {
        return Err(RuleViolation::AlreadyLeading.into());
    }
    if team.open_slots(rules.max_roster_size, reserved) == 0 {
        return Err(RuleViolation::RosterFull.into());
    }

    let new_bid = auction.current_bid + increment;
    let max_allowed = team.max_allowed_bid(rules.max_roster_size);
    if new_bid > max_allowed {
        return Err(RuleViolation::InsufficientHeadroom {
            attempted: new_bid,
            max_allowed,
        }
        .into());
    }

    Ok(AcceptedBid {
        auction_id: auction.id,
        team: team.id.clone(),
        increment,
        expected_bid: auction.current_bid,
        new_bid,
        time_left: time_left.max(rules.bid_extension_secs),
    })
}

/// Decide whether `team` may pass on `auction` right now.
pub fn authorize_pass(
    auction: &ActiveAuction,
    team: &TeamId,
    passed: &[TeamId],
) -> Result<PassRecord, AuctionError> {
    if passed.contains(team) {
        return Err(RuleViolation::AlreadyPassed.into());
    }
    if team == &auction.nominated_by && !auction.has_bids() {
        return Err(RuleViolation::NominatorMustWaitForBid.into());
    }
    if auction.leading_bidder() == Some(team) {
        return Err(RuleViolation::LeaderCannotPass.into());
    }
    Ok(PassRecord {
        auction_id: auction.id,
        team_id: team.clone(),
    })
}

/// Apply an accepted bid to an in-memory auction.
pub fn apply_bid(auction: &mut ActiveAuction, bid: &AcceptedBid) {
    auction.current_bid = bid.new_bid;
    auction.bid_status = BidStatus::Leading {
        team: bid.team.clone(),
    };
    auction.time_left = bid.time_left;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AuctionRules {
        AuctionRules::default()
    }

    fn teams(rules: &AuctionRules) -> Vec<Team> {
        rules
            .teams
            .iter()
            .map(|s| Team::fresh(s, rules.initial_budget))
            .collect()
    }

    fn auction_by_a() -> ActiveAuction {
        let nomination = QueuedNomination {
            id: 1,
            player_name: "Player X".into(),
            base_price: Money::from_units(5),
            nominated_by: TeamId::from("teamA"),
            created_at: Utc::now(),
        };
        ActiveAuction::open(&nomination, 60, Utc::now())
    }

    fn bid(
        rules: &AuctionRules,
        auction: &mut ActiveAuction,
        team: &Team,
        units: i64,
        passed: &[TeamId],
    ) -> Result<AcceptedBid, AuctionError> {
        let accepted = authorize_bid(
            rules,
            auction,
            team,
            Money::from_units(units),
            passed,
            Reserved::default(),
            auction.time_left,
        )?;
        apply_bid(auction, &accepted);
        Ok(accepted)
    }

    #[test]
    fn opened_auction_starts_at_base_price() {
        let auction = auction_by_a();
        assert_eq!(auction.current_bid, Money::from_units(5));
        assert_eq!(auction.bid_status, BidStatus::NoBidsYet);
        assert_eq!(auction.time_left, 60);
        assert_eq!(auction.id, AuctionId(1));
    }

    #[test]
    fn nominator_cannot_bid_first() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();
        let err = bid(&rules, &mut auction, &teams[0], 1, &[]).unwrap_err();
        assert_eq!(err, RuleViolation::NominatorCannotOpenBidding.into());
        assert_eq!(auction.current_bid, Money::from_units(5));
    }

    #[test]
    fn bids_raise_price_and_leader() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();

        let first = bid(&rules, &mut auction, &teams[1], 1, &[]).unwrap();
        assert_eq!(first.new_bid, Money::from_units(6));
        assert_eq!(first.expected_bid, Money::from_units(5));
        assert_eq!(auction.leading_bidder(), Some(&TeamId::from("teamB")));
        assert_eq!(auction.time_left, 60);

        bid(&rules, &mut auction, &teams[2], 2, &[]).unwrap();
        assert_eq!(auction.current_bid, Money::from_units(8));
        assert_eq!(auction.leading_bidder(), Some(&TeamId::from("teamC")));

        // Once someone else has bid, the nominator may join.
        bid(&rules, &mut auction, &teams[0], 1, &[]).unwrap();
        assert_eq!(auction.leading_bidder(), Some(&TeamId::from("teamA")));
    }

    #[test]
    fn leader_cannot_outbid_itself() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();
        bid(&rules, &mut auction, &teams[1], 1, &[]).unwrap();
        let err = bid(&rules, &mut auction, &teams[1], 1, &[]).unwrap_err();
        assert_eq!(err, RuleViolation::AlreadyLeading.into());
    }

    #[test]
    fn passed_team_cannot_bid() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();
        let passed = vec![TeamId::from("teamD")];
        let err = bid(&rules, &mut auction, &teams[3], 1, &passed).unwrap_err();
        assert_eq!(err, RuleViolation::AlreadyPassed.into());
    }

    #[test]
    fn disallowed_increment_rejected() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();
        let err = bid(&rules, &mut auction, &teams[1], 3, &[]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidIncrement(Money::from_units(3)).into()
        );
    }

    #[test]
    fn bid_beyond_headroom_rejected() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();
        // Fresh team: max allowed = 100 - 15 = 85.
        bid(&rules, &mut auction, &teams[1], 20, &[]).unwrap(); // 25
        bid(&rules, &mut auction, &teams[2], 20, &[]).unwrap(); // 45
        bid(&rules, &mut auction, &teams[1], 20, &[]).unwrap(); // 65
        bid(&rules, &mut auction, &teams[2], 20, &[]).unwrap(); // 85
        let err = bid(&rules, &mut auction, &teams[3], 1, &[]).unwrap_err();
        assert_eq!(
            err,
            RuleViolation::InsufficientHeadroom {
                attempted: Money::from_units(86),
                max_allowed: Money::from_units(85),
            }
            .into()
        );
        assert_eq!(auction.current_bid, Money::from_units(85));
    }

    #[test]
    fn full_roster_cannot_bid() {
        let rules = AuctionRules {
            max_roster_size: 1,
            ..rules()
        };
        let mut teams = teams(&rules);
        teams[1].credit_sale("Already", Money::from_units(1));
        let mut auction = auction_by_a();
        let err = bid(&rules, &mut auction, &teams[1], 1, &[]).unwrap_err();
        assert_eq!(err, RuleViolation::RosterFull.into());
    }

    #[test]
    fn bid_extends_timer_but_never_shortens() {
        let rules = rules();
        let teams = teams(&rules);
        let auction = auction_by_a();

        let one = Money::from_units(1);
        let none = Reserved::default();

        let late = authorize_bid(&rules, &auction, &teams[1], one, &[], none, 7).unwrap();
        assert_eq!(late.time_left, 30);

        let early = authorize_bid(&rules, &auction, &teams[1], one, &[], none, 45).unwrap();
        assert_eq!(early.time_left, 45);
    }

    #[test]
    fn queued_nominations_take_slots_but_not_bid_ceiling() {
        let rules = AuctionRules {
            max_roster_size: 2,
            ..rules()
        };
        let teams = teams(&rules);
        let auction = auction_by_a();
        let queued = QueuedNomination {
            id: 2,
            player_name: "Player Y".into(),
            base_price: Money::from_units(10),
            nominated_by: TeamId::from("teamB"),
            created_at: Utc::now(),
        };
        let reserved = reserved_for(&TeamId::from("teamB"), &[queued.clone()], Some(&auction));
        assert_eq!(reserved.slots, 1);
        assert_eq!(reserved.money, Money::from_units(10));

        // The queued base price does not lower the ceiling: 100 - (2 - 1).
        assert!(authorize_bid(
            &rules,
            &auction,
            &teams[1],
            Money::from_units(20),
            &[],
            reserved,
            60,
        )
        .is_ok());
        let mut pricey = auction.clone();
        pricey.current_bid = Money::from_units(80);
        pricey.bid_status = BidStatus::Leading {
            team: TeamId::from("teamC"),
        };
        let err = authorize_bid(
            &rules,
            &pricey,
            &teams[1],
            Money::from_units(20),
            &[],
            reserved,
            60,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RuleViolation::InsufficientHeadroom {
                attempted: Money::from_units(100),
                max_allowed: Money::from_units(99),
            }
            .into()
        );

        // With a roster of one, the queued nomination fills the only slot.
        let tiny = AuctionRules {
            max_roster_size: 1,
            ..rules.clone()
        };
        let err = authorize_bid(
            &tiny,
            &auction,
            &teams[1],
            Money::from_units(1),
            &[],
            reserved,
            60,
        )
        .unwrap_err();
        assert_eq!(err, RuleViolation::RosterFull.into());
    }

    #[test]
    fn active_auction_reserves_for_its_awardee() {
        let mut auction = auction_by_a();
        let nominator = reserved_for(&TeamId::from("teamA"), &[], Some(&auction));
        assert_eq!(nominator.money, Money::from_units(5));

        auction.current_bid = Money::from_units(9);
        auction.bid_status = BidStatus::Leading {
            team: TeamId::from("teamD"),
        };
        assert_eq!(
            reserved_for(&TeamId::from("teamA"), &[], Some(&auction)),
            Reserved::default()
        );
        let leader = reserved_for(&TeamId::from("teamD"), &[], Some(&auction));
        assert_eq!(leader.slots, 1);
        assert_eq!(leader.money, Money::from_units(9));
    }

    #[test]
    fn pass_rules() {
        let rules = rules();
        let teams = teams(&rules);
        let mut auction = auction_by_a();

        // Nominator may not pass before anyone bids.
        let err = authorize_pass(&auction, &TeamId::from("teamA"), &[]).unwrap_err();
        assert_eq!(err, RuleViolation::NominatorMustWaitForBid.into());

        bid(&rules, &mut auction, &teams[1], 1, &[]).unwrap();
        bid(&rules, &mut auction, &teams[2], 2, &[]).unwrap();

        // B is no longer leading and may pass; C leads and may not.
        let record = authorize_pass(&auction, &TeamId::from("teamB"), &[]).unwrap();
        assert_eq!(record.team_id, TeamId::from("teamB"));
        let err = authorize_pass(&auction, &TeamId::from("teamC"), &[]).unwrap_err();
        assert_eq!(err, RuleViolation::LeaderCannotPass.into());

        // Passing twice is rejected.
        let passed = vec![TeamId::from("teamB")];
        let err = authorize_pass(&auction, &TeamId::from("teamB"), &passed).unwrap_err();
        assert_eq!(err, RuleViolation::AlreadyPassed.into());

        // Nominator may pass once bidding has started.
        assert!(authorize_pass(&auction, &TeamId::from("teamA"), &passed).is_ok());
    }
}
