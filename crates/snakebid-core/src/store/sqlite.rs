// SQLite persistence for the shared auction store.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeEvent, ChangeKind, Collection, EventMask, Record, Store, Subscription};
use crate::auction::{AcceptedBid, ActiveAuction, AuctionId, BidLogEntry, BidStatus, PassRecord};
use crate::draft_order::DraftState;
use crate::error::StoreError;
use crate::money::Money;
use crate::nomination::{NewNomination, QueuedNomination};
use crate::settlement::{Award, Sale, SaleOutcome, SettlementReason};
use crate::team::{RosterEntry, Team, TeamId, TeamSeed};

/// Buffered change events per subscriber before it is reported as lagging.
const EVENT_CAPACITY: usize = 1024;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS teams (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        position    INTEGER NOT NULL UNIQUE,
        budget      INTEGER NOT NULL,
        total_spent INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS draft_state (
        slot            INTEGER PRIMARY KEY CHECK (slot = 1),
        nominator_index INTEGER NOT NULL,
        round           INTEGER NOT NULL CHECK (round >= 1)
    );

    CREATE TABLE IF NOT EXISTS nomination_queue (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        player_name  TEXT NOT NULL,
        base_price   INTEGER NOT NULL,
        nominated_by TEXT NOT NULL REFERENCES teams(id),
        created_at   TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS active_auction (
        slot         INTEGER PRIMARY KEY CHECK (slot = 1),
        id           INTEGER NOT NULL UNIQUE,
        player_name  TEXT NOT NULL,
        base_price   INTEGER NOT NULL,
        current_bid  INTEGER NOT NULL,
        leading_team TEXT REFERENCES teams(id),
        nominated_by TEXT NOT NULL REFERENCES teams(id),
        time_left    INTEGER NOT NULL,
        opened_at    TEXT NOT NULL,
        CHECK (current_bid >= base_price),
        CHECK (leading_team IS NOT NULL OR current_bid = base_price)
    );

    CREATE TABLE IF NOT EXISTS bid_log (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        auction_id INTEGER NOT NULL REFERENCES active_auction(id),
        team_id    TEXT NOT NULL REFERENCES teams(id),
        increment  INTEGER NOT NULL,
        amount     INTEGER NOT NULL,
        placed_at  TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pass_records (
        auction_id INTEGER NOT NULL REFERENCES active_auction(id),
        team_id    TEXT NOT NULL REFERENCES teams(id),
        PRIMARY KEY (auction_id, team_id)
    );

    CREATE TABLE IF NOT EXISTS sales (
        sale_number INTEGER PRIMARY KEY AUTOINCREMENT,
        auction_id  INTEGER NOT NULL UNIQUE,
        player_name TEXT NOT NULL,
        team_id     TEXT NOT NULL REFERENCES teams(id),
        price       INTEGER NOT NULL,
        outcome     TEXT NOT NULL,
        reason      TEXT NOT NULL,
        settled_at  TEXT NOT NULL
    );
";

/// SQLite-backed [`Store`].
///
/// One connection behind a mutex; every mutating call runs in its own
/// transaction and publishes its change events after the commit.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    /// Open (or create) a database at `path` and ensure all tables exist.
    /// Pass `":memory:"` for an ephemeral database (useful for tests).
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, Duration::from_secs(5))
    }

    /// Like [`SqliteStore::open`] with an explicit lock-wait timeout.
    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .context(&format!("failed to open database at {path}"))?;
        conn.busy_timeout(busy_timeout)
            .context("failed to set busy timeout")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create database schema")?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

trait SqlContext<T> {
    fn context(self, context: &str) -> Result<T, StoreError>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn context(self, context: &str) -> Result<T, StoreError> {
        self.map_err(|e| classify(context, e))
    }
}

fn classify(context: &str, e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(format!("{context}: {e}"))
        }
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(context.to_string()),
        _ => StoreError::Transport(format!("{context}: {e}")),
    }
}

fn gone(id: AuctionId) -> StoreError {
    StoreError::NotFound(format!("auction {id} is no longer active"))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Current time at the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so text order is time order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn money(row: &Row<'_>, idx: usize) -> rusqlite::Result<Money> {
    Ok(Money::from_tenths(row.get(idx)?))
}

fn team_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<TeamId> {
    Ok(TeamId::new(row.get::<_, String>(idx)?))
}

fn bad_text(idx: usize, what: &str, text: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {what} `{text}`").into(),
    )
}

fn nomination_row(row: &Row<'_>) -> rusqlite::Result<QueuedNomination> {
    Ok(QueuedNomination {
        id: row.get(0)?,
        player_name: row.get(1)?,
        base_price: money(row, 2)?,
        nominated_by: team_id(row, 3)?,
        created_at: parse_timestamp(row, 4)?,
    })
}

const NOMINATION_COLUMNS: &str = "id, player_name, base_price, nominated_by, created_at";

fn auction_row(row: &Row<'_>) -> rusqlite::Result<ActiveAuction> {
    let leading: Option<String> = row.get(4)?;
    Ok(ActiveAuction {
        id: AuctionId(row.get(0)?),
        player_name: row.get(1)?,
        base_price: money(row, 2)?,
        current_bid: money(row, 3)?,
        bid_status: match leading {
            Some(team) => BidStatus::Leading {
                team: TeamId::new(team),
            },
            None => BidStatus::NoBidsYet,
        },
        nominated_by: team_id(row, 5)?,
        time_left: row.get(6)?,
        opened_at: parse_timestamp(row, 7)?,
    })
}

const AUCTION_COLUMNS: &str =
    "id, player_name, base_price, current_bid, leading_team, nominated_by, time_left, opened_at";

fn bid_row(row: &Row<'_>) -> rusqlite::Result<BidLogEntry> {
    Ok(BidLogEntry {
        auction_id: AuctionId(row.get(0)?),
        team_id: team_id(row, 1)?,
        increment: money(row, 2)?,
        amount: money(row, 3)?,
        placed_at: parse_timestamp(row, 4)?,
    })
}

fn sale_row(row: &Row<'_>) -> rusqlite::Result<Sale> {
    let outcome: String = row.get(5)?;
    let reason: String = row.get(6)?;
    Ok(Sale {
        sale_number: row.get(0)?,
        auction_id: AuctionId(row.get(1)?),
        player_name: row.get(2)?,
        team_id: team_id(row, 3)?,
        price: money(row, 4)?,
        outcome: SaleOutcome::parse(&outcome).ok_or_else(|| bad_text(5, "outcome", &outcome))?,
        reason: SettlementReason::parse(&reason).ok_or_else(|| bad_text(6, "reason", &reason))?,
        settled_at: parse_timestamp(row, 7)?,
    })
}

const SALE_COLUMNS: &str =
    "sale_number, auction_id, player_name, team_id, price, outcome, reason, settled_at";

// ---------------------------------------------------------------------------
// Queries shared by reads and transactions
// ---------------------------------------------------------------------------

fn load_sales(conn: &Connection, team: Option<&TeamId>) -> Result<Vec<Sale>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SALE_COLUMNS} FROM sales
             WHERE ?1 IS NULL OR team_id = ?1
             ORDER BY sale_number"
        ))
        .context("failed to prepare sales query")?;
    let sales = stmt
        .query_map(params![team.map(TeamId::as_str)], sale_row)
        .context("failed to query sales")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map sale rows")?;
    Ok(sales)
}

fn load_teams(conn: &Connection, only: Option<&TeamId>) -> Result<Vec<Team>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, budget, total_spent FROM teams
             WHERE ?1 IS NULL OR id = ?1
             ORDER BY position",
        )
        .context("failed to prepare teams query")?;
    let mut teams = stmt
        .query_map(params![only.map(TeamId::as_str)], |row| {
            Ok(Team {
                id: team_id(row, 0)?,
                name: row.get(1)?,
                budget: money(row, 2)?,
                roster: Vec::new(),
                total_spent: money(row, 3)?,
            })
        })
        .context("failed to query teams")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map team rows")?;

    for sale in load_sales(conn, only)? {
        if let Some(team) = teams.iter_mut().find(|t| t.id == sale.team_id) {
            team.roster.push(RosterEntry {
                player_name: sale.player_name,
                price: sale.price,
            });
        }
    }
    Ok(teams)
}

fn load_team(conn: &Connection, id: &TeamId) -> Result<Option<Team>, StoreError> {
    Ok(load_teams(conn, Some(id))?.into_iter().next())
}

fn load_draft_state(conn: &Connection) -> Result<DraftState, StoreError> {
    conn.query_row(
        "SELECT nominator_index, round FROM draft_state WHERE slot = 1",
        [],
        |row| {
            Ok(DraftState {
                nominator_index: row.get::<_, i64>(0)? as usize,
                round: row.get(1)?,
            })
        },
    )
    .context("draft state has not been seeded")
}

fn load_queue(conn: &Connection) -> Result<Vec<QueuedNomination>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NOMINATION_COLUMNS} FROM nomination_queue ORDER BY created_at, id"
        ))
        .context("failed to prepare queue query")?;
    let queue = stmt
        .query_map([], nomination_row)
        .context("failed to query nomination queue")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map nomination rows")?;
    Ok(queue)
}

fn load_auction(conn: &Connection) -> Result<Option<ActiveAuction>, StoreError> {
    conn.query_row(
        &format!("SELECT {AUCTION_COLUMNS} FROM active_auction WHERE slot = 1"),
        [],
        auction_row,
    )
    .optional()
    .context("failed to load active auction")
}

fn load_auction_by_id(conn: &Connection, id: AuctionId) -> Result<Option<ActiveAuction>, StoreError> {
    Ok(load_auction(conn)?.filter(|a| a.id == id))
}

fn load_passes(conn: &Connection, id: AuctionId) -> Result<Vec<TeamId>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT team_id FROM pass_records WHERE auction_id = ?1 ORDER BY rowid")
        .context("failed to prepare passes query")?;
    let passes = stmt
        .query_map(params![id.0], |row| team_id(row, 0))
        .context("failed to query pass records")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map pass rows")?;
    Ok(passes)
}

fn load_bids(conn: &Connection, id: AuctionId) -> Result<Vec<BidLogEntry>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT auction_id, team_id, increment, amount, placed_at
             FROM bid_log WHERE auction_id = ?1 ORDER BY id",
        )
        .context("failed to prepare bid log query")?;
    let bids = stmt
        .query_map(params![id.0], bid_row)
        .context("failed to query bid log")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map bid rows")?;
    Ok(bids)
}

fn swap_draft_state(
    conn: &Connection,
    expected: DraftState,
    next: DraftState,
) -> Result<(), StoreError> {
    let changed = conn
        .execute(
            "UPDATE draft_state SET nominator_index = ?1, round = ?2
             WHERE slot = 1 AND nominator_index = ?3 AND round = ?4",
            params![
                next.nominator_index as i64,
                next.round,
                expected.nominator_index as i64,
                expected.round
            ],
        )
        .context("failed to advance draft state")?;
    if changed == 0 {
        return Err(StoreError::Constraint(format!(
            "draft turn moved from round {} index {}",
            expected.round, expected.nominator_index
        )));
    }
    Ok(())
}

fn insert_teams(
    conn: &Connection,
    teams: &[TeamSeed],
    initial_budget: Money,
    or_ignore: bool,
) -> Result<(), StoreError> {
    let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
    let mut stmt = conn
        .prepare(&format!(
            "{verb} INTO teams (id, name, position, budget, total_spent)
             VALUES (?1, ?2, ?3, ?4, 0)"
        ))
        .context("failed to prepare team insert")?;
    for (position, seed) in teams.iter().enumerate() {
        stmt.execute(params![
            seed.id.as_str(),
            seed.name,
            position as i64,
            initial_budget.tenths()
        ])
        .context("failed to insert team")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_seeded(
        &self,
        teams: &[TeamSeed],
        initial_budget: Money,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        insert_teams(&tx, teams, initial_budget, true)?;
        tx.execute(
            "INSERT OR IGNORE INTO draft_state (slot, nominator_index, round) VALUES (1, 0, 1)",
            [],
        )
        .context("failed to seed draft state")?;
        tx.commit().context("failed to commit seed")?;
        Ok(())
    }

    async fn teams(&self) -> Result<Vec<Team>, StoreError> {
        load_teams(&self.conn(), None)
    }

    async fn team(&self, id: &TeamId) -> Result<Option<Team>, StoreError> {
        load_team(&self.conn(), id)
    }

    async fn draft_state(&self) -> Result<DraftState, StoreError> {
        load_draft_state(&self.conn())
    }

    async fn advance_draft(
        &self,
        expected: DraftState,
        next: DraftState,
    ) -> Result<DraftState, StoreError> {
        swap_draft_state(&self.conn(), expected, next)?;
        self.publish(vec![ChangeEvent::new(
            ChangeKind::Update,
            Record::DraftState(next),
        )]);
        Ok(next)
    }

    async fn enqueue_nomination(
        &self,
        nomination: &NewNomination,
    ) -> Result<QueuedNomination, StoreError> {
        let created_at = now();
        let queued = {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin transaction")?;
            swap_draft_state(&tx, nomination.turn, nomination.next_turn)?;
            tx.execute(
                "INSERT INTO nomination_queue (player_name, base_price, nominated_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    nomination.player_name,
                    nomination.base_price.tenths(),
                    nomination.nominated_by.as_str(),
                    timestamp(created_at)
                ],
            )
            .context("failed to enqueue nomination")?;
            let id = tx.last_insert_rowid();
            tx.commit().context("failed to commit nomination")?;
            QueuedNomination {
                id,
                player_name: nomination.player_name.clone(),
                base_price: nomination.base_price,
                nominated_by: nomination.nominated_by.clone(),
                created_at,
            }
        };
        self.publish(vec![
            ChangeEvent::new(ChangeKind::Insert, Record::Nomination(queued.clone())),
            ChangeEvent::new(
                ChangeKind::Update,
                Record::DraftState(nomination.next_turn),
            ),
        ]);
        Ok(queued)
    }

    async fn queued_nominations(&self) -> Result<Vec<QueuedNomination>, StoreError> {
        load_queue(&self.conn())
    }

    async fn active_auction(&self) -> Result<Option<ActiveAuction>, StoreError> {
        load_auction(&self.conn())
    }

    async fn open_next_auction(
        &self,
        time_left: u32,
    ) -> Result<Option<ActiveAuction>, StoreError> {
        let (head, auction) = {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin transaction")?;
            let head = tx
                .query_row(
                    &format!(
                        "SELECT {NOMINATION_COLUMNS} FROM nomination_queue
                         ORDER BY created_at, id LIMIT 1"
                    ),
                    [],
                    nomination_row,
                )
                .optional()
                .context("failed to read queue head")?;
            let Some(head) = head else {
                return Ok(None);
            };

            let auction = ActiveAuction::open(&head, time_left, now());
            tx.execute(
                "INSERT INTO active_auction
                    (slot, id, player_name, base_price, current_bid, leading_team,
                     nominated_by, time_left, opened_at)
                 VALUES (1, ?1, ?2, ?3, ?3, NULL, ?4, ?5, ?6)",
                params![
                    auction.id.0,
                    auction.player_name,
                    auction.base_price.tenths(),
                    auction.nominated_by.as_str(),
                    auction.time_left,
                    timestamp(auction.opened_at)
                ],
            )
            .context("an auction is already active")?;
            tx.execute(
                "DELETE FROM nomination_queue WHERE id = ?1",
                params![head.id],
            )
            .context("failed to dequeue nomination")?;
            tx.commit().context("failed to commit auction open")?;
            (head, auction)
        };
        self.publish(vec![
            ChangeEvent::new(ChangeKind::Delete, Record::Nomination(head)),
            ChangeEvent::new(ChangeKind::Insert, Record::ActiveAuction(auction.clone())),
        ]);
        Ok(Some(auction))
    }

    async fn record_bid(&self, bid: &AcceptedBid) -> Result<ActiveAuction, StoreError> {
        let placed_at = now();
        let (auction, entry) = {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin transaction")?;

            let passed: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM pass_records WHERE auction_id = ?1 AND team_id = ?2)",
                    params![bid.auction_id.0, bid.team.as_str()],
                    |row| row.get(0),
                )
                .context("failed to check pass records")?;
            if passed {
                return Err(StoreError::Constraint(format!(
                    "{} has passed on auction {}",
                    bid.team, bid.auction_id
                )));
            }

            let changed = tx
                .execute(
                    "UPDATE active_auction
                     SET current_bid = ?1, leading_team = ?2, time_left = ?3
                     WHERE id = ?4 AND current_bid = ?5",
                    params![
                        bid.new_bid.tenths(),
                        bid.team.as_str(),
                        bid.time_left,
                        bid.auction_id.0,
                        bid.expected_bid.tenths()
                    ],
                )
                .context("failed to apply bid")?;
            if changed == 0 {
                return match load_auction_by_id(&tx, bid.auction_id)? {
                    None => Err(gone(bid.auction_id)),
                    Some(current) => Err(StoreError::Constraint(format!(
                        "stale bid on auction {}: expected {}, now {}",
                        bid.auction_id, bid.expected_bid, current.current_bid
                    ))),
                };
            }

            let entry = BidLogEntry {
                auction_id: bid.auction_id,
                team_id: bid.team.clone(),
                increment: bid.increment,
                amount: bid.new_bid,
                placed_at,
            };
            tx.execute(
                "INSERT INTO bid_log (auction_id, team_id, increment, amount, placed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.auction_id.0,
                    entry.team_id.as_str(),
                    entry.increment.tenths(),
                    entry.amount.tenths(),
                    timestamp(placed_at)
                ],
            )
            .context("failed to log bid")?;

            let auction =
                load_auction_by_id(&tx, bid.auction_id)?.ok_or_else(|| gone(bid.auction_id))?;
            tx.commit().context("failed to commit bid")?;
            (auction, entry)
        };
        self.publish(vec![
            ChangeEvent::new(ChangeKind::Update, Record::ActiveAuction(auction.clone())),
            ChangeEvent::new(ChangeKind::Insert, Record::Bid(entry)),
        ]);
        Ok(auction)
    }

    async fn record_pass(&self, pass: &PassRecord) -> Result<usize, StoreError> {
        let count = {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin transaction")?;
            let auction =
                load_auction_by_id(&tx, pass.auction_id)?.ok_or_else(|| gone(pass.auction_id))?;
            if auction.leading_bidder() == Some(&pass.team_id) {
                return Err(StoreError::Constraint(format!(
                    "{} leads auction {} and cannot pass",
                    pass.team_id, pass.auction_id
                )));
            }
            tx.execute(
                "INSERT INTO pass_records (auction_id, team_id) VALUES (?1, ?2)",
                params![pass.auction_id.0, pass.team_id.as_str()],
            )
            .context("pass already recorded")?;
            let count: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM pass_records WHERE auction_id = ?1",
                    params![pass.auction_id.0],
                    |row| row.get(0),
                )
                .context("failed to count passes")?;
            tx.commit().context("failed to commit pass")?;
            count as usize
        };
        self.publish(vec![ChangeEvent::new(
            ChangeKind::Insert,
            Record::Pass(pass.clone()),
        )]);
        Ok(count)
    }

    async fn passes(&self, auction: AuctionId) -> Result<Vec<TeamId>, StoreError> {
        load_passes(&self.conn(), auction)
    }

    async fn bid_log(&self, auction: AuctionId) -> Result<Vec<BidLogEntry>, StoreError> {
        load_bids(&self.conn(), auction)
    }

    async fn save_time_left(&self, auction: AuctionId, secs: u32) -> Result<(), StoreError> {
        let updated = {
            let conn = self.conn();
            let changed = conn
                .execute(
                    "UPDATE active_auction SET time_left = ?1 WHERE id = ?2",
                    params![secs, auction.0],
                )
                .context("failed to persist time left")?;
            if changed == 0 {
                return Err(gone(auction));
            }
            load_auction_by_id(&conn, auction)?
        };
        if let Some(updated) = updated {
            self.publish(vec![ChangeEvent::new(
                ChangeKind::Update,
                Record::ActiveAuction(updated),
            )]);
        }
        Ok(())
    }

    async fn settle(
        &self,
        auction_id: AuctionId,
        reason: SettlementReason,
    ) -> Result<Sale, StoreError> {
        let settled_at = now();
        let mut events = Vec::new();
        let sale = {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin transaction")?;

            let auction = load_auction_by_id(&tx, auction_id)?.ok_or_else(|| gone(auction_id))?;
            let award = Award::for_auction(&auction);

            // Dependents first; they reference the auction row.
            for bid in load_bids(&tx, auction_id)? {
                events.push(ChangeEvent::new(ChangeKind::Delete, Record::Bid(bid)));
            }
            for team_id in load_passes(&tx, auction_id)? {
                events.push(ChangeEvent::new(
                    ChangeKind::Delete,
                    Record::Pass(PassRecord {
                        auction_id,
                        team_id,
                    }),
                ));
            }
            tx.execute("DELETE FROM bid_log WHERE auction_id = ?1", params![auction_id.0])
                .context("failed to clear bid log")?;
            tx.execute(
                "DELETE FROM pass_records WHERE auction_id = ?1",
                params![auction_id.0],
            )
            .context("failed to clear pass records")?;
            tx.execute("DELETE FROM active_auction WHERE id = ?1", params![auction_id.0])
                .context("failed to delete auction")?;
            events.push(ChangeEvent::new(
                ChangeKind::Delete,
                Record::ActiveAuction(auction.clone()),
            ));

            let changed = tx
                .execute(
                    "UPDATE teams SET budget = budget - ?1, total_spent = total_spent + ?1
                     WHERE id = ?2",
                    params![award.price.tenths(), award.team.as_str()],
                )
                .context("failed to credit roster ledger")?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("team {}", award.team)));
            }

            tx.execute(
                "INSERT INTO sales
                    (auction_id, player_name, team_id, price, outcome, reason, settled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    auction_id.0,
                    auction.player_name,
                    award.team.as_str(),
                    award.price.tenths(),
                    award.outcome.as_str(),
                    reason.as_str(),
                    timestamp(settled_at)
                ],
            )
            .context("auction already settled")?;
            let sale = Sale {
                sale_number: tx.last_insert_rowid(),
                auction_id,
                player_name: auction.player_name.clone(),
                team_id: award.team.clone(),
                price: award.price,
                outcome: award.outcome,
                reason,
                settled_at,
            };

            let team = load_team(&tx, &award.team)?
                .ok_or_else(|| StoreError::NotFound(format!("team {}", award.team)))?;
            tx.commit().context("failed to commit settlement")?;

            events.push(ChangeEvent::new(ChangeKind::Update, Record::Team(team)));
            events.push(ChangeEvent::new(ChangeKind::Insert, Record::Sale(sale.clone())));
            sale
        };
        debug!(
            "Settlement committed: auction {} to {} for {}",
            auction_id, sale.team_id, sale.price
        );
        self.publish(events);
        Ok(sale)
    }

    async fn sales(&self) -> Result<Vec<Sale>, StoreError> {
        load_sales(&self.conn(), None)
    }

    async fn reset(&self, teams: &[TeamSeed], initial_budget: Money) -> Result<(), StoreError> {
        let mut events = Vec::new();
        {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin reset transaction")?;

            let auction = load_auction(&tx)?;
            if let Some(auction) = &auction {
                for bid in load_bids(&tx, auction.id)? {
                    events.push(ChangeEvent::new(ChangeKind::Delete, Record::Bid(bid)));
                }
                for team_id in load_passes(&tx, auction.id)? {
                    events.push(ChangeEvent::new(
                        ChangeKind::Delete,
                        Record::Pass(PassRecord {
                            auction_id: auction.id,
                            team_id,
                        }),
                    ));
                }
            }
            let old_queue = load_queue(&tx)?;
            let old_sales = load_sales(&tx, None)?;
            let old_teams = load_teams(&tx, None)?;

            for table in [
                "bid_log",
                "pass_records",
                "active_auction",
                "nomination_queue",
                "sales",
                "teams",
            ] {
                tx.execute(&format!("DELETE FROM {table}"), [])
                    .context(&format!("failed to clear {table}"))?;
            }
            insert_teams(&tx, teams, initial_budget, false)?;
            tx.execute(
                "INSERT OR REPLACE INTO draft_state (slot, nominator_index, round) VALUES (1, 0, 1)",
                [],
            )
            .context("failed to reset draft state")?;
            let new_teams = load_teams(&tx, None)?;
            tx.commit().context("failed to commit reset")?;

            events.extend(
                auction
                    .into_iter()
                    .map(|a| ChangeEvent::new(ChangeKind::Delete, Record::ActiveAuction(a))),
            );
            events.extend(
                old_queue
                    .into_iter()
                    .map(|n| ChangeEvent::new(ChangeKind::Delete, Record::Nomination(n))),
            );
            events.extend(
                old_sales
                    .into_iter()
                    .map(|s| ChangeEvent::new(ChangeKind::Delete, Record::Sale(s))),
            );
            events.extend(
                old_teams
                    .into_iter()
                    .map(|t| ChangeEvent::new(ChangeKind::Delete, Record::Team(t))),
            );
            events.extend(
                new_teams
                    .into_iter()
                    .map(|t| ChangeEvent::new(ChangeKind::Insert, Record::Team(t))),
            );
            events.push(ChangeEvent::new(
                ChangeKind::Update,
                Record::DraftState(DraftState::default()),
            ));
        }
        self.publish(events);
        Ok(())
    }

    fn subscribe(&self, collection: Option<Collection>, mask: EventMask) -> Subscription {
        Subscription::new(self.events.subscribe(), collection, mask)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
