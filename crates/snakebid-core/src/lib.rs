// snakebid-core: the snake-draft auction domain.
//
// Pure rules (draft order, nomination, bid/pass authority, settlement), the
// shared store contract with its SQLite implementation, configuration and
// the client read replica.

pub mod auction;
pub mod config;
pub mod draft_order;
pub mod error;
pub mod money;
pub mod nomination;
pub mod rules;
pub mod settlement;
pub mod store;
pub mod team;
pub mod view;
