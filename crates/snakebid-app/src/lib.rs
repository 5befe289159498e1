// Auction lifecycle authority: one actor owns the countdown and every
// state transition, sessions talk to it through an `EngineHandle`.

pub mod countdown;
pub mod engine;
pub mod handle;
pub mod lifecycle;
pub mod notice;

pub use engine::{AuctionEngine, EngineStatus};
pub use handle::{spawn, EngineHandle};
pub use notice::EngineNotice;
