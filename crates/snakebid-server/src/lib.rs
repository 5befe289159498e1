// Library root: re-exports the server modules so integration tests and the
// binary share them.

pub mod protocol;
pub mod session;
pub mod ws_server;
