//! Per-connection session handling
//!
//! A session owns its control connection and walks it through login,
//! commands and data transfers until the client leaves or the server stops.

mod commands;
pub mod handler;
pub mod state;
mod transfers;

pub use handler::{CommandStatus, handle_client};
pub use state::{AuthState, Session};
