//! Server core functionality
//!
//! Binds the control socket, admits clients against the connection limits
//! and hands each admitted client to its own session task.

pub mod core;
pub mod limits;

pub use core::{Server, ServerContext, ServerHandle, start};
pub use limits::{ConnectionLimits, ConnectionTracker};
