//! ferry-ftpd: an embeddable FTP server engine
//!
//! [`start`] binds the control socket and returns a [`ServerHandle`];
//! everything that happens to a client is reported to an [`EventSink`].

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;

pub use auth::Authorizer;
pub use config::ServerConfig;
pub use error::FatalError;
pub use events::{ChannelSink, Event, EventKind, EventSink, LogSink};
pub use server::{ServerHandle, start};
