//! Session lifecycle events
//!
//! The engine reports connects, logins, transfers and disconnects to a
//! single [`EventSink`]. A UI or a test harness subscribes by
//! implementing the trait; the engine never depends on which one it is.

use log::{info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Disconnect,
    Login { username: String },
    Logout { username: String },
    FileSent { path: PathBuf },
    FileReceived { path: PathBuf },
    IncompleteSent { path: PathBuf },
    IncompleteReceived { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub peer: SocketAddr,
    pub kind: EventKind,
}

impl Event {
    pub fn new(peer: SocketAddr, kind: EventKind) -> Self {
        Self { peer, kind }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peer = self.peer;
        match &self.kind {
            EventKind::Connect => write!(f, "[FTP CONNECT] New connection [{peer}]"),
            EventKind::Disconnect => write!(f, "[FTP DISCONNECT] [{peer}] disconnected"),
            EventKind::Login { username } => {
                write!(f, "[FTP LOGIN] {username} logged in [{peer}]")
            }
            EventKind::Logout { username } => {
                write!(f, "[FTP LOGOUT] {username} logged out [{peer}]")
            }
            EventKind::FileSent { path } => {
                write!(f, "[FTP FILE SENT] <{}> => [{peer}]", path.display())
            }
            EventKind::FileReceived { path } => {
                write!(f, "[FTP FILE RECEIVED] <{}> <= [{peer}]", path.display())
            }
            EventKind::IncompleteSent { path } => {
                write!(f, "[FTP INCOMPLETE SENT FILE] <{}> => [{peer}]", path.display())
            }
            EventKind::IncompleteReceived { path } => {
                write!(f, "[FTP INCOMPLETE RECEIVED FILE] <{}> <= [{peer}]", path.display())
            }
        }
    }
}

/// Consumer of lifecycle events.
///
/// Called inline from session tasks, so implementations must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: &Event) {
        match event.kind {
            EventKind::IncompleteSent { .. } | EventKind::IncompleteReceived { .. } => {
                warn!("{event}")
            }
            _ => info!("{event}"),
        }
    }
}

/// Forwards events over an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: &Event) {
        let _ = self.tx.send(event.clone());
    }
}
