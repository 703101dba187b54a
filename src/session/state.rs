//! Module `state`
//!
//! Defines the `Session` struct: everything the server remembers about one
//! control connection between commands.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::User;
use crate::protocol::TransferType;
use crate::transfer::DataChannel;

/// Authentication state of a session.
#[derive(Debug)]
pub enum AuthState {
    Unauthenticated { pending_user: Option<String> },
    Authenticated(Arc<User>),
    Closed,
}

/// Represents the state of a connected FTP client.
///
/// The working directory is a virtual path rooted at the user's home.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    local: SocketAddr,
    auth: AuthState,
    cwd: String,
    data_channel: Option<DataChannel>,
    rename_from: Option<(String, PathBuf)>,
    failed_logins: u32,
    transfer_type: TransferType,
}

impl Session {
    pub fn new(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            peer,
            local,
            auth: AuthState::Unauthenticated { pending_user: None },
            cwd: "/".to_string(),
            data_channel: None,
            rename_from: None,
            failed_logins: 0,
            transfer_type: TransferType::default(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn user(&self) -> Option<&Arc<User>> {
        match &self.auth {
            AuthState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.auth, AuthState::Closed)
    }

    /// Records the USER argument. Returns the previously logged-in user, if any.
    pub fn begin_login(&mut self, username: String) -> Option<Arc<User>> {
        let previous = self.logout();
        self.auth = AuthState::Unauthenticated {
            pending_user: Some(username),
        };
        previous
    }

    /// Takes the username recorded by USER; PASS consumes it either way.
    pub fn take_pending_user(&mut self) -> Option<String> {
        match &mut self.auth {
            AuthState::Unauthenticated { pending_user } => pending_user.take(),
            _ => None,
        }
    }

    pub fn login(&mut self, user: Arc<User>) {
        self.auth = AuthState::Authenticated(user);
        self.failed_logins = 0;
        self.cwd = "/".to_string();
    }

    /// Returns the number of consecutive failures so far.
    pub fn record_failed_login(&mut self) -> u32 {
        self.failed_logins += 1;
        self.failed_logins
    }

    /// Resets the session to unauthenticated, clearing all per-user state.
    pub fn logout(&mut self) -> Option<Arc<User>> {
        let previous = match std::mem::replace(
            &mut self.auth,
            AuthState::Unauthenticated { pending_user: None },
        ) {
            AuthState::Authenticated(user) => Some(user),
            other => {
                self.auth = other;
                None
            }
        };
        self.cwd = "/".to_string();
        self.data_channel = None;
        self.rename_from = None;
        previous
    }

    /// Final transition; releases the data channel.
    pub fn close(&mut self) -> Option<Arc<User>> {
        let previous = self.logout();
        self.auth = AuthState::Closed;
        previous
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: String) {
        self.cwd = cwd;
    }

    pub fn has_data_channel(&self) -> bool {
        self.data_channel.is_some()
    }

    /// Replaces any previously prepared channel.
    pub fn set_data_channel(&mut self, channel: DataChannel) {
        self.data_channel = Some(channel);
    }

    pub fn take_data_channel(&mut self) -> Option<DataChannel> {
        self.data_channel.take()
    }

    pub fn set_rename_from(&mut self, virtual_path: String, real_path: PathBuf) {
        self.rename_from = Some((virtual_path, real_path));
    }

    pub fn take_rename_from(&mut self) -> Option<(String, PathBuf)> {
        self.rename_from.take()
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn set_transfer_type(&mut self, transfer_type: TransferType) {
        self.transfer_type = transfer_type;
    }
}
