//! User accounts
//!
//! A `User` is created from configuration when the server starts and is
//! shared read-only by every session that logs in with it.

use std::fmt;
use std::path::{Path, PathBuf};

use super::Permissions;

/// Usernames that map to the anonymous account when it is enabled.
pub const ANONYMOUS_NAMES: [&str; 2] = ["anonymous", "ftp"];

pub struct User {
    username: String,
    secret: Option<String>,
    home: PathBuf,
    permissions: Permissions,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        secret: impl Into<String>,
        home: impl Into<PathBuf>,
        permissions: Permissions,
    ) -> Self {
        Self {
            username: username.into(),
            secret: Some(secret.into()),
            home: home.into(),
            permissions,
        }
    }

    /// The anonymous account accepts any secret.
    pub fn anonymous(home: impl Into<PathBuf>, permissions: Permissions) -> Self {
        Self {
            username: ANONYMOUS_NAMES[0].to_string(),
            secret: None,
            home: home.into(),
            permissions,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn is_anonymous(&self) -> bool {
        self.secret.is_none()
    }

    pub(crate) fn secret_matches(&self, candidate: &str) -> bool {
        match &self.secret {
            None => true,
            Some(secret) => secret == candidate,
        }
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("home", &self.home)
            .field("permissions", &self.permissions)
            .finish()
    }
}
