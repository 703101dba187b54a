//! Authentication validator
//!
//! Implements FTP user authentication against the user table loaded from
//! configuration. The table is immutable once built and shared across
//! sessions behind an `Arc`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::credentials::{ANONYMOUS_NAMES, User};
use super::Permissions;
use crate::config::ServerConfig;
use crate::error::AuthError;

/// Performs basic input sanitation to check for malicious or malformed usernames/passwords.
fn is_valid_input(input: &str, max_length: usize) -> bool {
    !input.trim().is_empty() && input.len() <= max_length && !input.contains(['\r', '\n', '\0'])
}

const MAX_CREDENTIAL_LENGTH: usize = 128;

#[derive(Debug, Default)]
pub struct Authorizer {
    users: HashMap<String, Arc<User>>,
    anonymous: Option<Arc<User>>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the user table described by the configuration.
    ///
    /// Users without an explicit home directory are rooted at `server_root`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut authorizer = Self::new();
        for entry in &config.users {
            let home = entry
                .home
                .clone()
                .unwrap_or_else(|| config.server_root.clone());
            authorizer.add_user(User::new(
                entry.username.clone(),
                entry.password.clone(),
                home,
                entry.permissions,
            ));
        }

        if config.anonymous.enabled {
            let home = config
                .anonymous
                .home
                .clone()
                .unwrap_or_else(|| config.server_root.clone());
            let permissions = if config.anonymous.writable {
                Permissions::all()
            } else {
                Permissions::read_only()
            };
            authorizer.set_anonymous(User::anonymous(home, permissions));
        }

        authorizer
    }

    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.username().to_string(), Arc::new(user));
    }

    pub fn set_anonymous(&mut self, user: User) {
        self.anonymous = Some(Arc::new(user));
    }

    pub fn anonymous_enabled(&self) -> bool {
        self.anonymous.is_some()
    }

    /// Validates a username/secret pair and returns the matching account.
    pub fn authenticate(&self, username: &str, secret: &str) -> Result<Arc<User>, AuthError> {
        if !is_valid_input(username, MAX_CREDENTIAL_LENGTH) {
            return Err(AuthError::UnknownUser(username.to_string()));
        }

        if ANONYMOUS_NAMES.contains(&username.to_ascii_lowercase().as_str()) {
            return self
                .anonymous
                .clone()
                .ok_or_else(|| AuthError::UnknownUser(username.to_string()));
        }

        let user = self
            .users
            .get(username)
            .ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;

        if secret.len() <= MAX_CREDENTIAL_LENGTH && user.secret_matches(secret) {
            Ok(Arc::clone(user))
        } else {
            Err(AuthError::InvalidCredentials(username.to_string()))
        }
    }

    pub fn permissions_for(&self, user: &User) -> Permissions {
        user.permissions()
    }

    pub fn home_dir_for<'a>(&self, user: &'a User) -> &'a Path {
        user.home()
    }

    /// Home directory of every account, anonymous included.
    pub fn home_dirs(&self) -> impl Iterator<Item = &Path> {
        self.users
            .values()
            .chain(self.anonymous.iter())
            .map(|user| user.home())
    }
}
