//! Command handlers for an authenticated control connection.
//!
//! Each `handle_cmd_*` either returns the reply to send or an `FtpError`
//! that the dispatcher turns into one. LIST, RETR and STOR live in
//! `transfers` because they also drive the data channel.

use log::{info, warn};
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{Permission, User};
use crate::error::{AuthError, FtpError, ProtocolError, TransferError};
use crate::events::EventKind;
use crate::protocol::responses::{
    FILE_ACTION_OK, GOODBYE, LOGIN_SUCCESS, OK, PASSWORD_REQUIRED, PATH_CREATED,
    PENDING_FURTHER_INFO, SERVICE_UNAVAILABLE, SYSTEM_TYPE, passive_reply, quote_path,
};
use crate::protocol::{Command, Reply, TransferType};
use crate::session::handler::{CommandStatus, SessionHandler};
use crate::storage::{operations, resolve_path};

impl SessionHandler {
    /// Dispatches a parsed command to its handler and sends the reply.
    pub(super) async fn handle_command(&mut self, command: Command) -> io::Result<CommandStatus> {
        let result = match command {
            Command::QUIT => {
                self.send(Reply::new(GOODBYE, "Goodbye")).await?;
                info!("Client {} requested to quit", self.session.peer());
                return Ok(CommandStatus::CloseConnection);
            }
            Command::PASS(secret) => return self.handle_cmd_pass(&secret).await,
            Command::LIST(path) => return self.handle_cmd_list(path).await,
            Command::RETR(path) => return self.handle_cmd_retr(&path).await,
            Command::STOR(path) => return self.handle_cmd_stor(&path).await,
            Command::USER(username) => Ok(self.handle_cmd_user(username)),
            Command::PASV => self.handle_cmd_pasv().await,
            Command::PORT(target) => self.handle_cmd_port(target),
            Command::CWD(path) => self.handle_cmd_cwd(&path).await,
            Command::CDUP => self.handle_cmd_cwd("..").await,
            Command::PWD => Ok(Reply::new(
                PATH_CREATED,
                format!("{} is the current directory", quote_path(self.session.cwd())),
            )),
            Command::DELE(path) => self.handle_cmd_dele(&path).await,
            Command::MKD(path) => self.handle_cmd_mkd(&path).await,
            Command::RMD(path) => self.handle_cmd_rmd(&path).await,
            Command::RNFR(path) => self.handle_cmd_rnfr(&path).await,
            Command::RNTO(path) => self.handle_cmd_rnto(&path).await,
            Command::TYPE(transfer_type) => Ok(self.handle_cmd_type(transfer_type)),
            Command::SYST => Ok(Reply::new(SYSTEM_TYPE, "UNIX Type: L8")),
            Command::NOOP => Ok(Reply::new(OK, "NOOP ok")),
        };

        match result {
            Ok(reply) => self.send(reply).await?,
            Err(e) => self.send_error(&e).await?,
        }
        Ok(CommandStatus::Continue)
    }

    /// Returns the logged-in user if their permission set grants `permission`.
    pub(super) fn require(&self, permission: Permission) -> Result<Arc<User>, AuthError> {
        let user = self.session.user().ok_or(AuthError::NotLoggedIn)?;
        if self.ctx.authorizer.permissions_for(user).contains(permission) {
            Ok(Arc::clone(user))
        } else {
            Err(AuthError::PermissionDenied(permission))
        }
    }

    /// Resolves `target` against the session's directory inside the user's home.
    pub(super) async fn resolve(
        &self,
        user: &User,
        target: &str,
    ) -> Result<(String, PathBuf), FtpError> {
        let home = self.ctx.authorizer.home_dir_for(user);
        Ok(resolve_path(home, self.session.cwd(), target).await?)
    }

    fn handle_cmd_user(&mut self, username: String) -> Reply {
        if let Some(previous) = self.session.begin_login(username.clone()) {
            info!("User {} logged out of {}", previous.username(), self.session.peer());
            self.emit(EventKind::Logout {
                username: previous.username().to_string(),
            });
        }
        Reply::new(PASSWORD_REQUIRED, format!("Password required for {username}"))
    }

    async fn handle_cmd_pass(&mut self, secret: &str) -> io::Result<CommandStatus> {
        let Some(username) = self.session.take_pending_user() else {
            let err = ProtocolError::BadSequence("Login with USER first");
            self.send_error(&err.into()).await?;
            return Ok(CommandStatus::Continue);
        };

        match self.ctx.authorizer.authenticate(&username, secret) {
            Ok(user) => {
                info!("User {} logged in from {}", user.username(), self.session.peer());
                self.emit(EventKind::Login {
                    username: user.username().to_string(),
                });
                self.session.login(user);
                self.send(Reply::new(LOGIN_SUCCESS, "Login successful")).await?;
                Ok(CommandStatus::Continue)
            }
            Err(e) => {
                let attempts = self.session.record_failed_login();
                warn!(
                    "Failed login for {} from {} ({} of {}): {}",
                    username,
                    self.session.peer(),
                    attempts,
                    self.ctx.config.max_login_attempts,
                    e
                );
                if attempts >= self.ctx.config.max_login_attempts {
                    let err = FtpError::from(AuthError::TooManyAttempts);
                    self.send(Reply::new(SERVICE_UNAVAILABLE, err.to_string())).await?;
                    return Ok(CommandStatus::CloseConnection);
                }
                self.send(Reply::new(e.reply_code(), "Login incorrect")).await?;
                Ok(CommandStatus::Continue)
            }
        }
    }

    async fn handle_cmd_pasv(&mut self) -> Result<Reply, FtpError> {
        let local = self.session.local();
        let advertised = match self.ctx.config.passive_address {
            Some(ip) => ip,
            None => match local.ip() {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(ip) => ip
                    .to_ipv4_mapped()
                    .ok_or(TransferError::UnsupportedAddress(local))?,
            },
        };

        let (endpoint, channel) = self
            .ctx
            .data_channels
            .prepare_passive(local.ip(), advertised, self.session.peer().ip())
            .await?;
        self.session.set_data_channel(channel);
        Ok(passive_reply(endpoint))
    }

    fn handle_cmd_port(&mut self, target: SocketAddrV4) -> Result<Reply, FtpError> {
        let peer = self.session.peer();
        if IpAddr::V4(*target.ip()) != peer.ip().to_canonical() {
            warn!("PORT from {} names foreign host {}", peer, target.ip());
            return Err(ProtocolError::InvalidArgument(format!(
                "PORT address must match the control connection ({})",
                peer.ip()
            ))
            .into());
        }
        if target.port() < 1024 {
            return Err(ProtocolError::InvalidArgument(format!(
                "PORT to privileged port {} refused",
                target.port()
            ))
            .into());
        }

        let channel = self.ctx.data_channels.prepare_active(SocketAddr::V4(target));
        self.session.set_data_channel(channel);
        Ok(Reply::new(OK, "PORT command successful"))
    }

    async fn handle_cmd_cwd(&mut self, path: &str) -> Result<Reply, FtpError> {
        let user = self.require(Permission::List)?;
        let (virtual_path, real_path) = self.resolve(&user, path).await?;
        operations::ensure_directory(&real_path, &virtual_path).await?;
        self.session.set_cwd(virtual_path.clone());
        Ok(Reply::new(
            FILE_ACTION_OK,
            format!("Directory changed to {virtual_path}"),
        ))
    }

    async fn handle_cmd_dele(&mut self, path: &str) -> Result<Reply, FtpError> {
        let user = self.require(Permission::Delete)?;
        let (virtual_path, real_path) = self.resolve(&user, path).await?;
        operations::delete_file(&real_path, &virtual_path).await?;
        Ok(Reply::new(FILE_ACTION_OK, format!("Deleted {virtual_path}")))
    }

    async fn handle_cmd_mkd(&mut self, path: &str) -> Result<Reply, FtpError> {
        let user = self.require(Permission::MakeDir)?;
        let (virtual_path, real_path) = self.resolve(&user, path).await?;
        operations::make_directory(&real_path, &virtual_path).await?;
        Ok(Reply::new(
            PATH_CREATED,
            format!("{} created", quote_path(&virtual_path)),
        ))
    }

    async fn handle_cmd_rmd(&mut self, path: &str) -> Result<Reply, FtpError> {
        let user = self.require(Permission::Delete)?;
        let (virtual_path, real_path) = self.resolve(&user, path).await?;
        operations::remove_directory(&real_path, &virtual_path).await?;
        Ok(Reply::new(FILE_ACTION_OK, format!("Removed {virtual_path}")))
    }

    async fn handle_cmd_rnfr(&mut self, path: &str) -> Result<Reply, FtpError> {
        let user = self.require(Permission::Rename)?;
        let (virtual_path, real_path) = self.resolve(&user, path).await?;
        operations::ensure_exists(&real_path, &virtual_path).await?;
        self.session.set_rename_from(virtual_path, real_path);
        Ok(Reply::new(
            PENDING_FURTHER_INFO,
            "Ready for destination name",
        ))
    }

    async fn handle_cmd_rnto(&mut self, path: &str) -> Result<Reply, FtpError> {
        let user = self.require(Permission::Rename)?;
        let (from_virtual, from_real) = self
            .session
            .take_rename_from()
            .ok_or(ProtocolError::BadSequence("RNFR required first"))?;
        let (to_virtual, to_real) = self.resolve(&user, path).await?;
        operations::rename(&from_real, &to_real, &to_virtual).await?;
        info!("Renamed {} to {} for {}", from_virtual, to_virtual, user.username());
        Ok(Reply::new(FILE_ACTION_OK, "Rename successful"))
    }

    fn handle_cmd_type(&mut self, transfer_type: TransferType) -> Reply {
        self.session.set_transfer_type(transfer_type);
        Reply::new(OK, format!("Switching to {} mode", transfer_type.mode_name()))
    }
}
