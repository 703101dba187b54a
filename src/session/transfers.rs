//! LIST, RETR and STOR.
//!
//! All three consume the session's prepared data channel, announce the
//! transfer with 150 and then race the transfer against the control
//! connection and server shutdown. Once 150 has been sent, RETR and STOR
//! publish exactly one event: the completed one or the incomplete one.

use log::{info, warn};
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::auth::Permission;
use crate::error::{FtpError, TransferError};
use crate::events::EventKind;
use crate::protocol::Reply;
use crate::protocol::responses::{
    CONNECTION_CLOSED, OPENING_DATA, SERVICE_UNAVAILABLE, TRANSFER_COMPLETE,
};
use crate::session::handler::{CommandStatus, SessionHandler, control_closed, spill_limit};
use crate::storage::operations;
use crate::transfer::{
    DataChannel, Direction, PartialUpload, StreamOptions, TransferState, send_file,
};

/// How a running transfer ended.
enum TransferOutcome<T> {
    Finished(Result<T, TransferError>),
    ControlClosed,
    Shutdown,
}

/// Reply for a transfer that failed after 150. A stall once the data
/// connection is up is reported as a broken transfer, not a failed open.
fn failure_reply(err: TransferError, connected: bool) -> Reply {
    match err {
        TransferError::Timeout if connected => {
            Reply::new(CONNECTION_CLOSED, "Data connection stalled; transfer aborted")
        }
        other => Reply::from(&FtpError::from(other)),
    }
}

impl SessionHandler {
    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            buffer_size: self.ctx.config.buffer_size,
            timeout: self.ctx.config.data_timeout(),
        }
    }

    async fn run_transfer<T, F>(&mut self, transfer: F) -> TransferOutcome<T>
    where
        F: Future<Output = Result<T, TransferError>>,
    {
        let limit = spill_limit(self.ctx.config.max_command_length);
        tokio::select! {
            result = transfer => TransferOutcome::Finished(result),
            _ = control_closed(&mut self.reader, &mut self.spilled, limit) => {
                TransferOutcome::ControlClosed
            }
            _ = self.cancel.cancelled() => TransferOutcome::Shutdown,
        }
    }

    /// Takes the prepared channel, replying 425 when there is none.
    async fn take_data_channel(&mut self) -> io::Result<Option<DataChannel>> {
        match self.session.take_data_channel() {
            Some(channel) => Ok(Some(channel)),
            None => {
                self.send_error(&TransferError::NoDataChannel.into()).await?;
                Ok(None)
            }
        }
    }

    /// Sends the reply that ends a transfer and maps the outcome to the
    /// control loop's next step.
    async fn finish_transfer<T>(
        &mut self,
        outcome: TransferOutcome<T>,
        connected: bool,
    ) -> io::Result<CommandStatus> {
        match outcome {
            TransferOutcome::Finished(Ok(_)) => {
                self.send(Reply::new(TRANSFER_COMPLETE, "Transfer complete")).await?;
                Ok(CommandStatus::Continue)
            }
            TransferOutcome::Finished(Err(e)) => {
                warn!("Transfer for {} failed: {}", self.session.peer(), e);
                self.send(failure_reply(e, connected)).await?;
                Ok(CommandStatus::Continue)
            }
            TransferOutcome::ControlClosed => {
                info!("Control connection of {} closed mid-transfer", self.session.peer());
                Ok(CommandStatus::CloseConnection)
            }
            TransferOutcome::Shutdown => {
                let _ = self
                    .send(Reply::new(SERVICE_UNAVAILABLE, "Server shutting down"))
                    .await;
                Ok(CommandStatus::CloseConnection)
            }
        }
    }

    pub(super) async fn handle_cmd_list(&mut self, path: Option<String>) -> io::Result<CommandStatus> {
        let listing = match self.list_target(path.as_deref().unwrap_or(".")).await {
            Ok(listing) => listing,
            Err(e) => {
                self.send_error(&e).await?;
                return Ok(CommandStatus::Continue);
            }
        };
        let Some(channel) = self.take_data_channel().await? else {
            return Ok(CommandStatus::Continue);
        };

        self.send(Reply::new(OPENING_DATA, "Here comes the directory listing")).await?;

        let data_timeout = self.ctx.config.data_timeout();
        let mut connected = false;
        let outcome = self
            .run_transfer(async {
                let mut data = channel.open().await?;
                connected = true;
                timeout(data_timeout, data.write_all(listing.as_bytes()))
                    .await
                    .map_err(|_| TransferError::Timeout)?
                    .map_err(TransferError::ConnectionReset)?;
                data.shutdown().await.map_err(TransferError::ConnectionReset)
            })
            .await;
        self.finish_transfer(outcome, connected).await
    }

    async fn list_target(&self, target: &str) -> Result<String, FtpError> {
        let user = self.require(Permission::List)?;
        let (virtual_path, real_path) = self.resolve(&user, target).await?;
        let lines = operations::list_directory(&real_path, &virtual_path).await?;
        Ok(lines.iter().map(|line| format!("{line}\r\n")).collect())
    }

    pub(super) async fn handle_cmd_retr(&mut self, path: &str) -> io::Result<CommandStatus> {
        let prepared = async {
            let user = self.require(Permission::Read)?;
            let (virtual_path, real_path) = self.resolve(&user, path).await?;
            operations::ensure_file(&real_path, &virtual_path).await?;
            Ok::<_, FtpError>((virtual_path, real_path))
        };
        let (virtual_path, real_path) = match prepared.await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.send_error(&e).await?;
                return Ok(CommandStatus::Continue);
            }
        };
        let Some(channel) = self.take_data_channel().await? else {
            return Ok(CommandStatus::Continue);
        };

        let mut state = TransferState::new(real_path.clone(), Direction::Download);
        if let Err(e) = self
            .send(Reply::new(
                OPENING_DATA,
                format!(
                    "Opening {} mode data connection for {virtual_path}",
                    self.session.transfer_type().mode_name()
                ),
            ))
            .await
        {
            self.emit(EventKind::IncompleteSent { path: real_path });
            return Err(e);
        }

        let options = self.stream_options();
        let mut connected = false;
        let outcome = self
            .run_transfer(async {
                let mut data = channel.open().await?;
                connected = true;
                send_file(&mut data, &mut state, options).await
            })
            .await;

        match &outcome {
            TransferOutcome::Finished(Ok(bytes)) => {
                info!("Sent {} ({} bytes) to {}", virtual_path, bytes, self.session.peer());
                self.emit(EventKind::FileSent { path: real_path });
            }
            _ => {
                warn!(
                    "Download of {} to {} incomplete after {} bytes",
                    virtual_path,
                    self.session.peer(),
                    state.bytes
                );
                self.emit(EventKind::IncompleteSent { path: real_path });
            }
        }
        self.finish_transfer(outcome, connected).await
    }

    pub(super) async fn handle_cmd_stor(&mut self, path: &str) -> io::Result<CommandStatus> {
        let prepared = async {
            let user = self.require(Permission::Write)?;
            let (virtual_path, real_path) = self.resolve(&user, path).await?;
            if !self.session.has_data_channel() {
                return Err(FtpError::from(TransferError::NoDataChannel));
            }
            let upload = PartialUpload::create(&real_path, &virtual_path).await?;
            Ok::<_, FtpError>((virtual_path, real_path, upload))
        };
        let (virtual_path, real_path, mut upload) = match prepared.await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.send_error(&e).await?;
                return Ok(CommandStatus::Continue);
            }
        };
        let Some(channel) = self.take_data_channel().await? else {
            return Ok(CommandStatus::Continue);
        };

        let mut state = TransferState::new(real_path.clone(), Direction::Upload);
        if let Err(e) = self
            .send(Reply::new(
                OPENING_DATA,
                format!("Ok to send data for {virtual_path}"),
            ))
            .await
        {
            drop(upload);
            self.emit(EventKind::IncompleteReceived { path: real_path });
            return Err(e);
        }

        let options = self.stream_options();
        let mut connected = false;
        let outcome = self
            .run_transfer(async {
                let mut data = channel.open().await?;
                connected = true;
                upload.receive(&mut data, &mut state, options).await
            })
            .await;

        let outcome = match outcome {
            TransferOutcome::Finished(Ok(bytes)) => match upload.commit().await {
                Ok(()) => {
                    info!(
                        "Received {} ({} bytes) from {}",
                        virtual_path,
                        bytes,
                        self.session.peer()
                    );
                    self.emit(EventKind::FileReceived { path: real_path });
                    TransferOutcome::Finished(Ok(bytes))
                }
                Err(e) => {
                    self.emit(EventKind::IncompleteReceived { path: real_path });
                    TransferOutcome::Finished(Err(e))
                }
            },
            other => {
                // Removes the staging file before anyone hears about the failure.
                drop(upload);
                warn!(
                    "Upload of {} from {} incomplete after {} bytes",
                    virtual_path,
                    self.session.peer(),
                    state.bytes
                );
                self.emit(EventKind::IncompleteReceived { path: real_path });
                other
            }
        };
        self.finish_transfer(outcome, connected).await
    }
}
