use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{FtpError, ProtocolError};
use crate::events::{Event, EventKind};
use crate::protocol::responses::{AUTH_FAILED, READY, SERVICE_UNAVAILABLE};
use crate::protocol::{Reply, parse_command};
use crate::server::core::ServerContext;
use crate::server::limits::ConnectionGuard;
use crate::session::state::Session;

/// Bound on the last reply written after the server has been stopped.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands a client may pipeline while a transfer runs; input past this
/// many maximum-length lines is dropped.
const PIPELINED_LINES: usize = 16;

/// What the control loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Continue,
    CloseConnection,
}

/// One line read from the control connection.
#[derive(Debug)]
enum ControlLine {
    Line(String),
    TooLong,
    Eof,
}

/// Drives one control connection from greeting to teardown.
pub(crate) struct SessionHandler {
    pub(super) reader: BufReader<OwnedReadHalf>,
    /// Control input read while a transfer was running, not yet parsed.
    pub(super) spilled: Vec<u8>,
    pub(super) writer: OwnedWriteHalf,
    pub(super) session: Session,
    pub(super) ctx: Arc<ServerContext>,
    pub(super) cancel: CancellationToken,
}

/// Handles an admitted client until it quits, drops, idles out or the
/// server stops.
///
/// Emits `Connect` first and `Disconnect` last; a session that ends while
/// logged in also emits `Logout` just before `Disconnect`. The admission
/// slot is released before `Disconnect` is published.
pub async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
    slot: ConnectionGuard,
) {
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to read local address for {}: {}", peer, e);
            return;
        }
    };
    let (read_half, write_half) = stream.into_split();
    let mut handler = SessionHandler {
        reader: BufReader::new(read_half),
        spilled: Vec::new(),
        writer: write_half,
        session: Session::new(peer, local),
        ctx,
        cancel,
    };

    handler.emit(EventKind::Connect);
    info!("Client {} connected", peer);

    match handler.run().await {
        Ok(()) => {}
        Err(e) => debug!("Control connection to {} failed: {}", peer, e),
    }

    let SessionHandler {
        reader,
        writer,
        mut session,
        ctx,
        ..
    } = handler;
    drop(reader);
    drop(writer);
    let user = session.close();
    drop(slot);

    if let Some(user) = user {
        ctx.sink.notify(&Event::new(
            peer,
            EventKind::Logout {
                username: user.username().to_string(),
            },
        ));
    }
    ctx.sink.notify(&Event::new(peer, EventKind::Disconnect));
    info!("Client {} disconnected", peer);
}

impl SessionHandler {
    async fn run(&mut self) -> io::Result<()> {
        let banner = self.ctx.config.banner.clone();
        self.send(Reply::new(READY, banner)).await?;

        let idle = self.ctx.config.idle_timeout();
        let max_len = self.ctx.config.max_command_length;

        loop {
            let incoming = tokio::select! {
                _ = self.cancel.cancelled() => None,
                read = timeout(idle, read_after_spill(&mut self.spilled, &mut self.reader, max_len)) => Some(read),
            };

            let line = match incoming {
                None => {
                    info!("Closing session {} for shutdown", self.session.peer());
                    let _ = self
                        .send(Reply::new(SERVICE_UNAVAILABLE, "Server shutting down"))
                        .await;
                    return Ok(());
                }
                Some(Err(_)) => {
                    info!("Session {} idle for {:?}, closing", self.session.peer(), idle);
                    let _ = self
                        .send(Reply::new(SERVICE_UNAVAILABLE, "Idle timeout, closing control connection"))
                        .await;
                    return Ok(());
                }
                Some(Ok(read)) => read?,
            };

            let line = match line {
                ControlLine::Eof => {
                    info!("Connection closed by client {}", self.session.peer());
                    return Ok(());
                }
                ControlLine::TooLong => {
                    self.send_error(&ProtocolError::CommandTooLong.into()).await?;
                    continue;
                }
                ControlLine::Line(line) => line,
            };

            if self.dispatch(&line).await? == CommandStatus::CloseConnection {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> io::Result<CommandStatus> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                debug!("Rejected command from {}: {}", self.session.peer(), e);
                self.send_error(&FtpError::from(e)).await?;
                return Ok(CommandStatus::Continue);
            }
        };
        debug!("Received from {}: {}", self.session.peer(), command);

        if !self.session.is_authenticated() && !command.allowed_before_login() {
            self.send(Reply::new(AUTH_FAILED, "Please login with USER and PASS")).await?;
            return Ok(CommandStatus::Continue);
        }

        self.handle_command(command).await
    }

    /// Writes one reply. A client that does not take it within the idle
    /// timeout is treated as gone, and a stop interrupts the write; once
    /// stopped, only a short farewell write is attempted.
    pub(super) async fn send(&mut self, reply: Reply) -> io::Result<()> {
        debug!("Sending response to client {}: {} {}", self.session.peer(), reply.code, reply.text);
        let stopping = self.cancel.is_cancelled();
        let limit = if stopping {
            FAREWELL_TIMEOUT
        } else {
            self.ctx.config.idle_timeout()
        };
        let wire = reply.to_wire();
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(wire.as_bytes()).await?;
            writer.flush().await
        };

        tokio::select! {
            biased;
            written = timeout(limit, write) => written.unwrap_or_else(|_| {
                Err(io::Error::new(io::ErrorKind::TimedOut, "client is not reading replies"))
            }),
            _ = self.cancel.cancelled(), if !stopping => {
                Err(io::Error::new(io::ErrorKind::Interrupted, "server shutting down"))
            }
        }
    }

    pub(super) async fn send_error(&mut self, err: &FtpError) -> io::Result<()> {
        match err {
            FtpError::Protocol(ProtocolError::Unrecognized(_)) => {}
            _ => warn!("Command from {} failed: {}", self.session.peer(), err),
        }
        self.send(Reply::from(err)).await
    }

    pub(super) fn emit(&self, kind: EventKind) {
        self.ctx.sink.notify(&Event::new(self.session.peer(), kind));
    }
}

/// Reads one CRLF-terminated line of at most `max_len` bytes, excluding the
/// terminator. Longer lines are consumed up to their end and reported as
/// `TooLong`.
async fn read_control_line<R>(reader: &mut R, max_len: usize) -> io::Result<ControlLine>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (max_len + 2) as u64;
    let mut buf = Vec::new();
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(ControlLine::Eof);
    }
    if buf.ends_with(b"\n") || (n as u64) < limit {
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        return Ok(ControlLine::Line(line));
    }

    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 || buf.ends_with(b"\n") {
            return Ok(ControlLine::TooLong);
        }
    }
}

/// Reads the next line from `spill` first and then from `reader`.
async fn read_after_spill<R>(
    spill: &mut Vec<u8>,
    reader: &mut R,
    max_len: usize,
) -> io::Result<ControlLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut pending: &[u8] = &spill[..];
    let line = read_control_line(&mut (&mut pending).chain(&mut *reader), max_len).await;
    let consumed = spill.len() - pending.len();
    spill.drain(..consumed);
    line
}

/// Resolves once the client closes the control connection or it fails.
/// Input arriving meanwhile is appended to `spill`, up to `limit` bytes,
/// so commands pipelined during a transfer are still answered after it.
pub(super) async fn control_closed<R>(reader: &mut R, spill: &mut Vec<u8>, limit: usize)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let n = match reader.fill_buf().await {
            Ok(buf) if !buf.is_empty() => {
                let room = limit.saturating_sub(spill.len());
                if buf.len() > room {
                    debug!("Dropping {} bytes of control input", buf.len() - room);
                }
                spill.extend_from_slice(&buf[..buf.len().min(room)]);
                buf.len()
            }
            _ => return,
        };
        reader.consume(n);
    }
}

/// Spill capacity for a given line length limit.
pub(super) fn spill_limit(max_command_length: usize) -> usize {
    (max_command_length + 2) * PIPELINED_LINES
}
