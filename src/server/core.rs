use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::Authorizer;
use crate::config::ServerConfig;
use crate::error::FatalError;
use crate::events::EventSink;
use crate::protocol::responses::{SERVICE_UNAVAILABLE, format_response};
use crate::server::limits::{ConnectionLimits, ConnectionTracker, Rejection};
use crate::session::handle_client;
use crate::transfer::DataChannelManager;

const REFUSAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a session shares with the rest of the server.
pub struct ServerContext {
    pub config: ServerConfig,
    pub authorizer: Authorizer,
    pub data_channels: DataChannelManager,
    pub sink: Arc<dyn EventSink>,
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tracker: Arc<ConnectionTracker>,
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    sessions: TaskTracker,
    tracker: Arc<ConnectionTracker>,
    accept_task: JoinHandle<()>,
}

/// Binds the control socket and starts accepting clients.
///
/// The configuration is used as given; [`ServerConfig::load`] is where
/// values are validated.
pub async fn start(
    config: ServerConfig,
    sink: Arc<dyn EventSink>,
) -> Result<ServerHandle, FatalError> {
    let authorizer = Authorizer::from_config(&config);
    let server = Server::bind(config, authorizer, sink).await?;
    Ok(server.spawn())
}

impl Server {
    pub async fn bind(
        config: ServerConfig,
        authorizer: Authorizer,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, FatalError> {
        prepare_directory(&config.server_root).await?;
        info!("Server root directory: {}", config.server_root.display());
        for home in authorizer.home_dirs() {
            prepare_directory(home).await?;
        }

        let addr = config.control_socket();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("Server bound to {}", addr);
                listener
            }
            Err(source) => {
                error!("Failed to bind to {}: {}", addr, source);
                return Err(FatalError::Bind { addr, source });
            }
        };

        let tracker = Arc::new(ConnectionTracker::new(ConnectionLimits {
            max_connections: config.max_connections,
            max_connections_per_ip: config.max_connections_per_ip,
        }));
        let data_channels = DataChannelManager::new(config.data_port_range(), config.data_timeout());

        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext {
                config,
                authorizer,
                data_channels,
                sink,
            }),
            tracker,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop on its own task.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self
            .listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let cancel = CancellationToken::new();
        let sessions = TaskTracker::new();

        let limits = self.tracker.limits();
        info!(
            "Starting ferry-ftpd on {} (max {} clients, {} per address)",
            local_addr, limits.max_connections, limits.max_connections_per_ip
        );

        let tracker = Arc::clone(&self.tracker);
        let accept_task = tokio::spawn(accept_loop(self, sessions.clone(), cancel.clone()));

        ServerHandle {
            local_addr,
            cancel,
            sessions,
            tracker,
            accept_task,
        }
    }
}

async fn prepare_directory(path: &Path) -> Result<(), FatalError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| FatalError::ServerRoot {
            path: path.to_path_buf(),
            source,
        })
}

async fn accept_loop(server: Server, sessions: TaskTracker, cancel: CancellationToken) {
    let Server {
        listener,
        ctx,
        tracker,
    } = server;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => match tracker.try_acquire(peer.ip()) {
                Ok(slot) => {
                    debug!(
                        "Admitted {} ({} active, {} from this address)",
                        peer,
                        tracker.active(),
                        tracker.active_for(peer.ip())
                    );
                    sessions.spawn(handle_client(
                        stream,
                        peer,
                        Arc::clone(&ctx),
                        cancel.child_token(),
                        slot,
                    ));
                }
                Err(rejection) => {
                    sessions.spawn(refuse(stream, peer, rejection));
                }
            },
            Err(e) => {
                error!("Error accepting connection: {}", e);
                // Usually descriptor exhaustion; back off instead of spinning.
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    info!("Listener on {:?} closed", listener.local_addr().ok());
}

/// Turns away a client over the limit without creating a session.
async fn refuse(mut stream: TcpStream, peer: SocketAddr, rejection: Rejection) {
    let reason = match rejection {
        Rejection::GlobalLimit => "Too many connections, try again later",
        Rejection::PerAddressLimit => "Too many connections from your address",
    };
    warn!("Refusing {}: {:?}", peer, rejection);
    let reply = format_response(SERVICE_UNAVAILABLE, reason);
    match timeout(REFUSAL_TIMEOUT, stream.write_all(reply.as_bytes())).await {
        Ok(Ok(())) => {
            let _ = stream.shutdown().await;
        }
        Ok(Err(e)) => debug!("Could not send refusal to {}: {}", peer, e),
        Err(_) => debug!("Refusal to {} timed out", peer),
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Admission counters; limits can be changed while running.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Stops accepting, tells every session to close and waits until each
    /// has published its final events.
    pub async fn stop(self) {
        info!("Stopping server on {}", self.local_addr);
        self.cancel.cancel();
        if let Err(e) = self.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }
        self.sessions.close();
        self.sessions.wait().await;
        info!("Server on {} stopped", self.local_addr);
    }
}
