//! Module `data_channel`
//!
//! Prepares the data connection for a session. `PASV` binds a listener from
//! the configured port range and later accepts exactly one connection from
//! the session's own peer address; `PORT` records a target that is dialled
//! when the transfer starts. A prepared channel is consumed by one transfer.

use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::error::TransferError;

/// Shared across sessions; hands out passive ports and opens channels.
#[derive(Debug)]
pub struct DataChannelManager {
    ports: RangeInclusive<u16>,
    next_offset: AtomicUsize,
    connect_timeout: Duration,
}

/// A prepared, not yet connected, data channel.
#[derive(Debug)]
pub enum DataChannel {
    Passive {
        listener: TcpListener,
        owner: IpAddr,
        timeout: Duration,
    },
    Active {
        target: SocketAddr,
        timeout: Duration,
    },
}

impl DataChannelManager {
    pub fn new(ports: RangeInclusive<u16>, connect_timeout: Duration) -> Self {
        Self {
            ports,
            next_offset: AtomicUsize::new(0),
            connect_timeout,
        }
    }

    /// Binds a passive listener on `bind_ip` and returns the endpoint to
    /// advertise in the 227 reply.
    ///
    /// Successive calls start at different offsets so concurrent sessions
    /// spread over the range instead of racing for its first port.
    pub async fn prepare_passive(
        &self,
        bind_ip: IpAddr,
        advertised_ip: Ipv4Addr,
        owner: IpAddr,
    ) -> Result<(SocketAddrV4, DataChannel), TransferError> {
        if self.ports.is_empty() {
            return Err(TransferError::NoPassivePort);
        }
        let first = *self.ports.start();
        let count = usize::from(*self.ports.end() - first) + 1;
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);

        for i in 0..count {
            let port = first + ((offset + i) % count) as u16;
            match TcpListener::bind(SocketAddr::new(bind_ip, port)).await {
                Ok(listener) => {
                    info!("Passive listener bound on {}:{} for {}", bind_ip, port, owner);
                    let endpoint = SocketAddrV4::new(advertised_ip, port);
                    let channel = DataChannel::Passive {
                        listener,
                        owner,
                        timeout: self.connect_timeout,
                    };
                    return Ok((endpoint, channel));
                }
                Err(e) => debug!("Passive port {} unavailable: {}", port, e),
            }
        }

        warn!("No free passive port in {:?}", self.ports);
        Err(TransferError::NoPassivePort)
    }

    pub fn prepare_active(&self, target: SocketAddr) -> DataChannel {
        info!("Active data channel target set to {}", target);
        DataChannel::Active {
            target,
            timeout: self.connect_timeout,
        }
    }
}

impl DataChannel {
    /// Establishes the data connection, waiting at most the configured timeout.
    pub async fn open(self) -> Result<TcpStream, TransferError> {
        match self {
            DataChannel::Passive {
                listener,
                owner,
                timeout: limit,
            } => {
                let accept = async {
                    loop {
                        let (stream, peer) = listener
                            .accept()
                            .await
                            .map_err(TransferError::ConnectionReset)?;
                        if peer.ip() == owner {
                            debug!("Data connection accepted from {}", peer);
                            return Ok::<_, TransferError>(stream);
                        }
                        // Only the session that issued PASV may use this port.
                        warn!("Rejected data connection from {} (expected {})", peer, owner);
                    }
                };
                timeout(limit, accept)
                    .await
                    .map_err(|_| TransferError::Timeout)?
            }
            DataChannel::Active {
                target,
                timeout: limit,
            } => {
                let stream = timeout(limit, TcpStream::connect(target))
                    .await
                    .map_err(|_| TransferError::Timeout)?
                    .map_err(TransferError::ConnectionReset)?;
                debug!("Connected to active data target {}", target);
                Ok(stream)
            }
        }
    }
}
