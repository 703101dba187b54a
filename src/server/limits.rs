//! Connection admission
//!
//! Counts live sessions globally and per source address. The listener asks
//! for a slot before creating a session; the slot is released when the
//! returned guard drops at the end of the session task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A limit of 0 means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

/// Why a connection was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    GlobalLimit,
    PerAddressLimit,
}

#[derive(Debug)]
pub struct ConnectionTracker {
    counts: Arc<Mutex<Counts>>,
    max_connections: AtomicUsize,
    max_connections_per_ip: AtomicUsize,
}

fn lock(counts: &Mutex<Counts>) -> MutexGuard<'_, Counts> {
    // Counters stay consistent even if a holder panicked.
    counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionTracker {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            counts: Arc::new(Mutex::new(Counts::default())),
            max_connections: AtomicUsize::new(limits.max_connections),
            max_connections_per_ip: AtomicUsize::new(limits.max_connections_per_ip),
        }
    }

    /// Replaces the limits. Live sessions are not disconnected.
    pub fn set_limits(&self, limits: ConnectionLimits) {
        self.max_connections
            .store(limits.max_connections, Ordering::Relaxed);
        self.max_connections_per_ip
            .store(limits.max_connections_per_ip, Ordering::Relaxed);
    }

    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_connections: self.max_connections.load(Ordering::Relaxed),
            max_connections_per_ip: self.max_connections_per_ip.load(Ordering::Relaxed),
        }
    }

    /// Try to acquire a session slot for the given IP
    pub fn try_acquire(&self, ip: IpAddr) -> Result<ConnectionGuard, Rejection> {
        let limits = self.limits();
        let mut counts = lock(&self.counts);

        if limits.max_connections > 0 && counts.total >= limits.max_connections {
            return Err(Rejection::GlobalLimit);
        }
        let per_ip = counts.per_ip.get(&ip).copied().unwrap_or(0);
        if limits.max_connections_per_ip > 0 && per_ip >= limits.max_connections_per_ip {
            return Err(Rejection::PerAddressLimit);
        }

        counts.total += 1;
        *counts.per_ip.entry(ip).or_insert(0) += 1;
        Ok(ConnectionGuard {
            ip,
            counts: Arc::clone(&self.counts),
        })
    }

    pub fn active(&self) -> usize {
        lock(&self.counts).total
    }

    pub fn active_for(&self, ip: IpAddr) -> usize {
        lock(&self.counts).per_ip.get(&ip).copied().unwrap_or(0)
    }
}

/// RAII guard that releases a session slot when dropped
#[derive(Debug)]
pub struct ConnectionGuard {
    ip: IpAddr,
    counts: Arc<Mutex<Counts>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut counts = lock(&self.counts);
        counts.total = counts.total.saturating_sub(1);
        if let Some(count) = counts.per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.per_ip.remove(&self.ip);
            }
        }
    }
}
