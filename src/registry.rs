//! Registry of live server connections.
//!
//! The acceptor registers every connection it hands to a task and the
//! returned `Registration` unregisters it when dropped, so a slot is freed
//! on every exit path of the connection task, panics and aborts included.

use chrono::{DateTime, TimeDelta, Utc};
use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bookkeeping for one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Utc>,
}

/// Slab-backed set of active connections with a fixed capacity.
///
/// Provides O(1) insert, lookup, and remove operations.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Slab<ConnectionInfo>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, info: ConnectionInfo) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(info))
    }

    pub fn get(&self, id: usize) -> Option<&ConnectionInfo> {
        self.connections.get(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<ConnectionInfo> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Registry shared between the acceptor and connection tasks.
#[derive(Debug, Clone)]
pub struct SharedRegistry(Arc<Mutex<ConnectionRegistry>>);

impl SharedRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self(Arc::new(Mutex::new(ConnectionRegistry::new(max_connections))))
    }

    /// Register a connection from `peer`.
    ///
    /// Returns `None` when the connection limit is reached.
    pub fn register(&self, peer: SocketAddr) -> Option<Registration> {
        let info = ConnectionInfo {
            peer,
            accepted_at: Utc::now(),
        };
        let id = self.lock().insert(info)?;
        Some(Registration {
            id,
            registry: self.clone(),
        })
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The registry stays consistent across a panic in another holder: every
    // mutation is a single slab call.
    fn lock(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard for a registered connection; unregisters on drop.
#[derive(Debug)]
pub struct Registration {
    id: usize,
    registry: SharedRegistry,
}

impl Registration {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Time since the connection was accepted.
    pub fn connected_for(&self) -> Option<TimeDelta> {
        let registry = self.registry.lock();
        let info = registry.get(self.id)?;
        Some(Utc::now() - info.accepted_at)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(self.id);
    }
}
