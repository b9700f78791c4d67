//! Identity -> connection registry.
//!
//! One entry per identity. Registering again for the same identity overwrites the
//! mapping and hands the displaced connection back to the caller, which decides
//! whether to close it. The registry never touches the transport itself.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{Connection, Identity};

/// Tracks the live WebSocket connection of each authenticated identity.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Identity, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `identity`, returning the displaced connection.
    pub fn set(&self, identity: Identity, connection: Connection) -> Option<Connection> {
        let previous = self.connections.insert(identity.clone(), connection);
        tracing::debug!(
            identity = %identity,
            replaced = previous.is_some(),
            connections = self.connections.len(),
            "Connection registered"
        );
        previous
    }

    /// Like `set`, but runs `on_registered` on the new entry before the entry's
    /// lock is released. Lookups of `identity` from other tasks wait until it
    /// returns. `on_registered` must not touch the registry.
    pub fn set_with(
        &self,
        identity: Identity,
        connection: Connection,
        on_registered: impl FnOnce(&Connection),
    ) -> Option<Connection> {
        let previous = match self.connections.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(connection);
                on_registered(entry.get());
                Some(previous)
            }
            Entry::Vacant(entry) => {
                let current = entry.insert(connection);
                on_registered(current.value());
                None
            }
        };
        tracing::debug!(
            identity = %identity,
            replaced = previous.is_some(),
            "Connection registered"
        );
        previous
    }

    pub fn get(&self, identity: &Identity) -> Option<Connection> {
        self.connections.get(identity).map(|entry| entry.value().clone())
    }

    pub fn has(&self, identity: &Identity) -> bool {
        self.connections.contains_key(identity)
    }

    /// Remove the entry for `identity`. No-op if absent.
    pub fn delete(&self, identity: &Identity) -> Option<Connection> {
        let removed = self.connections.remove(identity).map(|(_, conn)| conn);
        if removed.is_some() {
            tracing::debug!(identity = %identity, "Connection unregistered");
        }
        removed
    }

    /// Remove the entry for `identity` only while it still points at `connection`.
    ///
    /// A superseded connection closing late must not evict its replacement.
    pub fn delete_if_current(&self, identity: &Identity, connection: &Connection) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, current| current.same_as(connection))
            .is_some();
        if removed {
            tracing::debug!(
                identity = %identity,
                connection_id = %connection.id(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        tracing::debug!(removed = count, "Connection registry cleared");
        count
    }

    /// Snapshot of all entries. Every call starts a fresh traversal; the snapshot
    /// is unaffected by later registry changes.
    pub fn entries(&self) -> Entries {
        let snapshot: Vec<(Identity, Connection)> = self
            .connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        Entries {
            inner: snapshot.into_iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}

/// Read-only iterator over a registry snapshot.
pub struct Entries {
    inner: std::vec::IntoIter<(Identity, Connection)>,
}

impl Iterator for Entries {
    type Item = (Identity, Connection);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Entries {}
