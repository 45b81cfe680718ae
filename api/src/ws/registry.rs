//! Client and channel registry.
//!
//! Both maps live in one struct so that a single lock covers them: removing
//! a connection from `clients` and from every channel set, and pruning the
//! channels it leaves empty, is one step for any reader.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::connection::{Connection, ConnectionId};

/// A registered connection and its subscriptions.
#[derive(Debug)]
pub struct ClientEntry {
    /// The connection handle.
    pub conn: Connection,
    /// Channels this connection is subscribed to.
    pub subscriptions: HashSet<String>,
}

/// Authoritative hub state.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ConnectionId, ClientEntry>,
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a connection. Returns false if it was already present.
    pub fn insert(&mut self, conn: Connection) -> bool {
        let id = conn.id();
        if self.clients.contains_key(&id) {
            return false;
        }
        self.clients.insert(
            id,
            ClientEntry {
                conn,
                subscriptions: HashSet::new(),
            },
        );
        true
    }

    /// Removes a connection from `clients` and every channel set.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ClientEntry> {
        let entry = self.clients.remove(&id)?;
        for channel in &entry.subscriptions {
            if let Some(members) = self.channels.get_mut(channel) {
                members.remove(&id);
                if members.is_empty() {
                    self.channels.remove(channel);
                }
            }
        }
        Some(entry)
    }

    /// Subscribes a registered connection to `channel`.
    ///
    /// Returns `Some(true)` if newly subscribed, `Some(false)` if it already
    /// was, and `None` if the connection is not registered.
    pub fn subscribe(&mut self, id: ConnectionId, channel: &str) -> Option<bool> {
        let entry = self.clients.get_mut(&id)?;
        if !entry.subscriptions.insert(channel.to_string()) {
            return Some(false);
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(id);
        Some(true)
    }

    /// Unsubscribes a connection. Returns true if it was subscribed.
    pub fn unsubscribe(&mut self, id: ConnectionId, channel: &str) -> bool {
        let Some(entry) = self.clients.get_mut(&id) else {
            return false;
        };
        if !entry.subscriptions.remove(channel) {
            return false;
        }
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
        true
    }

    /// Returns the subscribers of `channel`.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<Connection> {
        self.channels
            .get(channel)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.clients.get(id))
                    .map(|entry| entry.conn.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every connection of `user_id`.
    #[must_use]
    pub fn connections_for_user(&self, user_id: &str) -> Vec<Connection> {
        self.clients
            .values()
            .filter(|entry| entry.conn.user_id() == user_id)
            .map(|entry| entry.conn.clone())
            .collect()
    }

    /// Returns a registered connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&ClientEntry> {
        self.clients.get(&id)
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Returns every registered connection.
    #[must_use]
    pub fn all(&self) -> Vec<Connection> {
        self.clients.values().map(|entry| entry.conn.clone()).collect()
    }

    /// Removes everything, returning the connections that were registered.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.channels.clear();
        self.clients.drain().map(|(_, entry)| entry.conn).collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Subscriber count per channel.
    #[must_use]
    pub fn channel_counts(&self) -> BTreeMap<String, usize> {
        self.channels
            .iter()
            .map(|(name, ids)| (name.clone(), ids.len()))
            .collect()
    }

    /// Returns true if no channel is empty and every member is registered
    /// with a matching subscription.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let channels_ok = self.channels.iter().all(|(name, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    self.clients
                        .get(id)
                        .is_some_and(|entry| entry.subscriptions.contains(name))
                })
        });
        let clients_ok = self.clients.iter().all(|(id, entry)| {
            entry
                .subscriptions
                .iter()
                .all(|name| self.channels.get(name).is_some_and(|ids| ids.contains(id)))
        });
        channels_ok && clients_ok
    }
}
