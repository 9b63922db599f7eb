//! Subscription registry implementation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::error::RegistryError;
use crate::channel::{find_match, ChannelParams, ChannelPattern, PatternError};
use crate::stream::Connection;

/// A secured pattern matched by a concrete channel name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuredMatch {
    /// The pattern string as it was secured
    pub channel: String,
    /// Parameters captured from the concrete channel name
    pub params: ChannelParams,
}

/// Bidirectional index between connections and channels
///
/// Not synchronized on its own: the owner keeps it behind a single lock so
/// that both directions are always updated together.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Live connections: uid → connection
    streams: HashMap<String, Arc<Connection>>,
    /// Subscribed channels: uid → channels
    channels_by_uid: HashMap<String, HashSet<String>>,
    /// Reverse index: channel → uids
    subscribers_by_channel: HashMap<String, HashSet<String>>,
    /// Secured channel patterns, in registration order
    secured: Vec<ChannelPattern>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with an empty channel set
    pub fn register(&mut self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let uid = connection.uid().to_string();
        if self.streams.contains_key(&uid) {
            return Err(RegistryError::DuplicateUid(uid));
        }

        self.channels_by_uid.insert(uid.clone(), HashSet::new());
        self.streams.insert(uid, connection);
        Ok(())
    }

    /// Remove a connection and all of its subscriptions
    ///
    /// Returns false if this connection was not registered. A different
    /// connection registered under the same uid is left alone.
    pub fn unregister(&mut self, connection: &Connection) -> bool {
        let uid = connection.uid();
        let is_same = self
            .streams
            .get(uid)
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), connection));

        if !is_same {
            return false;
        }

        self.streams.remove(uid);
        for channel in self.channels_by_uid.remove(uid).unwrap_or_default() {
            self.remove_subscriber(&channel, uid);
        }
        true
    }

    /// Compile and append a secured channel pattern
    pub fn secure(&mut self, pattern: &str) -> Result<(), PatternError> {
        self.secured.push(ChannelPattern::compile(pattern)?);
        Ok(())
    }

    /// The first secured pattern matching `channel`, if any
    pub fn match_secured(&self, channel: &str) -> Option<SecuredMatch> {
        find_match(channel, &self.secured).map(|(pattern, params)| SecuredMatch {
            channel: pattern.as_str().to_string(),
            params,
        })
    }

    /// Add `channel` to a connection's subscriptions
    ///
    /// Returns false if no connection is registered under `uid`.
    pub fn subscribe(&mut self, uid: &str, channel: &str) -> bool {
        let Some(channels) = self.channels_by_uid.get_mut(uid) else {
            return false;
        };

        channels.insert(channel.to_string());
        self.subscribers_by_channel
            .entry(channel.to_string())
            .or_default()
            .insert(uid.to_string());
        true
    }

    /// Remove `channel` from a connection's subscriptions
    ///
    /// Returns false if no connection is registered under `uid`; a channel
    /// that was never subscribed is not an error.
    pub fn unsubscribe(&mut self, uid: &str, channel: &str) -> bool {
        let Some(channels) = self.channels_by_uid.get_mut(uid) else {
            return false;
        };

        if channels.remove(channel) {
            self.remove_subscriber(channel, uid);
        }
        true
    }

    /// All connections subscribed to `channel`
    pub fn find_by_channel(&self, channel: &str) -> Vec<Arc<Connection>> {
        self.subscribers_by_channel
            .get(channel)
            .into_iter()
            .flatten()
            .filter_map(|uid| self.streams.get(uid))
            .cloned()
            .collect()
    }

    /// Every live connection with its subscribed channels
    pub fn all_subscriptions(&self) -> impl Iterator<Item = (&Arc<Connection>, &HashSet<String>)> {
        self.streams.iter().filter_map(|(uid, connection)| {
            self.channels_by_uid
                .get(uid)
                .map(|channels| (connection, channels))
        })
    }

    /// Channels a connection is subscribed to
    pub fn channels_of(&self, uid: &str) -> Option<&HashSet<String>> {
        self.channels_by_uid.get(uid)
    }

    /// The live connection registered under `uid`
    pub fn connection(&self, uid: &str) -> Option<&Arc<Connection>> {
        self.streams.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.streams.contains_key(uid)
    }

    /// Number of live connections
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of secured pattern entries (duplicates included)
    pub fn secured_count(&self) -> usize {
        self.secured.len()
    }

    /// Number of connections subscribed to `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers_by_channel
            .get(channel)
            .map(|uids| uids.len())
            .unwrap_or(0)
    }

    /// Number of channels with at least one subscriber
    pub fn channel_count(&self) -> usize {
        self.subscribers_by_channel.len()
    }

    fn remove_subscriber(&mut self, channel: &str, uid: &str) {
        if let Some(uids) = self.subscribers_by_channel.get_mut(channel) {
            uids.remove(uid);
            // Clean up empty channel entries
            if uids.is_empty() {
                self.subscribers_by_channel.remove(channel);
            }
        }
    }
}
