//! Channel registry and fan-out.
//!
//! The broker maps channel names to the delivery queues of subscribed
//! sessions. Publishing snapshots the subscriber set and pushes onto each
//! queue outside the registry lock. Queues are bounded: a subscriber whose
//! queue is full misses the delivery instead of stalling the publisher.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use timecast_protocol::ServerMessage;

/// Identifier of a connected session.
pub type SessionId = u64;

/// Sending half of a session's outbound queue.
pub type DeliverySender = mpsc::Sender<ServerMessage>;

/// Receiving half of a session's outbound queue.
pub type DeliveryReceiver = mpsc::Receiver<ServerMessage>;

/// Thread-safe channel → subscribers registry.
#[derive(Debug, Default)]
pub struct ChannelBroker {
    channels: DashMap<String, HashMap<SessionId, DeliverySender>>,
    memberships: DashMap<SessionId, HashSet<String>>,
}

impl ChannelBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session` to `channel`, creating the channel if needed.
    ///
    /// Returns false if the session was already subscribed.
    pub fn subscribe(&self, channel: &str, session: SessionId, queue: DeliverySender) -> bool {
        let added = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(session, queue)
            .is_none();
        self.memberships
            .entry(session)
            .or_default()
            .insert(channel.to_string());

        debug!(session_id = session, channel, added, "Subscribed");
        added
    }

    /// Removes `session` from `channel`.
    ///
    /// Returns false if the session was not subscribed. The channel is
    /// dropped from the registry once its last subscriber leaves.
    pub fn unsubscribe(&self, channel: &str, session: SessionId) -> bool {
        let removed = self.remove_subscriber(channel, session);

        if let Some(mut joined) = self.memberships.get_mut(&session) {
            joined.remove(channel);
        }
        self.memberships.remove_if(&session, |_, joined| joined.is_empty());

        debug!(session_id = session, channel, removed, "Unsubscribed");
        removed
    }

    /// Removes `session` from every channel it joined.
    ///
    /// Returns the number of channels left.
    pub fn unsubscribe_all(&self, session: SessionId) -> usize {
        let Some((_, joined)) = self.memberships.remove(&session) else {
            return 0;
        };

        let count = joined
            .iter()
            .filter(|channel| self.remove_subscriber(channel, session))
            .count();

        debug!(session_id = session, channels = count, "Left all channels");
        count
    }

    fn remove_subscriber(&self, channel: &str, session: SessionId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut subscribers) => subscribers.remove(&session).is_some(),
            None => false,
        };
        if removed {
            self.channels
                .remove_if(channel, |_, subscribers| subscribers.is_empty());
        }
        removed
    }

    /// Pushes `message` onto the queue of every current subscriber of
    /// `channel`.
    ///
    /// Returns how many queues accepted it. A channel without subscribers
    /// drops the message silently; a full or closed queue is skipped.
    pub fn publish(&self, channel: &str, message: ServerMessage) -> usize {
        let targets: Vec<(SessionId, DeliverySender)> = match self.channels.get(channel) {
            Some(subscribers) => subscribers
                .iter()
                .map(|(id, queue)| (*id, queue.clone()))
                .collect(),
            None => {
                trace!(channel, "Publish to channel without subscribers");
                return 0;
            }
        };

        let mut delivered = 0;
        for (session, queue) in targets {
            match queue.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!(
                    session_id = session,
                    channel,
                    capacity = queue.max_capacity(),
                    "Subscriber queue full, dropping delivery"
                ),
                Err(TrySendError::Closed(_)) => debug!(
                    session_id = session,
                    channel, "Subscriber queue closed, skipping"
                ),
            }
        }
        delivered
    }

    /// Names of channels with at least one subscriber, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of subscribers of `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |s| s.len())
    }

    /// Channels `session` is subscribed to, sorted.
    pub fn channels_of(&self, session: SessionId) -> Vec<String> {
        let mut names: Vec<String> = self
            .memberships
            .get(&session)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
