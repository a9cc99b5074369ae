//! Row-change fan-out.
//!
//! Every committed write to an invite, session or participant row is published
//! here as a [`RowChange`]. Subscribers pick a [`RowTopic`] and receive every
//! change that touches it; they are expected to treat a change as a hint and
//! re-read authoritative state rather than trust the payload blindly.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::invite::SessionInvite;
use crate::models::live_session::LiveSession;
use crate::models::participant::SessionParticipant;

const DEFAULT_TOPIC_CAPACITY: usize = 32;

/// A filter a client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowTopic {
    /// The session row and its participant rows.
    Session(String),
    /// Invites addressed to a host.
    InvitesTo(String),
    /// Invites sent by a host.
    InvitesFrom(String),
    /// Participant rows naming a host, whichever session they belong to.
    Participation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "lowercase")]
pub enum ChangedRow {
    Invite(SessionInvite),
    Session(LiveSession),
    Participant(SessionParticipant),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    #[serde(flatten)]
    pub row: ChangedRow,
}

impl RowChange {
    pub fn new(kind: ChangeKind, row: ChangedRow) -> Self {
        RowChange { kind, row }
    }

    /// Topics whose subscribers must hear about this change.
    pub fn topics(&self) -> Vec<RowTopic> {
        match &self.row {
            ChangedRow::Invite(invite) => vec![
                RowTopic::InvitesTo(invite.to_host_id.clone()),
                RowTopic::InvitesFrom(invite.from_host_id.clone()),
            ],
            ChangedRow::Session(session) => vec![RowTopic::Session(session.session_id.clone())],
            ChangedRow::Participant(participant) => vec![
                RowTopic::Session(participant.session_id.clone()),
                RowTopic::Participation(participant.profile_id.clone()),
            ],
        }
    }
}

pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, topic: RowTopic) -> broadcast::Receiver<RowChange>;

    fn publish(&self, change: RowChange);
}

/// In-process feed: one broadcast channel per topic, created on first subscribe.
pub struct BroadcastChangeFeed {
    topics: DashMap<RowTopic, broadcast::Sender<RowChange>>,
    capacity: usize,
}

impl BroadcastChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Number of topics that currently have a channel.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &RowTopic) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for BroadcastChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl ChangeFeed for BroadcastChangeFeed {
    fn subscribe(&self, topic: RowTopic) -> broadcast::Receiver<RowChange> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn publish(&self, change: RowChange) {
        let mut abandoned = Vec::new();

        for topic in change.topics() {
            if let Some(sender) = self.topics.get(&topic) {
                if sender.send(change.clone()).is_err() {
                    abandoned.push(topic);
                }
            }
        }

        // Channels nobody listens to any more are dropped so the map does not grow forever.
        for topic in abandoned {
            if self
                .topics
                .remove_if(&topic, |_, sender| sender.receiver_count() == 0)
                .is_some()
            {
                debug!("Dropped idle change topic {:?}", topic);
            }
        }
    }
}
