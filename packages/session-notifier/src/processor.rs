use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use aws_lambda_events::event::dynamodb::EventRecord;
use serde_dynamo::{from_item, Item};
use tracing::{debug, info, warn};

use shared::config::StoreConfig;
use shared::fanout::{ChangeKind, ChangedRow, RowChange};
use shared::repositories::session_repository::SessionRepository;

use crate::connections::{ConnectionRepository, Delivery};

#[derive(Debug)]
pub enum NotifierError {
    Decode(String),
    Repository(String),
    Delivery(String),
}

impl fmt::Display for NotifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotifierError::Decode(msg) => write!(f, "Could not decode stream record: {}", msg),
            NotifierError::Repository(msg) => write!(f, "Repository error: {}", msg),
            NotifierError::Delivery(msg) => write!(f, "Delivery error: {}", msg),
        }
    }
}

impl std::error::Error for NotifierError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTable {
    Invites,
    Sessions,
    Participants,
}

/// Maps a stream ARN (`arn:aws:dynamodb:...:table/<name>/stream/<label>`)
/// onto one of the tables clients care about.
pub fn table_for_arn(tables: &StoreConfig, arn: &str) -> Option<StreamTable> {
    let name = arn.split("table/").nth(1)?.split('/').next()?;

    if name == tables.invites_table {
        Some(StreamTable::Invites)
    } else if name == tables.sessions_table {
        Some(StreamTable::Sessions)
    } else if name == tables.participants_table {
        Some(StreamTable::Participants)
    } else {
        None
    }
}

pub fn change_kind(event_name: &str) -> Option<ChangeKind> {
    match event_name {
        "INSERT" => Some(ChangeKind::Insert),
        "MODIFY" => Some(ChangeKind::Modify),
        "REMOVE" => Some(ChangeKind::Remove),
        _ => None,
    }
}

pub fn decode_change(
    table: StreamTable,
    kind: ChangeKind,
    image: Item,
) -> Result<RowChange, NotifierError> {
    let decode = |e: serde_dynamo::Error| NotifierError::Decode(e.to_string());

    let row = match table {
        StreamTable::Invites => ChangedRow::Invite(from_item(image).map_err(decode)?),
        StreamTable::Sessions => ChangedRow::Session(from_item(image).map_err(decode)?),
        StreamTable::Participants => ChangedRow::Participant(from_item(image).map_err(decode)?),
    };

    Ok(RowChange::new(kind, row))
}

/// Pushes committed invite, session and participant changes to the
/// WebSocket connections of every host the row concerns.
pub struct SessionNotifier {
    tables: StoreConfig,
    sessions: Arc<dyn SessionRepository>,
    connections: Arc<dyn ConnectionRepository>,
}

impl SessionNotifier {
    pub fn new(
        tables: StoreConfig,
        sessions: Arc<dyn SessionRepository>,
        connections: Arc<dyn ConnectionRepository>,
    ) -> Self {
        Self {
            tables,
            sessions,
            connections,
        }
    }

    pub async fn process_record(&self, record: EventRecord) -> Result<(), NotifierError> {
        let Some(kind) = change_kind(record.event_name.as_str()) else {
            info!("Unhandled event type: {}", record.event_name);
            return Ok(());
        };
        let Some(table) = record
            .event_source_arn
            .as_deref()
            .and_then(|arn| table_for_arn(&self.tables, arn))
        else {
            debug!("Ignoring record from {:?}", record.event_source_arn);
            return Ok(());
        };

        let image = match kind {
            ChangeKind::Remove => record.change.old_image,
            ChangeKind::Insert | ChangeKind::Modify => record.change.new_image,
        };

        let change = decode_change(table, kind, image)?;
        self.notify(&change).await?;
        Ok(())
    }

    /// Sends `change` to every connected recipient and returns how many got it.
    pub async fn notify(&self, change: &RowChange) -> Result<usize, NotifierError> {
        let message =
            serde_json::to_string(change).map_err(|e| NotifierError::Decode(e.to_string()))?;
        let recipients = self.recipients(change).await?;

        let mut delivered = 0;
        for host_id in &recipients {
            match self.deliver(host_id, &message).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                // One broken socket must not keep the others from hearing about the change.
                Err(e) => warn!("Failed to notify host {}: {}", host_id, e),
            }
        }

        debug!(
            "Delivered {:?} change to {} of {} hosts",
            change.kind,
            delivered,
            recipients.len()
        );
        Ok(delivered)
    }

    pub async fn recipients(&self, change: &RowChange) -> Result<Vec<String>, NotifierError> {
        let mut hosts = BTreeSet::new();

        match &change.row {
            ChangedRow::Invite(invite) => {
                hosts.insert(invite.to_host_id.clone());
                hosts.insert(invite.from_host_id.clone());
            }
            ChangedRow::Session(session) => {
                hosts.insert(session.host_a.clone());
                hosts.insert(session.host_b.clone());
                hosts.extend(self.participant_ids(&session.session_id).await?);
            }
            ChangedRow::Participant(participant) => {
                hosts.insert(participant.profile_id.clone());
                hosts.extend(self.participant_ids(&participant.session_id).await?);
            }
        }

        Ok(hosts.into_iter().collect())
    }

    async fn participant_ids(&self, session_id: &str) -> Result<Vec<String>, NotifierError> {
        let participants = self
            .sessions
            .list_participants(session_id)
            .await
            .map_err(|e| NotifierError::Repository(e.to_string()))?;

        Ok(participants.into_iter().map(|p| p.profile_id).collect())
    }

    async fn deliver(&self, host_id: &str, message: &str) -> Result<bool, NotifierError> {
        let Some(connection_id) = self
            .connections
            .get_connection_id(host_id)
            .await
            .map_err(|e| NotifierError::Repository(e.to_string()))?
        else {
            debug!("Host {} has no open connection", host_id);
            return Ok(false);
        };

        let delivery = self
            .connections
            .send_message(&connection_id, message)
            .await
            .map_err(|e| NotifierError::Delivery(e.to_string()))?;

        match delivery {
            Delivery::Sent => Ok(true),
            Delivery::Gone => {
                info!(
                    "Connection {} of host {} is gone, dropping it",
                    connection_id, host_id
                );
                self.connections
                    .remove_connection(host_id)
                    .await
                    .map_err(|e| NotifierError::Repository(e.to_string()))?;
                Ok(false)
            }
        }
    }
}
