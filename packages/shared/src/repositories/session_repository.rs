use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_dynamo::{from_item, to_attribute_value, to_item};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::models::invite::InviteStatus;
use crate::models::live_session::{LiveSession, SessionStatus};
use crate::models::participant::SessionParticipant;
use crate::repositories::errors::session_repository_errors::SessionRepositoryError;

#[cfg(test)]
use mockall::automock;

/// The invite-side half of an accept: flips the invite to accepted in the
/// same transaction that creates or joins the session.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteAcceptance {
    pub invite_id: String,
    pub responded_at: DateTime<Utc>,
    /// Recorded on the invite when the accept created a brand-new session.
    pub accepted_session_id: Option<String>,
}

/// Row in the host claims table: the one open session a host is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostClaim {
    pub host_id: String,
    pub session_id: String,
    pub claimed_at: DateTime<Utc>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<LiveSession>, SessionRepositoryError>;

    /// Participants of a session ordered by slot.
    async fn list_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, SessionRepositoryError>;

    /// Every session in active or cooldown that lists `host_id`. More than one
    /// entry means the store is corrupt; callers must not pick one.
    async fn find_open_sessions_for_host(
        &self,
        host_id: &str,
    ) -> Result<Vec<LiveSession>, SessionRepositoryError>;

    /// The session spawned by rematching `session_id`, if any.
    async fn find_rematch_of(
        &self,
        session_id: &str,
    ) -> Result<Option<LiveSession>, SessionRepositoryError>;

    /// Atomically: invite pending -> accepted, session row, founder rows and a claim per founder.
    async fn create_session_from_invite(
        &self,
        acceptance: &InviteAcceptance,
        session: &LiveSession,
        participants: &[SessionParticipant],
    ) -> Result<(), SessionRepositoryError>;

    /// Atomically: invite pending -> accepted, participant count bump keyed on
    /// `session.participant_count`, the new participant row and its claim.
    async fn join_session_from_invite(
        &self,
        acceptance: &InviteAcceptance,
        session: &LiveSession,
        participant: &SessionParticipant,
    ) -> Result<(), SessionRepositoryError>;

    /// active -> cooldown, keyed on status = active.
    async fn enter_cooldown(
        &self,
        session_id: &str,
        cooldown_ends_at: DateTime<Utc>,
    ) -> Result<(), SessionRepositoryError>;

    /// active|cooldown -> ended, releasing the claims of `released_hosts`.
    /// Fails with `StatusChanged` if the row no longer carries `session`'s
    /// participant count, so a host admitted after the read keeps no claim.
    async fn end_session(
        &self,
        session: &LiveSession,
        released_hosts: &[String],
    ) -> Result<(), SessionRepositoryError>;

    /// Atomically: source cooldown -> ended, new session and its founders,
    /// founders' claims moved to the new session, everybody else released.
    /// Guarded on `source.participant_count` like `end_session`.
    async fn create_rematch(
        &self,
        source: &LiveSession,
        rematch: &LiveSession,
        participants: &[SessionParticipant],
        released_hosts: &[String],
    ) -> Result<(), SessionRepositoryError>;
}

/// Which row a transaction item guards, used to decode cancellation reasons.
#[derive(Debug, Clone)]
enum Guard {
    Invite,
    Session,
    HostClaim(String),
    Row,
}

pub struct DynamoDbSessionRepository {
    pub client: Client,
    pub invites_table: String,
    pub sessions_table: String,
    pub participants_table: String,
    pub host_claims_table: String,
}

impl DynamoDbSessionRepository {
    pub fn new(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            invites_table: config.invites_table.clone(),
            sessions_table: config.sessions_table.clone(),
            participants_table: config.participants_table.clone(),
            host_claims_table: config.host_claims_table.clone(),
        }
    }

    fn status_value(status: SessionStatus) -> AttributeValue {
        AttributeValue::S(status.as_str().to_string())
    }

    fn accept_invite_item(
        &self,
        acceptance: &InviteAcceptance,
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let responded_at = to_attribute_value(acceptance.responded_at)
            .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;

        let mut update_expression =
            String::from("SET #status = :accepted, responded_at = :responded_at");
        let mut builder = Update::builder()
            .table_name(&self.invites_table)
            .key("id", AttributeValue::S(acceptance.invite_id.clone()))
            .condition_expression("#status = :pending")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(
                ":accepted",
                AttributeValue::S(InviteStatus::Accepted.as_str().to_string()),
            )
            .expression_attribute_values(
                ":pending",
                AttributeValue::S(InviteStatus::Pending.as_str().to_string()),
            )
            .expression_attribute_values(":responded_at", responded_at);

        if let Some(session_id) = &acceptance.accepted_session_id {
            update_expression.push_str(", accepted_session_id = :accepted_session_id");
            builder = builder.expression_attribute_values(
                ":accepted_session_id",
                AttributeValue::S(session_id.clone()),
            );
        }

        let update = builder
            .update_expression(update_expression)
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().update(update).build())
    }

    fn put_session_item(
        &self,
        session: &LiveSession,
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let item =
            to_item(session).map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
        let put = Put::builder()
            .table_name(&self.sessions_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(session_id)")
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().put(put).build())
    }

    fn put_participant_item(
        &self,
        participant: &SessionParticipant,
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let item = to_item(participant)
            .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
        let put = Put::builder()
            .table_name(&self.participants_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(profile_id)")
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().put(put).build())
    }

    /// Claims `host_id` for `session_id`. With `previous` set, a claim already
    /// held for that session is taken over instead of rejected.
    fn put_claim_item(
        &self,
        host_id: &str,
        session_id: &str,
        previous: Option<&str>,
        claimed_at: DateTime<Utc>,
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let claim = HostClaim {
            host_id: host_id.to_string(),
            session_id: session_id.to_string(),
            claimed_at,
        };
        let item =
            to_item(claim).map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;

        let builder = Put::builder()
            .table_name(&self.host_claims_table)
            .set_item(Some(item));
        let builder = match previous {
            Some(previous) => builder
                .condition_expression("attribute_not_exists(host_id) OR session_id = :previous")
                .expression_attribute_values(":previous", AttributeValue::S(previous.to_string())),
            None => builder.condition_expression("attribute_not_exists(host_id)"),
        };
        let put = builder
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().put(put).build())
    }

    fn release_claim_item(
        &self,
        host_id: &str,
        session_id: &str,
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let delete = Delete::builder()
            .table_name(&self.host_claims_table)
            .key("host_id", AttributeValue::S(host_id.to_string()))
            .condition_expression("attribute_not_exists(host_id) OR session_id = :session_id")
            .expression_attribute_values(":session_id", AttributeValue::S(session_id.to_string()))
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().delete(delete).build())
    }

    fn end_session_item(
        &self,
        session: &LiveSession,
        from: &[SessionStatus],
    ) -> Result<TransactWriteItem, SessionRepositoryError> {
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!(":from{}", i)).collect();
        let mut builder = Update::builder()
            .table_name(&self.sessions_table)
            .key("session_id", AttributeValue::S(session.session_id.clone()))
            .update_expression("SET #status = :ended")
            .condition_expression(format!(
                "#status IN ({}) AND participant_count = :expected",
                placeholders.join(", ")
            ))
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":ended", Self::status_value(SessionStatus::Ended))
            .expression_attribute_values(
                ":expected",
                AttributeValue::N(session.participant_count.to_string()),
            );
        for (placeholder, status) in placeholders.iter().zip(from) {
            builder = builder.expression_attribute_values(placeholder, Self::status_value(*status));
        }
        let update = builder
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        Ok(TransactWriteItem::builder().update(update).build())
    }

    async fn transact(
        &self,
        items: Vec<(Guard, TransactWriteItem)>,
    ) -> Result<(), SessionRepositoryError> {
        let (guards, items): (Vec<Guard>, Vec<TransactWriteItem>) = items.into_iter().unzip();

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if let TransactWriteItemsError::TransactionCanceledException(cancelled) =
                        service_err.err()
                    {
                        for (guard, reason) in guards.iter().zip(cancelled.cancellation_reasons())
                        {
                            if reason.code() != Some("ConditionalCheckFailed") {
                                continue;
                            }
                            debug!("Transaction condition failed on {:?}", guard);
                            return Err(match guard {
                                Guard::Invite => SessionRepositoryError::InviteNotPending,
                                Guard::Session => SessionRepositoryError::StatusChanged,
                                Guard::HostClaim(host_id) => {
                                    SessionRepositoryError::HostBusy(host_id.clone())
                                }
                                Guard::Row => SessionRepositoryError::DynamoDb(format!(
                                    "Transaction condition failed: {}",
                                    e
                                )),
                            });
                        }
                    }
                }
                Err(SessionRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn get_claim(&self, host_id: &str) -> Result<Option<HostClaim>, SessionRepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.host_claims_table)
            .key("host_id", AttributeValue::S(host_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        match output.item {
            Some(item) => {
                let claim: HostClaim = from_item(item)
                    .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(claim))
            }
            None => Ok(None),
        }
    }

    async fn query_all(
        &self,
        table_name: &str,
        index_name: Option<&str>,
        key_name: &str,
        key_value: &str,
    ) -> Result<Vec<HashMap<String, AttributeValue>>, SessionRepositoryError> {
        let mut items = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(table_name)
                .set_index_name(index_name.map(str::to_string))
                .key_condition_expression("#key = :key")
                .expression_attribute_names("#key", key_name)
                .expression_attribute_values(":key", AttributeValue::S(key_value.to_string()))
                .set_consistent_read(index_name.is_none().then_some(true))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

            items.extend(output.items.unwrap_or_default());

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl SessionRepository for DynamoDbSessionRepository {
    async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<LiveSession>, SessionRepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.sessions_table)
            .key("session_id", AttributeValue::S(session_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        match output.item {
            Some(item) => {
                let session: LiveSession = from_item(item)
                    .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn list_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionParticipant>, SessionRepositoryError> {
        let items = self
            .query_all(&self.participants_table, None, "session_id", session_id)
            .await?;

        let mut participants = Vec::with_capacity(items.len());
        for item in items {
            let participant: SessionParticipant = from_item(item)
                .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
            participants.push(participant);
        }

        participants.sort_by_key(|participant| participant.slot_index);
        Ok(participants)
    }

    async fn find_open_sessions_for_host(
        &self,
        host_id: &str,
    ) -> Result<Vec<LiveSession>, SessionRepositoryError> {
        // The claims table holds at most one row per host, so this yields zero or one session.
        let Some(claim) = self.get_claim(host_id).await? else {
            return Ok(Vec::new());
        };

        match self.get_session(&claim.session_id).await? {
            Some(session) if session.status.is_open() => Ok(vec![session]),
            Some(session) => {
                warn!(
                    "Host {} still claims session {} which is {}",
                    host_id,
                    session.session_id,
                    session.status.as_str()
                );
                Ok(Vec::new())
            }
            None => {
                warn!(
                    "Host {} claims missing session {}",
                    host_id, claim.session_id
                );
                Ok(Vec::new())
            }
        }
    }

    async fn find_rematch_of(
        &self,
        session_id: &str,
    ) -> Result<Option<LiveSession>, SessionRepositoryError> {
        // A fresh rematch is found through host_a's claim with a consistent read;
        // the index only catches rematches that have already ended.
        if let Some(source) = self.get_session(session_id).await? {
            if let Some(claim) = self.get_claim(&source.host_a).await? {
                if let Some(candidate) = self.get_session(&claim.session_id).await? {
                    if candidate.previous_session_id.as_deref() == Some(session_id) {
                        return Ok(Some(candidate));
                    }
                }
            }
        }

        let items = self
            .query_all(
                &self.sessions_table,
                Some("PreviousSessionIndex"),
                "previous_session_id",
                session_id,
            )
            .await?;

        match items.into_iter().next() {
            Some(item) => {
                let session: LiveSession = from_item(item)
                    .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn create_session_from_invite(
        &self,
        acceptance: &InviteAcceptance,
        session: &LiveSession,
        participants: &[SessionParticipant],
    ) -> Result<(), SessionRepositoryError> {
        let mut items = vec![
            (Guard::Invite, self.accept_invite_item(acceptance)?),
            (Guard::Row, self.put_session_item(session)?),
        ];
        for participant in participants {
            items.push((Guard::Row, self.put_participant_item(participant)?));
            items.push((
                Guard::HostClaim(participant.profile_id.clone()),
                self.put_claim_item(
                    &participant.profile_id,
                    &session.session_id,
                    None,
                    session.started_at,
                )?,
            ));
        }

        self.transact(items).await
    }

    async fn join_session_from_invite(
        &self,
        acceptance: &InviteAcceptance,
        session: &LiveSession,
        participant: &SessionParticipant,
    ) -> Result<(), SessionRepositoryError> {
        let bump = Update::builder()
            .table_name(&self.sessions_table)
            .key("session_id", AttributeValue::S(session.session_id.clone()))
            .update_expression("SET participant_count = participant_count + :one")
            .condition_expression(
                "(#status = :active OR #status = :cooldown) AND participant_count = :expected",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .expression_attribute_values(
                ":expected",
                AttributeValue::N(session.participant_count.to_string()),
            )
            .expression_attribute_values(":active", Self::status_value(SessionStatus::Active))
            .expression_attribute_values(":cooldown", Self::status_value(SessionStatus::Cooldown))
            .build()
            .map_err(|e| SessionRepositoryError::DynamoDb(e.to_string()))?;

        let items = vec![
            (Guard::Invite, self.accept_invite_item(acceptance)?),
            (Guard::Session, TransactWriteItem::builder().update(bump).build()),
            (Guard::Row, self.put_participant_item(participant)?),
            (
                Guard::HostClaim(participant.profile_id.clone()),
                self.put_claim_item(
                    &participant.profile_id,
                    &session.session_id,
                    None,
                    participant.joined_at,
                )?,
            ),
        ];

        self.transact(items).await
    }

    async fn enter_cooldown(
        &self,
        session_id: &str,
        cooldown_ends_at: DateTime<Utc>,
    ) -> Result<(), SessionRepositoryError> {
        let deadline = to_attribute_value(cooldown_ends_at)
            .map_err(|e| SessionRepositoryError::Serialization(e.to_string()))?;

        let result = self
            .client
            .update_item()
            .table_name(&self.sessions_table)
            .key("session_id", AttributeValue::S(session_id.to_string()))
            .update_expression("SET #status = :cooldown, cooldown_ends_at = :deadline")
            .condition_expression("#status = :active AND attribute_not_exists(cooldown_ends_at)")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":cooldown", Self::status_value(SessionStatus::Cooldown))
            .expression_attribute_values(":active", Self::status_value(SessionStatus::Active))
            .expression_attribute_values(":deadline", deadline)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Err(SessionRepositoryError::StatusChanged);
                    }
                }
                Err(SessionRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn end_session(
        &self,
        session: &LiveSession,
        released_hosts: &[String],
    ) -> Result<(), SessionRepositoryError> {
        let mut items = vec![(
            Guard::Session,
            self.end_session_item(session, &[SessionStatus::Active, SessionStatus::Cooldown])?,
        )];
        for host_id in released_hosts {
            items.push((
                Guard::Row,
                self.release_claim_item(host_id, &session.session_id)?,
            ));
        }

        self.transact(items).await
    }

    async fn create_rematch(
        &self,
        source: &LiveSession,
        rematch: &LiveSession,
        participants: &[SessionParticipant],
        released_hosts: &[String],
    ) -> Result<(), SessionRepositoryError> {
        let mut items = vec![
            (
                Guard::Session,
                self.end_session_item(source, &[SessionStatus::Cooldown])?,
            ),
            (Guard::Row, self.put_session_item(rematch)?),
        ];
        for participant in participants {
            items.push((Guard::Row, self.put_participant_item(participant)?));
            items.push((
                Guard::HostClaim(participant.profile_id.clone()),
                self.put_claim_item(
                    &participant.profile_id,
                    &rematch.session_id,
                    Some(&source.session_id),
                    rematch.started_at,
                )?,
            ));
        }
        for host_id in released_hosts {
            items.push((
                Guard::Row,
                self.release_claim_item(host_id, &source.session_id)?,
            ));
        }

        self.transact(items).await
    }
}
