use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde_dynamo::{from_item, to_attribute_value, to_item};

use crate::config::StoreConfig;
use crate::models::invite::{InviteStatus, SessionInvite};
use crate::repositories::errors::invite_repository_errors::InviteRepositoryError;

#[cfg(test)]
use mockall::automock;

pub struct DynamoDbInviteRepository {
    pub client: Client,
    pub table_name: String,
}

impl DynamoDbInviteRepository {
    pub fn new(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            table_name: config.invites_table.clone(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InviteRepository: Send + Sync {
    async fn create_invite(&self, invite: &SessionInvite) -> Result<(), InviteRepositoryError>;

    async fn get_invite(
        &self,
        invite_id: &str,
    ) -> Result<Option<SessionInvite>, InviteRepositoryError>;

    /// Pending invites addressed to `to_host_id`, newest first.
    async fn list_pending_invites(
        &self,
        to_host_id: &str,
    ) -> Result<Vec<SessionInvite>, InviteRepositoryError>;

    /// Moves a pending invite to a terminal status without side effects.
    /// Fails with `NotPending` when the invite was already resolved.
    async fn close_invite(
        &self,
        invite_id: &str,
        status: InviteStatus,
        responded_at: DateTime<Utc>,
    ) -> Result<(), InviteRepositoryError>;
}

#[async_trait]
impl InviteRepository for DynamoDbInviteRepository {
    async fn create_invite(&self, invite: &SessionInvite) -> Result<(), InviteRepositoryError> {
        let item =
            to_item(invite).map_err(|e| InviteRepositoryError::Serialization(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| InviteRepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    async fn get_invite(
        &self,
        invite_id: &str,
    ) -> Result<Option<SessionInvite>, InviteRepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(invite_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| InviteRepositoryError::DynamoDb(e.to_string()))?;

        match output.item {
            Some(item) => {
                let invite: SessionInvite = from_item(item)
                    .map_err(|e| InviteRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(invite))
            }
            None => Ok(None),
        }
    }

    async fn list_pending_invites(
        &self,
        to_host_id: &str,
    ) -> Result<Vec<SessionInvite>, InviteRepositoryError> {
        let mut invites = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name("ToHostIndex")
                .key_condition_expression("to_host_id = :to_host_id")
                .filter_expression("#status = :pending")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(
                    ":to_host_id",
                    AttributeValue::S(to_host_id.to_string()),
                )
                .expression_attribute_values(
                    ":pending",
                    AttributeValue::S(InviteStatus::Pending.as_str().to_string()),
                )
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| InviteRepositoryError::DynamoDb(e.to_string()))?;

            for item in output.items.unwrap_or_default() {
                let invite: SessionInvite = from_item(item)
                    .map_err(|e| InviteRepositoryError::Serialization(e.to_string()))?;
                invites.push(invite);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        invites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invites)
    }

    async fn close_invite(
        &self,
        invite_id: &str,
        status: InviteStatus,
        responded_at: DateTime<Utc>,
    ) -> Result<(), InviteRepositoryError> {
        let responded_at = to_attribute_value(responded_at)
            .map_err(|e| InviteRepositoryError::Serialization(e.to_string()))?;

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(invite_id.to_string()))
            .update_expression("SET #status = :status, responded_at = :responded_at")
            .condition_expression("#status = :pending")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status.as_str().to_string()))
            .expression_attribute_values(
                ":pending",
                AttributeValue::S(InviteStatus::Pending.as_str().to_string()),
            )
            .expression_attribute_values(":responded_at", responded_at)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Err(InviteRepositoryError::NotPending);
                    }
                }
                Err(InviteRepositoryError::DynamoDb(e.to_string()))
            }
        }
    }
}
