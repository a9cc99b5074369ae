use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::{primitives::Blob, Client as ApiGatewayClient};
use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoDbClient};
use tracing::info;

use shared::config::{required, ConfigError, HOST_CONNECTIONS_TABLE_ENV, WEBSOCKET_API_ENDPOINT_ENV};

#[cfg(test)]
use mockall::automock;

pub type ConnectionError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The socket behind the connection id is gone.
    Gone,
}

/// Open WebSocket connections, one per host.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get_connection_id(&self, host_id: &str) -> Result<Option<String>, ConnectionError>;

    async fn remove_connection(&self, host_id: &str) -> Result<(), ConnectionError>;

    async fn send_message(
        &self,
        connection_id: &str,
        message: &str,
    ) -> Result<Delivery, ConnectionError>;
}

pub struct DynamoDbConnectionRepository {
    dynamodb_client: DynamoDbClient,
    api_gateway_client: ApiGatewayClient,
    table_name: String,
}

impl DynamoDbConnectionRepository {
    pub fn from_env(
        dynamodb_client: DynamoDbClient,
        config: &aws_config::SdkConfig,
    ) -> Result<Self, ConfigError> {
        let table_name = required(HOST_CONNECTIONS_TABLE_ENV)?;
        let endpoint = required(WEBSOCKET_API_ENDPOINT_ENV)?;

        let api_gateway_config = aws_sdk_apigatewaymanagement::config::Builder::from(config)
            .endpoint_url(endpoint)
            .build();

        Ok(Self {
            dynamodb_client,
            api_gateway_client: ApiGatewayClient::from_conf(api_gateway_config),
            table_name,
        })
    }
}

#[async_trait]
impl ConnectionRepository for DynamoDbConnectionRepository {
    async fn get_connection_id(&self, host_id: &str) -> Result<Option<String>, ConnectionError> {
        let result = self
            .dynamodb_client
            .get_item()
            .table_name(&self.table_name)
            .key("host_id", AttributeValue::S(host_id.to_string()))
            .send()
            .await?;

        Ok(result
            .item
            .and_then(|item| match item.get("connection_id") {
                Some(AttributeValue::S(connection_id)) => Some(connection_id.clone()),
                _ => None,
            }))
    }

    async fn remove_connection(&self, host_id: &str) -> Result<(), ConnectionError> {
        self.dynamodb_client
            .delete_item()
            .table_name(&self.table_name)
            .key("host_id", AttributeValue::S(host_id.to_string()))
            .send()
            .await?;

        info!("Removed WebSocket connection for host: {}", host_id);
        Ok(())
    }

    async fn send_message(
        &self,
        connection_id: &str,
        message: &str,
    ) -> Result<Delivery, ConnectionError> {
        let result = self
            .api_gateway_client
            .post_to_connection()
            .connection_id(connection_id)
            .data(Blob::new(message.as_bytes()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(Delivery::Sent),
            Err(e) => match e.as_service_error() {
                Some(service_error) if service_error.is_gone_exception() => Ok(Delivery::Gone),
                _ => Err(e.into()),
            },
        }
    }
}
