pub mod errors;
pub mod invite_repository;
pub mod memory;
pub mod session_repository;

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, StoreBackend, StoreConfig};
use crate::fanout::ChangeFeed;
use invite_repository::{DynamoDbInviteRepository, InviteRepository};
use memory::InMemoryStore;
use session_repository::{DynamoDbSessionRepository, SessionRepository};

/// The two store adapters the coordinator consumes.
#[derive(Clone)]
pub struct Repositories {
    pub invites: Arc<dyn InviteRepository>,
    pub sessions: Arc<dyn SessionRepository>,
}

/// Builds the adapters for `backend`. `feed` only applies to the in-memory
/// store; DynamoDB changes reach clients through the table streams.
pub async fn build_repositories(
    backend: StoreBackend,
    feed: Option<Arc<dyn ChangeFeed>>,
) -> Result<Repositories, ConfigError> {
    match backend {
        StoreBackend::Memory => {
            info!("Using the in-memory session store");
            let store = Arc::new(match feed {
                Some(feed) => InMemoryStore::with_feed(feed),
                None => InMemoryStore::new(),
            });
            Ok(Repositories {
                invites: store.clone(),
                sessions: store,
            })
        }
        StoreBackend::DynamoDb => {
            let store_config = StoreConfig::from_env()?;
            let config = aws_config::load_from_env().await;
            let client = aws_sdk_dynamodb::Client::new(&config);

            info!(
                "Using DynamoDB tables {}, {}, {}, {}",
                store_config.invites_table,
                store_config.sessions_table,
                store_config.participants_table,
                store_config.host_claims_table
            );
            Ok(Repositories {
                invites: Arc::new(DynamoDbInviteRepository::new(client.clone(), &store_config)),
                sessions: Arc::new(DynamoDbSessionRepository::new(client, &store_config)),
            })
        }
    }
}
