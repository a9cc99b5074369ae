use std::sync::Arc;

use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::{error, info};

use shared::config::StoreConfig;
use shared::repositories::session_repository::DynamoDbSessionRepository;

mod connections;
mod processor;

use connections::DynamoDbConnectionRepository;
use processor::SessionNotifier;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    info!("Session notifier Lambda function starting");

    let store_config = StoreConfig::from_env()?;
    let config = aws_config::load_from_env().await;
    let client = aws_sdk_dynamodb::Client::new(&config);

    let sessions = Arc::new(DynamoDbSessionRepository::new(client.clone(), &store_config));
    let connections = Arc::new(DynamoDbConnectionRepository::from_env(client, &config)?);
    let notifier = Arc::new(SessionNotifier::new(store_config, sessions, connections));

    run(service_fn(move |event: LambdaEvent<Event>| {
        let notifier = notifier.clone();
        async move {
            let (event, _context) = event.into_parts();

            info!("Processing {} records", event.records.len());

            for record in event.records {
                if let Err(e) = notifier.process_record(record).await {
                    error!("Failed to process record: {}", e);
                }
            }

            Ok::<(), Error>(())
        }
    }))
    .await
}
