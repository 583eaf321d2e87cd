use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use productstream::productstream::config::{PipelineConfig, WarehouseSettings};
use productstream::productstream::kafka::{base_client_config, KafkaBatchConsumer};
use productstream::productstream::pipeline::{ConsumerLoop, RetryPolicy};
use productstream::productstream::serialization::AvroCodec;
use productstream::productstream::sink::{BatchLoader, DeadLetterStore, HttpWarehouseClient};

#[derive(Parser)]
#[command(name = "product_consumer")]
#[command(about = "Batch product events from Kafka into the analytical warehouse")]
struct Cli {
    /// Max stage upload retries per batch
    #[arg(long, default_value = "3")]
    stage_retries: u32,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()).await {
        error!("consumer exited with error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = PipelineConfig::from_env()?;
    let warehouse = WarehouseSettings::from_env()?;

    let client_config = base_client_config(&config.kafka.brokers, config.kafka.auth());
    let stream = KafkaBatchConsumer::new(client_config, &config.kafka.group_id, &config.kafka.topic)?;
    info!(
        "subscribed to '{}' as group '{}'",
        config.kafka.topic, config.kafka.group_id
    );

    let loader = BatchLoader::new(
        HttpWarehouseClient::new(&warehouse.base_url, &warehouse.token),
        warehouse.table,
        warehouse.stage,
        warehouse.stage_prefix,
        RetryPolicy::new(cli.stage_retries, Duration::from_secs(1)),
    );
    let dead_letters = DeadLetterStore::new(&warehouse.dead_letter_dir);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let mut consumer = ConsumerLoop::new(
        stream,
        loader,
        AvroCodec::new()?,
        dead_letters,
        config.policy,
        cancel,
    );
    consumer.run().await?;
    Ok(())
}
