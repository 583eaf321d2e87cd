use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use productstream::productstream::config::{postgres_url_from_env, PipelineConfig};
use productstream::productstream::kafka::{base_client_config, KafkaPublisher};
use productstream::productstream::pipeline::{ProducerLoop, RetryPolicy, WatermarkStore};
use productstream::productstream::schema::{SchemaOutcome, SchemaRegistry, SchemaRegistryClient};
use productstream::productstream::serialization::avro_codec::PRODUCT_AVRO_SCHEMA;
use productstream::productstream::serialization::AvroCodec;
use productstream::productstream::source::PostgresExtractor;

#[derive(Parser)]
#[command(name = "product_producer")]
#[command(about = "Extract changed product rows and publish them to Kafka")]
struct Cli {
    /// Max enqueue retries when the producer queue is full
    #[arg(long, default_value = "5")]
    queue_retries: u32,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()).await {
        error!("producer exited with error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = PipelineConfig::from_env()?;

    let mut registry = SchemaRegistryClient::new(&config.registry.url);
    if let (Some(user), Some(pass)) = (&config.registry.username, &config.registry.password) {
        registry = registry.with_basic_auth(user, pass);
    }
    match registry
        .ensure_schema(&config.registry.subject, PRODUCT_AVRO_SCHEMA)
        .await?
    {
        SchemaOutcome::Created { id } => {
            info!("registered schema for '{}' (id {})", config.registry.subject, id)
        }
        SchemaOutcome::AlreadyRegistered => {
            info!("schema for '{}' already registered", config.registry.subject)
        }
    }

    let extractor = PostgresExtractor::connect(&postgres_url_from_env()?).await?;

    let client_config = base_client_config(&config.kafka.brokers, config.kafka.auth());
    let publisher = KafkaPublisher::new(
        client_config,
        config.kafka.topic.clone(),
        RetryPolicy::new(cli.queue_retries, Duration::from_secs(1)),
    )?;

    let watermark = WatermarkStore::open(&config.watermark_path)?;
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let mut producer = ProducerLoop::new(
        extractor,
        publisher,
        AvroCodec::new()?,
        watermark,
        config.policy,
        cancel,
    );
    producer.run().await?;
    Ok(())
}
