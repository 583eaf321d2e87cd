//! Environment-based pipeline configuration.
//!
//! Connection endpoints and credentials come from the environment (the
//! deployment injects them); policy knobs have the documented defaults and
//! fall back to them, with a warning, on unparseable values.

use log::warn;
use std::env;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub struct ConfigError {
    missing: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required environment variable {}", self.missing)
    }
}

impl Error for ConfigError {}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError {
        missing: key.to_string(),
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_u64_or(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    "invalid value '{}' for {}, using default {}",
                    raw, key, default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Broker connection and topic settings shared by both loops.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub group_id: String,
}

impl KafkaSettings {
    pub fn auth(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

/// Schema registry endpoint and the subject this pipeline owns.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub subject: String,
}

/// Warehouse endpoint and load targets (consumer side only).
#[derive(Debug, Clone)]
pub struct WarehouseSettings {
    pub base_url: String,
    pub token: String,
    pub table: String,
    pub stage: String,
    pub stage_prefix: String,
    pub dead_letter_dir: PathBuf,
}

impl WarehouseSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WarehouseSettings {
            base_url: required("WAREHOUSE_URL")?,
            token: required("WAREHOUSE_TOKEN")?,
            table: env_or("WAREHOUSE_TABLE", "products"),
            stage: env_or("WAREHOUSE_STAGE", "product_ingestion_stage"),
            stage_prefix: env_or("WAREHOUSE_STAGE_PREFIX", "kafka_ingestion"),
            dead_letter_dir: PathBuf::from(env_or("DEAD_LETTER_DIR", "dead_letter")),
        })
    }
}

/// Policy knobs with their documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct PolicySettings {
    /// Record count that triggers a batch flush (default 100)
    pub max_batch_size: usize,
    /// Max batch age before a time-triggered flush (default 30s)
    pub max_batch_age: Duration,
    /// Sleep between producer cycles (default 5s)
    pub producer_poll_interval: Duration,
    /// Deadline for the end-of-cycle delivery drain (default 30s)
    pub flush_timeout: Duration,
    /// Backoff after an empty extraction (default 10s)
    pub empty_poll_delay: Duration,
    /// Bounded consumer poll wait (default 1s)
    pub poll_timeout: Duration,
}

impl PolicySettings {
    pub fn from_env() -> Self {
        PolicySettings {
            max_batch_size: parse_u64_or("MAX_BATCH_SIZE", 100) as usize,
            max_batch_age: Duration::from_secs(parse_u64_or("MAX_BATCH_AGE_SECS", 30)),
            producer_poll_interval: Duration::from_secs(parse_u64_or(
                "PRODUCER_POLL_INTERVAL_SECS",
                5,
            )),
            flush_timeout: Duration::from_secs(parse_u64_or("FLUSH_TIMEOUT_SECS", 30)),
            empty_poll_delay: Duration::from_secs(parse_u64_or("EMPTY_POLL_DELAY_SECS", 10)),
            poll_timeout: Duration::from_secs(parse_u64_or("POLL_TIMEOUT_SECS", 1)),
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        PolicySettings {
            max_batch_size: 100,
            max_batch_age: Duration::from_secs(30),
            producer_poll_interval: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(30),
            empty_poll_delay: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// Configuration shared by both binaries.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub kafka: KafkaSettings,
    pub registry: RegistrySettings,
    pub policy: PolicySettings,
    pub watermark_path: PathBuf,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let topic = env_or("KAFKA_TOPIC", "product_updates");
        Ok(PipelineConfig {
            kafka: KafkaSettings {
                brokers: required("KAFKA_BROKERS")?,
                username: optional("KAFKA_USERNAME"),
                password: optional("KAFKA_PASSWORD"),
                group_id: env_or("CONSUMER_GROUP_ID", "product_analytics_group"),
                topic: topic.clone(),
            },
            registry: RegistrySettings {
                url: required("SCHEMA_REGISTRY_URL")?,
                username: optional("SCHEMA_REGISTRY_USERNAME"),
                password: optional("SCHEMA_REGISTRY_PASSWORD"),
                subject: env_or("SCHEMA_SUBJECT", &format!("{}-value", topic)),
            },
            policy: PolicySettings::from_env(),
            watermark_path: PathBuf::from(env_or("WATERMARK_PATH", "last_update.txt")),
        })
    }
}

/// Source database connection string (producer side only).
pub fn postgres_url_from_env() -> Result<String, ConfigError> {
    required("POSTGRES_URL")
}
