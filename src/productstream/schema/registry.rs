//! Confluent-style schema registry client.
//!
//! The pipeline only needs one guarantee from the registry: the product
//! subject exists before the first message is published. `ensure_schema` is
//! idempotent and tolerant of registration races (an HTTP 409 from a
//! concurrent registration counts as success).

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::fmt;

/// Registry failures. Any error other than an already-exists conflict is
/// fatal to startup: publishing without a registered subject would produce
/// messages no conforming consumer accepts.
#[derive(Debug)]
pub enum SchemaRegistryError {
    /// Transport-level failure talking to the registry
    Http(String),
    /// The registry answered with a non-success status
    Registry { status: u16, message: String },
}

impl fmt::Display for SchemaRegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaRegistryError::Http(msg) => write!(f, "registry transport error: {}", msg),
            SchemaRegistryError::Registry { status, message } => {
                write!(f, "registry error (HTTP {}): {}", status, message)
            }
        }
    }
}

impl Error for SchemaRegistryError {}

impl From<reqwest::Error> for SchemaRegistryError {
    fn from(err: reqwest::Error) -> Self {
        SchemaRegistryError::Http(err.to_string())
    }
}

/// Result of a raw registration attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new schema version was created
    Created { id: i64 },
    /// The registry reported the schema already exists (lost race, fine)
    Conflict,
}

/// Result of `ensure_schema`.
#[derive(Debug, PartialEq, Eq)]
pub enum SchemaOutcome {
    AlreadyRegistered,
    Created { id: i64 },
}

/// The registry operations the pipeline consumes. The HTTP client below is
/// the production implementation; tests substitute an in-memory registry.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn list_subjects(&self) -> Result<Vec<String>, SchemaRegistryError>;

    async fn register_schema(
        &self,
        subject: &str,
        definition: &str,
    ) -> Result<RegisterOutcome, SchemaRegistryError>;

    /// Ensure `subject` is registered, registering `definition` if absent.
    /// Calling this twice with the same definition registers exactly one
    /// schema version and the second call is a no-op success.
    async fn ensure_schema(
        &self,
        subject: &str,
        definition: &str,
    ) -> Result<SchemaOutcome, SchemaRegistryError> {
        let subjects = self.list_subjects().await?;
        if subjects.iter().any(|s| s == subject) {
            info!("schema subject '{}' already registered", subject);
            return Ok(SchemaOutcome::AlreadyRegistered);
        }

        match self.register_schema(subject, definition).await? {
            RegisterOutcome::Created { id } => {
                info!("registered schema subject '{}' (id {})", subject, id);
                Ok(SchemaOutcome::Created { id })
            }
            RegisterOutcome::Conflict => {
                info!(
                    "schema subject '{}' registered concurrently, treating as success",
                    subject
                );
                Ok(SchemaOutcome::AlreadyRegistered)
            }
        }
    }
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: i64,
}

/// HTTP client for a Confluent-compatible schema registry.
pub struct SchemaRegistryClient {
    http: reqwest::Client,
    base_url: String,
    basic_auth: Option<(String, String)>,
}

impl SchemaRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        SchemaRegistryClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            basic_auth: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.basic_auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }
}

#[async_trait]
impl SchemaRegistry for SchemaRegistryClient {
    async fn list_subjects(&self) -> Result<Vec<String>, SchemaRegistryError> {
        let url = format!("{}/subjects", self.base_url);
        let response = self.request(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SchemaRegistryError::Registry {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    async fn register_schema(
        &self,
        subject: &str,
        definition: &str,
    ) -> Result<RegisterOutcome, SchemaRegistryError> {
        let url = format!("{}/subjects/{}/versions", self.base_url, subject);
        let body = json!({ "schema": definition, "schemaType": "AVRO" });
        let response = self.request(self.http.post(&url)).json(&body).send().await?;
        let status = response.status();

        if status.as_u16() == 409 {
            return Ok(RegisterOutcome::Conflict);
        }
        if !status.is_success() {
            return Err(SchemaRegistryError::Registry {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: RegisterResponse = response.json().await?;
        Ok(RegisterOutcome::Created { id: parsed.id })
    }
}
