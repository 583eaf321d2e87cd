//! HTTP warehouse client.
//!
//! Talks to a warehouse gateway exposing two endpoints: a binary upload into
//! a named stage (`PUT /stages/{path}`) and a SQL statement executor
//! (`POST /statements`). Authentication is a bearer token.

use async_trait::async_trait;
use log::debug;
use serde_json::json;

use crate::productstream::sink::{SinkError, WarehouseClient};

pub struct HttpWarehouseClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpWarehouseClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        HttpWarehouseClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl WarehouseClient for HttpWarehouseClient {
    async fn stage_put(&self, stage_path: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        let url = format!("{}/stages/{}", self.base_url, stage_path);
        debug!("staging {} bytes to {}", payload.len(), stage_path);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .header("content-type", "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| SinkError::Stage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Stage(format!(
                "HTTP {}: {}",
                status.as_u16(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<(), SinkError> {
        let url = format!("{}/statements", self.base_url);
        debug!("executing warehouse statement");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "statement": statement }))
            .send()
            .await
            .map_err(|e| SinkError::Load(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Load(format!(
                "HTTP {}: {}",
                status.as_u16(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }
}
