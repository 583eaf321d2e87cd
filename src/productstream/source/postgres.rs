//! Postgres implementation of the source extractor.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::{debug, error, info};
use rust_decimal::Decimal;
use std::error::Error;
use tokio_postgres::{Client, NoTls};

use crate::productstream::model::ProductRecord;
use crate::productstream::source::SourceExtractor;

const FETCH_QUERY: &str = "SELECT product_id, name, category, price, updated_timestamp \
     FROM products WHERE updated_timestamp > $1 ORDER BY updated_timestamp ASC";

const MAX_QUERY: &str = "SELECT max(updated_timestamp) FROM products";

/// Extractor over a single Postgres connection.
///
/// The connection task is spawned onto the runtime; a dropped connection
/// surfaces as a query error, which the producer loop treats as transient.
pub struct PostgresExtractor {
    client: Client,
}

impl PostgresExtractor {
    /// Connect using a standard Postgres connection string
    /// (`host=... user=... password=... dbname=...` or a `postgres://` URL).
    pub async fn connect(conn_str: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let (client, connection) = tokio_postgres::connect(conn_str, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection terminated: {}", e);
            }
        });
        info!("connected to source database");
        Ok(PostgresExtractor { client })
    }
}

#[async_trait]
impl SourceExtractor for PostgresExtractor {
    async fn fetch_since(
        &mut self,
        ts: NaiveDateTime,
    ) -> Result<Vec<ProductRecord>, Box<dyn Error + Send + Sync>> {
        let rows = self.client.query(FETCH_QUERY, &[&ts]).await?;
        debug!("fetched {} rows newer than {}", rows.len(), ts);

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(ProductRecord {
                id: row.try_get::<_, String>("product_id")?,
                name: row.try_get::<_, String>("name")?,
                category: row.try_get::<_, String>("category")?,
                price: row.try_get::<_, Decimal>("price")?,
                updated_at: row.try_get::<_, NaiveDateTime>("updated_timestamp")?,
            });
        }
        Ok(records)
    }

    async fn max_updated_at(
        &mut self,
    ) -> Result<Option<NaiveDateTime>, Box<dyn Error + Send + Sync>> {
        let row = self.client.query_one(MAX_QUERY, &[]).await?;
        Ok(row.try_get::<_, Option<NaiveDateTime>>(0)?)
    }
}
