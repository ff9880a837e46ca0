//! SQLite persistence for listings, their price history and the run ledger.
//!
//! The crawl is the only writer, so nothing here locks across requests.
//! Each reconciled candidate gets its own transaction.

pub mod listings;
pub mod runs;
mod schema;

pub use listings::{IdentityResolver, Outcome, Resolution, UpsertEngine};
pub use runs::RunLedger;

use crate::error::StorageError;
use crate::models::{Listing, ListingId, PriceHistoryEntry, RunId, ScrapingRun};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if needed) the database at `database_url` and make sure the tables exist
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.bootstrap().await?;
        info!("Opened database at {}", database_url);
        Ok(storage)
    }

    /// Private in-memory database, gone when the storage is dropped
    pub async fn in_memory() -> Result<Self, StorageError> {
        // every pooled connection would get its own empty database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.bootstrap().await?;
        Ok(storage)
    }

    async fn bootstrap(&self) -> Result<(), StorageError> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn resolver(&self) -> IdentityResolver {
        IdentityResolver::new(self.pool.clone())
    }

    pub fn upserts(&self) -> UpsertEngine {
        UpsertEngine::new(self.pool.clone())
    }

    pub fn ledger(&self) -> RunLedger {
        RunLedger::new(self.pool.clone())
    }

    /// All price transitions of a listing, newest first
    pub async fn price_history(&self, listing_id: ListingId) -> Result<Vec<PriceHistoryEntry>, StorageError> {
        let rows = sqlx::query_as::<_, PriceHistoryEntry>(
            r#"
            SELECT id, listing_id, price, timestamp
            FROM price_history
            WHERE listing_id = ?
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn listing(&self, id: ListingId) -> Result<Option<Listing>, StorageError> {
        let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(listing)
    }

    pub async fn listings(&self) -> Result<Vec<Listing>, StorageError> {
        let listings = sqlx::query_as::<_, Listing>("SELECT * FROM listings ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(listings)
    }

    pub async fn run(&self, id: RunId) -> Result<Option<ScrapingRun>, StorageError> {
        let run = sqlx::query_as::<_, ScrapingRun>(
            "SELECT id, timestamp, search_params, total_count FROM scraping_runs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(run)
    }

    pub async fn price_history_count(&self) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM price_history")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
