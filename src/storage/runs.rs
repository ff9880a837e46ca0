use crate::error::StorageError;
use crate::models::RunId;
use crate::scrapers::types::SearchParams;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

/// One `scraping_runs` row per crawl: opened before the first fetch, closed once with the final count
#[derive(Debug, Clone)]
pub struct RunLedger {
    pool: SqlitePool,
}

impl RunLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self, params: &SearchParams) -> Result<RunId, StorageError> {
        let search_params = serde_json::to_string(params)?;

        let run_id = sqlx::query("INSERT INTO scraping_runs (timestamp, search_params) VALUES (?, ?)")
            .bind(Utc::now())
            .bind(&search_params)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        info!(run_id, search_params = %search_params, "Started scraping run");
        Ok(run_id)
    }

    /// Record the final count. A run can only be finished once.
    pub async fn finish(&self, run_id: RunId, total_count: u64) -> Result<(), StorageError> {
        let total = i64::try_from(total_count).unwrap_or(i64::MAX);

        let result = sqlx::query(
            "UPDATE scraping_runs SET total_count = ? WHERE id = ? AND total_count IS NULL",
        )
        .bind(total)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RunNotOpen(run_id));
        }

        info!(run_id, total_count, "Finished scraping run");
        Ok(())
    }
}
