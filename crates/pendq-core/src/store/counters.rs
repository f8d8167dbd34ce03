//! Per-endpoint retry counters.
//!
//! The counter drives backoff growth and must survive restarts, so it
//! lives in the database next to the messages it times. Counts are never
//! negative; reset stores an explicit zero.

use anyhow::Result;
use sqlx::Row;

use super::db::MessageDb;
use super::types::EndpointId;

impl MessageDb {
    /// Increment the endpoint's retry counter and return the new count.
    ///
    /// The first failure yields 1.
    pub async fn get_and_increment_retry(&self, endpoint: EndpointId) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT attempts FROM retry_counters
            WHERE endpoint_id = ?1
            "#,
        )
        .bind(endpoint)
        .fetch_optional(&mut *tx)
        .await?;
        let current: i64 = row.map(|r| r.get("attempts")).unwrap_or(0);
        let next = current.max(0) + 1;
        sqlx::query(
            r#"
            INSERT INTO retry_counters (endpoint_id, attempts)
            VALUES (?1, ?2)
            ON CONFLICT(endpoint_id) DO UPDATE SET attempts = ?2
            "#,
        )
        .bind(endpoint)
        .bind(next)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(next as u32)
    }

    /// Reset the endpoint's retry counter to zero.
    pub async fn reset_retry(&self, endpoint: EndpointId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retry_counters (endpoint_id, attempts)
            VALUES (?1, 0)
            ON CONFLICT(endpoint_id) DO UPDATE SET attempts = 0
            "#,
        )
        .bind(endpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current retry count without modifying it.
    pub async fn current_retry(&self, endpoint: EndpointId) -> Result<u32> {
        let row = sqlx::query(
            r#"
            SELECT attempts FROM retry_counters
            WHERE endpoint_id = ?1
            "#,
        )
        .bind(endpoint)
        .fetch_optional(&self.pool)
        .await?;
        let current: i64 = row.map(|r| r.get("attempts")).unwrap_or(0);
        Ok(current.max(0) as u32)
    }
}
