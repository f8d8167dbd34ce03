//! Message write operations: insert, status transitions, recovery.

use anyhow::Result;

use super::super::db::{now_ms, MessageDb};
use super::super::types::{EndpointId, MessageStatus, NewMessage};

impl MessageDb {
    /// Insert a new message row.
    ///
    /// The scheduler itself never creates messages; rows arrive from the
    /// embedding application (or the CLI) and are only moved between
    /// statuses from then on.
    pub async fn insert_message(&self, msg: &NewMessage) -> Result<()> {
        let now = now_ms();
        let meta_json = serde_json::to_string(&msg.meta)?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, endpoint_id, status,
                received_ts, retry_start_ts, meta_json,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(msg.endpoint_id)
        .bind(msg.status.as_str())
        .bind(msg.received_ts)
        .bind(msg.received_ts)
        .bind(meta_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update the status of an existing message.
    pub async fn set_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
            UPDATE messages
            SET status = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move a message to its terminal failed status.
    ///
    /// Callers that need observers to hear about it emit the change event
    /// themselves; the store does not know who is watching.
    pub async fn mark_failed(&self, id: &str) -> Result<()> {
        self.set_status(id, MessageStatus::Failed).await
    }

    /// Normalize any message left in-flight by a previous process.
    ///
    /// Sends go back to `awaiting_retry`, downloads to their retrying
    /// status. Call once at startup, before the first scheduler pass, so
    /// work stranded by a crash is attempted again instead of blocking
    /// its endpoint forever. Returns the number of messages reset.
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let now = now_ms();
        let mut total = 0u64;

        let r = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'awaiting_retry',
                updated_at = ?1
            WHERE status IN ('sending', 'resending')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        total += r.rows_affected();

        let r = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'retrying_auto_download',
                updated_at = ?1
            WHERE status = 'auto_downloading'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        total += r.rows_affected();

        let r = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'retrying_manual_download',
                updated_at = ?1
            WHERE status = 'manual_downloading'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        total += r.rows_affected();

        Ok(total)
    }

    /// Register an endpoint as active if it has no row yet.
    ///
    /// Leaves a deliberately deactivated endpoint alone. Insertion paths
    /// call this so a freshly added message is not swept as "unknown
    /// endpoint" on its first eligibility pass.
    pub async fn ensure_endpoint(&self, endpoint: EndpointId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO endpoints (endpoint_id, active)
            VALUES (?1, 1)
            "#,
        )
        .bind(endpoint)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark an endpoint active or inactive, creating its row if missing.
    ///
    /// Messages bound to an inactive endpoint fail out during the next
    /// eligibility sweep rather than retrying forever.
    pub async fn set_endpoint_active(&self, endpoint: EndpointId, active: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO endpoints (endpoint_id, active)
            VALUES (?1, ?2)
            ON CONFLICT(endpoint_id) DO UPDATE SET active = ?2
            "#,
        )
        .bind(endpoint)
        .bind(active as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
