//! Message read operations: list, get, counts, endpoint listing.

use anyhow::Result;
use sqlx::Row;

use super::super::db::MessageDb;
use super::super::types::{
    EndpointId, MessageMeta, MessageRow, MessageStatus, MessageSummary,
};

impl MessageDb {
    /// List all messages in the database, oldest first (arrival order).
    pub async fn list_messages(&self) -> Result<Vec<MessageSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, endpoint_id, status, received_ts
            FROM messages
            ORDER BY received_ts ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status_str: String = row.get("status");
            out.push(MessageSummary {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                endpoint_id: row.get("endpoint_id"),
                status: MessageStatus::from_str(&status_str),
                received_ts: row.get("received_ts"),
            });
        }

        Ok(out)
    }

    /// Fetch a single message row with full metadata for a work unit.
    pub async fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, conversation_id, endpoint_id, status,
                received_ts, retry_start_ts, meta_json,
                created_at, updated_at
            FROM messages
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_str: String = row.get("status");
        let meta_json: Option<String> = row.get("meta_json");
        let meta = meta_json
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(serde_json::from_str::<MessageMeta>)
            .transpose()?
            .unwrap_or_default();

        Ok(Some(MessageRow {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            endpoint_id: row.get("endpoint_id"),
            status: MessageStatus::from_str(&status_str),
            received_ts: row.get("received_ts"),
            retry_start_ts: row.get("retry_start_ts"),
            meta,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Count an endpoint's messages in any of the given statuses.
    pub async fn count_in_status(
        &self,
        endpoint: EndpointId,
        statuses: &[MessageStatus],
    ) -> Result<i64> {
        let mut total = 0i64;
        for status in statuses {
            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS n FROM messages
                WHERE endpoint_id = ?1 AND status = ?2
                "#,
            )
            .bind(endpoint)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
            let n: i64 = row.get("n");
            total += n;
        }
        Ok(total)
    }

    /// All endpoints currently marked active.
    pub async fn active_endpoints(&self) -> Result<Vec<EndpointId>> {
        let rows = sqlx::query(
            r#"
            SELECT endpoint_id FROM endpoints
            WHERE active = 1
            ORDER BY endpoint_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("endpoint_id")).collect())
    }
}
