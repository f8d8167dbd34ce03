//! The eligibility query: which message (if any) each endpoint should
//! send or download next.
//!
//! Runs as a single transaction so the stale-message sweep and the
//! candidate selection observe the same snapshot. Change events for
//! swept messages are emitted after the transaction commits, so
//! observers never see uncommitted state.

use anyhow::Result;
use sqlx::Row;
use std::time::Duration;
use tracing::debug;

use super::db::{now_ms, MessageDb};
use super::notify::ChangeNotifier;
use super::types::{EndpointId, MessageId};

/// Result of [`MessageDb::claim_eligible`]: at most one message to send
/// plus at most one to download.
///
/// Queueing no more than one of each keeps outgoing messages in order
/// while still letting downloads proceed when sending is blocked.
#[derive(Debug, Clone, Default)]
pub struct EligibleWork {
    pub to_send: Option<MessageId>,
    pub to_download: Option<MessageId>,
}

impl EligibleWork {
    pub fn is_empty(&self) -> bool {
        self.to_send.is_none() && self.to_download.is_none()
    }
}

impl MessageDb {
    /// Select the next work for `endpoint`, sweeping stale messages on
    /// the way.
    ///
    /// Send side: walks pending messages oldest-first. Messages that can
    /// no longer be sent (endpoint inactive, or resend window expired)
    /// are marked failed; the walk stops at the first healthy candidate,
    /// which is selected only if nothing is already sending. Download
    /// side: the oldest pending download is selected if nothing is
    /// already downloading; download expiry is judged by the download
    /// unit itself, not here.
    ///
    /// The sweep commits even when nothing is selected.
    pub async fn claim_eligible(
        &self,
        endpoint: EndpointId,
        resend_window: Duration,
        notifier: &ChangeNotifier,
    ) -> Result<EligibleWork> {
        let now = now_ms();
        let window_ms = resend_window.as_millis() as i64;

        let mut tx = self.pool.begin().await?;

        // An endpoint with no row was never registered; treat it like an
        // inactive one so its messages fail out instead of retrying forever.
        let active_row = sqlx::query(
            r#"
            SELECT active FROM endpoints
            WHERE endpoint_id = ?1
            "#,
        )
        .bind(endpoint)
        .fetch_optional(&mut *tx)
        .await?;
        let active = matches!(active_row.map(|r| r.get::<i64, _>("active")), Some(1));

        // First check to see if we have any messages already sending.
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM messages
            WHERE status IN ('sending', 'resending') AND endpoint_id = ?1
            "#,
        )
        .bind(endpoint)
        .fetch_one(&mut *tx)
        .await?;
        let sending_cnt: i64 = row.get("n");

        // Look for messages we could send.
        let pending = sqlx::query(
            r#"
            SELECT id, conversation_id, retry_start_ts FROM messages
            WHERE status IN ('yet_to_send', 'awaiting_retry') AND endpoint_id = ?1
            ORDER BY received_ts ASC
            "#,
        )
        .bind(endpoint)
        .fetch_all(&mut *tx)
        .await?;
        let pending_cnt = pending.len();

        let mut to_send: Option<MessageId> = None;
        let mut swept: Vec<(String, MessageId)> = Vec::new();
        for row in &pending {
            let id: String = row.get("id");
            let conversation_id: String = row.get("conversation_id");
            let retry_start_ts: i64 = row.get("retry_start_ts");

            if !active || now - retry_start_ts >= window_ms {
                sqlx::query(
                    r#"
                    UPDATE messages
                    SET status = 'failed',
                        updated_at = ?1
                    WHERE id = ?2
                    "#,
                )
                .bind(now)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
                swept.push((conversation_id, id));
            } else {
                // If no messages currently sending, send this one.
                if sending_cnt == 0 {
                    to_send = Some(id);
                }
                break;
            }
        }

        // First check if we have any messages already downloading.
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM messages
            WHERE status IN ('auto_downloading', 'manual_downloading') AND endpoint_id = ?1
            "#,
        )
        .bind(endpoint)
        .fetch_one(&mut *tx)
        .await?;
        let downloading_cnt: i64 = row.get("n");

        // If nothing is downloading, queue the oldest pending download.
        let mut to_download: Option<MessageId> = None;
        if downloading_cnt == 0 {
            let row = sqlx::query(
                r#"
                SELECT id FROM messages
                WHERE status IN ('retrying_auto_download', 'retrying_manual_download')
                  AND endpoint_id = ?1
                ORDER BY received_ts ASC
                LIMIT 1
                "#,
            )
            .bind(endpoint)
            .fetch_optional(&mut *tx)
            .await?;
            to_download = row.map(|r| r.get("id"));
        }

        tx.commit().await?;

        for (conversation_id, message_id) in &swept {
            notifier.notify(conversation_id, message_id);
        }

        debug!(
            endpoint,
            "{} already sending, {} pending, {} failed out, {} downloading",
            sending_cnt,
            pending_cnt,
            swept.len(),
            downloading_cnt
        );

        Ok(EligibleWork { to_send, to_download })
    }
}
