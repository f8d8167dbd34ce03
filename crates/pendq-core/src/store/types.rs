//! Types used by the message store.

use std::time::Duration;

/// Endpoint identifier (delivery channel a message is bound to).
pub type EndpointId = i64;

/// Endpoint used when a message has no explicit binding.
pub const DEFAULT_ENDPOINT_ID: EndpointId = -1;

/// Message identifier. Opaque to the scheduler; assigned by whoever
/// inserts the row.
pub type MessageId = String;

/// Delivery status stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    YetToSend,
    Sending,
    AwaitingRetry,
    Resending,
    Failed,
    AutoDownloading,
    ManualDownloading,
    RetryingAutoDownload,
    RetryingManualDownload,
    Complete,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::YetToSend => "yet_to_send",
            MessageStatus::Sending => "sending",
            MessageStatus::AwaitingRetry => "awaiting_retry",
            MessageStatus::Resending => "resending",
            MessageStatus::Failed => "failed",
            MessageStatus::AutoDownloading => "auto_downloading",
            MessageStatus::ManualDownloading => "manual_downloading",
            MessageStatus::RetryingAutoDownload => "retrying_auto_download",
            MessageStatus::RetryingManualDownload => "retrying_manual_download",
            MessageStatus::Complete => "complete",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "yet_to_send" => MessageStatus::YetToSend,
            "sending" => MessageStatus::Sending,
            "awaiting_retry" => MessageStatus::AwaitingRetry,
            "resending" => MessageStatus::Resending,
            "failed" => MessageStatus::Failed,
            "auto_downloading" => MessageStatus::AutoDownloading,
            "manual_downloading" => MessageStatus::ManualDownloading,
            "retrying_auto_download" => MessageStatus::RetryingAutoDownload,
            "retrying_manual_download" => MessageStatus::RetryingManualDownload,
            "complete" => MessageStatus::Complete,
            _ => MessageStatus::Failed,
        }
    }

    /// Waiting for an outbound send attempt.
    pub fn is_pending_send(self) -> bool {
        matches!(self, MessageStatus::YetToSend | MessageStatus::AwaitingRetry)
    }

    /// Waiting for a download retry.
    pub fn is_pending_download(self) -> bool {
        matches!(
            self,
            MessageStatus::RetryingAutoDownload | MessageStatus::RetryingManualDownload
        )
    }

}

/// Per-message payload metadata, stored as JSON in the DB.
///
/// The scheduler never interprets this; it is carried for the transport
/// and for display. Kept structured so fields can be added without a
/// schema migration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct MessageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Summary view used by the CLI `status` command.
#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub id: MessageId,
    pub conversation_id: String,
    pub endpoint_id: EndpointId,
    pub status: MessageStatus,
    pub received_ts: i64,
}

/// Full message record used by the scheduler / work units.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: String,
    pub endpoint_id: EndpointId,
    pub status: MessageStatus,
    pub received_ts: i64,
    pub retry_start_ts: i64,
    pub meta: MessageMeta,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MessageRow {
    /// Whether the message is still inside its resend window.
    ///
    /// The window is anchored at `retry_start_ts` (first queue time), not at
    /// the latest attempt, so a message cannot retry forever.
    pub fn in_resend_window(&self, now_ms: i64, window: Duration) -> bool {
        now_ms - self.retry_start_ts < window.as_millis() as i64
    }
}

/// Fields for inserting a new message row.
///
/// `retry_start_ts` is set to `received_ts` on insert; it anchors the
/// resend window for the lifetime of the row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub conversation_id: String,
    pub endpoint_id: EndpointId,
    pub status: MessageStatus,
    pub received_ts: i64,
    pub meta: MessageMeta,
}
