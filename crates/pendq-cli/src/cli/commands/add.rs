//! `pendq add <conversation>` – queue a new message.

use anyhow::Result;
use pendq_core::store::{now_ms, MessageDb, MessageMeta, MessageStatus, NewMessage};
use uuid::Uuid;

pub async fn run_add(
    db: &MessageDb,
    conversation: &str,
    endpoint: i64,
    recipient: Option<String>,
    note: Option<String>,
    download: bool,
) -> Result<()> {
    let id = Uuid::new_v4().to_string();
    let status = if download {
        MessageStatus::RetryingAutoDownload
    } else {
        MessageStatus::YetToSend
    };

    db.ensure_endpoint(endpoint).await?;
    db.insert_message(&NewMessage {
        id: id.clone(),
        conversation_id: conversation.to_string(),
        endpoint_id: endpoint,
        status,
        received_ts: now_ms(),
        meta: MessageMeta { recipient, note },
    })
    .await?;

    println!("Queued message {id} in conversation {conversation} (endpoint {endpoint})");
    Ok(())
}
