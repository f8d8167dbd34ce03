//! `pendq status` – show all messages.

use anyhow::Result;
use pendq_core::store::{now_ms, MessageDb};

pub async fn run_status(db: &MessageDb, json: bool) -> Result<()> {
    let messages = db.list_messages().await?;

    if json {
        let rows: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "conversation": m.conversation_id,
                    "endpoint": m.endpoint_id,
                    "status": m.status.as_str(),
                    "received_ts": m.received_ts,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!("No messages in database.");
    } else {
        let now = now_ms();
        println!(
            "{:<38} {:<9} {:<25} {:<8} {}",
            "ID", "ENDPOINT", "STATUS", "AGE", "CONVERSATION"
        );
        for m in messages {
            let age_secs = (now - m.received_ts).max(0) / 1000;
            println!(
                "{:<38} {:<9} {:<25} {:<8} {}",
                m.id,
                m.endpoint_id,
                m.status.as_str(),
                format!("{age_secs}s"),
                m.conversation_id
            );
        }
    }
    Ok(())
}
