//! Change notifications for observers (UI, log tails).
//!
//! Status flips that happen deep inside the eligibility sweep or a work
//! unit are surfaced here so conversation views can refresh without
//! polling the store.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use super::types::MessageId;

/// Emitted whenever a message's visible delivery state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub conversation_id: String,
    pub message_id: MessageId,
}

/// Non-blocking fan-out handle for [`ChangeEvent`]s.
///
/// Sends never block store transactions or work units; if the observer
/// falls behind, events are dropped with a warning.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: Option<mpsc::Sender<ChangeEvent>>,
}

impl ChangeNotifier {
    pub fn new(tx: mpsc::Sender<ChangeEvent>) -> Self {
        ChangeNotifier { tx: Some(tx) }
    }

    /// A notifier that discards everything. Useful when no observer exists.
    pub fn disabled() -> Self {
        ChangeNotifier { tx: None }
    }

    pub fn notify(&self, conversation_id: &str, message_id: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ChangeEvent {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                warn!(
                    "change feed full; dropping event for message {} in {}",
                    ev.message_id, ev.conversation_id
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
