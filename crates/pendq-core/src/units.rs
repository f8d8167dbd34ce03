//! Send/download work units and the transport seam they run against.
//!
//! The scheduler decides *which* message moves next; the units here own
//! the status flips around one delivery attempt and hand the payload to
//! a [`Transport`]. Swapping the transport (real radio, test script,
//! logging stub) changes nothing about scheduling.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatcher::WorkUnit;
use crate::store::{
    now_ms, ChangeNotifier, EndpointId, MessageDb, MessageId, MessageRow, MessageStatus,
};

/// Why a delivery attempt failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not ready")]
    NotReady,
    #[error("send rejected: {0}")]
    SendFailed(String),
    #[error("download rejected: {0}")]
    DownloadFailed(String),
}

/// Delivery backend for one attempt. Implementations block until the
/// attempt is decided; retry timing lives entirely in the scheduler.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, message: &MessageRow) -> Result<(), TransportError>;
    async fn download_message(&self, message: &MessageRow) -> Result<(), TransportError>;
}

/// Readiness check consulted before any work is queued. When not ready
/// the scheduler arms its retry triggers instead of dispatching.
pub trait TransportGate: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Gate for deployments where the transport is always usable.
pub struct AlwaysReady;

impl TransportGate for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Transport that logs each attempt and reports success. Used by the CLI
/// demo loop; real deployments plug in their own [`Transport`].
pub struct LoggingTransport;

#[async_trait]
impl Transport for LoggingTransport {
    async fn send_message(&self, message: &MessageRow) -> Result<(), TransportError> {
        info!(
            "sending message {} to {}",
            message.id,
            message.meta.recipient.as_deref().unwrap_or("<unset>")
        );
        Ok(())
    }

    async fn download_message(&self, message: &MessageRow) -> Result<(), TransportError> {
        info!("downloading message {}", message.id);
        Ok(())
    }
}

/// Builds work units for the scheduler. The scheduler never constructs
/// units itself, so embedders can substitute their own implementations
/// wholesale.
pub trait WorkProvider: Send + Sync {
    fn send_unit(&self, endpoint: EndpointId, message_id: &str) -> Box<dyn WorkUnit>;
    fn download_unit(&self, endpoint: EndpointId, message_id: &str) -> Box<dyn WorkUnit>;
}

/// Standard provider: units that move statuses in the store and deliver
/// through a [`Transport`].
pub struct TransportWorkProvider {
    db: MessageDb,
    transport: Arc<dyn Transport>,
    notifier: ChangeNotifier,
    resend_window: Duration,
}

impl TransportWorkProvider {
    pub fn new(
        db: MessageDb,
        transport: Arc<dyn Transport>,
        notifier: ChangeNotifier,
        resend_window: Duration,
    ) -> Self {
        TransportWorkProvider {
            db,
            transport,
            notifier,
            resend_window,
        }
    }
}

impl WorkProvider for TransportWorkProvider {
    fn send_unit(&self, endpoint: EndpointId, message_id: &str) -> Box<dyn WorkUnit> {
        Box::new(SendUnit {
            db: self.db.clone(),
            transport: Arc::clone(&self.transport),
            notifier: self.notifier.clone(),
            resend_window: self.resend_window,
            endpoint,
            message_id: message_id.to_string(),
            phase: UnitPhase::Queued,
        })
    }

    fn download_unit(&self, endpoint: EndpointId, message_id: &str) -> Box<dyn WorkUnit> {
        Box::new(DownloadUnit {
            db: self.db.clone(),
            transport: Arc::clone(&self.transport),
            notifier: self.notifier.clone(),
            resend_window: self.resend_window,
            endpoint,
            message_id: message_id.to_string(),
            phase: UnitPhase::Queued,
        })
    }
}

/// Lifecycle bookkeeping shared by both unit kinds. The dispatcher
/// drives Queued -> Running -> Reported in order, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitPhase {
    Queued,
    Running,
    Reported,
}

/// One send attempt for one message.
struct SendUnit {
    db: MessageDb,
    transport: Arc<dyn Transport>,
    notifier: ChangeNotifier,
    resend_window: Duration,
    endpoint: EndpointId,
    message_id: MessageId,
    phase: UnitPhase,
}

#[async_trait]
impl WorkUnit for SendUnit {
    fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    fn describe(&self) -> String {
        format!("send of message {}", self.message_id)
    }

    fn mark_starting(&mut self) {
        debug_assert_eq!(self.phase, UnitPhase::Queued);
        self.phase = UnitPhase::Running;
    }

    fn mark_completion_queued(&mut self) {
        debug_assert_eq!(self.phase, UnitPhase::Running);
        self.phase = UnitPhase::Reported;
    }

    async fn execute(&mut self) -> Result<()> {
        let Some(mut row) = self.db.get_message(&self.message_id).await? else {
            bail!("message {} disappeared before sending", self.message_id);
        };
        if !row.status.is_pending_send() {
            // Raced with a manual intervention; nothing left to do here.
            info!(
                "message {} is {:?}, skipping send",
                self.message_id, row.status
            );
            return Ok(());
        }

        let resending = row.status == MessageStatus::AwaitingRetry;
        let in_flight = if resending {
            MessageStatus::Resending
        } else {
            MessageStatus::Sending
        };
        self.db.set_status(&row.id, in_flight).await?;
        self.notifier.notify(&row.conversation_id, &row.id);
        row.status = in_flight;

        match self.transport.send_message(&row).await {
            Ok(()) => {
                self.db.set_status(&row.id, MessageStatus::Complete).await?;
                self.notifier.notify(&row.conversation_id, &row.id);
                Ok(())
            }
            Err(err) => {
                // Back to the retry queue while the resend window lasts;
                // after that the message is done for.
                if row.in_resend_window(now_ms(), self.resend_window) {
                    self.db
                        .set_status(&row.id, MessageStatus::AwaitingRetry)
                        .await?;
                } else {
                    warn!("message {} expired while failing to send", row.id);
                    self.db.mark_failed(&row.id).await?;
                }
                self.notifier.notify(&row.conversation_id, &row.id);
                Err(err.into())
            }
        }
    }
}

/// One download attempt for one message.
struct DownloadUnit {
    db: MessageDb,
    transport: Arc<dyn Transport>,
    notifier: ChangeNotifier,
    resend_window: Duration,
    endpoint: EndpointId,
    message_id: MessageId,
    phase: UnitPhase,
}

#[async_trait]
impl WorkUnit for DownloadUnit {
    fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    fn describe(&self) -> String {
        format!("download of message {}", self.message_id)
    }

    fn mark_starting(&mut self) {
        debug_assert_eq!(self.phase, UnitPhase::Queued);
        self.phase = UnitPhase::Running;
    }

    fn mark_completion_queued(&mut self) {
        debug_assert_eq!(self.phase, UnitPhase::Running);
        self.phase = UnitPhase::Reported;
    }

    async fn execute(&mut self) -> Result<()> {
        let Some(mut row) = self.db.get_message(&self.message_id).await? else {
            bail!("message {} disappeared before download", self.message_id);
        };
        if !row.status.is_pending_download() {
            info!(
                "message {} is {:?}, skipping download",
                self.message_id, row.status
            );
            return Ok(());
        }

        // Expiry is judged here, not in the eligibility query, so a
        // just-expired download settles the moment it is attempted. A
        // worn-out download is not a transport failure: report success so
        // the next pending download gets its turn immediately.
        if !row.in_resend_window(now_ms(), self.resend_window) {
            warn!("download window for message {} expired", row.id);
            self.db.mark_failed(&row.id).await?;
            self.notifier.notify(&row.conversation_id, &row.id);
            return Ok(());
        }

        let retrying = row.status;
        let in_flight = if retrying == MessageStatus::RetryingManualDownload {
            MessageStatus::ManualDownloading
        } else {
            MessageStatus::AutoDownloading
        };
        self.db.set_status(&row.id, in_flight).await?;
        self.notifier.notify(&row.conversation_id, &row.id);
        row.status = in_flight;

        match self.transport.download_message(&row).await {
            Ok(()) => {
                self.db.set_status(&row.id, MessageStatus::Complete).await?;
                self.notifier.notify(&row.conversation_id, &row.id);
                Ok(())
            }
            Err(err) => {
                self.db.set_status(&row.id, retrying).await?;
                self.notifier.notify(&row.conversation_id, &row.id);
                Err(err.into())
            }
        }
    }
}
