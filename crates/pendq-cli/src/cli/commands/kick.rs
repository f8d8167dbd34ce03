//! `pendq kick` – one scheduling pass, then wait for the queue to settle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use pendq_core::config::PendqConfig;
use pendq_core::connectivity::ConnectivityFeed;
use pendq_core::scheduler::Scheduler;
use pendq_core::store::{ChangeNotifier, EndpointId, MessageDb, MessageStatus};
use pendq_core::units::{AlwaysReady, LoggingTransport, TransportWorkProvider};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Statuses that count as unfinished business for the drain loop.
const OPEN_STATUSES: &[MessageStatus] = &[
    MessageStatus::YetToSend,
    MessageStatus::AwaitingRetry,
    MessageStatus::Sending,
    MessageStatus::Resending,
    MessageStatus::RetryingAutoDownload,
    MessageStatus::RetryingManualDownload,
    MessageStatus::AutoDownloading,
    MessageStatus::ManualDownloading,
];

pub async fn run_kick(
    db: &MessageDb,
    cfg: &PendqConfig,
    endpoint: Option<EndpointId>,
) -> Result<()> {
    let recovered = db.recover_in_flight().await?;
    if recovered > 0 {
        tracing::info!("recovered {recovered} in-flight message(s) from previous run");
    }

    let provider = Arc::new(TransportWorkProvider::new(
        db.clone(),
        Arc::new(LoggingTransport),
        ChangeNotifier::disabled(),
        cfg.resend_window(),
    ));
    let handle = Scheduler::spawn(
        db.clone(),
        cfg,
        provider,
        Arc::new(AlwaysReady),
        Arc::new(ConnectivityFeed::new()),
        ChangeNotifier::disabled(),
    );

    let targets: Vec<EndpointId> = match endpoint {
        Some(endpoint) => {
            handle.process_now(endpoint);
            vec![endpoint]
        }
        None => {
            handle.process_all();
            db.active_endpoints().await?
        }
    };

    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let mut open = 0i64;
        for &target in &targets {
            open += db.count_in_status(target, OPEN_STATUSES).await?;
        }
        if open == 0 {
            println!("Queue settled.");
            break;
        }
        if Instant::now() >= deadline {
            println!("Gave up waiting; {open} message(s) still open.");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    handle.shutdown().await;
    Ok(())
}
