//! `pendq run` – scheduler daemon until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use pendq_core::config::PendqConfig;
use pendq_core::connectivity::ConnectivityFeed;
use pendq_core::scheduler::Scheduler;
use pendq_core::store::{ChangeNotifier, MessageDb};
use pendq_core::units::{AlwaysReady, LoggingTransport, TransportWorkProvider};

pub async fn run_daemon(db: &MessageDb, cfg: &PendqConfig) -> Result<()> {
    let recovered = db.recover_in_flight().await?;
    if recovered > 0 {
        tracing::info!("recovered {recovered} in-flight message(s) from previous run");
    }

    let (events_tx, mut events) = tokio::sync::mpsc::channel(64);
    let notifier = ChangeNotifier::new(events_tx);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!(
                "conversation {}: message {} changed",
                event.conversation_id, event.message_id
            );
        }
    });

    let provider = Arc::new(TransportWorkProvider::new(
        db.clone(),
        Arc::new(LoggingTransport),
        notifier.clone(),
        cfg.resend_window(),
    ));
    let feed = Arc::new(ConnectivityFeed::new());
    let handle = Scheduler::spawn(
        db.clone(),
        cfg,
        provider,
        Arc::new(AlwaysReady),
        feed,
        notifier,
    );

    handle.process_all();
    println!("pendq scheduler running; press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("interrupt received; shutting down");
    handle.shutdown().await;
    let _ = printer.await;
    Ok(())
}
