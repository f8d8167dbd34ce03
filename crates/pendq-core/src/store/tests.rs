//! Tests for the message store (use in-memory DB helper from db).

use std::time::Duration;

use tokio::sync::mpsc;

use crate::store::db::{now_ms, open_memory};
use crate::store::{
    ChangeNotifier, EndpointId, MessageMeta, MessageRow, MessageStatus, NewMessage,
};

const WINDOW: Duration = Duration::from_secs(1200);

fn msg(id: &str, endpoint: EndpointId, status: MessageStatus, received_ts: i64) -> NewMessage {
    NewMessage {
        id: id.to_string(),
        conversation_id: format!("conv-{id}"),
        endpoint_id: endpoint,
        status,
        received_ts,
        meta: MessageMeta::default(),
    }
}

/// A received_ts old enough that the resend window has expired.
fn expired_ts() -> i64 {
    now_ms() - WINDOW.as_millis() as i64 - 60_000
}

#[tokio::test]
async fn message_status_roundtrip_via_db() {
    let db = open_memory().await.unwrap();
    db.insert_message(&msg("m1", 1, MessageStatus::YetToSend, now_ms()))
        .await
        .unwrap();

    let all = db.list_messages().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "m1");
    assert_eq!(all[0].status, MessageStatus::YetToSend);
    assert_eq!(all[0].conversation_id, "conv-m1");

    db.set_status("m1", MessageStatus::Sending).await.unwrap();
    assert_eq!(
        db.list_messages().await.unwrap()[0].status,
        MessageStatus::Sending
    );

    db.set_status("m1", MessageStatus::Complete).await.unwrap();
    assert_eq!(
        db.list_messages().await.unwrap()[0].status,
        MessageStatus::Complete
    );

    db.mark_failed("m1").await.unwrap();
    assert_eq!(
        db.list_messages().await.unwrap()[0].status,
        MessageStatus::Failed
    );
}

#[tokio::test]
async fn list_messages_oldest_first() {
    let db = open_memory().await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("newer", 1, MessageStatus::YetToSend, base + 500))
        .await
        .unwrap();
    db.insert_message(&msg("older", 1, MessageStatus::YetToSend, base))
        .await
        .unwrap();

    let all = db.list_messages().await.unwrap();
    assert_eq!(all[0].id, "older");
    assert_eq!(all[1].id, "newer");
}

#[tokio::test]
async fn meta_roundtrip_via_get() {
    let db = open_memory().await.unwrap();
    let mut m = msg("m1", 1, MessageStatus::YetToSend, now_ms());
    m.meta = MessageMeta {
        recipient: Some("+15551234567".to_string()),
        note: Some("greeting".to_string()),
    };
    db.insert_message(&m).await.unwrap();

    let row = db.get_message("m1").await.unwrap().expect("row exists");
    assert_eq!(row.meta.recipient.as_deref(), Some("+15551234567"));
    assert_eq!(row.meta.note.as_deref(), Some("greeting"));
    assert_eq!(row.retry_start_ts, row.received_ts);

    assert!(db.get_message("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn recover_in_flight_resets_stranded_work() {
    let db = open_memory().await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("s1", 1, MessageStatus::Sending, base))
        .await
        .unwrap();
    db.insert_message(&msg("s2", 1, MessageStatus::Resending, base))
        .await
        .unwrap();
    db.insert_message(&msg("d1", 1, MessageStatus::AutoDownloading, base))
        .await
        .unwrap();
    db.insert_message(&msg("d2", 1, MessageStatus::ManualDownloading, base))
        .await
        .unwrap();
    db.insert_message(&msg("q1", 1, MessageStatus::YetToSend, base))
        .await
        .unwrap();

    let n = db.recover_in_flight().await.unwrap();
    assert_eq!(n, 4);

    let status_of = |all: &Vec<crate::store::MessageSummary>, id: &str| {
        all.iter().find(|m| m.id == id).unwrap().status
    };
    let all = db.list_messages().await.unwrap();
    assert_eq!(status_of(&all, "s1"), MessageStatus::AwaitingRetry);
    assert_eq!(status_of(&all, "s2"), MessageStatus::AwaitingRetry);
    assert_eq!(status_of(&all, "d1"), MessageStatus::RetryingAutoDownload);
    assert_eq!(status_of(&all, "d2"), MessageStatus::RetryingManualDownload);
    assert_eq!(status_of(&all, "q1"), MessageStatus::YetToSend);
}

#[tokio::test]
async fn claim_eligible_selects_oldest_pending() {
    let db = open_memory().await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("m2", 1, MessageStatus::YetToSend, base + 1000))
        .await
        .unwrap();
    db.insert_message(&msg("m1", 1, MessageStatus::AwaitingRetry, base))
        .await
        .unwrap();

    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert_eq!(work.to_send.as_deref(), Some("m1"));
    assert_eq!(work.to_download, None);

    // Selection does not change status; the work unit does that.
    let all = db.list_messages().await.unwrap();
    assert_eq!(all[0].status, MessageStatus::AwaitingRetry);
}

#[tokio::test]
async fn claim_eligible_skips_send_when_already_sending() {
    let db = open_memory().await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("inflight", 1, MessageStatus::Sending, base))
        .await
        .unwrap();
    db.insert_message(&msg("waiting", 1, MessageStatus::YetToSend, base + 1000))
        .await
        .unwrap();

    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert_eq!(work.to_send, None);

    // The healthy candidate is left alone for the next pass.
    let all = db.list_messages().await.unwrap();
    let waiting = all.iter().find(|m| m.id == "waiting").unwrap();
    assert_eq!(waiting.status, MessageStatus::YetToSend);
}

#[tokio::test]
async fn claim_eligible_sweeps_expired_and_selects_next() {
    let db = open_memory().await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    db.insert_message(&msg("stale", 1, MessageStatus::AwaitingRetry, expired_ts()))
        .await
        .unwrap();
    db.insert_message(&msg("fresh", 1, MessageStatus::YetToSend, now_ms()))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let notifier = ChangeNotifier::new(tx);
    let work = db.claim_eligible(1, WINDOW, &notifier).await.unwrap();
    assert_eq!(work.to_send.as_deref(), Some("fresh"));

    let all = db.list_messages().await.unwrap();
    let stale = all.iter().find(|m| m.id == "stale").unwrap();
    assert_eq!(stale.status, MessageStatus::Failed);

    let ev = rx.try_recv().unwrap();
    assert_eq!(ev.message_id, "stale");
    assert_eq!(ev.conversation_id, "conv-stale");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn claim_eligible_fails_all_when_endpoint_inactive() {
    let db = open_memory().await.unwrap();
    db.set_endpoint_active(1, false).await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("m1", 1, MessageStatus::YetToSend, base))
        .await
        .unwrap();
    db.insert_message(&msg("m2", 1, MessageStatus::AwaitingRetry, base + 1000))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::new(tx))
        .await
        .unwrap();
    assert!(work.is_empty());

    let all = db.list_messages().await.unwrap();
    assert!(all.iter().all(|m| m.status == MessageStatus::Failed));
    assert_eq!(rx.try_recv().unwrap().message_id, "m1");
    assert_eq!(rx.try_recv().unwrap().message_id, "m2");
}

#[tokio::test]
async fn claim_eligible_unknown_endpoint_treated_inactive() {
    let db = open_memory().await.unwrap();
    db.insert_message(&msg("m1", 7, MessageStatus::YetToSend, now_ms()))
        .await
        .unwrap();

    let work = db
        .claim_eligible(7, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert!(work.is_empty());
    assert_eq!(
        db.list_messages().await.unwrap()[0].status,
        MessageStatus::Failed
    );
}

#[tokio::test]
async fn claim_eligible_sweep_commits_without_selection() {
    let db = open_memory().await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    db.insert_message(&msg("old1", 1, MessageStatus::AwaitingRetry, expired_ts()))
        .await
        .unwrap();
    db.insert_message(&msg("old2", 1, MessageStatus::AwaitingRetry, expired_ts()))
        .await
        .unwrap();

    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert!(work.is_empty());

    let all = db.list_messages().await.unwrap();
    assert!(all.iter().all(|m| m.status == MessageStatus::Failed));
}

#[tokio::test]
async fn claim_eligible_download_oldest_when_idle() {
    let db = open_memory().await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    let base = now_ms();
    db.insert_message(&msg(
        "d-new",
        1,
        MessageStatus::RetryingManualDownload,
        base + 1000,
    ))
    .await
    .unwrap();
    db.insert_message(&msg("d-old", 1, MessageStatus::RetryingAutoDownload, base))
        .await
        .unwrap();

    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert_eq!(work.to_download.as_deref(), Some("d-old"));

    // With a download in flight nothing further is selected.
    db.set_status("d-old", MessageStatus::AutoDownloading)
        .await
        .unwrap();
    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert_eq!(work.to_download, None);
}

#[tokio::test]
async fn claim_eligible_scoped_to_endpoint() {
    let db = open_memory().await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    db.ensure_endpoint(2).await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("e1", 1, MessageStatus::YetToSend, base))
        .await
        .unwrap();
    db.insert_message(&msg("e2", 2, MessageStatus::YetToSend, base))
        .await
        .unwrap();
    // Endpoint 2 already has a send in flight; endpoint 1 does not.
    db.insert_message(&msg("e2-inflight", 2, MessageStatus::Sending, base))
        .await
        .unwrap();

    let work = db
        .claim_eligible(1, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert_eq!(work.to_send.as_deref(), Some("e1"));

    let work = db
        .claim_eligible(2, WINDOW, &ChangeNotifier::disabled())
        .await
        .unwrap();
    assert_eq!(work.to_send, None);
}

#[tokio::test]
async fn retry_counter_increments_and_resets() {
    let db = open_memory().await.unwrap();
    assert_eq!(db.current_retry(1).await.unwrap(), 0);
    assert_eq!(db.get_and_increment_retry(1).await.unwrap(), 1);
    assert_eq!(db.get_and_increment_retry(1).await.unwrap(), 2);
    assert_eq!(db.get_and_increment_retry(1).await.unwrap(), 3);
    assert_eq!(db.current_retry(1).await.unwrap(), 3);

    // Counters are per endpoint.
    assert_eq!(db.get_and_increment_retry(2).await.unwrap(), 1);

    db.reset_retry(1).await.unwrap();
    assert_eq!(db.current_retry(1).await.unwrap(), 0);
    assert_eq!(db.get_and_increment_retry(1).await.unwrap(), 1);
}

#[tokio::test]
async fn state_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("messages.db");

    {
        let db = crate::store::MessageDb::open_at(&path).await.unwrap();
        db.ensure_endpoint(1).await.unwrap();
        db.insert_message(&msg("m1", 1, MessageStatus::AwaitingRetry, now_ms()))
            .await
            .unwrap();
        db.get_and_increment_retry(1).await.unwrap();
        db.get_and_increment_retry(1).await.unwrap();
    }

    let db = crate::store::MessageDb::open_at(&path).await.unwrap();
    assert_eq!(db.current_retry(1).await.unwrap(), 2);
    let all = db.list_messages().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, MessageStatus::AwaitingRetry);
    assert_eq!(db.active_endpoints().await.unwrap(), vec![1]);
}

#[tokio::test]
async fn ensure_endpoint_keeps_deactivated() {
    let db = open_memory().await.unwrap();
    db.set_endpoint_active(1, false).await.unwrap();
    db.ensure_endpoint(1).await.unwrap();
    assert!(db.active_endpoints().await.unwrap().is_empty());

    db.ensure_endpoint(2).await.unwrap();
    db.set_endpoint_active(3, true).await.unwrap();
    assert_eq!(db.active_endpoints().await.unwrap(), vec![2, 3]);

    db.set_endpoint_active(1, true).await.unwrap();
    assert_eq!(db.active_endpoints().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn count_in_status_sums_requested_statuses() {
    let db = open_memory().await.unwrap();
    let base = now_ms();
    db.insert_message(&msg("a", 1, MessageStatus::Sending, base))
        .await
        .unwrap();
    db.insert_message(&msg("b", 1, MessageStatus::Resending, base))
        .await
        .unwrap();
    db.insert_message(&msg("c", 1, MessageStatus::YetToSend, base))
        .await
        .unwrap();
    db.insert_message(&msg("d", 2, MessageStatus::Sending, base))
        .await
        .unwrap();

    let n = db
        .count_in_status(1, &[MessageStatus::Sending, MessageStatus::Resending])
        .await
        .unwrap();
    assert_eq!(n, 2);
    let n = db.count_in_status(2, &[MessageStatus::Sending]).await.unwrap();
    assert_eq!(n, 1);
}

#[test]
fn resend_window_boundary_is_exclusive() {
    let row = MessageRow {
        id: "m1".to_string(),
        conversation_id: "c1".to_string(),
        endpoint_id: 1,
        status: MessageStatus::AwaitingRetry,
        received_ts: 10_000,
        retry_start_ts: 10_000,
        meta: MessageMeta::default(),
        created_at: 10_000,
        updated_at: 10_000,
    };
    let window = Duration::from_millis(1_000);
    assert!(row.in_resend_window(10_999, window));
    assert!(!row.in_resend_window(11_000, window));
    assert!(!row.in_resend_window(12_000, window));
}
