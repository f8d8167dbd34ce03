//! Per-endpoint connectivity tracking.
//!
//! Link events flow in through a [`ConnectivityFeed`]; a
//! [`ConnectivityWatcher`] folds them into a service state per endpoint
//! and wakes its registered listener exactly once per transition into
//! service. Registration is deliberately narrow: one listener at a time,
//! and a watcher that was never fed reports nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::EndpointId;

/// Raw connectivity event for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    InService,
    OutOfService,
    DataConnected,
    DataDisconnected,
}

/// Folded service state tracked by a watcher. `PowerOff` doubles as
/// "nothing observed yet", so the very first in-service event after
/// registration counts as a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    InService,
    OutOfService,
    PowerOff,
}

/// Callback invoked when an endpoint's link comes back.
pub trait ConnectivityListener: Send + Sync {
    fn on_available(&self);
}

/// Fan-in point for link events, keyed by endpoint.
///
/// Whoever integrates with the platform (modem daemon, netlink, a test)
/// publishes events here; watchers subscribe per endpoint. Publishing to
/// an endpoint nobody watches is fine and cheap.
#[derive(Default)]
pub struct ConnectivityFeed {
    senders: RwLock<HashMap<EndpointId, watch::Sender<LinkEvent>>>,
}

impl ConnectivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a link event for one endpoint.
    pub fn publish(&self, endpoint: EndpointId, event: LinkEvent) {
        let sender = self.sender_for(endpoint);
        sender.send_replace(event);
    }

    /// Subscribe to an endpoint's event stream.
    pub fn subscribe(&self, endpoint: EndpointId) -> watch::Receiver<LinkEvent> {
        self.sender_for(endpoint).subscribe()
    }

    fn sender_for(&self, endpoint: EndpointId) -> watch::Sender<LinkEvent> {
        if let Some(sender) = self.senders.read().unwrap().get(&endpoint) {
            return sender.clone();
        }
        let mut senders = self.senders.write().unwrap();
        senders
            .entry(endpoint)
            .or_insert_with(|| watch::channel(LinkEvent::OutOfService).0)
            .clone()
    }
}

struct Registration {
    listener: Arc<dyn ConnectivityListener>,
    monitor: JoinHandle<()>,
}

/// Tracks one endpoint's service state and notifies a single listener on
/// transitions into service.
///
/// Data events (`DataConnected` / `DataDisconnected`) update the tracked
/// state silently; only a service transition fires the listener. State
/// starts at `PowerOff` per registration and is forgotten on
/// `unregister`, so a stale pre-registration event can never wake anyone.
pub struct ConnectivityWatcher {
    endpoint: EndpointId,
    rx: watch::Receiver<LinkEvent>,
    inner: Mutex<Option<Registration>>,
}

impl ConnectivityWatcher {
    pub fn new(endpoint: EndpointId, rx: watch::Receiver<LinkEvent>) -> Self {
        ConnectivityWatcher {
            endpoint,
            rx,
            inner: Mutex::new(None),
        }
    }

    /// Register `listener` for wake-ups. Re-registering the same listener
    /// (by identity) is a no-op; registering a different one while the
    /// first is still active is a caller bug.
    pub fn register(&self, listener: Arc<dyn ConnectivityListener>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reg) = inner.as_ref() {
            assert!(
                Arc::ptr_eq(&reg.listener, &listener),
                "conflicting connectivity listener for endpoint {}",
                self.endpoint
            );
            return;
        }

        // Whatever is current at registration time is not an observation;
        // only events published after this point move the state. Marked
        // seen here, synchronously, so nothing published after register()
        // returns can be missed.
        let mut rx = self.rx.clone();
        let _ = rx.borrow_and_update();

        let endpoint = self.endpoint;
        let task_listener = Arc::clone(&listener);
        let monitor = tokio::spawn(async move {
            let mut current = ServiceState::PowerOff;
            while rx.changed().await.is_ok() {
                let event = *rx.borrow_and_update();
                match event {
                    LinkEvent::DataConnected => current = ServiceState::InService,
                    LinkEvent::DataDisconnected => current = ServiceState::OutOfService,
                    LinkEvent::OutOfService => current = ServiceState::OutOfService,
                    LinkEvent::InService => {
                        if current != ServiceState::InService {
                            current = ServiceState::InService;
                            debug!(endpoint, "link back in service; waking listener");
                            task_listener.on_available();
                        }
                    }
                }
            }
        });

        *inner = Some(Registration { listener, monitor });
    }

    /// Drop the current registration, if any. Idempotent.
    pub fn unregister(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reg) = inner.take() {
            reg.monitor.abort();
        }
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingListener {
        fires: AtomicU32,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(CountingListener {
                fires: AtomicU32::new(0),
            })
        }

        fn count(&self) -> u32 {
            self.fires.load(Ordering::SeqCst)
        }
    }

    impl ConnectivityListener for CountingListener {
        fn on_available(&self) {
            self.fires.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Let spawned monitor tasks drain pending watch events.
    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn fires_once_per_transition_into_service() {
        let feed = ConnectivityFeed::new();
        let watcher = ConnectivityWatcher::new(1, feed.subscribe(1));
        let listener = CountingListener::new();
        watcher.register(listener.clone());

        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 1);

        // Repeated in-service reports do not re-fire.
        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 1);

        // The watch channel keeps only the latest value, so the dip has
        // to be observed before the recovery is published.
        feed.publish(1, LinkEvent::OutOfService);
        settle().await;
        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 2);
    }

    #[tokio::test]
    async fn nothing_fires_without_events() {
        let feed = ConnectivityFeed::new();
        let watcher = ConnectivityWatcher::new(1, feed.subscribe(1));
        let listener = CountingListener::new();
        watcher.register(listener.clone());

        settle().await;
        assert_eq!(listener.count(), 0);
    }

    #[tokio::test]
    async fn data_events_update_state_silently() {
        let feed = ConnectivityFeed::new();
        let watcher = ConnectivityWatcher::new(1, feed.subscribe(1));
        let listener = CountingListener::new();
        watcher.register(listener.clone());

        // A data attach implies service but is not announced.
        feed.publish(1, LinkEvent::DataConnected);
        settle().await;
        assert_eq!(listener.count(), 0);

        // The explicit service report is now a duplicate, so still quiet.
        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 0);

        // After a data drop the next service report is a real transition.
        feed.publish(1, LinkEvent::DataDisconnected);
        settle().await;
        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_resets_state() {
        let feed = ConnectivityFeed::new();
        let watcher = ConnectivityWatcher::new(1, feed.subscribe(1));
        let listener = CountingListener::new();
        watcher.register(listener.clone());
        assert!(watcher.is_registered());

        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 1);

        watcher.unregister();
        watcher.unregister();
        assert!(!watcher.is_registered());

        // No delivery while unregistered.
        feed.publish(1, LinkEvent::OutOfService);
        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 1);

        // A fresh registration starts from scratch and sees the next
        // in-service event as a transition.
        watcher.register(listener.clone());
        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 2);
    }

    #[tokio::test]
    async fn reregistering_same_listener_is_noop() {
        let feed = ConnectivityFeed::new();
        let watcher = ConnectivityWatcher::new(1, feed.subscribe(1));
        let listener = CountingListener::new();
        watcher.register(listener.clone());
        watcher.register(listener.clone());

        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(listener.count(), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "conflicting connectivity listener")]
    async fn registering_different_listener_panics() {
        let feed = ConnectivityFeed::new();
        let watcher = ConnectivityWatcher::new(1, feed.subscribe(1));
        watcher.register(CountingListener::new());
        watcher.register(CountingListener::new());
    }

    #[tokio::test]
    async fn feeds_are_isolated_per_endpoint() {
        let feed = ConnectivityFeed::new();
        let w1 = ConnectivityWatcher::new(1, feed.subscribe(1));
        let w2 = ConnectivityWatcher::new(2, feed.subscribe(2));
        let l1 = CountingListener::new();
        let l2 = CountingListener::new();
        w1.register(l1.clone());
        w2.register(l2.clone());

        feed.publish(1, LinkEvent::InService);
        settle().await;
        assert_eq!(l1.count(), 1);
        assert_eq!(l2.count(), 0);
    }
}
