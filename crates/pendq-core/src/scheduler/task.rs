//! The scheduler task and its handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PendqConfig;
use crate::connectivity::{ConnectivityFeed, ConnectivityListener, ConnectivityWatcher};
use crate::dispatcher::{Completion, Dispatcher};
use crate::store::{ChangeNotifier, EndpointId, MessageDb};
use crate::units::{TransportGate, WorkProvider};

use super::backoff::backoff_delay;

/// Which wake source fired a retry trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerSource {
    Backoff,
    Connectivity,
}

enum Command {
    ProcessNow {
        endpoint: EndpointId,
    },
    ProcessAll,
    Trigger {
        endpoint: EndpointId,
        generation: u64,
        source: TriggerSource,
    },
    Completion {
        endpoint: EndpointId,
        succeeded: bool,
    },
    Inspect {
        endpoint: EndpointId,
        reply: oneshot::Sender<ArmStatus>,
    },
    Shutdown,
}

/// Snapshot of one endpoint's armed triggers, for displays and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmStatus {
    pub backoff_armed: bool,
    pub listener_armed: bool,
}

/// Trigger bookkeeping for one endpoint.
///
/// The generation counter invalidates stale fires: every disarm bumps
/// it, and a trigger whose generation no longer matches is dropped.
struct ArmState {
    generation: u64,
    alarm: Option<JoinHandle<()>>,
    listener_armed: bool,
}

impl ArmState {
    fn new() -> Self {
        ArmState {
            generation: 0,
            alarm: None,
            listener_armed: false,
        }
    }
}

/// Connectivity listener that converts a link-restored wake-up into a
/// scheduler trigger.
struct RetryTriggerListener {
    endpoint: EndpointId,
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectivityListener for RetryTriggerListener {
    fn on_available(&self) {
        let _ = self.commands.send(Command::Trigger {
            endpoint: self.endpoint,
            generation: self.generation,
            source: TriggerSource::Connectivity,
        });
    }
}

/// Handle to a running [`Scheduler`], cheap to pass around.
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Kick one endpoint: reset its retry counter and process its queue.
    ///
    /// This is the entry point for "something changed, try now" moments:
    /// a new message, boot, the app coming to the foreground, a manual
    /// retry. Wake-ups from the scheduler's own triggers deliberately do
    /// not reset the counter, so backoff keeps growing across them.
    pub fn process_now(&self, endpoint: EndpointId) {
        let _ = self.tx.send(Command::ProcessNow { endpoint });
    }

    /// Kick every active endpoint, as after boot.
    pub fn process_all(&self) {
        let _ = self.tx.send(Command::ProcessAll);
    }

    /// Report the outcome of a work unit executed outside the built-in
    /// dispatcher.
    pub fn completion(&self, endpoint: EndpointId, succeeded: bool) {
        let _ = self.tx.send(Command::Completion { endpoint, succeeded });
    }

    /// Current trigger state for an endpoint.
    pub async fn arm_status(&self, endpoint: EndpointId) -> Result<ArmStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Inspect { endpoint, reply })
            .map_err(|_| anyhow!("scheduler task is gone"))?;
        Ok(rx.await?)
    }

    /// Stop the scheduler: disarm all triggers and drain queued work.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Owns all retry state: per-endpoint triggers, the background
/// dispatcher, and the completion loop.
pub struct Scheduler {
    db: MessageDb,
    provider: Arc<dyn WorkProvider>,
    gate: Arc<dyn TransportGate>,
    feed: Arc<ConnectivityFeed>,
    notifier: ChangeNotifier,
    dispatcher: Dispatcher,
    initial_backoff: Duration,
    max_backoff: Duration,
    resend_window: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_tx: mpsc::UnboundedSender<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    watchers: HashMap<EndpointId, Arc<ConnectivityWatcher>>,
    arms: HashMap<EndpointId, ArmState>,
}

impl Scheduler {
    /// Start the scheduler task. Must be called inside a tokio runtime.
    pub fn spawn(
        db: MessageDb,
        cfg: &PendqConfig,
        provider: Arc<dyn WorkProvider>,
        gate: Arc<dyn TransportGate>,
        feed: Arc<ConnectivityFeed>,
        notifier: ChangeNotifier,
    ) -> SchedulerHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::spawn(cfg.queue_capacity, completions_tx);
        let backoff = cfg.backoff();

        let scheduler = Scheduler {
            db,
            provider,
            gate,
            feed,
            notifier,
            dispatcher,
            initial_backoff: backoff.initial_delay(),
            max_backoff: backoff.max_delay(),
            resend_window: cfg.resend_window(),
            commands,
            commands_tx: commands_tx.clone(),
            completions,
            watchers: HashMap::new(),
            arms: HashMap::new(),
        };
        let task = tokio::spawn(scheduler.run());

        SchedulerHandle {
            tx: commands_tx,
            task,
        }
    }

    async fn run(mut self) {
        info!("scheduler task starting");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if matches!(cmd, Command::Shutdown) {
                        break;
                    }
                    if let Err(err) = self.handle(cmd).await {
                        warn!("scheduler command failed: {err:#}");
                    }
                }
                done = self.completions.recv() => {
                    let Some(done) = done else { break };
                    debug!(
                        "endpoint {}: work unit completed (succeeded: {})",
                        done.endpoint, done.succeeded
                    );
                    if let Err(err) = self.schedule_pending(done.endpoint, !done.succeeded).await {
                        warn!(
                            "completion handling failed for endpoint {}: {err:#}",
                            done.endpoint
                        );
                    }
                }
            }
        }

        // Teardown: disarm everything, then let queued units finish.
        for state in self.arms.values_mut() {
            if let Some(alarm) = state.alarm.take() {
                alarm.abort();
            }
        }
        for watcher in self.watchers.values() {
            watcher.unregister();
        }
        self.dispatcher.shutdown().await;
        info!("scheduler task stopped");
    }

    async fn handle(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::ProcessNow { endpoint } => self.process(endpoint, true).await,
            Command::ProcessAll => {
                for endpoint in self.db.active_endpoints().await? {
                    if let Err(err) = self.process(endpoint, true).await {
                        warn!("processing endpoint {endpoint} failed: {err:#}");
                    }
                }
                Ok(())
            }
            Command::Trigger {
                endpoint,
                generation,
                source,
            } => {
                let current = self
                    .arms
                    .get(&endpoint)
                    .map(|state| state.generation)
                    .unwrap_or(0);
                if generation != current {
                    debug!(
                        "endpoint {endpoint}: dropping stale {source:?} trigger \
                         (generation {generation}, current {current})"
                    );
                    return Ok(());
                }
                info!("endpoint {endpoint}: {source:?} trigger fired");
                // A trigger-driven pass keeps the retry counter, so
                // backoff continues to grow if this attempt fails too.
                self.process(endpoint, false).await
            }
            Command::Completion {
                endpoint,
                succeeded,
            } => self.schedule_pending(endpoint, !succeeded).await,
            Command::Inspect { endpoint, reply } => {
                let _ = reply.send(self.arm_status(endpoint));
                Ok(())
            }
            Command::Shutdown => Ok(()),
        }
    }

    /// One scheduling pass for an endpoint: disarm triggers, then either
    /// queue work or fall back to the retry path.
    async fn process(&mut self, endpoint: EndpointId, reset_counter: bool) -> Result<()> {
        self.unregister_triggers(endpoint);
        if reset_counter {
            self.db.reset_retry(endpoint).await?;
        }

        if self.gate.is_ready() {
            if !self.queue_work(endpoint).await? {
                debug!("endpoint {endpoint}: queueing failed; rescheduling");
                self.schedule_pending(endpoint, true).await?;
            }
        } else {
            debug!("endpoint {endpoint}: transport not ready; rescheduling");
            self.schedule_pending(endpoint, true).await?;
        }
        Ok(())
    }

    /// Queue the endpoint's eligible work with the dispatcher.
    ///
    /// Returns true when everything selected was queued (or there was
    /// nothing to do), false when an enqueue was rejected.
    async fn queue_work(&self, endpoint: EndpointId) -> Result<bool> {
        let work = self
            .db
            .claim_eligible(endpoint, self.resend_window, &self.notifier)
            .await?;

        let mut succeeded = true;
        if let Some(id) = &work.to_send {
            info!("endpoint {endpoint}: queueing message {id} for sending");
            if !self.dispatcher.enqueue(self.provider.send_unit(endpoint, id)) {
                warn!("endpoint {endpoint}: failed to queue message {id} for sending");
                succeeded = false;
            }
        }
        if let Some(id) = &work.to_download {
            info!("endpoint {endpoint}: queueing message {id} for download");
            if !self
                .dispatcher
                .enqueue(self.provider.download_unit(endpoint, id))
            {
                warn!("endpoint {endpoint}: failed to queue message {id} for download");
                succeeded = false;
            }
        }
        if work.is_empty() {
            info!("endpoint {endpoint}: no messages to send or download");
        }
        Ok(succeeded)
    }

    /// Decide what happens after an attempt (or a failed scheduling
    /// pass): chain the next unit, arm the retry triggers, or settle.
    async fn schedule_pending(&mut self, endpoint: EndpointId, failed: bool) -> Result<()> {
        self.unregister_triggers(endpoint);

        let mut arm_anyway = false;
        if !failed && self.gate.is_ready() {
            // Clean completion with a usable transport: forget the
            // failure history and try to keep the queue moving.
            self.db.reset_retry(endpoint).await?;
            if self.queue_work(endpoint).await? {
                return Ok(());
            }
            arm_anyway = true;
            warn!("endpoint {endpoint}: failed to queue next work; falling back to retry");
        }

        if arm_anyway || self.have_pending(endpoint).await? {
            let attempt = self.db.get_and_increment_retry(endpoint).await?;
            let delay = backoff_delay(self.initial_backoff, self.max_backoff, attempt);
            info!(
                "endpoint {endpoint}: arming retry #{attempt} in {}ms",
                delay.as_millis()
            );
            self.arm_triggers(endpoint, delay);
        } else {
            self.db.reset_retry(endpoint).await?;
            info!("endpoint {endpoint}: no more pending messages");
        }
        Ok(())
    }

    /// Whether the endpoint still has sendable or downloadable messages.
    /// Runs the eligibility query, so the stale sweep happens here too.
    async fn have_pending(&self, endpoint: EndpointId) -> Result<bool> {
        let work = self
            .db
            .claim_eligible(endpoint, self.resend_window, &self.notifier)
            .await?;
        Ok(!work.is_empty())
    }

    /// Arm both wake sources for one retry: the connectivity listener
    /// and the backoff alarm, sharing a generation so that whichever
    /// fires first invalidates the other.
    fn arm_triggers(&mut self, endpoint: EndpointId, delay: Duration) {
        let state = self.arms.entry(endpoint).or_insert_with(ArmState::new);
        let generation = state.generation;

        let watcher = self.watchers.entry(endpoint).or_insert_with(|| {
            Arc::new(ConnectivityWatcher::new(
                endpoint,
                self.feed.subscribe(endpoint),
            ))
        });
        watcher.register(Arc::new(RetryTriggerListener {
            endpoint,
            generation,
            commands: self.commands_tx.clone(),
        }));
        state.listener_armed = true;

        let commands = self.commands_tx.clone();
        state.alarm = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::Trigger {
                endpoint,
                generation,
                source: TriggerSource::Backoff,
            });
        }));
    }

    /// Disarm both wake sources and invalidate any fire already in
    /// flight. Safe to call when nothing is armed.
    fn unregister_triggers(&mut self, endpoint: EndpointId) {
        let state = self.arms.entry(endpoint).or_insert_with(ArmState::new);
        state.generation += 1;
        if let Some(alarm) = state.alarm.take() {
            alarm.abort();
        }
        if let Some(watcher) = self.watchers.get(&endpoint) {
            watcher.unregister();
        }
        state.listener_armed = false;
    }

    fn arm_status(&self, endpoint: EndpointId) -> ArmStatus {
        match self.arms.get(&endpoint) {
            Some(state) => ArmStatus {
                backoff_armed: state
                    .alarm
                    .as_ref()
                    .map(|alarm| !alarm.is_finished())
                    .unwrap_or(false),
                listener_armed: state.listener_armed,
            },
            None => ArmStatus::default(),
        }
    }
}
