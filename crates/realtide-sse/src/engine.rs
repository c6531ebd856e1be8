//! Shared engine state: registry operations, session bookkeeping and the
//! resubscription call.
//!
//! Everything mutable sits behind one `std::sync::Mutex`. The guard is only
//! ever held for in-memory work and is always released before an `.await`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use realtide_core::{
    ClientError, ConnectionState, Listener, ListenerId, RealtimeConfig, Result, SendOptions,
    SessionState, SubscribeOptions, SubscriptionRegistry, Transport, REALTIME_PATH,
};

use crate::connection;

pub(crate) type DisconnectObserver = Arc<dyn Fn(&[String]) + Send + Sync>;
pub(crate) type ConnectObserver = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) session: SessionState,
    pub(crate) connection: ConnectionState,
    /// Bumped whenever a worker is started or retired. Session changes from a
    /// worker whose epoch is no longer current are ignored.
    epoch: u64,
    on_disconnect: Vec<DisconnectObserver>,
    on_connect: Vec<ConnectObserver>,
}

/// Handle on the background connection task.
struct Worker {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub(crate) struct Engine {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) connect_timeout: Duration,
    pub(crate) reconnect_delay: Duration,
    state: Mutex<EngineState>,
    ready: watch::Sender<bool>,
    worker: Mutex<Option<Worker>>,
}

impl Engine {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: &RealtimeConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            transport,
            connect_timeout: config.connect_timeout(),
            reconnect_delay: config.reconnect_delay(),
            state: Mutex::new(EngineState::default()),
            ready,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Registry operations ────────────────────────────────────────────────

    pub(crate) async fn subscribe(
        self: &Arc<Self>,
        topic: &str,
        listener: Listener,
        options: &SubscribeOptions,
    ) -> Result<(String, ListenerId)> {
        if topic.is_empty() {
            return Err(ClientError::InvalidArgument("topic must be set".into()));
        }

        let key = options.topic_key(topic);
        let id = self.lock().registry.add(key.clone(), listener);
        tracing::debug!(topic = %key, listener = %id, "listener registered");

        let connected = self.ensure_connected(self.connect_timeout).await;
        let submitted = match connected {
            Ok(()) => self.submit_subscriptions().await,
            Err(e) => Err(e),
        };
        if let Err(e) = submitted {
            // The caller gets no handle on failure, so nothing could ever
            // remove this registration.
            self.roll_back(&key, id).await;
            return Err(e);
        }
        Ok((key, id))
    }

    pub(crate) async fn unsubscribe(self: &Arc<Self>, topic: Option<&str>) -> Result<()> {
        {
            let mut state = self.lock();
            match topic {
                Some(topic) => {
                    state.registry.remove_topic(topic);
                }
                None => state.registry.clear(),
            }
        }
        self.after_removal().await
    }

    pub(crate) async fn unsubscribe_by_prefix(self: &Arc<Self>, prefix: &str) -> Result<()> {
        let removed = self.lock().registry.remove_prefix(prefix);
        tracing::debug!(prefix, removed, "topics removed by prefix");
        self.after_removal().await
    }

    pub(crate) async fn unsubscribe_by_topic_and_listener(
        self: &Arc<Self>,
        topic: &str,
        id: ListenerId,
    ) -> Result<()> {
        self.lock().registry.remove_listener(topic, id);
        self.after_removal().await
    }

    /// Resubscribe with the remaining topics, then tear down if none are left.
    async fn after_removal(self: &Arc<Self>) -> Result<()> {
        let submitted = self.submit_subscriptions().await;
        let empty = self.lock().registry.is_empty();
        if empty {
            self.disconnect().await;
        }
        submitted
    }

    /// Undo a failed registration. The server may already hold the topic
    /// from the handshake resubscription, so the remaining set is sent again.
    async fn roll_back(self: &Arc<Self>, topic: &str, id: ListenerId) {
        let empty = {
            let mut state = self.lock();
            state.registry.remove_listener(topic, id);
            state.registry.is_empty()
        };
        if empty {
            self.disconnect().await;
        } else if let Err(e) = self.submit_subscriptions().await {
            tracing::warn!(topic, error = %e, "failed to restore subscriptions after rollback");
        }
    }

    pub(crate) fn active_topics(&self) -> Vec<String> {
        self.lock().registry.active_topics()
    }

    // ─── Resubscription ─────────────────────────────────────────────────────

    /// Send the complete topic set for the current session.
    ///
    /// No-op before the handshake and when no topics are active. A call cut
    /// short by `disconnect` is not an error.
    pub(crate) async fn submit_subscriptions(&self) -> Result<()> {
        let (client_id, topics) = {
            let state = self.lock();
            if !state.session.can_register() {
                return Ok(());
            }
            let topics = state.registry.active_topics();
            if topics.is_empty() {
                return Ok(());
            }
            (state.session.client_id().to_string(), topics)
        };

        tracing::debug!(client_id = %client_id, topics = ?topics, "submitting subscriptions");
        let options = SendOptions::post(json!({
            "clientId": client_id,
            "subscriptions": topics,
        }));

        let cancel = self.lock_worker().as_ref().map(|w| w.cancel.subscribe());
        let result = match cancel {
            Some(mut cancel) => tokio::select! {
                res = self.transport.send(REALTIME_PATH, options) => res.map(|_| ()),
                _ = cancel.wait_for(|c| *c) => Err(ClientError::Aborted {
                    url: self.transport.build_url(REALTIME_PATH),
                }),
            },
            None => self.transport.send(REALTIME_PATH, options).await.map(|_| ()),
        };

        match result {
            Err(e) if e.is_abort() => {
                tracing::debug!("subscription submit aborted by disconnect");
                Ok(())
            }
            other => other,
        }
    }

    // ─── Connection lifecycle ───────────────────────────────────────────────

    /// Spawn the connection task unless one is already running.
    pub(crate) fn ensure_worker(self: &Arc<Self>) {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }
        let epoch = self.retire_session();
        let (cancel, cancel_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            connection::run(engine, cancel_rx, epoch).await;
        });
        *worker = Some(Worker { cancel, handle });
    }

    pub(crate) async fn ensure_connected(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        self.ensure_worker();
        let mut ready = self.ready.subscribe();
        let outcome = tokio::time::timeout(timeout, ready.wait_for(|r| *r))
            .await
            .map(|res| res.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            _ => Err(ClientError::ConnectTimeout {
                url: self.transport.build_url(REALTIME_PATH),
                ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Cancel the connection task and wait for it to exit. Idempotent.
    pub(crate) async fn disconnect(&self) {
        let worker = self.take_worker();
        if let Some(worker) = worker {
            let _ = worker.cancel.send(true);
            if let Err(e) = worker.handle.await {
                if e.is_panic() {
                    tracing::error!("realtime connection task panicked");
                }
            }
            tracing::info!("realtime disconnected");
        }

        // A subscriber may have started a fresh worker while we were joining.
        let restarted = self.lock_worker().is_some();
        if !restarted {
            self.lock().connection = ConnectionState::Idle;
        }
    }

    /// Signal the connection task to stop without waiting for it.
    pub(crate) fn cancel_worker(&self) {
        if let Some(worker) = self.take_worker() {
            let _ = worker.cancel.send(true);
        }
    }

    /// Detach the current worker and invalidate its session in one step, so
    /// a caller racing the teardown never sees the old session as ready.
    fn take_worker(&self) -> Option<Worker> {
        let mut slot = self.lock_worker();
        let worker = slot.take();
        if worker.is_some() {
            self.retire_session();
        }
        worker
    }

    // ─── Session ────────────────────────────────────────────────────────────

    // The ready flag is only written under the state lock so it never
    // disagrees with the session it describes.

    /// Start a new epoch with an empty session. Returns the new epoch.
    pub(crate) fn retire_session(&self) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.session.reset();
        self.ready.send_replace(false);
        state.epoch
    }

    /// Record the handshake of the worker running `epoch`. Returns `false`
    /// if that worker has been retired.
    pub(crate) fn establish_session(&self, client_id: &str, epoch: u64) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            tracing::debug!(client_id, "ignoring handshake from retired connection");
            return false;
        }
        state.session.establish(client_id);
        self.ready.send_replace(true);
        drop(state);
        tracing::info!(client_id, "realtime session established");
        true
    }

    pub(crate) fn reset_session(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.session.reset();
            self.ready.send_replace(false);
        }
    }

    pub(crate) fn set_connection(&self, connection: ConnectionState, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.connection = connection;
        }
    }

    #[cfg(test)]
    pub(crate) fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    // ─── Observers ──────────────────────────────────────────────────────────

    pub(crate) fn add_disconnect_observer(&self, observer: DisconnectObserver) {
        self.lock().on_disconnect.push(observer);
    }

    pub(crate) fn add_connect_observer(&self, observer: ConnectObserver) {
        self.lock().on_connect.push(observer);
    }

    pub(crate) fn notify_disconnect(&self, topics: &[String]) {
        let observers = self.lock().on_disconnect.clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(topics))).is_err() {
                tracing::warn!("disconnect observer panicked");
            }
        }
    }

    pub(crate) fn notify_connect(&self, client_id: &str) {
        let observers = self.lock().on_connect.clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(client_id))).is_err() {
                tracing::warn!("connect observer panicked");
            }
        }
    }
}
