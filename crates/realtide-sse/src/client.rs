//! Public realtime client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use realtide_core::{
    ConnectionState, ListenerId, RealtimeConfig, Result, SubscribeOptions, Transport,
};

use crate::engine::Engine;
use crate::records::RecordSubscriptions;

/// Realtime subscription client.
///
/// Listeners are synchronous and run on the background connection task; a
/// listener that needs to unsubscribe should spawn that work instead of
/// blocking on it.
///
/// Dropping the client signals the background task to stop but does not wait
/// for it; call [`RealtimeClient::disconnect`] for an orderly shutdown.
pub struct RealtimeClient {
    engine: Arc<Engine>,
}

impl RealtimeClient {
    pub fn new(transport: Arc<dyn Transport>, config: &RealtimeConfig) -> Self {
        Self {
            engine: Arc::new(Engine::new(transport, config)),
        }
    }

    /// Register `listener` on `topic`.
    ///
    /// Opens the stream if this is the first subscription, waits (bounded by
    /// the configured connect timeout) for the handshake and submits the
    /// updated topic set. On error nothing stays registered.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        listener: F,
        options: SubscribeOptions,
    ) -> Result<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let (topic, id) = self
            .engine
            .subscribe(topic, Arc::new(listener), &options)
            .await?;
        Ok(Subscription {
            engine: Arc::clone(&self.engine),
            topic,
            id,
        })
    }

    /// Remove all listeners of `topic`, or every registration when `None`.
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<()> {
        self.engine.unsubscribe(topic).await
    }

    /// Remove every topic starting with `prefix`.
    pub async fn unsubscribe_by_prefix(&self, prefix: &str) -> Result<()> {
        self.engine.unsubscribe_by_prefix(prefix).await
    }

    /// Remove a single registration.
    pub async fn unsubscribe_by_topic_and_listener(&self, topic: &str, id: ListenerId) -> Result<()> {
        self.engine.unsubscribe_by_topic_and_listener(topic, id).await
    }

    /// Wait until the handshake has completed, starting the connection if
    /// needed. Fails with [`ClientError::ConnectTimeout`] after `timeout`.
    ///
    /// [`ClientError::ConnectTimeout`]: realtide_core::ClientError::ConnectTimeout
    pub async fn ensure_connected(&self, timeout: Duration) -> Result<()> {
        self.engine.ensure_connected(timeout).await
    }

    /// Stop the background connection and wait for it to exit. Registrations
    /// are kept; the next `subscribe` or `ensure_connected` reconnects.
    pub async fn disconnect(&self) {
        self.engine.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.engine.lock().session.is_ready()
    }

    /// Session id of the current connection; empty before the handshake.
    pub fn client_id(&self) -> String {
        self.engine.lock().session.client_id().to_string()
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.lock().connection
    }

    pub fn active_topics(&self) -> Vec<String> {
        self.engine.active_topics()
    }

    /// Called with the topics active at the moment the stream dropped.
    pub fn on_disconnect(&self, observer: impl Fn(&[String]) + Send + Sync + 'static) {
        self.engine.add_disconnect_observer(Arc::new(observer));
    }

    /// Called with the new session id after every handshake.
    pub fn on_connect(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        self.engine.add_connect_observer(Arc::new(observer));
    }

    /// Record subscriptions scoped to one collection.
    pub fn collection(&self, name: impl Into<String>) -> RecordSubscriptions<'_> {
        RecordSubscriptions::new(self, name.into())
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.engine.cancel_worker();
    }
}

/// Registration handle returned by [`RealtimeClient::subscribe`].
///
/// Dropping it leaves the listener registered.
pub struct Subscription {
    engine: Arc<Engine>,
    topic: String,
    id: ListenerId,
}

impl Subscription {
    /// Topic key the listener is registered under (options included).
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn listener_id(&self) -> ListenerId {
        self.id
    }

    /// Remove exactly this registration.
    pub async fn unsubscribe(self) -> Result<()> {
        self.engine
            .unsubscribe_by_topic_and_listener(&self.topic, self.id)
            .await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}
