//! Collection-scoped record subscriptions.
//!
//! Record topics are `<collection>/<topic>`, where `topic` is `*` for every
//! record of the collection or a record id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use realtide_core::{Result, SubscribeOptions};

use crate::client::{RealtimeClient, Subscription};

/// Payload of a record change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    /// `create`, `update` or `delete`.
    pub action: String,
    #[serde(default)]
    pub record: Value,
}

pub struct RecordSubscriptions<'a> {
    client: &'a RealtimeClient,
    collection: String,
}

impl<'a> RecordSubscriptions<'a> {
    pub(crate) fn new(client: &'a RealtimeClient, collection: String) -> Self {
        Self { client, collection }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn topic(&self, topic: &str) -> String {
        format!("{}/{}", self.collection, topic)
    }

    /// Subscribe to changes of `topic` in this collection.
    ///
    /// Payloads that do not decode as a [`RecordEvent`] are logged and
    /// skipped.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        callback: F,
        options: SubscribeOptions,
    ) -> Result<Subscription>
    where
        F: Fn(RecordEvent) + Send + Sync + 'static,
    {
        if topic.is_empty() {
            return Err(realtide_core::ClientError::InvalidArgument(
                "record topic must be set".into(),
            ));
        }
        let full_topic = self.topic(topic);
        let listener_topic = full_topic.clone();
        self.client
            .subscribe(
                &full_topic,
                move |payload| match RecordEvent::deserialize(payload) {
                    Ok(event) => callback(event),
                    Err(e) => {
                        tracing::warn!(topic = %listener_topic, error = %e, "unexpected record event payload")
                    }
                },
                options,
            )
            .await
    }

    /// Drop one topic of this collection, or all of them when `None`.
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<()> {
        match topic {
            Some(topic) => self.client.unsubscribe(Some(&self.topic(topic))).await,
            None => {
                self.client
                    .unsubscribe_by_prefix(&format!("{}/", self.collection))
                    .await
            }
        }
    }
}
