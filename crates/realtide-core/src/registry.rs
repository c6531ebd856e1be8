//! Topic → listener registry.
//!
//! The registry is plain data; the engine keeps it behind its state lock
//! together with the session so a single guard covers both.
//!
//! Invariant: a topic key is present only while it has at least one listener.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{json, Map, Value};

/// Callback invoked with the payload of every event on a topic.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one registration, issued by [`SubscriptionRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: HashMap<String, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on `topic`. Repeated registrations of the same
    /// callback are distinct entries.
    pub fn add(&mut self, topic: impl Into<String>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.topics
            .entry(topic.into())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove every listener of `topic`. Returns `true` if the topic existed.
    pub fn remove_topic(&mut self, topic: &str) -> bool {
        self.topics.remove(topic).is_some()
    }

    /// Remove every topic whose key starts with `prefix`. Returns how many
    /// topics were dropped.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let before = self.topics.len();
        self.topics.retain(|topic, _| !topic.starts_with(prefix));
        before - self.topics.len()
    }

    /// Remove one registration. The topic key goes away with its last
    /// listener.
    pub fn remove_listener(&mut self, topic: &str, id: ListenerId) -> bool {
        let Some(listeners) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    /// Snapshot of the listeners on `topic`, in registration order.
    pub fn listeners(&self, topic: &str) -> Vec<Listener> {
        self.topics
            .get(topic)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Sorted list of topics with at least one listener.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, listeners)| !listeners.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Number of topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Total number of registrations across all topics.
    pub fn listener_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<_, _> = self
            .topics
            .iter()
            .map(|(topic, listeners)| (topic.as_str(), listeners.len()))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &counts)
            .finish()
    }
}

/// Per-subscription request options forwarded to the server.
///
/// Non-empty options are folded into the topic key as
/// `topic?options=<urlencoded json>`, so two subscriptions that differ only in
/// their options are separate topics server-side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
    pub query: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.headers.is_empty()
    }

    /// Topic key under which a subscription with these options is registered.
    pub fn topic_key(&self, topic: &str) -> String {
        if self.is_empty() {
            return topic.to_string();
        }

        let mut options = Map::new();
        if !self.query.is_empty() {
            options.insert("query".into(), json!(self.query));
        }
        if !self.headers.is_empty() {
            options.insert("headers".into(), json!(self.headers));
        }
        let encoded: String =
            url::form_urlencoded::byte_serialize(Value::Object(options).to_string().as_bytes())
                .collect();
        let sep = if topic.contains('?') { '&' } else { '?' };
        format!("{topic}{sep}options={encoded}")
    }
}
