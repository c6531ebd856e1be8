//! Routing of decoded records: handshake interception and listener fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;

use realtide_core::session::handshake_client_id;
use realtide_core::EventRecord;

use crate::engine::Engine;

impl Engine {
    /// Handle one decoded record from the connection running `epoch`.
    pub(crate) async fn handle_record(&self, record: EventRecord, epoch: u64) {
        if let Some(client_id) = handshake_client_id(&record) {
            if !self.establish_session(&client_id, epoch) {
                return;
            }
            if let Err(e) = self.submit_subscriptions().await {
                tracing::warn!(error = %e, "failed to submit subscriptions after handshake");
            }
            self.notify_connect(&client_id);
            return;
        }
        self.dispatch(&record);
    }

    /// Deliver `record` to the listeners of its topic. Returns how many
    /// listeners were invoked.
    ///
    /// Listeners run outside the state lock on a snapshot taken under it; a
    /// panicking listener is logged and skipped.
    pub(crate) fn dispatch(&self, record: &EventRecord) -> usize {
        let listeners = self.lock().registry.listeners(&record.event);
        if listeners.is_empty() {
            tracing::trace!(topic = %record.event, "no listeners for event");
            return 0;
        }

        let payload = record.data.clone().unwrap_or(Value::Null);
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&payload))).is_err() {
                tracing::warn!(topic = %record.event, "realtime listener panicked");
            }
        }
        listeners.len()
    }
}
