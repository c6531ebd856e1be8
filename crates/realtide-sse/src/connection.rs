//! Background connection loop: connect → stream → wait → reconnect.
//!
//! Runs until the cancel signal flips to `true` (or its sender is dropped).
//! There is no retry cap; only teardown ends the loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use realtide_core::{decode_stream, ConnectionState, Result, REALTIME_PATH};

use crate::engine::Engine;

pub(crate) async fn run(engine: Arc<Engine>, mut cancel: watch::Receiver<bool>, epoch: u64) {
    let url = engine.transport.build_url(REALTIME_PATH);

    loop {
        if *cancel.borrow() {
            break;
        }
        engine.set_connection(ConnectionState::Connecting, epoch);

        let outcome = tokio::select! {
            biased;
            _ = cancel.wait_for(|c| *c) => break,
            res = stream_once(&engine, epoch) => res,
        };
        engine.reset_session(epoch);

        match outcome {
            Ok(()) => tracing::warn!(url = %url, "realtime stream closed by server"),
            Err(e) => tracing::warn!(url = %url, error = %e, "realtime connection failed"),
        }
        if *cancel.borrow() {
            break;
        }

        engine.set_connection(ConnectionState::Reconnecting, epoch);
        let active = engine.active_topics();
        engine.notify_disconnect(&active);

        let delay = engine.reconnect_delay;
        tracing::info!(url = %url, "reconnecting in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.wait_for(|c| *c) => break,
        }
    }

    engine.reset_session(epoch);
    tracing::debug!(url = %url, "realtime connection task exiting");
}

/// One connection attempt. Returns `Ok` when the server closes the stream.
async fn stream_once(engine: &Arc<Engine>, epoch: u64) -> Result<()> {
    let mut headers = vec![
        ("Accept".to_string(), "text/event-stream".to_string()),
        ("Cache-Control".to_string(), "no-store".to_string()),
        ("Accept-Language".to_string(), engine.transport.language().to_string()),
        ("User-Agent".to_string(), engine.transport.user_agent().to_string()),
    ];
    if let Some(token) = engine.transport.auth_token() {
        headers.push(("Authorization".to_string(), token));
    }

    tracing::info!(url = %engine.transport.build_url(REALTIME_PATH), "opening realtime stream");
    let body = engine.transport.open_stream(REALTIME_PATH, headers).await?;
    engine.set_connection(ConnectionState::Streaming, epoch);

    let records = decode_stream(body);
    tokio::pin!(records);
    while let Some(record) = records.next().await {
        engine.handle_record(record?, epoch).await;
    }
    Ok(())
}
