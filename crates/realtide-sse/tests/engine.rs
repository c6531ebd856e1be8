//! End-to-end tests for the realtime client against an in-memory transport.
//!
//! `MockTransport` hands out one channel-backed byte stream per connection
//! attempt, so a test can push raw `text/event-stream` text into the live
//! connection, close it to simulate a server drop, and inspect every
//! registration POST the engine sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use serde_json::{json, Value};

use realtide_core::{
    ByteStream, ClientError, ConnectionState, RealtimeConfig, Result, SendOptions,
    SubscribeOptions, Transport,
};
use realtide_sse::{RealtimeClient, RecordEvent, Subscription};

// ─── Mock transport ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MockTransport {
    token: Option<String>,
    hang: AtomicBool,
    rejected_topic: Mutex<Option<String>>,
    streams: Mutex<Vec<Option<mpsc::UnboundedSender<Result<Bytes>>>>>,
    stream_headers: Mutex<Vec<Vec<(String, String)>>>,
    posts: Mutex<Vec<Value>>,
}

impl MockTransport {
    fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Self::default()
        }
    }

    /// Answer 404 to every registration that includes `topic`.
    fn reject(&self, topic: Option<&str>) {
        *self.rejected_topic.lock().unwrap() = topic.map(str::to_string);
    }

    fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    fn push(&self, conn: usize, text: &str) {
        let streams = self.streams.lock().unwrap();
        let tx = streams[conn].as_ref().expect("connection already closed");
        tx.unbounded_send(Ok(Bytes::from(text.to_string())))
            .expect("stream receiver dropped");
    }

    /// End the body of connection `conn`, as a server drop would.
    fn close(&self, conn: usize) {
        self.streams.lock().unwrap()[conn] = None;
    }

    fn posts(&self) -> Vec<Value> {
        self.posts.lock().unwrap().clone()
    }

    fn last_post(&self) -> Option<Value> {
        self.posts.lock().unwrap().last().cloned()
    }

    fn headers(&self, conn: usize) -> Vec<(String, String)> {
        self.stream_headers.lock().unwrap()[conn].clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, path: &str, options: SendOptions) -> Result<Value> {
        let body = options.body.unwrap_or(Value::Null);
        self.posts.lock().unwrap().push(body.clone());
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let rejected = self.rejected_topic.lock().unwrap().clone();
        if let Some(topic) = rejected {
            let listed = body["subscriptions"]
                .as_array()
                .is_some_and(|topics| topics.iter().any(|t| *t == topic));
            if listed {
                return Err(ClientError::Http {
                    url: self.build_url(path),
                    status: 404,
                    response: json!({"message": "Missing or invalid client id."}),
                });
            }
        }
        Ok(json!({}))
    }

    async fn open_stream(&self, _path: &str, headers: Vec<(String, String)>) -> Result<ByteStream> {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().unwrap().push(Some(tx));
        self.stream_headers.lock().unwrap().push(headers);
        Ok(Box::pin(rx))
    }

    fn build_url(&self, path: &str) -> String {
        format!("http://mock{path}")
    }

    fn auth_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn language(&self) -> &str {
        "en-US"
    }

    fn user_agent(&self) -> &str {
        "realtide-test"
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

type Sink = Arc<Mutex<Vec<Value>>>;

fn config() -> RealtimeConfig {
    RealtimeConfig::new("http://mock")
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect_delay(Duration::from_millis(20))
}

fn collect(sink: &Sink) -> impl Fn(&Value) + Send + Sync + 'static {
    let sink = Arc::clone(sink);
    move |payload: &Value| sink.lock().unwrap().push(payload.clone())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

fn handshake_frame(client_id: &str) -> String {
    format!("event: PB_CONNECT\ndata: {{\"clientId\":\"{client_id}\"}}\n\n")
}

/// Wait for connection `conn` to open, then greet it.
async fn handshake(mock: &MockTransport, conn: usize, client_id: &str) {
    wait_until(|| mock.stream_count() > conn).await;
    mock.push(conn, &handshake_frame(client_id));
}

/// First subscription of a fresh client: subscribe while the server greets.
async fn subscribe_first(
    client: &RealtimeClient,
    mock: &MockTransport,
    topic: &str,
    sink: &Sink,
) -> Subscription {
    let (sub, ()) = tokio::join!(
        client.subscribe(topic, collect(sink), SubscribeOptions::new()),
        handshake(mock, 0, "c1"),
    );
    sub.expect("subscribe failed")
}

fn client(mock: &Arc<MockTransport>) -> RealtimeClient {
    RealtimeClient::new(mock.clone(), &config())
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_receive_unsubscribe() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let sub = subscribe_first(&client, &mock, "posts/*", &sink).await;
    assert!(client.is_connected());
    assert_eq!(client.client_id(), "c1");
    assert_eq!(client.state(), ConnectionState::Streaming);

    let expected = json!({"clientId": "c1", "subscriptions": ["posts/*"]});
    let posts = mock.posts();
    assert!(!posts.is_empty());
    assert!(posts.iter().all(|p| *p == expected), "posts: {posts:?}");

    mock.push(
        0,
        "event: posts/*\ndata: {\"action\":\"create\",\"record\":{\"id\":\"r1\"}}\n\n",
    );
    wait_until(|| !sink.lock().unwrap().is_empty()).await;
    assert_eq!(
        sink.lock().unwrap().as_slice(),
        [json!({"action": "create", "record": {"id": "r1"}})]
    );

    let sent = mock.posts().len();
    sub.unsubscribe().await.unwrap();
    // An empty topic set is never registered.
    assert_eq!(mock.posts().len(), sent);
    assert!(client.active_topics().is_empty());
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn connect_timeout_rolls_back_registration() {
    let mock = Arc::new(MockTransport::default());
    let client = RealtimeClient::new(
        mock.clone(),
        &config().with_connect_timeout(Duration::from_millis(50)),
    );

    let err = client
        .subscribe("posts/*", |_: &Value| {}, SubscribeOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_connection_timeout());
    assert_eq!(err.status(), 0);
    assert_eq!(err.url(), Some("http://mock/api/realtime"));
    assert!(client.active_topics().is_empty());
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(mock.posts().is_empty());
}

#[tokio::test]
async fn empty_topic_is_rejected() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);

    let err = client
        .subscribe("", |_: &Value| {}, SubscribeOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));
    assert_eq!(mock.stream_count(), 0);
}

#[tokio::test]
async fn ensure_connected_without_topics() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);

    let (res, ()) = tokio::join!(
        client.ensure_connected(Duration::from_secs(1)),
        handshake(&mock, 0, "solo"),
    );
    res.unwrap();
    assert_eq!(client.client_id(), "solo");
    // Nothing to register yet.
    assert!(mock.posts().is_empty());

    client.disconnect().await;
    assert!(!client.is_connected());
}

// ─── Reconnect & resubscription ───────────────────────────────────────────────

#[tokio::test]
async fn reconnects_and_resubscribes_after_drop() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let dropped: Arc<Mutex<Vec<Vec<String>>>> = Default::default();
    let d = dropped.clone();
    client.on_disconnect(move |topics| d.lock().unwrap().push(topics.to_vec()));
    let connected: Arc<Mutex<Vec<String>>> = Default::default();
    let c = connected.clone();
    client.on_connect(move |id| c.lock().unwrap().push(id.to_string()));

    let _sub = subscribe_first(&client, &mock, "posts/*", &sink).await;

    mock.close(0);
    handshake(&mock, 1, "c2").await;
    wait_until(|| connected.lock().unwrap().len() == 2).await;

    assert_eq!(
        mock.last_post(),
        Some(json!({"clientId": "c2", "subscriptions": ["posts/*"]}))
    );
    assert_eq!(client.client_id(), "c2");
    assert_eq!(*dropped.lock().unwrap(), [vec!["posts/*".to_string()]]);
    assert_eq!(*connected.lock().unwrap(), ["c1", "c2"]);

    mock.push(1, "event: posts/*\ndata: {\"n\":2}\n\n");
    wait_until(|| sink.lock().unwrap().len() == 1).await;
    assert_eq!(sink.lock().unwrap()[0], json!({"n": 2}));
}

#[tokio::test]
async fn resubscription_sends_the_full_set() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _a = subscribe_first(&client, &mock, "b", &sink).await;
    let _b = client
        .subscribe("a", collect(&sink), SubscribeOptions::new())
        .await
        .unwrap();
    assert_eq!(
        mock.last_post(),
        Some(json!({"clientId": "c1", "subscriptions": ["a", "b"]}))
    );

    mock.close(0);
    handshake(&mock, 1, "c2").await;
    wait_until(|| {
        mock.last_post() == Some(json!({"clientId": "c2", "subscriptions": ["a", "b"]}))
    })
    .await;
}

#[tokio::test]
async fn stream_request_headers() {
    let mock = Arc::new(MockTransport::with_token("token-1"));
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _sub = subscribe_first(&client, &mock, "posts/*", &sink).await;

    let headers = mock.headers(0);
    let get = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    assert_eq!(get("Accept"), Some("text/event-stream"));
    assert_eq!(get("Cache-Control"), Some("no-store"));
    assert_eq!(get("Accept-Language"), Some("en-US"));
    assert_eq!(get("User-Agent"), Some("realtide-test"));
    assert_eq!(get("Authorization"), Some("token-1"));
}

#[tokio::test]
async fn no_authorization_header_without_token() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _sub = subscribe_first(&client, &mock, "posts/*", &sink).await;
    assert!(mock.headers(0).iter().all(|(k, _)| k != "Authorization"));
}

// ─── Teardown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn teardown_is_idempotent() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _sub = subscribe_first(&client, &mock, "posts/*", &sink).await;

    client.disconnect().await;
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Idle);
    // Registrations survive a bare disconnect.
    assert_eq!(client.active_topics(), ["posts/*"]);

    client.unsubscribe(None).await.unwrap();
    client.unsubscribe(None).await.unwrap();
    assert!(client.active_topics().is_empty());
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn no_dispatch_after_disconnect() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _sub = subscribe_first(&client, &mock, "t", &sink).await;
    client.disconnect().await;

    // The receiver is gone once the connection task has exited.
    let streams = mock.streams.lock().unwrap();
    let tx = streams[0].as_ref().unwrap();
    assert!(tx
        .unbounded_send(Ok(Bytes::from_static(b"event: t\ndata: 1\n\n")))
        .is_err());
    drop(streams);
    assert!(sink.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disconnect_aborts_pending_registration() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _a = subscribe_first(&client, &mock, "a", &sink).await;
    mock.hang.store(true, Ordering::SeqCst);
    let sent = mock.posts().len();

    let outcome = tokio::time::timeout(Duration::from_secs(1), async {
        tokio::join!(
            client.subscribe("b", collect(&sink), SubscribeOptions::new()),
            async {
                wait_until(|| mock.posts().len() > sent).await;
                client.disconnect().await;
            },
        )
    })
    .await
    .expect("disconnect did not abort the hanging registration");

    // An aborted registration is not an error.
    let (sub, ()) = outcome;
    assert!(sub.is_ok());
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn subscribe_during_teardown_waits_for_new_session() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _a = subscribe_first(&client, &mock, "a", &sink).await;
    let sent = mock.posts().len();

    let (unsub, sub, ()) = tokio::join!(
        client.unsubscribe(None),
        client.subscribe("b", collect(&sink), SubscribeOptions::new()),
        handshake(&mock, 1, "c2"),
    );
    unsub.unwrap();
    sub.unwrap();

    // Nothing may be registered under the torn-down session.
    let later = mock.posts().split_off(sent);
    assert!(!later.is_empty());
    assert!(later.iter().all(|p| p["clientId"] == "c2"), "posts: {later:?}");
    assert_eq!(
        mock.last_post(),
        Some(json!({"clientId": "c2", "subscriptions": ["b"]}))
    );
    assert_eq!(client.client_id(), "c2");
    assert_eq!(client.active_topics(), ["b"]);
    assert_eq!(client.state(), ConnectionState::Streaming);
}

// ─── Registration failures ────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_first_registration_rolls_back_to_idle() {
    let mock = Arc::new(MockTransport::default());
    mock.reject(Some("posts/*"));
    let client = client(&mock);

    let (sub, ()) = tokio::join!(
        client.subscribe("posts/*", |_: &Value| {}, SubscribeOptions::new()),
        handshake(&mock, 0, "c1"),
    );
    let err = sub.unwrap_err();

    assert_eq!(err.status(), 404);
    assert!(!err.is_abort());
    assert!(client.active_topics().is_empty());
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn rejected_registration_restores_remaining_set() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _a = subscribe_first(&client, &mock, "a", &sink).await;
    mock.reject(Some("b"));

    let err = client
        .subscribe("b", collect(&sink), SubscribeOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 404, .. }));

    // The server is told the set without the rejected topic.
    assert_eq!(
        mock.last_post(),
        Some(json!({"clientId": "c1", "subscriptions": ["a"]}))
    );
    assert_eq!(client.active_topics(), ["a"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn unsubscribe_surfaces_registration_errors() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _a = subscribe_first(&client, &mock, "a", &sink).await;
    client
        .subscribe("b", collect(&sink), SubscribeOptions::new())
        .await
        .unwrap();
    mock.reject(Some("b"));

    let err = client.unsubscribe(Some("a")).await.unwrap_err();
    assert_eq!(err.status(), 404);
    // The local removal stands.
    assert_eq!(client.active_topics(), ["b"]);
}

#[tokio::test]
async fn failed_resubscription_after_reconnect_keeps_streaming() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();
    let connected: Arc<Mutex<Vec<String>>> = Default::default();
    let c = connected.clone();
    client.on_connect(move |id| c.lock().unwrap().push(id.to_string()));

    let _a = subscribe_first(&client, &mock, "a", &sink).await;
    mock.reject(Some("a"));

    mock.close(0);
    handshake(&mock, 1, "c2").await;
    wait_until(|| connected.lock().unwrap().len() == 2).await;
    assert_eq!(
        mock.last_post(),
        Some(json!({"clientId": "c2", "subscriptions": ["a"]}))
    );
    assert!(client.is_connected());

    mock.push(1, "event: a\ndata: {\"n\":1}\n\n");
    wait_until(|| sink.lock().unwrap().len() == 1).await;
    assert_eq!(client.state(), ConnectionState::Streaming);
}

// ─── Targeted removal ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unsubscribe_by_prefix_keeps_other_topics() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _a = subscribe_first(&client, &mock, "posts/a", &sink).await;
    for topic in ["posts/b", "users/x"] {
        client
            .subscribe(topic, collect(&sink), SubscribeOptions::new())
            .await
            .unwrap();
    }

    client.unsubscribe_by_prefix("posts/").await.unwrap();
    assert_eq!(client.active_topics(), ["users/x"]);
    assert_eq!(
        mock.last_post(),
        Some(json!({"clientId": "c1", "subscriptions": ["users/x"]}))
    );
    assert!(client.is_connected());
}

#[tokio::test]
async fn listener_handle_removes_only_itself() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let first: Sink = Default::default();
    let second: Sink = Default::default();

    let a = subscribe_first(&client, &mock, "t", &first).await;
    let _b = client
        .subscribe("t", collect(&second), SubscribeOptions::new())
        .await
        .unwrap();
    assert_ne!(a.listener_id(), _b.listener_id());

    a.unsubscribe().await.unwrap();
    assert_eq!(client.active_topics(), ["t"]);

    mock.push(0, "event: t\ndata: 7\n\n");
    wait_until(|| second.lock().unwrap().len() == 1).await;
    assert!(first.lock().unwrap().is_empty());
}

#[tokio::test]
async fn options_are_folded_into_the_topic() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let options = SubscribeOptions::new().with_query("expand", "author");
    let (sub, ()) = tokio::join!(
        client.subscribe("posts/*", collect(&sink), options),
        handshake(&mock, 0, "c1"),
    );
    let sub = sub.unwrap();

    assert!(sub.topic().starts_with("posts/*?options="));
    assert_eq!(client.active_topics(), [sub.topic().to_string()]);
    assert_eq!(
        mock.last_post().unwrap()["subscriptions"],
        json!([sub.topic()])
    );
}

// ─── Record subscriptions ─────────────────────────────────────────────────────

#[tokio::test]
async fn record_subscriptions_decode_and_scope() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let events: Arc<Mutex<Vec<RecordEvent>>> = Default::default();
    let e = events.clone();

    let posts = client.collection("posts");
    let (sub, ()) = tokio::join!(
        posts.subscribe(
            "*",
            move |event| e.lock().unwrap().push(event),
            SubscribeOptions::new(),
        ),
        handshake(&mock, 0, "c1"),
    );
    let sub = sub.unwrap();
    assert_eq!(sub.topic(), "posts/*");

    // Undecodable payloads are skipped.
    mock.push(0, "event: posts/*\ndata: not json\n\n");
    mock.push(
        0,
        "event: posts/*\ndata: {\"action\":\"delete\",\"record\":{\"id\":\"r9\"}}\n\n",
    );
    wait_until(|| !events.lock().unwrap().is_empty()).await;
    assert_eq!(
        *events.lock().unwrap(),
        [RecordEvent {
            action: "delete".into(),
            record: json!({"id": "r9"}),
        }]
    );

    posts.unsubscribe(None).await.unwrap();
    assert!(client.active_topics().is_empty());
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn record_unsubscribe_by_collection_leaves_lookalikes() {
    let mock = Arc::new(MockTransport::default());
    let client = client(&mock);
    let sink: Sink = Default::default();

    let _other = subscribe_first(&client, &mock, "posts_archive/*", &sink).await;
    let posts = client.collection("posts");
    posts
        .subscribe("r1", |_| {}, SubscribeOptions::new())
        .await
        .unwrap();
    assert_eq!(client.active_topics(), ["posts/r1", "posts_archive/*"]);

    posts.unsubscribe(None).await.unwrap();
    assert_eq!(client.active_topics(), ["posts_archive/*"]);
}
