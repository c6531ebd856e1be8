//! The `Transport` trait — the boundary between the engine and HTTP.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;

use crate::error::Result;

/// Path of both the streaming and the registration endpoint.
pub const REALTIME_PATH: &str = "/api/realtime";

/// Incrementally-arriving response body of the streaming endpoint.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot request description.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub method: HttpMethod,
    pub query: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl SendOptions {
    /// A `POST` with a JSON body.
    pub fn post(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }
}

/// HTTP collaborator used by the realtime engine.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the engine shares one instance
/// between caller tasks and its background connection task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform a one-shot request and return the parsed response body.
    async fn send(&self, path: &str, options: SendOptions) -> Result<Value>;

    /// Open a long-lived `GET` and hand back its body as a byte stream.
    async fn open_stream(&self, path: &str, headers: Vec<(String, String)>) -> Result<ByteStream>;

    /// Absolute URL for `path`.
    fn build_url(&self, path: &str) -> String;

    /// Currently held credential, only if it is still valid.
    fn auth_token(&self) -> Option<String> {
        None
    }

    /// Value of the `Accept-Language` header.
    fn language(&self) -> &str;

    /// Value of the `User-Agent` header identifying this client.
    fn user_agent(&self) -> &str;
}

/// Join `base` and `path` with exactly one slash and append `query`.
///
/// Strings are sent bare, other JSON values in their JSON form; `null`
/// values are skipped.
pub fn join_url(base: &str, path: &str, query: &BTreeMap<String, Value>) -> String {
    let mut url = base.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(path.trim_start_matches('/'));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in query {
        match value {
            Value::Null => continue,
            Value::String(s) => serializer.append_pair(key, s),
            other => serializer.append_pair(key, &other.to_string()),
        };
        any = true;
    }
    if any {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&serializer.finish());
    }
    url
}
