//! HTTP transport backed by `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::{json, Value};

use realtide_core::{
    join_url, AuthStore, ByteStream, ClientError, HttpMethod, RealtimeConfig, Result, SendOptions,
    Transport,
};

/// `Transport` talking to a real server.
pub struct HttpTransport {
    base_url: String,
    lang: String,
    user_agent: String,
    http: reqwest::Client,
    auth: Arc<AuthStore>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &RealtimeConfig, auth: Arc<AuthStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            lang: config.lang.clone(),
            user_agent: config.user_agent.clone(),
            http,
            auth,
            request_timeout: config.request_timeout(),
        })
    }

    /// Transport with default configuration and an empty auth store.
    pub fn default_for(base_url: impl Into<String>) -> Result<Self> {
        Self::new(&RealtimeConfig::new(base_url), Arc::new(AuthStore::new()))
    }

    pub fn auth_store(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    fn network_error(url: &str, e: reqwest::Error) -> ClientError {
        ClientError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

fn to_reqwest(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// JSON bodies are parsed (falling back to `{}`), anything else is kept as
/// a string.
fn parse_body(text: String, is_json: bool) -> Value {
    if text.is_empty() {
        Value::Null
    } else if is_json {
        serde_json::from_str(&text).unwrap_or_else(|_| json!({}))
    } else {
        Value::String(text)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, path: &str, options: SendOptions) -> Result<Value> {
        let url = join_url(&self.base_url, path, &options.query);

        let mut req = self
            .http
            .request(to_reqwest(options.method), &url)
            .timeout(self.request_timeout)
            .header(ACCEPT_LANGUAGE, &self.lang)
            .header(USER_AGENT, &self.user_agent);

        let has_auth = options
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        if !has_auth {
            if let Some(token) = self.auth.valid_token() {
                req = req.header(AUTHORIZATION, token);
            }
        }
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            req = req.json(body);
        }

        tracing::debug!(method = %options.method, url = %url, "sending request");
        let resp = req.send().await.map_err(|e| Self::network_error(&url, e))?;

        let status = resp.status().as_u16();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let text = resp.text().await.map_err(|e| Self::network_error(&url, e))?;
        let data = parse_body(text, is_json);

        if status >= 400 {
            let response = if data.is_object() { data } else { json!({}) };
            return Err(ClientError::Http { url, status, response });
        }
        Ok(data)
    }

    async fn open_stream(&self, path: &str, headers: Vec<(String, String)>) -> Result<ByteStream> {
        let url = self.build_url(path);

        let mut req = self.http.get(&url);
        for (name, value) in &headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req.send().await.map_err(|e| Self::network_error(&url, e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let response = serde_json::from_str(&body).unwrap_or_else(|_| json!({}));
            return Err(ClientError::Http { url, status, response });
        }

        let stream_url = url.clone();
        let body = resp
            .bytes_stream()
            .map_err(move |e| Self::network_error(&stream_url, e));
        Ok(Box::pin(body))
    }

    fn build_url(&self, path: &str) -> String {
        join_url(&self.base_url, path, &Default::default())
    }

    fn auth_token(&self) -> Option<String> {
        self.auth.valid_token()
    }

    fn language(&self) -> &str {
        &self.lang
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}
