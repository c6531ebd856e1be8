//! Credential storage shared by the transports.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;

/// Called with `(token, record)` after every change.
pub type AuthListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct AuthInner {
    token: String,
    record: Value,
    listeners: Vec<(u64, AuthListener)>,
    next_listener: u64,
}

/// Thread-safe holder of the current auth token and its record.
#[derive(Default)]
pub struct AuthStore {
    inner: Mutex<AuthInner>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `token` and an empty record.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.lock().token = token.into();
        store
    }

    fn lock(&self) -> MutexGuard<'_, AuthInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> String {
        self.lock().token.clone()
    }

    pub fn record(&self) -> Value {
        self.lock().record.clone()
    }

    /// Returns `true` if the token is a JWT whose `exp` lies in the future.
    pub fn is_valid(&self) -> bool {
        is_jwt_valid(&self.lock().token, unix_now())
    }

    /// The token, if it is still valid.
    pub fn valid_token(&self) -> Option<String> {
        let inner = self.lock();
        is_jwt_valid(&inner.token, unix_now()).then(|| inner.token.clone())
    }

    /// Replace token and record, then notify listeners outside the lock.
    pub fn save(&self, token: impl Into<String>, record: Value) {
        let token = token.into();
        let listeners: Vec<AuthListener> = {
            let mut inner = self.lock();
            inner.token = token.clone();
            inner.record = record.clone();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(&token, &record);
        }
    }

    pub fn clear(&self) {
        self.save(String::new(), Value::Null);
    }

    /// Register a change listener; the returned id removes it again.
    pub fn on_change(&self, listener: impl Fn(&str, &Value) + Send + Sync + 'static) -> u64 {
        let mut inner = self.lock();
        inner.next_listener += 1;
        let id = inner.next_listener;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        inner.listeners.len() != before
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("AuthStore")
            .field("has_token", &!inner.token.is_empty())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn is_jwt_valid(token: &str, now: i64) -> bool {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<Value>(&decoded) else {
        return false;
    };
    match claims.get("exp").and_then(Value::as_f64) {
        Some(exp) => exp as i64 > now,
        None => false,
    }
}
