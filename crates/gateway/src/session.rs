//! Cross-turn session state: previous response ids and thought signatures.
//!
//! Both maps are content-addressed under reserved synthetic hostnames so any
//! byte-addressable cache can back them. The store is best-effort: every
//! failure is swallowed, and a gateway running with [`NullStore`] (stateless
//! mode) still serves requests, just without continuity.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const RESPONSE_ID_HOST: &str = "session.rsp2com";
const THOUGHT_SIG_HOST: &str = "thought-sig.rsp2com";
const THOUGHT_SIG_KEY_PREFIX: &str = "resp_thought_sig_";

/// Session documents live for a day.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Thought-signature maps are bounded to this many call ids.
const MAX_SIGNATURE_ENTRIES: usize = 200;

const SESSION_KEY_MAX_CHARS: usize = 512;

/// Byte-addressable cache capability backing the session state.
pub trait SessionStore: Send + Sync {
    fn get(&self, url: &str) -> Option<String>;
    fn put(&self, url: &str, value: String, ttl: Duration);
}

/// In-memory store over a TTL cache.
pub struct MemoryStore {
    cache: mini_moka::sync::Cache<String, (String, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cache: mini_moka::sync::Cache::builder()
                .time_to_live(SESSION_TTL)
                .max_capacity(10_000)
                .build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, url: &str) -> Option<String> {
        let (value, deadline) = self.cache.get(&url.to_string())?;
        (Instant::now() < deadline).then_some(value)
    }

    fn put(&self, url: &str, value: String, ttl: Duration) {
        self.cache.insert(url.to_string(), (value, Instant::now() + ttl));
    }
}

/// Always-empty store for stateless mode.
pub struct NullStore;

impl SessionStore for NullStore {
    fn get(&self, _url: &str) -> Option<String> {
        None
    }

    fn put(&self, _url: &str, _value: String, _ttl: Duration) {}
}

/// One cached thought signature, keyed by normalized call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub thought_signature: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Milliseconds since the epoch; drives LRU eviction.
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseIdRecord {
    previous_response_id: String,
    updated_at: i64,
}

/// Map of normalized call id to cached signature.
pub type SignatureMap = BTreeMap<String, SignatureRecord>;

/// Handle over the shared store, bound at startup and rebindable for tests.
#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn SessionStore>,
}

impl SessionState {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// In-memory state; the default for a fresh gateway.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Stateless mode: reads are empty and writes vanish.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullStore))
    }

    pub fn previous_response_id(&self, session_key: &str) -> Option<String> {
        let raw = self.store.get(&response_id_url(session_key))?;

        match serde_json::from_str::<ResponseIdRecord>(&raw) {
            Ok(record) => Some(record.previous_response_id),
            Err(e) => {
                log::debug!("Discarding unreadable session record: {e}");
                None
            }
        }
    }

    pub fn set_previous_response_id(&self, session_key: &str, response_id: &str) {
        let record = ResponseIdRecord {
            previous_response_id: response_id.to_string(),
            updated_at: now_millis(),
        };

        match serde_json::to_string(&record) {
            Ok(serialized) => self.store.put(&response_id_url(session_key), serialized, SESSION_TTL),
            Err(e) => log::debug!("Failed to serialize session record: {e}"),
        }
    }

    pub fn thought_signatures(&self, session_key: &str) -> SignatureMap {
        let Some(raw) = self.store.get(&signature_url(session_key)) else {
            return SignatureMap::new();
        };

        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                log::debug!("Discarding unreadable signature map: {e}");
                SignatureMap::new()
            }
        }
    }

    /// Read-merge-write of freshly observed signatures.
    ///
    /// Call ids are normalized, entries without a signature are dropped, and
    /// the map is evicted LRU-by-`updated_at` down to the bound.
    pub fn merge_thought_signatures(&self, session_key: &str, updates: impl IntoIterator<Item = (String, SignatureRecord)>) {
        let mut map = self.thought_signatures(session_key);

        for (call_id, record) in updates {
            if record.thought_signature.is_empty() {
                continue;
            }

            let call_id = crate::messages::responses::normalize_call_id(&call_id).to_string();
            map.insert(call_id, record);
        }

        if map.is_empty() {
            return;
        }

        while map.len() > MAX_SIGNATURE_ENTRIES {
            let oldest = map
                .iter()
                .min_by_key(|(_, record)| record.updated_at)
                .map(|(call_id, _)| call_id.clone());

            match oldest {
                Some(call_id) => {
                    map.remove(&call_id);
                }
                None => break,
            }
        }

        match serde_json::to_string(&map) {
            Ok(serialized) => self.store.put(&signature_url(session_key), serialized, SESSION_TTL),
            Err(e) => log::debug!("Failed to serialize signature map: {e}"),
        }
    }
}

/// Build a signature record stamped now.
pub fn signature_record(signature: String, thought: Option<String>, name: Option<String>) -> SignatureRecord {
    SignatureRecord {
        thought_signature: signature,
        thought,
        name,
        updated_at: now_millis(),
    }
}

/// Derive the session key for a request.
///
/// Precedence: `x-session-id` header, the request `user` field, then a
/// model-and-first-user-text digest prefixed with the client bearer token.
pub fn derive_session_key(
    x_session_id: Option<&str>,
    user: Option<&str>,
    model: &str,
    first_user_text: Option<&str>,
    bearer: Option<&str>,
) -> String {
    if let Some(session_id) = x_session_id.filter(|v| !v.is_empty()) {
        return session_id.to_string();
    }

    if let Some(user) = user.filter(|v| !v.is_empty()) {
        return user.to_string();
    }

    let mut key = format!("{model}\n{}", first_user_text.unwrap_or_default());
    if key.chars().count() > SESSION_KEY_MAX_CHARS {
        key = key.chars().take(SESSION_KEY_MAX_CHARS).collect();
    }

    match bearer {
        Some(token) => format!("{token}:{key}"),
        None => key,
    }
}

fn response_id_url(session_key: &str) -> String {
    format!("https://{RESPONSE_ID_HOST}/{}", hex_sha256(session_key))
}

fn signature_url(session_key: &str) -> String {
    format!(
        "https://{THOUGHT_SIG_HOST}/{}",
        hex_sha256(&format!("{THOUGHT_SIG_KEY_PREFIX}{session_key}"))
    )
}

fn hex_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn now_millis() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}
