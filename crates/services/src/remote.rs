use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use quiz_core::model::{FieldKey, FieldMap, FieldValue, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Errors surfaced by the remote document store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    /// Network failure or timeout. Retryable: callers absorb this into the
    /// pending queue instead of surfacing it.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote store rejected credentials")]
    Unauthorized,

    #[error("remote store reported a write conflict")]
    Conflict,

    #[error("remote document malformed: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// True for failures worth retrying once connectivity returns.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

//
// ─── CONTRACT ──────────────────────────────────────────────────────────────────
//

/// Per-user document store with partial-merge write semantics.
///
/// A write touches only the keys it names; reads come in two modes — the
/// client-side cache (instant, possibly stale) and the authoritative server
/// round-trip.
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    /// Best-effort read from the client-side document cache. Never blocks on
    /// the network.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` only for local client faults; an empty cache is
    /// `Ok(None)`.
    async fn read_cached(&self, user: &UserId) -> Result<Option<FieldMap>, RemoteError>;

    /// Authoritative read, with a bounded timeout.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Unavailable` on network failure or timeout,
    /// `Unauthorized` on rejected credentials, `Malformed` if the document
    /// cannot be interpreted.
    async fn read_authoritative(&self, user: &UserId) -> Result<FieldMap, RemoteError>;

    /// Merge-write: only the given keys change server-side.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Unavailable`, `Unauthorized`, or `Conflict`.
    async fn write_partial(&self, user: &UserId, fields: &FieldMap) -> Result<(), RemoteError>;
}

//
// ─── HTTP CLIENT ───────────────────────────────────────────────────────────────
//

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: String,
}

impl RemoteConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("QUIZ_REMOTE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self { base_url })
    }
}

/// HTTP adapter for the remote progress document service.
///
/// `GET {base}/users/{uid}` returns the user's flat document;
/// `PATCH {base}/users/{uid}` merges the posted fields. Successful responses
/// feed a client-side cache which serves `read_cached`.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    cache: Mutex<HashMap<UserId, FieldMap>>,
}

impl HttpRemote {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn document_url(&self, user: &UserId) -> String {
        format!("{}/users/{}", self.base_url.trim_end_matches('/'), user)
    }

    fn remember(&self, user: &UserId, fields: &FieldMap) {
        if let Ok(mut cache) = self.cache.lock() {
            cache
                .entry(user.clone())
                .or_default()
                .extend(fields.iter().map(|(k, v)| (*k, *v)));
        }
    }

    fn status_error(status: StatusCode) -> RemoteError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
            StatusCode::CONFLICT => RemoteError::Conflict,
            other => RemoteError::Unavailable(format!("unexpected status {other}")),
        }
    }

    fn transport_error(err: &reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Unavailable("request timed out".into())
        } else {
            RemoteError::Unavailable(err.to_string())
        }
    }
}

/// Interprets a raw document, keeping only fields of the canonical schema.
///
/// The per-user document also carries profile fields owned by other
/// subsystems (email, display name); those are skipped, not errors. A known
/// key with an uninterpretable value is `Malformed`.
fn parse_document(raw: &serde_json::Map<String, serde_json::Value>) -> Result<FieldMap, RemoteError> {
    let mut fields = FieldMap::new();
    for (name, value) in raw {
        let Ok(key) = name.parse::<FieldKey>() else {
            continue;
        };
        let parsed = match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(FieldValue::Int),
            serde_json::Value::String(s) => {
                s.parse::<NaiveDate>().ok().map(FieldValue::Date)
            }
            _ => None,
        };
        let parsed = parsed.ok_or_else(|| {
            RemoteError::Malformed(format!("field {name} has unusable value {value}"))
        })?;
        fields.insert(key, parsed);
    }
    Ok(fields)
}

#[async_trait]
impl ProgressRemote for HttpRemote {
    async fn read_cached(&self, user: &UserId) -> Result<Option<FieldMap>, RemoteError> {
        let cache = self
            .cache
            .lock()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(cache.get(user).cloned())
    }

    async fn read_authoritative(&self, user: &UserId) -> Result<FieldMap, RemoteError> {
        let response = self
            .client
            .get(self.document_url(user))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }

        let raw: serde_json::Map<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        let fields = parse_document(&raw)?;
        self.remember(user, &fields);
        Ok(fields)
    }

    async fn write_partial(&self, user: &UserId, fields: &FieldMap) -> Result<(), RemoteError> {
        let response = self
            .client
            .patch(self.document_url(user))
            .timeout(REQUEST_TIMEOUT)
            .json(fields)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }

        self.remember(user, fields);
        Ok(())
    }
}

//
// ─── IN-MEMORY REMOTE ──────────────────────────────────────────────────────────
//

/// In-memory remote store for testing and prototyping.
///
/// Documents live in a shared map with the same merge semantics as the real
/// service. Tests can take it offline, script per-write failures, and inspect
/// the order in which writes arrived.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    documents: Arc<Mutex<HashMap<UserId, FieldMap>>>,
    device_cache: Arc<Mutex<HashMap<UserId, FieldMap>>>,
    reachable: Arc<AtomicBool>,
    write_script: Arc<Mutex<Vec<Option<RemoteError>>>>,
    writes_seen: Arc<Mutex<Vec<FieldMap>>>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        let remote = Self::default();
        remote.reachable.store(true, Ordering::SeqCst);
        remote
    }

    /// Makes subsequent network operations fail with `Unavailable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Scripts the outcome of upcoming writes: entry N applies to the N-th
    /// write from now (`None` = succeed).
    pub fn script_write_failures(&self, script: Vec<Option<RemoteError>>) {
        *self.write_script.lock().expect("script lock") = script;
    }

    /// Pre-populates a user's document.
    pub fn seed_document(&self, user: &UserId, fields: FieldMap) {
        self.documents
            .lock()
            .expect("documents lock")
            .insert(user.clone(), fields);
    }

    /// Current server-side document for a user.
    #[must_use]
    pub fn document(&self, user: &UserId) -> FieldMap {
        self.documents
            .lock()
            .expect("documents lock")
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    /// Every successful write's payload, in arrival order.
    #[must_use]
    pub fn writes_seen(&self) -> Vec<FieldMap> {
        self.writes_seen.lock().expect("writes lock").clone()
    }

    fn next_scripted_failure(&self) -> Option<RemoteError> {
        let mut script = self.write_script.lock().expect("script lock");
        if script.is_empty() {
            None
        } else {
            script.remove(0)
        }
    }
}

#[async_trait]
impl ProgressRemote for InMemoryRemote {
    async fn read_cached(&self, user: &UserId) -> Result<Option<FieldMap>, RemoteError> {
        Ok(self
            .device_cache
            .lock()
            .expect("cache lock")
            .get(user)
            .cloned())
    }

    async fn read_authoritative(&self, user: &UserId) -> Result<FieldMap, RemoteError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("no route to store".into()));
        }
        let fields = self.document(user);
        self.device_cache
            .lock()
            .expect("cache lock")
            .insert(user.clone(), fields.clone());
        Ok(fields)
    }

    async fn write_partial(&self, user: &UserId, fields: &FieldMap) -> Result<(), RemoteError> {
        if let Some(err) = self.next_scripted_failure() {
            return Err(err);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("no route to store".into()));
        }

        self.documents
            .lock()
            .expect("documents lock")
            .entry(user.clone())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (*k, *v)));
        self.device_cache
            .lock()
            .expect("cache lock")
            .entry(user.clone())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (*k, *v)));
        self.writes_seen
            .lock()
            .expect("writes lock")
            .push(fields.clone());
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{Category, StageKey};

    fn user() -> UserId {
        UserId::new("uid-1").unwrap()
    }

    fn stage_field(index: u8, score: u32) -> (FieldKey, FieldValue) {
        let stage = StageKey::new(Category::Roadmap, index).unwrap();
        (FieldKey::Stage(stage), FieldValue::Int(score))
    }

    #[test]
    fn parse_document_skips_foreign_fields() {
        let raw = serde_json::json!({
            "RoadmapStage3": 18,
            "unlockedStages": 4,
            "lastDailyAnswerDate": "2024-05-01",
            "email": "someone@example.com",
            "displayName": "Someone"
        });
        let fields = parse_document(raw.as_object().unwrap()).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(
            fields.get(&FieldKey::UnlockedStages),
            Some(&FieldValue::Int(4))
        );
    }

    #[test]
    fn parse_document_rejects_unusable_known_field() {
        let raw = serde_json::json!({ "unlockedStages": "four" });
        let err = parse_document(raw.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[tokio::test]
    async fn in_memory_remote_merges_partial_writes() {
        let remote = InMemoryRemote::new();
        let uid = user();

        let (k1, v1) = stage_field(1, 12);
        remote
            .write_partial(&uid, &FieldMap::from([(k1, v1)]))
            .await
            .unwrap();

        let (k2, v2) = stage_field(2, 7);
        remote
            .write_partial(&uid, &FieldMap::from([(k2, v2)]))
            .await
            .unwrap();

        let doc = remote.document(&uid);
        assert_eq!(doc.get(&k1), Some(&v1));
        assert_eq!(doc.get(&k2), Some(&v2));
    }

    #[tokio::test]
    async fn in_memory_remote_cached_read_never_needs_network() {
        let remote = InMemoryRemote::new();
        let uid = user();
        remote.seed_document(&uid, FieldMap::from([stage_field(1, 5)]));

        // nothing cached yet
        assert!(remote.read_cached(&uid).await.unwrap().is_none());

        remote.read_authoritative(&uid).await.unwrap();
        remote.set_reachable(false);

        // cache still serves after the network goes away
        let cached = remote.read_cached(&uid).await.unwrap().unwrap();
        assert_eq!(cached.len(), 1);
        assert!(remote.read_authoritative(&uid).await.is_err());
    }

    #[tokio::test]
    async fn scripted_failures_apply_in_order() {
        let remote = InMemoryRemote::new();
        let uid = user();
        remote.script_write_failures(vec![
            None,
            Some(RemoteError::Unavailable("flaky".into())),
        ]);

        let (k, v) = stage_field(1, 1);
        assert!(remote.write_partial(&uid, &FieldMap::from([(k, v)])).await.is_ok());
        assert!(remote.write_partial(&uid, &FieldMap::from([(k, v)])).await.is_err());
        assert!(remote.write_partial(&uid, &FieldMap::from([(k, v)])).await.is_ok());
        assert_eq!(remote.writes_seen().len(), 2);
    }
}
