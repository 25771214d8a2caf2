//! Small per-device key/value state: consent, rate-limit window, guest flag.
//!
//! Each device gets its own namespace. Values are JSON strings; a value that
//! no longer parses is treated as absent rather than as an error. Counters and
//! flags that gate work go through [`KeyValueStore::update`] so that parallel
//! requests from one device cannot both claim the same slot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

const KEY_PREFIX: &str = "petdecoder";

/// Optimistic updates give up after this many lost races.
const MAX_UPDATE_ATTEMPTS: usize = 16;

/// KEYS[1] is written only if it still holds what the caller read:
/// ARGV[1] = "1" when a value was read (ARGV[2]), "0" when the key was absent.
const COMPARE_AND_SET: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
";

pub const RATE_LIMIT_KEY: &str = "analysis_rate_limit";
pub const GUEST_USED_KEY: &str = "guest_analysis_used";
pub const CONSENT_KEY: &str = "consent";
pub const COOKIE_PREFERENCES_KEY: &str = "cookie_preferences";
pub const ACCESSIBILITY_KEY: &str = "accessibility_settings";

pub fn pending_analysis_key(attempt_id: &uuid::Uuid) -> String {
    format!("pending_analysis:{attempt_id}")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Could not encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Too many concurrent updates to {0}")]
    Contended(String),
}

/// Read-modify-write callback: gets the stored value, returns the value to
/// store or `None` to leave it as is.
pub type UpdateFn<'a> = dyn FnMut(Option<String>) -> Option<String> + Send + 'a;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Applies `apply` as one atomic step with respect to every other writer
    /// of `key`. `apply` may run more than once when a writer gets in between.
    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if let Some(next) = apply(entries.get(key).cloned()) {
            entries.insert(key.to_string(), next);
        }
        Ok(())
    }
}

pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_set: redis::Script,
}

impl RedisStore {
    /// Opens the shared connection; it reconnects on its own after failures.
    pub async fn connect(client: redis::Client) -> Result<Self, StoreError> {
        Ok(Self {
            conn: ConnectionManager::new(client).await?,
            compare_and_set: redis::Script::new(COMPARE_AND_SET),
        })
    }

    fn key(key: &str) -> String {
        format!("{KEY_PREFIX}:{key}")
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(Self::key(key)).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(Self::key(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(key)).await?;
        Ok(())
    }

    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        let key = Self::key(key);
        let mut conn = self.conn.clone();
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await?;
            let Some(next) = apply(current.clone()) else {
                return Ok(());
            };
            let swapped: i32 = self
                .compare_and_set
                .key(&key)
                .arg(if current.is_some() { "1" } else { "0" })
                .arg(current.as_deref().unwrap_or_default())
                .arg(next)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                return Ok(());
            }
            tracing::debug!(key = %key, attempt, "lost update race, retrying");
        }
        Err(StoreError::Contended(key))
    }
}

/// One device's slice of the store with typed accessors.
#[derive(Clone)]
pub struct ClientState {
    store: Arc<dyn KeyValueStore>,
    device_id: String,
}

impl ClientState {
    pub fn new(store: Arc<dyn KeyValueStore>, device_id: impl Into<String>) -> Self {
        Self {
            store,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn key(&self, key: &str) -> String {
        format!("device:{}:{key}", self.device_id)
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Option<T> {
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, device_id = %self.device_id, error = %e, "discarding unreadable stored value");
                None
            }
        }
    }

    /// `None` when missing or unreadable.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw = self.store.get(&self.key(key)).await?;
        Ok(raw.and_then(|raw| self.decode(key, &raw)))
    }

    pub async fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StoreError> {
        Ok(self.get_json(key).await?.unwrap_or_default())
    }

    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(&self.key(key), &raw).await
    }

    pub async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(&self.key(key)).await
    }

    /// Atomic read-modify-write of one typed value. `apply` gets the stored
    /// value (or the default) and returns what to store, if anything, along
    /// with the caller's result from the run that took effect.
    pub async fn update_json<T, R, F>(&self, key: &str, mut apply: F) -> Result<R, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        R: Send,
        F: FnMut(T) -> (Option<T>, R) + Send,
    {
        let mut result = None;
        let mut encode_error = None;
        self.store
            .update(&self.key(key), &mut |raw: Option<String>| {
                encode_error = None;
                let current = raw.and_then(|raw| self.decode(key, &raw)).unwrap_or_default();
                let (next, outcome) = apply(current);
                result = Some(outcome);
                match next.map(|value| serde_json::to_string(&value)) {
                    Some(Ok(raw)) => Some(raw),
                    Some(Err(e)) => {
                        encode_error = Some(e);
                        None
                    }
                    None => None,
                }
            })
            .await?;

        if let Some(e) = encode_error {
            return Err(e.into());
        }
        result.ok_or_else(|| StoreError::Contended(key.to_string()))
    }
}
