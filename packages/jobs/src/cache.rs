use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ExistenceCheck, SetExpiry, SetOptions};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of an atomic SET NX EX.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetNx {
    /// The key was set; the caller holds the window.
    Set,
    /// The key already existed.
    Exists,
    /// The cache could not be reached; callers degrade.
    Unavailable,
}

/// Short-TTL string cache for throttling, coalescing, event dedup and cancel
/// flags.
///
/// The cache is never authoritative: every failure here degrades to the
/// database path, it must not fail a state-changing call.
pub struct Cache {
    client: Option<Client>,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl Cache {
    pub fn new(url: &str) -> Self {
        let client = match Client::open(url) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "Invalid cache URL, running without cache");
                None
            }
        };
        Self {
            client,
            conn: Mutex::new(None),
        }
    }

    /// A cache that never hits; used when the cache is disabled and in tests.
    pub fn disabled() -> Self {
        Self {
            client: None,
            conn: Mutex::new(None),
        }
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        let client = self.client.as_ref()?;
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Some(conn.clone());
        }
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                Some(conn)
            }
            Err(e) => {
                debug!(error = %e, "Cache connection failed");
                None
            }
        }
    }

    async fn reset(&self) {
        *self.conn.lock().await = None;
    }

    /// Atomic SET NX EX.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> SetNx {
        let Some(mut conn) = self.connection().await else {
            return SetNx::Unavailable;
        };
        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ttl_secs));
        match conn
            .set_options::<_, _, Option<String>>(key, value, opts)
            .await
        {
            Ok(Some(_)) => SetNx::Set,
            Ok(None) => SetNx::Exists,
            Err(e) => {
                debug!(key, error = %e, "Cache SET NX failed");
                self.reset().await;
                SetNx::Unavailable
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                debug!(key, error = %e, "Cache SETEX failed");
                self.reset().await;
                false
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Cache GET failed");
                self.reset().await;
                None
            }
        }
    }

    /// GET and delete in one round trip.
    pub async fn get_del(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        match conn.get_del::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Cache GETDEL failed");
                self.reset().await;
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        if let Err(e) = conn.del::<_, ()>(key).await {
            debug!(key, error = %e, "Cache DEL failed");
            self.reset().await;
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.set_ex(key, &json, ttl_secs).await,
            Err(e) => {
                debug!(key, error = %e, "Cache JSON encode failed");
                false
            }
        }
    }

    /// Read a JSON entry; a corrupted entry is cleared and treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Corrupted cache entry, clearing");
                self.delete(key).await;
                None
            }
        }
    }

    /// Read and delete a JSON entry.
    pub async fn take_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_del(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Discarding corrupted cache entry");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_degrades() {
        let cache = Cache::disabled();
        assert_eq!(cache.set_nx_ex("k", "v", 2).await, SetNx::Unavailable);
        assert!(!cache.set_ex("k", "v", 2).await);
        assert!(cache.get("k").await.is_none());
        assert!(cache.get_json::<serde_json::Value>("k").await.is_none());
        // No panic on delete either.
        cache.delete("k").await;
    }
}
