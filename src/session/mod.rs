//! Session Store (history, mutation state) and Response Cache, both backed
//! by a single Redis connection pool keyed by prefixed SHA-256 fingerprints.
//! All get/set/delete paths degrade to no-op, not error, when Redis is
//! unavailable: the system stays functional without caching, only losing
//! cross-turn memory.

use std::collections::VecDeque;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::mutation::MutationState;

const HISTORY_TTL_SECONDS: u64 = 24 * 60 * 60;
const MUTATION_STATE_TTL_SECONDS: u64 = 60 * 60;
const RESPONSE_CACHE_TTL_SECONDS: u64 = 60 * 60;
const MAX_HISTORY_TURNS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

/// Thin wrapper over a Redis connection manager. `ConnectionManager` already
/// reconnects transparently; failures surface here are connection-setup
/// failures only, after which every operation degrades to a no-op.
#[derive(Clone)]
pub struct SessionStore {
    conn: Option<ConnectionManager>,
}

impl SessionStore {
    pub async fn connect(redis_url: &str) -> Self {
        match redis::Client::open(redis_url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(conn) => Self { conn: Some(conn) },
                Err(e) => {
                    warn!(error = %e, "failed to connect to redis, caching disabled");
                    Self { conn: None }
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid redis url, caching disabled");
                Self { conn: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { conn: None }
    }

    fn history_key(session_id: &str) -> String {
        format!("history:{}", fingerprint(&[session_id]))
    }

    fn mutation_state_key(session_id: &str) -> String {
        format!("mutation_state:{}", fingerprint(&[session_id]))
    }

    /// Cache key: SHA-256 over `session_id || history_length || message`,
    /// prefixed `chat:`. Turn-length inclusion prevents stale answers when
    /// identical phrases recur at different points in the conversation.
    pub fn cache_key(session_id: &str, history_length: usize, message: &str) -> String {
        format!(
            "chat:{}",
            fingerprint(&[session_id, &history_length.to_string(), message])
        )
    }

    pub async fn load_history(&self, session_id: &str) -> Vec<HistoryEntry> {
        let Some(mut conn) = self.conn.clone() else {
            return Vec::new();
        };
        let key = Self::history_key(session_id);
        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "redis GET failed, treating history as empty");
                Vec::new()
            }
        }
    }

    pub async fn save_history(&self, session_id: &str, mut history: Vec<HistoryEntry>) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if history.len() > MAX_HISTORY_TURNS {
            let drop = history.len() - MAX_HISTORY_TURNS;
            history = VecDeque::from(history).split_off(drop).into();
        }
        let key = Self::history_key(session_id);
        let Ok(payload) = serde_json::to_string(&history) else {
            return;
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(&key, payload, HISTORY_TTL_SECONDS)
            .await
        {
            warn!(error = %e, "redis SETEX failed for history");
        }
    }

    pub async fn load_mutation_state(&self, session_id: &str) -> Option<MutationState> {
        let mut conn = self.conn.clone()?;
        let key = Self::mutation_state_key(session_id);
        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "redis GET failed, treating mutation state as absent");
                None
            }
        }
    }

    pub async fn save_mutation_state(&self, session_id: &str, state: &MutationState) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let key = Self::mutation_state_key(session_id);
        let Ok(payload) = serde_json::to_string(state) else {
            return;
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(&key, payload, MUTATION_STATE_TTL_SECONDS)
            .await
        {
            warn!(error = %e, "redis SETEX failed for mutation state");
        }
    }

    pub async fn clear_mutation_state(&self, session_id: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let key = Self::mutation_state_key(session_id);
        if let Err(e) = conn.del::<_, ()>(&key).await {
            warn!(error = %e, "redis DEL failed for mutation state");
        }
    }

    /// Best-effort per-session lock: `SET key value NX EX ttl`. Returns
    /// `true` if the lock was acquired. A no-op (always "acquired") when
    /// Redis is unavailable, matching the degrade-gracefully policy.
    pub async fn try_lock_session(&self, session_id: &str, ttl_seconds: u64) -> bool {
        let Some(mut conn) = self.conn.clone() else {
            return true;
        };
        let key = format!("lock:{}", fingerprint(&[session_id]));
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl_seconds));
        match conn.set_options::<_, _, Option<String>>(&key, "1", opts).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "redis SET NX failed, proceeding without a lock");
                true
            }
        }
    }

    pub async fn unlock_session(&self, session_id: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let key = format!("lock:{}", fingerprint(&[session_id]));
        let _ = conn.del::<_, ()>(&key).await;
    }
}

/// Response cache of completed non-mutation turns, keyed by [`SessionStore::cache_key`].
#[derive(Clone)]
pub struct ResponseCache {
    conn: Option<ConnectionManager>,
}

impl ResponseCache {
    pub fn from_store(store: &SessionStore) -> Self {
        Self {
            conn: store.conn.clone(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "redis GET failed for response cache");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &serde_json::Value) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let Ok(payload) = serde_json::to_string(value) else {
            return;
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, payload, RESPONSE_CACHE_TTL_SECONDS)
            .await
        {
            warn!(error = %e, "redis SETEX failed for response cache");
        }
    }
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_for_equal_inputs() {
        let a = SessionStore::cache_key("s1", 4, "show tasks");
        let b = SessionStore::cache_key("s1", 4, "show tasks");
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_when_history_length_differs() {
        let a = SessionStore::cache_key("s1", 4, "show tasks");
        let b = SessionStore::cache_key("s1", 5, "show tasks");
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_differs_by_session_and_message() {
        let a = SessionStore::cache_key("s1", 4, "show tasks");
        let b = SessionStore::cache_key("s2", 4, "show tasks");
        let c = SessionStore::cache_key("s1", 4, "show assets");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn disabled_store_degrades_to_no_op() {
        let store = SessionStore::disabled();
        assert!(store.load_history("s1").await.is_empty());
        store.save_history("s1", vec![]).await;
        assert!(store.load_mutation_state("s1").await.is_none());
        assert!(store.try_lock_session("s1", 60).await);
    }
}
