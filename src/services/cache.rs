//! Optional read cache in front of the match, match-stats and player-list
//! read paths.
//!
//! The cache is best-effort: every backend failure is logged and treated as
//! a miss, never surfaced to the caller.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
#[cfg(test)]
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;
#[cfg(test)]
use std::time::Instant;
use tracing::debug;

use crate::db;
use crate::errors::SyncResult;
use crate::models::{Match, MatchStatus, Player, StatLineView};

pub const PLAYERS_ALL_KEY: &str = "players:all";

pub fn match_key(match_id: &str) -> String {
    format!("match:{}", match_id)
}

pub fn match_stats_key(match_id: &str) -> String {
    format!("stats:match:{}", match_id)
}

enum Backend {
    Redis(ConnectionManager),
    /// Process-local map standing in for Redis in tests.
    #[cfg(test)]
    Memory(Mutex<HashMap<String, (String, Option<Instant>)>>),
    Disabled,
}

pub struct CacheStore {
    backend: Backend,
}

impl CacheStore {
    /// Connect to Redis when a URL is configured. An unreachable server
    /// disables the cache instead of failing startup.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            tracing::info!("REDIS_URL not set, read cache disabled");
            return Self::disabled();
        };
        let manager = match Client::open(url) {
            Ok(client) => ConnectionManager::new(client).await,
            Err(e) => Err(e),
        };
        match manager {
            Ok(manager) => {
                tracing::info!("Read cache connected");
                Self { backend: Backend::Redis(manager) }
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), read cache disabled", e);
                Self::disabled()
            }
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self { backend: Backend::Memory(Mutex::new(HashMap::new())) }
    }

    pub fn disabled() -> Self {
        Self { backend: Backend::Disabled }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match conn.get::<_, Option<String>>(key).await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("Cache get {} failed: {}", key, e);
                        None
                    }
                }
            }
            #[cfg(test)]
            Backend::Memory(map) => {
                let mut map = map.lock().ok()?;
                let expired = matches!(map.get(key), Some((_, Some(expires))) if *expires <= Instant::now());
                if expired {
                    map.remove(key);
                    return None;
                }
                map.get(key).map(|(value, _)| value.clone())
            }
            Backend::Disabled => None,
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let result: redis::RedisResult<()> = match ttl {
                    Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await,
                    None => conn.set(key, value).await,
                };
                if let Err(e) = result {
                    tracing::warn!("Cache set {} failed: {}", key, e);
                }
            }
            #[cfg(test)]
            Backend::Memory(map) => {
                if let Ok(mut map) = map.lock() {
                    map.insert(key.to_string(), (value, ttl.map(|t| Instant::now() + t)));
                }
            }
            Backend::Disabled => {}
        }
    }

    pub async fn delete(&self, key: &str) {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let result: redis::RedisResult<()> = conn.del(key).await;
                if let Err(e) = result {
                    tracing::warn!("Cache delete {} failed: {}", key, e);
                }
            }
            #[cfg(test)]
            Backend::Memory(map) => {
                if let Ok(mut map) = map.lock() {
                    map.remove(key);
                }
            }
            Backend::Disabled => {}
        }
        debug!("Deleted cache key: {}", key);
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Cache hit for key: {}", key);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw, ttl).await,
            Err(e) => tracing::warn!("Cannot serialize cache entry {}: {}", key, e),
        }
    }
}

/// Keeps the cache consistent with writes and serves the cached read paths.
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<CacheStore>,
    players_ttl: Duration,
}

impl CacheCoordinator {
    pub fn new(store: CacheStore, players_ttl: Duration) -> Self {
        Self { store: Arc::new(store), players_ttl }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Keys touched by a write to one match, its stat lines and the players
    /// in it.
    pub async fn invalidate_match(&self, match_id: &str) {
        self.store.delete(&match_key(match_id)).await;
        self.store.delete(&match_stats_key(match_id)).await;
        self.store.delete(PLAYERS_ALL_KEY).await;
    }

    pub async fn invalidate_match_stats(&self, match_id: &str) {
        self.store.delete(&match_stats_key(match_id)).await;
    }

    pub async fn invalidate_players(&self) {
        self.store.delete(PLAYERS_ALL_KEY).await;
    }

    /// Single match. Only completed matches are cached; they no longer change
    /// under a normal sync.
    pub async fn get_match(&self, pool: &SqlitePool, match_id: &str) -> SyncResult<Option<Match>> {
        let key = match_key(match_id);
        if let Some(cached) = self.store.get::<Match>(&key).await {
            return Ok(Some(cached));
        }

        let mut conn = pool.acquire().await?;
        let found = db::get_match(&mut conn, match_id).await?;
        if let Some(m) = &found {
            if m.status == MatchStatus::Completed {
                self.store.set(&key, m, None).await;
            }
        }
        Ok(found)
    }

    /// Stat lines of one match; `None` when the match does not exist.
    pub async fn get_match_stats(
        &self,
        pool: &SqlitePool,
        match_id: &str,
    ) -> SyncResult<Option<Vec<StatLineView>>> {
        let key = match_stats_key(match_id);
        if let Some(cached) = self.store.get::<Vec<StatLineView>>(&key).await {
            return Ok(Some(cached));
        }

        let Some(m) = self.get_match(pool, match_id).await? else {
            return Ok(None);
        };
        let mut conn = pool.acquire().await?;
        let lines = db::stat_lines_for_match(&mut conn, match_id).await?;
        if m.status == MatchStatus::Completed {
            self.store.set(&key, &lines, None).await;
        }
        Ok(Some(lines))
    }

    /// Full player list, cached with a TTL and evicted on any player write.
    pub async fn get_all_players(&self, pool: &SqlitePool) -> SyncResult<Vec<Player>> {
        if let Some(cached) = self.store.get::<Vec<Player>>(PLAYERS_ALL_KEY).await {
            return Ok(cached);
        }
        let mut conn = pool.acquire().await?;
        let players = db::list_players(&mut conn).await?;
        self.store.set(PLAYERS_ALL_KEY, &players, Some(self.players_ttl)).await;
        Ok(players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::{MatchFormat, Region};
    use chrono::Utc;
    use uuid::Uuid;

    async fn store_match(pool: &SqlitePool, external_id: &str, status: MatchStatus) -> Match {
        let mut conn = pool.acquire().await.unwrap();
        let a = db::upsert_team(&mut conn, "G2", Region::Americas, None).await.unwrap();
        let b = db::upsert_team(&mut conn, "SEN", Region::Americas, None).await.unwrap();
        let now = Utc::now();
        db::upsert_match(
            &mut conn,
            &Match {
                id: Uuid::new_v4().to_string(),
                external_id: external_id.into(),
                event_name: "Kickoff".into(),
                source_url: format!("/{}/g2-vs-sen", external_id),
                team_a_id: a.id,
                team_b_id: b.id,
                score_a: if status == MatchStatus::Completed { 2 } else { 0 },
                score_b: 0,
                status,
                format: MatchFormat::Bo3,
                processed: status == MatchStatus::Completed,
                match_date: now,
                updated_at: now,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_ttl() {
        let store = CacheStore::in_memory();
        store.set("k", &vec![1, 2, 3], None).await;
        assert_eq!(store.get::<Vec<i32>>("k").await, Some(vec![1, 2, 3]));

        store.set("short", &1, Some(Duration::from_millis(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get::<i32>("short").await, None);

        store.delete("k").await;
        assert_eq!(store.get::<Vec<i32>>("k").await, None);
    }

    #[tokio::test]
    async fn test_disabled_store_never_fails() {
        let store = CacheStore::disabled();
        store.set("k", &1, None).await;
        assert_eq!(store.get::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_only_completed_matches_are_cached() {
        let pool = test_pool().await;
        let cache = CacheCoordinator::new(CacheStore::in_memory(), Duration::from_secs(300));

        let done = store_match(&pool, "600100", MatchStatus::Completed).await;
        let live = store_match(&pool, "600101", MatchStatus::Live).await;

        assert!(cache.get_match(&pool, &done.id).await.unwrap().is_some());
        assert!(cache.get_match(&pool, &live.id).await.unwrap().is_some());
        assert!(cache.get_match_stats(&pool, &done.id).await.unwrap().is_some());

        assert!(cache.store().get::<Match>(&match_key(&done.id)).await.is_some());
        assert!(cache.store().get::<Vec<StatLineView>>(&match_stats_key(&done.id)).await.is_some());
        assert!(cache.store().get::<Match>(&match_key(&live.id)).await.is_none());

        cache.invalidate_match(&done.id).await;
        assert!(cache.store().get::<Match>(&match_key(&done.id)).await.is_none());
        assert!(cache.store().get::<Vec<StatLineView>>(&match_stats_key(&done.id)).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_match_has_no_stats() {
        let pool = test_pool().await;
        let cache = CacheCoordinator::new(CacheStore::disabled(), Duration::from_secs(300));
        assert!(cache.get_match_stats(&pool, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_player_list_is_cached_until_invalidated() {
        let pool = test_pool().await;
        let cache = CacheCoordinator::new(CacheStore::in_memory(), Duration::from_secs(300));
        assert!(cache.get_all_players(&pool).await.unwrap().is_empty());

        {
            let mut conn = pool.acquire().await.unwrap();
            db::insert_player_if_absent(&mut conn, "aspas", None, crate::models::PlayerRole::Duelist, Region::Americas, 10.0)
                .await
                .unwrap();
        }
        // stale until evicted
        assert!(cache.get_all_players(&pool).await.unwrap().is_empty());
        cache.invalidate_players().await;
        assert_eq!(cache.get_all_players(&pool).await.unwrap().len(), 1);
    }
}
