//! Session Registry (spec §4.C): a named, LRU-capped pool of reusable
//! browser-context handles. Each session is fronted by its own
//! [`tokio::sync::Mutex`] so unrelated sessions never serialize behind one
//! another, while a call against one session still runs start-to-finish
//! with exclusive access to it, matching the "exclusively owned while a
//! call is in flight" invariant from spec §3.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::Clock;
use crate::core::config::CoreConfig;
use crate::searcher::{Searcher, SearcherFactory};

pub struct Session {
    pub id: String,
    pub searcher: Box<dyn Searcher>,
    pub last_access: i64,
    pub search_count: u32,
    data_dir: PathBuf,
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Generates a client-visible session id matching `^session_\d+_[a-z0-9]+$`.
pub fn generate_session_id(clock: &dyn Clock) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{}", clock.now_ms(), suffix)
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    default_id: Mutex<Option<String>>,
    cfg: Arc<CoreConfig>,
    factory: Arc<dyn SearcherFactory>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(cfg: Arc<CoreConfig>, factory: Arc<dyn SearcherFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_id: Mutex::new(None),
            cfg,
            factory,
            clock,
        }
    }

    pub async fn default_id(&self) -> Option<String> {
        self.default_id.lock().await.clone()
    }

    pub async fn set_default(&self, id: String) {
        *self.default_id.lock().await = Some(id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Resolves `preferred_id` to a resident session, evicting the LRU entry
    /// first if the registry is at capacity, and creating a fresh session
    /// (and fresh per-session data directory) otherwise.
    pub async fn get_or_create(&self, preferred_id: Option<String>) -> anyhow::Result<(String, SessionHandle)> {
        let mut map = self.sessions.lock().await;

        if let Some(id) = &preferred_id {
            if let Some(handle) = map.get(id) {
                handle.lock().await.last_access = self.clock.now_ms();
                return Ok((id.clone(), handle.clone()));
            }
        }

        if map.len() >= self.cfg.max_sessions {
            if let Some(evict_id) = Self::find_lru(&map).await {
                Self::close_locked(&mut map, &evict_id).await;
            }
        }

        let id = preferred_id.unwrap_or_else(|| generate_session_id(self.clock.as_ref()));
        let data_dir = self.cfg.browser_data_dir.join(&id);
        let searcher = self.factory.create(&data_dir).await?;
        let now = self.clock.now_ms();
        let session = Session {
            id: id.clone(),
            searcher,
            last_access: now,
            search_count: 0,
            data_dir,
        };
        let handle = Arc::new(Mutex::new(session));
        map.insert(id.clone(), handle.clone());
        Ok((id, handle))
    }

    async fn find_lru(map: &HashMap<String, SessionHandle>) -> Option<String> {
        let mut oldest: Option<(String, i64)> = None;
        for (id, handle) in map.iter() {
            let last_access = handle.lock().await.last_access;
            if oldest.as_ref().map(|(_, t)| last_access < *t).unwrap_or(true) {
                oldest = Some((id.clone(), last_access));
            }
        }
        oldest.map(|(id, _)| id)
    }

    async fn close_locked(map: &mut HashMap<String, SessionHandle>, id: &str) {
        if let Some(handle) = map.remove(id) {
            let mut session = handle.lock().await;
            session.searcher.close().await;
            let dir = session.data_dir.clone();
            drop(session);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("session registry: failed to remove data dir {:?}: {}", dir, e);
                }
            }
        }
    }

    /// Closes the session (tolerating searcher-close errors), removes it
    /// from the map, clears the default pointer if it matched, and deletes
    /// its on-disk data directory.
    pub async fn close(&self, id: &str) {
        let mut map = self.sessions.lock().await;
        Self::close_locked(&mut map, id).await;
        drop(map);

        let mut default = self.default_id.lock().await;
        if default.as_deref() == Some(id) {
            *default = None;
        }
    }

    /// Background sweep (spec §4.C): closes sessions idle past
    /// `SESSION_IDLE_TTL` or that have exceeded `SESSION_MAX_USES`.
    pub async fn sweep(&self) {
        let now = self.clock.now_ms();
        let idle_ttl_ms = self.cfg.session_idle_ttl.as_millis() as i64;

        let mut to_close = Vec::new();
        {
            let map = self.sessions.lock().await;
            for (id, handle) in map.iter() {
                let s = handle.lock().await;
                if now.saturating_sub(s.last_access) > idle_ttl_ms
                    || s.search_count >= self.cfg.session_max_uses
                {
                    to_close.push(id.clone());
                }
            }
        }
        for id in to_close {
            self.close(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::core::types::SearchResult;
    use crate::searcher::{FakeSearcher, FakeSearcherFactory};

    fn registry(max_sessions: usize, clock: Arc<FakeClock>) -> SessionRegistry {
        let mut cfg = CoreConfig::resolve();
        cfg.max_sessions = max_sessions;
        cfg.session_idle_ttl = std::time::Duration::from_millis(1_000);
        cfg.session_max_uses = 2;
        let factory: Arc<dyn SearcherFactory> = Arc::new(FakeSearcherFactory {
            make: Box::new(|| FakeSearcher::new(vec![SearchResult::default()])),
        });
        SessionRegistry::new(Arc::new(cfg), factory, clock)
    }

    #[tokio::test]
    async fn creates_and_reuses_by_preferred_id() {
        let clock = Arc::new(FakeClock::new(0));
        let reg = registry(10, clock);
        let (id, _) = reg.get_or_create(Some("abc".to_string())).await.unwrap();
        assert_eq!(id, "abc");
        assert_eq!(reg.len().await, 1);
        let (id2, _) = reg.get_or_create(Some("abc".to_string())).await.unwrap();
        assert_eq!(id2, "abc");
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn generates_id_matching_expected_shape() {
        let clock = Arc::new(FakeClock::new(1_700_000_000_000));
        let reg = registry(10, clock);
        let (id, _) = reg.get_or_create(None).await.unwrap();
        let re_ok = id.starts_with("session_") && id.split('_').count() == 3;
        assert!(re_ok, "unexpected id shape: {}", id);
    }

    #[tokio::test]
    async fn evicts_lru_when_at_capacity() {
        let clock = Arc::new(FakeClock::new(0));
        let reg = registry(1, clock.clone());
        reg.get_or_create(Some("first".to_string())).await.unwrap();
        clock.advance(10);
        reg.get_or_create(Some("second".to_string())).await.unwrap();
        assert_eq!(reg.len().await, 1);
        assert!(reg.get_or_create(Some("first".to_string())).await.is_ok());
        // "first" should have been recreated (evicted), "second" gone now.
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_closes_idle_sessions() {
        let clock = Arc::new(FakeClock::new(0));
        let reg = registry(10, clock.clone());
        reg.get_or_create(Some("idle".to_string())).await.unwrap();
        clock.advance(2_000);
        reg.sweep().await;
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test]
    async fn close_clears_default_pointer() {
        let clock = Arc::new(FakeClock::new(0));
        let reg = registry(10, clock);
        reg.get_or_create(Some("def".to_string())).await.unwrap();
        reg.set_default("def".to_string()).await;
        reg.close("def").await;
        assert_eq!(reg.default_id().await, None);
    }
}
