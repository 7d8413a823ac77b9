//! BrowserPool: per-agent headless browser contexts keyed by agent id
//! (spec §4.5).
//!
//! The actual browser runtime is the out-of-scope external collaborator
//! named in spec §1; this module is the bookkeeping layer around an
//! injected [`BrowserDriver`] seam, the same pattern the gateway uses for
//! `LlmProvider` (spec §4.5: "analogous to how SendApiRequest/LlmProvider is
//! the seam for LLM calls").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_domain::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One browser action's result, shaped to travel back as a tool_result
/// payload (spec §4.3 `browse` tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserActionResult {
    pub data: Value,
    #[serde(default)]
    pub element_refs: HashMap<String, String>,
}

/// The injected driver seam (spec §4.5). A concrete implementation plugs in
/// a remote-debugging-protocol client; this crate only defines the
/// contract.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, agent_id: &str, url: &str) -> Result<BrowserActionResult>;
    async fn click(&self, agent_id: &str, element_ref: &str) -> Result<BrowserActionResult>;
    async fn type_text(&self, agent_id: &str, element_ref: &str, text: &str) -> Result<BrowserActionResult>;
    async fn press(&self, agent_id: &str, key: &str) -> Result<BrowserActionResult>;
    async fn scroll(&self, agent_id: &str, dx: i32, dy: i32) -> Result<BrowserActionResult>;
    async fn snapshot(&self, agent_id: &str) -> Result<BrowserActionResult>;
    async fn screenshot(&self, agent_id: &str) -> Result<BrowserActionResult>;
    async fn back(&self, agent_id: &str) -> Result<BrowserActionResult>;
    async fn forward(&self, agent_id: &str) -> Result<BrowserActionResult>;
    async fn reload(&self, agent_id: &str) -> Result<BrowserActionResult>;
    /// Tear down the driver-side context. Called by `closeSession`; never
    /// by the pool directly on a `browse` action.
    async fn close(&self, agent_id: &str) -> Result<()>;
}


struct Session {
    profile_dir: PathBuf,
    element_refs: HashMap<String, String>,
    last_touched: DateTime<Utc>,
    ephemeral: bool,
}

/// Bookkeeping for live per-agent browser sessions: TTL, concurrency cap,
/// element-ref tracking, and profile directory lifecycle (spec §4.5).
pub struct BrowserPool {
    driver: Arc<dyn BrowserDriver>,
    sessions: Mutex<HashMap<String, Session>>,
    max_concurrent_sessions: usize,
    session_timeout: chrono::Duration,
    profile_root: Option<PathBuf>,
}

impl BrowserPool {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        max_concurrent_sessions: usize,
        session_timeout_minutes: i64,
        profile_root: Option<PathBuf>,
    ) -> Self {
        Self {
            driver,
            sessions: Mutex::new(HashMap::new()),
            max_concurrent_sessions,
            session_timeout: chrono::Duration::minutes(session_timeout_minutes),
            profile_root,
        }
    }

    fn profile_dir_for(&self, agent_id: &str) -> (PathBuf, bool) {
        match &self.profile_root {
            Some(root) => (root.join(agent_id), false),
            None => (std::env::temp_dir().join(format!("hub-browser-{agent_id}")), true),
        }
    }

    /// Obtain (creating if needed) the live session for `agent_id`. Enforces
    /// `max_concurrent_sessions` (spec §4.5 "Enforces a configured maximum
    /// of concurrent sessions").
    pub fn get_or_create(&self, agent_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(agent_id) {
            sessions.get_mut(agent_id).unwrap().last_touched = Utc::now();
            return Ok(());
        }
        if sessions.len() >= self.max_concurrent_sessions {
            return Err(Error::validation(format!(
                "browser pool is at its concurrency limit of {}",
                self.max_concurrent_sessions
            )));
        }
        let (profile_dir, ephemeral) = self.profile_dir_for(agent_id);
        sessions.insert(
            agent_id.to_string(),
            Session {
                profile_dir,
                element_refs: HashMap::new(),
                last_touched: Utc::now(),
                ephemeral,
            },
        );
        Ok(())
    }

    pub fn touch_session(&self, agent_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(agent_id) {
            session.last_touched = Utc::now();
        }
    }

    /// Release a session: removes bookkeeping and, for an ephemeral
    /// profile directory, tells the driver to close so on-disk state is
    /// cleaned up (spec §4.5 "removed on close").
    pub async fn close_session(&self, agent_id: &str) -> Result<()> {
        let removed = self.sessions.lock().remove(agent_id);
        if removed.is_some() {
            self.driver.close(agent_id).await?;
        }
        Ok(())
    }

    /// Transfer a session (and its element-ref map) from `old_id` to
    /// `new_id` atomically (spec §4.5 "browser-local agent is promoted to
    /// a hub agent").
    pub fn rekey(&self, old_id: &str, new_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .remove(old_id)
            .ok_or_else(|| Error::validation(format!("no browser session for '{old_id}'")))?;
        sessions.insert(new_id.to_string(), session);
        Ok(())
    }

    pub fn record_element_ref(&self, agent_id: &str, token: &str, selector: &str) {
        if let Some(session) = self.sessions.lock().get_mut(agent_id) {
            session.element_refs.insert(token.to_string(), selector.to_string());
        }
    }

    fn resolve_ref<'a>(&self, agent_id: &str, maybe_ref: &'a str) -> String {
        self.sessions
            .lock()
            .get(agent_id)
            .and_then(|s| s.element_refs.get(maybe_ref).cloned())
            .unwrap_or_else(|| maybe_ref.to_string())
    }

    pub async fn goto(&self, agent_id: &str, url: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.goto(agent_id, url).await
    }

    pub async fn click(&self, agent_id: &str, element_ref: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        let selector = self.resolve_ref(agent_id, element_ref);
        self.driver.click(agent_id, &selector).await
    }

    pub async fn type_text(&self, agent_id: &str, element_ref: &str, text: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        let selector = self.resolve_ref(agent_id, element_ref);
        self.driver.type_text(agent_id, &selector, text).await
    }

    pub async fn press(&self, agent_id: &str, key: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.press(agent_id, key).await
    }

    pub async fn scroll(&self, agent_id: &str, dx: i32, dy: i32) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.scroll(agent_id, dx, dy).await
    }

    /// Take a DOM snapshot, recording any `e<N>`-style element refs the
    /// driver returns so subsequent actions can target them (spec §4.3).
    pub async fn snapshot(&self, agent_id: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        let result = self.driver.snapshot(agent_id).await?;
        for (token, selector) in &result.element_refs {
            self.record_element_ref(agent_id, token, selector);
        }
        Ok(result)
    }

    pub async fn screenshot(&self, agent_id: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.screenshot(agent_id).await
    }

    pub async fn back(&self, agent_id: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.back(agent_id).await
    }

    pub async fn forward(&self, agent_id: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.forward(agent_id).await
    }

    pub async fn reload(&self, agent_id: &str) -> Result<BrowserActionResult> {
        self.get_or_create(agent_id)?;
        self.driver.reload(agent_id).await
    }

    /// Sweep sessions idle past the configured timeout (spec §4.5 "swept
    /// every minute"). Returns the agent ids closed.
    pub async fn sweep_idle(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, s)| now - s.last_touched > self.session_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &expired {
            let _ = self.close_session(id).await;
        }
        expired
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn profile_dir(&self, agent_id: &str) -> Option<PathBuf> {
        self.sessions.lock().get(agent_id).map(|s| s.profile_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDriver {
        closes: AtomicUsize,
    }

    fn stub_result() -> BrowserActionResult {
        BrowserActionResult { data: Value::Null, element_refs: HashMap::new() }
    }

    #[async_trait]
    impl BrowserDriver for StubDriver {
        async fn goto(&self, _agent_id: &str, _url: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn click(&self, _agent_id: &str, _element_ref: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn type_text(&self, _agent_id: &str, _element_ref: &str, _text: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn press(&self, _agent_id: &str, _key: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn scroll(&self, _agent_id: &str, _dx: i32, _dy: i32) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn snapshot(&self, _agent_id: &str) -> Result<BrowserActionResult> {
            let mut refs = HashMap::new();
            refs.insert("e1".to_string(), "#submit".to_string());
            Ok(BrowserActionResult { data: Value::Null, element_refs: refs })
        }
        async fn screenshot(&self, _agent_id: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn back(&self, _agent_id: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn forward(&self, _agent_id: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn reload(&self, _agent_id: &str) -> Result<BrowserActionResult> {
            Ok(stub_result())
        }
        async fn close(&self, _agent_id: &str) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool(max: usize) -> BrowserPool {
        BrowserPool::new(Arc::new(StubDriver { closes: AtomicUsize::new(0) }), max, 10, None)
    }

    #[tokio::test]
    async fn goto_creates_a_session() {
        let pool = pool(4);
        pool.goto("a1", "https://example.com").await.unwrap();
        assert_eq!(pool.session_count(), 1);
    }

    #[tokio::test]
    async fn concurrency_cap_is_enforced() {
        let pool = pool(1);
        pool.goto("a1", "https://example.com").await.unwrap();
        let result = pool.goto("a2", "https://example.com").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn snapshot_records_element_refs_for_later_click() {
        let pool = pool(4);
        pool.goto("a1", "https://example.com").await.unwrap();
        pool.snapshot("a1").await.unwrap();
        pool.click("a1", "e1").await.unwrap();
    }

    #[tokio::test]
    async fn close_session_removes_bookkeeping() {
        let pool = pool(4);
        pool.goto("a1", "https://example.com").await.unwrap();
        pool.close_session("a1").await.unwrap();
        assert_eq!(pool.session_count(), 0);
    }

    #[tokio::test]
    async fn rekey_transfers_the_session() {
        let pool = pool(4);
        pool.goto("old-id", "https://example.com").await.unwrap();
        pool.rekey("old-id", "new-id").unwrap();
        assert_eq!(pool.session_count(), 1);
        assert!(pool.profile_dir("new-id").is_some());
        assert!(pool.profile_dir("old-id").is_none());
    }

    #[tokio::test]
    async fn sweep_idle_closes_sessions_past_timeout() {
        let pool = BrowserPool::new(Arc::new(StubDriver { closes: AtomicUsize::new(0) }), 4, -1, None);
        pool.goto("a1", "https://example.com").await.unwrap();
        let closed = pool.sweep_idle().await;
        assert_eq!(closed, vec!["a1".to_string()]);
        assert_eq!(pool.session_count(), 0);
    }
}
