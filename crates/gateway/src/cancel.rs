//! Runner cancellation tokens (spec §4.1 "Cancellation", §9 "do not rely on
//! exception-throwing kill paths").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One token per agent id, so `kill()` can be observed from any task holding
/// only the agent id (registry lookups are by id, not by handle — §9
/// "Cyclic references").
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `agent_id`, replacing any previous one (a
    /// killed runner that is later restarted gets a clean token).
    pub fn register(&self, agent_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(agent_id.to_string(), token.clone());
        token
    }

    pub fn cancel(&self, agent_id: &str) {
        if let Some(token) = self.tokens.lock().get(agent_id) {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self, agent_id: &str) -> bool {
        self.tokens
            .lock()
            .get(agent_id)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn remove(&self, agent_id: &str) {
        self.tokens.lock().remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observed() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn map_tracks_per_agent_tokens() {
        let map = CancelMap::new();
        let t1 = map.register("a1");
        map.register("a2");
        map.cancel("a1");
        assert!(t1.is_cancelled());
        assert!(map.is_cancelled("a1"));
        assert!(!map.is_cancelled("a2"));
    }

    #[test]
    fn reregistering_resets_cancellation() {
        let map = CancelMap::new();
        map.register("a1");
        map.cancel("a1");
        assert!(map.is_cancelled("a1"));
        let fresh = map.register("a1");
        assert!(!fresh.is_cancelled());
        assert!(!map.is_cancelled("a1"));
    }

    #[test]
    fn remove_forgets_the_token() {
        let map = CancelMap::new();
        map.register("a1");
        map.remove("a1");
        assert!(!map.is_cancelled("a1"));
    }
}
