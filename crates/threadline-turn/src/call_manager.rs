//! Process-wide active-turn registry (spec §4.9). Grounded on the gateway's
//! `active_operations: DashMap<String, CancellationToken>` pattern: the turn
//! engine registers a handle on entry and deregisters on exit (success,
//! cancel, or confirmation-wait), keeping "only one turn per session" true
//! without a lock held across the whole turn.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Handle for one in-flight turn.
pub struct ActiveTurnHandle {
    pub token: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl ActiveTurnHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }
}

/// `session_id -> active_turn_handle`, atomic insert-if-absent (spec §4.9).
#[derive(Default)]
pub struct CallManager {
    active: DashMap<String, ActiveTurnHandle>,
}

impl CallManager {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    pub fn has_active(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// Register a new turn; fails if one is already active on this session.
    pub fn register(&self, session_id: &str) -> Result<CancellationToken> {
        let handle = ActiveTurnHandle::new();
        let token = handle.token.clone();
        match self.active.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::AlreadyActive),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(token)
            }
        }
    }

    pub fn deregister(&self, session_id: &str) {
        self.active.remove(session_id);
    }

    /// Invoke the cancellation token for `session_id`, if a turn is active.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(handle) = self.active.get(session_id) {
            handle.token.cancel();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_fails_when_already_active() {
        let mgr = CallManager::new();
        mgr.register("s1").unwrap();
        assert!(matches!(mgr.register("s1"), Err(Error::AlreadyActive)));
    }

    #[test]
    fn deregister_frees_the_slot() {
        let mgr = CallManager::new();
        mgr.register("s1").unwrap();
        mgr.deregister("s1");
        assert!(!mgr.has_active("s1"));
        assert!(mgr.register("s1").is_ok());
    }

    #[test]
    fn cancel_triggers_the_registered_token() {
        let mgr = CallManager::new();
        let token = mgr.register("s1").unwrap();
        assert!(!token.is_cancelled());
        assert!(mgr.cancel("s1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_on_unknown_session_returns_false() {
        let mgr = CallManager::new();
        assert!(!mgr.cancel("missing"));
    }
}
