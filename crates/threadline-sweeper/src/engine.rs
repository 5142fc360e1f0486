//! Periodic reaper for expired temporary sessions (spec §3 "Lifecycles").
//!
//! A fixed-interval poll racing a shutdown signal, narrowed from general
//! cron-style job execution down to a single fixed query-and-delete sweep.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use threadline_store::{Db, SessionStore};

use crate::error::Result;

/// Sweeps `db` for temporary sessions whose `updated_at` is older than
/// `ttl_hours` and deletes them (cascading to any nested subagent sessions).
pub struct SweeperEngine {
    sessions: SessionStore,
    interval: Duration,
    ttl_hours: i64,
}

impl SweeperEngine {
    pub fn new(db: Db, interval_secs: u64, ttl_hours: i64) -> Self {
        Self {
            sessions: SessionStore::new(db),
            interval: Duration::from_secs(interval_secs.max(1)),
            ttl_hours,
        }
    }

    /// Run one sweep, returning the number of sessions deleted.
    pub fn sweep_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.ttl_hours);
        let expired = self.sessions.list_expired_temporary(cutoff)?;
        let mut deleted = 0;
        for session_id in &expired {
            match self.sessions.delete_cascading(session_id) {
                Ok(n) => deleted += n,
                Err(e) => error!(session = session_id.as_str(), error = %e, "sweep: delete failed"),
            }
        }
        if deleted > 0 {
            info!(deleted, "swept expired temporary sessions");
        }
        Ok(deleted)
    }

    /// Main loop. Ticks every `interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), ttl_hours = self.ttl_hours, "sweeper started");
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sweep_once() {
                        error!(error = %e, "sweep tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::ids::{SessionId, WorkspaceId};

    fn setup() -> Db {
        let db = threadline_store::db::open_in_memory().unwrap();
        threadline_store::db::init_db(&db.lock().unwrap()).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES ('ws','w','','')",
                [],
            )
            .unwrap();
        }
        db
    }

    fn age_session(db: &Db, id: &str, hours_ago: i64) {
        let conn = db.lock().unwrap();
        let ts = (Utc::now() - chrono::Duration::hours(hours_ago)).to_rfc3339();
        conn.execute("UPDATE sessions SET updated_at = ?1 WHERE id = ?2", rusqlite::params![ts, id])
            .unwrap();
    }

    #[test]
    fn sweep_deletes_expired_temporary_sessions_only() {
        let db = setup();
        let sessions = SessionStore::new(db.clone());
        let ws = WorkspaceId::from("ws".to_string());

        sessions.create(SessionId::from("fresh".to_string()), &ws, "", true).unwrap();
        sessions.create(SessionId::from("stale-temp".to_string()), &ws, "", true).unwrap();
        sessions.create(SessionId::from("stale-permanent".to_string()), &ws, "", false).unwrap();

        age_session(&db, "stale-temp", 100);
        age_session(&db, "stale-permanent", 100);

        let engine = SweeperEngine::new(db.clone(), 1, 48);
        let deleted = engine.sweep_once().unwrap();
        assert_eq!(deleted, 1);

        assert!(sessions.get(&SessionId::from("fresh".to_string())).is_ok());
        assert!(sessions.get(&SessionId::from("stale-temp".to_string())).is_err());
        assert!(sessions.get(&SessionId::from("stale-permanent".to_string())).is_ok());
    }

    #[test]
    fn sweep_with_nothing_expired_is_a_no_op() {
        let db = setup();
        let engine = SweeperEngine::new(db, 60, 48);
        assert_eq!(engine.sweep_once().unwrap(), 0);
    }
}
