//! Live session ownership: capacity ceiling, idle sweep and teardown.

use crate::config::SessionConfig;
use crate::error::GatewayError;
use crate::models::Session;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_frames_processed: u64,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    session_timeout: Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig, shutdown: CancellationToken) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions: config.max_sessions,
            session_timeout: config.timeout(),
            sweep_interval: config.sweep_interval(),
            shutdown,
            sweeper: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Registers a new session.
    ///
    /// A full registry evicts its least recently active inactive session.
    /// Re-creating a registered id replaces the old record.
    pub async fn create(&self, id: &str) -> Result<Arc<Session>, GatewayError> {
        self.insert(id, false).await
    }

    /// Looks a session up and touches it.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.lock().get(id).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Returns the registered session or creates it. Lookup and insert happen
    /// under one lock, so concurrent callers share a single record.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<Session>, GatewayError> {
        self.insert(id, true).await
    }

    async fn insert(&self, id: &str, reuse_existing: bool) -> Result<Arc<Session>, GatewayError> {
        let (session, displaced) = {
            let mut sessions = self.lock();
            if reuse_existing {
                if let Some(existing) = sessions.get(id) {
                    existing.touch();
                    return Ok(existing.clone());
                }
            }

            let displaced = if let Some(old) = sessions.remove(id) {
                Some(old)
            } else if sessions.len() >= self.max_sessions {
                let oldest = sessions
                    .values()
                    .filter(|s| !s.is_active())
                    .min_by_key(|s| s.last_activity())
                    .map(|s| s.id().to_string());
                match oldest {
                    Some(victim) => sessions.remove(&victim),
                    None => {
                        return Err(GatewayError::CapacityExceeded {
                            max: self.max_sessions,
                        })
                    }
                }
            } else {
                None
            };

            let session = Arc::new(Session::new(id, self.shutdown.child_token()));
            sessions.insert(id.to_string(), session.clone());
            (session, displaced)
        };

        if let Some(old) = displaced {
            tracing::info!(
                session_id = %old.id(),
                frames_processed = old.frames_processed(),
                replaced_by = %id,
                "Session displaced"
            );
            old.teardown().await;
        }

        tracing::info!(session_id = %id, "Created session");
        Ok(session)
    }

    /// Removes and tears a session down. Returns false if it was not registered.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(session) => {
                session.teardown().await;
                tracing::info!(
                    session_id = %id,
                    frames_processed = session.frames_processed(),
                    "Removed session"
                );
                true
            }
            None => false,
        }
    }

    /// Removes every session idle for longer than the timeout.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.lock();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| now.saturating_duration_since(s.last_activity()) > self.session_timeout)
                .map(|s| s.id().to_string())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            tracing::info!(session_id = %session.id(), "Session expired due to inactivity");
            session.teardown().await;
        }
        expired.len()
    }

    pub fn stats(&self) -> SessionStats {
        let sessions = self.lock();
        SessionStats {
            total_sessions: sessions.len(),
            active_sessions: sessions.values().filter(|s| s.is_active()).count(),
            total_frames_processed: sessions.values().map(|s| s.frames_processed()).sum(),
        }
    }

    /// Spawns the periodic sweep task.
    pub fn start(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                Instant::now() + registry.sweep_interval,
                registry.sweep_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Session sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = registry.sweep().await;
                        if removed > 0 {
                            tracing::info!(removed, "Expired sessions swept");
                        }
                    }
                }
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the sweeper and removes every session.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        let drained: Vec<Arc<Session>> = self.lock().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.teardown().await;
        }
        tracing::info!("Session registry shut down");
    }
}
