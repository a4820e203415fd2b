//! # Recording Session Management
//!
//! Two pieces live here:
//! - [`AudioSession`]: the per-connection state machine owned by the gateway actor
//! - [`SessionManager`]: the process-wide registry of live sessions, used for
//!   admission control and introspection
//!
//! ## Session Lifecycle:
//! 1. **Open**: accepting audio chunks
//! 2. **Finalizing**: the stop sentinel arrived, the artifact is being processed
//! 3. **Closed**: recorded to history or abandoned; nothing more is accepted

use crate::audio::assembler::{AssemblerError, AudioArtifact, AudioAssembler, ChunkReceipt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Finalizing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Finalizing => "finalizing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Audio or a stop request arrived after the session left `Open`
    NotOpen(SessionState),
    /// The chunk would exceed the session byte budget
    Capacity(AssemblerError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotOpen(state) => write!(f, "session is {}, not open", state),
            SessionError::Capacity(err) => write!(f, "capacity exceeded: {}", err),
        }
    }
}

impl std::error::Error for SessionError {}

/// One recording, from connection accept to finalize or abandonment.
///
/// ## Ownership:
/// Owned exclusively by the gateway actor of its connection, so no locking
/// is needed. The registry only ever sees [`SessionSnapshot`] copies.
#[derive(Debug)]
pub struct AudioSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    state: SessionState,
    assembler: Option<AudioAssembler>,
}

impl AudioSession {
    pub fn new(session_id: String, max_bytes: usize) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            state: SessionState::Open,
            assembler: Some(AudioAssembler::new(max_bytes)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Append an audio chunk. Only legal while `Open`.
    pub fn accept_chunk(&mut self, chunk: &[u8]) -> Result<ChunkReceipt, SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotOpen(self.state));
        }

        match self.assembler.as_mut() {
            Some(assembler) => assembler.push(chunk).map_err(SessionError::Capacity),
            None => Err(SessionError::NotOpen(self.state)),
        }
    }

    /// Handle the stop sentinel: Open → Finalizing, yielding the artifact.
    pub fn begin_finalize(&mut self) -> Result<AudioArtifact, SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotOpen(self.state));
        }

        let assembler = self
            .assembler
            .take()
            .ok_or(SessionError::NotOpen(self.state))?;
        self.state = SessionState::Finalizing;
        Ok(assembler.finish())
    }

    /// Finalizing → Closed once the summary is recorded (or failed to record).
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Drop the session without recording anything. Returns the discarded byte count.
    pub fn abandon(&mut self) -> usize {
        let discarded = self
            .assembler
            .take()
            .map(|mut assembler| assembler.discard())
            .unwrap_or(0);
        self.state = SessionState::Closed;
        discarded
    }

    pub fn chunk_count(&self) -> usize {
        self.assembler.as_ref().map(|a| a.chunk_count()).unwrap_or(0)
    }

    pub fn total_bytes(&self) -> usize {
        self.assembler.as_ref().map(|a| a.total_bytes()).unwrap_or(0)
    }
}

/// Registry view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub chunks_received: usize,
    pub bytes_received: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    Full { max_sessions: usize },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full { max_sessions } => {
                write!(f, "maximum concurrent sessions ({}) reached", max_sessions)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Tracks every live recording session across connections.
///
/// ## Thread Safety:
/// Gateway actors run on different actix workers, so the map sits behind
/// `Arc<RwLock<...>>`. A poisoned lock is recovered: the data is only
/// bookkeeping and stays consistent per operation.
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionSnapshot>>>,
    max_concurrent_sessions: usize,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent_sessions,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionSnapshot>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionSnapshot>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot for a new connection and mint its session id.
    pub fn register(&self) -> Result<String, RegistryError> {
        let mut sessions = self.write();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(RegistryError::Full {
                max_sessions: self.max_concurrent_sessions,
            });
        }

        let session_id = Uuid::new_v4().to_string();
        sessions.insert(
            session_id.clone(),
            SessionSnapshot {
                session_id: session_id.clone(),
                state: SessionState::Open,
                chunks_received: 0,
                bytes_received: 0,
                created_at: Utc::now(),
            },
        );

        Ok(session_id)
    }

    /// Mirror the actor-owned session into the registry.
    pub fn update(&self, session: &AudioSession) {
        if let Some(snapshot) = self.write().get_mut(&session.session_id) {
            snapshot.state = session.state();
            if session.is_open() {
                snapshot.chunks_received = session.chunk_count();
                snapshot.bytes_received = session.total_bytes();
            }
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.read().get(session_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.read().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    /// Snapshots of all live sessions, oldest first.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self.read().values().cloned().collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// Live session counts keyed by state name.
    pub fn state_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for snapshot in self.read().values() {
            *counts.entry(snapshot.state.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_finalizing_closed() {
        let mut session = AudioSession::new("s1".into(), 1024);
        assert_eq!(session.state(), SessionState::Open);

        session.accept_chunk(b"abc").unwrap();
        session.accept_chunk(b"def").unwrap();

        let artifact = session.begin_finalize().unwrap();
        assert_eq!(session.state(), SessionState::Finalizing);
        assert_eq!(artifact.bytes, b"abcdef".to_vec());
        assert_eq!(artifact.chunk_count, 2);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_stop_without_chunks_finalizes() {
        let mut session = AudioSession::new("empty".into(), 1024);
        let artifact = session.begin_finalize().unwrap();
        assert!(artifact.is_empty());
        assert_eq!(session.state(), SessionState::Finalizing);
    }

    #[test]
    fn test_rejects_messages_once_not_open() {
        let mut session = AudioSession::new("s2".into(), 1024);
        session.begin_finalize().unwrap();

        assert_eq!(
            session.accept_chunk(b"late").unwrap_err(),
            SessionError::NotOpen(SessionState::Finalizing)
        );
        assert_eq!(
            session.begin_finalize().unwrap_err(),
            SessionError::NotOpen(SessionState::Finalizing)
        );

        session.close();
        assert_eq!(
            session.accept_chunk(b"later").unwrap_err(),
            SessionError::NotOpen(SessionState::Closed)
        );
    }

    #[test]
    fn test_abandon_discards_buffer() {
        let mut session = AudioSession::new("s3".into(), 1024);
        session.accept_chunk(&[0u8; 100]).unwrap();

        assert_eq!(session.abandon(), 100);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.begin_finalize().is_err());
    }

    #[test]
    fn test_capacity_error_surfaces() {
        let mut session = AudioSession::new("s4".into(), 4);
        let err = session.accept_chunk(b"too long").unwrap_err();
        assert!(matches!(err, SessionError::Capacity(_)));
        assert!(session.is_open());
    }

    #[test]
    fn test_registry_enforces_limit() {
        let manager = SessionManager::new(2);
        let first = manager.register().unwrap();
        let _second = manager.register().unwrap();

        assert_eq!(
            manager.register().unwrap_err(),
            RegistryError::Full { max_sessions: 2 }
        );

        assert!(manager.remove(&first));
        assert!(!manager.remove(&first));
        assert!(manager.register().is_ok());
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_registry_mirrors_session() {
        let manager = SessionManager::new(4);
        let id = manager.register().unwrap();
        let mut session = AudioSession::new(id.clone(), 1024);

        session.accept_chunk(&[1u8; 10]).unwrap();
        session.accept_chunk(&[]).unwrap();
        manager.update(&session);

        let snapshot = manager.get(&id).unwrap();
        assert_eq!(snapshot.chunks_received, 2);
        assert_eq!(snapshot.bytes_received, 10);
        assert_eq!(snapshot.state, SessionState::Open);

        session.begin_finalize().unwrap();
        manager.update(&session);

        // Counters keep their last open values once the artifact is handed off
        let snapshot = manager.get(&id).unwrap();
        assert_eq!(snapshot.state, SessionState::Finalizing);
        assert_eq!(snapshot.bytes_received, 10);
        assert_eq!(manager.state_counts().get("finalizing"), Some(&1));
    }
}
