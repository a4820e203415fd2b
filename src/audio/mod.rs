//! # Audio Ingestion
//!
//! Everything between a binary WebSocket frame and a finished recording.
//!
//! ## Key Components:
//! - **Assembler**: ordered, bounded concatenation of a session's chunks
//! - **Session**: the Open → Finalizing → Closed state machine and the live-session registry
//! - **Artifact**: optional on-disk copy of each finalized recording
//!
//! Chunks are opaque bytes; the browser decides the container format.

pub mod artifact;
pub mod assembler;
pub mod session;

pub use artifact::ArtifactWriter;
pub use assembler::AudioArtifact;
pub use session::{AudioSession, SessionManager, SessionState};
