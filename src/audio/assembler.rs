//! # Audio Assembly
//!
//! Collects the binary chunks of one recording session in arrival order and
//! concatenates them into a single artifact when the session finalizes.
//!
//! Browsers send compressed container fragments (`MediaRecorder` WebM/Opus),
//! so chunks are treated as opaque bytes: nothing is decoded or validated
//! here, only ordered and bounded.

use std::fmt;

/// Errors raised while accepting a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerError {
    /// Accepting the chunk would push the session past its byte budget
    CapacityExceeded { limit: usize, attempted: usize },
}

impl fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblerError::CapacityExceeded { limit, attempted } => write!(
                f,
                "session would hold {} bytes, limit is {} bytes",
                attempted, limit
            ),
        }
    }
}

impl std::error::Error for AssemblerError {}

/// Outcome of accepting one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// Zero-based position of the chunk in the session
    pub index: usize,
    /// Size of this chunk
    pub len: usize,
    /// Bytes assembled so far, this chunk included
    pub total_bytes: usize,
}

/// The finished recording of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub bytes: Vec<u8>,
    /// Number of frames received, empty ones included
    pub chunk_count: usize,
}

impl AudioArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Append-only chunk buffer for one session.
///
/// ## Invariants:
/// - Chunks are concatenated strictly in the order `push` is called
/// - No chunk is ever dropped; zero-length chunks are counted but add no bytes
/// - The buffer never grows beyond `max_bytes`
#[derive(Debug)]
pub struct AudioAssembler {
    data: Vec<u8>,
    chunk_count: usize,
    max_bytes: usize,
}

impl AudioAssembler {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            chunk_count: 0,
            max_bytes,
        }
    }

    /// Append a chunk after the ones already received.
    ///
    /// A rejected chunk leaves the buffer untouched.
    pub fn push(&mut self, chunk: &[u8]) -> Result<ChunkReceipt, AssemblerError> {
        let attempted = self.data.len() + chunk.len();
        if attempted > self.max_bytes {
            return Err(AssemblerError::CapacityExceeded {
                limit: self.max_bytes,
                attempted,
            });
        }

        self.data.extend_from_slice(chunk);
        let index = self.chunk_count;
        self.chunk_count += 1;

        Ok(ChunkReceipt {
            index,
            len: chunk.len(),
            total_bytes: self.data.len(),
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    /// Consume the assembler and hand out the concatenated artifact.
    pub fn finish(self) -> AudioArtifact {
        AudioArtifact {
            bytes: self.data,
            chunk_count: self.chunk_count,
        }
    }

    /// Throw away everything received so far, returning the discarded byte count.
    pub fn discard(&mut self) -> usize {
        let discarded = self.data.len();
        self.data = Vec::new();
        self.chunk_count = 0;
        discarded
    }
}
