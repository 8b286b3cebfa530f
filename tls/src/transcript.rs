//! Ordered record of every handshake message sent or received.

use crate::suite::HASH_LENGTH;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Digest of a transcript.
pub type Hash = [u8; HASH_LENGTH];

/// Retains the exact bytes (handshake header included, record header excluded) of each
/// handshake message in the order they were sent or received.
#[derive(Clone, Default)]
pub struct Transcript {
    spans: Vec<Bytes>,
    hasher: Sha256,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handshake message.
    pub fn append(&mut self, span: impl Into<Bytes>) {
        let span = span.into();
        self.hasher.update(&span);
        self.spans.push(span);
    }

    /// Hash of the concatenation of every span appended so far.
    ///
    /// Taking a snapshot does not affect later snapshots.
    pub fn hash(&self) -> Hash {
        self.hasher.clone().finalize().into()
    }

    /// The spans appended so far, in order.
    pub fn spans(&self) -> &[Bytes] {
        &self.spans
    }

    /// Total number of bytes appended so far.
    pub fn len(&self) -> usize {
        self.spans.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Hash of an empty transcript.
pub fn empty_hash() -> Hash {
    Sha256::digest(b"").into()
}
