//! Pairs an arriving `FILE_DOWNLOAD_RESPONSE` header with the binary frame
//! that follows it. The client dispatches downloads serially over the
//! single transport and the server serves them serially in return, so FIFO
//! pairing is correct without any explicit correlation ID on the wire.

use std::collections::VecDeque;

/// A download header awaiting its binary body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDownload {
    /// Opaque file identifier.
    pub file_id: String,
    /// Decrypted vault-relative path to write the body to.
    pub path: String,
    /// The server's mtime, applied to the written file.
    pub mtime: i64,
}

/// One FIFO slot: either a header waiting to be written, or a placeholder
/// for a header the engine already gave up on (its metadata failed to
/// decrypt). The server still sends the binary body unconditionally, so a
/// slot must be reserved either way to keep later headers paired correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSlot {
    /// A header awaiting its binary body.
    Header(PendingDownload),
    /// The matching `FILE_DOWNLOAD_RESPONSE` already failed (metadata
    /// decrypt error); its binary body is read off the wire and discarded.
    Failed,
}

/// FIFO queue of slots awaiting a binary frame.
#[derive(Default)]
pub struct PendingDownloads {
    queue: VecDeque<PendingSlot>,
}

impl PendingDownloads {
    /// Build an empty pairing queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `FILE_DOWNLOAD_RESPONSE` header; its binary body is
    /// expected to be the next binary frame the transport delivers,
    /// ahead of any header queued after it.
    pub fn push_header(&mut self, header: PendingDownload) {
        self.queue.push_back(PendingSlot::Header(header));
    }

    /// Reserve a slot for a response whose metadata already failed to
    /// decrypt, so the binary body that still follows it on the wire is
    /// discarded instead of mis-paired with the next real header.
    pub fn push_failed(&mut self) {
        self.queue.push_back(PendingSlot::Failed);
    }

    /// Pair the next binary frame with the oldest pending slot.
    #[must_use]
    pub fn pair_binary(&mut self) -> Option<PendingSlot> {
        self.queue.pop_front()
    }

    /// Whether any slot is waiting for its body.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Drop every pending slot, e.g. after the connection that was serving
    /// them closed: none of their binary bodies will ever arrive on a new
    /// connection, and pairing a stale header against a fresh connection's
    /// first binary frame would write the wrong file.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
