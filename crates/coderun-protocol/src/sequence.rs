//! Restores backend emission order from envelope sequence numbers.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::messages::{Envelope, ServerMessage};

/// Maximum number of early arrivals held while waiting for a gap to fill.
pub const DEFAULT_WINDOW: usize = 1024;

/// Releases backend messages strictly in `seq` order.
///
/// - `seq == next`: released together with any buffered successors.
/// - `seq > next`: buffered until the gap fills.
/// - `seq < next` or already buffered: duplicate, dropped.
/// - no `seq`: released immediately.
///
/// If more than `window` messages pile up behind a gap, the gap is
/// abandoned and everything buffered is released in order.
#[derive(Debug)]
pub struct Resequencer {
    next: u64,
    pending: BTreeMap<u64, ServerMessage>,
    window: usize,
}

impl Default for Resequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Resequencer {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
            window: window.max(1),
        }
    }

    /// Sequence number expected next.
    pub fn expected(&self) -> u64 {
        self.next
    }

    /// Number of messages held behind a gap.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Accept one envelope and return the messages now deliverable, in order.
    pub fn accept(&mut self, envelope: Envelope) -> Vec<ServerMessage> {
        let Some(seq) = envelope.seq else {
            return vec![envelope.message];
        };

        if seq < self.next || self.pending.contains_key(&seq) {
            debug!("dropping duplicate message seq={} (expected {})", seq, self.next);
            return Vec::new();
        }

        self.pending.insert(seq, envelope.message);

        if self.pending.len() > self.window {
            warn!(
                "sequence gap at {} not filled after {} messages, releasing buffered messages",
                self.next,
                self.pending.len()
            );
            let released = std::mem::take(&mut self.pending);
            if let Some(last) = released.keys().next_back() {
                self.next = last + 1;
            }
            return released.into_values().collect();
        }

        let mut ready = Vec::new();
        while let Some(message) = self.pending.remove(&self.next) {
            ready.push(message);
            self.next += 1;
        }
        ready
    }
}
