//! Per-connection acknowledgement state.

use crate::types::SnapshotTick;

/// Number of ticks covered by the received mask.
pub const ACK_WINDOW_TICKS: u32 = 256;

const MASK_WORDS: usize = (ACK_WINDOW_TICKS as usize) / 64;

/// What a client reported having received.
///
/// Bit `n` of the mask is set when tick `last_received - n` arrived, so bit
/// 0 always refers to `last_received` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotAck {
    last_received: Option<SnapshotTick>,
    mask: [u64; MASK_WORDS],
}

impl SnapshotAck {
    /// Creates an ack state with nothing received.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_received: None,
            mask: [0; MASK_WORDS],
        }
    }

    /// Newest tick the client reported.
    #[must_use]
    pub const fn last_received(&self) -> Option<SnapshotTick> {
        self.last_received
    }

    /// The received mask relative to [`last_received`](Self::last_received).
    #[must_use]
    pub const fn mask(&self) -> [u64; MASK_WORDS] {
        self.mask
    }

    /// Returns `true` if the client reported receiving `tick`.
    #[must_use]
    pub fn is_received(&self, tick: SnapshotTick) -> bool {
        let Some(last) = self.last_received else {
            return false;
        };
        let age = last.ticks_since(tick);
        if age < 0 || age >= ACK_WINDOW_TICKS as i32 {
            return false;
        }
        let age = age as usize;
        self.mask[age / 64] & (1u64 << (age % 64)) != 0
    }

    /// Returns `true` if the client acked `tick` or anything after it.
    #[must_use]
    pub fn has_reached(&self, tick: SnapshotTick) -> bool {
        self.last_received
            .is_some_and(|last| last.ticks_since(tick) >= 0)
    }

    /// Applies an ack report from the client.
    ///
    /// Reports older than the current state are ignored, so the state only
    /// moves forward. A report for the same tick is merged.
    pub fn update(&mut self, last_received: SnapshotTick, mask: [u64; MASK_WORDS]) {
        match self.last_received {
            Some(current) if current.is_newer_than(last_received) => {}
            Some(current) if current == last_received => {
                for (word, incoming) in self.mask.iter_mut().zip(mask) {
                    *word |= incoming;
                }
                self.mask[0] |= 1;
            }
            _ => {
                self.last_received = Some(last_received);
                self.mask = mask;
                self.mask[0] |= 1;
            }
        }
    }

    /// Marks a single tick as received. Used by the receiving side.
    pub fn record(&mut self, tick: SnapshotTick) {
        let Some(last) = self.last_received else {
            self.last_received = Some(tick);
            self.mask = [0; MASK_WORDS];
            self.mask[0] = 1;
            return;
        };
        let age = last.ticks_since(tick);
        if age < 0 {
            self.mask = shift_older(self.mask, age.unsigned_abs() as usize);
            self.mask[0] |= 1;
            self.last_received = Some(tick);
        } else if (age as u32) < ACK_WINDOW_TICKS {
            let age = age as usize;
            self.mask[age / 64] |= 1u64 << (age % 64);
        }
    }
}

/// Moves every bit `by` positions towards older ticks.
fn shift_older(mask: [u64; MASK_WORDS], by: usize) -> [u64; MASK_WORDS] {
    let mut out = [0u64; MASK_WORDS];
    if by >= ACK_WINDOW_TICKS as usize {
        return out;
    }
    let words = by / 64;
    let bits = by % 64;
    for i in words..MASK_WORDS {
        let src = i - words;
        out[i] = mask[src] << bits;
        if bits != 0 && src > 0 {
            out[i] |= mask[src - 1] >> (64 - bits);
        }
    }
    out
}
