//! State ring buffer: opaque per-frame state blobs with a stable FNV-1a-32
//! checksum, exposed through cheap cell handles the rollback session can
//! hand out as part of its request list.
//!
//! The cell design is grounded in the teacher's `sync_layer::GameStateCell`
//! (`Arc<parking_lot::Mutex<..>>`), which is exactly the mechanism that
//! lets a cell be cloned into a request and outlive the call that produced
//! it while the ring itself stays exclusively owned by the buffer. The
//! checksum algorithm is grounded in `wallstop-fortress-rollback`'s
//! `checksum.rs`, which hashes with FNV-1a and also gives the dual
//! unit/property test layout this module's tests follow.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Frame, NULL_FRAME, STATE_BUFFER_LENGTH};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a-32 over `bytes`, per §4.3.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Default, Clone)]
struct Slot {
    frame: Frame,
    blob: Option<Vec<u8>>,
    checksum: u32,
}

impl Slot {
    fn empty() -> Self {
        Self {
            frame: NULL_FRAME,
            blob: None,
            checksum: 0,
        }
    }
}

/// A cheap, cloneable handle bound to a single ring slot. Cells are what
/// the session hands out in [`Request::SaveGameState`](crate::session::Request::SaveGameState)/
/// [`Request::LoadGameState`](crate::session::Request::LoadGameState) entries: the driver calls
/// `save`/`load` without ever touching the [`StateBuffer`] itself, which
/// is what makes the request list reorderable and replayable after
/// `advance_frame` returns.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<Slot>>);

impl StateCell {
    fn new(frame: Frame) -> Self {
        Self(Arc::new(Mutex::new(Slot {
            frame,
            ..Slot::empty()
        })))
    }

    /// The frame this cell was issued for.
    pub fn frame(&self) -> Frame {
        self.0.lock().frame
    }

    /// Stores `bytes` into the cell and computes its checksum.
    pub fn save(&self, bytes: Vec<u8>) {
        let checksum = fnv1a_32(&bytes);
        let mut slot = self.0.lock();
        slot.blob = Some(bytes);
        slot.checksum = checksum;
    }

    /// Returns a fresh copy of the stored bytes, if any.
    pub fn load(&self) -> Option<Vec<u8>> {
        self.0.lock().blob.clone()
    }

    /// The checksum computed the last time `save` was called on this cell.
    pub fn checksum(&self) -> Option<u32> {
        let slot = self.0.lock();
        slot.blob.as_ref().map(|_| slot.checksum)
    }
}

/// A ring of `STATE_BUFFER_LENGTH` slots keyed by `frame mod
/// STATE_BUFFER_LENGTH`.
#[derive(Debug, Clone)]
pub struct StateBuffer {
    slots: Vec<StateCell>,
}

impl Default for StateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBuffer {
    pub fn new() -> Self {
        let slots = (0..STATE_BUFFER_LENGTH)
            .map(|_| StateCell::new(NULL_FRAME))
            .collect();
        Self { slots }
    }

    fn index(frame: Frame) -> usize {
        debug_assert!(frame >= 0);
        (frame as usize) % STATE_BUFFER_LENGTH
    }

    /// Returns the cell for `frame`, re-stamping it with `frame` so a
    /// subsequent `save` through it is attributed correctly even if the
    /// slot previously held a different frame's data.
    pub fn cell(&self, frame: Frame) -> StateCell {
        let cell = self.slots[Self::index(frame)].clone();
        {
            let mut slot = cell.0.lock();
            if slot.frame != frame {
                slot.frame = frame;
                slot.blob = None;
            }
        }
        cell
    }

    /// Returns a fresh copy of the bytes saved for `frame`, or `None` if
    /// the slot has since been overwritten by a different frame's save.
    pub fn load(&self, frame: Frame) -> Option<Vec<u8>> {
        let slot = self.slots[Self::index(frame)].0.lock();
        if slot.frame == frame {
            slot.blob.clone()
        } else {
            None
        }
    }

    /// Returns the checksum stored for `frame`, or `None` on a frame
    /// mismatch (i.e. the slot was overwritten, or never saved).
    pub fn get_checksum(&self, frame: Frame) -> Option<u32> {
        let slot = self.slots[Self::index(frame)].0.lock();
        if slot.frame == frame && slot.blob.is_some() {
            Some(slot.checksum)
        } else {
            None
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_checksum_deterministic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(fnv1a_32(&bytes), fnv1a_32(&bytes));
        }

        #[test]
        fn prop_ring_safety(a in 0i32..1000, delta in 1usize..(STATE_BUFFER_LENGTH * 3)) {
            let buf = StateBuffer::new();
            buf.cell(a).save(vec![1; 4]);
            let b = a + delta as Frame;
            buf.cell(b).save(vec![2; 4]);

            let same_slot = (a as usize % STATE_BUFFER_LENGTH) == (b as usize % STATE_BUFFER_LENGTH);
            if same_slot && a != b {
                prop_assert_eq!(buf.load(a), None);
            } else {
                prop_assert_eq!(buf.load(a), Some(vec![1; 4]));
            }
            prop_assert_eq!(buf.load(b), Some(vec![2; 4]));
        }
    }
}
