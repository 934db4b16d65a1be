//! # Reference Array Protocol
//!
//! Every segment binding owns a boxed reference array. The leading slots are
//! fixed and index-stable across all arrays of one shape, so interpreter fast
//! paths can read them without knowing whether the array belongs to a
//! specialized instance or to an unspecialized binding sharing the prototype:
//!
//! ```text
//! ┌──────────┬──────────┬──────────────┬─────────────┬─────┐
//! │ 0: arg   │ 1: handle│ 2: class refs│ 3: derived  │ ... │
//! └──────────┴──────────┴──────────────┴─────────────┴─────┘
//! ```
//!
//! Trailing slots follow the layout table of the shape descriptor and start
//! empty. Each slot is written at most once: the first successful write wins
//! and any racing writer observes the winner, so a lost race costs only
//! redundant resolution work.

use std::sync::OnceLock;

use thiserror::Error;

use crate::heap::ObjRef;

/// Slot of the parameter binding.
pub const ARGUMENT_REF_INDEX: usize = 0;
/// Slot of the reflective handle for this binding.
pub const HANDLE_REF_INDEX: usize = 1;
/// Slot of the enclosing class segment's reference array.
pub const CLASS_REFS_REF_INDEX: usize = 2;
/// First trailing (derived-constant) slot.
pub const FIXED_REF_LIMIT: usize = 3;

/// Reference-array slot misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RefSlotError {
    /// Slot index past the end of the array.
    #[error("reference slot {slot} out of bounds (length {len})")]
    OutOfBounds {
        /// Requested slot.
        slot: usize,
        /// Array length.
        len: usize,
    },

    /// Fixed slots are only written while a binding is being built.
    #[error("reference slot {slot} is a fixed slot")]
    FixedSlot {
        /// Requested slot.
        slot: usize,
    },

    /// A fixed slot was initialized twice.
    #[error("reference slot {slot} is already initialized")]
    AlreadyInitialized {
        /// Requested slot.
        slot: usize,
    },
}

/// The slots of one reference array.
pub struct RefArray {
    slots: Box<[OnceLock<ObjRef>]>,
}

impl RefArray {
    /// Create an array of `len` empty slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True for a zero-length array.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read any slot.
    pub fn get(&self, slot: usize) -> Option<ObjRef> {
        self.slots.get(slot).and_then(|s| s.get().copied())
    }

    /// The bound parameter value.
    pub fn argument(&self) -> Option<ObjRef> {
        self.get(ARGUMENT_REF_INDEX)
    }

    /// The reflective handle of this binding.
    pub fn handle(&self) -> Option<ObjRef> {
        self.get(HANDLE_REF_INDEX)
    }

    /// The enclosing class segment's reference array.
    pub fn class_refs(&self) -> Option<ObjRef> {
        self.get(CLASS_REFS_REF_INDEX)
    }

    /// Number of trailing slots.
    pub fn derived_len(&self) -> usize {
        self.len().saturating_sub(FIXED_REF_LIMIT)
    }

    /// Read a trailing slot; `None` while unresolved.
    pub fn resolved(&self, slot: usize) -> Result<Option<ObjRef>, RefSlotError> {
        self.check_trailing(slot)?;
        Ok(self.get(slot))
    }

    /// Publish the resolution of a trailing slot.
    ///
    /// Returns the value that ends up in the slot, which is `value` unless
    /// another writer got there first.
    pub fn resolve(&self, slot: usize, value: ObjRef) -> Result<ObjRef, RefSlotError> {
        self.check_trailing(slot)?;
        Ok(*self.slots[slot].get_or_init(|| value))
    }

    /// Write a fixed slot while building a binding.
    pub(crate) fn init_fixed(&self, slot: usize, value: ObjRef) -> Result<(), RefSlotError> {
        if slot >= FIXED_REF_LIMIT {
            return Err(RefSlotError::OutOfBounds { slot, len: FIXED_REF_LIMIT });
        }
        let cell = self
            .slots
            .get(slot)
            .ok_or(RefSlotError::OutOfBounds { slot, len: self.len() })?;
        cell.set(value)
            .map_err(|_| RefSlotError::AlreadyInitialized { slot })
    }

    /// Iterate over populated slots.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ObjRef)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.get().map(|r| (i, *r)))
    }

    fn check_trailing(&self, slot: usize) -> Result<(), RefSlotError> {
        if slot < FIXED_REF_LIMIT {
            Err(RefSlotError::FixedSlot { slot })
        } else if slot >= self.len() {
            Err(RefSlotError::OutOfBounds { slot, len: self.len() })
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for RefArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefArray")
            .field("len", &self.len())
            .field("populated", &self.iter().count())
            .finish()
    }
}
