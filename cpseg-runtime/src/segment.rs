//! Segment instances.
//!
//! An instance is the per-binding metadata block of one shape: its parent
//! link, its reference array (when specialized), its place in the shape's
//! instance list and an in-place payload word for every linkage-kind member.
//! Instances are built only by the arena, either as a shape's blank
//! prototype or cloned from it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::{SegmentId, ShapeId};
use crate::constant::ParameterKind;
use crate::heap::{ObjRef, OopHandle};
use crate::layout::{SEGMENT_HEADER_WORDS, WORD_SIZE};

/// A reference array together with the root that keeps it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRefs {
    /// Root registered for the array.
    pub handle: OopHandle,
    /// The array object.
    pub array: ObjRef,
}

/// One instance block.
pub struct SegmentInstance {
    id: SegmentId,
    shape: ShapeId,
    kind: ParameterKind,
    cseg: Option<SegmentId>,
    refs: Option<SegmentRefs>,
    next: Option<SegmentId>,
    payload: Box<[AtomicU64]>,
    is_prototype: bool,
}

impl SegmentInstance {
    /// A blank prototype: no parent, no references, zeroed payload.
    pub(crate) fn prototype(id: SegmentId, shape: ShapeId, kind: ParameterKind, payload_words: usize) -> Self {
        Self {
            id,
            shape,
            kind,
            cseg: None,
            refs: None,
            next: None,
            payload: (0..payload_words).map(|_| AtomicU64::new(0)).collect(),
            is_prototype: true,
        }
    }

    /// Clone `prototype` into a new specialized instance.
    ///
    /// A class segment's parent link always points at itself, whatever
    /// `cseg` says.
    pub(crate) fn from_prototype(
        prototype: &SegmentInstance,
        id: SegmentId,
        cseg: Option<SegmentId>,
        refs: SegmentRefs,
        next: Option<SegmentId>,
    ) -> Self {
        let cseg = match prototype.kind {
            ParameterKind::ClassOnly => Some(id),
            _ => cseg,
        };
        Self {
            id,
            shape: prototype.shape,
            kind: prototype.kind,
            cseg,
            refs: Some(refs),
            next,
            payload: prototype
                .payload
                .iter()
                .map(|w| AtomicU64::new(w.load(Ordering::Relaxed)))
                .collect(),
            is_prototype: false,
        }
    }

    /// This instance's id.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// The shape this is an instance of.
    pub fn shape(&self) -> ShapeId {
        self.shape
    }

    /// Parameter kind of the shape.
    pub fn param_kind(&self) -> ParameterKind {
        self.kind
    }

    /// Parent link.
    pub fn cseg(&self) -> Option<SegmentId> {
        self.cseg
    }

    /// Is this a class segment (self-parented)?
    pub fn is_class(&self) -> bool {
        self.cseg == Some(self.id)
    }

    /// Is this instance tied to a class segment?
    pub fn has_class(&self) -> bool {
        self.cseg.is_some()
    }

    /// Is this instance keyed on a method parameter?
    pub fn has_method(&self) -> bool {
        self.kind.has_method()
    }

    /// The instance's reference array, if specialized.
    pub fn refs(&self) -> Option<SegmentRefs> {
        self.refs
    }

    /// Does this instance own a reference array?
    pub fn is_specialized(&self) -> bool {
        self.refs.is_some()
    }

    /// Is this the shape's blank prototype?
    pub fn is_prototype(&self) -> bool {
        self.is_prototype
    }

    /// Next instance in the shape's list.
    pub fn next(&self) -> Option<SegmentId> {
        self.next
    }

    /// Block size in words.
    pub fn size_in_words(&self) -> usize {
        SEGMENT_HEADER_WORDS + self.payload.len()
    }

    fn payload_slot(&self, offset: u32) -> Option<&AtomicU64> {
        let offset = offset as usize;
        let header = SEGMENT_HEADER_WORDS * WORD_SIZE;
        if offset < header || offset % WORD_SIZE != 0 {
            return None;
        }
        self.payload.get((offset - header) / WORD_SIZE)
    }

    /// Read the in-place word at byte `offset` from the block start.
    pub fn payload_word(&self, offset: u32) -> Option<u64> {
        self.payload_slot(offset).map(|w| w.load(Ordering::Acquire))
    }

    /// Write the in-place word at byte `offset`. Returns false for a bad offset.
    pub fn store_payload_word(&self, offset: u32, value: u64) -> bool {
        match self.payload_slot(offset) {
            Some(w) => {
                w.store(value, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for SegmentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentInstance")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("kind", &self.kind)
            .field("cseg", &self.cseg)
            .field("refs", &self.refs)
            .field("next", &self.next)
            .field("prototype", &self.is_prototype)
            .finish()
    }
}
