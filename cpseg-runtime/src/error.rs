//! Error types shared across segment creation paths.
//!
//! Format errors live with the resolver, layout defects with the layout
//! planner; this module holds the allocation and creation errors that cut
//! across the arena, the heap and the descriptor.

use thiserror::Error;

use crate::arena::{ClassId, MetadataType, SegmentId};
use crate::constant::ParameterKind;
use crate::heap::{ObjRef, StaleReferenceError};
use crate::layout::LayoutError;
use crate::refs::RefSlotError;
use crate::resolver::{FormatError, SegmentNumber};

/// Resource exhaustion in the class-metadata arena or the managed heap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The class arena cannot satisfy a metadata allocation.
    #[error("metaspace exhausted: {requested} words of {kind} requested, {available} available")]
    MetaspaceExhausted {
        /// Words requested.
        requested: usize,
        /// Words still available.
        available: usize,
        /// What was being allocated.
        kind: MetadataType,
    },

    /// The class arena was released with its class.
    #[error("metaspace of class {class} is closed")]
    ArenaClosed {
        /// Owning class.
        class: ClassId,
    },

    /// The managed heap is full.
    #[error("heap exhausted: object limit {limit} reached")]
    HeapExhausted {
        /// Configured object limit.
        limit: usize,
    },
}

/// Why creating a segment instance or handle failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// The operation does not apply to this descriptor's parameter kind.
    #[error("{operation} is not valid for a {kind} segment")]
    KindMismatch {
        /// Attempted operation.
        operation: &'static str,
        /// Descriptor kind.
        kind: ParameterKind,
    },

    /// A method-and-class segment was requested without its class segment.
    #[error("method-and-class segment requires a class segment")]
    MissingParent,

    /// A class segment was supplied where none belongs.
    #[error("a {kind} segment takes no class segment")]
    UnexpectedParent {
        /// Descriptor kind.
        kind: ParameterKind,
    },

    /// The supplied class segment belongs to another declaring class.
    #[error("class segment {parent} does not belong to class {expected}")]
    ForeignParent {
        /// Class the descriptor belongs to.
        expected: ClassId,
        /// The supplied segment.
        parent: SegmentId,
    },

    /// The supplied segment is not an instance of the enclosing class shape.
    #[error("segment {parent} is not a class segment of {expected}")]
    NotAClassSegment {
        /// Expected class shape.
        expected: SegmentNumber,
        /// The supplied segment.
        parent: SegmentId,
    },

    /// The supplied class segment has no reference array.
    #[error("class segment {parent} is not specialized")]
    ParentNotSpecialized {
        /// The supplied segment.
        parent: SegmentId,
    },

    /// The supplied object is not the reference array of a class segment.
    #[error("{refs:?} is not the reference array of a class segment")]
    BadClassRefs {
        /// The supplied object.
        refs: ObjRef,
    },

    /// No descriptor exists for this segment number.
    #[error("class {class} has no {number}")]
    UnknownSegment {
        /// Declaring class.
        class: ClassId,
        /// Requested number.
        number: SegmentNumber,
    },

    /// The parameter binding no longer refers to a live object.
    #[error("stale parameter binding: {0}")]
    StaleBinding(#[from] StaleReferenceError),

    /// A reference-array slot protocol violation.
    #[error(transparent)]
    RefSlot(#[from] RefSlotError),

    /// Arena or heap allocation failed.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Why defining a class's segments failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefineError {
    /// Malformed parameter dependencies; the class cannot be loaded.
    #[error("class format error: {0}")]
    Format(#[from] FormatError),

    /// The resolver produced a member list the layout cannot express.
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Not enough metaspace for the descriptors.
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

impl DefineError {
    /// Is this a user-visible class-file problem, as opposed to a VM-health one?
    pub fn is_format_error(&self) -> bool {
        matches!(self, DefineError::Format(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_error_display() {
        let err = AllocError::MetaspaceExhausted {
            requested: 12,
            available: 4,
            kind: MetadataType::Segment,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("4 available"));
    }

    #[test]
    fn test_define_error_classification() {
        let format: DefineError = FormatError::CircularDependency { index: 3 }.into();
        assert!(format.is_format_error());
        let alloc: DefineError = AllocError::HeapExhausted { limit: 1 }.into();
        assert!(!alloc.is_format_error());
    }

    #[test]
    fn test_segment_error_wraps_alloc() {
        let err: SegmentError = AllocError::HeapExhausted { limit: 8 }.into();
        assert!(matches!(err, SegmentError::Alloc(AllocError::HeapExhausted { limit: 8 })));
        assert!(err.to_string().contains("limit 8"));
    }
}
