//! Metadata pointer traversal.
//!
//! Archive dumping and class unloading need to see every metadata-to-metadata
//! edge. Descriptors and instances report theirs to a [`MetaspaceClosure`];
//! reference arrays are heap objects and are reached through the heap graph
//! instead.
//!
//! Each field is reported exactly once per visit, empty ones included, so a
//! closure can tell an absent link from a missed one.

use std::fmt;

use tracing::trace;

use crate::arena::{ClassId, SegmentId, ShapeId};
use crate::class::ClassMetadata;
use crate::segment::SegmentInstance;
use crate::shape::ShapeDescriptor;

/// A metadata object that can be the source or target of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataRef {
    /// Declaring class (its constant pool).
    Class(ClassId),
    /// Shape descriptor.
    Shape(ShapeId),
    /// Segment instance.
    Segment(SegmentId),
}

impl fmt::Display for MetadataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataRef::Class(id) => write!(f, "{id}"),
            MetadataRef::Shape(id) => write!(f, "shape {id}"),
            MetadataRef::Segment(id) => write!(f, "{id}"),
        }
    }
}

/// Pointer fields reported during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerField {
    /// Descriptor to its declaring class's pool.
    Pool,
    /// Descriptor to the first instance in its list.
    SegmentListHead,
    /// Descriptor to its blank prototype.
    Prototype,
    /// Instance to its descriptor.
    Info,
    /// Instance to the next instance in the list.
    SegmentListNext,
    /// Instance to its class segment.
    ClassSegment,
}

/// Receives metadata edges.
pub trait MetaspaceClosure {
    /// Called once per pointer field; `target` is `None` for an empty field.
    fn push(&mut self, owner: MetadataRef, field: PointerField, target: Option<MetadataRef>);
}

impl<F> MetaspaceClosure for F
where
    F: FnMut(MetadataRef, PointerField, Option<MetadataRef>),
{
    fn push(&mut self, owner: MetadataRef, field: PointerField, target: Option<MetadataRef>) {
        self(owner, field, target)
    }
}

/// Report a descriptor's pointer fields.
pub fn shape_pointers_do(shape: &ShapeDescriptor, closure: &mut dyn MetaspaceClosure) {
    let owner = MetadataRef::Shape(shape.id());
    closure.push(owner, PointerField::Pool, Some(MetadataRef::Class(shape.class())));
    closure.push(owner, PointerField::SegmentListHead, shape.head().map(MetadataRef::Segment));
    closure.push(owner, PointerField::Prototype, Some(MetadataRef::Segment(shape.prototype())));
}

/// Report an instance's pointer fields.
pub fn segment_pointers_do(segment: &SegmentInstance, closure: &mut dyn MetaspaceClosure) {
    let owner = MetadataRef::Segment(segment.id());
    closure.push(owner, PointerField::Info, Some(MetadataRef::Shape(segment.shape())));
    closure.push(owner, PointerField::SegmentListNext, segment.next().map(MetadataRef::Segment));
    closure.push(owner, PointerField::ClassSegment, segment.cseg().map(MetadataRef::Segment));
}

/// Counts from one [`walk_class`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Descriptors visited.
    pub shapes: usize,
    /// Instances visited, prototypes included.
    pub segments: usize,
    /// Fields reported.
    pub fields: usize,
}

/// Visit every descriptor and every arena-resident instance of `class`.
pub fn walk_class(class: &ClassMetadata, closure: &mut dyn MetaspaceClosure) -> WalkStats {
    let mut stats = WalkStats::default();
    let mut counting = |owner: MetadataRef, field: PointerField, target: Option<MetadataRef>| {
        stats.fields += 1;
        closure.push(owner, field, target);
    };

    for shape in class.shapes() {
        trace!(shape = %shape.id(), kind = %shape.kind(), "iter shape");
        shape_pointers_do(shape, &mut counting);
        stats.shapes += 1;
    }
    for segment in class.arena().segments() {
        trace!(segment = %segment.id(), prototype = segment.is_prototype(), "iter segment");
        segment_pointers_do(&segment, &mut counting);
        stats.segments += 1;
    }
    stats
}
