//! # Shape Descriptors
//!
//! One descriptor per (declaring class, segment number). It fixes the
//! layout every instance of the segment shares and owns the list of live
//! instances.
//!
//! ## Instance creation
//!
//! ```text
//! binding ──▶ ref array (heap) ──▶ root handle ──▶ instance block (arena) ──▶ list head
//!                   ▲                                   │
//!                   └──── released if this step fails ◀─┘
//! ```
//!
//! The reference array is allocated and rooted in one heap step, so a
//! concurrent collection never sees it unrooted. Linking is deferred: a
//! `PreparedSegment` holds the rooted array until the block is reserved
//! and prepended. If anything fails first the root is released again, so
//! the array becomes garbage and no half-built instance is ever linked.
//!
//! Instances are prepended under the descriptor's list lock; readers walk
//! from a snapshot of the head and always see a fully linked list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::arena::{ClassId, MetadataArena, MetadataType, SegmentId, ShapeId};
use crate::config::ParentPolicy;
use crate::constant::{CpIndex, ParameterKind};
use crate::error::{DefineError, SegmentError};
use crate::heap::{ManagedHeap, ObjRef};
use crate::layout::LayoutPlan;
use crate::refs::{RefArray, ARGUMENT_REF_INDEX, CLASS_REFS_REF_INDEX};
use crate::resolver::{SegmentNumber, SegmentPlan};
use crate::segment::{SegmentInstance, SegmentRefs};

/// Layout and instance list of one segment shape.
pub struct ShapeDescriptor {
    id: ShapeId,
    parameter_index: CpIndex,
    class_shape: Option<SegmentNumber>,
    class_refs_len: Option<usize>,
    layout: LayoutPlan,
    prototype: SegmentId,
    head: Mutex<Option<SegmentId>>,
    created: AtomicU64,
    arena: Arc<MetadataArena>,
    heap: Arc<ManagedHeap>,
    parent_policy: ParentPolicy,
}

impl ShapeDescriptor {
    /// Build the descriptor for one resolved segment.
    ///
    /// Reserves the descriptor block and a blank prototype instance from
    /// the class arena. `enclosing` is the class shape of a method-and-class
    /// plan.
    pub fn build(
        plan: &SegmentPlan,
        enclosing: Option<&ShapeDescriptor>,
        arena: &Arc<MetadataArena>,
        heap: &Arc<ManagedHeap>,
        parent_policy: ParentPolicy,
    ) -> Result<Self, DefineError> {
        let layout = LayoutPlan::compute(&plan.members, plan.kind)?;
        let id = ShapeId::new(arena.class(), plan.number);

        let _info = arena.allocate(layout.info_size_in_words(), MetadataType::SegmentInfo)?;
        let block = arena.allocate(layout.segment_size_in_words(), MetadataType::Segment)?;
        let prototype = arena.insert_segment(block, |sid| {
            SegmentInstance::prototype(sid, id, plan.kind, layout.payload_words())
        });

        debug!(shape = %id, layout = %layout, "shape descriptor created");

        Ok(Self {
            id,
            parameter_index: plan.parameter_index,
            class_shape: plan.class_segment,
            class_refs_len: enclosing.map(|shape| shape.ref_len()),
            layout,
            prototype: prototype.id(),
            head: Mutex::new(None),
            created: AtomicU64::new(0),
            arena: Arc::clone(arena),
            heap: Arc::clone(heap),
            parent_policy,
        })
    }

    /// Shape id.
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Declaring class.
    pub fn class(&self) -> ClassId {
        self.id.class()
    }

    /// Segment number.
    pub fn segnum(&self) -> SegmentNumber {
        self.id.segnum()
    }

    /// Pool index of the parameter entry.
    pub fn parameter_index(&self) -> CpIndex {
        self.parameter_index
    }

    /// Parameter kind.
    pub fn kind(&self) -> ParameterKind {
        self.layout.kind()
    }

    /// Enclosing class shape, for method-and-class segments.
    pub fn class_shape(&self) -> Option<SegmentNumber> {
        self.class_shape
    }

    /// Layout shared by all instances.
    pub fn layout(&self) -> &LayoutPlan {
        &self.layout
    }

    /// Reference-array length.
    pub fn ref_len(&self) -> usize {
        self.layout.ref_len()
    }

    /// Descriptor size in words.
    pub fn size_in_words(&self) -> usize {
        self.layout.info_size_in_words()
    }

    /// The blank prototype instance.
    pub fn prototype(&self) -> SegmentId {
        self.prototype
    }

    /// Current list head.
    pub fn head(&self) -> Option<SegmentId> {
        *self.head.lock()
    }

    /// Parent rule applied by [`new_method_segment`](Self::new_method_segment).
    pub fn parent_policy(&self) -> ParentPolicy {
        self.parent_policy
    }

    /// Create a specialized class segment for `binding`.
    pub fn new_class_segment(&self, binding: ObjRef) -> Result<Arc<SegmentInstance>, SegmentError> {
        if self.kind() != ParameterKind::ClassOnly {
            return Err(SegmentError::KindMismatch {
                operation: "new_class_segment",
                kind: self.kind(),
            });
        }
        self.prepare_segment(binding, None)?.link()
    }

    /// Create a specialized method segment for `binding`.
    ///
    /// A method-and-class segment needs the class segment it is nested in;
    /// a method-only segment takes none.
    pub fn new_method_segment(
        &self,
        binding: ObjRef,
        class_segment: Option<&SegmentInstance>,
    ) -> Result<Arc<SegmentInstance>, SegmentError> {
        if self.kind() == ParameterKind::ClassOnly {
            return Err(SegmentError::KindMismatch {
                operation: "new_method_segment",
                kind: self.kind(),
            });
        }
        self.prepare_segment(binding, class_segment)?.link()
    }

    /// Check `parent` and build the rooted reference array of a new instance.
    ///
    /// Nothing is linked until [`PreparedSegment::link`] succeeds; dropping
    /// the result releases the array's root.
    pub(crate) fn prepare_segment(
        &self,
        binding: ObjRef,
        parent: Option<&SegmentInstance>,
    ) -> Result<PreparedSegment<'_>, SegmentError> {
        match (self.kind(), parent) {
            (ParameterKind::MethodAndClass, None) => return Err(SegmentError::MissingParent),
            (ParameterKind::MethodAndClass, Some(parent)) => self.check_parent(parent)?,
            (kind, Some(_)) => return Err(SegmentError::UnexpectedParent { kind }),
            (_, None) => {}
        }

        self.heap.validate(binding)?;
        let prototype = self
            .arena
            .segment(self.prototype)
            .ok_or(SegmentError::Internal("shape prototype missing from arena"))?;

        let (refs, array) = self.new_refs(binding, parent.and_then(|p| p.refs()).map(|r| r.array))?;
        Ok(PreparedSegment {
            shape: self,
            prototype,
            cseg: parent.map(|p| p.id()),
            refs,
            array,
            linked: false,
        })
    }

    fn check_parent(&self, parent: &SegmentInstance) -> Result<(), SegmentError> {
        let expected = self
            .class_shape
            .ok_or(SegmentError::Internal("method-and-class shape without a class shape"))?;

        if parent.shape().class() != self.class() {
            return Err(SegmentError::ForeignParent {
                expected: self.class(),
                parent: parent.id(),
            });
        }
        if parent.shape().segnum() != expected || parent.param_kind() != ParameterKind::ClassOnly {
            return Err(SegmentError::NotAClassSegment {
                expected,
                parent: parent.id(),
            });
        }
        if !parent.is_specialized() && self.parent_policy == ParentPolicy::RequireSpecialized {
            return Err(SegmentError::ParentNotSpecialized { parent: parent.id() });
        }
        Ok(())
    }

    /// Build a rooted reference array for an unspecialized binding.
    ///
    /// No instance block is created; the binding shares the prototype. The
    /// caller owns the returned root and must release it.
    ///
    /// `parent_refs` must be the reference array of a class segment of the
    /// enclosing class shape.
    pub fn new_unspecialized_refs(
        &self,
        binding: ObjRef,
        parent_refs: Option<ObjRef>,
    ) -> Result<SegmentRefs, SegmentError> {
        match (self.kind(), parent_refs) {
            (ParameterKind::MethodAndClass, None) => return Err(SegmentError::MissingParent),
            (ParameterKind::MethodAndClass, Some(class_refs)) => self.check_class_refs(class_refs)?,
            (kind, Some(_)) => return Err(SegmentError::UnexpectedParent { kind }),
            (_, None) => {}
        }
        self.heap.validate(binding)?;
        let (refs, _) = self.new_refs(binding, parent_refs)?;
        Ok(refs)
    }

    /// A class segment's array refers to itself from slot 2 and has the
    /// enclosing shape's length.
    fn check_class_refs(&self, class_refs: ObjRef) -> Result<(), SegmentError> {
        let expected_len = self
            .class_refs_len
            .ok_or(SegmentError::Internal("method-and-class shape without a class shape"))?;
        match self.heap.ref_array(class_refs) {
            Some(array) if array.len() == expected_len && array.class_refs() == Some(class_refs) => Ok(()),
            _ => Err(SegmentError::BadClassRefs { refs: class_refs }),
        }
    }

    fn new_refs(
        &self,
        binding: ObjRef,
        parent_refs: Option<ObjRef>,
    ) -> Result<(SegmentRefs, Arc<RefArray>), SegmentError> {
        let (array_obj, handle, array) = self.heap.allocate_ref_array_rooted(self.layout.ref_len())?;
        let refs = SegmentRefs { handle, array: array_obj };
        let class_refs = match self.kind() {
            ParameterKind::ClassOnly => Some(array_obj),
            _ => parent_refs,
        };
        let filled = array.init_fixed(ARGUMENT_REF_INDEX, binding).and_then(|()| match class_refs {
            Some(class_refs) => array.init_fixed(CLASS_REFS_REF_INDEX, class_refs),
            None => Ok(()),
        });
        if let Err(err) = filled {
            self.heap.release_handle(handle);
            return Err(err.into());
        }
        Ok((refs, array))
    }

    /// Iterate over live instances, newest first.
    pub fn instances(&self) -> Instances<'_> {
        Instances {
            arena: &self.arena,
            next: self.head(),
        }
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.instances().count()
    }

    /// Instances created through this descriptor.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Is `instance` a specialized instance of this shape?
    pub fn is_valid_instance(&self, instance: &SegmentInstance) -> bool {
        instance.shape() == self.id && instance.is_specialized() && !instance.is_prototype()
    }
}

impl std::fmt::Debug for ShapeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeDescriptor")
            .field("id", &self.id)
            .field("parameter_index", &self.parameter_index)
            .field("kind", &self.kind())
            .field("class_shape", &self.class_shape)
            .field("ref_len", &self.ref_len())
            .field("prototype", &self.prototype)
            .field("head", &self.head())
            .finish()
    }
}

/// Iterator over a descriptor's instance list.
pub struct Instances<'a> {
    arena: &'a MetadataArena,
    next: Option<SegmentId>,
}

impl Iterator for Instances<'_> {
    type Item = Arc<SegmentInstance>;

    fn next(&mut self) -> Option<Self::Item> {
        let instance = self.arena.segment(self.next?)?;
        self.next = instance.next();
        Some(instance)
    }
}

/// A rooted reference array waiting for its instance block.
pub(crate) struct PreparedSegment<'a> {
    shape: &'a ShapeDescriptor,
    prototype: Arc<SegmentInstance>,
    cseg: Option<SegmentId>,
    refs: SegmentRefs,
    array: Arc<RefArray>,
    linked: bool,
}

impl PreparedSegment<'_> {
    /// The reference array and its root.
    pub(crate) fn refs(&self) -> SegmentRefs {
        self.refs
    }

    /// The reference array.
    pub(crate) fn array(&self) -> &Arc<RefArray> {
        &self.array
    }

    /// Reserve the instance block and prepend it to the shape's list.
    ///
    /// On failure the array's root is released and the list is untouched.
    pub(crate) fn link(mut self) -> Result<Arc<SegmentInstance>, SegmentError> {
        let shape = self.shape;
        let block = shape
            .arena
            .allocate(shape.layout.segment_size_in_words(), MetadataType::Segment)
            .map_err(|err| {
                warn!(shape = %shape.id, error = %err, "segment allocation failed, reference array released");
                err
            })?;

        let instance = {
            let mut head = shape.head.lock();
            let instance = shape.arena.insert_segment(block, |id| {
                SegmentInstance::from_prototype(&self.prototype, id, self.cseg, self.refs, *head)
            });
            *head = Some(instance.id());
            instance
        };
        self.linked = true;
        shape.created.fetch_add(1, Ordering::Relaxed);

        debug!(shape = %shape.id, segment = %instance.id(), "segment instance created");
        Ok(instance)
    }
}

impl Drop for PreparedSegment<'_> {
    fn drop(&mut self) {
        if !self.linked {
            self.shape.heap.release_handle(self.refs.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::next_class_id;
    use crate::constant::{ConstantEntryRef, ConstantTag};
    use crate::error::AllocError;
    use crate::refs::HANDLE_REF_INDEX;

    struct Fixture {
        arena: Arc<MetadataArena>,
        heap: Arc<ManagedHeap>,
    }

    impl Fixture {
        fn new(max_words: usize) -> Self {
            Self {
                arena: Arc::new(MetadataArena::new(next_class_id(), max_words)),
                heap: Arc::new(ManagedHeap::new(0)),
            }
        }

        fn shape(&self, number: u32, kind: ParameterKind, enclosing: Option<&ShapeDescriptor>) -> ShapeDescriptor {
            self.shape_with(number, kind, enclosing, ParentPolicy::RequireSpecialized)
        }

        fn shape_with(
            &self,
            number: u32,
            kind: ParameterKind,
            enclosing: Option<&ShapeDescriptor>,
            policy: ParentPolicy,
        ) -> ShapeDescriptor {
            let base = (number * 10) as CpIndex;
            let plan = SegmentPlan {
                number: SegmentNumber::new(number).unwrap(),
                parameter_index: base,
                kind,
                class_segment: enclosing.map(|shape| shape.segnum()),
                members: vec![
                    ConstantEntryRef::new(base, ConstantTag::Parameter),
                    ConstantEntryRef::new(base + 1, ConstantTag::Linkage),
                ],
            };
            ShapeDescriptor::build(&plan, enclosing, &self.arena, &self.heap, policy).unwrap()
        }
    }

    #[test]
    fn test_class_segment_fixed_slots() {
        let fx = Fixture::new(0);
        let shape = fx.shape(1, ParameterKind::ClassOnly, None);
        let binding = fx.heap.allocate_value("String").unwrap();

        let seg = shape.new_class_segment(binding).unwrap();
        assert!(seg.is_class());
        assert!(shape.is_valid_instance(&seg));
        assert_eq!(shape.head(), Some(seg.id()));

        let refs = seg.refs().unwrap();
        let array = fx.heap.ref_array(refs.array).unwrap();
        assert_eq!(array.len(), shape.ref_len());
        assert_eq!(array.argument(), Some(binding));
        assert_eq!(array.class_refs(), Some(refs.array));
        assert_eq!(array.get(HANDLE_REF_INDEX), None);
    }

    #[test]
    fn test_kind_checks() {
        let fx = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let method = fx.shape(2, ParameterKind::MethodOnly, None);
        let binding = fx.heap.allocate_value("T").unwrap();

        assert!(matches!(
            class.new_method_segment(binding, None),
            Err(SegmentError::KindMismatch { .. })
        ));
        assert!(matches!(method.new_class_segment(binding), Err(SegmentError::KindMismatch { .. })));

        let cseg = class.new_class_segment(binding).unwrap();
        assert_eq!(
            method.new_method_segment(binding, Some(&cseg)).unwrap_err(),
            SegmentError::UnexpectedParent { kind: ParameterKind::MethodOnly }
        );
        let mseg = method.new_method_segment(binding, None).unwrap();
        assert_eq!(mseg.cseg(), None);
    }

    #[test]
    fn test_method_and_class_parent_rules() {
        let fx = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let nested = fx.shape(2, ParameterKind::MethodAndClass, Some(&class));
        let binding = fx.heap.allocate_value("T").unwrap();

        assert_eq!(nested.new_method_segment(binding, None).unwrap_err(), SegmentError::MissingParent);

        let proto = fx.arena.segment(class.prototype()).unwrap();
        assert_eq!(
            nested.new_method_segment(binding, Some(&proto)).unwrap_err(),
            SegmentError::ParentNotSpecialized { parent: proto.id() }
        );

        let cseg = class.new_class_segment(binding).unwrap();
        let mseg = nested.new_method_segment(binding, Some(&cseg)).unwrap();
        assert_eq!(mseg.cseg(), Some(cseg.id()));
        let array = fx.heap.ref_array(mseg.refs().unwrap().array).unwrap();
        assert_eq!(array.class_refs(), Some(cseg.refs().unwrap().array));

        // A nested segment is not a class segment.
        assert!(matches!(
            nested.new_method_segment(binding, Some(&mseg)),
            Err(SegmentError::NotAClassSegment { .. })
        ));
    }

    #[test]
    fn test_foreign_parent_rejected() {
        let fx = Fixture::new(0);
        let other = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let nested = fx.shape(2, ParameterKind::MethodAndClass, Some(&class));
        let foreign_class = other.shape(1, ParameterKind::ClassOnly, None);
        let binding = fx.heap.allocate_value("T").unwrap();
        let foreign_binding = other.heap.allocate_value("T").unwrap();
        let foreign = foreign_class.new_class_segment(foreign_binding).unwrap();

        assert_eq!(
            nested.new_method_segment(binding, Some(&foreign)).unwrap_err(),
            SegmentError::ForeignParent { expected: fx.arena.class(), parent: foreign.id() }
        );
    }

    #[test]
    fn test_allow_unspecialized_parent() {
        let fx = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let nested = fx.shape_with(2, ParameterKind::MethodAndClass, Some(&class), ParentPolicy::AllowUnspecialized);
        let binding = fx.heap.allocate_value("T").unwrap();

        let proto = fx.arena.segment(class.prototype()).unwrap();
        let mseg = nested.new_method_segment(binding, Some(&proto)).unwrap();
        assert_eq!(mseg.cseg(), Some(proto.id()));
        let array = fx.heap.ref_array(mseg.refs().unwrap().array).unwrap();
        assert_eq!(array.class_refs(), None);
    }

    #[test]
    fn test_stale_binding_rejected() {
        let fx = Fixture::new(0);
        let shape = fx.shape(1, ParameterKind::ClassOnly, None);
        let binding = fx.heap.allocate_value("gone").unwrap();
        fx.heap.collect(&[]);
        assert!(matches!(shape.new_class_segment(binding), Err(SegmentError::StaleBinding(_))));
        assert_eq!(shape.instance_count(), 0);
    }

    #[test]
    fn test_rollback_when_arena_exhausted() {
        let fx = Fixture::new(0);
        fx.shape(1, ParameterKind::ClassOnly, None);
        let needed = fx.arena.used_words();

        // Room for exactly one descriptor and its prototype.
        let tight = Fixture::new(needed);
        let shape = tight.shape(1, ParameterKind::ClassOnly, None);
        let binding = tight.heap.allocate_value("T").unwrap();
        let handles_before = tight.heap.handle_count();

        let err = shape.new_class_segment(binding).unwrap_err();
        assert!(matches!(err, SegmentError::Alloc(AllocError::MetaspaceExhausted { .. })));
        assert_eq!(tight.heap.handle_count(), handles_before);
        assert_eq!(shape.instance_count(), 0);
        assert_eq!(shape.head(), None);

        // Only the binding survives; the orphaned array is reclaimed.
        assert_eq!(tight.heap.collect(&[binding]), 1);
        assert!(tight.heap.is_live(binding));
    }

    #[test]
    fn test_list_is_newest_first() {
        let fx = Fixture::new(0);
        let shape = fx.shape(1, ParameterKind::ClassOnly, None);
        let ids: Vec<SegmentId> = (0..4)
            .map(|i| {
                let binding = fx.heap.allocate_value(&format!("T{i}")).unwrap();
                shape.new_class_segment(binding).unwrap().id()
            })
            .collect();

        let listed: Vec<SegmentId> = shape.instances().map(|s| s.id()).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(listed, expected);
        assert_eq!(shape.instance_count(), 4);
        assert_eq!(shape.created_count(), 4);
    }

    #[test]
    fn test_unspecialized_refs() {
        let fx = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let nested = fx.shape(2, ParameterKind::MethodAndClass, Some(&class));
        let binding = fx.heap.allocate_value("T").unwrap();

        let class_refs = class.new_unspecialized_refs(binding, None).unwrap();
        let array = fx.heap.ref_array(class_refs.array).unwrap();
        assert_eq!(array.argument(), Some(binding));
        assert_eq!(array.class_refs(), Some(class_refs.array));

        assert_eq!(nested.new_unspecialized_refs(binding, None).unwrap_err(), SegmentError::MissingParent);
        let nested_refs = nested.new_unspecialized_refs(binding, Some(class_refs.array)).unwrap();
        let array = fx.heap.ref_array(nested_refs.array).unwrap();
        assert_eq!(array.class_refs(), Some(class_refs.array));

        assert_eq!(class.instance_count(), 0);
        assert_eq!(fx.heap.release_handle(class_refs.handle), Some(class_refs.array));
    }

    #[test]
    fn test_prepared_segment_released_unless_linked() {
        let fx = Fixture::new(0);
        let shape = fx.shape(1, ParameterKind::ClassOnly, None);
        let binding = fx.heap.allocate_value("T").unwrap();

        let prepared = shape.prepare_segment(binding, None).unwrap();
        let refs = prepared.refs();
        assert_eq!(prepared.array().argument(), Some(binding));
        assert_eq!(fx.heap.handle_count(), 1);
        drop(prepared);

        assert_eq!(fx.heap.handle_count(), 0);
        assert_eq!(shape.instance_count(), 0);
        assert_eq!(fx.heap.collect(&[binding]), 1);
        assert!(!fx.heap.is_live(refs.array));

        let seg = shape.prepare_segment(binding, None).unwrap().link().unwrap();
        assert_eq!(fx.heap.resolve_handle(seg.refs().unwrap().handle), Some(seg.refs().unwrap().array));
        assert_eq!(shape.head(), Some(seg.id()));
    }

    #[test]
    fn test_prepare_checks_parent_before_allocating() {
        let fx = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let nested = fx.shape(2, ParameterKind::MethodAndClass, Some(&class));
        let binding = fx.heap.allocate_value("T").unwrap();
        let cseg = class.new_class_segment(binding).unwrap();
        let live = fx.heap.live_objects();

        assert!(matches!(
            class.prepare_segment(binding, Some(&cseg)),
            Err(SegmentError::UnexpectedParent { kind: ParameterKind::ClassOnly })
        ));
        assert!(matches!(nested.prepare_segment(binding, None), Err(SegmentError::MissingParent)));
        assert_eq!(fx.heap.live_objects(), live);
    }

    #[test]
    fn test_unspecialized_refs_validate_parent_array() {
        let fx = Fixture::new(0);
        let class = fx.shape(1, ParameterKind::ClassOnly, None);
        let nested = fx.shape(2, ParameterKind::MethodAndClass, Some(&class));
        let method = fx.shape(3, ParameterKind::MethodOnly, None);
        let binding = fx.heap.allocate_value("T").unwrap();
        let handles = fx.heap.handle_count();

        // A plain object is not a reference array.
        assert_eq!(
            nested.new_unspecialized_refs(binding, Some(binding)).unwrap_err(),
            SegmentError::BadClassRefs { refs: binding }
        );

        // A method segment's array does not refer to itself.
        let method_refs = method.new_unspecialized_refs(binding, None).unwrap();
        assert_eq!(
            nested.new_unspecialized_refs(binding, Some(method_refs.array)).unwrap_err(),
            SegmentError::BadClassRefs { refs: method_refs.array }
        );

        // Self-referencing, but not of the enclosing shape's length.
        let (odd, odd_array) = fx.heap.allocate_ref_array(class.ref_len() + 1).unwrap();
        odd_array.init_fixed(CLASS_REFS_REF_INDEX, odd).unwrap();
        assert_eq!(
            nested.new_unspecialized_refs(binding, Some(odd)).unwrap_err(),
            SegmentError::BadClassRefs { refs: odd }
        );

        // A class segment takes no parent.
        let class_refs = class.new_unspecialized_refs(binding, None).unwrap();
        assert_eq!(
            class.new_unspecialized_refs(binding, Some(class_refs.array)).unwrap_err(),
            SegmentError::UnexpectedParent { kind: ParameterKind::ClassOnly }
        );
        assert_eq!(fx.heap.handle_count(), handles + 2);

        // A collected class array is rejected too.
        fx.heap.release_handle(class_refs.handle);
        fx.heap.collect(&[binding]);
        assert_eq!(
            nested.new_unspecialized_refs(binding, Some(class_refs.array)).unwrap_err(),
            SegmentError::BadClassRefs { refs: class_refs.array }
        );
    }
}
