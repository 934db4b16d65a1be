//! Declaring-class metadata.
//!
//! Defining a class segments its constant pool and builds one shape
//! descriptor per segment in a fresh metadata arena. The result is
//! immutable apart from the descriptors' instance lists.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::arena::{next_class_id, ClassId, MetadataArena, SegmentId};
use crate::config::{SegmentConfig, SpecializationConfig};
use crate::constant::{ConstantPoolSkeleton, CpIndex};
use crate::error::{DefineError, SegmentError};
use crate::heap::ManagedHeap;
use crate::resolver::{SegmentAssignment, SegmentNumber, SegmentResolver};
use crate::segment::SegmentInstance;
use crate::shape::ShapeDescriptor;

/// Segment metadata of one declaring class.
pub struct ClassMetadata {
    id: ClassId,
    name: String,
    pool_length: usize,
    assignment: SegmentAssignment,
    shapes: Vec<ShapeDescriptor>,
    arena: Arc<MetadataArena>,
    heap: Arc<ManagedHeap>,
    specialization: SpecializationConfig,
}

impl ClassMetadata {
    /// Segment `pool` and build the class's shape descriptors.
    pub fn define(
        name: impl Into<String>,
        pool: &ConstantPoolSkeleton,
        heap: Arc<ManagedHeap>,
        config: &SegmentConfig,
    ) -> Result<Arc<Self>, DefineError> {
        let name = name.into();
        let assignment = SegmentResolver::resolve(pool)?;

        let id = next_class_id();
        let arena = Arc::new(MetadataArena::new(id, config.memory.metaspace_words_per_class));
        let policy = config.specialization.parent_policy;
        let mut shapes: Vec<ShapeDescriptor> = Vec::with_capacity(assignment.segments.len());
        for plan in &assignment.segments {
            // A class parameter always resolves before the segments nested in it.
            let enclosing = plan.class_segment.and_then(|n| shapes.get(n.as_index()));
            let shape = ShapeDescriptor::build(plan, enclosing, &arena, &heap, policy)?;
            shapes.push(shape);
        }

        debug!(
            class = %id,
            name = %name,
            segments = shapes.len(),
            metaspace_words = arena.used_words(),
            "class segments defined"
        );

        Ok(Arc::new(Self {
            id,
            name,
            pool_length: pool.len(),
            assignment,
            shapes,
            arena,
            heap,
            specialization: config.specialization.clone(),
        }))
    }

    /// Class id.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constant-pool length, including the reserved slot.
    pub fn pool_length(&self) -> usize {
        self.pool_length
    }

    /// Segment assignment of the pool.
    pub fn assignment(&self) -> &SegmentAssignment {
        &self.assignment
    }

    /// All descriptors, by segment number.
    pub fn shapes(&self) -> &[ShapeDescriptor] {
        &self.shapes
    }

    /// Descriptor of segment `number`.
    pub fn shape(&self, number: SegmentNumber) -> Option<&ShapeDescriptor> {
        self.shapes.get(number.as_index())
    }

    /// Descriptor of segment `number`, or an error naming it.
    pub fn require_shape(&self, number: SegmentNumber) -> Result<&ShapeDescriptor, SegmentError> {
        self.shape(number)
            .ok_or(SegmentError::UnknownSegment { class: self.id, number })
    }

    /// Descriptor of the segment containing the constant at `index`.
    pub fn shape_for_constant(&self, index: CpIndex) -> Option<&ShapeDescriptor> {
        self.assignment.map.get(index).and_then(|n| self.shape(n))
    }

    /// Look up an instance of any of this class's shapes.
    pub fn segment(&self, id: SegmentId) -> Option<Arc<SegmentInstance>> {
        self.arena.segment(id)
    }

    /// The class arena.
    pub fn arena(&self) -> &MetadataArena {
        &self.arena
    }

    /// The heap bindings live in.
    pub fn heap(&self) -> &Arc<ManagedHeap> {
        &self.heap
    }

    /// Specialization settings in force for this class.
    pub fn specialization(&self) -> &SpecializationConfig {
        &self.specialization
    }

    /// Release every instance's reference-array root and close the arena.
    ///
    /// Returns the number of roots released. Arrays become collectible once
    /// no handle refers to them any more.
    pub fn unload(&self) -> usize {
        self.arena.close();
        let released = self
            .arena
            .segments()
            .iter()
            .filter_map(|s| s.refs())
            .filter(|refs| self.heap.release_handle(refs.handle).is_some())
            .count();
        debug!(class = %self.id, released, "class segments unloaded");
        released
    }
}

impl fmt::Debug for ClassMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMetadata")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pool_length", &self.pool_length)
            .field("shapes", &self.shapes)
            .field("arena", &self.arena)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{ConstantTag, ParameterKind};
    use crate::error::AllocError;
    use crate::resolver::FormatError;

    fn generic_pool() -> (ConstantPoolSkeleton, CpIndex, CpIndex) {
        let mut pool = ConstantPoolSkeleton::new();
        let param = pool.push_parameter(ParameterKind::ClassOnly, None);
        let link = pool.push_derived(ConstantTag::Linkage, param);
        pool.push_plain(ConstantTag::Utf8);
        (pool, param, link)
    }

    #[test]
    fn test_define_builds_descriptors() {
        let (pool, param, link) = generic_pool();
        let heap = Arc::new(ManagedHeap::new(0));
        let class = ClassMetadata::define("Box", &pool, heap, &SegmentConfig::default()).unwrap();

        assert_eq!(class.name(), "Box");
        assert_eq!(class.shapes().len(), 1);
        let shape = class.shape(SegmentNumber::FIRST).unwrap();
        assert_eq!(shape.parameter_index(), param);
        assert_eq!(shape.class(), class.id());
        assert_eq!(class.shape_for_constant(link).map(|s| s.id()), Some(shape.id()));
        assert!(class.shape_for_constant(3).is_none());
        assert!(class.segment(shape.prototype()).unwrap().is_prototype());
    }

    #[test]
    fn test_define_rejects_cycles() {
        let mut pool = ConstantPoolSkeleton::new();
        let a = pool.push_derived(ConstantTag::Linkage, 2);
        pool.push_derived(ConstantTag::Dynamic, a);
        let heap = Arc::new(ManagedHeap::new(0));
        let err = ClassMetadata::define("Loop", &pool, heap, &SegmentConfig::default()).unwrap_err();
        assert!(err.is_format_error());
        assert!(matches!(err, DefineError::Format(FormatError::CircularDependency { .. })));
    }

    #[test]
    fn test_define_reports_metaspace_exhaustion() {
        let (pool, _, _) = generic_pool();
        let heap = Arc::new(ManagedHeap::new(0));
        let config = SegmentConfig::builder().metaspace_words_per_class(12).build().unwrap();
        let err = ClassMetadata::define("Tiny", &pool, heap, &config).unwrap_err();
        assert!(matches!(err, DefineError::Alloc(AllocError::MetaspaceExhausted { .. })));
    }

    #[test]
    fn test_unknown_segment() {
        let (pool, _, _) = generic_pool();
        let heap = Arc::new(ManagedHeap::new(0));
        let class = ClassMetadata::define("Box", &pool, heap, &SegmentConfig::default()).unwrap();
        let two = SegmentNumber::new(2).unwrap();
        assert_eq!(
            class.require_shape(two).unwrap_err(),
            SegmentError::UnknownSegment { class: class.id(), number: two }
        );
    }

    #[test]
    fn test_unload_releases_roots() {
        let (pool, _, _) = generic_pool();
        let heap = Arc::new(ManagedHeap::new(0));
        let class = ClassMetadata::define("Box", &pool, Arc::clone(&heap), &SegmentConfig::default()).unwrap();
        let shape = class.shape(SegmentNumber::FIRST).unwrap();
        for i in 0..3 {
            let binding = heap.allocate_value(&format!("T{i}")).unwrap();
            shape.new_class_segment(binding).unwrap();
        }
        assert_eq!(heap.handle_count(), 3);

        assert_eq!(class.unload(), 3);
        assert_eq!(heap.handle_count(), 0);
        assert_eq!(heap.collect(&[]), 6);

        let binding = heap.allocate_value("late").unwrap();
        assert!(matches!(
            shape.new_class_segment(binding),
            Err(SegmentError::Alloc(AllocError::ArenaClosed { .. }))
        ));
    }
}
