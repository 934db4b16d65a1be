//! # Segment Handles
//!
//! The reflective face of a segment binding. A handle pairs a shape with
//! one parameter binding and, when specialized, with the instance block
//! created for it. Unspecialized handles share the shape's prototype block
//! and own only their reference array.
//!
//! Every handle is itself a heap object: slot 1 of its reference array
//! points back at it. The Rust value keeps that object rooted while it
//! lives; after it is dropped the object stays reachable only through the
//! reference array.
//!
//! ```text
//!        prototype handle (per shape, no refs)
//!               │ make_segment(binding, parent)
//!      ┌────────┴─────────┐
//!      ▼                  ▼
//!  specialized        unspecialized
//!  own instance       prototype block
//!  refs rooted by     refs rooted by
//!  the instance       the handle
//! ```

use std::fmt;
use std::sync::Arc;

use crate::arena::SegmentId;
use crate::class::ClassMetadata;
use crate::config::SpecializationMode;
use crate::constant::{CpIndex, ParameterKind};
use crate::error::SegmentError;
use crate::heap::{HandleBody, HeapObject, ObjRef, OopHandle};
use crate::refs::{RefArray, CLASS_REFS_REF_INDEX, HANDLE_REF_INDEX};
use crate::resolver::SegmentNumber;
use crate::shape::ShapeDescriptor;

/// Per-shape information shared by a prototype and every handle made from it.
struct HandleInfo {
    class: Arc<ClassMetadata>,
    segnum: SegmentNumber,
    kind: ParameterKind,
    parameter_index: CpIndex,
    class_shape: Option<SegmentNumber>,
}

impl HandleInfo {
    fn shape(&self) -> Result<&ShapeDescriptor, SegmentError> {
        self.class.require_shape(self.segnum)
    }
}

/// A reflective segment handle.
pub struct SegmentHandle {
    info: Arc<HandleInfo>,
    refs: Option<ObjRef>,
    segment: SegmentId,
    oop: ObjRef,
    root: OopHandle,
    owned_refs_root: Option<OopHandle>,
    parent: Option<Arc<SegmentHandle>>,
}

impl SegmentHandle {
    /// The blank prototype handle of segment `segnum`.
    ///
    /// A method-and-class shape needs the prototype of its class shape.
    pub fn initial_prototype(
        class: &Arc<ClassMetadata>,
        segnum: SegmentNumber,
        parent_prototype: Option<&Arc<SegmentHandle>>,
    ) -> Result<Arc<Self>, SegmentError> {
        let shape = class.require_shape(segnum)?;
        let class_shape = match (shape.kind(), parent_prototype) {
            (ParameterKind::MethodAndClass, None) => return Err(SegmentError::MissingParent),
            (ParameterKind::MethodAndClass, Some(p)) => {
                let expected = shape
                    .class_shape()
                    .ok_or(SegmentError::Internal("method-and-class shape without a class shape"))?;
                if !Arc::ptr_eq(&p.info.class, class) {
                    return Err(SegmentError::ForeignParent {
                        expected: class.id(),
                        parent: p.segment,
                    });
                }
                if p.info.segnum != expected {
                    return Err(SegmentError::NotAClassSegment {
                        expected,
                        parent: p.segment,
                    });
                }
                Some(expected)
            }
            (kind, Some(_)) => return Err(SegmentError::UnexpectedParent { kind }),
            (_, None) => None,
        };

        let info = Arc::new(HandleInfo {
            class: Arc::clone(class),
            segnum,
            kind: shape.kind(),
            parameter_index: shape.parameter_index(),
            class_shape,
        });
        let (oop, root) = class.heap().allocate_rooted(HeapObject::Handle(HandleBody {
            shape: shape.id(),
            refs: None,
        }))?;
        Ok(Arc::new(Self {
            info,
            refs: None,
            segment: shape.prototype(),
            oop,
            root,
            owned_refs_root: None,
            parent: None,
        }))
    }

    /// Bind `prototype`'s shape to `binding`.
    ///
    /// `specialized` selects between a fresh instance block and sharing the
    /// prototype block. `parent` is the class segment handle, required for
    /// method-and-class shapes and rejected otherwise.
    pub fn make_segment(
        prototype: &Arc<SegmentHandle>,
        specialized: bool,
        binding: ObjRef,
        parent: Option<&Arc<SegmentHandle>>,
    ) -> Result<Arc<Self>, SegmentError> {
        prototype.check_parent(parent)?;
        let class = &prototype.info.class;
        let heap = class.heap();
        let shape = prototype.info.shape()?;
        let parent_refs = parent.and_then(|p| p.refs);

        if !specialized {
            let refs = shape.new_unspecialized_refs(binding, parent_refs)?;
            let (oop, root) = match heap.allocate_rooted(HeapObject::Handle(HandleBody {
                shape: shape.id(),
                refs: Some(refs.array),
            })) {
                Ok(allocated) => allocated,
                Err(err) => {
                    heap.release_handle(refs.handle);
                    return Err(err.into());
                }
            };
            let handle = Arc::new(Self {
                info: Arc::clone(&prototype.info),
                refs: Some(refs.array),
                segment: shape.prototype(),
                oop,
                root,
                owned_refs_root: Some(refs.handle),
                parent: parent.cloned(),
            });
            let array = handle.refs_array().ok_or(SegmentError::Internal("reference array missing"))?;
            init_handle_refs(&array, oop, parent_refs)?;
            return Ok(handle);
        }

        let parent_instance = match parent {
            Some(p) => Some(class.segment(p.segment).ok_or(SegmentError::Internal("parent segment missing"))?),
            None => None,
        };
        let prepared = shape.prepare_segment(binding, parent_instance.as_deref())?;
        let refs = prepared.refs();
        // The instance is linked only once slot 1 names its handle.
        let (oop, root) = heap.allocate_rooted(HeapObject::Handle(HandleBody {
            shape: shape.id(),
            refs: Some(refs.array),
        }))?;
        let linked = match init_handle_refs(prepared.array(), oop, parent_refs) {
            Ok(()) => prepared.link(),
            Err(err) => Err(err),
        };
        let instance = match linked {
            Ok(instance) => instance,
            Err(err) => {
                heap.release_handle(root);
                return Err(err);
            }
        };

        Ok(Arc::new(Self {
            info: Arc::clone(&prototype.info),
            refs: Some(refs.array),
            segment: instance.id(),
            oop,
            root,
            owned_refs_root: None,
            parent: parent.cloned(),
        }))
    }

    /// Bind using the class's default specialization mode.
    pub fn bind(
        prototype: &Arc<SegmentHandle>,
        binding: ObjRef,
        parent: Option<&Arc<SegmentHandle>>,
    ) -> Result<Arc<Self>, SegmentError> {
        let specialized = prototype.info.class.specialization().default_mode == SpecializationMode::Specialized;
        Self::make_segment(prototype, specialized, binding, parent)
    }

    fn check_parent(&self, parent: Option<&Arc<SegmentHandle>>) -> Result<(), SegmentError> {
        let parent = match (self.has_parent(), parent) {
            (true, None) => return Err(SegmentError::MissingParent),
            (false, Some(_)) => return Err(SegmentError::UnexpectedParent { kind: self.parameter_kind() }),
            (false, None) => return Ok(()),
            (true, Some(p)) => p,
        };
        if !Arc::ptr_eq(&parent.info.class, &self.info.class) {
            return Err(SegmentError::ForeignParent {
                expected: self.info.class.id(),
                parent: parent.segment,
            });
        }
        let expected = self
            .info
            .class_shape
            .ok_or(SegmentError::Internal("method-and-class handle without a class shape"))?;
        if parent.info.segnum != expected || parent.refs.is_none() {
            return Err(SegmentError::NotAClassSegment {
                expected,
                parent: parent.segment,
            });
        }
        Ok(())
    }

    fn has_parent(&self) -> bool {
        self.parameter_kind().has_both()
    }

    fn is_class(&self) -> bool {
        self.parameter_kind() == ParameterKind::ClassOnly
    }

    /// The declaring class.
    pub fn declaring_class(&self) -> &Arc<ClassMetadata> {
        &self.info.class
    }

    /// Segment number within the declaring class.
    pub fn segnum(&self) -> SegmentNumber {
        self.info.segnum
    }

    /// Pool index of the parameter entry.
    pub fn parameter_index(&self) -> CpIndex {
        self.info.parameter_index
    }

    /// Parameter kind.
    pub fn parameter_kind(&self) -> ParameterKind {
        self.info.kind
    }

    /// The bound parameter value; `None` for a prototype.
    pub fn parameter_binding(&self) -> Option<ObjRef> {
        self.refs_array().and_then(|a| a.argument())
    }

    /// The class segment this handle belongs to: itself for a class segment,
    /// its parent for a method-and-class segment.
    pub fn class_segment(self: &Arc<Self>) -> Option<Arc<SegmentHandle>> {
        if self.refs.is_none() {
            None
        } else if self.is_class() {
            Some(Arc::clone(self))
        } else {
            self.parent.clone()
        }
    }

    /// Does this handle own an instance block?
    pub fn is_specialized(&self) -> bool {
        self.info
            .class
            .segment(self.segment)
            .is_some_and(|s| s.is_specialized())
    }

    /// Is this a bound handle made from `prototype`?
    pub fn is_valid_for(&self, prototype: &SegmentHandle) -> bool {
        Arc::ptr_eq(&self.info.class, &prototype.info.class)
            && self.info.segnum == prototype.info.segnum
            && self.refs.is_some()
    }

    /// Is this a blank prototype handle?
    pub fn is_prototype(&self) -> bool {
        self.refs.is_none()
    }

    /// Instance block backing this handle.
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    /// The handle's own heap object.
    pub fn oop(&self) -> ObjRef {
        self.oop
    }

    /// The reference-array object.
    pub fn refs(&self) -> Option<ObjRef> {
        self.refs
    }

    /// The reference array.
    pub fn refs_array(&self) -> Option<Arc<RefArray>> {
        self.refs.and_then(|r| self.info.class.heap().ref_array(r))
    }
}

/// Point slot 1 at the handle and fill slot 2 from an unspecialized parent.
fn init_handle_refs(array: &RefArray, oop: ObjRef, parent_refs: Option<ObjRef>) -> Result<(), SegmentError> {
    array.init_fixed(HANDLE_REF_INDEX, oop)?;
    if let (None, Some(class_refs)) = (array.class_refs(), parent_refs) {
        // The class segment was unspecialized when this instance was made.
        array.init_fixed(CLASS_REFS_REF_INDEX, class_refs)?;
    }
    Ok(())
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        let heap = self.info.class.heap();
        heap.release_handle(self.root);
        if let Some(root) = self.owned_refs_root {
            heap.release_handle(root);
        }
    }
}

impl fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("class", &self.info.class.id())
            .field("segnum", &self.info.segnum)
            .field("segment", &self.segment)
            .field("refs", &self.refs)
            .field("oop", &self.oop)
            .finish()
    }
}
