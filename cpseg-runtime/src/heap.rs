//! # Managed Heap
//!
//! The object heap that reference arrays, parameter bindings and segment
//! handles live in.
//!
//! ## Design
//!
//! Objects live in a slot table and are named by generational references
//! ([`ObjRef`]): a slot index plus the generation the slot had when the
//! object was allocated. Freeing a slot bumps its generation, so a reference
//! that outlives its object is detected instead of silently aliasing the next
//! occupant (the ABA problem).
//!
//! Metadata never holds a raw [`ObjRef`] across a collection on its own.
//! It registers an [`OopHandle`] instead; registered handles are roots for
//! [`ManagedHeap::collect`] until released. Leaking a handle leaks the whole
//! object graph behind it, which is exactly what the rollback paths in
//! segment creation guard against.
//!
//! ## Technical References
//!
//! - [Generational References](https://floooh.github.io/2018/06/17/handles-vs-pointers.html)
//! - [slotmap](https://crates.io/crates/slotmap)

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::arena::ShapeId;
use crate::config::MemoryConfig;
use crate::error::AllocError;
use crate::refs::RefArray;

/// Generation counter for detecting stale references.
pub type Generation = u32;

/// Reserved generation values.
pub mod generation {
    use super::Generation;

    /// Never-allocated slot.
    pub const UNINITIALIZED: Generation = 0;
    /// First valid generation.
    pub const FIRST: Generation = 1;
    /// Saturation point; a slot that reaches it is retired.
    pub const OVERFLOW_GUARD: Generation = u32::MAX - 1;
}

/// Error when accessing a stale reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleReferenceError {
    /// Expected generation.
    pub expected: Generation,
    /// Actual generation.
    pub actual: Generation,
}

impl fmt::Display for StaleReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stale reference: expected generation {}, found {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for StaleReferenceError {}

// ============================================================================
// References
// ============================================================================

/// A generational reference to a heap object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    index: u32,
    generation: Generation,
}

impl ObjRef {
    /// Create a reference from its parts.
    pub const fn new(index: u32, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation at allocation time.
    pub const fn generation(self) -> Generation {
        self.generation
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}@{}", self.index, self.generation)
    }
}

/// A registered root that keeps a heap object alive from metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OopHandle(u64);

impl OopHandle {
    /// Raw handle id.
    pub const fn id(self) -> u64 {
        self.0
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Heap-side body of a reflective segment handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleBody {
    /// Shape the handle binds.
    pub shape: ShapeId,
    /// The handle's reference array; `None` for a blank prototype handle.
    pub refs: Option<ObjRef>,
}

/// A heap object.
#[derive(Debug, Clone)]
pub enum HeapObject {
    /// Opaque value, such as a type mirror used as a parameter binding.
    Value(Arc<str>),
    /// Boxed reference array.
    RefArray(Arc<RefArray>),
    /// Reflective segment handle.
    Handle(HandleBody),
}

impl HeapObject {
    /// Call `f` for every outgoing reference.
    pub fn for_each_ref(&self, mut f: impl FnMut(ObjRef)) {
        match self {
            HeapObject::Value(_) => {}
            HeapObject::RefArray(array) => {
                for (_, r) in array.iter() {
                    f(r);
                }
            }
            HeapObject::Handle(body) => {
                if let Some(r) = body.refs {
                    f(r);
                }
            }
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Value(_) => "value",
            HeapObject::RefArray(_) => "ref-array",
            HeapObject::Handle(_) => "handle",
        }
    }
}

struct HeapSlot {
    generation: Generation,
    object: Option<HeapObject>,
}

impl HeapSlot {
    fn free(&mut self) {
        self.object = None;
        // Increment generation for next allocation (prevents ABA problem)
        if self.generation < generation::OVERFLOW_GUARD {
            self.generation += 1;
        }
    }
}

#[derive(Default)]
struct HeapInner {
    slots: Vec<HeapSlot>,
    free: Vec<u32>,
    live: usize,
}

/// Heap allocation and collection statistics.
#[derive(Debug, Default)]
pub struct HeapStats {
    /// Objects allocated.
    pub allocations: AtomicU64,
    /// Allocation requests refused.
    pub failed_allocations: AtomicU64,
    /// Full collections run.
    pub collections: AtomicU64,
    /// Objects reclaimed by collections.
    pub reclaimed: AtomicU64,
}

// ============================================================================
// Heap
// ============================================================================

/// A managed heap with a bounded object count.
pub struct ManagedHeap {
    inner: RwLock<HeapInner>,
    handles: Mutex<HashMap<OopHandle, ObjRef>>,
    next_handle: AtomicU64,
    /// Object limit; 0 means unlimited.
    max_objects: usize,
    stats: HeapStats,
}

impl ManagedHeap {
    /// Create a heap holding at most `max_objects` objects (0 = unlimited).
    pub fn new(max_objects: usize) -> Self {
        Self {
            inner: RwLock::new(HeapInner::default()),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            max_objects,
            stats: HeapStats::default(),
        }
    }

    /// Create a heap sized by the memory configuration.
    pub fn with_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_heap_objects)
    }

    /// Allocate an object.
    ///
    /// The object is unrooted: a concurrent [`collect`](Self::collect) may
    /// free it before the caller stores it anywhere reachable. Use
    /// [`allocate_rooted`](Self::allocate_rooted) for objects that must
    /// survive until they are linked.
    pub fn allocate(&self, object: HeapObject) -> Result<ObjRef, AllocError> {
        let mut inner = self.inner.write();
        self.allocate_locked(&mut inner, object)
    }

    /// Allocate an object and register it as a root in one step.
    ///
    /// The root is in place before the object table is unlocked, so no
    /// collection can observe the object unrooted.
    pub fn allocate_rooted(&self, object: HeapObject) -> Result<(ObjRef, OopHandle), AllocError> {
        let mut inner = self.inner.write();
        let obj = self.allocate_locked(&mut inner, object)?;
        Ok((obj, self.register_handle(obj)))
    }

    fn allocate_locked(&self, inner: &mut HeapInner, object: HeapObject) -> Result<ObjRef, AllocError> {
        if self.max_objects != 0 && inner.live >= self.max_objects {
            self.stats.failed_allocations.fetch_add(1, Ordering::Relaxed);
            return Err(AllocError::HeapExhausted { limit: self.max_objects });
        }

        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(HeapSlot {
                    generation: generation::FIRST,
                    object: None,
                });
                index
            }
        };
        let slot = &mut inner.slots[index as usize];
        slot.object = Some(object);
        let obj = ObjRef::new(index, slot.generation);
        inner.live += 1;
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(obj)
    }

    /// Allocate an opaque value object.
    pub fn allocate_value(&self, label: &str) -> Result<ObjRef, AllocError> {
        self.allocate(HeapObject::Value(Arc::from(label)))
    }

    /// Allocate a reference array of `len` empty slots.
    pub fn allocate_ref_array(&self, len: usize) -> Result<(ObjRef, Arc<RefArray>), AllocError> {
        let array = Arc::new(RefArray::new(len));
        let obj = self.allocate(HeapObject::RefArray(Arc::clone(&array)))?;
        Ok((obj, array))
    }

    /// Allocate a reference array that is rooted from the start.
    pub fn allocate_ref_array_rooted(&self, len: usize) -> Result<(ObjRef, OopHandle, Arc<RefArray>), AllocError> {
        let array = Arc::new(RefArray::new(len));
        let (obj, root) = self.allocate_rooted(HeapObject::RefArray(Arc::clone(&array)))?;
        Ok((obj, root, array))
    }

    /// Look up an object.
    pub fn get(&self, obj: ObjRef) -> Result<HeapObject, StaleReferenceError> {
        let inner = self.inner.read();
        match inner.slots.get(obj.index as usize) {
            Some(slot) if slot.generation == obj.generation => {
                slot.object.clone().ok_or(StaleReferenceError {
                    expected: obj.generation,
                    actual: slot.generation,
                })
            }
            Some(slot) => Err(StaleReferenceError {
                expected: obj.generation,
                actual: slot.generation,
            }),
            None => Err(StaleReferenceError {
                expected: obj.generation,
                actual: generation::UNINITIALIZED,
            }),
        }
    }

    /// Check that a reference still names a live object.
    pub fn validate(&self, obj: ObjRef) -> Result<(), StaleReferenceError> {
        self.get(obj).map(|_| ())
    }

    /// Is `obj` live?
    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.validate(obj).is_ok()
    }

    /// Look up a reference array.
    pub fn ref_array(&self, obj: ObjRef) -> Option<Arc<RefArray>> {
        match self.get(obj) {
            Ok(HeapObject::RefArray(array)) => Some(array),
            _ => None,
        }
    }

    /// Look up a handle body.
    pub fn handle_body(&self, obj: ObjRef) -> Option<HandleBody> {
        match self.get(obj) {
            Ok(HeapObject::Handle(body)) => Some(body),
            _ => None,
        }
    }

    /// Register `obj` as a root held from metadata.
    ///
    /// Lock order is object table, then handle table.
    pub fn register_handle(&self, obj: ObjRef) -> OopHandle {
        let handle = OopHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.lock().insert(handle, obj);
        handle
    }

    /// Release a root. Returns the object it held, if it was registered.
    pub fn release_handle(&self, handle: OopHandle) -> Option<ObjRef> {
        self.handles.lock().remove(&handle)
    }

    /// The object a registered handle holds.
    pub fn resolve_handle(&self, handle: OopHandle) -> Option<ObjRef> {
        self.handles.lock().get(&handle).copied()
    }

    /// Number of registered handles.
    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.inner.read().live
    }

    /// Configured object limit (0 = unlimited).
    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    /// Allocation and collection statistics.
    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// Run a full stop-the-world collection.
    ///
    /// Everything reachable from a registered handle or from `roots` survives;
    /// everything else is freed. Returns the number of objects reclaimed.
    pub fn collect(&self, roots: &[ObjRef]) -> usize {
        let mut inner = self.inner.write();
        // Snapshot roots only once allocation is excluded, so every rooted
        // allocation is either fully visible or not yet made.
        let handle_roots: Vec<ObjRef> = self.handles.lock().values().copied().collect();

        let mut marked = vec![false; inner.slots.len()];
        let mut worklist: Vec<ObjRef> = handle_roots;
        worklist.extend_from_slice(roots);

        while let Some(obj) = worklist.pop() {
            let index = obj.index as usize;
            let Some(slot) = inner.slots.get(index) else {
                continue;
            };
            if slot.generation != obj.generation || marked[index] {
                continue;
            }
            if let Some(object) = &slot.object {
                marked[index] = true;
                object.for_each_ref(|r| worklist.push(r));
            }
        }

        let mut reclaimed = 0;
        let inner = &mut *inner;
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            if slot.object.is_some() && !marked[index] {
                slot.free();
                if slot.generation < generation::OVERFLOW_GUARD {
                    inner.free.push(index as u32);
                }
                reclaimed += 1;
            }
        }
        inner.live -= reclaimed;

        self.stats.collections.fetch_add(1, Ordering::Relaxed);
        self.stats.reclaimed.fetch_add(reclaimed as u64, Ordering::Relaxed);
        tracing::trace!(reclaimed, live = inner.live, "heap collection finished");
        reclaimed
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for ManagedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHeap")
            .field("live", &self.live_objects())
            .field("handles", &self.handle_count())
            .field("max_objects", &self.max_objects)
            .finish()
    }
}
