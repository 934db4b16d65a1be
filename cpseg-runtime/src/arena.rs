//! Class-metadata arena.
//!
//! Every declaring class gets one arena. Shape descriptors and segment
//! instances are charged against its word budget, and instances are stored
//! in it and addressed by [`SegmentId`]. Nothing is ever removed before the
//! class itself goes away, so ids stay valid for the arena's lifetime.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AllocError;
use crate::resolver::SegmentNumber;
use crate::segment::SegmentInstance;

/// Identifier of a declaring class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Get the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

static NEXT_CLASS_ID: AtomicU32 = AtomicU32::new(1);

/// Generate a new unique class ID.
pub fn next_class_id() -> ClassId {
    ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
}

/// Identifies one shape descriptor: a (declaring class, segment number) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId {
    class: ClassId,
    segnum: SegmentNumber,
}

impl ShapeId {
    /// Create a shape id.
    pub const fn new(class: ClassId, segnum: SegmentNumber) -> Self {
        Self { class, segnum }
    }

    /// Declaring class.
    pub const fn class(self) -> ClassId {
        self.class
    }

    /// Segment number within the class.
    pub const fn segnum(self) -> SegmentNumber {
        self.segnum
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.segnum)
    }
}

/// Identifies one arena-resident segment instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId {
    class: ClassId,
    slot: u32,
}

impl SegmentId {
    /// Declaring class whose arena holds the instance.
    pub const fn class(self) -> ClassId {
        self.class
    }

    /// Position in the arena.
    pub const fn slot(self) -> u32 {
        self.slot
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:seg#{}", self.class, self.slot)
    }
}

/// Metadata type tag for arena allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    /// A shape descriptor and its layout table.
    SegmentInfo,
    /// A segment instance block.
    Segment,
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetadataType::SegmentInfo => "SegmentInfo",
            MetadataType::Segment => "Segment",
        })
    }
}

/// A successful budget reservation.
///
/// Consumed by [`MetadataArena::insert_segment`]; a descriptor block is simply
/// kept as accounting.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct MetadataBlock {
    words: usize,
    kind: MetadataType,
}

impl MetadataBlock {
    /// Reserved size in words.
    pub fn words(&self) -> usize {
        self.words
    }

    /// What the block was reserved for.
    pub fn kind(&self) -> MetadataType {
        self.kind
    }
}

/// Per-class metadata arena.
pub struct MetadataArena {
    class: ClassId,
    /// Word budget; 0 means unlimited.
    max_words: usize,
    used_words: AtomicUsize,
    segments: RwLock<Vec<Arc<SegmentInstance>>>,
    closed: AtomicBool,
}

impl MetadataArena {
    /// Create an arena for `class` with a word budget (0 = unlimited).
    pub fn new(class: ClassId, max_words: usize) -> Self {
        Self {
            class,
            max_words,
            used_words: AtomicUsize::new(0),
            segments: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Owning class.
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Words reserved so far.
    pub fn used_words(&self) -> usize {
        self.used_words.load(Ordering::Acquire)
    }

    /// Word budget (0 = unlimited).
    pub fn max_words(&self) -> usize {
        self.max_words
    }

    /// Reserve `words` words of metadata.
    pub fn allocate(&self, words: usize, kind: MetadataType) -> Result<MetadataBlock, AllocError> {
        if self.is_closed() {
            return Err(AllocError::ArenaClosed { class: self.class });
        }

        let mut used = self.used_words.load(Ordering::Acquire);
        loop {
            let next = used.saturating_add(words);
            if self.max_words != 0 && next > self.max_words {
                return Err(AllocError::MetaspaceExhausted {
                    requested: words,
                    available: self.max_words - used,
                    kind,
                });
            }
            match self
                .used_words
                .compare_exchange_weak(used, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(MetadataBlock { words, kind }),
                Err(current) => used = current,
            }
        }
    }

    /// Store a new instance in a reserved block.
    ///
    /// `build` receives the id the instance will have.
    pub fn insert_segment(
        &self,
        block: MetadataBlock,
        build: impl FnOnce(SegmentId) -> SegmentInstance,
    ) -> Arc<SegmentInstance> {
        debug_assert_eq!(block.kind, MetadataType::Segment);
        let mut segments = self.segments.write();
        let id = SegmentId {
            class: self.class,
            slot: segments.len() as u32,
        };
        let instance = Arc::new(build(id));
        debug_assert_eq!(instance.size_in_words(), block.words);
        segments.push(Arc::clone(&instance));
        instance
    }

    /// Look up an instance.
    pub fn segment(&self, id: SegmentId) -> Option<Arc<SegmentInstance>> {
        if id.class != self.class {
            return None;
        }
        self.segments.read().get(id.slot as usize).cloned()
    }

    /// Snapshot of every stored instance, prototypes included.
    pub fn segments(&self) -> Vec<Arc<SegmentInstance>> {
        self.segments.read().clone()
    }

    /// Number of stored instances.
    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Check if the arena is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the arena for new allocations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for MetadataArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataArena")
            .field("class", &self.class)
            .field("used_words", &self.used_words())
            .field("max_words", &self.max_words)
            .field("segments", &self.segment_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
