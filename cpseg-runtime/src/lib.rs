//! # Constant-Pool Segment Runtime
//!
//! Metadata for generic specialization in a managed-language VM. When a
//! class is loaded, its constant pool is partitioned into *segments*: one
//! per generic parameter, holding every constant derived from it. Each
//! segment gets a shape descriptor with a fixed layout; each distinct
//! binding of the parameter gets an instance with its own reference array.
//!
//! The runtime provides:
//!
//! - **Segment assignment**: cycle-checked coloring of pool entries
//! - **Shape descriptors**: layout planning and per-shape instance lists
//! - **Instances**: specialized or prototype-sharing bindings, with rollback
//! - **Reference arrays**: fixed slots plus first-write-wins derived slots
//! - **Traversal**: pointer-field enumeration for archiving and unloading
//! - **Handles**: the reflective binding API
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      CPSEG RUNTIME                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Resolver   │─▶│    Layout    │─▶│    Shapes    │          │
//! │  │(resolver.rs) │  │ (layout.rs)  │  │  (shape.rs)  │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │                                             │                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Handles    │─▶│  Instances   │◀─│    Arena     │          │
//! │  │ (handle.rs)  │  │ (segment.rs) │  │  (arena.rs)  │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                                                       │
//! │  ┌──────────────┐  ┌──────────────┐                             │
//! │  │  Ref arrays  │  │     Heap     │                             │
//! │  │  (refs.rs)   │  │  (heap.rs)   │                             │
//! │  └──────────────┘  └──────────────┘                             │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cpseg_runtime::{ClassMetadata, ConstantPoolSkeleton, ConstantTag, ManagedHeap, ParameterKind, SegmentConfig};
//!
//! let mut pool = ConstantPoolSkeleton::new();
//! let t = pool.push_parameter(ParameterKind::ClassOnly, None);
//! pool.push_derived(ConstantTag::Linkage, t);
//!
//! let heap = Arc::new(ManagedHeap::new(0));
//! let class = ClassMetadata::define("Box", &pool, Arc::clone(&heap), &SegmentConfig::default())?;
//! let shape = class.shape_for_constant(t).unwrap();
//! let seg = shape.new_class_segment(heap.allocate_value("String")?)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arena;
pub mod class;
pub mod config;
pub mod constant;
pub mod error;
pub mod handle;
pub mod heap;
pub mod layout;
pub mod log;
pub mod refs;
pub mod resolver;
pub mod segment;
pub mod shape;
pub mod traverse;

// Re-exports
pub use arena::{ClassId, MetadataArena, MetadataType, SegmentId, ShapeId};
pub use class::ClassMetadata;
pub use config::{ConfigError, LogLevel, ParentPolicy, SegmentConfig, SegmentConfigBuilder, SpecializationMode};
pub use constant::{ConstantEntryRef, ConstantPoolSkeleton, ConstantTag, CpIndex, EntryLink, ParameterKind};
pub use error::{AllocError, DefineError, SegmentError};
pub use handle::SegmentHandle;
pub use heap::{ManagedHeap, ObjRef, OopHandle, StaleReferenceError};
pub use layout::{LayoutError, LayoutPlan};
pub use refs::{RefArray, RefSlotError};
pub use resolver::{FormatError, SegmentAssignment, SegmentNumber, SegmentResolver};
pub use segment::SegmentInstance;
pub use shape::ShapeDescriptor;
pub use traverse::{walk_class, MetadataRef, MetaspaceClosure, PointerField};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global runtime configuration.
static SEGMENT_CONFIG: std::sync::OnceLock<SegmentConfig> = std::sync::OnceLock::new();

/// Install the global configuration and its logging.
///
/// The configuration is validated first. Fails if a configuration was
/// already installed.
///
/// # Example
///
/// ```rust,ignore
/// use cpseg_runtime::{init_with_config, SegmentConfig};
///
/// let config = SegmentConfig::builder()
///     .metaspace_words_per_class(64 * 1024)
///     .build()?;
/// init_with_config(config)?;
/// ```
pub fn init_with_config(config: SegmentConfig) -> Result<&'static SegmentConfig, ConfigError> {
    config.validate()?;
    SEGMENT_CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    let config = SEGMENT_CONFIG.get().ok_or(ConfigError::AlreadyInitialized)?;
    log::init(&config.log);
    Ok(config)
}

/// Initialize the runtime from environment variables.
///
/// Reads configuration from `CPSEG_*` environment variables.
/// See `SegmentConfig::from_env()` for the full list of supported variables.
pub fn init_from_env() -> Result<&'static SegmentConfig, ConfigError> {
    init_with_config(SegmentConfig::from_env())
}

/// The installed configuration, or the defaults if none was installed.
pub fn config() -> SegmentConfig {
    SEGMENT_CONFIG.get().cloned().unwrap_or_default()
}

/// The installed configuration.
///
/// Returns `None` if the runtime was not initialized with `init_with_config`
/// or `init_from_env`.
pub fn installed_config() -> Option<&'static SegmentConfig> {
    SEGMENT_CONFIG.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_config_once() {
        let wanted = SegmentConfig::builder().max_heap_objects(1000).build().unwrap();
        let installed = init_with_config(wanted).unwrap();
        assert_eq!(installed.memory.max_heap_objects, 1000);
        assert_eq!(installed_config().map(|c| c.memory.max_heap_objects), Some(1000));
        assert_eq!(config().memory.max_heap_objects, 1000);

        assert_eq!(
            init_with_config(SegmentConfig::default()).unwrap_err(),
            ConfigError::AlreadyInitialized
        );
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let bad = SegmentConfig::builder().metaspace_words_per_class(1).build_unchecked();
        assert!(matches!(init_with_config(bad), Err(ConfigError::InvalidValue { .. })));
    }
}
