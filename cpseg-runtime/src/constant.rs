//! # Constant-Pool Vocabulary
//!
//! Entry tags, packed index/tag references and the constant-pool skeleton
//! the class loader hands to the segment resolver.
//!
//! The skeleton is deliberately thin: it records, per index, only the entry
//! kind plus whatever edge the parser extracted for segmentation purposes
//! (a dependency on another entry, or a parameter declaration). Everything
//! else about a constant is the business of ordinary resolution.
//!
//! ## Packed References
//!
//! A [`ConstantEntryRef`] packs as `(index << 8) | tag`, matching the layout
//! table rows stored in a shape descriptor. Ordering is *not* the numeric
//! order of the packed value:
//!
//! - the parameter-definition entry always sorts first;
//! - linkage, dynamic, invoke-dynamic and method-handle entries share one
//!   ordering bucket, so their relative pool-index order is preserved;
//! - every other tag orders by tag, then index.

use std::cmp::Ordering;
use std::fmt;

/// A constant-pool index. Index 0 is never a valid entry.
pub type CpIndex = u16;

/// Constant-pool entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConstantTag {
    /// Unused slot (index 0, or the upper half of a long/double).
    Invalid = 0,
    /// Modified UTF-8 string.
    Utf8 = 1,
    /// 32-bit integer.
    Integer = 3,
    /// 32-bit float.
    Float = 4,
    /// 64-bit integer (occupies two slots).
    Long = 5,
    /// 64-bit float (occupies two slots).
    Double = 6,
    /// Class reference.
    Class = 7,
    /// String literal.
    String = 8,
    /// Field reference.
    Fieldref = 9,
    /// Method reference.
    Methodref = 10,
    /// Interface method reference.
    InterfaceMethodref = 11,
    /// Name and type descriptor.
    NameAndType = 12,
    /// Method handle.
    MethodHandle = 15,
    /// Method type.
    MethodType = 16,
    /// Dynamically computed constant.
    Dynamic = 17,
    /// Invoke-dynamic call site.
    InvokeDynamic = 18,
    /// Module.
    Module = 19,
    /// Package.
    Package = 20,
    /// Generic parameter definition.
    Parameter = 21,
    /// Parametric linkage (call-site binding against a parameter).
    Linkage = 22,
}

impl ConstantTag {
    /// Decode a raw tag byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => ConstantTag::Invalid,
            1 => ConstantTag::Utf8,
            3 => ConstantTag::Integer,
            4 => ConstantTag::Float,
            5 => ConstantTag::Long,
            6 => ConstantTag::Double,
            7 => ConstantTag::Class,
            8 => ConstantTag::String,
            9 => ConstantTag::Fieldref,
            10 => ConstantTag::Methodref,
            11 => ConstantTag::InterfaceMethodref,
            12 => ConstantTag::NameAndType,
            15 => ConstantTag::MethodHandle,
            16 => ConstantTag::MethodType,
            17 => ConstantTag::Dynamic,
            18 => ConstantTag::InvokeDynamic,
            19 => ConstantTag::Module,
            20 => ConstantTag::Package,
            21 => ConstantTag::Parameter,
            22 => ConstantTag::Linkage,
            _ => return None,
        })
    }

    /// The raw tag byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable tag name.
    pub const fn name(self) -> &'static str {
        match self {
            ConstantTag::Invalid => "Invalid",
            ConstantTag::Utf8 => "Utf8",
            ConstantTag::Integer => "Integer",
            ConstantTag::Float => "Float",
            ConstantTag::Long => "Long",
            ConstantTag::Double => "Double",
            ConstantTag::Class => "Class",
            ConstantTag::String => "String",
            ConstantTag::Fieldref => "Fieldref",
            ConstantTag::Methodref => "Methodref",
            ConstantTag::InterfaceMethodref => "InterfaceMethodref",
            ConstantTag::NameAndType => "NameAndType",
            ConstantTag::MethodHandle => "MethodHandle",
            ConstantTag::MethodType => "MethodType",
            ConstantTag::Dynamic => "Dynamic",
            ConstantTag::InvokeDynamic => "InvokeDynamic",
            ConstantTag::Module => "Module",
            ConstantTag::Package => "Package",
            ConstantTag::Parameter => "Parameter",
            ConstantTag::Linkage => "Linkage",
        }
    }

    /// Is this the parameter-definition kind?
    pub const fn is_parameter(self) -> bool {
        matches!(self, ConstantTag::Parameter)
    }

    /// Linkage-like kinds: each reserves an in-place word and a reference slot
    /// when it joins a segment.
    pub const fn is_linkage_kind(self) -> bool {
        matches!(
            self,
            ConstantTag::Linkage
                | ConstantTag::Dynamic
                | ConstantTag::InvokeDynamic
                | ConstantTag::MethodHandle
        )
    }

    /// Can an entry of this kind be a member of a segment?
    pub const fn is_segmentable(self) -> bool {
        self.is_parameter() || self.is_linkage_kind()
    }

    /// Does this kind occupy two pool slots?
    pub const fn is_double_width(self) -> bool {
        matches!(self, ConstantTag::Long | ConstantTag::Double)
    }

    fn order_bucket(self) -> u8 {
        if self.is_parameter() {
            0
        } else if self.is_linkage_kind() {
            ConstantTag::Linkage.as_u8()
        } else {
            self.as_u8()
        }
    }
}

impl fmt::Display for ConstantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which generic parameter a segment is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Class-level parameter (`Box<T>`).
    ClassOnly,
    /// Method-level parameter of a method that sees no class parameter.
    MethodOnly,
    /// Method-level parameter nested inside a class segment.
    MethodAndClass,
}

impl ParameterKind {
    /// Segments of this kind are tied to a class segment.
    pub const fn has_class(self) -> bool {
        !matches!(self, ParameterKind::MethodOnly)
    }

    /// Segments of this kind are keyed on a method parameter.
    pub const fn has_method(self) -> bool {
        !matches!(self, ParameterKind::ClassOnly)
    }

    /// Method segment nested in a class segment.
    pub const fn has_both(self) -> bool {
        matches!(self, ParameterKind::MethodAndClass)
    }

    /// Name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            ParameterKind::ClassOnly => "class",
            ParameterKind::MethodOnly => "method",
            ParameterKind::MethodAndClass => "method+class",
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Packed index/tag
// ============================================================================

/// A constant-pool index together with its tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantEntryRef {
    index: CpIndex,
    tag: ConstantTag,
}

impl ConstantEntryRef {
    /// Bits reserved for the tag in the packed form.
    pub const INDEX_SHIFT: u32 = 8;
    /// Mask selecting the tag from the packed form.
    pub const TAG_MASK: u32 = (1 << Self::INDEX_SHIFT) - 1;
    /// Largest index the packed form can carry (the sign bit stays clear).
    pub const MAX_INDEX: u32 = u32::MAX >> (Self::INDEX_SHIFT + 1);

    /// Create a reference to the entry at `index`.
    pub const fn new(index: CpIndex, tag: ConstantTag) -> Self {
        Self { index, tag }
    }

    /// Decode a packed `(index << 8) | tag` value.
    pub fn from_packed(bits: u32) -> Option<Self> {
        let tag = ConstantTag::from_u8((bits & Self::TAG_MASK) as u8)?;
        let index = bits >> Self::INDEX_SHIFT;
        if index > Self::MAX_INDEX {
            return None;
        }
        let index = CpIndex::try_from(index).ok()?;
        Some(Self { index, tag })
    }

    /// The packed `(index << 8) | tag` form.
    pub const fn packed(self) -> u32 {
        ((self.index as u32) << Self::INDEX_SHIFT) | self.tag as u32
    }

    /// Pool index.
    pub const fn index(self) -> CpIndex {
        self.index
    }

    /// Entry kind.
    pub const fn tag(self) -> ConstantTag {
        self.tag
    }

    fn sort_key(self) -> (u8, CpIndex) {
        (self.tag.order_bucket(), self.index)
    }
}

impl Ord for ConstantEntryRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.tag.as_u8().cmp(&other.tag.as_u8()))
    }
}

impl PartialOrd for ConstantEntryRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ConstantEntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.tag)
    }
}

// ============================================================================
// Pool skeleton
// ============================================================================

/// The segmentation-relevant edge of one pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLink {
    /// The entry names no parameter and derives from none.
    Independent,
    /// The entry derives from the constant at this index.
    DependsOn(CpIndex),
    /// The entry defines a generic parameter.
    Parameter {
        /// Which parameter the segment is keyed on.
        kind: ParameterKind,
        /// For [`ParameterKind::MethodAndClass`], the enclosing class parameter.
        class_parameter: Option<CpIndex>,
    },
}

/// One constant-pool entry as seen by the segment resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEntry {
    /// Entry kind.
    pub tag: ConstantTag,
    /// Segmentation edge.
    pub link: EntryLink,
}

impl PoolEntry {
    /// An entry that takes no part in segmentation.
    pub const fn plain(tag: ConstantTag) -> Self {
        Self { tag, link: EntryLink::Independent }
    }

    /// Packed reference to this entry at `index`.
    pub const fn at(&self, index: CpIndex) -> ConstantEntryRef {
        ConstantEntryRef::new(index, self.tag)
    }
}

/// The constant pool of one class, reduced to what segmentation needs.
///
/// Index 0 is reserved, as in the class-file format; long and double
/// entries occupy two slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPoolSkeleton {
    entries: Vec<PoolEntry>,
}

impl ConstantPoolSkeleton {
    /// Create an empty pool (only the reserved slot 0).
    pub fn new() -> Self {
        Self {
            entries: vec![PoolEntry::plain(ConstantTag::Invalid)],
        }
    }

    /// Pool length including the reserved slot, like `constant_pool_count`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the pool holds nothing but the reserved slot.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Look up an entry.
    pub fn entry(&self, index: CpIndex) -> Option<&PoolEntry> {
        self.entries.get(usize::from(index))
    }

    /// Iterate over `(index, entry)` pairs, skipping the reserved slot.
    pub fn iter(&self) -> impl Iterator<Item = (CpIndex, &PoolEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, e)| (i as CpIndex, e))
    }

    /// Append an entry and return its index.
    ///
    /// # Panics
    ///
    /// Panics if the pool would exceed the 16-bit index space.
    pub fn push(&mut self, entry: PoolEntry) -> CpIndex {
        let width = if entry.tag.is_double_width() { 2 } else { 1 };
        assert!(
            self.entries.len() + width <= usize::from(CpIndex::MAX),
            "constant pool overflow"
        );
        let index = self.entries.len() as CpIndex;
        self.entries.push(entry);
        if width == 2 {
            self.entries.push(PoolEntry::plain(ConstantTag::Invalid));
        }
        index
    }

    /// Append a constant that takes no part in segmentation.
    pub fn push_plain(&mut self, tag: ConstantTag) -> CpIndex {
        self.push(PoolEntry::plain(tag))
    }

    /// Append a parameter definition.
    pub fn push_parameter(&mut self, kind: ParameterKind, class_parameter: Option<CpIndex>) -> CpIndex {
        self.push(PoolEntry {
            tag: ConstantTag::Parameter,
            link: EntryLink::Parameter { kind, class_parameter },
        })
    }

    /// Append an entry derived from the constant at `depends_on`.
    pub fn push_derived(&mut self, tag: ConstantTag, depends_on: CpIndex) -> CpIndex {
        self.push(PoolEntry {
            tag,
            link: EntryLink::DependsOn(depends_on),
        })
    }

    /// Replace the edge of an existing entry. Used to wire forward references.
    pub fn set_link(&mut self, index: CpIndex, link: EntryLink) -> bool {
        match self.entries.get_mut(usize::from(index)) {
            Some(entry) if index != 0 => {
                entry.link = link;
                true
            }
            _ => false,
        }
    }
}

impl Default for ConstantPoolSkeleton {
    fn default() -> Self {
        Self::new()
    }
}
