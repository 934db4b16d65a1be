//! # Segment Assignment
//!
//! Parse-time coloring of constant-pool entries into segments.
//!
//! Every parameter-definition entry opens a new segment. Every entry that
//! derives from a parameter (directly, or through a chain of other derived
//! entries) joins that parameter's segment. Everything else is unsegmented.
//!
//! ## Algorithm
//!
//! Depth-first with memoized marks. Each index starts as [`SegmentMark::Tbd`];
//! while its dependency chain is being followed it is [`SegmentMark::Working`];
//! meeting a `Working` mark again means the chain loops back on itself, which
//! is a class-file format error. Since every entry has at most one dependency
//! edge the walk is a simple path, so it is done with an explicit path stack
//! instead of recursion.
//!
//! A failed walk resets every entry on its path to `Tbd` before reporting,
//! so no transient mark ever survives a call.

use std::fmt;

use thiserror::Error;

use crate::constant::{ConstantEntryRef, ConstantPoolSkeleton, ConstantTag, CpIndex, EntryLink, ParameterKind};

/// A 1-based segment number, unique within one declaring class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentNumber(u32);

impl SegmentNumber {
    /// The first segment number.
    pub const FIRST: SegmentNumber = SegmentNumber(1);

    /// Create a segment number; zero is rejected.
    pub const fn new(n: u32) -> Option<Self> {
        if n == 0 {
            None
        } else {
            Some(Self(n))
        }
    }

    /// The raw 1-based number.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Zero-based position, for indexing per-class tables.
    pub const fn as_index(self) -> usize {
        (self.0 - 1) as usize
    }

    fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }
}

impl fmt::Display for SegmentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment {}", self.0)
    }
}

/// Per-index resolution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMark {
    /// Not visited yet.
    Tbd,
    /// On the dependency path currently being followed.
    Working,
    /// Not part of any segment.
    Unsegmented,
    /// Member of this segment.
    Segment(SegmentNumber),
}

impl SegmentMark {
    /// Is this one of the marks that may only exist while resolving?
    pub const fn is_transient(self) -> bool {
        matches!(self, SegmentMark::Tbd | SegmentMark::Working)
    }
}

/// Malformed parameter dependency structure in a class file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A chain of derived constants loops back on itself.
    #[error("circular parameter dependency at constant #{index}")]
    CircularDependency {
        /// Where the loop was detected.
        index: CpIndex,
    },

    /// A dependency edge points outside the pool or at slot 0.
    #[error("constant #{index} depends on invalid constant #{target}")]
    BadDependency {
        /// The dependent entry.
        index: CpIndex,
        /// The offending target.
        target: CpIndex,
    },

    /// An entry of a kind that cannot join a segment declares a dependency.
    #[error("constant #{index} ({tag}) cannot depend on a parameter")]
    UnsegmentableDependent {
        /// The dependent entry.
        index: CpIndex,
        /// Its kind.
        tag: ConstantTag,
    },

    /// Parameter tag and parameter declaration disagree.
    #[error("constant #{index} ({tag}) is not a well-formed parameter")]
    MalformedParameter {
        /// The entry.
        index: CpIndex,
        /// Its kind.
        tag: ConstantTag,
    },

    /// A parameter's enclosing class parameter is missing, extra, or wrong.
    #[error("parameter #{index}: {reason}")]
    BadParameterParent {
        /// The parameter entry.
        index: CpIndex,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Final assignment of every pool index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentAssignmentMap {
    assignments: Vec<Option<SegmentNumber>>,
}

impl SegmentAssignmentMap {
    /// The segment of `index`, or `None` if unsegmented or out of range.
    pub fn get(&self, index: CpIndex) -> Option<SegmentNumber> {
        self.assignments.get(usize::from(index)).copied().flatten()
    }

    /// Is `index` part of any segment?
    pub fn is_segmented(&self, index: CpIndex) -> bool {
        self.get(index).is_some()
    }

    /// Number of pool indices covered (including slot 0).
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True for an empty pool.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Iterate over segmented indices.
    pub fn iter(&self) -> impl Iterator<Item = (CpIndex, SegmentNumber)> + '_ {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|n| (i as CpIndex, n)))
    }
}

/// Everything the shape builder needs to know about one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    /// Segment number.
    pub number: SegmentNumber,
    /// Pool index of the parameter definition.
    pub parameter_index: CpIndex,
    /// Parameter kind.
    pub kind: ParameterKind,
    /// Enclosing class segment, for method-and-class segments.
    pub class_segment: Option<SegmentNumber>,
    /// Members in layout order; the parameter comes first.
    pub members: Vec<ConstantEntryRef>,
}

/// Result of segmenting one constant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentAssignment {
    /// Per-index assignment.
    pub map: SegmentAssignmentMap,
    /// One plan per segment, ordered by segment number.
    pub segments: Vec<SegmentPlan>,
}

impl SegmentAssignment {
    /// Number of segments found.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Plan for segment `number`.
    pub fn plan(&self, number: SegmentNumber) -> Option<&SegmentPlan> {
        self.segments.get(number.as_index())
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenSegment {
    parameter_index: CpIndex,
    kind: ParameterKind,
    class_segment: Option<SegmentNumber>,
}

/// Incremental segment resolver over one constant pool.
pub struct SegmentResolver<'a> {
    pool: &'a ConstantPoolSkeleton,
    marks: Vec<SegmentMark>,
    segments: Vec<OpenSegment>,
}

impl<'a> SegmentResolver<'a> {
    /// Create a resolver with every entry unvisited.
    pub fn new(pool: &'a ConstantPoolSkeleton) -> Self {
        let mut marks = vec![SegmentMark::Tbd; pool.len()];
        if let Some(slot0) = marks.first_mut() {
            *slot0 = SegmentMark::Unsegmented;
        }
        Self {
            pool,
            marks,
            segments: Vec::new(),
        }
    }

    /// Segment a whole pool in one step.
    pub fn resolve(pool: &'a ConstantPoolSkeleton) -> Result<SegmentAssignment, FormatError> {
        Self::new(pool).finish()
    }

    /// Current mark of `index`.
    pub fn mark(&self, index: CpIndex) -> Option<SegmentMark> {
        self.marks.get(usize::from(index)).copied()
    }

    /// True if some index still holds `Working`.
    pub fn has_working_marks(&self) -> bool {
        self.marks.iter().any(|m| matches!(m, SegmentMark::Working))
    }

    /// Number of segments opened so far.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Resolve the segment of `index`, following its dependency chain.
    ///
    /// Returns `Ok(None)` for unsegmented entries.
    pub fn segment_for(&mut self, index: CpIndex) -> Result<Option<SegmentNumber>, FormatError> {
        let mut path: Vec<CpIndex> = Vec::new();
        let outcome = self.walk(index, &mut path);

        match &outcome {
            Ok(result) => {
                let mark = match *result {
                    Some(n) => SegmentMark::Segment(n),
                    None => SegmentMark::Unsegmented,
                };
                for &i in &path {
                    self.marks[usize::from(i)] = mark;
                }
            }
            Err(_) => {
                for &i in &path {
                    self.marks[usize::from(i)] = SegmentMark::Tbd;
                }
            }
        }
        outcome
    }

    fn walk(&mut self, start: CpIndex, path: &mut Vec<CpIndex>) -> Result<Option<SegmentNumber>, FormatError> {
        let mut cursor = start;
        loop {
            let slot = usize::from(cursor);
            let entry = match (self.marks.get(slot), self.pool.entry(cursor)) {
                (Some(mark), Some(entry)) => match *mark {
                    SegmentMark::Unsegmented => return Ok(None),
                    SegmentMark::Segment(n) => return Ok(Some(n)),
                    SegmentMark::Working => {
                        return Err(FormatError::CircularDependency { index: cursor });
                    }
                    SegmentMark::Tbd => *entry,
                },
                _ => {
                    return Err(FormatError::BadDependency {
                        index: path.last().copied().unwrap_or(start),
                        target: cursor,
                    });
                }
            };

            if entry.tag.is_parameter() != matches!(entry.link, EntryLink::Parameter { .. }) {
                return Err(FormatError::MalformedParameter { index: cursor, tag: entry.tag });
            }

            self.marks[slot] = SegmentMark::Working;
            path.push(cursor);

            match entry.link {
                EntryLink::Independent => return Ok(None),
                EntryLink::Parameter { kind, class_parameter } => {
                    let class_segment = self.class_segment_of(cursor, kind, class_parameter)?;
                    return Ok(Some(self.open_segment(cursor, kind, class_segment)));
                }
                EntryLink::DependsOn(target) => {
                    if !entry.tag.is_segmentable() {
                        return Err(FormatError::UnsegmentableDependent { index: cursor, tag: entry.tag });
                    }
                    if target == 0 || usize::from(target) >= self.pool.len() {
                        return Err(FormatError::BadDependency { index: cursor, target });
                    }
                    cursor = target;
                }
            }
        }
    }

    fn class_segment_of(
        &mut self,
        index: CpIndex,
        kind: ParameterKind,
        class_parameter: Option<CpIndex>,
    ) -> Result<Option<SegmentNumber>, FormatError> {
        let class_parameter = match (kind.has_both(), class_parameter) {
            (false, None) => return Ok(None),
            (false, Some(_)) => {
                return Err(FormatError::BadParameterParent {
                    index,
                    reason: "only a method-and-class parameter may name a class parameter",
                });
            }
            (true, None) => {
                return Err(FormatError::BadParameterParent {
                    index,
                    reason: "method-and-class parameter names no class parameter",
                });
            }
            (true, Some(p)) => p,
        };

        let is_class_parameter = matches!(
            self.pool.entry(class_parameter).map(|e| e.link),
            Some(EntryLink::Parameter { kind: ParameterKind::ClassOnly, .. })
        );
        if class_parameter == 0 || !is_class_parameter {
            return Err(FormatError::BadParameterParent {
                index,
                reason: "enclosing parameter is not a class parameter",
            });
        }

        // A class parameter terminates its own walk immediately, so this
        // cannot re-enter the current path.
        self.segment_for(class_parameter)
    }

    fn open_segment(
        &mut self,
        parameter_index: CpIndex,
        kind: ParameterKind,
        class_segment: Option<SegmentNumber>,
    ) -> SegmentNumber {
        self.segments.push(OpenSegment {
            parameter_index,
            kind,
            class_segment,
        });
        SegmentNumber::from_index(self.segments.len() - 1)
    }

    /// Resolve every entry and produce the final map and segment plans.
    pub fn finish(mut self) -> Result<SegmentAssignment, FormatError> {
        for index in 1..self.pool.len() {
            self.segment_for(index as CpIndex)?;
        }

        debug_assert!(
            self.marks.iter().all(|m| !m.is_transient()),
            "resolver left a transient mark behind"
        );

        let mut members: Vec<Vec<ConstantEntryRef>> = vec![Vec::new(); self.segments.len()];
        let mut assignments = Vec::with_capacity(self.marks.len());
        for (i, mark) in self.marks.iter().enumerate() {
            match *mark {
                SegmentMark::Segment(n) => {
                    if let Some(entry) = self.pool.entry(i as CpIndex) {
                        members[n.as_index()].push(entry.at(i as CpIndex));
                    }
                    assignments.push(Some(n));
                }
                _ => assignments.push(None),
            }
        }

        let segments: Vec<SegmentPlan> = self
            .segments
            .iter()
            .zip(members)
            .enumerate()
            .map(|(i, (open, mut members))| {
                members.sort();
                SegmentPlan {
                    number: SegmentNumber::from_index(i),
                    parameter_index: open.parameter_index,
                    kind: open.kind,
                    class_segment: open.class_segment,
                    members,
                }
            })
            .collect();

        tracing::debug!(
            pool_length = self.pool.len(),
            segments = segments.len(),
            "constant pool segmented"
        );

        Ok(SegmentAssignment {
            map: SegmentAssignmentMap { assignments },
            segments,
        })
    }
}
