//! Shape layout planning.
//!
//! A [`LayoutPlan`] is computed once from a segment's sorted member list and
//! then drives both the arena allocations and the contents of the
//! descriptor's layout table, so sizing and population cannot disagree.
//!
//! ```text
//! descriptor block:  [ header (8 words) | row | row | ... ]   12 bytes per row
//! instance block:    [ header (4 words) | word | word | ... ] one word per linkage entry
//! reference array:   [ arg | handle | class refs | slot | slot | ... ]
//! ```

use std::fmt;

use thiserror::Error;

use crate::constant::{ConstantEntryRef, ConstantTag, CpIndex, ParameterKind};
use crate::refs::FIXED_REF_LIMIT;

/// Bytes per metadata word.
pub const WORD_SIZE: usize = 8;
/// Fixed words at the start of a descriptor block.
pub const INFO_HEADER_WORDS: usize = 8;
/// Fixed words at the start of an instance block.
pub const SEGMENT_HEADER_WORDS: usize = 4;
/// Bytes per layout-table row (packed entry, payload offset, ref slot).
pub const LAYOUT_ROW_BYTES: usize = 12;

/// A member list the layout cannot express.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The member list does not start with a parameter entry.
    #[error("segment has no parameter entry")]
    MissingParameter,

    /// More than one parameter entry.
    #[error("constant #{index} is a second parameter entry")]
    DuplicateParameter {
        /// The extra parameter.
        index: CpIndex,
    },

    /// A member kind with no layout.
    #[error("constant #{index} ({tag}) has no segment layout")]
    UnsupportedKind {
        /// The member.
        index: CpIndex,
        /// Its kind.
        tag: ConstantTag,
    },

    /// Offsets no longer fit the table encoding.
    #[error("segment with {members} members is too large")]
    TooLarge {
        /// Member count.
        members: usize,
    },
}

/// One layout-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRow {
    /// The member.
    pub entry: ConstantEntryRef,
    /// Byte offset of its in-place word inside an instance block.
    pub payload_offset: Option<u32>,
    /// Its reference-array slot.
    pub ref_slot: Option<u32>,
}

/// Sizes and offsets for one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    kind: ParameterKind,
    rows: Vec<LayoutRow>,
    info_size_in_bytes: usize,
    segment_size_in_bytes: usize,
    ref_len: usize,
}

impl LayoutPlan {
    /// Plan the layout of a segment with these members.
    ///
    /// The members are sorted first, so callers may pass them in any order.
    pub fn compute(members: &[ConstantEntryRef], kind: ParameterKind) -> Result<Self, LayoutError> {
        let mut sorted = members.to_vec();
        sorted.sort();

        match sorted.first() {
            Some(first) if first.tag().is_parameter() => {}
            _ => return Err(LayoutError::MissingParameter),
        }
        if sorted.len() > usize::from(u16::MAX) {
            return Err(LayoutError::TooLarge { members: sorted.len() });
        }

        let mut rows = Vec::with_capacity(sorted.len());
        let mut payload_offset = SEGMENT_HEADER_WORDS * WORD_SIZE;
        let mut ref_len = FIXED_REF_LIMIT;

        for (i, &entry) in sorted.iter().enumerate() {
            let tag = entry.tag();
            if i == 0 {
                rows.push(LayoutRow {
                    entry,
                    payload_offset: None,
                    ref_slot: Some(0),
                });
            } else if tag.is_parameter() {
                return Err(LayoutError::DuplicateParameter { index: entry.index() });
            } else if tag.is_linkage_kind() {
                rows.push(LayoutRow {
                    entry,
                    payload_offset: Some(payload_offset as u32),
                    ref_slot: Some(ref_len as u32),
                });
                payload_offset += WORD_SIZE;
                ref_len += 1;
            } else {
                return Err(LayoutError::UnsupportedKind { index: entry.index(), tag });
            }
        }

        let table_bytes = rows.len() * LAYOUT_ROW_BYTES;
        let info_size_in_bytes = INFO_HEADER_WORDS * WORD_SIZE + table_bytes.next_multiple_of(WORD_SIZE);

        Ok(Self {
            kind,
            rows,
            info_size_in_bytes,
            segment_size_in_bytes: payload_offset,
            ref_len,
        })
    }

    /// Parameter kind.
    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    /// Layout table, parameter row first.
    pub fn rows(&self) -> &[LayoutRow] {
        &self.rows
    }

    /// The parameter row.
    pub fn parameter_row(&self) -> &LayoutRow {
        &self.rows[0]
    }

    /// Row of the member at `index`.
    pub fn row_for(&self, index: CpIndex) -> Option<&LayoutRow> {
        self.rows.iter().find(|r| r.entry.index() == index)
    }

    /// Descriptor size in bytes.
    pub fn info_size_in_bytes(&self) -> usize {
        self.info_size_in_bytes
    }

    /// Descriptor size in words.
    pub fn info_size_in_words(&self) -> usize {
        self.info_size_in_bytes / WORD_SIZE
    }

    /// Instance size in bytes.
    pub fn segment_size_in_bytes(&self) -> usize {
        self.segment_size_in_bytes
    }

    /// Instance size in words.
    pub fn segment_size_in_words(&self) -> usize {
        self.segment_size_in_bytes / WORD_SIZE
    }

    /// In-place words per instance.
    pub fn payload_words(&self) -> usize {
        self.segment_size_in_words() - SEGMENT_HEADER_WORDS
    }

    /// Reference-array length.
    pub fn ref_len(&self) -> usize {
        self.ref_len
    }
}

impl fmt::Display for LayoutPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} segment: {} rows, {} info words, {} segment words, {} refs",
            self.kind,
            self.rows.len(),
            self.info_size_in_words(),
            self.segment_size_in_words(),
            self.ref_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_members() -> Vec<ConstantEntryRef> {
        vec![
            ConstantEntryRef::new(3, ConstantTag::InvokeDynamic),
            ConstantEntryRef::new(1, ConstantTag::Parameter),
            ConstantEntryRef::new(2, ConstantTag::Linkage),
        ]
    }

    #[test]
    fn test_box_layout() {
        let plan = LayoutPlan::compute(&box_members(), ParameterKind::ClassOnly).unwrap();
        assert_eq!(plan.rows().len(), 3);
        assert_eq!(plan.ref_len(), 5);
        assert_eq!(plan.payload_words(), 2);

        let param = plan.parameter_row();
        assert_eq!(param.entry.index(), 1);
        assert_eq!(param.ref_slot, Some(0));
        assert_eq!(param.payload_offset, None);

        let link = plan.row_for(2).unwrap();
        assert_eq!(link.ref_slot, Some(3));
        assert_eq!(link.payload_offset, Some((SEGMENT_HEADER_WORDS * WORD_SIZE) as u32));
        let indy = plan.row_for(3).unwrap();
        assert_eq!(indy.ref_slot, Some(4));
        assert_eq!(indy.payload_offset, Some((SEGMENT_HEADER_WORDS * WORD_SIZE + WORD_SIZE) as u32));

        // 3 rows * 12 bytes = 36, rounded to 40
        assert_eq!(plan.info_size_in_bytes(), INFO_HEADER_WORDS * WORD_SIZE + 40);
        assert_eq!(plan.segment_size_in_words(), SEGMENT_HEADER_WORDS + 2);
    }

    #[test]
    fn test_parameter_only_segment() {
        let members = [ConstantEntryRef::new(7, ConstantTag::Parameter)];
        let plan = LayoutPlan::compute(&members, ParameterKind::MethodOnly).unwrap();
        assert_eq!(plan.ref_len(), FIXED_REF_LIMIT);
        assert_eq!(plan.payload_words(), 0);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let a = LayoutPlan::compute(&box_members(), ParameterKind::ClassOnly).unwrap();
        let mut reversed = box_members();
        reversed.reverse();
        let b = LayoutPlan::compute(&reversed, ParameterKind::ClassOnly).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_parameter() {
        let members = [ConstantEntryRef::new(2, ConstantTag::Linkage)];
        assert_eq!(
            LayoutPlan::compute(&members, ParameterKind::ClassOnly),
            Err(LayoutError::MissingParameter)
        );
        assert_eq!(LayoutPlan::compute(&[], ParameterKind::ClassOnly), Err(LayoutError::MissingParameter));
    }

    #[test]
    fn test_duplicate_parameter() {
        let members = [
            ConstantEntryRef::new(1, ConstantTag::Parameter),
            ConstantEntryRef::new(4, ConstantTag::Parameter),
        ];
        assert_eq!(
            LayoutPlan::compute(&members, ParameterKind::ClassOnly),
            Err(LayoutError::DuplicateParameter { index: 4 })
        );
    }

    #[test]
    fn test_unsupported_kind() {
        let members = [
            ConstantEntryRef::new(1, ConstantTag::Parameter),
            ConstantEntryRef::new(2, ConstantTag::Methodref),
        ];
        assert_eq!(
            LayoutPlan::compute(&members, ParameterKind::ClassOnly),
            Err(LayoutError::UnsupportedKind { index: 2, tag: ConstantTag::Methodref })
        );
    }
}
