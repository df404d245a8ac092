//! Named bit flags packed into the low bits of tile words.

use bitflags::bitflags;

bitflags! {
    /// Flags in the low byte of a feature stub's first word.
    ///
    /// Bits 3 and 4 hold the feature type and are not flags; see
    /// [`TYPE_MASK`](FeatureFlags::TYPE_MASK).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FeatureFlags: u32 {
        /// Last record of a spatial-index leaf.
        const LAST_SPATIAL_ITEM = 1;
        const AREA = 1 << 1;
        /// The feature has a relation table.
        const RELATION_MEMBER = 1 << 2;
        /// Node: part of a way. Way: has a feature-node table.
        const WAYNODE = 1 << 5;
        const MULTITILE_WEST = 1 << 6;
        const MULTITILE_NORTH = 1 << 7;
    }
}

impl FeatureFlags {
    pub const TYPE_MASK: u32 = 0b11 << 3;
    pub const TYPE_SHIFT: u32 = 3;

    /// Flags a feature keeps in the model; the rest are derived when writing.
    pub fn persistent(self) -> Self {
        self & (Self::AREA | Self::WAYNODE | Self::MULTITILE_WEST | Self::MULTITILE_NORTH)
    }
}

bitflags! {
    /// Flags of a trunk or root-table entry pointer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const LAST = 1;
        /// The entry points to a leaf rather than another trunk.
        const LEAF = 1 << 1;
    }
}

impl EntryFlags {
    pub const MASK: u32 = 0b11;
}

bitflags! {
    /// Flags of a relation member, relation-table entry or feature-node entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemberFlags: u32 {
        const LAST = 1;
        const FOREIGN = 1 << 1;
        /// A role follows the entry (relation members only).
        const DIFFERENT_ROLE = 1 << 2;
        /// A TIP delta follows the entry (foreign entries only).
        const DIFFERENT_TILE = 1 << 3;
    }
}

impl MemberFlags {
    pub const LOCAL_MASK: u32 = 0b111;
    pub const FOREIGN_MASK: u32 = 0b1111;
    pub const TEX_SHIFT: u32 = 4;
}

bitflags! {
    /// Value encoding of a tag, shared by global and local keys.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TagFlags: u32 {
        const STRING = 1;
        /// Four-byte value instead of two.
        const WIDE = 1 << 1;
    }
}

impl TagFlags {
    /// Last-entry bit of a global (u16) key.
    pub const GLOBAL_LAST: u16 = 0x8000;
    /// Last-entry bit of a local (i32) key.
    pub const LOCAL_LAST: u32 = 1 << 2;
    pub const GLOBAL_KEY_SHIFT: u32 = 2;
    pub const MAX_GLOBAL_KEY: u16 = 0x1fff;

    pub fn value_size(self) -> u32 {
        if self.contains(TagFlags::WIDE) { 4 } else { 2 }
    }
}
