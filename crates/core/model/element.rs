//! Elements owned by a [`TileModel`](super::TileModel): shared strings, tag
//! tables, relation tables, features and the spatial index.
//!
//! Every element is addressed by a typed `u32` handle into one of the model's
//! arenas. Handles stay valid for the model's lifetime; nothing is freed
//! until the model is dropped.

use crate::codec::flags::{FeatureFlags, TagFlags};
use crate::codec::tip_delta_size;
use crate::codec::varint::{encode_signed_varint, encode_varint};
use crate::layout::Alignment;
use tilekit_types::{Bounds, Coordinate};

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// A deduplicated string.
    StringId
);
handle!(
    /// A deduplicated tag table.
    TagTableId
);
handle!(
    /// A deduplicated relation table.
    RelationTableId
);
handle!(FeatureId);
handle!(
    /// A trunk or leaf of the spatial index.
    NodeId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKind {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 3] = [FeatureKind::Node, FeatureKind::Way, FeatureKind::Relation];

    pub fn type_bits(self) -> u32 {
        (self as u32) << FeatureFlags::TYPE_SHIFT
    }

    pub fn from_type_bits(word: u32) -> Option<FeatureKind> {
        match (word & FeatureFlags::TYPE_MASK) >> FeatureFlags::TYPE_SHIFT {
            0 => Some(FeatureKind::Node),
            1 => Some(FeatureKind::Way),
            2 => Some(FeatureKind::Relation),
            _ => None,
        }
    }
}

/// A feature's identity across tiles: its type and OSM-style id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypedId {
    pub kind: FeatureKind,
    pub id: u64,
}

impl TypedId {
    pub const fn new(kind: FeatureKind, id: u64) -> Self {
        Self { kind, id }
    }
}

/// Largest feature id a stub can hold (56 bits).
pub const MAX_FEATURE_ID: u64 = (1 << 56) - 1;

/// The four spatial indexes of a tile, in header slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Nodes = 0,
    Ways = 1,
    Areas = 2,
    Relations = 3,
}

impl IndexKind {
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Nodes,
        IndexKind::Ways,
        IndexKind::Areas,
        IndexKind::Relations,
    ];

    /// Offset of this index's root slot in the tile header.
    pub fn slot_offset(self) -> u32 {
        match self {
            IndexKind::Nodes => 8,
            IndexKind::Ways => 12,
            IndexKind::Areas => 16,
            IndexKind::Relations => 24,
        }
    }

    pub fn of(kind: FeatureKind, flags: FeatureFlags) -> IndexKind {
        match kind {
            FeatureKind::Node => IndexKind::Nodes,
            _ if flags.contains(FeatureFlags::AREA) => IndexKind::Areas,
            FeatureKind::Way => IndexKind::Ways,
            FeatureKind::Relation => IndexKind::Relations,
        }
    }
}

/// A shared element together with its usage count and placement.
#[derive(Debug, Clone)]
pub struct Shared<T> {
    pub content: T,
    /// Number of elements referencing this one.
    pub users: u32,
    /// Byte offset once placed, 0 before.
    pub location: u32,
}

impl<T> Shared<T> {
    pub(crate) fn new(content: T) -> Self {
        Self {
            content,
            users: 0,
            location: 0,
        }
    }
}

/// A tag value, as encoded in the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagValue {
    /// A code into the global string table.
    GlobalString(u16),
    LocalString(StringId),
    NarrowNumber(u16),
    WideNumber(u32),
}

impl TagValue {
    pub fn flags(self) -> TagFlags {
        match self {
            TagValue::GlobalString(_) => TagFlags::STRING,
            TagValue::LocalString(_) => TagFlags::STRING | TagFlags::WIDE,
            TagValue::NarrowNumber(_) => TagFlags::empty(),
            TagValue::WideNumber(_) => TagFlags::WIDE,
        }
    }

    pub fn local_string(self) -> Option<StringId> {
        match self {
            TagValue::LocalString(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalTag {
    pub key: u16,
    pub value: TagValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalTag {
    pub key: StringId,
    pub value: TagValue,
}

/// Tags of a feature. Global tags are kept sorted by key code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagTable {
    pub global: Vec<GlobalTag>,
    pub local: Vec<LocalTag>,
}

impl TagTable {
    pub fn new(mut global: Vec<GlobalTag>, local: Vec<LocalTag>) -> Self {
        global.sort_by_key(|t| t.key);
        Self { global, local }
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.local.is_empty()
    }

    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Bytes below the table pointer.
    pub fn anchor(&self) -> u32 {
        self.local.iter().map(|t| 4 + t.value.flags().value_size()).sum()
    }

    pub fn size(&self) -> u32 {
        let global: u32 = if self.global.is_empty() {
            4
        } else {
            self.global
                .iter()
                .map(|t| 2 + t.value.flags().value_size())
                .sum()
        };
        self.anchor() + global
    }

    /// Strings the table refers to: local keys first, then local values.
    pub fn strings(&self) -> impl Iterator<Item = StringId> + '_ {
        self.local
            .iter()
            .map(|t| t.key)
            .chain(self.local.iter().filter_map(|t| t.value.local_string()))
            .chain(self.global.iter().filter_map(|t| t.value.local_string()))
    }

    pub fn global_value(&self, key: u16) -> Option<TagValue> {
        self.global.iter().find(|t| t.key == key).map(|t| t.value)
    }
}

/// A reference to a feature stored in another tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignRef {
    /// Export index of the feature in its tile.
    pub tex: u32,
    /// TIP offset from the previous foreign reference's tile, if it differs.
    pub tip_delta: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureRef {
    Local(FeatureId),
    Foreign(ForeignRef),
}

impl FeatureRef {
    pub fn foreign(tex: u32, tip_delta: Option<i32>) -> Self {
        FeatureRef::Foreign(ForeignRef { tex, tip_delta })
    }

    pub(crate) fn delta_size(&self) -> u32 {
        match self {
            FeatureRef::Foreign(ForeignRef {
                tip_delta: Some(d), ..
            }) => tip_delta_size(*d).unwrap_or(4),
            _ => 0,
        }
    }
}

/// The relations a feature belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RelationTable {
    pub entries: Vec<FeatureRef>,
}

impl RelationTable {
    pub fn new(entries: Vec<FeatureRef>) -> Self {
        Self { entries }
    }

    pub fn size(&self) -> u32 {
        self.entries.iter().map(|e| 4 + e.delta_size()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// A code into the global string table; code 0 is the empty role.
    Global(u16),
    Local(StringId),
}

impl Role {
    pub const EMPTY: Role = Role::Global(0);

    pub(crate) fn size(self) -> u32 {
        match self {
            Role::Global(_) => 2,
            Role::Local(_) => 4,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::EMPTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Member {
    pub target: FeatureRef,
    pub role: Role,
}

/// Position of a node or extent of a way or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    Point(Coordinate),
    Bounded(Bounds),
}

impl Geometry {
    pub fn bounds(&self) -> Bounds {
        match self {
            Geometry::Point(xy) => Bounds::of_point(*xy),
            Geometry::Bounded(b) => *b,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WayBody {
    pub coords: Vec<Coordinate>,
    /// Nodes of the way that are features themselves.
    pub feature_nodes: Vec<FeatureRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationBody {
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureBody {
    None,
    Way(WayBody),
    Relation(RelationBody),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeatureState {
    Live,
    /// Referenced before being decoded.
    Placeholder,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub kind: FeatureKind,
    pub id: u64,
    pub flags: FeatureFlags,
    pub tags: TagTableId,
    pub relations: Option<RelationTableId>,
    pub geometry: Geometry,
    pub body: FeatureBody,
    /// Whether an exchange stream should carry this feature's content.
    pub changed: bool,
    /// Index bits of the categories the feature's tags fall into.
    pub index_bits: u32,
    /// Offset of the feature stub once placed.
    pub location: u32,
    pub body_location: u32,
    pub(crate) state: FeatureState,
}

impl Feature {
    pub(crate) fn new(kind: FeatureKind, id: u64, tags: TagTableId) -> Self {
        let (geometry, body) = match kind {
            FeatureKind::Node => (Geometry::Point(Coordinate::default()), FeatureBody::None),
            FeatureKind::Way => (
                Geometry::Bounded(Bounds::EMPTY),
                FeatureBody::Way(WayBody::default()),
            ),
            FeatureKind::Relation => (
                Geometry::Bounded(Bounds::EMPTY),
                FeatureBody::Relation(RelationBody::default()),
            ),
        };
        Self {
            kind,
            id,
            flags: FeatureFlags::empty(),
            tags,
            relations: None,
            geometry,
            body,
            changed: true,
            index_bits: 0,
            location: 0,
            body_location: 0,
            state: FeatureState::Live,
        }
    }

    pub fn typed_id(&self) -> TypedId {
        TypedId::new(self.kind, self.id)
    }

    pub fn bounds(&self) -> Bounds {
        self.geometry.bounds()
    }

    pub fn index_kind(&self) -> IndexKind {
        IndexKind::of(self.kind, self.flags)
    }

    pub fn is_live(&self) -> bool {
        self.state == FeatureState::Live
    }

    pub fn way(&self) -> Option<&WayBody> {
        match &self.body {
            FeatureBody::Way(w) => Some(w),
            _ => None,
        }
    }

    pub fn relation(&self) -> Option<&RelationBody> {
        match &self.body {
            FeatureBody::Relation(r) => Some(r),
            _ => None,
        }
    }

    /// Flags as written to the stub (without the type bits or the
    /// last-item marker).
    pub fn stub_flags(&self) -> FeatureFlags {
        let mut flags = self.flags.persistent();
        if self.relations.is_some() {
            flags |= FeatureFlags::RELATION_MEMBER;
        }
        match &self.body {
            FeatureBody::Way(w) => flags.set(FeatureFlags::WAYNODE, !w.feature_nodes.is_empty()),
            FeatureBody::Relation(_) => flags.remove(FeatureFlags::WAYNODE),
            FeatureBody::None => {}
        }
        flags
    }

    /// Size of the leaf record holding this feature, and the offset of the
    /// stub within it.
    pub fn record_size(&self) -> (u32, u32) {
        match self.kind {
            FeatureKind::Node => (if self.relations.is_some() { 24 } else { 20 }, 8),
            _ => (32, 16),
        }
    }

    /// Bytes of the body below and above its pointer.
    pub(crate) fn body_extent(&self) -> (u32, u32) {
        let reltable = if self.relations.is_some() { 4 } else { 0 };
        match &self.body {
            FeatureBody::None => (0, 0),
            FeatureBody::Way(way) => {
                let nodes: u32 = way.feature_nodes.iter().map(|r| 4 + r.delta_size()).sum();
                let mut coords = Vec::new();
                encode_way_coords(self.bounds(), &way.coords, &mut coords);
                (reltable + nodes, coords.len() as u32)
            }
            FeatureBody::Relation(rel) => {
                if rel.members.is_empty() {
                    return (reltable, 4);
                }
                let mut role = Role::EMPTY;
                let mut size = 0;
                for member in &rel.members {
                    size += 4 + member.target.delta_size();
                    if member.role != role {
                        size += member.role.size();
                        role = member.role;
                    }
                }
                (reltable, size)
            }
        }
    }

    pub(crate) fn body_alignment() -> Alignment {
        Alignment::Word
    }
}

/// Way coordinates: node count, then zigzag deltas starting from the
/// bounding box's minimum corner.
pub(crate) fn encode_way_coords(bounds: Bounds, coords: &[Coordinate], buf: &mut Vec<u8>) {
    encode_varint(coords.len() as u64, buf);
    let (mut x, mut y) = (bounds.min_x as i64, bounds.min_y as i64);
    for xy in coords {
        encode_signed_varint(xy.x as i64 - x, buf);
        encode_signed_varint(xy.y as i64 - y, buf);
        x = xy.x as i64;
        y = xy.y as i64;
    }
}

/// A trunk or leaf of a tile's spatial index.
#[derive(Debug, Clone)]
pub struct IndexNode {
    pub bounds: Bounds,
    pub children: IndexChildren,
    pub location: u32,
}

#[derive(Debug, Clone)]
pub enum IndexChildren {
    Trunk(Vec<NodeId>),
    Leaf(Vec<FeatureId>),
}

impl IndexNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.children, IndexChildren::Leaf(_))
    }
}

/// One root of a spatial index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRoot {
    /// Union of the category bits of the features below this root.
    pub index_bits: u32,
    /// Top trunk of the root's tree.
    pub node: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_table_sizes() {
        let empty = TagTable::default();
        assert_eq!(empty.anchor(), 0);
        assert_eq!(empty.size(), 4);

        let table = TagTable::new(
            vec![
                GlobalTag {
                    key: 9,
                    value: TagValue::WideNumber(70_000),
                },
                GlobalTag {
                    key: 3,
                    value: TagValue::GlobalString(12),
                },
            ],
            vec![LocalTag {
                key: StringId(0),
                value: TagValue::LocalString(StringId(1)),
            }],
        );
        assert_eq!(table.global[0].key, 3);
        assert_eq!(table.anchor(), 8);
        assert_eq!(table.size(), 8 + 4 + 6);
        assert_eq!(table.strings().collect::<Vec<_>>(), vec![StringId(0), StringId(1)]);
    }

    #[test]
    fn test_index_kind_of() {
        assert_eq!(IndexKind::of(FeatureKind::Node, FeatureFlags::AREA), IndexKind::Nodes);
        assert_eq!(IndexKind::of(FeatureKind::Way, FeatureFlags::empty()), IndexKind::Ways);
        assert_eq!(IndexKind::of(FeatureKind::Way, FeatureFlags::AREA), IndexKind::Areas);
        assert_eq!(
            IndexKind::of(FeatureKind::Relation, FeatureFlags::AREA),
            IndexKind::Areas
        );
        assert_eq!(
            IndexKind::of(FeatureKind::Relation, FeatureFlags::empty()),
            IndexKind::Relations
        );
    }

    #[test]
    fn test_relation_body_extent_counts_role_changes() {
        let mut feature = Feature::new(FeatureKind::Relation, 1, TagTableId(0));
        feature.body = FeatureBody::Relation(RelationBody {
            members: vec![
                Member {
                    target: FeatureRef::Local(FeatureId(0)),
                    role: Role::EMPTY,
                },
                Member {
                    target: FeatureRef::foreign(5, Some(100_000)),
                    role: Role::Global(4),
                },
                Member {
                    target: FeatureRef::foreign(6, None),
                    role: Role::Global(4),
                },
            ],
        });
        // 3 entries, one wide TIP delta, one global role
        assert_eq!(feature.body_extent(), (0, 12 + 4 + 2));
        feature.relations = Some(RelationTableId(0));
        assert_eq!(feature.body_extent().0, 4);
    }

    #[test]
    fn test_stub_flags_derived() {
        let mut way = Feature::new(FeatureKind::Way, 7, TagTableId(0));
        way.flags = FeatureFlags::AREA | FeatureFlags::LAST_SPATIAL_ITEM;
        assert_eq!(way.stub_flags(), FeatureFlags::AREA);
        way.body = FeatureBody::Way(WayBody {
            coords: vec![],
            feature_nodes: vec![FeatureRef::foreign(1, None)],
        });
        way.relations = Some(RelationTableId(0));
        assert_eq!(
            way.stub_flags(),
            FeatureFlags::AREA | FeatureFlags::WAYNODE | FeatureFlags::RELATION_MEMBER
        );
    }
}
