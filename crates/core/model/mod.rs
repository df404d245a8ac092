//! In-memory model of a single tile.
//!
//! A [`TileModel`] owns every element of one tile in typed arenas: shared
//! strings, tag tables, relation tables, features and the spatial index.
//! Strings and tables are deduplicated by content as they are added, and
//! each carries a usage count that the exchange format uses to decide what
//! to share.
//!
//! Models are filled either through the mutation API below, by decoding a
//! compact tile ([`TileModel::read_tile`]) or by applying an exchange stream
//! ([`crate::tes::TesReader`]). They are turned back into bytes by laying
//! them out ([`TileModel::layout`]) and writing the result
//! ([`TileModel::write`]).
//!
//! # Examples
//!
//! ```
//! use tilekit::model::{TagTable, TileModel};
//! use tilekit::types::{Coordinate, Tile};
//!
//! let mut model = TileModel::new(Tile::ROOT);
//! let name = model.add_string("name")?;
//! let a = model.add_tag_table(TagTable::default())?;
//! let b = model.add_tag_table(TagTable::default())?;
//! assert_eq!(a, b);
//!
//! let node = model.add_node(42, Coordinate::new(10, 20), a)?;
//! assert_eq!(model.feature(node).id, 42);
//! assert_eq!(model.string(name), "name");
//! # Ok::<(), tilekit::TileError>(())
//! ```

pub mod dedup;
pub mod element;
mod reader;
pub mod walk;
mod writer;

pub use dedup::Deduplicator;
pub use element::{
    Feature, FeatureBody, FeatureId, FeatureKind, FeatureRef, ForeignRef, Geometry, GlobalTag,
    IndexChildren, IndexKind, IndexNode, IndexRoot, LocalTag, MAX_FEATURE_ID, Member, NodeId,
    RelationBody, RelationTable, RelationTableId, Role, Shared, StringId, TagTable, TagTableId,
    TagValue, TypedId, WayBody,
};
pub use walk::{FeatureRecord, TileVisitor, walk_tile};
pub use writer::{ElementKey, HEADER_SIZE};

use crate::codec::flags::{FeatureFlags, TagFlags};
use crate::codec::{MAX_STRING_LEN, tip_delta_size};
use crate::error::{Result, TileError};
use dedup::content_hash;
use element::FeatureState;
use rustc_hash::{FxHashMap, FxHashSet};
use tilekit_types::{Bounds, Coordinate, Tile};

/// Largest export index a foreign reference can carry.
pub const MAX_TEX: u32 = u32::MAX >> 4;

/// Largest global role code.
pub const MAX_ROLE_CODE: u16 = 0x7fff;

/// What a tile offset was decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handle {
    String(StringId),
    TagTable(TagTableId),
    RelationTable(RelationTableId),
    Feature(FeatureId),
}

#[derive(Debug, Clone)]
pub struct TileModel {
    tile: Tile,
    strings: Vec<Shared<String>>,
    tag_tables: Vec<Shared<TagTable>>,
    relation_tables: Vec<Shared<RelationTable>>,
    features: Vec<Feature>,
    /// Strings used as local tag keys; they need DWORD alignment.
    key_strings: FxHashSet<StringId>,

    by_handle: FxHashMap<u32, Handle>,
    by_id: FxHashMap<TypedId, FeatureId>,
    string_dedup: Deduplicator,
    tag_table_dedup: Deduplicator,
    relation_table_dedup: Deduplicator,

    removed: Vec<TypedId>,

    index_nodes: Vec<IndexNode>,
    roots: [Vec<IndexRoot>; 4],
    root_table_locations: [u32; 4],
}

impl TileModel {
    pub fn new(tile: Tile) -> Self {
        let mut model = Self {
            tile,
            strings: Vec::new(),
            tag_tables: Vec::new(),
            relation_tables: Vec::new(),
            features: Vec::new(),
            key_strings: FxHashSet::default(),
            by_handle: FxHashMap::default(),
            by_id: FxHashMap::default(),
            string_dedup: Deduplicator::new(),
            tag_table_dedup: Deduplicator::new(),
            relation_table_dedup: Deduplicator::new(),
            removed: Vec::new(),
            index_nodes: Vec::new(),
            roots: Default::default(),
            root_table_locations: [0; 4],
        };
        let empty = TagTable::default();
        model.tag_table_dedup.insert(content_hash(&empty), 0);
        model.tag_tables.push(Shared::new(empty));
        model
    }

    pub fn tile(&self) -> Tile {
        self.tile
    }

    /// The table without tags, present in every model.
    pub fn empty_tags(&self) -> TagTableId {
        TagTableId(0)
    }

    // ---- strings ----

    pub fn add_string(&mut self, text: &str) -> Result<StringId> {
        if text.len() > MAX_STRING_LEN {
            return Err(TileError::ResourceExhausted(format!(
                "string of {} bytes exceeds {}",
                text.len(),
                MAX_STRING_LEN
            )));
        }
        let hash = content_hash(text);
        if let Some(slot) = self
            .string_dedup
            .find(hash, |slot| self.strings[slot as usize].content == text)
        {
            return Ok(StringId(slot));
        }
        let slot = self.strings.len() as u32;
        self.strings.push(Shared::new(text.to_string()));
        self.string_dedup.insert(hash, slot);
        Ok(StringId(slot))
    }

    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id.index()].content
    }

    pub fn string_users(&self, id: StringId) -> u32 {
        self.strings[id.index()].users
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn is_key_string(&self, id: StringId) -> bool {
        self.key_strings.contains(&id)
    }

    fn check_string(&self, id: StringId) -> Result<()> {
        if id.index() < self.strings.len() {
            Ok(())
        } else {
            Err(TileError::Configuration(format!("unknown string {}", id.0)))
        }
    }

    // ---- tag tables ----

    pub fn add_tag_table(&mut self, mut table: TagTable) -> Result<TagTableId> {
        table.global.sort_by_key(|t| t.key);
        let hash = content_hash(&table);
        self.add_tag_table_with_hash(table, hash)
    }

    /// Insert a tag table under a caller-supplied hash. Lets tests force
    /// collisions between tables with different content.
    pub(crate) fn add_tag_table_with_hash(
        &mut self,
        mut table: TagTable,
        hash: u64,
    ) -> Result<TagTableId> {
        table.global.sort_by_key(|t| t.key);
        for pair in table.global.windows(2) {
            if pair[0].key == pair[1].key {
                return Err(TileError::Configuration(format!(
                    "duplicate global key {}",
                    pair[0].key
                )));
            }
        }
        if let Some(tag) = table
            .global
            .iter()
            .find(|t| t.key == 0 || t.key > TagFlags::MAX_GLOBAL_KEY)
        {
            return Err(TileError::CapacityExceeded(format!(
                "global key code {} outside 1..={}",
                tag.key,
                TagFlags::MAX_GLOBAL_KEY
            )));
        }
        for id in table.strings() {
            self.check_string(id)?;
        }

        if let Some(slot) = self
            .tag_table_dedup
            .find(hash, |slot| self.tag_tables[slot as usize].content == table)
        {
            return Ok(TagTableId(slot));
        }
        for id in table.strings() {
            self.strings[id.index()].users += 1;
        }
        self.key_strings.extend(table.local.iter().map(|t| t.key));
        let slot = self.tag_tables.len() as u32;
        self.tag_tables.push(Shared::new(table));
        self.tag_table_dedup.insert(hash, slot);
        Ok(TagTableId(slot))
    }

    pub fn tag_table(&self, id: TagTableId) -> &TagTable {
        &self.tag_tables[id.index()].content
    }

    pub fn tag_table_users(&self, id: TagTableId) -> u32 {
        self.tag_tables[id.index()].users
    }

    pub fn tag_table_count(&self) -> usize {
        self.tag_tables.len()
    }

    // ---- relation tables ----

    pub fn add_relation_table(&mut self, table: RelationTable) -> Result<RelationTableId> {
        for entry in &table.entries {
            self.check_ref(entry)?;
        }
        let hash = content_hash(&table);
        if let Some(slot) = self.relation_table_dedup.find(hash, |slot| {
            self.relation_tables[slot as usize].content == table
        }) {
            return Ok(RelationTableId(slot));
        }
        let slot = self.relation_tables.len() as u32;
        self.relation_tables.push(Shared::new(table));
        self.relation_table_dedup.insert(hash, slot);
        Ok(RelationTableId(slot))
    }

    pub fn relation_table(&self, id: RelationTableId) -> &RelationTable {
        &self.relation_tables[id.index()].content
    }

    pub fn relation_table_users(&self, id: RelationTableId) -> u32 {
        self.relation_tables[id.index()].users
    }

    pub fn relation_table_count(&self) -> usize {
        self.relation_tables.len()
    }

    fn check_ref(&self, target: &FeatureRef) -> Result<()> {
        match *target {
            FeatureRef::Local(id) if id.index() >= self.features.len() => Err(
                TileError::MissingFeature(format!("no local feature #{}", id.0)),
            ),
            FeatureRef::Local(_) => Ok(()),
            FeatureRef::Foreign(foreign) => {
                if foreign.tex > MAX_TEX {
                    return Err(TileError::CapacityExceeded(format!(
                        "export index {} exceeds {}",
                        foreign.tex, MAX_TEX
                    )));
                }
                if let Some(delta) = foreign.tip_delta {
                    tip_delta_size(delta)?;
                }
                Ok(())
            }
        }
    }

    // ---- features ----

    /// The feature with this type and id, created with no tags and an empty
    /// geometry if the model does not have it yet.
    pub fn feature_or_insert(&mut self, kind: FeatureKind, id: u64) -> Result<FeatureId> {
        if id > MAX_FEATURE_ID {
            return Err(TileError::CapacityExceeded(format!(
                "feature id {} exceeds 56 bits",
                id
            )));
        }
        let typed = TypedId::new(kind, id);
        if let Some(&existing) = self.by_id.get(&typed) {
            return Ok(existing);
        }
        let fid = FeatureId(self.features.len() as u32);
        self.features.push(Feature::new(kind, id, self.empty_tags()));
        self.tag_tables[0].users += 1;
        self.by_id.insert(typed, fid);
        Ok(fid)
    }

    pub fn feature_by_id(&self, kind: FeatureKind, id: u64) -> Option<FeatureId> {
        self.by_id.get(&TypedId::new(kind, id)).copied()
    }

    pub fn feature(&self, id: FeatureId) -> &Feature {
        &self.features[id.index()]
    }

    /// Live features in insertion order.
    pub fn features(&self) -> impl Iterator<Item = (FeatureId, &Feature)> + '_ {
        self.features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_live())
            .map(|(i, f)| (FeatureId(i as u32), f))
    }

    pub fn feature_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn set_tags(&mut self, feature: FeatureId, tags: TagTableId) {
        let old = self.features[feature.index()].tags;
        if old == tags {
            return;
        }
        let users = &mut self.tag_tables[old.index()].users;
        *users = users.saturating_sub(1);
        self.tag_tables[tags.index()].users += 1;
        self.features[feature.index()].tags = tags;
    }

    /// Set the relations a feature belongs to. An empty table clears them.
    pub fn set_relations(&mut self, feature: FeatureId, relations: Option<RelationTableId>) {
        let relations = relations.filter(|&r| !self.relation_table(r).entries.is_empty());
        let old = self.features[feature.index()].relations;
        if old == relations {
            return;
        }
        if let Some(old) = old {
            let users = &mut self.relation_tables[old.index()].users;
            *users = users.saturating_sub(1);
        }
        if let Some(new) = relations {
            self.relation_tables[new.index()].users += 1;
        }
        self.features[feature.index()].relations = relations;
    }

    pub fn set_geometry(&mut self, feature: FeatureId, geometry: Geometry) -> Result<()> {
        let f = &mut self.features[feature.index()];
        match (f.kind, &geometry) {
            (FeatureKind::Node, Geometry::Point(_)) => {}
            (FeatureKind::Way | FeatureKind::Relation, Geometry::Bounded(_)) => {}
            _ => {
                return Err(TileError::Configuration(format!(
                    "{:?} geometry does not fit a {:?}",
                    geometry, f.kind
                )));
            }
        }
        f.geometry = geometry;
        Ok(())
    }

    pub fn set_body(&mut self, feature: FeatureId, body: FeatureBody) -> Result<()> {
        let kind = self.features[feature.index()].kind;
        match (&body, kind) {
            (FeatureBody::None, FeatureKind::Node) => {}
            (FeatureBody::Way(way), FeatureKind::Way) => {
                for target in &way.feature_nodes {
                    self.check_ref(target)?;
                }
            }
            (FeatureBody::Relation(rel), FeatureKind::Relation) => {
                for member in &rel.members {
                    self.check_ref(&member.target)?;
                    match member.role {
                        Role::Global(code) if code > MAX_ROLE_CODE => {
                            return Err(TileError::CapacityExceeded(format!(
                                "role code {} exceeds {}",
                                code, MAX_ROLE_CODE
                            )));
                        }
                        Role::Local(s) => self.check_string(s)?,
                        Role::Global(_) => {}
                    }
                }
            }
            _ => {
                return Err(TileError::Configuration(format!(
                    "body does not fit a {:?}",
                    kind
                )));
            }
        }
        self.adjust_role_users(feature, false);
        self.features[feature.index()].body = body;
        self.adjust_role_users(feature, true);
        Ok(())
    }

    fn adjust_role_users(&mut self, feature: FeatureId, add: bool) {
        let FeatureBody::Relation(rel) = &self.features[feature.index()].body else {
            return;
        };
        for member in &rel.members {
            if let Role::Local(s) = member.role {
                let users = &mut self.strings[s.index()].users;
                *users = if add { *users + 1 } else { users.saturating_sub(1) };
            }
        }
    }

    /// Set the stored flags. Flags derived from the feature's content are
    /// ignored.
    pub fn set_flags(&mut self, feature: FeatureId, flags: FeatureFlags) {
        self.features[feature.index()].flags = flags.persistent();
    }

    pub fn set_changed(&mut self, feature: FeatureId, changed: bool) {
        self.features[feature.index()].changed = changed;
    }

    /// Clear the changed mark of every feature.
    pub fn mark_unchanged(&mut self) {
        for feature in &mut self.features {
            feature.changed = false;
        }
    }

    pub fn add_node(&mut self, id: u64, xy: Coordinate, tags: TagTableId) -> Result<FeatureId> {
        let fid = self.feature_or_insert(FeatureKind::Node, id)?;
        self.set_geometry(fid, Geometry::Point(xy))?;
        self.set_tags(fid, tags);
        Ok(fid)
    }

    /// Add a way; its bounding box is computed from `coords`.
    pub fn add_way(
        &mut self,
        id: u64,
        coords: Vec<Coordinate>,
        tags: TagTableId,
    ) -> Result<FeatureId> {
        let fid = self.feature_or_insert(FeatureKind::Way, id)?;
        let bounds: Bounds = coords.iter().copied().collect();
        self.set_geometry(fid, Geometry::Bounded(bounds))?;
        self.set_body(
            fid,
            FeatureBody::Way(WayBody {
                coords,
                feature_nodes: Vec::new(),
            }),
        )?;
        self.set_tags(fid, tags);
        Ok(fid)
    }

    pub fn add_relation(
        &mut self,
        id: u64,
        bounds: Bounds,
        members: Vec<Member>,
        tags: TagTableId,
    ) -> Result<FeatureId> {
        let fid = self.feature_or_insert(FeatureKind::Relation, id)?;
        self.set_geometry(fid, Geometry::Bounded(bounds))?;
        self.set_body(fid, FeatureBody::Relation(RelationBody { members }))?;
        self.set_tags(fid, tags);
        Ok(fid)
    }

    /// Remove a feature. The removal is remembered so an exchange stream can
    /// carry it. Returns false if the model has no such feature.
    pub fn remove_feature(&mut self, kind: FeatureKind, id: u64) -> bool {
        let typed = TypedId::new(kind, id);
        let Some(fid) = self.by_id.remove(&typed) else {
            return false;
        };
        self.set_tags(fid, self.empty_tags());
        self.set_relations(fid, None);
        self.adjust_role_users(fid, false);
        let users = &mut self.tag_tables[0].users;
        *users = users.saturating_sub(1);
        self.features[fid.index()].state = FeatureState::Removed;
        self.removed.push(typed);
        self.clear_index();
        true
    }

    /// Features removed from this model, in removal order.
    pub fn removed(&self) -> &[TypedId] {
        &self.removed
    }

    pub(crate) fn record_removed(&mut self, typed: TypedId) {
        self.removed.push(typed);
    }

    // ---- spatial index ----

    pub fn roots(&self, kind: IndexKind) -> &[IndexRoot] {
        &self.roots[kind as usize]
    }

    pub fn index_node(&self, id: NodeId) -> &IndexNode {
        &self.index_nodes[id.index()]
    }

    pub fn index_node_count(&self) -> usize {
        self.index_nodes.len()
    }

    pub fn has_index(&self) -> bool {
        self.roots.iter().any(|r| !r.is_empty())
    }

    /// Drop the spatial index, e.g. before rebuilding it.
    pub fn clear_index(&mut self) {
        self.index_nodes.clear();
        for roots in &mut self.roots {
            roots.clear();
        }
        self.root_table_locations = [0; 4];
    }

    pub(crate) fn push_index_node(&mut self, bounds: Bounds, children: IndexChildren) -> NodeId {
        let id = NodeId(self.index_nodes.len() as u32);
        self.index_nodes.push(IndexNode {
            bounds,
            children,
            location: 0,
        });
        id
    }

    pub(crate) fn set_roots(&mut self, kind: IndexKind, roots: Vec<IndexRoot>) {
        self.roots[kind as usize] = roots;
    }

    pub(crate) fn set_index_bits(&mut self, feature: FeatureId, bits: u32) {
        self.features[feature.index()].index_bits = bits;
    }

    pub(crate) fn handle(&self, offset: u32) -> Option<Handle> {
        self.by_handle.get(&offset).copied()
    }
}
