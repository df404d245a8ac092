//! Laying out a model and encoding it as a compact tile.

use crate::codec::flags::{EntryFlags, FeatureFlags, MemberFlags, TagFlags};
use crate::codec::{ByteSink, string_size};
use crate::error::{Result, TileError};
use crate::layout::{Alignment, Layout, Placeable};
use crate::model::TileModel;
use crate::model::element::{
    Feature, FeatureBody, FeatureId, FeatureKind, FeatureRef, IndexChildren, IndexKind, NodeId,
    RelationBody, RelationTableId, Role, Shared, StringId, TagTable, TagTableId, TagValue,
    WayBody, encode_way_coords,
};
use bytes::Bytes;
use tilekit_types::Bounds;

/// Bytes reserved at the start of every tile.
pub const HEADER_SIZE: u32 = 32;

/// Largest tile the writer produces; keeps every relative pointer shiftable.
pub const MAX_TILE_SIZE: u32 = 1 << 30;

/// Word marking a relation without members.
pub(crate) const EMPTY_MEMBER_LIST: u32 = 1;

const TRUNK_ENTRY_SIZE: u32 = 20;
const ROOT_ENTRY_SIZE: u32 = 8;

/// An element of a [`TileModel`] as seen by the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKey {
    String(StringId),
    TagTable(TagTableId),
    RelationTable(RelationTableId),
    RootTable(IndexKind),
    IndexNode(NodeId),
    Body(FeatureId),
}

impl Placeable<ElementKey> for TileModel {
    fn size_of(&self, key: ElementKey) -> u32 {
        match key {
            ElementKey::String(s) => string_size(self.strings[s.index()].content.len()),
            ElementKey::TagTable(t) => self.tag_tables[t.index()].content.size(),
            ElementKey::RelationTable(r) => self.relation_tables[r.index()].content.size(),
            ElementKey::RootTable(kind) => ROOT_ENTRY_SIZE * self.roots[kind as usize].len() as u32,
            ElementKey::IndexNode(n) => match &self.index_nodes[n.index()].children {
                IndexChildren::Trunk(children) => TRUNK_ENTRY_SIZE * children.len() as u32,
                IndexChildren::Leaf(features) => features
                    .iter()
                    .map(|f| self.features[f.index()].record_size().0)
                    .sum(),
            },
            ElementKey::Body(f) => {
                let (below, above) = self.features[f.index()].body_extent();
                below + above
            }
        }
    }

    fn alignment_of(&self, key: ElementKey) -> Alignment {
        match key {
            ElementKey::String(s) if self.key_strings.contains(&s) => Alignment::Dword,
            ElementKey::String(_) => Alignment::Byte,
            ElementKey::TagTable(_) | ElementKey::RelationTable(_) => Alignment::Word,
            ElementKey::RootTable(_) | ElementKey::IndexNode(_) => Alignment::Dword,
            ElementKey::Body(_) => Feature::body_alignment(),
        }
    }

    fn set_location(&mut self, key: ElementKey, location: u32) {
        match key {
            ElementKey::String(s) => self.strings[s.index()].location = location,
            ElementKey::TagTable(t) => self.tag_tables[t.index()].location = location,
            ElementKey::RelationTable(r) => self.relation_tables[r.index()].location = location,
            ElementKey::RootTable(kind) => self.root_table_locations[kind as usize] = location,
            ElementKey::IndexNode(n) => {
                let node = &mut self.index_nodes[n.index()];
                node.location = location;
                if let IndexChildren::Leaf(features) = &node.children {
                    let mut at = location;
                    for f in features {
                        let feature = &mut self.features[f.index()];
                        let (size, stub) = feature.record_size();
                        feature.location = at + stub;
                        at += size;
                    }
                }
            }
            ElementKey::Body(f) => {
                let feature = &mut self.features[f.index()];
                feature.body_location = location + feature.body_extent().0;
            }
        }
    }

    fn discover(&mut self, key: ElementKey, found: &mut Vec<ElementKey>) {
        match key {
            ElementKey::IndexNode(n) => {
                if let IndexChildren::Leaf(features) = &self.index_nodes[n.index()].children {
                    for &f in features {
                        let feature = &self.features[f.index()];
                        found.push(ElementKey::TagTable(feature.tags));
                        if feature.kind == FeatureKind::Node {
                            found.extend(feature.relations.map(ElementKey::RelationTable));
                        } else {
                            found.push(ElementKey::Body(f));
                        }
                    }
                }
            }
            ElementKey::Body(f) => {
                let feature = &self.features[f.index()];
                found.extend(feature.relations.map(ElementKey::RelationTable));
                if let FeatureBody::Relation(rel) = &feature.body {
                    found.extend(rel.members.iter().filter_map(|m| match m.role {
                        Role::Local(s) => Some(ElementKey::String(s)),
                        Role::Global(_) => None,
                    }));
                }
            }
            ElementKey::TagTable(t) => {
                found.extend(
                    self.tag_tables[t.index()]
                        .content
                        .strings()
                        .map(ElementKey::String),
                );
            }
            ElementKey::String(_) | ElementKey::RelationTable(_) | ElementKey::RootTable(_) => {}
        }
    }
}

fn located(location: u32, what: &str) -> Result<u32> {
    if location == 0 {
        Err(TileError::Layout(format!("{} has not been placed", what)))
    } else {
        Ok(location)
    }
}

fn relative(target: u32, from: u32) -> i32 {
    (target as i64 - from as i64) as i32
}

fn uses_root_table(roots: &[crate::model::IndexRoot]) -> bool {
    roots.len() > 1 || roots.iter().any(|r| r.index_bits != 0)
}

impl TileModel {
    /// Assign a location to every element reachable from the spatial
    /// indexes: root tables and the index trees first, then tag tables,
    /// relation tables, bodies and strings.
    ///
    /// The model must be indexed, and every live feature must sit in
    /// exactly one leaf.
    pub fn layout(&mut self) -> Result<Layout<ElementKey>> {
        let indexed: usize = self
            .index_nodes
            .iter()
            .filter_map(|n| match &n.children {
                IndexChildren::Leaf(features) => Some(features.len()),
                IndexChildren::Trunk(_) => None,
            })
            .sum();
        if indexed != self.feature_count() {
            return Err(TileError::Layout(format!(
                "spatial index holds {} features, model has {}",
                indexed,
                self.feature_count()
            )));
        }
        self.reset_locations();

        let mut layout = Layout::new(HEADER_SIZE);
        for kind in IndexKind::ALL {
            let roots = self.roots[kind as usize].clone();
            if uses_root_table(&roots) {
                layout.place(self, ElementKey::RootTable(kind));
            }
            for root in roots {
                self.place_tree(&mut layout, root.node);
            }
        }
        layout.place_bodies(self);

        if layout.size() > MAX_TILE_SIZE {
            return Err(TileError::ResourceExhausted(format!(
                "tile {} needs {} bytes",
                self.tile,
                layout.size()
            )));
        }
        log::trace!(
            "Laid out tile {}: {} bytes, {} bytes padding",
            self.tile,
            layout.size(),
            layout.padding()
        );
        Ok(layout)
    }

    fn reset_locations(&mut self) {
        for s in &mut self.strings {
            s.location = 0;
        }
        for t in &mut self.tag_tables {
            t.location = 0;
        }
        for r in &mut self.relation_tables {
            r.location = 0;
        }
        for f in &mut self.features {
            f.location = 0;
            f.body_location = 0;
        }
        for n in &mut self.index_nodes {
            n.location = 0;
        }
        self.root_table_locations = [0; 4];
    }

    /// Place a tree depth first, parents before children.
    fn place_tree(&mut self, layout: &mut Layout<ElementKey>, root: NodeId) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            layout.place(self, ElementKey::IndexNode(node));
            if let IndexChildren::Trunk(children) = &self.index_nodes[node.index()].children {
                stack.extend(children.iter().rev());
            }
        }
    }

    /// Encode the model at the locations assigned by `layout`.
    pub fn write(&self, layout: &Layout<ElementKey>) -> Result<Bytes> {
        let size = layout.size();
        let mut buf = vec![0u8; size as usize];
        let mut sink = ByteSink::new(&mut buf);
        sink.put_u32(0, size - 4)?;

        for kind in IndexKind::ALL {
            let roots = &self.roots[kind as usize];
            let slot = kind.slot_offset();
            if roots.is_empty() {
                continue;
            }
            if uses_root_table(roots) {
                let table = located(self.root_table_locations[kind as usize], "root table")?;
                sink.put_u32(slot, relative(table, slot) as u32 | 1)?;
            } else {
                let trunk = located(self.index_nodes[roots[0].node.index()].location, "trunk")?;
                sink.put_u32(slot, relative(trunk, slot) as u32)?;
            }
        }

        for placement in layout.placements() {
            let at = placement.location;
            match placement.key {
                ElementKey::String(s) => {
                    sink.put_string(at, &self.strings[s.index()].content)?;
                }
                ElementKey::TagTable(t) => self.write_tag_table(&mut sink, &self.tag_tables[t.index()])?,
                ElementKey::RelationTable(r) => self.write_relation_table(&mut sink, r, at)?,
                ElementKey::RootTable(kind) => self.write_root_table(&mut sink, kind, at)?,
                ElementKey::IndexNode(n) => match &self.index_nodes[n.index()].children {
                    IndexChildren::Trunk(children) => self.write_trunk(&mut sink, children, at)?,
                    IndexChildren::Leaf(features) => self.write_leaf(&mut sink, features, at)?,
                },
                ElementKey::Body(f) => {
                    let feature = &self.features[f.index()];
                    match &feature.body {
                        FeatureBody::Way(way) => self.write_way_body(&mut sink, feature, way)?,
                        FeatureBody::Relation(rel) => {
                            self.write_relation_body(&mut sink, feature, rel)?
                        }
                        FeatureBody::None => {}
                    }
                }
            }
        }
        Ok(Bytes::from(buf))
    }

    /// Lay out and write in one step.
    pub fn to_bytes(&mut self) -> Result<Bytes> {
        let layout = self.layout()?;
        self.write(&layout)
    }

    fn write_root_table(&self, sink: &mut ByteSink<'_>, kind: IndexKind, at: u32) -> Result<()> {
        let roots = &self.roots[kind as usize];
        for (i, root) in roots.iter().enumerate() {
            let entry = at + ROOT_ENTRY_SIZE * i as u32;
            let trunk = located(self.index_nodes[root.node.index()].location, "trunk")?;
            let mut word = relative(trunk, entry) as u32;
            if i + 1 == roots.len() {
                word |= EntryFlags::LAST.bits();
            }
            sink.put_u32(entry, word)?;
            sink.put_u32(entry + 4, root.index_bits)?;
        }
        Ok(())
    }

    fn write_trunk(&self, sink: &mut ByteSink<'_>, children: &[NodeId], at: u32) -> Result<()> {
        for (i, child) in children.iter().enumerate() {
            let entry = at + TRUNK_ENTRY_SIZE * i as u32;
            let node = &self.index_nodes[child.index()];
            let mut word = relative(located(node.location, "index node")?, entry) as u32;
            if i + 1 == children.len() {
                word |= EntryFlags::LAST.bits();
            }
            if node.is_leaf() {
                word |= EntryFlags::LEAF.bits();
            }
            sink.put_u32(entry, word)?;
            put_bounds(sink, entry + 4, &node.bounds)?;
        }
        Ok(())
    }

    fn write_leaf(&self, sink: &mut ByteSink<'_>, features: &[FeatureId], at: u32) -> Result<()> {
        let mut record = at;
        for (i, fid) in features.iter().enumerate() {
            let f = &self.features[fid.index()];
            if !f.is_live() {
                return Err(TileError::Layout(format!(
                    "spatial index holds removed {:?} {}",
                    f.kind, f.id
                )));
            }
            let (size, stub_offset) = f.record_size();
            match f.kind {
                FeatureKind::Node => {
                    let xy = f.bounds();
                    sink.put_i32(record, xy.min_x)?;
                    sink.put_i32(record + 4, xy.min_y)?;
                }
                _ => put_bounds(sink, record, &f.bounds())?,
            }

            let stub = record + stub_offset;
            let mut flags = f.stub_flags();
            if i + 1 == features.len() {
                flags |= FeatureFlags::LAST_SPATIAL_ITEM;
            }
            sink.put_u32(
                stub,
                (((f.id >> 32) as u32) << 8) | flags.bits() | f.kind.type_bits(),
            )?;
            sink.put_u32(stub + 4, f.id as u32)?;

            let tags = &self.tag_tables[f.tags.index()];
            let pointer = located(tags.location, "tag table")? + tags.content.anchor();
            sink.put_u32(
                stub + 8,
                relative(pointer, stub + 8) as u32 | tags.content.has_local() as u32,
            )?;

            if f.kind == FeatureKind::Node {
                if let Some(r) = f.relations {
                    let table = located(self.relation_tables[r.index()].location, "relation table")?;
                    sink.put_i32(stub + 12, relative(table, stub + 12))?;
                }
            } else {
                sink.put_i32(
                    stub + 12,
                    relative(located(f.body_location, "feature body")?, stub + 12),
                )?;
            }
            record += size;
        }
        Ok(())
    }

    fn write_tag_table(&self, sink: &mut ByteSink<'_>, table: &Shared<TagTable>) -> Result<()> {
        let tags = &table.content;
        let pointer = located(table.location, "tag table")? + tags.anchor();

        if tags.global.is_empty() {
            sink.put_u32(pointer, TagFlags::GLOBAL_LAST as u32)?;
        }
        let mut at = pointer;
        for (i, tag) in tags.global.iter().enumerate() {
            let flags = tag.value.flags();
            let mut key = (tag.key << TagFlags::GLOBAL_KEY_SHIFT) | flags.bits() as u16;
            if i + 1 == tags.global.len() {
                key |= TagFlags::GLOBAL_LAST;
            }
            sink.put_u16(at, key)?;
            self.write_tag_value(sink, at + 2, tag.value)?;
            at += 2 + flags.value_size();
        }

        let base = pointer & !3;
        let mut top = pointer;
        for (i, tag) in tags.local.iter().enumerate() {
            let flags = tag.value.flags();
            let key_at = top - 4;
            let value_at = key_at - flags.value_size();
            let key_string = located(self.strings[tag.key.index()].location, "key string")?;
            if !Alignment::Dword.is_aligned(key_string) {
                return Err(TileError::Layout(format!(
                    "key string at {} is not 4-byte aligned",
                    key_string
                )));
            }
            let mut word = (relative(key_string, base) << 1) as u32 | flags.bits();
            if i + 1 == tags.local.len() {
                word |= TagFlags::LOCAL_LAST;
            }
            sink.put_u32(key_at, word)?;
            self.write_tag_value(sink, value_at, tag.value)?;
            top = value_at;
        }
        Ok(())
    }

    fn write_tag_value(&self, sink: &mut ByteSink<'_>, at: u32, value: TagValue) -> Result<()> {
        match value {
            TagValue::GlobalString(code) | TagValue::NarrowNumber(code) => sink.put_u16(at, code),
            TagValue::WideNumber(n) => sink.put_u32(at, n),
            TagValue::LocalString(s) => {
                let target = located(self.strings[s.index()].location, "string")?;
                sink.put_i32(at, relative(target, at))
            }
        }
    }

    /// Encode a feature reference at `at`, combined with `flags` (only
    /// `LAST` and `DIFFERENT_ROLE` are taken from the caller).
    fn encode_ref(&self, target: &FeatureRef, at: u32, flags: MemberFlags) -> Result<u32> {
        match target {
            FeatureRef::Local(fid) => {
                let f = &self.features[fid.index()];
                if !f.is_live() || f.location == 0 {
                    return Err(TileError::MissingFeature(format!(
                        "{:?} {} is referenced but not in the tile",
                        f.kind, f.id
                    )));
                }
                Ok((relative(f.location, at & !3) << 1) as u32 | flags.bits())
            }
            FeatureRef::Foreign(foreign) => {
                let mut word =
                    (foreign.tex << MemberFlags::TEX_SHIFT) | MemberFlags::FOREIGN.bits() | flags.bits();
                if foreign.tip_delta.is_some() {
                    word |= MemberFlags::DIFFERENT_TILE.bits();
                }
                Ok(word)
            }
        }
    }

    fn write_relation_table(
        &self,
        sink: &mut ByteSink<'_>,
        id: RelationTableId,
        at: u32,
    ) -> Result<()> {
        let entries = &self.relation_tables[id.index()].content.entries;
        let mut pos = at;
        for (i, entry) in entries.iter().enumerate() {
            let flags = if i + 1 == entries.len() {
                MemberFlags::LAST
            } else {
                MemberFlags::empty()
            };
            sink.put_u32(pos, self.encode_ref(entry, pos, flags)?)?;
            pos += 4;
            if let FeatureRef::Foreign(foreign) = entry
                && let Some(delta) = foreign.tip_delta
            {
                pos += sink.put_tip_delta(pos, delta)?;
            }
        }
        Ok(())
    }

    fn write_body_relations(
        &self,
        sink: &mut ByteSink<'_>,
        feature: &Feature,
        body: u32,
    ) -> Result<()> {
        if let Some(r) = feature.relations {
            let table = located(self.relation_tables[r.index()].location, "relation table")?;
            sink.put_i32(body - 4, relative(table, body - 4))?;
        }
        Ok(())
    }

    fn write_way_body(&self, sink: &mut ByteSink<'_>, feature: &Feature, way: &WayBody) -> Result<()> {
        let body = located(feature.body_location, "way body")?;
        self.write_body_relations(sink, feature, body)?;

        let mut top = body - if feature.relations.is_some() { 4 } else { 0 };
        for (i, node) in way.feature_nodes.iter().enumerate() {
            let entry = top - 4;
            let flags = if i + 1 == way.feature_nodes.len() {
                MemberFlags::LAST
            } else {
                MemberFlags::empty()
            };
            sink.put_u32(entry, self.encode_ref(node, entry, flags)?)?;
            top = entry;
            if let FeatureRef::Foreign(foreign) = node
                && let Some(delta) = foreign.tip_delta
            {
                top -= sink.put_tip_delta_below(entry, delta)?;
            }
        }

        let mut coords = Vec::new();
        encode_way_coords(feature.bounds(), &way.coords, &mut coords);
        sink.put(body, &coords)
    }

    fn write_relation_body(
        &self,
        sink: &mut ByteSink<'_>,
        feature: &Feature,
        rel: &RelationBody,
    ) -> Result<()> {
        let body = located(feature.body_location, "relation body")?;
        self.write_body_relations(sink, feature, body)?;

        if rel.members.is_empty() {
            return sink.put_u32(body, EMPTY_MEMBER_LIST);
        }
        let mut pos = body;
        let mut role = Role::EMPTY;
        for (i, member) in rel.members.iter().enumerate() {
            let mut flags = MemberFlags::empty();
            if i + 1 == rel.members.len() {
                flags |= MemberFlags::LAST;
            }
            let role_changed = member.role != role;
            if role_changed {
                flags |= MemberFlags::DIFFERENT_ROLE;
            }
            sink.put_u32(pos, self.encode_ref(&member.target, pos, flags)?)?;
            pos += 4;
            if let FeatureRef::Foreign(foreign) = member.target
                && let Some(delta) = foreign.tip_delta
            {
                pos += sink.put_tip_delta(pos, delta)?;
            }
            if role_changed {
                match member.role {
                    Role::Global(code) => {
                        sink.put_u16(pos, (code << 1) | 1)?;
                        pos += 2;
                    }
                    Role::Local(s) => {
                        let target = located(self.strings[s.index()].location, "role string")?;
                        sink.put_i32(pos, relative(target, pos) << 1)?;
                        pos += 4;
                    }
                }
                role = member.role;
            }
        }
        Ok(())
    }
}

fn put_bounds(sink: &mut ByteSink<'_>, at: u32, bounds: &Bounds) -> Result<()> {
    sink.put_i32(at, bounds.min_x)?;
    sink.put_i32(at + 4, bounds.min_y)?;
    sink.put_i32(at + 8, bounds.max_x)?;
    sink.put_i32(at + 12, bounds.max_y)
}
