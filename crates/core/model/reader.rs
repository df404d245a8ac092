//! Decoding a compact tile into a [`TileModel`].
//!
//! The reader walks the spatial indexes and decodes each feature it meets.
//! Shared elements are memoized by their offset, so a tag table used by a
//! thousand features is decoded once. Features referenced before their own
//! record is reached get a placeholder slot that is filled in later; a
//! placeholder that is never filled means the reference pointed at
//! something other than a feature.

use crate::codec::flags::{FeatureFlags, MemberFlags, TagFlags};
use crate::codec::{ByteView, DecodeCursor, read_string, read_tip_delta, read_tip_delta_below};
use crate::error::{Result, TileError};
use crate::model::element::{
    Feature, FeatureBody, FeatureId, FeatureKind, FeatureRef, FeatureState, GlobalTag,
    IndexChildren, IndexKind, IndexRoot, LocalTag, Member, RelationBody, RelationTable,
    RelationTableId, Role, StringId, TagTable, TagTableId, TagValue, TypedId, WayBody,
};
use crate::model::walk::{FeatureRecord, TileVisitor, walk_tile};
use crate::model::writer::EMPTY_MEMBER_LIST;
use crate::model::{Handle, TileModel};
use tilekit_types::{Bounds, Coordinate, Tile};

impl TileModel {
    /// Decode the compact tile `bytes` of `tile`.
    ///
    /// Every pointer is checked against the buffer; malformed input yields
    /// [`TileError::StructuralCorruption`] or [`TileError::UnexpectedEof`]
    /// and never panics.
    pub fn read_tile(tile: Tile, bytes: &[u8]) -> Result<TileModel> {
        let mut model = TileModel::new(tile);
        let view = ByteView::new(bytes);
        let mut reader = TileReader {
            view,
            model: &mut model,
            frames: Vec::new(),
            root: None,
        };
        walk_tile(&view, &mut reader)?;

        let unfilled = model.by_handle.iter().find_map(|(&offset, &handle)| match handle {
            Handle::Feature(f) if model.features[f.index()].state == FeatureState::Placeholder => {
                Some(offset)
            }
            _ => None,
        });
        if let Some(offset) = unfilled {
            return Err(TileError::corrupt(
                offset as usize,
                "reference to an offset that holds no feature",
            ));
        }
        log::debug!(
            "Read tile {}: {} features, {} tag tables, {} strings",
            tile,
            model.feature_count(),
            model.tag_table_count(),
            model.string_count()
        );
        Ok(model)
    }
}

struct Frame {
    bounds: Bounds,
    children: IndexChildren,
}

struct TileReader<'a, 'm> {
    view: ByteView<'a>,
    model: &'m mut TileModel,
    frames: Vec<Frame>,
    root: Option<(IndexKind, u32)>,
}

impl TileVisitor for TileReader<'_, '_> {
    fn begin_root(&mut self, index: IndexKind, index_bits: u32) -> Result<()> {
        self.root = Some((index, index_bits));
        Ok(())
    }

    fn begin_node(&mut self, _location: u32, bounds: Bounds, leaf: bool) -> Result<()> {
        self.frames.push(Frame {
            bounds,
            children: if leaf {
                IndexChildren::Leaf(Vec::new())
            } else {
                IndexChildren::Trunk(Vec::new())
            },
        });
        Ok(())
    }

    fn end_node(&mut self) -> Result<()> {
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        let node = self.model.push_index_node(frame.bounds, frame.children);
        match self.frames.last_mut() {
            Some(Frame {
                children: IndexChildren::Trunk(children),
                ..
            }) => children.push(node),
            Some(_) => {}
            None => {
                if let Some((index, index_bits)) = self.root.take() {
                    self.model.roots[index as usize].push(IndexRoot { index_bits, node });
                }
            }
        }
        Ok(())
    }

    fn feature(&mut self, record: &FeatureRecord) -> Result<()> {
        let fid = self.decode_feature(record)?;
        if let Some(Frame {
            children: IndexChildren::Leaf(features),
            ..
        }) = self.frames.last_mut()
        {
            features.push(fid);
        }
        Ok(())
    }
}

impl TileReader<'_, '_> {
    fn decode_feature(&mut self, record: &FeatureRecord) -> Result<FeatureId> {
        let stub = record.location;
        let id = (((record.flags_word >> 8) as u64) << 32) | self.view.u32_at(stub + 4)? as u64;
        let fid = self.claim_feature(stub, record.kind, id)?;
        let flags = record.flags();

        let tag_word = self.view.u32_at(stub + 8)?;
        let tag_pointer = self.view.pointer(stub + 8, (tag_word & !1) as i32)?;
        let tags = self.tag_table(tag_pointer, tag_word & 1 != 0)?;

        let body = match record.kind {
            FeatureKind::Node => None,
            _ => Some(self.view.pointer(stub + 12, self.view.i32_at(stub + 12)?)?),
        };
        let relations = if flags.contains(FeatureFlags::RELATION_MEMBER) {
            let at = match body {
                Some(body) => self.view.below(body, 4)?,
                None => stub + 12,
            };
            let table = self.view.pointer(at, self.view.i32_at(at)?)?;
            Some(self.relation_table(table)?)
        } else {
            None
        };

        let feature_body = match (record.kind, body) {
            (FeatureKind::Way, Some(body)) => {
                FeatureBody::Way(self.way_body(body, flags, record.geometry.bounds())?)
            }
            (FeatureKind::Relation, Some(body)) => FeatureBody::Relation(self.relation_body(body)?),
            _ => FeatureBody::None,
        };

        let to_corrupt = |e: TileError| TileError::corrupt(stub as usize, e.to_string());
        self.model.set_tags(fid, tags);
        self.model.set_relations(fid, relations);
        self.model
            .set_geometry(fid, record.geometry)
            .map_err(to_corrupt)?;
        self.model.set_body(fid, feature_body).map_err(to_corrupt)?;
        self.model.set_flags(fid, flags);
        Ok(fid)
    }

    /// Turn the slot for `stub` into a live feature, reusing a placeholder
    /// created by an earlier reference.
    fn claim_feature(&mut self, stub: u32, kind: FeatureKind, id: u64) -> Result<FeatureId> {
        let model = &mut *self.model;
        let empty = model.empty_tags();
        let typed = TypedId::new(kind, id);
        if model.by_id.contains_key(&typed) {
            return Err(TileError::corrupt(
                stub as usize,
                format!("{:?} {} stored twice", kind, id),
            ));
        }
        let fid = match model.by_handle.get(&stub) {
            Some(Handle::Feature(fid)) => {
                let slot = &mut model.features[fid.index()];
                if slot.state != FeatureState::Placeholder {
                    return Err(TileError::corrupt(stub as usize, "feature decoded twice"));
                }
                *slot = Feature::new(kind, id, empty);
                *fid
            }
            Some(_) => {
                return Err(TileError::corrupt(
                    stub as usize,
                    "offset holds two kinds of element",
                ));
            }
            None => {
                let fid = FeatureId(model.features.len() as u32);
                model.features.push(Feature::new(kind, id, empty));
                model.by_handle.insert(stub, Handle::Feature(fid));
                fid
            }
        };
        model.tag_tables[0].users += 1;
        model.by_id.insert(typed, fid);
        Ok(fid)
    }

    /// The feature whose stub is at `stub`, or a placeholder for it.
    fn feature_at(&mut self, stub: u32) -> Result<FeatureId> {
        let model = &mut *self.model;
        let empty = model.empty_tags();
        match model.by_handle.get(&stub) {
            Some(Handle::Feature(fid)) => Ok(*fid),
            Some(_) => Err(TileError::corrupt(
                stub as usize,
                "reference to an element that is not a feature",
            )),
            None => {
                let fid = FeatureId(model.features.len() as u32);
                let mut placeholder = Feature::new(FeatureKind::Node, 0, empty);
                placeholder.state = FeatureState::Placeholder;
                model.features.push(placeholder);
                model.by_handle.insert(stub, Handle::Feature(fid));
                Ok(fid)
            }
        }
    }

    fn string_at(&mut self, at: u32) -> Result<StringId> {
        match self.model.handle(at) {
            Some(Handle::String(id)) => return Ok(id),
            Some(_) => return Err(TileError::corrupt(at as usize, "expected a string")),
            None => {}
        }
        let text = read_string(&self.view, at)?;
        let id = self
            .model
            .add_string(&text)
            .map_err(|e| TileError::corrupt(at as usize, e.to_string()))?;
        self.model.by_handle.insert(at, Handle::String(id));
        Ok(id)
    }

    fn tag_value(&mut self, at: u32, flags: TagFlags) -> Result<TagValue> {
        let string = flags.contains(TagFlags::STRING);
        Ok(match (string, flags.contains(TagFlags::WIDE)) {
            (true, false) => TagValue::GlobalString(self.view.u16_at(at)?),
            (true, true) => {
                let target = self.view.pointer(at, self.view.i32_at(at)?)?;
                TagValue::LocalString(self.string_at(target)?)
            }
            (false, false) => TagValue::NarrowNumber(self.view.u16_at(at)?),
            (false, true) => TagValue::WideNumber(self.view.u32_at(at)?),
        })
    }

    fn tag_table(&mut self, pointer: u32, has_local: bool) -> Result<TagTableId> {
        match self.model.handle(pointer) {
            Some(Handle::TagTable(id)) => return Ok(id),
            Some(_) => return Err(TileError::corrupt(pointer as usize, "expected a tag table")),
            None => {}
        }

        let mut global = Vec::new();
        let mut at = pointer;
        loop {
            let key = self.view.u16_at(at)?;
            let flags = TagFlags::from_bits_truncate((key & 0b11) as u32);
            let code = (key & !TagFlags::GLOBAL_LAST) >> TagFlags::GLOBAL_KEY_SHIFT;
            let value = self.tag_value(at + 2, flags)?;
            if code != 0 {
                global.push(GlobalTag { key: code, value });
            }
            at += 2 + flags.value_size();
            if key & TagFlags::GLOBAL_LAST != 0 {
                break;
            }
        }

        let mut local = Vec::new();
        if has_local {
            let base = pointer & !3;
            let mut top = pointer;
            loop {
                let key_at = self.view.below(top, 4)?;
                let word = self.view.u32_at(key_at)?;
                let flags = TagFlags::from_bits_truncate(word & 0b11);
                let value_at = self.view.below(key_at, flags.value_size())?;
                let key_string = self
                    .view
                    .pointer(base, ((word & !0b111) as i32) >> 1)?;
                let key = self.string_at(key_string)?;
                let value = self.tag_value(value_at, flags)?;
                local.push(LocalTag { key, value });
                top = value_at;
                if word & TagFlags::LOCAL_LAST != 0 {
                    break;
                }
            }
        }

        let id = self
            .model
            .add_tag_table(TagTable { global, local })
            .map_err(|e| TileError::corrupt(pointer as usize, e.to_string()))?;
        self.model.by_handle.insert(pointer, Handle::TagTable(id));
        Ok(id)
    }

    /// Decode a feature reference word found at `at`. A following TIP delta
    /// is not consumed.
    fn feature_ref(&mut self, word: u32, at: u32) -> Result<FeatureRef> {
        if word & MemberFlags::FOREIGN.bits() != 0 {
            return Ok(FeatureRef::foreign(word >> MemberFlags::TEX_SHIFT, None));
        }
        let target = self
            .view
            .pointer(at & !3, ((word & !MemberFlags::LOCAL_MASK) as i32) >> 1)?;
        Ok(FeatureRef::Local(self.feature_at(target)?))
    }

    fn relation_table(&mut self, at: u32) -> Result<RelationTableId> {
        match self.model.handle(at) {
            Some(Handle::RelationTable(id)) => return Ok(id),
            Some(_) => return Err(TileError::corrupt(at as usize, "expected a relation table")),
            None => {}
        }
        let mut entries = Vec::new();
        let mut pos = at;
        loop {
            let word = self.view.u32_at(pos)?;
            let mut entry = self.feature_ref(word, pos)?;
            pos += 4;
            if let FeatureRef::Foreign(foreign) = &mut entry
                && word & MemberFlags::DIFFERENT_TILE.bits() != 0
            {
                let (delta, size) = read_tip_delta(&self.view, pos)?;
                foreign.tip_delta = Some(delta);
                pos += size;
            }
            entries.push(entry);
            if word & MemberFlags::LAST.bits() != 0 {
                break;
            }
        }
        let id = self
            .model
            .add_relation_table(RelationTable::new(entries))
            .map_err(|e| TileError::corrupt(at as usize, e.to_string()))?;
        self.model.by_handle.insert(at, Handle::RelationTable(id));
        Ok(id)
    }

    fn way_body(&mut self, body: u32, flags: FeatureFlags, bounds: Bounds) -> Result<WayBody> {
        let mut cursor = DecodeCursor::new(self.view.tail(body)?);
        let count = cursor.count(2)?;
        let mut coords = Vec::with_capacity(count);
        let (mut x, mut y) = (bounds.min_x as i64, bounds.min_y as i64);
        for _ in 0..count {
            let dx = cursor.signed_varint()?;
            let dy = cursor.signed_varint()?;
            x = x.saturating_add(dx);
            y = y.saturating_add(dy);
            let xy = i32::try_from(x)
                .ok()
                .zip(i32::try_from(y).ok())
                .map(|(x, y)| Coordinate::new(x, y))
                .ok_or_else(|| {
                    TileError::corrupt(body as usize + cursor.position(), "coordinate overflow")
                })?;
            coords.push(xy);
        }

        let mut feature_nodes = Vec::new();
        if flags.contains(FeatureFlags::WAYNODE) {
            let mut top = if flags.contains(FeatureFlags::RELATION_MEMBER) {
                self.view.below(body, 4)?
            } else {
                body
            };
            loop {
                let entry_at = self.view.below(top, 4)?;
                let word = self.view.u32_at(entry_at)?;
                let mut entry = self.feature_ref(word, entry_at)?;
                top = entry_at;
                if let FeatureRef::Foreign(foreign) = &mut entry
                    && word & MemberFlags::DIFFERENT_TILE.bits() != 0
                {
                    let (delta, size) = read_tip_delta_below(&self.view, entry_at)?;
                    foreign.tip_delta = Some(delta);
                    top = entry_at - size;
                }
                feature_nodes.push(entry);
                if word & MemberFlags::LAST.bits() != 0 {
                    break;
                }
            }
        }
        Ok(WayBody {
            coords,
            feature_nodes,
        })
    }

    fn relation_body(&mut self, body: u32) -> Result<RelationBody> {
        let mut members = Vec::new();
        if self.view.u32_at(body)? == EMPTY_MEMBER_LIST {
            return Ok(RelationBody { members });
        }
        let mut pos = body;
        let mut role = Role::EMPTY;
        loop {
            let word = self.view.u32_at(pos)?;
            let mut target = self.feature_ref(word, pos)?;
            pos += 4;
            if let FeatureRef::Foreign(foreign) = &mut target
                && word & MemberFlags::DIFFERENT_TILE.bits() != 0
            {
                let (delta, size) = read_tip_delta(&self.view, pos)?;
                foreign.tip_delta = Some(delta);
                pos += size;
            }
            if word & MemberFlags::DIFFERENT_ROLE.bits() != 0 {
                let raw = self.view.u16_at(pos)?;
                if raw & 1 != 0 {
                    role = Role::Global(raw >> 1);
                    pos += 2;
                } else {
                    let delta = self.view.i32_at(pos)? >> 1;
                    let string = self.view.pointer(pos, delta)?;
                    role = Role::Local(self.string_at(string)?);
                    pos += 4;
                }
            }
            members.push(Member { target, role });
            if word & MemberFlags::LAST.bits() != 0 {
                break;
            }
        }
        Ok(RelationBody { members })
    }
}
