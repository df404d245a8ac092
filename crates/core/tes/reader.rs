use crate::codec::DecodeCursor;
use crate::codec::flags::TagFlags;
use crate::codec::varint::zigzag_decode;
use crate::error::{Result, TileError};
use crate::model::element::MAX_FEATURE_ID;
use crate::model::{
    FeatureBody, FeatureId, FeatureKind, FeatureRef, Geometry, GlobalTag, LocalTag, MAX_ROLE_CODE,
    Member, RelationTable, RelationTableId, Role, StringId, TagTable, TagTableId, TagValue,
    TileModel, TypedId,
};
use crate::tes::flags::BodyFlags;
use tilekit_types::{Bounds, Coordinate, Tile};

/// Applies TES streams to tile models.
pub struct TesReader;

impl TesReader {
    /// Decode a stream into a fresh model. Fails with
    /// [`TileError::MissingFeature`] if the stream lists unchanged features,
    /// since a fresh model has no copy of them.
    pub fn read(tile: Tile, bytes: &[u8]) -> Result<TileModel> {
        let mut model = TileModel::new(tile);
        Self::read_into(&mut model, bytes)?;
        Ok(model)
    }

    /// Apply a stream to `model`: changed features are created or
    /// overwritten, unchanged ones must already exist, removed ones are
    /// dropped. The model's spatial index is cleared.
    pub fn read_into(model: &mut TileModel, bytes: &[u8]) -> Result<()> {
        model.clear_index();
        let mut decoder = Decoder {
            cursor: DecodeCursor::new(bytes),
            model,
            features: Vec::new(),
            strings: Vec::new(),
            tags: Vec::new(),
            relations: Vec::new(),
        };
        decoder.run()
    }
}

struct Decoder<'a, 'm> {
    cursor: DecodeCursor<'a>,
    model: &'m mut TileModel,
    /// Feature numbers (1-based) to model features, with their changed mark.
    features: Vec<(FeatureId, bool)>,
    strings: Vec<StringId>,
    tags: Vec<TagTableId>,
    relations: Vec<RelationTableId>,
}

impl Decoder<'_, '_> {
    fn corrupt(&self, reason: impl Into<String>) -> TileError {
        TileError::corrupt(self.cursor.position(), reason)
    }

    fn run(&mut self) -> Result<()> {
        self.read_index()?;

        let count = self.cursor.count(1)?;
        for _ in 0..count {
            let text = self.inline_string()?;
            self.strings.push(text);
        }
        let count = self.cursor.count(1)?;
        for _ in 0..count {
            let table = self.tag_table()?;
            self.tags.push(table);
        }
        let count = self.cursor.count(1)?;
        for _ in 0..count {
            let table = self.relation_table()?;
            self.relations.push(table);
        }

        let changed: Vec<FeatureId> = self
            .features
            .iter()
            .filter(|(_, changed)| *changed)
            .map(|(fid, _)| *fid)
            .collect();
        let tile_bounds = self.model.tile().bounds();
        let tile_min = Coordinate::new(tile_bounds.min_x, tile_bounds.min_y);
        let mut cursor = tile_min;
        let mut group = None;
        for fid in changed {
            let kind = self.model.feature(fid).kind;
            if group != Some(kind) {
                group = Some(kind);
                cursor = tile_min;
            }
            self.body(fid, &mut cursor)?;
        }

        self.read_removed()?;
        if !self.cursor.is_at_end() {
            return Err(self.corrupt("trailing bytes after TES stream"));
        }
        log::debug!(
            "Applied TES to tile {}: {} features, {} shared strings, {} shared tag tables",
            self.model.tile(),
            self.features.len(),
            self.strings.len(),
            self.tags.len()
        );
        Ok(())
    }

    fn read_index(&mut self) -> Result<()> {
        let total = self.cursor.count(1)?;
        let mut kinds = FeatureKind::ALL.iter().copied();
        let mut kind = kinds.next();
        let mut prev = -1i64;
        while self.features.len() < total {
            let value = self.cursor.varint()?;
            if value == 0 {
                kind = kinds.next();
                prev = -1;
                continue;
            }
            let Some(kind) = kind else {
                return Err(self.corrupt("feature index has too many type steps"));
            };
            let id = prev.saturating_add(zigzag_decode(value >> 1));
            if id <= prev || id as u64 > MAX_FEATURE_ID {
                return Err(self.corrupt(format!("feature id {} out of order or range", id)));
            }
            prev = id;
            let changed = value & 1 != 0;
            let fid = if changed {
                self.model
                    .feature_or_insert(kind, id as u64)
                    .map_err(|e| self.corrupt(e.to_string()))?
            } else {
                self.model.feature_by_id(kind, id as u64).ok_or_else(|| {
                    TileError::MissingFeature(format!(
                        "unchanged {:?} {} is not in the target model",
                        kind, id
                    ))
                })?
            };
            self.model.set_changed(fid, changed);
            self.features.push((fid, changed));
        }
        Ok(())
    }

    fn read_removed(&mut self) -> Result<()> {
        let count = self.cursor.count(1)?;
        let mut prev = -1i64;
        for _ in 0..count {
            let value = self.cursor.varint()?;
            let kind = match value & 0b11 {
                0 => FeatureKind::Node,
                1 => FeatureKind::Way,
                2 => FeatureKind::Relation,
                _ => return Err(self.corrupt("bad feature type in removed list")),
            };
            let id = prev.saturating_add(zigzag_decode(value >> 2));
            if id < 0 || id as u64 > MAX_FEATURE_ID {
                return Err(self.corrupt(format!("removed feature id {} out of range", id)));
            }
            prev = id;
            if !self.model.remove_feature(kind, id as u64) {
                self.model.record_removed(TypedId::new(kind, id as u64));
            }
        }
        Ok(())
    }

    fn inline_string(&mut self) -> Result<StringId> {
        let len = self.cursor.count(1)?;
        let bytes = self.cursor.bytes(len)?;
        let text =
            std::str::from_utf8(bytes).map_err(|_| self.corrupt("string is not valid UTF-8"))?;
        self.model
            .add_string(text)
            .map_err(|e| self.corrupt(e.to_string()))
    }

    /// A string given by shared number, or inline after a zero.
    fn string_ref(&mut self) -> Result<StringId> {
        match self.cursor.varint()? {
            0 => self.inline_string(),
            n => self.shared_string(n),
        }
    }

    fn shared_string(&self, n: u64) -> Result<StringId> {
        self.strings
            .get((n as usize).wrapping_sub(1))
            .copied()
            .ok_or_else(|| self.corrupt(format!("no shared string #{}", n)))
    }

    fn value(&mut self, flags: TagFlags) -> Result<TagValue> {
        let narrow = |d: &Self, v: u32| {
            u16::try_from(v).map_err(|_| d.corrupt(format!("value {} exceeds 16 bits", v)))
        };
        Ok(match (flags.contains(TagFlags::STRING), flags.contains(TagFlags::WIDE)) {
            (true, true) => TagValue::LocalString(self.string_ref()?),
            (true, false) => {
                let v = self.cursor.varint_u32()?;
                TagValue::GlobalString(narrow(self, v)?)
            }
            (false, false) => {
                let v = self.cursor.varint_u32()?;
                TagValue::NarrowNumber(narrow(self, v)?)
            }
            (false, true) => TagValue::WideNumber(self.cursor.varint_u32()?),
        })
    }

    fn tag_table(&mut self) -> Result<TagTableId> {
        let header = self.cursor.varint()?;
        let global_count = (header >> 1) as usize;
        if global_count > self.cursor.remaining() {
            return Err(self.corrupt("global tag count exceeds stream"));
        }
        let local_count = if header & 1 != 0 {
            self.cursor.count(2)?
        } else {
            0
        };

        let mut local = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            let word = self.cursor.varint()?;
            let flags = TagFlags::from_bits_truncate((word & 0b11) as u32);
            let key = match word >> 2 {
                0 => self.inline_string()?,
                n => self.shared_string(n)?,
            };
            let value = self.value(flags)?;
            local.push(LocalTag { key, value });
        }

        let mut global = Vec::with_capacity(global_count);
        let mut key = 0u64;
        for _ in 0..global_count {
            let word = self.cursor.varint()?;
            key = key.saturating_add(word >> 2);
            let code = u16::try_from(key)
                .ok()
                .filter(|&k| k <= TagFlags::MAX_GLOBAL_KEY)
                .ok_or_else(|| self.corrupt(format!("global key {} out of range", key)))?;
            let flags = TagFlags::from_bits_truncate((word & 0b11) as u32);
            let value = self.value(flags)?;
            global.push(GlobalTag { key: code, value });
        }

        self.model
            .add_tag_table(TagTable { global, local })
            .map_err(|e| self.corrupt(e.to_string()))
    }

    fn feature_number(&self, n: u64) -> Result<FeatureId> {
        self.features
            .get((n as usize).wrapping_sub(1))
            .map(|(fid, _)| *fid)
            .ok_or_else(|| self.corrupt(format!("no feature #{}", n)))
    }

    fn tip_delta(&mut self) -> Result<i32> {
        let delta = self.cursor.signed_varint()?;
        i32::try_from(delta).map_err(|_| self.corrupt("TIP delta exceeds 32 bits"))
    }

    fn tex(&self, value: u64) -> Result<u32> {
        u32::try_from(value).map_err(|_| self.corrupt("export index exceeds 32 bits"))
    }

    fn relation_table(&mut self) -> Result<RelationTableId> {
        let count = self.cursor.count(1)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let value = self.cursor.varint()?;
            entries.push(if value & 1 == 0 {
                FeatureRef::Local(self.feature_number(value >> 1)?)
            } else {
                let tex = self.tex(value >> 2)?;
                let delta = if value & 0b10 != 0 {
                    Some(self.tip_delta()?)
                } else {
                    None
                };
                FeatureRef::foreign(tex, delta)
            });
        }
        self.model
            .add_relation_table(RelationTable::new(entries))
            .map_err(|e| self.corrupt(e.to_string()))
    }

    fn body(&mut self, fid: FeatureId, cursor: &mut Coordinate) -> Result<()> {
        let flags = BodyFlags::from_bits_retain(self.cursor.u8()?);
        let kind = self.model.feature(fid).kind;

        if flags.contains(BodyFlags::TAGS_CHANGED) {
            let tags = if flags.contains(BodyFlags::SHARED_TAGS) {
                let n = self.cursor.varint()?;
                self.tags
                    .get((n as usize).wrapping_sub(1))
                    .copied()
                    .ok_or_else(|| self.corrupt(format!("no shared tag table #{}", n)))?
            } else {
                self.tag_table()?
            };
            self.model.set_tags(fid, tags);
        }

        if flags.contains(BodyFlags::RELATIONS_CHANGED) {
            let relations = match self.cursor.varint()? {
                0 => None,
                1 => Some(self.relation_table()?),
                r if r & 1 == 0 => Some(
                    self.relations
                        .get(((r >> 1) as usize).wrapping_sub(1))
                        .copied()
                        .ok_or_else(|| {
                            self.corrupt(format!("no shared relation table #{}", r >> 1))
                        })?,
                ),
                r => return Err(self.corrupt(format!("bad relation reference {}", r))),
            };
            self.model.set_relations(fid, relations);
        }

        let mut body = self.model.feature(fid).body.clone();
        if flags.contains(BodyFlags::GEOMETRY_CHANGED) {
            let geometry = if kind == FeatureKind::Node {
                let xy = self.coordinate_after(*cursor)?;
                *cursor = xy;
                Geometry::Point(xy)
            } else {
                let min = self.coordinate_after(*cursor)?;
                let width = self.cursor.signed_varint()?;
                let height = self.cursor.signed_varint()?;
                let max_x = i32::try_from((min.x as i64).saturating_add(width));
                let max_y = i32::try_from((min.y as i64).saturating_add(height));
                let (Ok(max_x), Ok(max_y)) = (max_x, max_y) else {
                    return Err(self.corrupt("bounding box overflows"));
                };
                *cursor = min;
                Geometry::Bounded(Bounds::new(min.x, min.y, max_x, max_y))
            };
            if let FeatureBody::Way(way) = &mut body {
                way.coords = self.way_coords(geometry.bounds())?;
            }
            self.model
                .set_geometry(fid, geometry)
                .map_err(|e| self.corrupt(e.to_string()))?;
        }

        if flags.contains(BodyFlags::MEMBERS_CHANGED) {
            match &mut body {
                FeatureBody::Way(way) => way.feature_nodes = self.feature_nodes()?,
                FeatureBody::Relation(rel) => rel.members = self.members()?,
                FeatureBody::None => {}
            }
        }
        if kind != FeatureKind::Node {
            self.model
                .set_body(fid, body)
                .map_err(|e| self.corrupt(e.to_string()))?;
        }
        self.model.set_flags(fid, flags.feature_flags(kind));
        Ok(())
    }

    fn coordinate_after(&mut self, from: Coordinate) -> Result<Coordinate> {
        let x = (from.x as i64).saturating_add(self.cursor.signed_varint()?);
        let y = (from.y as i64).saturating_add(self.cursor.signed_varint()?);
        match (i32::try_from(x), i32::try_from(y)) {
            (Ok(x), Ok(y)) => Ok(Coordinate::new(x, y)),
            _ => Err(self.corrupt("coordinate overflows")),
        }
    }

    fn way_coords(&mut self, bounds: Bounds) -> Result<Vec<Coordinate>> {
        let count = self.cursor.count(2)?;
        let mut coords = Vec::with_capacity(count);
        let mut at = Coordinate::new(bounds.min_x, bounds.min_y);
        for _ in 0..count {
            at = self.coordinate_after(at)?;
            coords.push(at);
        }
        Ok(coords)
    }

    fn feature_nodes(&mut self) -> Result<Vec<FeatureRef>> {
        let count = self.cursor.count(1)?;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            let value = self.cursor.varint()?;
            nodes.push(if value & 1 == 0 {
                FeatureRef::Local(self.feature_number(value >> 1)?)
            } else {
                let tex = self.tex(value >> 2)?;
                let delta = if value & 0b10 != 0 {
                    Some(self.tip_delta()?)
                } else {
                    None
                };
                FeatureRef::foreign(tex, delta)
            });
        }
        Ok(nodes)
    }

    fn members(&mut self) -> Result<Vec<Member>> {
        let count = self.cursor.count(1)?;
        let mut members = Vec::with_capacity(count);
        let mut role = Role::EMPTY;
        for _ in 0..count {
            let value = self.cursor.varint()?;
            let role_changed = value & 0b10 != 0;
            let target = if value & 1 == 0 {
                FeatureRef::Local(self.feature_number(value >> 2)?)
            } else {
                let tex = self.tex(value >> 3)?;
                let delta = if value & 0b100 != 0 {
                    Some(self.tip_delta()?)
                } else {
                    None
                };
                FeatureRef::foreign(tex, delta)
            };
            if role_changed {
                let raw = self.cursor.varint()?;
                role = if raw & 1 != 0 {
                    let code = u16::try_from(raw >> 1)
                        .ok()
                        .filter(|&c| c <= MAX_ROLE_CODE)
                        .ok_or_else(|| self.corrupt("role code out of range"))?;
                    Role::Global(code)
                } else if raw == 0 {
                    Role::Local(self.inline_string()?)
                } else {
                    Role::Local(self.shared_string(raw >> 1)?)
                };
            }
            members.push(Member { target, role });
        }
        Ok(members)
    }
}
