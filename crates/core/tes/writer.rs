use crate::codec::varint::{encode_signed_varint, encode_varint, zigzag_encode};
use crate::config::TesSettings;
use crate::error::{Result, TileError};
use crate::model::element::encode_way_coords;
use crate::model::{
    Feature, FeatureBody, FeatureId, FeatureKind, FeatureRef, Geometry, RelationTable,
    RelationTableId, Role, StringId, TagTable, TagTableId, TagValue, TileModel, TypedId,
};
use crate::tes::flags::BodyFlags;
use crate::tes::shared::{ONE_BYTE_GROUP, ONE_BYTE_GROUP_SHIFTED, SharedSection};
use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tilekit_types::Coordinate;

/// Encodes a [`TileModel`] as a TES stream.
///
/// # Examples
///
/// ```
/// use tilekit::config::TesSettings;
/// use tilekit::model::TileModel;
/// use tilekit::tes::{TesReader, TesWriter};
/// use tilekit::types::{Coordinate, Tile};
///
/// let mut model = TileModel::new(Tile::ROOT);
/// let tags = model.empty_tags();
/// model.add_node(7, Coordinate::new(100, 200), tags)?;
///
/// let bytes = TesWriter::new(&model, &TesSettings::default()).write()?;
/// let back = TesReader::read(Tile::ROOT, &bytes)?;
/// assert_eq!(back.feature_count(), 1);
/// # Ok::<(), tilekit::TileError>(())
/// ```
pub struct TesWriter<'a> {
    model: &'a TileModel,
    settings: &'a TesSettings,
}

/// Everything a body needs to refer to other elements by number.
struct Numbering {
    features: FxHashMap<FeatureId, u32>,
    strings: SharedSection,
    tags: SharedSection,
    relations: SharedSection,
}

impl<'a> TesWriter<'a> {
    pub fn new(model: &'a TileModel, settings: &'a TesSettings) -> Self {
        Self { model, settings }
    }

    pub fn write(&self) -> Result<Bytes> {
        let model = self.model;
        let mut entries: Vec<(FeatureId, &Feature)> = model.features().collect();
        entries.sort_by_key(|(_, f)| f.typed_id());
        let changed: Vec<(FeatureId, &Feature)> =
            entries.iter().copied().filter(|(_, f)| f.changed).collect();

        let numbering = self.number_elements(&entries, &changed);
        let mut buf = BytesMut::new();

        self.write_index(&entries, &mut buf);

        encode_varint(numbering.strings.len() as u64, &mut buf);
        for &id in numbering.strings.order() {
            put_inline_string(model.string(StringId(id)), &mut buf);
        }
        encode_varint(numbering.tags.len() as u64, &mut buf);
        for &id in numbering.tags.order() {
            let table = model.tag_table(TagTableId(id));
            self.write_tag_table(table, &numbering, &mut buf);
        }
        encode_varint(numbering.relations.len() as u64, &mut buf);
        for &id in numbering.relations.order() {
            let table = model.relation_table(RelationTableId(id));
            write_relation_table(table, &numbering, &mut buf)?;
        }

        let tile_min = {
            let b = model.tile().bounds();
            Coordinate::new(b.min_x, b.min_y)
        };
        let mut cursor = tile_min;
        let mut group = None;
        for &(fid, feature) in &changed {
            if group != Some(feature.kind) {
                group = Some(feature.kind);
                cursor = tile_min;
            }
            self.write_body(fid, feature, &numbering, &mut cursor, &mut buf)?;
        }

        let mut removed: Vec<TypedId> = model.removed().to_vec();
        removed.sort();
        removed.dedup();
        removed.retain(|t| model.feature_by_id(t.kind, t.id).is_none());
        encode_varint(removed.len() as u64, &mut buf);
        let mut prev = -1i64;
        for typed in removed {
            let delta = zigzag_encode(typed.id as i64 - prev);
            encode_varint((delta << 2) | typed.kind as u64, &mut buf);
            prev = typed.id as i64;
        }

        log::debug!(
            "Wrote TES for tile {}: {} features ({} changed), {} shared strings, {} shared tag tables, {} bytes",
            model.tile(),
            entries.len(),
            changed.len(),
            numbering.strings.len(),
            numbering.tags.len(),
            buf.len()
        );
        Ok(buf.freeze())
    }

    /// Count how often each element would be written and pick the shared
    /// ones.
    fn number_elements(
        &self,
        entries: &[(FeatureId, &Feature)],
        changed: &[(FeatureId, &Feature)],
    ) -> Numbering {
        let model = self.model;
        let features = entries
            .iter()
            .enumerate()
            .map(|(i, (fid, _))| (*fid, i as u32 + 1))
            .collect();

        let mut tag_usage: FxHashMap<u32, u32> = FxHashMap::default();
        let mut relation_usage: FxHashMap<u32, u32> = FxHashMap::default();
        for (_, f) in changed {
            *tag_usage.entry(f.tags.0).or_default() += 1;
            if let Some(r) = f.relations {
                *relation_usage.entry(r.0).or_default() += 1;
            }
        }
        let tags = SharedSection::build(
            &tag_usage,
            self.settings.tag_table_threshold,
            ONE_BYTE_GROUP,
            |id| tag_table_content(model, model.tag_table(TagTableId(id))),
        );
        let relations = SharedSection::build(
            &relation_usage,
            self.settings.relation_table_threshold,
            ONE_BYTE_GROUP_SHIFTED,
            |id| relation_table_content(model, model.relation_table(RelationTableId(id))),
        );

        // A shared table writes its strings once; an inline one once per use.
        let mut string_usage: FxHashMap<u32, u32> = FxHashMap::default();
        for &id in tags.order() {
            for s in model.tag_table(TagTableId(id)).strings() {
                *string_usage.entry(s.0).or_default() += 1;
            }
        }
        for (_, f) in changed {
            if tags.number_of(f.tags.0).is_none() {
                for s in model.tag_table(f.tags).strings() {
                    *string_usage.entry(s.0).or_default() += 1;
                }
            }
            if let Some(rel) = f.relation() {
                let mut role = Role::EMPTY;
                for member in &rel.members {
                    if member.role != role {
                        if let Role::Local(s) = member.role {
                            *string_usage.entry(s.0).or_default() += 1;
                        }
                        role = member.role;
                    }
                }
            }
        }
        let strings = SharedSection::build(
            &string_usage,
            self.settings.string_threshold,
            ONE_BYTE_GROUP,
            |id| model.string(StringId(id)).as_bytes(),
        );

        Numbering {
            features,
            strings,
            tags,
            relations,
        }
    }

    fn write_index(&self, entries: &[(FeatureId, &Feature)], buf: &mut BytesMut) {
        encode_varint(entries.len() as u64, buf);
        let mut kind = FeatureKind::Node;
        let mut prev = -1i64;
        for (_, f) in entries {
            while kind != f.kind {
                buf.put_u8(0);
                kind = match kind {
                    FeatureKind::Node => FeatureKind::Way,
                    _ => FeatureKind::Relation,
                };
                prev = -1;
            }
            let delta = zigzag_encode(f.id as i64 - prev);
            encode_varint((delta << 1) | f.changed as u64, buf);
            prev = f.id as i64;
        }
    }

    fn put_string_ref(&self, id: StringId, numbering: &Numbering, buf: &mut BytesMut) {
        match numbering.strings.number_of(id.0) {
            Some(n) => encode_varint(n as u64, buf),
            None => {
                buf.put_u8(0);
                put_inline_string(self.model.string(id), buf);
            }
        }
    }

    fn put_value(&self, value: TagValue, numbering: &Numbering, buf: &mut BytesMut) {
        match value {
            TagValue::GlobalString(code) | TagValue::NarrowNumber(code) => {
                encode_varint(code as u64, buf)
            }
            TagValue::WideNumber(n) => encode_varint(n as u64, buf),
            TagValue::LocalString(s) => self.put_string_ref(s, numbering, buf),
        }
    }

    fn write_tag_table(&self, table: &TagTable, numbering: &Numbering, buf: &mut BytesMut) {
        let header = ((table.global.len() as u64) << 1) | table.has_local() as u64;
        encode_varint(header, buf);
        if table.has_local() {
            encode_varint(table.local.len() as u64, buf);
        }
        for tag in &table.local {
            let flags = tag.value.flags().bits() as u64;
            match numbering.strings.number_of(tag.key.0) {
                Some(n) => encode_varint(((n as u64) << 2) | flags, buf),
                None => {
                    encode_varint(flags, buf);
                    put_inline_string(self.model.string(tag.key), buf);
                }
            }
            self.put_value(tag.value, numbering, buf);
        }
        let mut prev = 0u16;
        for tag in &table.global {
            let delta = (tag.key - prev) as u64;
            encode_varint((delta << 2) | tag.value.flags().bits() as u64, buf);
            self.put_value(tag.value, numbering, buf);
            prev = tag.key;
        }
    }

    fn write_body(
        &self,
        fid: FeatureId,
        feature: &Feature,
        numbering: &Numbering,
        cursor: &mut Coordinate,
        buf: &mut BytesMut,
    ) -> Result<()> {
        let shared_tags = numbering.tags.number_of(feature.tags.0);
        let mut flags = BodyFlags::from_feature(feature.kind, feature.flags)
            | BodyFlags::TAGS_CHANGED
            | BodyFlags::RELATIONS_CHANGED
            | BodyFlags::GEOMETRY_CHANGED;
        if feature.kind != FeatureKind::Node {
            flags |= BodyFlags::MEMBERS_CHANGED;
        }
        if shared_tags.is_some() {
            flags |= BodyFlags::SHARED_TAGS;
        }
        buf.put_u8(flags.bits());

        match shared_tags {
            Some(n) => encode_varint(n as u64, buf),
            None => self.write_tag_table(self.model.tag_table(feature.tags), numbering, buf),
        }

        match feature.relations {
            None => encode_varint(0, buf),
            Some(r) => match numbering.relations.number_of(r.0) {
                Some(k) => encode_varint((k as u64) << 1, buf),
                None => {
                    encode_varint(1, buf);
                    write_relation_table(self.model.relation_table(r), numbering, buf)?;
                }
            },
        }

        match feature.geometry {
            Geometry::Point(xy) => {
                encode_signed_varint(xy.x as i64 - cursor.x as i64, buf);
                encode_signed_varint(xy.y as i64 - cursor.y as i64, buf);
                *cursor = xy;
            }
            Geometry::Bounded(bounds) => {
                encode_signed_varint(bounds.min_x as i64 - cursor.x as i64, buf);
                encode_signed_varint(bounds.min_y as i64 - cursor.y as i64, buf);
                encode_signed_varint(bounds.width(), buf);
                encode_signed_varint(bounds.height(), buf);
                *cursor = Coordinate::new(bounds.min_x, bounds.min_y);
            }
        }

        match &feature.body {
            FeatureBody::None => {}
            FeatureBody::Way(way) => {
                let mut coords = Vec::new();
                encode_way_coords(feature.bounds(), &way.coords, &mut coords);
                buf.put_slice(&coords);

                encode_varint(way.feature_nodes.len() as u64, buf);
                for node in &way.feature_nodes {
                    match node {
                        FeatureRef::Local(target) => {
                            encode_varint((feature_number(numbering, *target, fid)? as u64) << 1, buf)
                        }
                        FeatureRef::Foreign(foreign) => {
                            let cross = foreign.tip_delta.is_some() as u64;
                            encode_varint(((foreign.tex as u64) << 2) | (cross << 1) | 1, buf);
                            if let Some(delta) = foreign.tip_delta {
                                encode_signed_varint(delta as i64, buf);
                            }
                        }
                    }
                }
            }
            FeatureBody::Relation(rel) => {
                encode_varint(rel.members.len() as u64, buf);
                let mut role = Role::EMPTY;
                for member in &rel.members {
                    let role_changed = (member.role != role) as u64;
                    match member.target {
                        FeatureRef::Local(target) => {
                            let n = feature_number(numbering, target, fid)? as u64;
                            encode_varint((n << 2) | (role_changed << 1), buf);
                        }
                        FeatureRef::Foreign(foreign) => {
                            let cross = foreign.tip_delta.is_some() as u64;
                            encode_varint(
                                ((foreign.tex as u64) << 3) | (cross << 2) | (role_changed << 1) | 1,
                                buf,
                            );
                            if let Some(delta) = foreign.tip_delta {
                                encode_signed_varint(delta as i64, buf);
                            }
                        }
                    }
                    if role_changed == 1 {
                        match member.role {
                            Role::Global(code) => encode_varint(((code as u64) << 1) | 1, buf),
                            Role::Local(s) => match numbering.strings.number_of(s.0) {
                                Some(n) => encode_varint((n as u64) << 1, buf),
                                None => {
                                    encode_varint(0, buf);
                                    put_inline_string(self.model.string(s), buf);
                                }
                            },
                        }
                        role = member.role;
                    }
                }
            }
        }
        Ok(())
    }
}

fn feature_number(numbering: &Numbering, target: FeatureId, from: FeatureId) -> Result<u32> {
    numbering.features.get(&target).copied().ok_or_else(|| {
        TileError::MissingFeature(format!(
            "feature #{} refers to feature #{} which is not in the model",
            from.0, target.0
        ))
    })
}

/// Sort key of a tag table that spells out its strings instead of their
/// arena ids.
fn tag_table_content(model: &TileModel, table: &TagTable) -> Vec<u8> {
    let mut key = Vec::new();
    for tag in &table.global {
        key.put_u8(0);
        key.put_u16(tag.key);
        put_value_content(model, tag.value, &mut key);
    }
    for tag in &table.local {
        key.put_u8(1);
        put_text_content(model.string(tag.key), &mut key);
        put_value_content(model, tag.value, &mut key);
    }
    key
}

fn put_value_content(model: &TileModel, value: TagValue, key: &mut Vec<u8>) {
    match value {
        TagValue::GlobalString(code) => {
            key.put_u8(0);
            key.put_u32(code.into());
        }
        TagValue::LocalString(s) => {
            key.put_u8(1);
            put_text_content(model.string(s), key);
        }
        TagValue::NarrowNumber(n) => {
            key.put_u8(2);
            key.put_u32(n.into());
        }
        TagValue::WideNumber(n) => {
            key.put_u8(3);
            key.put_u32(n);
        }
    }
}

fn put_text_content(text: &str, key: &mut Vec<u8>) {
    key.put_u32(text.len() as u32);
    key.put_slice(text.as_bytes());
}

/// Sort key of a relation table: local entries by typed id, foreign ones by
/// export index and TIP delta.
fn relation_table_content(model: &TileModel, table: &RelationTable) -> Vec<u8> {
    let mut key = Vec::new();
    for entry in &table.entries {
        match entry {
            FeatureRef::Local(fid) => {
                let typed = model.feature(*fid).typed_id();
                key.put_u8(0);
                key.put_u8(typed.kind as u8);
                key.put_u64(typed.id);
            }
            FeatureRef::Foreign(foreign) => {
                key.put_u8(1);
                key.put_u32(foreign.tex);
                match foreign.tip_delta {
                    Some(d) => {
                        key.put_u8(1);
                        key.put_u32(d as u32 ^ 0x8000_0000);
                    }
                    None => key.put_u8(0),
                }
            }
        }
    }
    key
}

fn put_inline_string(text: &str, buf: &mut BytesMut) {
    encode_varint(text.len() as u64, buf);
    buf.put_slice(text.as_bytes());
}

fn write_relation_table(
    table: &RelationTable,
    numbering: &Numbering,
    buf: &mut BytesMut,
) -> Result<()> {
    encode_varint(table.entries.len() as u64, buf);
    for entry in &table.entries {
        match entry {
            FeatureRef::Local(target) => {
                let n = numbering.features.get(target).copied().ok_or_else(|| {
                    TileError::MissingFeature(format!(
                        "relation table refers to feature #{} which is not in the model",
                        target.0
                    ))
                })?;
                encode_varint((n as u64) << 1, buf);
            }
            FeatureRef::Foreign(foreign) => {
                let cross = foreign.tip_delta.is_some() as u64;
                encode_varint(((foreign.tex as u64) << 2) | (cross << 1) | 1, buf);
                if let Some(delta) = foreign.tip_delta {
                    encode_signed_varint(delta as i64, buf);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GlobalTag;
    use tilekit_types::{Bounds, Tile};

    fn table(model: &mut TileModel, key: u16) -> TagTableId {
        model
            .add_tag_table(TagTable::new(
                vec![GlobalTag {
                    key,
                    value: TagValue::NarrowNumber(1),
                }],
                Vec::new(),
            ))
            .unwrap()
    }

    #[test]
    fn test_index_steps_between_types() {
        let mut model = TileModel::new(Tile::ROOT);
        let empty = model.empty_tags();
        model.add_node(3, Coordinate::new(0, 0), empty).unwrap();
        model
            .add_way(1, vec![Coordinate::new(0, 0), Coordinate::new(5, 5)], empty)
            .unwrap();
        let bytes = TesWriter::new(&model, &TesSettings::default())
            .write()
            .unwrap();
        // count, node 3 changed, step, way 1 changed
        assert_eq!(&bytes[..4], &[2, 17, 0, 9]);
    }

    #[test]
    fn test_only_busy_tables_are_shared() {
        let mut model = TileModel::new(Tile::ROOT);
        let busy = table(&mut model, 3);
        let quiet = table(&mut model, 4);
        for id in 0..200 {
            model.add_node(id, Coordinate::new(id as i32, 0), busy).unwrap();
        }
        model.add_node(500, Coordinate::new(0, 1), quiet).unwrap();
        model.add_node(501, Coordinate::new(0, 2), quiet).unwrap();

        let settings = TesSettings::default();
        let writer = TesWriter::new(&model, &settings);
        let mut entries: Vec<(FeatureId, &Feature)> = model.features().collect();
        entries.sort_by_key(|(_, f)| f.typed_id());
        let numbering = writer.number_elements(&entries, &entries);
        assert_eq!(numbering.tags.order(), &[busy.0]);
        assert_eq!(numbering.tags.number_of(quiet.0), None);
        assert_eq!(numbering.features.len(), 202);
    }

    #[test]
    fn test_dangling_local_reference_is_missing_feature() {
        let mut model = TileModel::new(Tile::ROOT);
        let empty = model.empty_tags();
        let node = model.add_node(1, Coordinate::new(0, 0), empty).unwrap();
        model
            .add_relation(
                8,
                Bounds::new(0, 0, 1, 1),
                vec![crate::model::Member {
                    target: FeatureRef::Local(node),
                    role: Role::EMPTY,
                }],
                empty,
            )
            .unwrap();
        assert!(model.remove_feature(FeatureKind::Node, 1));
        let result = TesWriter::new(&model, &TesSettings::default()).write();
        assert!(matches!(result, Err(TileError::MissingFeature(_))));
    }
}
