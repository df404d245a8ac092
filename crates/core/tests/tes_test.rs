use tilekit::codec::DecodeCursor;
use tilekit::model::{FeatureKind, GlobalTag, Geometry, TagTable, TagValue, TileModel};
use tilekit::types::{Coordinate, Tile};
use tilekit::{IndexSettings, TesReader, TesSettings, TesWriter, TileCompiler, TileError};

fn tagged(model: &mut TileModel, key: u16, value: u16) -> tilekit::model::TagTableId {
    model
        .add_tag_table(TagTable::new(
            vec![GlobalTag {
                key,
                value: TagValue::NarrowNumber(value),
            }],
            Vec::new(),
        ))
        .unwrap()
}

#[test]
fn test_only_popular_tag_table_is_shared() {
    let mut model = TileModel::new(Tile::ROOT);
    let popular = tagged(&mut model, 10, 1);
    let rare = tagged(&mut model, 11, 2);
    for id in 0..200 {
        model
            .add_node(id, Coordinate::new(id as i32 * 10, 0), popular)
            .unwrap();
    }
    model.add_node(1000, Coordinate::new(0, 50), rare).unwrap();
    model.add_node(1001, Coordinate::new(0, 60), rare).unwrap();
    assert_eq!(model.tag_table_users(popular), 200);

    let settings = TesSettings::default().with_tag_table_threshold(1);
    let bytes = TesWriter::new(&model, &settings).write().unwrap();

    // Skip the feature index to reach the shared sections.
    let mut cursor = DecodeCursor::new(&bytes);
    let count = cursor.varint().unwrap();
    assert_eq!(count, 202);
    for _ in 0..count {
        cursor.varint().unwrap();
    }
    assert_eq!(cursor.varint().unwrap(), 0, "no shared strings");
    assert_eq!(cursor.varint().unwrap(), 1, "one shared tag table");

    let back = TesReader::read(Tile::ROOT, &bytes).unwrap();
    let first = back.feature_by_id(FeatureKind::Node, 0).unwrap();
    let rare_node = back.feature_by_id(FeatureKind::Node, 1000).unwrap();
    assert_eq!(back.tag_table_users(back.feature(first).tags), 200);
    assert_eq!(back.tag_table_users(back.feature(rare_node).tags), 2);
}

#[test]
fn test_export_then_apply_delta() {
    let tile = Tile::new(2, 1, 2).unwrap();
    let b = tile.bounds();
    let mut model = TileModel::new(tile);
    let tags = tagged(&mut model, 4, 9);
    for id in 1..=20u64 {
        let xy = Coordinate::new(b.min_x + id as i32 * 100, b.min_y + id as i32 * 50);
        model.add_node(id, xy, tags).unwrap();
    }
    model
        .add_way(
            500,
            vec![
                Coordinate::new(b.min_x + 100, b.min_y + 50),
                Coordinate::new(b.min_x + 900, b.min_y + 400),
            ],
            tags,
        )
        .unwrap();

    // Compact tile -> full TES -> model.
    let compiler = TileCompiler::new(IndexSettings::default(), TesSettings::default()).unwrap();
    let compact = compiler.compile_model(&mut model).unwrap();
    let full = compiler.export_tes(tile, &compact).unwrap();
    let mut replica = TesReader::read(tile, &full).unwrap();
    assert_eq!(replica.feature_count(), 21);

    // Edit the original and ship only the change.
    model.mark_unchanged();
    let moved = Coordinate::new(b.min_x + 7, b.min_y + 7);
    let node = model.feature_by_id(FeatureKind::Node, 3).unwrap();
    model.set_geometry(node, Geometry::Point(moved)).unwrap();
    model.set_changed(node, true);
    assert!(model.remove_feature(FeatureKind::Node, 4));

    let delta = TesWriter::new(&model, &TesSettings::default())
        .write()
        .unwrap();
    assert!(delta.len() < full.len());
    TesReader::read_into(&mut replica, &delta).unwrap();

    assert_eq!(replica.feature_count(), 20);
    let node = replica.feature_by_id(FeatureKind::Node, 3).unwrap();
    assert_eq!(replica.feature(node).geometry, Geometry::Point(moved));
    assert!(replica.feature_by_id(FeatureKind::Node, 4).is_none());
    let way = replica.feature_by_id(FeatureKind::Way, 500).unwrap();
    assert_eq!(replica.feature(way).way().unwrap().coords.len(), 2);

    // The replica compiles to a valid tile.
    let rebuilt = compiler.compile_model(&mut replica).unwrap();
    assert_eq!(TileModel::read_tile(tile, &rebuilt).unwrap().feature_count(), 20);
}

#[test]
fn test_delta_against_empty_model_fails() {
    let mut model = TileModel::new(Tile::ROOT);
    let tags = model.empty_tags();
    model.add_node(1, Coordinate::new(0, 0), tags).unwrap();
    model.add_node(2, Coordinate::new(1, 1), tags).unwrap();
    model.mark_unchanged();
    let node = model.feature_by_id(FeatureKind::Node, 2).unwrap();
    model.set_changed(node, true);

    let delta = TesWriter::new(&model, &TesSettings::default())
        .write()
        .unwrap();
    assert!(matches!(
        TesReader::read(Tile::ROOT, &delta),
        Err(TileError::MissingFeature(_))
    ));
}

#[test]
fn test_garbage_streams_fail_cleanly() {
    let mut model = TileModel::new(Tile::ROOT);
    let tags = tagged(&mut model, 2, 3);
    for id in 0..10 {
        model.add_node(id, Coordinate::new(id as i32, 0), tags).unwrap();
    }
    let bytes = TesWriter::new(&model, &TesSettings::default())
        .write()
        .unwrap();
    for i in 0..bytes.len() {
        let mut flipped = bytes.to_vec();
        flipped[i] ^= 0xFF;
        let _ = TesReader::read(Tile::ROOT, &flipped);
    }
    assert!(TesReader::read(Tile::ROOT, &[0xFF, 0xFF, 0xFF]).is_err());
}

/// Two local-tag tables over the strings "alpha" and "zeta", each used by
/// three nodes, plus two relation tables, added in either order.
fn same_content(reversed: bool) -> TileModel {
    use tilekit::model::{FeatureRef, LocalTag, RelationTable};

    let mut model = TileModel::new(Tile::ROOT);
    let names = if reversed { ["zeta", "alpha"] } else { ["alpha", "zeta"] };
    for name in names {
        model.add_string(name).unwrap();
    }
    let alpha = model.add_string("alpha").unwrap();
    let zeta = model.add_string("zeta").unwrap();

    let first = TagTable::new(
        Vec::new(),
        vec![
            LocalTag {
                key: alpha,
                value: TagValue::NarrowNumber(1),
            },
            LocalTag {
                key: zeta,
                value: TagValue::NarrowNumber(2),
            },
        ],
    );
    let second = TagTable::new(
        Vec::new(),
        vec![LocalTag {
            key: alpha,
            value: TagValue::LocalString(zeta),
        }],
    );
    let near = RelationTable::new(vec![FeatureRef::foreign(5, None)]);
    let far = RelationTable::new(vec![FeatureRef::foreign(2, Some(3))]);
    let (tables, relations) = if reversed {
        ([second.clone(), first.clone()], [far.clone(), near.clone()])
    } else {
        ([first.clone(), second.clone()], [near.clone(), far.clone()])
    };
    for table in tables {
        model.add_tag_table(table).unwrap();
    }
    for table in relations {
        model.add_relation_table(table).unwrap();
    }
    let first = model.add_tag_table(first).unwrap();
    let second = model.add_tag_table(second).unwrap();
    let near = model.add_relation_table(near).unwrap();
    let far = model.add_relation_table(far).unwrap();

    let mut ids: Vec<u64> = (1..=6).collect();
    if reversed {
        ids.reverse();
    }
    for id in ids {
        let tags = if id <= 3 { first } else { second };
        let relations = if id % 2 == 0 { near } else { far };
        let node = model
            .add_node(id, Coordinate::new(id as i32 * 100, 0), tags)
            .unwrap();
        model.set_relations(node, Some(relations));
    }
    model
}

#[test]
fn test_stream_independent_of_insertion_order() {
    let settings = TesSettings::default()
        .with_string_threshold(0)
        .with_tag_table_threshold(0)
        .with_relation_table_threshold(0);
    let forward = same_content(false);
    let backward = same_content(true);
    let a = TesWriter::new(&forward, &settings).write().unwrap();
    let b = TesWriter::new(&backward, &settings).write().unwrap();
    assert_eq!(a, b);

    let back = TesReader::read(Tile::ROOT, &b).unwrap();
    assert_eq!(back.feature_count(), 6);
}
