use tilekit::model::{
    FeatureBody, FeatureKind, FeatureRef, GlobalTag, LocalTag, Member, RelationTable, Role,
    TagTable, TagValue, TileModel,
};
use tilekit::types::{Bounds, Coordinate, Tile};
use tilekit::{IndexSettings, TesSettings, TileCompiler, TileError};

fn compiler() -> TileCompiler {
    TileCompiler::new(IndexSettings::default(), TesSettings::default()).unwrap()
}

fn tile() -> Tile {
    Tile::new(5, 9, 4).unwrap()
}

/// A tile with every kind of element the format stores.
fn build_model() -> TileModel {
    let t = tile();
    let b = t.bounds();
    let at = |dx: i32, dy: i32| Coordinate::new(b.min_x + dx, b.min_y + dy);

    let mut model = TileModel::new(t);
    let empty = model.empty_tags();
    let name = model.add_string("name").unwrap();
    let long = model.add_string(&"x".repeat(300)).unwrap();
    let inner = model.add_string("inner").unwrap();

    let shop = model
        .add_tag_table(TagTable::new(
            vec![
                GlobalTag {
                    key: 40,
                    value: TagValue::GlobalString(17),
                },
                GlobalTag {
                    key: 3,
                    value: TagValue::NarrowNumber(250),
                },
            ],
            vec![LocalTag {
                key: name,
                value: TagValue::LocalString(long),
            }],
        ))
        .unwrap();
    let local_only = model
        .add_tag_table(TagTable::new(
            Vec::new(),
            vec![LocalTag {
                key: name,
                value: TagValue::WideNumber(1 << 20),
            }],
        ))
        .unwrap();

    for id in 0..30u64 {
        let node = model
            .add_node(1000 + id, at(id as i32 * 7919, id as i32 * 104_729), shop)
            .unwrap();
        assert_eq!(model.feature(node).tags, shop);
    }
    let plain = model.add_node(1, at(5, 5), empty).unwrap();

    let way = model
        .add_way(7, vec![at(0, 0), at(400, 90), at(800, 40)], local_only)
        .unwrap();
    let mut body = model.feature(way).body.clone();
    if let FeatureBody::Way(w) = &mut body {
        w.feature_nodes = vec![
            FeatureRef::Local(plain),
            FeatureRef::foreign(12, Some(70_000)),
            FeatureRef::foreign(13, Some(-3)),
            FeatureRef::foreign(14, None),
        ];
    }
    model.set_body(way, body).unwrap();

    let rel = model
        .add_relation(
            3,
            Bounds::new(b.min_x, b.min_y, b.min_x + 900, b.min_y + 900),
            vec![
                Member {
                    target: FeatureRef::Local(way),
                    role: Role::Local(inner),
                },
                Member {
                    target: FeatureRef::foreign(99, Some(1 << 20)),
                    role: Role::Global(2),
                },
                Member {
                    target: FeatureRef::Local(plain),
                    role: Role::EMPTY,
                },
            ],
            empty,
        )
        .unwrap();
    let parents = model
        .add_relation_table(RelationTable::new(vec![
            FeatureRef::Local(rel),
            FeatureRef::foreign(5, Some(-20_000)),
        ]))
        .unwrap();
    model.set_relations(way, Some(parents));
    model.set_relations(plain, Some(parents));
    model
}

#[test]
fn test_tile_roundtrip() {
    let mut model = build_model();
    let bytes = compiler().compile_model(&mut model).unwrap();
    assert_eq!(bytes.len() % 4, 0);

    let back = TileModel::read_tile(tile(), &bytes).unwrap();
    assert_eq!(back.feature_count(), model.feature_count());

    for (_, original) in model.features() {
        let fid = back.feature_by_id(original.kind, original.id).unwrap();
        let decoded = back.feature(fid);
        assert_eq!(decoded.geometry, original.geometry, "feature {}", original.id);
        assert_eq!(decoded.stub_flags(), original.stub_flags(), "feature {}", original.id);
        assert_eq!(
            back.tag_table(decoded.tags).is_empty(),
            model.tag_table(original.tags).is_empty()
        );
    }

    let node = back.feature_by_id(FeatureKind::Node, 1000).unwrap();
    let tags = back.tag_table(back.feature(node).tags);
    assert_eq!(tags.global_value(40), Some(TagValue::GlobalString(17)));
    assert_eq!(tags.global_value(3), Some(TagValue::NarrowNumber(250)));
    let value = tags.local[0].value.local_string().unwrap();
    assert_eq!(back.string(value).len(), 300);
    assert_eq!(back.string(tags.local[0].key), "name");

    let way = back.feature_by_id(FeatureKind::Way, 7).unwrap();
    let tags = back.tag_table(back.feature(way).tags);
    assert!(tags.global.is_empty());
    assert_eq!(tags.local[0].value, TagValue::WideNumber(1 << 20));

    let plain = back.feature_by_id(FeatureKind::Node, 1).unwrap();
    let body = back.feature(way).way().unwrap();
    assert_eq!(body.coords.len(), 3);
    assert_eq!(
        body.feature_nodes,
        vec![
            FeatureRef::Local(plain),
            FeatureRef::foreign(12, Some(70_000)),
            FeatureRef::foreign(13, Some(-3)),
            FeatureRef::foreign(14, None),
        ]
    );

    let rel = back.feature_by_id(FeatureKind::Relation, 3).unwrap();
    let parents = back.feature(way).relations.unwrap();
    assert_eq!(back.feature(plain).relations, Some(parents));
    assert_eq!(
        back.relation_table(parents).entries,
        vec![FeatureRef::Local(rel), FeatureRef::foreign(5, Some(-20_000))]
    );

    let members = &back.feature(rel).relation().unwrap().members;
    let Role::Local(role) = members[0].role else {
        panic!("expected a local role, got {:?}", members[0].role);
    };
    assert_eq!(back.string(role), "inner");
    assert_eq!(members[0].target, FeatureRef::Local(way));
    assert_eq!(members[1].role, Role::Global(2));
    assert_eq!(members[1].target, FeatureRef::foreign(99, Some(1 << 20)));
    assert_eq!(members[2].role, Role::EMPTY);
}

#[test]
fn test_shared_content_is_stored_once() {
    let mut model = build_model();
    let bytes = compiler().compile_model(&mut model).unwrap();
    let back = TileModel::read_tile(tile(), &bytes).unwrap();

    let first = back.feature_by_id(FeatureKind::Node, 1000).unwrap();
    let last = back.feature_by_id(FeatureKind::Node, 1029).unwrap();
    let shared = back.feature(first).tags;
    assert_eq!(back.feature(last).tags, shared);
    assert_eq!(back.tag_table_users(shared), 30);
}

#[test]
fn test_recompile_is_byte_identical() {
    let mut model = build_model();
    let first = compiler().compile_model(&mut model).unwrap();
    let second = compiler().compile(tile(), &first).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_corrupt_tiles_fail_cleanly() {
    let mut model = build_model();
    let bytes = compiler().compile_model(&mut model).unwrap();

    assert!(TileModel::read_tile(tile(), &bytes[..bytes.len() - 4]).is_err());
    assert!(TileModel::read_tile(tile(), &[]).is_err());

    // Point the node root far past the end of the tile.
    let mut broken = bytes.to_vec();
    broken[8..12].copy_from_slice(&0x0100_0000u32.to_le_bytes());
    assert!(matches!(
        TileModel::read_tile(tile(), &broken),
        Err(TileError::StructuralCorruption { .. }) | Err(TileError::UnexpectedEof { .. })
    ));

    // Flipping any single byte never panics.
    for i in 0..bytes.len() {
        let mut flipped = bytes.to_vec();
        flipped[i] ^= 0xA5;
        let _ = TileModel::read_tile(tile(), &flipped);
    }
}
