//! Builds the per-tile spatial indexes.
//!
//! Features are split by index type (nodes, ways, areas, relations) and
//! then by key category: a feature whose global tag keys all map to one
//! category goes under that category's root, everything else under the
//! multi-category root. Each root's features are sorted along a Hilbert
//! curve, cut into leaves of `bucket_size` entries and stacked into trunk
//! levels until a single trunk remains.

use crate::config::{IndexSettings, MAX_CATEGORIES};
use crate::error::{Result, TileError};
use crate::index::hilbert::{anchor_point, distance_in};
use crate::model::{FeatureId, IndexChildren, IndexKind, IndexRoot, NodeId, TileModel};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tilekit_types::Bounds;

/// Counts from one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub features: usize,
    pub roots: usize,
    pub trunks: usize,
    pub leaves: usize,
}

#[derive(Debug, Clone)]
pub struct Indexer {
    bucket_size: usize,
    max_key_indexes: usize,
    min_features: usize,
    categories: FxHashMap<u16, u8>,
}

impl Indexer {
    pub fn new(settings: &IndexSettings) -> Result<Self> {
        if settings.max_key_indexes > MAX_CATEGORIES {
            return Err(TileError::CapacityExceeded(format!(
                "{} key indexes requested, at most {} supported",
                settings.max_key_indexes, MAX_CATEGORIES
            )));
        }
        settings.validate().map_err(TileError::Configuration)?;
        Ok(Self {
            bucket_size: settings.bucket_size,
            max_key_indexes: settings.max_key_indexes as usize,
            min_features: settings.key_index_min_features,
            categories: settings
                .key_categories
                .iter()
                .map(|kc| (kc.key, kc.category))
                .collect(),
        })
    }

    /// Category bits of a feature's tags, one bit per category (bit
    /// `category - 1`).
    fn index_bits(&self, model: &TileModel, feature: FeatureId) -> u32 {
        let tags = model.tag_table(model.feature(feature).tags);
        tags.global
            .iter()
            .filter_map(|t| self.categories.get(&t.key))
            .fold(0, |bits, &category| bits | 1 << (category - 1))
    }

    /// Replace the model's spatial indexes.
    pub fn index(&self, model: &mut TileModel) -> Result<IndexSummary> {
        model.clear_index();
        let tile_bounds = model.tile().bounds();

        let mut by_kind: [Vec<(FeatureId, u32)>; 4] = Default::default();
        let live: Vec<FeatureId> = model.features().map(|(id, _)| id).collect();
        for fid in live {
            let bits = self.index_bits(model, fid);
            model.set_index_bits(fid, bits);
            by_kind[model.feature(fid).index_kind() as usize].push((fid, bits));
        }

        let mut summary = IndexSummary::default();
        for kind in IndexKind::ALL {
            let features = std::mem::take(&mut by_kind[kind as usize]);
            if features.is_empty() {
                continue;
            }
            summary.features += features.len();
            let mut roots = Vec::new();
            for (bits, members) in self.group_roots(features) {
                let node = self.build_tree(model, &tile_bounds, members, &mut summary);
                roots.push(IndexRoot {
                    index_bits: bits,
                    node,
                });
            }
            summary.roots += roots.len();
            model.set_roots(kind, roots);
        }
        log::debug!(
            "Indexed tile {}: {} features under {} roots ({} trunks, {} leaves)",
            model.tile(),
            summary.features,
            summary.roots,
            summary.trunks,
            summary.leaves
        );
        Ok(summary)
    }

    /// Split features into roots. Returns `(index_bits, features)` pairs,
    /// the multi-category root first, then categories in ascending order.
    fn group_roots(&self, features: Vec<(FeatureId, u32)>) -> Vec<(u32, Vec<FeatureId>)> {
        let mut shared: (u32, Vec<FeatureId>) = (0, Vec::new());
        let mut by_category: BTreeMap<u32, Vec<FeatureId>> = BTreeMap::new();
        for (fid, bits) in features {
            if bits.count_ones() == 1 {
                by_category.entry(bits.trailing_zeros() + 1).or_default().push(fid);
            } else {
                shared.0 |= bits;
                shared.1.push(fid);
            }
        }

        let mut fold = |category: u32, members: Vec<FeatureId>| {
            shared.0 |= 1 << (category - 1);
            shared.1.extend(members);
        };
        let small: Vec<u32> = by_category
            .iter()
            .filter(|(_, members)| members.len() < self.min_features)
            .map(|(&category, _)| category)
            .collect();
        for category in small {
            if let Some(members) = by_category.remove(&category) {
                fold(category, members);
            }
        }
        while by_category.len() > self.max_key_indexes {
            // Smallest first; among equals the highest category goes.
            let Some(category) = by_category
                .iter()
                .min_by_key(|(category, members)| (members.len(), std::cmp::Reverse(**category)))
                .map(|(&category, _)| category)
            else {
                break;
            };
            if let Some(members) = by_category.remove(&category) {
                fold(category, members);
            }
        }

        let mut roots = Vec::with_capacity(by_category.len() + 1);
        if !shared.1.is_empty() {
            roots.push(shared);
        }
        roots.extend(
            by_category
                .into_iter()
                .map(|(category, members)| (1 << (category - 1), members)),
        );
        roots
    }

    fn build_tree(
        &self,
        model: &mut TileModel,
        tile_bounds: &Bounds,
        mut features: Vec<FeatureId>,
        summary: &mut IndexSummary,
    ) -> NodeId {
        features.sort_by_cached_key(|&fid| {
            let feature = model.feature(fid);
            (distance_in(tile_bounds, anchor_point(tile_bounds, feature)), feature.id)
        });

        let mut level: Vec<NodeId> = features
            .chunks(self.bucket_size)
            .map(|chunk| {
                let bounds = chunk.iter().fold(Bounds::EMPTY, |mut b, &fid| {
                    b.expand_to_include_bounds(&model.feature(fid).bounds());
                    b
                });
                model.push_index_node(bounds, IndexChildren::Leaf(chunk.to_vec()))
            })
            .collect();
        summary.leaves += level.len();

        loop {
            level = level
                .chunks(self.bucket_size)
                .map(|chunk| {
                    let bounds = chunk.iter().fold(Bounds::EMPTY, |mut b, &node| {
                        b.expand_to_include_bounds(&model.index_node(node).bounds);
                        b
                    });
                    model.push_index_node(bounds, IndexChildren::Trunk(chunk.to_vec()))
                })
                .collect();
            summary.trunks += level.len();
            if level.len() == 1 {
                return level[0];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalTag, TagTable, TagValue};
    use tilekit_types::{Coordinate, Tile};

    const HIGHWAY: u16 = 10;
    const BUILDING: u16 = 11;
    const NAME: u16 = 12;

    fn model_with_nodes(count: usize, key: Option<u16>) -> TileModel {
        let mut model = TileModel::new(Tile::ROOT);
        let tags = match key {
            Some(key) => model
                .add_tag_table(TagTable::new(
                    vec![GlobalTag {
                        key,
                        value: TagValue::GlobalString(1),
                    }],
                    vec![],
                ))
                .unwrap(),
            None => model.empty_tags(),
        };
        for i in 0..count {
            model
                .add_node(
                    i as u64 + 1,
                    Coordinate::new(i as i32 * 1000, -(i as i32) * 700),
                    tags,
                )
                .unwrap();
        }
        model
    }

    fn leaf_sizes(model: &TileModel, node: NodeId, out: &mut Vec<usize>) {
        match &model.index_node(node).children {
            IndexChildren::Leaf(features) => out.push(features.len()),
            IndexChildren::Trunk(children) => {
                for &child in children {
                    leaf_sizes(model, child, out);
                }
            }
        }
    }

    #[test]
    fn test_single_feature_still_gets_trunk() {
        let mut model = model_with_nodes(1, None);
        let summary = Indexer::new(&IndexSettings::default())
            .unwrap()
            .index(&mut model)
            .unwrap();
        assert_eq!(summary.roots, 1);
        assert_eq!(summary.trunks, 1);
        assert_eq!(summary.leaves, 1);
        let root = model.roots(IndexKind::Nodes)[0];
        assert!(!model.index_node(root.node).is_leaf());
    }

    #[test]
    fn test_bucket_size_respected() {
        let mut model = model_with_nodes(100, None);
        let settings = IndexSettings::default().with_bucket_size(4);
        Indexer::new(&settings).unwrap().index(&mut model).unwrap();
        let root = model.roots(IndexKind::Nodes)[0];
        let mut sizes = Vec::new();
        leaf_sizes(&model, root.node, &mut sizes);
        assert_eq!(sizes.iter().sum::<usize>(), 100);
        assert!(sizes.iter().all(|&s| s <= 4));
        assert_eq!(sizes.len(), 25);
    }

    #[test]
    fn test_category_roots() {
        let mut model = model_with_nodes(5, Some(HIGHWAY));
        let building = model
            .add_tag_table(TagTable::new(
                vec![GlobalTag {
                    key: BUILDING,
                    value: TagValue::NarrowNumber(1),
                }],
                vec![],
            ))
            .unwrap();
        let both = model
            .add_tag_table(TagTable::new(
                vec![
                    GlobalTag {
                        key: HIGHWAY,
                        value: TagValue::NarrowNumber(1),
                    },
                    GlobalTag {
                        key: BUILDING,
                        value: TagValue::NarrowNumber(1),
                    },
                ],
                vec![],
            ))
            .unwrap();
        model.add_node(100, Coordinate::new(1, 1), building).unwrap();
        model.add_node(101, Coordinate::new(2, 2), both).unwrap();

        let settings = IndexSettings::default()
            .with_key_index_min_features(1)
            .with_key_category(HIGHWAY, 1)
            .with_key_category(BUILDING, 2)
            .with_key_category(NAME, 3);
        Indexer::new(&settings).unwrap().index(&mut model).unwrap();

        let roots = model.roots(IndexKind::Nodes);
        let bits: Vec<u32> = roots.iter().map(|r| r.index_bits).collect();
        // multi-category root, then highway, then building
        assert_eq!(bits, vec![0b11, 0b01, 0b10]);
        let both_id = model.feature_by_id(crate::model::FeatureKind::Node, 101).unwrap();
        assert_eq!(model.feature(both_id).index_bits, 0b11);
    }

    #[test]
    fn test_small_categories_fold_into_shared_root() {
        let mut model = model_with_nodes(5, Some(HIGHWAY));
        let settings = IndexSettings::default()
            .with_key_index_min_features(10)
            .with_key_category(HIGHWAY, 1);
        Indexer::new(&settings).unwrap().index(&mut model).unwrap();
        let roots = model.roots(IndexKind::Nodes);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].index_bits, 0b1);
    }

    #[test]
    fn test_max_key_indexes_enforced() {
        let mut model = TileModel::new(Tile::ROOT);
        let mut settings = IndexSettings::default()
            .with_key_index_min_features(1)
            .with_max_key_indexes(2);
        for key in 1..=4u16 {
            settings = settings.with_key_category(key, key as u8);
            let tags = model
                .add_tag_table(TagTable::new(
                    vec![GlobalTag {
                        key,
                        value: TagValue::NarrowNumber(0),
                    }],
                    vec![],
                ))
                .unwrap();
            // category k gets k features
            for n in 0..key as u64 {
                model
                    .add_node(key as u64 * 100 + n, Coordinate::new(n as i32, 0), tags)
                    .unwrap();
            }
        }
        Indexer::new(&settings).unwrap().index(&mut model).unwrap();
        let bits: Vec<u32> = model
            .roots(IndexKind::Nodes)
            .iter()
            .map(|r| r.index_bits)
            .collect();
        assert_eq!(bits, vec![0b0011, 0b0100, 0b1000]);
    }

    #[test]
    fn test_too_many_key_indexes_rejected() {
        let settings = IndexSettings::default().with_max_key_indexes(33);
        assert!(matches!(
            Indexer::new(&settings),
            Err(TileError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_hilbert_order_in_leaf() {
        let mut model = TileModel::new(Tile::ROOT);
        let empty = model.empty_tags();
        // Same point: ties broken by id.
        model.add_node(9, Coordinate::new(0, 0), empty).unwrap();
        model.add_node(3, Coordinate::new(0, 0), empty).unwrap();
        Indexer::new(&IndexSettings::default())
            .unwrap()
            .index(&mut model)
            .unwrap();
        let root = model.roots(IndexKind::Nodes)[0];
        let IndexChildren::Trunk(children) = &model.index_node(root.node).children else {
            panic!("root must be a trunk");
        };
        let IndexChildren::Leaf(features) = &model.index_node(children[0]).children else {
            panic!("expected leaf");
        };
        let ids: Vec<u64> = features.iter().map(|&f| model.feature(f).id).collect();
        assert_eq!(ids, vec![3, 9]);
    }
}
