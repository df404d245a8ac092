//! Traversal of a compact tile's spatial indexes.
//!
//! [`walk_tile`] follows the header's root slots through root tables, trunks
//! and leaves, checking every pointer, and reports what it finds to a
//! [`TileVisitor`]. The tile reader builds a model from these events; other
//! visitors can collect statistics or search without decoding anything else.

use crate::codec::ByteView;
use crate::codec::flags::{EntryFlags, FeatureFlags};
use crate::config::MAX_CATEGORIES;
use crate::error::{Result, TileError};
use crate::model::element::{FeatureKind, Geometry, IndexKind};
use rustc_hash::FxHashSet;
use tilekit_types::{Bounds, Coordinate};

/// Deepest trunk nesting accepted before a tile is considered corrupt.
pub const MAX_INDEX_DEPTH: u32 = 64;

const TRUNK_ENTRY_SIZE: u32 = 20;
const ROOT_ENTRY_SIZE: u32 = 8;

/// A feature found in a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRecord {
    pub index: IndexKind,
    pub kind: FeatureKind,
    /// Offset of the feature stub.
    pub location: u32,
    /// Raw first stub word (flags, type and high id bits).
    pub flags_word: u32,
    pub geometry: Geometry,
}

impl FeatureRecord {
    pub fn flags(&self) -> FeatureFlags {
        FeatureFlags::from_bits_truncate(self.flags_word)
    }
}

/// Receives the structure of a tile from [`walk_tile`].
pub trait TileVisitor {
    fn begin_root(&mut self, _index: IndexKind, _index_bits: u32) -> Result<()> {
        Ok(())
    }

    fn begin_node(&mut self, _location: u32, _bounds: Bounds, _leaf: bool) -> Result<()> {
        Ok(())
    }

    fn end_node(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called for every feature in a leaf. The default hands the record to
    /// the callback for its kind.
    fn feature(&mut self, record: &FeatureRecord) -> Result<()> {
        match record.kind {
            FeatureKind::Node => self.node(record),
            FeatureKind::Way => self.way(record),
            FeatureKind::Relation => self.relation(record),
        }
    }

    fn node(&mut self, _record: &FeatureRecord) -> Result<()> {
        Ok(())
    }

    fn way(&mut self, _record: &FeatureRecord) -> Result<()> {
        Ok(())
    }

    fn relation(&mut self, _record: &FeatureRecord) -> Result<()> {
        Ok(())
    }
}

/// Walk all spatial indexes of `view`, in header slot order.
pub fn walk_tile<V: TileVisitor>(view: &ByteView<'_>, visitor: &mut V) -> Result<()> {
    let declared = view.u32_at(0)? as usize;
    if declared + 4 != view.len() {
        return Err(TileError::corrupt(
            0,
            format!("header declares {} bytes, tile has {}", declared + 4, view.len()),
        ));
    }
    let mut walker = Walker {
        view,
        visited: FxHashSet::default(),
    };
    for index in IndexKind::ALL {
        let slot = index.slot_offset();
        let value = view.u32_at(slot)?;
        if value == 0 {
            continue;
        }
        if value & 1 == 0 {
            let trunk = view.pointer(slot, value as i32)?;
            visitor.begin_root(index, 0)?;
            walker.trunk(index, trunk, None, 1, visitor)?;
            continue;
        }
        let table = view.pointer(slot, (value ^ 1) as i32)?;
        let mut entry = table;
        for n in 0.. {
            if n > MAX_CATEGORIES {
                return Err(TileError::corrupt(table as usize, "too many index roots"));
            }
            let word = view.u32_at(entry)?;
            let index_bits = view.u32_at(entry + 4)?;
            let trunk = view.pointer(entry, (word & !EntryFlags::MASK) as i32)?;
            visitor.begin_root(index, index_bits)?;
            walker.trunk(index, trunk, None, 1, visitor)?;
            if word & EntryFlags::LAST.bits() != 0 {
                break;
            }
            entry += ROOT_ENTRY_SIZE;
        }
    }
    Ok(())
}

struct Walker<'v, 'a> {
    view: &'v ByteView<'a>,
    visited: FxHashSet<u32>,
}

impl Walker<'_, '_> {
    fn enter(&mut self, location: u32) -> Result<()> {
        if !self.visited.insert(location) {
            return Err(TileError::corrupt(
                location as usize,
                "index node reached twice",
            ));
        }
        Ok(())
    }

    /// Walk the trunk at `location`. Root trunks have no bounds of their
    /// own; theirs is the union of their entries.
    fn trunk<V: TileVisitor>(
        &mut self,
        index: IndexKind,
        location: u32,
        bounds: Option<Bounds>,
        depth: u32,
        visitor: &mut V,
    ) -> Result<()> {
        if depth > MAX_INDEX_DEPTH {
            return Err(TileError::corrupt(location as usize, "index nested too deep"));
        }
        self.enter(location)?;

        let mut children = Vec::new();
        let mut entry = location;
        loop {
            let word = self.view.u32_at(entry)?;
            let child = self
                .view
                .pointer(entry, (word & !EntryFlags::MASK) as i32)?;
            let child_bounds = self.bounds_at(entry + 4)?;
            children.push((child, child_bounds, word & EntryFlags::LEAF.bits() != 0));
            if word & EntryFlags::LAST.bits() != 0 {
                break;
            }
            entry += TRUNK_ENTRY_SIZE;
        }

        let bounds = bounds.unwrap_or_else(|| {
            let mut all = Bounds::EMPTY;
            for (_, b, _) in &children {
                all.expand_to_include_bounds(b);
            }
            all
        });
        visitor.begin_node(location, bounds, false)?;
        for (child, child_bounds, leaf) in children {
            if leaf {
                self.leaf(index, child, child_bounds, visitor)?;
            } else {
                self.trunk(index, child, Some(child_bounds), depth + 1, visitor)?;
            }
        }
        visitor.end_node()
    }

    fn leaf<V: TileVisitor>(
        &mut self,
        index: IndexKind,
        location: u32,
        bounds: Bounds,
        visitor: &mut V,
    ) -> Result<()> {
        self.enter(location)?;
        visitor.begin_node(location, bounds, true)?;
        let mut record = location;
        loop {
            let (stub, geometry) = if index == IndexKind::Nodes {
                let xy = Coordinate::new(self.view.i32_at(record)?, self.view.i32_at(record + 4)?);
                (record + 8, Geometry::Point(xy))
            } else {
                (record + 16, Geometry::Bounded(self.bounds_at(record)?))
            };
            let flags_word = self.view.u32_at(stub)?;
            let kind = FeatureKind::from_type_bits(flags_word)
                .filter(|&k| fits_index(index, k))
                .ok_or_else(|| {
                    TileError::corrupt(stub as usize, format!("bad feature type in {:?}", index))
                })?;
            let record_data = FeatureRecord {
                index,
                kind,
                location: stub,
                flags_word,
                geometry,
            };
            visitor.feature(&record_data)?;

            let flags = record_data.flags();
            if flags.contains(FeatureFlags::LAST_SPATIAL_ITEM) {
                break;
            }
            record = if kind == FeatureKind::Node {
                stub + if flags.contains(FeatureFlags::RELATION_MEMBER) { 16 } else { 12 }
            } else {
                stub + 16
            };
        }
        visitor.end_node()
    }

    fn bounds_at(&self, at: u32) -> Result<Bounds> {
        Ok(Bounds::new(
            self.view.i32_at(at)?,
            self.view.i32_at(at + 4)?,
            self.view.i32_at(at + 8)?,
            self.view.i32_at(at + 12)?,
        ))
    }
}

fn fits_index(index: IndexKind, kind: FeatureKind) -> bool {
    match index {
        IndexKind::Nodes => kind == FeatureKind::Node,
        IndexKind::Ways => kind == FeatureKind::Way,
        IndexKind::Areas => kind != FeatureKind::Node,
        IndexKind::Relations => kind == FeatureKind::Relation,
    }
}
