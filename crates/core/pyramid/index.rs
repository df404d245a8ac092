//! The binary tile index and its bounds-checked traversal.
//!
//! The index is a vector of 32-bit slots. Slot 0 holds the slot count minus
//! one. Every tile with children owns a node: its own page slot, a child
//! presence mask (two words when a node fans out 64 ways) and one slot per
//! present child in mask-bit order. A child slot either holds
//! `(child_node - slot) << 2 | 1`, pointing forward to the child's node, or
//! the child's page entry (`page << 1`, zero while the tile is unstored).

use crate::config::MAX_TIERS;
use crate::error::{Result, TileError};
use rustc_hash::FxHashSet;
use tilekit_types::tile::{MAX_ZOOM, Tile};

/// TIP of the root tile's node.
pub const ROOT_TIP: u32 = 1;

/// A tile reached through the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedTile {
    pub tile: Tile,
    pub tip: u32,
    /// Stored page, if the tile has been written.
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIndex {
    tiers: Vec<u32>,
    slots: Vec<u32>,
}

impl TileIndex {
    pub(crate) fn new(tiers: Vec<u32>, slots: Vec<u32>) -> Self {
        Self { tiers, slots }
    }

    /// Wrap externally supplied slots, checking the header and tier list.
    /// The tree itself is checked lazily by [`TileIndex::walk`].
    pub fn from_slots(tiers: Vec<u32>, slots: Vec<u32>) -> Result<Self> {
        if tiers.is_empty() || tiers[0] != 0 || tiers.len() > MAX_TIERS as usize {
            return Err(TileError::corrupt(0, "invalid tier list"));
        }
        for pair in tiers.windows(2) {
            if pair[1] <= pair[0] || pair[1] - pair[0] > 3 || pair[1] > MAX_ZOOM {
                return Err(TileError::corrupt(0, "invalid tier list"));
            }
        }
        if slots.len() < 3 || slots[0] as usize + 1 != slots.len() {
            return Err(TileError::corrupt(0, "slot count does not match header"));
        }
        Ok(Self { tiers, slots })
    }

    pub fn tiers(&self) -> &[u32] {
        &self.tiers
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Number of slots, header included.
    pub fn tip_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Stored page of the tile at `tip`, if any.
    pub fn page(&self, tip: u32) -> Option<u32> {
        match self.slots.get(tip as usize) {
            Some(&v) if v != 0 && v & 1 == 0 => Some(v >> 1),
            _ => None,
        }
    }

    /// Record that the tile at `tip` was stored at `page`.
    pub fn set_page(&mut self, tip: u32, page: u32) -> Result<()> {
        if page == 0 || page > u32::MAX >> 1 {
            return Err(TileError::CapacityExceeded(format!(
                "page {} cannot be addressed",
                page
            )));
        }
        match self.slots.get_mut(tip as usize) {
            Some(slot) if tip != 0 && *slot & 1 == 0 => {
                *slot = page << 1;
                Ok(())
            }
            _ => Err(TileError::corrupt(
                tip as usize,
                "TIP is not a page slot of this index",
            )),
        }
    }

    fn fan_out_shift(&self, tier: usize) -> Option<u32> {
        self.tiers
            .get(tier + 1)
            .map(|&child| child - self.tiers[tier])
    }

    fn slot(&self, at: u32) -> Result<u32> {
        self.slots
            .get(at as usize)
            .copied()
            .ok_or_else(|| TileError::corrupt(at as usize, "slot outside index"))
    }

    fn mask(&self, tip: u32, wide: bool) -> Result<u64> {
        let low = self.slot(tip + 1)? as u64;
        let high = if wide { self.slot(tip + 2)? as u64 } else { 0 };
        Ok(low | (high << 32))
    }

    /// Visit every tile reachable from the root, depth first.
    ///
    /// Pointers must lead forward to a node inside the index and each node may
    /// be reached once; anything else is reported as corruption.
    pub fn walk(&self) -> Result<Vec<IndexedTile>> {
        let mut tiles = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![(ROOT_TIP, Tile::ROOT, 0usize)];

        while let Some((tip, tile, tier)) = stack.pop() {
            if !visited.insert(tip) {
                return Err(TileError::corrupt(tip as usize, "index node reached twice"));
            }
            self.slot(tip)?;
            tiles.push(IndexedTile {
                tile,
                tip,
                page: self.page(tip),
            });

            let Some(shift) = self.fan_out_shift(tier) else {
                if self.mask(tip, false)? != 0 {
                    return Err(TileError::corrupt(
                        tip as usize + 1,
                        "children below the finest tier",
                    ));
                }
                continue;
            };
            let wide = shift == 3;
            let mask = self.mask(tip, wide)?;
            let fan_out = 1u32 << (shift * 2);
            if fan_out < 64 && mask >> fan_out != 0 {
                return Err(TileError::corrupt(tip as usize + 1, "mask bit beyond fan-out"));
            }

            let child_zoom = self.tiers[tier + 1];
            let width = 1u32 << shift;
            let mut slot = tip + if wide { 3 } else { 2 };
            let mut pending = Vec::new();
            for position in (0..fan_out).filter(|p| mask & (1u64 << p) != 0) {
                let child = Tile::from_raw(
                    (child_zoom << 24)
                        | (((tile.row() << shift) + position / width) << 12)
                        | ((tile.column() << shift) + position % width),
                );
                let value = self.slot(slot)?;
                if value & 1 != 0 {
                    let target = slot
                        .checked_add(value >> 2)
                        .filter(|&t| t > slot && (t as usize) < self.slots.len())
                        .ok_or_else(|| {
                            TileError::corrupt(slot as usize, "child pointer outside index")
                        })?;
                    pending.push((target, child, tier + 1));
                } else {
                    tiles.push(IndexedTile {
                        tile: child,
                        tip: slot,
                        page: self.page(slot),
                    });
                }
                slot += 1;
            }
            // Reverse so children pop in mask order.
            stack.extend(pending.into_iter().rev());
        }
        Ok(tiles)
    }

    /// Find the stored tile holding `tile`: the tile itself if indexed,
    /// otherwise its deepest indexed ancestor.
    pub fn locate(&self, tile: Tile) -> Result<IndexedTile> {
        let mut tip = ROOT_TIP;
        let mut current = Tile::ROOT;
        let mut tier = 0usize;

        loop {
            let found = IndexedTile {
                tile: current,
                tip,
                page: self.page(tip),
            };
            let Some(shift) = self.fan_out_shift(tier) else {
                return Ok(found);
            };
            let child_zoom = self.tiers[tier + 1];
            if tile.zoom() < child_zoom {
                return Ok(found);
            }
            let wide = shift == 3;
            let mask = self.mask(tip, wide)?;
            let child = tile.zoomed_out(child_zoom);
            let position = child.child_position(current.zoom());
            if mask & (1u64 << position) == 0 {
                return Ok(found);
            }
            let rank = (mask & ((1u64 << position) - 1)).count_ones();
            let slot = tip + if wide { 3 } else { 2 } + rank;
            let value = self.slot(slot)?;
            if value & 1 == 0 {
                return Ok(IndexedTile {
                    tile: child,
                    tip: slot,
                    page: self.page(slot),
                });
            }
            tip = slot
                .checked_add(value >> 2)
                .filter(|&t| t > slot && (t as usize) < self.slots.len())
                .ok_or_else(|| TileError::corrupt(slot as usize, "child pointer outside index"))?;
            current = child;
            tier += 1;
        }
    }

    /// Little-endian slot bytes, as stored next to the tile data.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.slots.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn from_bytes(tiers: Vec<u32>, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(TileError::corrupt(bytes.len(), "index length not a multiple of 4"));
        }
        let slots = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_slots(tiers, slots)
    }
}
