//! Density-driven tile pyramid construction.

use crate::config::{BuildSettings, MAX_TIERS};
use crate::error::{Result, TileError};
use crate::pyramid::index::{ROOT_TIP, TileIndex};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use tilekit_types::tile::Tile;

/// Estimated storage bytes per counted feature.
pub const BYTES_PER_FEATURE: u64 = 8;

/// A kept child contributes this fraction of its estimate to its parent
/// (the parent's share of cross-tile bookkeeping).
const CHILD_ESTIMATE_DIVISOR: u64 = 16_384;

/// A tile kept in the pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidTile {
    pub tile: Tile,
    /// Features counted in this tile's whole area.
    pub count: u64,
    /// Features stored in this tile itself (not in a kept child).
    pub own_count: u64,
    pub estimated_bytes: u64,
    pub tip: u32,
    pub pile: u32,
    pub pages: u32,
    /// Pile of the parent tile (`None` for the root).
    pub parent: Option<u32>,
}

/// The outcome of a pyramid build.
#[derive(Debug, Clone)]
pub struct TilePyramid {
    tiles: Vec<PyramidTile>,
    by_tile: FxHashMap<Tile, u32>,
    tip_to_pile: Vec<u32>,
    cell_piles: Vec<u32>,
    leaf_zoom: u32,
    index: TileIndex,
}

impl TilePyramid {
    /// Kept tiles in pile order (pile 1 first).
    pub fn tiles(&self) -> &[PyramidTile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn index(&self) -> &TileIndex {
        &self.index
    }

    pub fn into_index(self) -> TileIndex {
        self.index
    }

    pub fn get(&self, tile: Tile) -> Option<&PyramidTile> {
        self.by_tile.get(&tile).and_then(|&pile| self.by_pile(pile))
    }

    pub fn by_pile(&self, pile: u32) -> Option<&PyramidTile> {
        pile.checked_sub(1)
            .and_then(|i| self.tiles.get(i as usize))
    }

    pub fn pile_of_tip(&self, tip: u32) -> Option<u32> {
        match self.tip_to_pile.get(tip as usize) {
            Some(&pile) if pile != 0 => Some(pile),
            _ => None,
        }
    }

    /// Pile holding the features of a leaf-zoom cell.
    pub fn pile_of_cell(&self, column: u32, row: u32) -> Option<u32> {
        let extent = 1u32 << self.leaf_zoom;
        if column >= extent || row >= extent {
            return None;
        }
        self.cell_piles
            .get((row * extent + column) as usize)
            .copied()
    }

    /// Page budget per pile; entry 0 holds the total.
    pub fn page_counts(&self) -> Vec<u32> {
        let mut counts = Vec::with_capacity(self.tiles.len() + 1);
        counts.push(self.tiles.iter().map(|t| t.pages).sum());
        counts.extend(self.tiles.iter().map(|t| t.pages));
        counts
    }
}

#[derive(Debug)]
struct Node {
    tile: Tile,
    count: u64,
    estimate: u64,
    kept: bool,
    parent: Option<usize>,
    children: Vec<usize>,
    tip: u32,
    pile: u32,
}

impl Node {
    fn new(tile: Tile) -> Self {
        Self {
            tile,
            count: 0,
            estimate: 0,
            kept: false,
            parent: None,
            children: Vec::new(),
            tip: 0,
            pile: 0,
        }
    }
}

/// Turns a grid of per-cell feature counts into a tile pyramid and its index.
///
/// # Examples
///
/// ```
/// use tilekit::config::BuildSettings;
/// use tilekit::pyramid::TileIndexBuilder;
/// use tilekit_types::zoom::ZoomLevels;
///
/// let settings = BuildSettings::default()
///     .with_leaf_zoom(2)
///     .with_zoom_levels(ZoomLevels::from_levels(&[0, 1, 2]).unwrap())
///     .with_min_tile_density(10);
/// let builder = TileIndexBuilder::new(settings)?;
/// let counts = [5, 0, 0, 12, 0, 0, 8, 0, 3, 0, 0, 0, 0, 0, 0, 20];
/// let pyramid = builder.build(&counts)?;
/// assert_eq!(pyramid.len(), 5);
/// # Ok::<(), tilekit::TileError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TileIndexBuilder {
    settings: BuildSettings,
    tiers: Vec<u32>,
    leaf_is_tier: bool,
}

impl TileIndexBuilder {
    pub fn new(settings: BuildSettings) -> Result<Self> {
        let enabled = settings.zoom_levels.count();
        if enabled > MAX_TIERS {
            return Err(TileError::CapacityExceeded(format!(
                "{} zoom levels enabled, at most {} tiers are supported",
                enabled, MAX_TIERS
            )));
        }
        settings.validate().map_err(TileError::Configuration)?;
        Ok(Self {
            tiers: settings.tiers(),
            leaf_is_tier: settings.zoom_levels.contains(settings.leaf_zoom),
            settings,
        })
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Build the pyramid from row-major counts at the leaf zoom.
    pub fn build(&self, counts: &[u64]) -> Result<TilePyramid> {
        let leaf_zoom = self.settings.leaf_zoom;
        let extent = 1usize << leaf_zoom;
        if counts.len() != extent * extent {
            return Err(TileError::Configuration(format!(
                "expected {} cell counts for leaf zoom {}, got {}",
                extent * extent,
                leaf_zoom,
                counts.len()
            )));
        }

        let mut nodes = self.aggregate(counts, extent);
        let root = nodes.len() - 1;
        self.trim(&mut nodes, root);
        link_children(&mut nodes, root);

        let slot_count = assign_tip(&mut nodes, root, ROOT_TIP, &self.tiers);
        let mut slots = vec![0u32; slot_count as usize];
        slots[0] = slot_count - 1;
        write_node(&nodes, root, &mut slots, &self.tiers);

        let mut order = Vec::new();
        number_piles(&mut nodes, root, &mut order);

        let page_size = self.settings.page_size as u64;
        let mut tip_to_pile = vec![0u32; slot_count as usize];
        let mut by_tile = FxHashMap::default();
        let mut tiles = Vec::with_capacity(order.len());
        for &i in &order {
            let node = &nodes[i];
            let children_count: u64 = node.children.iter().map(|&c| nodes[c].count).sum();
            let pages = node.estimate.div_ceil(page_size).max(1);
            tip_to_pile[node.tip as usize] = node.pile;
            by_tile.insert(node.tile, node.pile);
            tiles.push(PyramidTile {
                tile: node.tile,
                count: node.count,
                own_count: node.count - children_count,
                estimated_bytes: node.estimate,
                tip: node.tip,
                pile: node.pile,
                pages: u32::try_from(pages).map_err(|_| {
                    TileError::CapacityExceeded(format!("tile {} needs {} pages", node.tile, pages))
                })?,
                parent: node.parent.map(|p| nodes[p].pile),
            });
        }

        let mut cell_piles = vec![0u32; extent * extent];
        fill_cells(&nodes, root, leaf_zoom, &mut cell_piles);

        log::info!(
            "Built tile pyramid: {} tiles, {} index slots, {} pages",
            tiles.len(),
            slot_count,
            tiles.iter().map(|t| t.pages as u64).sum::<u64>()
        );

        Ok(TilePyramid {
            tiles,
            by_tile,
            tip_to_pile,
            cell_piles,
            leaf_zoom,
            index: TileIndex::new(self.tiers.clone(), slots),
        })
    }

    /// Create leaf tiles and roll counts up through every tier. The root is
    /// the last node.
    fn aggregate(&self, counts: &[u64], extent: usize) -> Vec<Node> {
        let leaf_zoom = self.settings.leaf_zoom;
        let min_density = self.settings.min_tile_density;
        let mut levels = self.tiers.clone();
        if !self.leaf_is_tier {
            levels.push(leaf_zoom);
        }

        let mut nodes = Vec::new();
        let mut current = Vec::new();
        for (cell, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let tile = Tile::from_raw(
                (leaf_zoom << 24) | (((cell / extent) as u32) << 12) | (cell % extent) as u32,
            );
            let mut node = Node::new(tile);
            node.count = count;
            node.estimate = count.saturating_mul(BYTES_PER_FEATURE);
            current.push(nodes.len());
            nodes.push(node);
        }

        for level in (1..levels.len()).rev() {
            let parent_zoom = levels[level - 1];
            // Tiles of an implicit leaf tier always fold into their parent.
            let foldable = !self.leaf_is_tier && level == levels.len() - 1;
            let mut parents: FxHashMap<Tile, usize> = FxHashMap::default();
            let mut next = Vec::new();
            for &child in &current {
                let parent_tile = nodes[child].tile.zoomed_out(parent_zoom);
                let parent = match parents.get(&parent_tile) {
                    Some(&p) => p,
                    None => {
                        let p = nodes.len();
                        nodes.push(Node::new(parent_tile));
                        parents.insert(parent_tile, p);
                        next.push(p);
                        p
                    }
                };
                let (count, estimate) = (nodes[child].count, nodes[child].estimate);
                nodes[child].parent = Some(parent);
                nodes[parent].count += count;
                if !foldable && count >= min_density {
                    nodes[child].kept = true;
                    nodes[parent].estimate += estimate / CHILD_ESTIMATE_DIVISOR;
                } else {
                    nodes[parent].estimate += estimate;
                }
            }
            current = next;
        }

        if current.is_empty() {
            // No features at all: the pyramid is just the root.
            nodes.push(Node::new(Tile::ROOT));
        }
        let root = nodes.len() - 1;
        nodes[root].kept = true;
        nodes
    }

    /// Drop the smallest tiles until at most `max_tiles` remain, folding
    /// their estimates into their parents.
    fn trim(&self, nodes: &mut [Node], root: usize) {
        let max_tiles = self.settings.max_tiles as usize;
        let mut kept: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].kept).collect();
        if kept.len() <= max_tiles {
            return;
        }
        // Parents never rank below their children: counts are aggregates and
        // ties go to the coarser zoom. The root is pinned at the top.
        kept.sort_by_key(|&i| {
            let key = if i == root { u64::MAX } else { nodes[i].count };
            (Reverse(key), nodes[i].tile.zoom(), nodes[i].tile)
        });
        let mut dropped = kept.split_off(max_tiles);
        dropped.sort_by_key(|&i| Reverse(nodes[i].tile.zoom()));

        log::debug!(
            "Trimming {} tiles to stay within {} kept tiles",
            dropped.len(),
            max_tiles
        );
        for i in dropped {
            nodes[i].kept = false;
            let estimate = nodes[i].estimate;
            if let Some(parent) = nodes[i].parent {
                nodes[parent].estimate += estimate - estimate / CHILD_ESTIMATE_DIVISOR;
            }
        }
    }
}

fn link_children(nodes: &mut [Node], root: usize) {
    for i in 0..nodes.len() {
        if i == root || !nodes[i].kept {
            continue;
        }
        if let Some(parent) = nodes[i].parent {
            nodes[parent].children.push(i);
        }
    }
    for i in 0..nodes.len() {
        if nodes[i].children.len() > 1 {
            let zoom = nodes[i].tile.zoom();
            let mut children = std::mem::take(&mut nodes[i].children);
            children.sort_by_key(|&c| nodes[c].tile.child_position(zoom));
            nodes[i].children = children;
        }
    }
}

/// Distance in zoom levels from a node to the tier below it.
fn child_shift(tiers: &[u32], zoom: u32) -> u32 {
    tiers
        .iter()
        .find(|&&z| z > zoom)
        .map_or(0, |&child| child - zoom)
}

/// Assign TIPs depth first. A node's children take the slots right after its
/// mask; sub-index nodes follow the parent's child slots. Returns the next
/// free slot.
fn assign_tip(nodes: &mut [Node], node: usize, tip: u32, tiers: &[u32]) -> u32 {
    nodes[node].tip = tip;
    let wide = child_shift(tiers, nodes[node].tile.zoom()) == 3;
    let child_tip = tip + if wide { 3 } else { 2 };
    let children = nodes[node].children.clone();
    let mut next = child_tip + children.len() as u32;
    for (i, &child) in children.iter().enumerate() {
        if nodes[child].children.is_empty() {
            nodes[child].tip = child_tip + i as u32;
        } else {
            next = assign_tip(nodes, child, next, tiers);
        }
    }
    next
}

fn write_node(nodes: &[Node], node: usize, slots: &mut [u32], tiers: &[u32]) {
    let tip = nodes[node].tip;
    let zoom = nodes[node].tile.zoom();
    let wide = child_shift(tiers, zoom) == 3;
    let mut mask = 0u64;
    for &child in &nodes[node].children {
        mask |= 1u64 << nodes[child].tile.child_position(zoom);
    }
    slots[tip as usize] = 0;
    slots[tip as usize + 1] = mask as u32;
    if wide {
        slots[tip as usize + 2] = (mask >> 32) as u32;
    }
    let child_tip = tip + if wide { 3 } else { 2 };
    for (i, &child) in nodes[node].children.iter().enumerate() {
        let slot = child_tip + i as u32;
        if nodes[child].children.is_empty() {
            slots[slot as usize] = 0;
        } else {
            slots[slot as usize] = ((nodes[child].tip - slot) << 2) | 1;
            write_node(nodes, child, slots, tiers);
        }
    }
}

fn number_piles(nodes: &mut [Node], node: usize, order: &mut Vec<usize>) {
    order.push(node);
    nodes[node].pile = order.len() as u32;
    let children = nodes[node].children.clone();
    for child in children {
        number_piles(nodes, child, order);
    }
}

/// Map every leaf cell to the pile of the deepest kept tile covering it.
fn fill_cells(nodes: &[Node], node: usize, leaf_zoom: u32, cells: &mut [u32]) {
    let tile = nodes[node].tile;
    let shift = leaf_zoom - tile.zoom();
    let extent = 1usize << leaf_zoom;
    let span = 1usize << shift;
    let left = (tile.column() as usize) << shift;
    let top = (tile.row() as usize) << shift;
    for row in top..top + span {
        cells[row * extent + left..row * extent + left + span].fill(nodes[node].pile);
    }
    for &child in &nodes[node].children {
        fill_cells(nodes, child, leaf_zoom, cells);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilekit_types::zoom::ZoomLevels;

    fn settings(levels: &[u32], leaf: u32, density: u64) -> BuildSettings {
        BuildSettings::default()
            .with_leaf_zoom(leaf)
            .with_zoom_levels(ZoomLevels::from_levels(levels).unwrap())
            .with_min_tile_density(density)
    }

    #[test]
    fn test_too_many_tiers_rejected() {
        let s = settings(&[0, 1, 2, 3, 4, 5, 6, 7, 8], 8, 1);
        assert!(matches!(
            TileIndexBuilder::new(s),
            Err(TileError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let s = settings(&[1, 2], 2, 1);
        assert!(matches!(
            TileIndexBuilder::new(s),
            Err(TileError::Configuration(_))
        ));
    }

    #[test]
    fn test_wrong_grid_size_rejected() {
        let builder = TileIndexBuilder::new(settings(&[0, 1, 2], 2, 1)).unwrap();
        assert!(matches!(
            builder.build(&[1, 2, 3]),
            Err(TileError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_grid_keeps_root() {
        let builder = TileIndexBuilder::new(settings(&[0, 1, 2], 2, 1)).unwrap();
        let pyramid = builder.build(&[0; 16]).unwrap();
        assert_eq!(pyramid.len(), 1);
        assert_eq!(pyramid.tiles()[0].tile, Tile::ROOT);
        assert_eq!(pyramid.tiles()[0].tip, ROOT_TIP);
        assert_eq!(pyramid.index().slots(), &[2, 0, 0]);
        assert_eq!(pyramid.page_counts(), vec![1, 1]);
    }

    #[test]
    fn test_implicit_leaf_tier_folds() {
        // Leaf zoom 3 is not an enabled level: its cells never stand alone.
        let builder = TileIndexBuilder::new(settings(&[0, 2], 3, 1)).unwrap();
        let mut counts = vec![0u64; 64];
        counts[0] = 50;
        let pyramid = builder.build(&counts).unwrap();
        let zooms: Vec<u32> = pyramid.tiles().iter().map(|t| t.tile.zoom()).collect();
        assert_eq!(zooms, vec![0, 2]);
        assert_eq!(pyramid.tiles()[1].own_count, 50);
        assert_eq!(pyramid.pile_of_cell(0, 0), Some(2));
        assert_eq!(pyramid.pile_of_cell(7, 7), Some(1));
    }

    #[test]
    fn test_sixty_four_way_fan_out() {
        let builder = TileIndexBuilder::new(settings(&[0, 3], 3, 1)).unwrap();
        let mut counts = vec![0u64; 64];
        counts[63] = 4; // (7,7)
        counts[1] = 2; // (1,0)
        let pyramid = builder.build(&counts).unwrap();
        let slots = pyramid.index().slots();
        // header, root page, two mask words, two child slots
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[2], 1 << 1);
        assert_eq!(slots[3], 1 << 31);
        let walked = pyramid.index().walk().unwrap();
        assert_eq!(walked.len(), 3);
    }

    #[test]
    fn test_trim_drops_smallest() {
        let builder =
            TileIndexBuilder::new(settings(&[0, 1, 2], 2, 1).with_max_tiles(3)).unwrap();
        let counts = [5, 0, 0, 12, 0, 0, 8, 0, 3, 0, 0, 0, 0, 0, 0, 20];
        let pyramid = builder.build(&counts).unwrap();
        let kept: Vec<String> = pyramid.tiles().iter().map(|t| t.tile.to_string()).collect();
        // The pinned root plus the two zoom-1 tiles counting 20, which
        // outrank the zoom-2 tile of 20 on the zoom tie-break.
        assert_eq!(pyramid.len(), 3);
        assert_eq!(kept[0], "0/0/0");
        assert!(kept.contains(&"1/1/0".to_string()));
        assert!(kept.contains(&"1/1/1".to_string()));
        assert_eq!(pyramid.tiles()[0].count, 48);
    }

    #[test]
    fn test_estimates_fold_into_parent() {
        let builder = TileIndexBuilder::new(settings(&[0, 1], 1, 100)).unwrap();
        let pyramid = builder.build(&[1000, 10, 0, 0]).unwrap();
        let root = &pyramid.tiles()[0];
        let child = &pyramid.tiles()[1];
        assert_eq!(child.estimated_bytes, 8000);
        // folded child (80 bytes) plus the kept child's share
        assert_eq!(root.estimated_bytes, 80 + 8000 / 16_384);
    }
}
