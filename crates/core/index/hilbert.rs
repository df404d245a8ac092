//! Hilbert-curve ordering of features within a tile.

use crate::model::{Feature, Geometry};
use tilekit_types::{Bounds, Coordinate};

/// Curve side length: coordinates are scaled to 16 bits per axis.
const SIDE: u32 = 1 << 16;

/// Distance of `(x, y)` along a Hilbert curve filling a 2^16 square.
pub fn hilbert_distance(x: u16, y: u16) -> u32 {
    let (mut x, mut y) = (x as u32, y as u32);
    let mut d = 0u32;
    let mut s = SIDE / 2;
    while s > 0 {
        let rx = u32::from(x & s != 0);
        let ry = u32::from(y & s != 0);
        d += s * s * ((3 * rx) ^ ry);
        if ry == 0 {
            if rx == 1 {
                x = SIDE - 1 - x;
                y = SIDE - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

fn scale(value: i32, min: i32, extent: i64) -> u16 {
    let offset = (value as i64 - min as i64).clamp(0, extent);
    ((offset * (SIDE as i64 - 1)) / extent.max(1)) as u16
}

/// Hilbert distance of `xy` within `tile_bounds`.
pub fn distance_in(tile_bounds: &Bounds, xy: Coordinate) -> u32 {
    hilbert_distance(
        scale(xy.x, tile_bounds.min_x, tile_bounds.width()),
        scale(xy.y, tile_bounds.min_y, tile_bounds.height()),
    )
}

/// The point a feature is ordered by: a node's position, or the center of
/// the part of its bounding box that lies inside the tile.
pub fn anchor_point(tile_bounds: &Bounds, feature: &Feature) -> Coordinate {
    match feature.geometry {
        Geometry::Point(xy) => xy,
        Geometry::Bounded(bounds) => {
            let clipped = bounds.simple_intersection(tile_bounds);
            if clipped.is_empty() {
                bounds.center()
            } else {
                clipped.center()
            }
        }
    }
}
