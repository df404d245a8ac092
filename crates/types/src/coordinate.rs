use geo::Point;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Largest latitude representable in spherical Mercator.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

const SCALE: f64 = 2_147_483_648.0; // 2^31

/// A position in the 32-bit integer Mercator plane.
///
/// The plane spans `i32::MIN..=i32::MAX` on both axes; x grows east and y
/// grows north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Project a longitude/latitude point. Latitudes beyond the Mercator
    /// limit are clamped.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo::Point;
    /// use tilekit_types::coordinate::Coordinate;
    ///
    /// let xy = Coordinate::from_lon_lat(Point::new(0.0, 0.0));
    /// assert_eq!(xy, Coordinate::new(0, 0));
    /// ```
    pub fn from_lon_lat(point: Point<f64>) -> Self {
        let lon = point.x().clamp(-180.0, 180.0);
        let lat = point.y().clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let x = lon / 180.0 * SCALE;
        let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() / PI * SCALE;
        Self {
            x: x.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
            y: y.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
        }
    }

    /// Inverse of [`Coordinate::from_lon_lat`].
    pub fn to_lon_lat(self) -> Point<f64> {
        let lon = self.x as f64 / SCALE * 180.0;
        let lat = (2.0 * (self.y as f64 / SCALE * PI).exp().atan() - PI / 2.0).to_degrees();
        Point::new(lon, lat)
    }
}

impl From<Point<f64>> for Coordinate {
    fn from(point: Point<f64>) -> Self {
        Self::from_lon_lat(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_roundtrip_precision() {
        let nyc = Point::new(-74.0060, 40.7128);
        let back = Coordinate::from_lon_lat(nyc).to_lon_lat();
        assert!((back.x() - nyc.x()).abs() < 1e-6);
        assert!((back.y() - nyc.y()).abs() < 1e-6);
    }

    #[test]
    fn test_extremes_clamp() {
        let ne = Coordinate::from_lon_lat(Point::new(180.0, 89.0));
        assert_eq!(ne.x, i32::MAX);
        assert_eq!(ne.y, i32::MAX);
        let sw = Coordinate::from_lon_lat(Point::new(-180.0, -89.0));
        assert_eq!(sw.x, i32::MIN);
        assert_eq!(sw.y, i32::MIN);
    }
}
