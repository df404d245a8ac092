use crate::tile::MAX_ZOOM;
use serde::{Deserialize, Serialize};

/// A sparse set of enabled zoom levels, one bit per level.
///
/// Serializes as an ascending list of levels.
///
/// # Examples
///
/// ```
/// use tilekit_types::zoom::ZoomLevels;
///
/// let levels = ZoomLevels::from_levels(&[0, 2, 5]).unwrap();
/// assert_eq!(levels.iter().collect::<Vec<_>>(), vec![0, 2, 5]);
/// assert_eq!(levels.parent_of(5), Some(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u32>", try_from = "Vec<u32>")]
pub struct ZoomLevels(u32);

impl ZoomLevels {
    /// Every even level from 0 to 12.
    pub const DEFAULT: ZoomLevels = ZoomLevels(0b1_0101_0101_0101);

    pub const fn from_mask(mask: u32) -> Self {
        Self(mask)
    }

    /// Build from a list of levels. Levels above [`MAX_ZOOM`] are rejected.
    pub fn from_levels(levels: &[u32]) -> Result<Self, String> {
        let mut mask = 0u32;
        for &level in levels {
            if level > MAX_ZOOM {
                return Err(format!(
                    "Zoom level {} exceeds the maximum of {}",
                    level, MAX_ZOOM
                ));
            }
            mask |= 1 << level;
        }
        Ok(Self(mask))
    }

    pub const fn mask(self) -> u32 {
        self.0
    }

    pub const fn contains(self, zoom: u32) -> bool {
        zoom < 32 && self.0 & (1 << zoom) != 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn with(self, zoom: u32) -> Self {
        Self(self.0 | (1 << zoom))
    }

    /// Levels in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..32).filter(move |z| self.0 & (1 << z) != 0)
    }

    /// The closest enabled level coarser than `zoom`.
    pub fn parent_of(self, zoom: u32) -> Option<u32> {
        let below = self.0 & ((1u32 << zoom.min(31)) - 1);
        if below == 0 {
            None
        } else {
            Some(31 - below.leading_zeros())
        }
    }

    /// The closest enabled level finer than `zoom`.
    pub fn child_of(self, zoom: u32) -> Option<u32> {
        if zoom >= 31 {
            return None;
        }
        let above = self.0 & !((2u32 << zoom) - 1);
        if above == 0 {
            None
        } else {
            Some(above.trailing_zeros())
        }
    }

    /// Number of disabled levels between `zoom` and the next enabled level
    /// (0 if the next level is enabled or there is none).
    pub fn skipped_after(self, zoom: u32) -> u32 {
        self.child_of(zoom).map_or(0, |child| child - zoom - 1)
    }

    /// Largest gap between consecutive enabled levels.
    pub fn max_skip(self) -> u32 {
        self.iter().map(|z| self.skipped_after(z)).max().unwrap_or(0)
    }
}

impl Default for ZoomLevels {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<ZoomLevels> for Vec<u32> {
    fn from(levels: ZoomLevels) -> Self {
        levels.iter().collect()
    }
}

impl TryFrom<Vec<u32>> for ZoomLevels {
    type Error = String;

    fn try_from(levels: Vec<u32>) -> Result<Self, Self::Error> {
        ZoomLevels::from_levels(&levels)
    }
}
