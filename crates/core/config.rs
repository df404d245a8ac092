//! Settings consumed by the pyramid builder, the spatial indexer and the
//! TES codec.
//!
//! Every settings type follows the same pattern: serde field defaults,
//! `with_*` builder methods, a `validate()` check and JSON (plus optional
//! TOML) loading that rejects invalid values.
use crate::error::TileError;
#[cfg(feature = "toml")]
use serde::de::Error;
use tilekit_types::tile::MAX_ZOOM;
use tilekit_types::zoom::ZoomLevels;

/// Most zoom tiers a pyramid may use.
pub const MAX_TIERS: u32 = 8;

/// Most tiles a pyramid may keep.
pub const MAX_TILES_LIMIT: u32 = 8_000_000;

/// Most key-index categories a tile may carry.
pub const MAX_CATEGORIES: u32 = 32;

/// Settings for turning per-cell feature counts into a tile pyramid.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSettings {
    /// Zoom level of the per-cell count grid.
    #[serde(default = "BuildSettings::default_leaf_zoom")]
    pub leaf_zoom: u32,

    #[serde(default)]
    pub zoom_levels: ZoomLevels,

    /// Aggregated count a tile needs to be stored on its own.
    #[serde(default = "BuildSettings::default_min_tile_density")]
    pub min_tile_density: u64,

    #[serde(default = "BuildSettings::default_max_tiles")]
    pub max_tiles: u32,

    /// Storage page size in bytes.
    #[serde(default = "BuildSettings::default_page_size")]
    pub page_size: u32,
}

impl BuildSettings {
    const fn default_leaf_zoom() -> u32 {
        12
    }

    const fn default_min_tile_density() -> u64 {
        25_000
    }

    const fn default_max_tiles() -> u32 {
        65_535
    }

    const fn default_page_size() -> u32 {
        1 << 16
    }

    pub fn with_leaf_zoom(mut self, zoom: u32) -> Self {
        self.leaf_zoom = zoom;
        self
    }

    pub fn with_zoom_levels(mut self, levels: ZoomLevels) -> Self {
        self.zoom_levels = levels;
        self
    }

    pub fn with_min_tile_density(mut self, density: u64) -> Self {
        self.min_tile_density = density;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: u32) -> Self {
        if max_tiles > MAX_TILES_LIMIT {
            log::warn!(
                "Maximum tile count {} exceeds the limit of {}, clamping",
                max_tiles,
                MAX_TILES_LIMIT
            );
        }
        self.max_tiles = max_tiles.min(MAX_TILES_LIMIT);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Enabled levels up to and including the leaf zoom.
    pub fn tiers(&self) -> Vec<u32> {
        self.zoom_levels
            .iter()
            .filter(|&z| z <= self.leaf_zoom)
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.leaf_zoom > MAX_ZOOM {
            return Err(format!(
                "Leaf zoom {} exceeds the maximum of {}",
                self.leaf_zoom, MAX_ZOOM
            ));
        }
        if !self.zoom_levels.contains(0) {
            return Err("Zoom levels must include level 0".to_string());
        }
        if let Some(level) = self.zoom_levels.iter().find(|&z| z > self.leaf_zoom) {
            return Err(format!(
                "Zoom level {} is finer than the leaf zoom {}",
                level, self.leaf_zoom
            ));
        }
        // The leaf grid always forms the bottom tier, enabled or not.
        if self.zoom_levels.with(self.leaf_zoom).max_skip() > 2 {
            return Err("Zoom levels may skip at most 2 levels between tiers".to_string());
        }
        if self.page_size == 0 {
            return Err("Page size must be greater than zero".to_string());
        }
        if self.max_tiles == 0 || self.max_tiles > MAX_TILES_LIMIT {
            return Err(format!(
                "Maximum tile count must be between 1 and {}",
                MAX_TILES_LIMIT
            ));
        }
        Ok(())
    }

    /// Parse and validate. Malformed JSON is a [`TileError::Json`],
    /// out-of-range values a [`TileError::Configuration`].
    pub fn from_json(json: &str) -> Result<Self, TileError> {
        let settings: BuildSettings = serde_json::from_str(json)?;
        settings.validate().map_err(TileError::Configuration)?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, TileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let settings: BuildSettings = toml::from_str(toml_str)?;
        if let Err(e) = settings.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(settings)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            leaf_zoom: Self::default_leaf_zoom(),
            zoom_levels: ZoomLevels::DEFAULT,
            min_tile_density: Self::default_min_tile_density(),
            max_tiles: Self::default_max_tiles(),
            page_size: Self::default_page_size(),
        }
    }
}

/// Assigns a global key code to a key-index category (1 to 32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyCategory {
    pub key: u16,
    pub category: u8,
}

/// Settings for building the spatial index embedded in each tile.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSettings {
    /// Entries per leaf and trunk node.
    #[serde(default = "IndexSettings::default_bucket_size")]
    pub bucket_size: usize,

    /// Most category roots per index type, not counting the multi-category root.
    #[serde(default = "IndexSettings::default_max_key_indexes")]
    pub max_key_indexes: u32,

    /// Features a category needs before it gets a root of its own.
    #[serde(default = "IndexSettings::default_key_index_min_features")]
    pub key_index_min_features: usize,

    #[serde(default)]
    pub key_categories: Vec<KeyCategory>,
}

impl IndexSettings {
    const fn default_bucket_size() -> usize {
        9
    }

    const fn default_max_key_indexes() -> u32 {
        8
    }

    const fn default_key_index_min_features() -> usize {
        300
    }

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_max_key_indexes(mut self, max: u32) -> Self {
        self.max_key_indexes = max;
        self
    }

    pub fn with_key_index_min_features(mut self, min: usize) -> Self {
        self.key_index_min_features = min;
        self
    }

    pub fn with_key_category(mut self, key: u16, category: u8) -> Self {
        self.key_categories.retain(|kc| kc.key != key);
        self.key_categories.push(KeyCategory { key, category });
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_size < 2 {
            return Err("Bucket size must be at least 2".to_string());
        }
        if let Some(kc) = self
            .key_categories
            .iter()
            .find(|kc| kc.category == 0 || kc.category as u32 > MAX_CATEGORIES)
        {
            return Err(format!(
                "Category {} for key {} is outside 1..={}",
                kc.category, kc.key, MAX_CATEGORIES
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, TileError> {
        let settings: IndexSettings = serde_json::from_str(json)?;
        settings.validate().map_err(TileError::Configuration)?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, TileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let settings: IndexSettings = toml::from_str(toml_str)?;
        if let Err(e) = settings.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(settings)
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            bucket_size: Self::default_bucket_size(),
            max_key_indexes: Self::default_max_key_indexes(),
            key_index_min_features: Self::default_key_index_min_features(),
            key_categories: Vec::new(),
        }
    }
}

/// Promotion thresholds for the shared sections of a TES stream.
///
/// An element is shared once it is used more than `threshold + 1` times,
/// i.e. its repeat usage exceeds the threshold.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TesSettings {
    #[serde(default)]
    pub string_threshold: u32,

    #[serde(default = "TesSettings::default_table_threshold")]
    pub tag_table_threshold: u32,

    #[serde(default = "TesSettings::default_table_threshold")]
    pub relation_table_threshold: u32,
}

impl TesSettings {
    const fn default_table_threshold() -> u32 {
        1
    }

    pub fn with_string_threshold(mut self, threshold: u32) -> Self {
        self.string_threshold = threshold;
        self
    }

    pub fn with_tag_table_threshold(mut self, threshold: u32) -> Self {
        self.tag_table_threshold = threshold;
        self
    }

    pub fn with_relation_table_threshold(mut self, threshold: u32) -> Self {
        self.relation_table_threshold = threshold;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, TileError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, TileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for TesSettings {
    fn default() -> Self {
        Self {
            string_threshold: 0,
            tag_table_threshold: Self::default_table_threshold(),
            relation_table_threshold: Self::default_table_threshold(),
        }
    }
}
