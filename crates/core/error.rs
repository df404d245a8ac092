//! Error types for the tile storage core.

use thiserror::Error;

/// Errors raised while building pyramids or encoding and decoding tiles.
#[derive(Debug, Error)]
pub enum TileError {
    /// The input bytes do not describe a well-formed structure.
    #[error("Structural corruption at offset {offset}: {reason}")]
    StructuralCorruption { offset: usize, reason: String },

    /// A read ran past the end of the input.
    #[error("Unexpected end of data at offset {offset}")]
    UnexpectedEof { offset: usize },

    /// More tiers, roots or categories than the fixed storage allows.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// An element or buffer grew beyond what the format can address.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A reference names a feature the target model does not have.
    #[error("Missing feature: {0}")]
    MissingFeature(String),

    /// An element was written before the layout assigned it a location.
    #[error("Layout error: {0}")]
    Layout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format")]
    InvalidFormat,
}

impl TileError {
    pub fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        TileError::StructuralCorruption {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_offset() {
        let err = TileError::corrupt(128, "pointer outside tile");
        assert_eq!(
            err.to_string(),
            "Structural corruption at offset 128: pointer outside tile"
        );
    }

    #[test]
    fn test_io_conversion() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(TileError::Io(_))));
    }
}
