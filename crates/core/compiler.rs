//! Per-tile compilation and the parallel batch runner.
//!
//! Compiling a tile decodes it, rebuilds its spatial index, lays it out
//! again and writes the result. Each tile owns its model and layout, so a
//! batch compiles tiles on the rayon pool without any shared state; results
//! are returned in TIP order and a failing tile never stops its siblings.

use crate::config::{IndexSettings, TesSettings};
use crate::error::{Result, TileError};
use crate::index::{IndexSummary, Indexer};
use crate::model::TileModel;
use crate::tes::TesWriter;
use bytes::Bytes;
use rayon::prelude::*;
use tilekit_types::Tile;

/// One tile to compile.
#[derive(Debug, Clone)]
pub struct TileJob {
    pub tip: u32,
    pub tile: Tile,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct CompiledTile {
    pub tip: u32,
    pub tile: Tile,
    pub data: Bytes,
    pub summary: IndexSummary,
}

#[derive(Debug)]
pub struct FailedTile {
    pub tip: u32,
    pub tile: Tile,
    pub error: TileError,
}

/// Outcome of [`TileCompiler::compile_batch`], both lists sorted by TIP.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub compiled: Vec<CompiledTile>,
    pub failed: Vec<FailedTile>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Rebuilds compact tiles and exports them as TES streams.
///
/// # Examples
///
/// ```
/// use tilekit::compiler::TileCompiler;
/// use tilekit::config::{IndexSettings, TesSettings};
/// use tilekit::model::TileModel;
/// use tilekit::types::{Coordinate, Tile};
///
/// let mut model = TileModel::new(Tile::ROOT);
/// let tags = model.empty_tags();
/// model.add_node(1, Coordinate::new(0, 0), tags)?;
///
/// let compiler = TileCompiler::new(IndexSettings::default(), TesSettings::default())?;
/// let tile = compiler.compile_model(&mut model)?;
/// let again = compiler.compile(Tile::ROOT, &tile)?;
/// assert_eq!(tile, again);
/// # Ok::<(), tilekit::TileError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TileCompiler {
    indexer: Indexer,
    tes_settings: TesSettings,
}

impl TileCompiler {
    /// Fails if the index settings are invalid or ask for more key
    /// categories than a tile can hold.
    pub fn new(index_settings: IndexSettings, tes_settings: TesSettings) -> Result<Self> {
        Ok(Self {
            indexer: Indexer::new(&index_settings)?,
            tes_settings,
        })
    }

    /// Index, lay out and write a model.
    pub fn compile_model(&self, model: &mut TileModel) -> Result<Bytes> {
        self.compile_with_summary(model).map(|(bytes, _)| bytes)
    }

    fn compile_with_summary(&self, model: &mut TileModel) -> Result<(Bytes, IndexSummary)> {
        let summary = self.indexer.index(model)?;
        let layout = model.layout()?;
        let bytes = model.write(&layout)?;
        log::debug!(
            "Compiled tile {}: {} features in {} roots, {} bytes ({} padding)",
            model.tile(),
            summary.features,
            summary.roots,
            bytes.len(),
            layout.padding()
        );
        Ok((bytes, summary))
    }

    /// Decode a compact tile and write it again with a fresh index.
    pub fn compile(&self, tile: Tile, data: &[u8]) -> Result<Bytes> {
        let mut model = TileModel::read_tile(tile, data)?;
        self.compile_model(&mut model)
    }

    /// Decode a compact tile and export all of it as a TES stream.
    pub fn export_tes(&self, tile: Tile, data: &[u8]) -> Result<Bytes> {
        let model = TileModel::read_tile(tile, data)?;
        TesWriter::new(&model, &self.tes_settings).write()
    }

    /// Compile every job in parallel. Failures are logged and reported
    /// alongside the successes.
    pub fn compile_batch(&self, jobs: Vec<TileJob>) -> BatchReport {
        let results: Vec<(TileJob, Result<(Bytes, IndexSummary)>)> = jobs
            .into_par_iter()
            .map(|job| {
                let result = TileModel::read_tile(job.tile, &job.data)
                    .and_then(|mut model| self.compile_with_summary(&mut model));
                (job, result)
            })
            .collect();

        let mut report = BatchReport::default();
        for (job, result) in results {
            match result {
                Ok((data, summary)) => report.compiled.push(CompiledTile {
                    tip: job.tip,
                    tile: job.tile,
                    data,
                    summary,
                }),
                Err(error) => {
                    log::warn!("Skipping tile {} (TIP {}): {}", job.tile, job.tip, error);
                    report.failed.push(FailedTile {
                        tip: job.tip,
                        tile: job.tile,
                        error,
                    });
                }
            }
        }
        report.compiled.sort_by_key(|t| t.tip);
        report.failed.sort_by_key(|t| t.tip);
        log::info!(
            "Compiled {} tiles, {} failed",
            report.compiled.len(),
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalTag, TagTable, TagValue};
    use tilekit_types::Coordinate;

    fn sample_tile(tile: Tile, nodes: u64) -> Bytes {
        let mut model = TileModel::new(tile);
        let b = tile.bounds();
        let tags = model
            .add_tag_table(TagTable::new(
                vec![GlobalTag {
                    key: 7,
                    value: TagValue::NarrowNumber(3),
                }],
                Vec::new(),
            ))
            .unwrap();
        for id in 0..nodes {
            let xy = Coordinate::new(b.min_x + id as i32 * 1000, b.min_y + 5);
            model.add_node(id + 1, xy, tags).unwrap();
        }
        compiler().compile_model(&mut model).unwrap()
    }

    fn compiler() -> TileCompiler {
        TileCompiler::new(IndexSettings::default(), TesSettings::default()).unwrap()
    }

    #[test]
    fn test_compile_is_stable() {
        let tile = Tile::new(1, 1, 1).unwrap();
        let first = sample_tile(tile, 25);
        let second = compiler().compile(tile, &first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_export_tes_carries_every_feature() {
        let tile = Tile::new(0, 1, 1).unwrap();
        let data = sample_tile(tile, 12);
        let stream = compiler().export_tes(tile, &data).unwrap();
        let model = crate::tes::TesReader::read(tile, &stream).unwrap();
        assert_eq!(model.feature_count(), 12);
    }

    #[test]
    fn test_rejects_too_many_key_indexes() {
        let settings = IndexSettings::default().with_max_key_indexes(33);
        assert!(matches!(
            TileCompiler::new(settings, TesSettings::default()),
            Err(TileError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = Tile::new(0, 0, 1).unwrap();
        let other = Tile::new(1, 0, 1).unwrap();
        let mut broken = sample_tile(good, 3).to_vec();
        broken[0] ^= 0x40;

        let jobs = vec![
            TileJob {
                tip: 9,
                tile: other,
                data: sample_tile(other, 4),
            },
            TileJob {
                tip: 4,
                tile: good,
                data: Bytes::from(broken),
            },
            TileJob {
                tip: 2,
                tile: good,
                data: sample_tile(good, 3),
            },
        ];
        let report = compiler().compile_batch(jobs);
        assert!(!report.is_success());
        let tips: Vec<u32> = report.compiled.iter().map(|t| t.tip).collect();
        assert_eq!(tips, vec![2, 9]);
        assert_eq!(report.compiled[1].summary.features, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].tip, 4);
    }
}
