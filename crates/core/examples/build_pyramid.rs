use tilekit::model::{GlobalTag, TagValue};
use tilekit::prelude::*;
use tilekit::pyramid::IndexFile;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG=debug to see per-tile statistics
    env_logger::init();

    println!("=== tilekit - Building a Pyramid ===\n");

    // === PYRAMID ===
    println!("1. Pyramid from per-cell counts");
    println!("-------------------------------");

    let levels = ZoomLevels::from_levels(&[0, 2, 4]).map_err(TileError::Configuration)?;
    let settings = BuildSettings::default()
        .with_leaf_zoom(4)
        .with_zoom_levels(levels)
        .with_min_tile_density(40);

    // A hot spot in the north-west, thin coverage elsewhere.
    let side = 16u64;
    let counts: Vec<u64> = (0..side * side)
        .map(|i| {
            let (col, row) = (i % side, i / side);
            if col < 4 && row < 4 { 60 } else { (col + row) % 3 }
        })
        .collect();

    let pyramid = TileIndexBuilder::new(settings)?.build(&counts)?;
    println!("   Kept {} tiles:", pyramid.len());
    for t in pyramid.tiles() {
        println!(
            "   {:>8}  tip {:>3}  {:>5} features, {} own",
            t.tile.to_string(),
            t.tip,
            t.count,
            t.own_count
        );
    }

    let path = std::env::temp_dir().join("tilekit-example.idx");
    IndexFile::new(&path).save(pyramid.index())?;
    println!("   Saved index to {}\n", path.display());

    // === TILES ===
    println!("2. Compiling tiles in parallel");
    println!("------------------------------");

    let compiler = TileCompiler::new(IndexSettings::default(), TesSettings::default())?;
    let mut jobs = Vec::new();
    for t in pyramid.tiles() {
        let mut model = TileModel::new(t.tile);
        let b = t.tile.bounds();
        let tags = model.add_tag_table(TagTable::new(
            vec![GlobalTag {
                key: 1,
                value: TagValue::NarrowNumber(t.tile.zoom() as u16),
            }],
            Vec::new(),
        ))?;
        for id in 0..t.own_count {
            let xy = Coordinate::new(b.min_x + id as i32 * 1_000, b.min_y + id as i32 * 500);
            model.add_node(id + 1, xy, tags)?;
        }
        jobs.push(TileJob {
            tip: t.tip,
            tile: t.tile,
            data: compiler.compile_model(&mut model)?,
        });
    }

    let report = compiler.compile_batch(jobs);
    for tile in &report.compiled {
        println!(
            "   {:>8}  {:>6} bytes  {} roots, {} leaves",
            tile.tile.to_string(),
            tile.data.len(),
            tile.summary.roots,
            tile.summary.leaves
        );
    }
    for failed in &report.failed {
        println!("   {:>8}  failed: {}", failed.tile.to_string(), failed.error);
    }

    // === EXCHANGE ===
    println!("\n3. Exchange stream");
    println!("------------------");

    if let Some(first) = report.compiled.first() {
        let stream = compiler.export_tes(first.tile, &first.data)?;
        let model = TesReader::read(first.tile, &stream)?;
        println!(
            "   Tile {}: {} bytes compact, {} bytes TES, {} features",
            first.tile,
            first.data.len(),
            stream.len(),
            model.feature_count()
        );
    }

    Ok(())
}
