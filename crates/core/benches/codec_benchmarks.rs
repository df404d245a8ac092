use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tilekit::compiler::TileJob;
use tilekit::model::{GlobalTag, TagTable, TagValue, TileModel};
use tilekit::types::{Coordinate, Tile, ZoomLevels};
use tilekit::pyramid::TileIndexBuilder;
use tilekit::{BuildSettings, IndexSettings, TesReader, TesSettings, TesWriter, TileCompiler};

fn sample_model(tile: Tile, nodes: u64) -> TileModel {
    let b = tile.bounds();
    let mut model = TileModel::new(tile);
    let tables: Vec<_> = (1..=16u16)
        .map(|key| {
            model
                .add_tag_table(TagTable::new(
                    vec![GlobalTag {
                        key,
                        value: TagValue::NarrowNumber(key * 3),
                    }],
                    Vec::new(),
                ))
                .unwrap()
        })
        .collect();
    for id in 0..nodes {
        let xy = Coordinate::new(
            b.min_x + (id as i32 * 7_919) % 1_000_000,
            b.min_y + (id as i32 * 104_729) % 1_000_000,
        );
        model
            .add_node(id, xy, tables[id as usize % tables.len()])
            .unwrap();
    }
    model
}

fn compiler() -> TileCompiler {
    TileCompiler::new(IndexSettings::default(), TesSettings::default()).unwrap()
}

fn benchmark_tile_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_codec");
    let tile = Tile::new(3, 5, 4).unwrap();

    for &size in &[100u64, 1_000, 10_000] {
        let mut model = sample_model(tile, size);
        let bytes = compiler().compile_model(&mut model).unwrap();

        group.bench_with_input(BenchmarkId::new("compile", size), &size, |b, _| {
            b.iter(|| {
                let mut model = sample_model(tile, size);
                compiler().compile_model(black_box(&mut model)).unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("read_tile", size), &bytes, |b, bytes| {
            b.iter(|| TileModel::read_tile(tile, black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_tes(c: &mut Criterion) {
    let mut group = c.benchmark_group("tes");
    let tile = Tile::new(3, 5, 4).unwrap();
    let settings = TesSettings::default();

    for &size in &[1_000u64, 10_000] {
        let model = sample_model(tile, size);
        let stream = TesWriter::new(&model, &settings).write().unwrap();

        group.bench_with_input(BenchmarkId::new("write", size), &model, |b, model| {
            b.iter(|| TesWriter::new(black_box(model), &settings).write().unwrap())
        });
        group.bench_with_input(BenchmarkId::new("read", size), &stream, |b, stream| {
            b.iter(|| TesReader::read(tile, black_box(stream)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_pyramid(c: &mut Criterion) {
    let settings = BuildSettings::default()
        .with_leaf_zoom(8)
        .with_zoom_levels(ZoomLevels::from_levels(&[0, 2, 4, 6, 8]).unwrap())
        .with_min_tile_density(500);
    let builder = TileIndexBuilder::new(settings).unwrap();
    let counts: Vec<u64> = (0..(1u64 << 16)).map(|i| (i * 2_654_435_761) % 97).collect();

    c.bench_function("pyramid_build_z8", |b| {
        b.iter(|| builder.build(black_box(&counts)).unwrap())
    });
}

fn benchmark_batch(c: &mut Criterion) {
    let jobs: Vec<TileJob> = (0..16u32)
        .map(|i| {
            let tile = Tile::new(i % 4, i / 4, 2).unwrap();
            let mut model = sample_model(tile, 2_000);
            TileJob {
                tip: i + 1,
                tile,
                data: compiler().compile_model(&mut model).unwrap(),
            }
        })
        .collect();

    c.bench_function("compile_batch_16", |b| {
        b.iter(|| compiler().compile_batch(black_box(jobs.clone())))
    });
}

criterion_group!(
    benches,
    benchmark_tile_codec,
    benchmark_tes,
    benchmark_pyramid,
    benchmark_batch
);
criterion_main!(benches);
