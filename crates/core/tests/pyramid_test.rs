use tempfile::NamedTempFile;
use tilekit::pyramid::{IndexFile, ROOT_TIP, TileIndexBuilder};
use tilekit::types::{Tile, ZoomLevels};
use tilekit::{BuildSettings, TileError};

const GRID: [u64; 16] = [5, 0, 0, 12, 0, 0, 8, 0, 3, 0, 0, 0, 0, 0, 0, 20];

fn builder() -> TileIndexBuilder {
    let settings = BuildSettings::default()
        .with_leaf_zoom(2)
        .with_zoom_levels(ZoomLevels::from_levels(&[0, 1, 2]).unwrap())
        .with_min_tile_density(10);
    TileIndexBuilder::new(settings).unwrap()
}

fn tile(z: u32, col: u32, row: u32) -> Tile {
    Tile::new(col, row, z).unwrap()
}

#[test]
fn test_dense_cells_stand_alone() {
    let pyramid = builder().build(&GRID).unwrap();
    let mut kept: Vec<String> = pyramid.tiles().iter().map(|t| t.tile.to_string()).collect();
    kept.sort();
    assert_eq!(kept, vec!["0/0/0", "1/1/0", "1/1/1", "2/3/0", "2/3/3"]);

    assert!(pyramid.get(tile(2, 0, 0)).is_none());
    assert!(pyramid.get(tile(2, 2, 1)).is_none());
    assert!(pyramid.get(tile(1, 0, 0)).is_none());
    assert_eq!(pyramid.tiles()[0].tile, Tile::ROOT);
    assert_eq!(pyramid.tiles()[0].tip, ROOT_TIP);
}

#[test]
fn test_counts_aggregate_upwards() {
    let pyramid = builder().build(&GRID).unwrap();
    assert_eq!(pyramid.get(Tile::ROOT).unwrap().count, 48);
    assert_eq!(pyramid.get(tile(1, 1, 0)).unwrap().count, 20);
    assert_eq!(pyramid.get(tile(1, 1, 1)).unwrap().count, 20);
    assert_eq!(pyramid.get(tile(2, 3, 3)).unwrap().count, 20);

    // Every feature is stored exactly once.
    let own: u64 = pyramid.tiles().iter().map(|t| t.own_count).sum();
    assert_eq!(own, 48);
}

#[test]
fn test_index_reaches_every_kept_tile() {
    let pyramid = builder().build(&GRID).unwrap();
    let index = pyramid.index();

    let mut walked: Vec<Tile> = index.walk().unwrap().iter().map(|t| t.tile).collect();
    let mut kept: Vec<Tile> = pyramid.tiles().iter().map(|t| t.tile).collect();
    walked.sort();
    kept.sort();
    assert_eq!(walked, kept);

    for t in pyramid.tiles() {
        assert_eq!(index.locate(t.tile).unwrap().tip, t.tip);
    }
    // A cell folded into its parent resolves to the parent.
    assert_eq!(index.locate(tile(2, 2, 1)).unwrap().tile, tile(1, 1, 0));
    assert_eq!(index.locate(tile(2, 0, 0)).unwrap().tile, Tile::ROOT);
}

#[test]
fn test_index_file_roundtrip() {
    let pyramid = builder().build(&GRID).unwrap();
    let mut index = pyramid.into_index();
    let tip = index.locate(tile(2, 3, 3)).unwrap().tip;
    index.set_page(tip, 42).unwrap();

    let temp = NamedTempFile::new().unwrap();
    let file = IndexFile::new(temp.path());
    file.save(&index).unwrap();
    let loaded = file.load().unwrap();
    assert_eq!(loaded, index);
    assert_eq!(loaded.locate(tile(2, 3, 3)).unwrap().page, Some(42));
}

#[test]
fn test_garbage_index_file_rejected() {
    let temp = NamedTempFile::new().unwrap();
    std::fs::write(temp.path(), b"not an index").unwrap();
    assert!(matches!(
        IndexFile::new(temp.path()).load(),
        Err(TileError::InvalidFormat) | Err(TileError::Io(_))
    ));
}
