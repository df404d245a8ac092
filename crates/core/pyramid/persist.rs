//! On-disk storage of a tile index.
//!
//! Index files are written synchronously and atomically replace the previous
//! file: the data goes to a temporary sibling, is synced, then renamed.

use crate::error::{Result, TileError};
use crate::pyramid::index::TileIndex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const INDEX_MAGIC: &[u8] = b"TILEKIT_INDEX";
const INDEX_VERSION: u8 = 1;

pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<TileIndex> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let mut magic = vec![0u8; INDEX_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(TileError::InvalidFormat);
        }

        let version = read_u8(&mut reader)?;
        if version != INDEX_VERSION {
            return Err(TileError::InvalidFormat);
        }

        let tier_count = read_u8(&mut reader)? as usize;
        let mut tiers = Vec::with_capacity(tier_count);
        for _ in 0..tier_count {
            tiers.push(read_u8(&mut reader)? as u32);
        }

        let slot_count = read_u32(&mut reader)? as usize;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() != slot_count * 4 {
            return Err(TileError::InvalidFormat);
        }
        TileIndex::from_bytes(tiers, &bytes)
    }

    pub fn save(&self, index: &TileIndex) -> Result<()> {
        let temp_path = self.temp_path();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);

        writer.write_all(INDEX_MAGIC)?;
        writer.write_all(&[INDEX_VERSION])?;
        write_u8(&mut writer, index.tiers().len() as u8)?;
        for &tier in index.tiers() {
            write_u8(&mut writer, tier as u8)?;
        }
        write_u32(&mut writer, index.tip_count())?;
        writer.write_all(&index.to_bytes())?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        self.sync_parent_dir()?;

        log::debug!(
            "Saved tile index with {} slots to {}",
            index.tip_count(),
            self.path.display()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }

    fn sync_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }
}

fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> TileIndex {
        TileIndex::from_slots(vec![0, 2], vec![4, 0, 0b1, 0, 0]).unwrap()
    }

    #[test]
    fn test_index_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path().join("tiles.idx"));
        assert!(!file.exists());

        let index = sample();
        file.save(&index).unwrap();
        assert!(file.exists());
        assert!(!dir.path().join("tiles.idx.tmp").exists());

        let loaded = file.load().unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path().join("tiles.idx"));
        file.save(&sample()).unwrap();

        let mut index = sample();
        index.set_page(3, 17).unwrap();
        file.save(&index).unwrap();
        assert_eq!(file.load().unwrap().page(3), Some(17));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.idx");
        std::fs::write(&path, b"NOT_AN_INDEX_FILE").unwrap();
        assert!(matches!(
            IndexFile::new(&path).load(),
            Err(TileError::InvalidFormat)
        ));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = TempDir::new().unwrap();
        let file = IndexFile::new(dir.path().join("tiles.idx"));
        file.save(&sample()).unwrap();
        let bytes = std::fs::read(file.path()).unwrap();
        std::fs::write(file.path(), &bytes[..bytes.len() - 2]).unwrap();
        assert!(file.load().is_err());
    }
}
