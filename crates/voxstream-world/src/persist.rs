use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use voxstream_storage::{BinaryCodec, CodecError, RunList, VoxelCell};

use crate::coord::ChunkCoord;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("{path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("{field} value {value} does not fit the chunk header")]
    HeaderRange { field: &'static str, value: i64 },
}

/// Everything stored for one chunk column.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkSnapshot {
    /// Non-empty cell count per section, bottom first.
    pub non_empty: Vec<i16>,
    pub max_render_y: i16,
    pub min_render_y: i16,
    /// All sections concatenated bottom-up.
    pub cells: RunList<VoxelCell>,
}

impl ChunkSnapshot {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for n in &self.non_empty {
            n.encode(out)?;
        }
        self.max_render_y.encode(out)?;
        self.min_render_y.encode(out)?;
        self.cells.write_to(out)
    }

    /// Reads a column of `sections` sections of `section_volume` cells each. A body that
    /// decodes past that size is rejected while it is read.
    pub fn read_from<R: Read>(input: &mut R, sections: usize, section_volume: usize) -> Result<Self, CodecError> {
        let non_empty = (0..sections)
            .map(|_| i16::decode(input))
            .collect::<Result<Vec<_>, _>>()?;
        let max_render_y = i16::decode(input)?;
        let min_render_y = i16::decode(input)?;
        let cells = RunList::read_bounded(input, sections.saturating_mul(section_volume))?;
        Ok(Self {
            non_empty,
            max_render_y,
            min_render_y,
            cells,
        })
    }

    /// Check the body against the header and the expected column shape.
    fn verify(&self, section_volume: usize) -> Result<(), String> {
        let expected = self.non_empty.len() * section_volume;
        if self.cells.len() != expected {
            return Err(format!("{} cells, expected {expected}", self.cells.len()));
        }
        let mut counts = vec![0usize; self.non_empty.len()];
        for (start, run) in self.cells.spans() {
            if run.value.is_empty() {
                continue;
            }
            let end = start + run.len as usize;
            let mut i = start;
            while i < end {
                let section = i / section_volume;
                let stop = end.min((section + 1) * section_volume);
                counts[section] += stop - i;
                i = stop;
            }
        }
        for (index, (&stored, &actual)) in self.non_empty.iter().zip(&counts).enumerate() {
            if stored < 0 || stored as usize != actual {
                return Err(format!(
                    "section {index} header says {stored} non-empty cells, body has {actual}"
                ));
            }
        }
        Ok(())
    }
}

pub enum LoadOutcome {
    Loaded(ChunkSnapshot),
    Missing,
    /// The file was unreadable and has been deleted.
    Discarded(PersistError),
}

/// Chunk files under one directory, one per column.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    dir: PathBuf,
    sections: usize,
    section_volume: usize,
}

impl ChunkStore {
    pub fn open(dir: impl Into<PathBuf>, sections: usize, chunk_size: usize) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            sections,
            section_volume: chunk_size * chunk_size * chunk_size,
        })
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{cx:08x}{cz:08x}.chunk`, both coordinates as two's-complement hex.
    pub fn path_for(&self, coord: ChunkCoord) -> PathBuf {
        self.dir
            .join(format!("{:08x}{:08x}.chunk", coord.cx as u32, coord.cz as u32))
    }

    /// Write through a temporary sibling and rename it into place. Returns the file size.
    pub fn save(&self, coord: ChunkCoord, snapshot: &ChunkSnapshot) -> Result<u64, PersistError> {
        let path = self.path_for(coord);
        let tmp = path.with_extension("chunk.tmp");
        let io_err = |source| PersistError::Io {
            path: path.clone(),
            source,
        };
        let file = File::create(&tmp).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        snapshot.write_to(&mut out).map_err(io_err)?;
        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;
        let bytes = file.metadata().map_err(io_err)?.len();
        drop(file);
        fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(bytes)
    }

    /// Read a chunk file. Anything unreadable is deleted so the column regenerates.
    pub fn load(&self, coord: ChunkCoord) -> LoadOutcome {
        let path = self.path_for(coord);
        match self.read(&path) {
            Ok(Some(snapshot)) => LoadOutcome::Loaded(snapshot),
            Ok(None) => LoadOutcome::Missing,
            Err(err) => {
                log::warn!(target: "persist", "discarding chunk ({}, {}): {}", coord.cx, coord.cz, err);
                self.discard(coord);
                LoadOutcome::Discarded(err)
            }
        }
    }

    /// Delete the file for `coord`, if any.
    pub fn discard(&self, coord: ChunkCoord) {
        let path = self.path_for(coord);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!(target: "persist", "could not delete {}: {}", path.display(), e);
            }
        }
    }

    fn read(&self, path: &Path) -> Result<Option<ChunkSnapshot>, PersistError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut input = BufReader::new(file);
        let snapshot =
            ChunkSnapshot::read_from(&mut input, self.sections, self.section_volume).map_err(|source| PersistError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        let corrupt = |reason: String| PersistError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        let mut rest = [0u8; 1];
        match input.read(&mut rest) {
            Ok(0) => {}
            Ok(_) => return Err(corrupt("trailing bytes after cell data".into())),
            Err(source) => {
                return Err(PersistError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        snapshot.verify(self.section_volume).map_err(corrupt)?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use voxstream_storage::CellKind;

    use super::*;

    fn snapshot() -> ChunkSnapshot {
        let mut flat = vec![VoxelCell::AIR; 2 * 64];
        for c in &mut flat[..20] {
            *c = VoxelCell::new(CellKind::Stone);
        }
        flat[64 + 5] = VoxelCell::new(CellKind::Dirt);
        ChunkSnapshot {
            non_empty: vec![20, 1],
            max_render_y: 5,
            min_render_y: 1,
            cells: RunList::compress(&flat),
        }
    }

    #[test]
    fn file_names_are_hex_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 2, 4).unwrap();
        let p = store.path_for(ChunkCoord::new(-1, 2));
        assert_eq!(p.file_name().unwrap(), "ffffffff00000002.chunk");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 2, 4).unwrap();
        let coord = ChunkCoord::new(3, -4);
        let bytes = store.save(coord, &snapshot()).unwrap();
        // header: 2 counts + 2 render bounds, then run count + 4 runs of (len, 2-byte cell)
        assert_eq!(bytes, 2 * 2 + 2 * 2 + 4 + 4 * 6);
        match store.load(coord) {
            LoadOutcome::Loaded(s) => assert_eq!(s, snapshot()),
            _ => panic!("expected a loaded snapshot"),
        }
        assert!(!store.path_for(coord).with_extension("chunk.tmp").exists());
    }

    #[test]
    fn mismatched_header_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 2, 4).unwrap();
        let coord = ChunkCoord::new(0, 0);
        let mut bad = snapshot();
        bad.non_empty[1] = 7;
        store.save(coord, &bad).unwrap();
        assert!(matches!(
            store.load(coord),
            LoadOutcome::Discarded(PersistError::Corrupt { .. })
        ));
        assert!(!store.path_for(coord).exists());
    }

    #[test]
    fn run_body_past_the_column_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 1, 4).unwrap();
        let coord = ChunkCoord::new(1, 1);
        let mut bytes = Vec::new();
        for v in [0i16, 0, 0] {
            v.encode(&mut bytes).unwrap();
        }
        3i32.encode(&mut bytes).unwrap();
        for _ in 0..3 {
            i32::MAX.encode(&mut bytes).unwrap();
            VoxelCell::AIR.encode(&mut bytes).unwrap();
        }
        fs::write(store.path_for(coord), bytes).unwrap();
        assert!(matches!(
            store.load(coord),
            LoadOutcome::Discarded(PersistError::Decode {
                source: CodecError::LengthOverflow { index: 0, limit: 64 },
                ..
            })
        ));
        assert!(!store.path_for(coord).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path(), 1, 4).unwrap();
        assert!(matches!(store.load(ChunkCoord::new(9, 9)), LoadOutcome::Missing));
    }
}
