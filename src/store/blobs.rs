use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{ChainError, ChainResult};
use crate::primitives::Hash;

const BLOB_MAGIC: u32 = 0x4342_4C31; // "CBL1"
const BLOB_VERSION: u16 = 1;
const BLOB_FLAG_UNCOMPRESSED: u16 = 0x0001;
const BLOB_HEADER_SIZE: usize = 28;

fn hex(hash: &Hash) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Blob category; each gets its own fanout directory and extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Block,
    Undo,
}

impl BlobKind {
    fn dir(self) -> &'static str {
        match self {
            BlobKind::Block => "block",
            BlobKind::Undo => "undo",
        }
    }

    fn ext(self) -> &'static str {
        match self {
            BlobKind::Block => "blk",
            BlobKind::Undo => "und",
        }
    }
}

struct BlobHeader {
    magic: u32,
    version: u16,
    flags: u16,
    uncompressed_len: u64,
    compressed_len: u64,
    checksum: u32,
}

impl BlobHeader {
    fn to_bytes(&self) -> [u8; BLOB_HEADER_SIZE] {
        let mut buf = [0u8; BLOB_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.compressed_len.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(bytes: &[u8; BLOB_HEADER_SIZE]) -> ChainResult<Self> {
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != BLOB_MAGIC {
            return Err(ChainError::BlobHeaderInvalid {
                reason: "invalid magic",
            });
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != BLOB_VERSION {
            return Err(ChainError::BlobHeaderInvalid {
                reason: "unsupported version",
            });
        }
        Ok(Self {
            magic,
            version,
            flags: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
            uncompressed_len: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            compressed_len: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
        })
    }
}

fn checksum(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    u32::from_le_bytes(hash.as_bytes()[0..4].try_into().unwrap())
}

/// Append-only store of raw blocks and undo records, one framed file per
/// blob under a two-level fanout, with batched writes and idempotent
/// batched prunes.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    compress: bool,
    compression_level: i32,
}

impl BlobStore {
    pub fn open(root: &Path, compress: bool) -> ChainResult<Self> {
        for kind in [BlobKind::Block, BlobKind::Undo] {
            fs::create_dir_all(root.join(kind.dir()))?;
        }
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self {
            root: root.to_path_buf(),
            compress,
            compression_level: 0,
        })
    }

    fn path_for(&self, kind: BlobKind, hash: &Hash) -> PathBuf {
        let name = hex(hash);
        self.root
            .join(kind.dir())
            .join(&name[0..2])
            .join(format!("{name}.{}", kind.ext()))
    }

    pub fn batch(&self) -> BlobBatch {
        BlobBatch::default()
    }

    pub fn has(&self, kind: BlobKind, hash: &Hash) -> bool {
        self.path_for(kind, hash).exists()
    }

    pub fn read(&self, kind: BlobKind, hash: &Hash) -> ChainResult<Option<Vec<u8>>> {
        let path = self.path_for(kind, hash);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut header_bytes = [0u8; BLOB_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = BlobHeader::from_bytes(&header_bytes)?;

        let mut payload = vec![0u8; header.compressed_len as usize];
        file.read_exact(&mut payload)?;

        if checksum(&payload) != header.checksum {
            return Err(ChainError::BlobChecksumMismatch(*hash));
        }

        let data = if header.flags & BLOB_FLAG_UNCOMPRESSED != 0 {
            payload
        } else {
            zstd::stream::decode_all(Cursor::new(&payload))?
        };

        if data.len() as u64 != header.uncompressed_len {
            return Err(ChainError::BlobHeaderInvalid {
                reason: "uncompressed length mismatch",
            });
        }

        Ok(Some(data))
    }

    fn write_file(&self, kind: BlobKind, hash: &Hash, data: &[u8]) -> ChainResult<()> {
        let (payload, flags) = if self.compress {
            let compressed =
                zstd::stream::encode_all(Cursor::new(data), self.compression_level)?;
            if compressed.len() < data.len() {
                (compressed, 0)
            } else {
                (data.to_vec(), BLOB_FLAG_UNCOMPRESSED)
            }
        } else {
            (data.to_vec(), BLOB_FLAG_UNCOMPRESSED)
        };

        let header = BlobHeader {
            magic: BLOB_MAGIC,
            version: BLOB_VERSION,
            flags,
            uncompressed_len: data.len() as u64,
            compressed_len: payload.len() as u64,
            checksum: checksum(&payload),
        };

        let final_path = self.path_for(kind, hash);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write through a temp file and rename so a crash never leaves a
        // truncated blob at its final path.
        let tmp_path = self
            .root
            .join("tmp")
            .join(format!("{}.{}", hex(hash), kind.ext()));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&payload)?;
        file.sync_data()?;
        drop(file);
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn prune_file(&self, kind: BlobKind, hash: &Hash) -> ChainResult<()> {
        match fs::remove_file(self.path_for(kind, hash)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist every staged write. Runs before the metadata commit: a crash
    /// afterwards leaves orphan blobs that nothing references yet.
    pub fn commit_writes(&self, batch: &BlobBatch) -> ChainResult<()> {
        for (kind, hash, data) in &batch.writes {
            self.write_file(*kind, hash, data)?;
        }
        Ok(())
    }

    /// Apply every staged prune. Deleting an already-missing blob is a
    /// no-op, so this is safe to repeat after a crash.
    pub fn commit_prunes(&self, batch: &BlobBatch) -> ChainResult<()> {
        for (kind, hash) in &batch.prunes {
            self.prune_file(*kind, hash)?;
        }
        Ok(())
    }
}

/// Staged blob writes and prunes for one chain batch.
#[derive(Debug, Default)]
pub struct BlobBatch {
    writes: Vec<(BlobKind, Hash, Vec<u8>)>,
    prunes: Vec<(BlobKind, Hash)>,
}

impl BlobBatch {
    pub fn write(&mut self, kind: BlobKind, hash: Hash, data: Vec<u8>) {
        self.writes.push((kind, hash, data));
    }

    pub fn prune(&mut self, kind: BlobKind, hash: Hash) {
        self.prunes.push((kind, hash));
    }

    pub fn clear(&mut self) {
        self.writes.clear();
        self.prunes.clear();
    }

    pub fn has_prunes(&self) -> bool {
        !self.prunes.is_empty()
    }
}
