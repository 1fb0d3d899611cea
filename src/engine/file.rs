//! File-backed storage engine.
//!
//! Records live in memory exactly as in [`MemoryEngine`](super::MemoryEngine);
//! every committed command also appends the record's new image to an
//! append-only log. Opening the engine replays the log, last image wins.
//!
//! Image layout:
//!
//! ```text
//! magic(4) version(1) flags(1) digest(32) generation(4) len(4) payload(len) crc32(4)
//! ```
//!
//! `flags` carries the compression code of the payload. The checksum covers
//! the stored (possibly compressed) payload.

use super::{apply_operations, OperateResult, Operation, Policy, StorageEngine};
use crate::encoding::Compression;
use crate::error::{Phase, Result, StoreError};
use crate::types::{Digest, Key, Record};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Magic bytes for the engine manifest.
const ENGINE_MAGIC: &[u8; 4] = b"OBS\0";

/// Current engine format version.
const ENGINE_VERSION: u8 = 1;

/// Magic bytes for each record image.
const IMAGE_MAGIC: &[u8; 4] = b"IMG\0";

/// Current image format version.
const IMAGE_VERSION: u8 = 1;

/// Fixed bytes preceding the payload.
const IMAGE_HEADER_SIZE: usize = 4 + 1 + 1 + 32 + 4 + 4;

/// Lock shards for the in-memory view.
const SHARDS: usize = 16;

/// File engine configuration.
#[derive(Clone, Debug)]
pub struct FileEngineConfig {
    /// Directory holding the manifest, lock file and image log.
    pub path: PathBuf,

    /// Compression applied to each stored record image.
    pub compression: Compression,

    /// fsync after this many images (0 or 1 = every image).
    pub sync_every: u64,

    /// Largest encoded record accepted, in bytes.
    pub max_record_size: usize,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileEngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./obslog"),
            compression: Compression::None,
            sync_every: 100,
            max_record_size: 1024 * 1024,
            create_if_missing: true,
        }
    }
}

/// File operations the image log relies on.
trait LogFile: Write + Seek + Send {
    fn sync_all(&self) -> io::Result<()>;
    fn set_len(&self, size: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }

    fn set_len(&self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }
}

struct ImageLog {
    file: Box<dyn LogFile>,
    size: u64,
    writes_since_sync: u64,
}

impl ImageLog {
    /// Append one framed image.
    ///
    /// On any failure the log is cut back to its previous length, so an
    /// image reported as failed is never replayed. If the cut itself fails
    /// the log no longer matches memory and `Corruption` is returned.
    fn append(&mut self, buf: &[u8], sync_every: u64) -> Result<()> {
        let offset = self.size;
        let written = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(buf))
            .and_then(|_| {
                if self.writes_since_sync + 1 >= sync_every.max(1) {
                    self.file.sync_all()
                } else {
                    Ok(())
                }
            });

        if let Err(e) = written {
            warn!(offset, error = %e, "image append failed, rolling back");
            return match self.file.set_len(offset) {
                Ok(()) => Err(e.into()),
                Err(cut) => Err(StoreError::Corruption(format!(
                    "image log not rolled back to {} after '{}': {}",
                    offset, e, cut
                ))),
            };
        }

        self.size = offset + buf.len() as u64;
        self.writes_since_sync += 1;
        if self.writes_since_sync >= sync_every.max(1) {
            self.writes_since_sync = 0;
        }
        Ok(())
    }
}

/// Durable engine backed by an append-only image log.
pub struct FileEngine {
    config: FileEngineConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    shards: Vec<RwLock<HashMap<Digest, Record>>>,

    log: Mutex<ImageLog>,

    open: AtomicBool,
}

impl FileEngine {
    /// Open an existing engine directory or create a new one.
    pub fn open(config: FileEngineConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::verify_manifest(&config.path)?;
        } else if config.create_if_missing {
            fs::create_dir_all(&config.path)?;
            Self::write_manifest(&config.path)?;
        } else {
            return Err(StoreError::InvalidFormat(format!(
                "no engine at {}",
                config.path.display()
            )));
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(config.path.join("records.log"))?;

        let shards: Vec<_> = (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect();
        let size = Self::replay(&mut file, &shards)?;

        Ok(Self {
            config,
            _lock_file: lock_file,
            shards,
            log: Mutex::new(ImageLog {
                file: Box::new(file),
                size,
                writes_since_sync: 0,
            }),
            open: AtomicBool::new(true),
        })
    }

    /// Copy of a record, bypassing the command path.
    pub fn record(&self, key: &Key) -> Option<Record> {
        let digest = key.digest();
        self.shards[digest.shard(SHARDS)].read().get(&digest).cloned()
    }

    /// Bytes written to the image log.
    pub fn log_size(&self) -> u64 {
        self.log.lock().size
    }

    /// Bytes the latest image of each record would occupy on disk.
    pub fn live_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        for shard in &self.shards {
            for record in shard.read().values() {
                let payload = self.config.compression.compress(&rmp_serde::to_vec(record)?)?;
                total += (IMAGE_HEADER_SIZE + payload.len() + 4) as u64;
            }
        }
        Ok(total)
    }

    /// Force pending images to disk.
    pub fn sync(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.file.sync_all()?;
        log.writes_since_sync = 0;
        Ok(())
    }

    /// Get the engine directory.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn append_image(&self, digest: &Digest, record: &Record) -> Result<()> {
        let payload = self.config.compression.compress(&rmp_serde::to_vec(record)?)?;

        let mut buf = Vec::with_capacity(IMAGE_HEADER_SIZE + payload.len() + 4);
        buf.extend_from_slice(IMAGE_MAGIC);
        buf.push(IMAGE_VERSION);
        buf.push(self.config.compression.code());
        buf.extend_from_slice(&digest.0);
        buf.extend_from_slice(&record.generation.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        self.log.lock().append(&buf, self.config.sync_every)
    }

    /// Load every image into `shards`, returning the valid log length.
    ///
    /// A torn image at the tail (crash mid-append) is truncated away. A bad
    /// checksum anywhere else is corruption.
    fn replay(file: &mut File, shards: &[RwLock<HashMap<Digest, Record>>]) -> Result<u64> {
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file.try_clone()?);

        let mut offset = 0u64;
        let mut images = 0u64;
        while offset < file_size {
            match Self::read_image(&mut reader) {
                Ok((digest, record, len)) => {
                    shards[digest.shard(shards.len())]
                        .write()
                        .insert(digest, record);
                    offset += len;
                    images += 1;
                }
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(offset, file_size, "truncating torn image at log tail");
                    file.set_len(offset)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(images, bytes = offset, "image log replayed");
        Ok(offset)
    }

    fn read_image(reader: &mut impl Read) -> Result<(Digest, Record, u64)> {
        let mut header = [0u8; IMAGE_HEADER_SIZE];
        reader.read_exact(&mut header)?;

        if &header[0..4] != IMAGE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid image magic".into()));
        }
        if header[4] != IMAGE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported image version: {}",
                header[4]
            )));
        }
        let compression = header[5];

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&header[6..38]);

        let mut generation_bytes = [0u8; 4];
        generation_bytes.copy_from_slice(&header[38..42]);
        let generation = u32::from_le_bytes(generation_bytes);

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[42..46]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let decoded = Compression::decompress(compression, &payload)?;
        let record: Record = rmp_serde::from_slice(&decoded)?;
        if record.generation != generation {
            return Err(StoreError::Corruption(format!(
                "image generation {} does not match header {}",
                record.generation, generation
            )));
        }

        Ok((Digest(digest), record, (IMAGE_HEADER_SIZE + len + 4) as u64))
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(ENGINE_MAGIC)?;
        file.write_all(&[ENGINE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENGINE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid engine magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENGINE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported engine version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }
}

impl StorageEngine for FileEngine {
    fn operate(&self, key: &Key, ops: &[Operation], policy: &Policy) -> Result<OperateResult> {
        if !self.is_open() {
            return Err(StoreError::Connection {
                key: key.to_string(),
                phase: Phase::Operate,
                reason: "engine closed".into(),
            });
        }

        let digest = key.digest();
        let shard = &self.shards[digest.shard(SHARDS)];
        let timeout = || StoreError::Timeout {
            key: key.to_string(),
            phase: Phase::Operate,
            timeout: policy.timeout,
        };

        if !ops.iter().any(Operation::is_write) {
            let records = shard.try_read_for(policy.timeout).ok_or_else(timeout)?;
            let applied =
                apply_operations(key, records.get(&digest), ops, self.config.max_record_size)?;
            return Ok(applied.result);
        }

        let mut records = shard.try_write_for(policy.timeout).ok_or_else(timeout)?;
        let applied = apply_operations(key, records.get(&digest), ops, self.config.max_record_size)?;
        if let Some(record) = applied.record {
            // Log first: a record that could not be persisted is not committed.
            if let Err(e) = self.append_image(&digest, &record) {
                if matches!(e, StoreError::Corruption(_)) {
                    self.close();
                }
                return Err(e);
            }
            trace!(key = %key, generation = record.generation, "image appended");
            records.insert(digest, record);
        }
        Ok(applied.result)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn record_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

impl Drop for FileEngine {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
