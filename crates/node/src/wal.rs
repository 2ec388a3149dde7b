//! Write-ahead log: one append-only file per node.
//!
//! Every mutation is appended and fsynced here before the in-memory map
//! changes; recovery replays the file in order at boot. Records are
//! self-delimiting so a crashed writer leaves at worst a truncated tail.
//!
//! # Record Layout
//!
//! ```text
//! ┌──────────────────┬───────────────────────────────┬───────────┐
//! │ Length (4 bytes) │ Payload (variable)            │ CRC32 (4) │
//! └──────────────────┴───────────────────────────────┴───────────┘
//!
//! Payload:
//! ┌─────────────┬────────┬──────────────┬────────────┬─────────┬─────┬───────────┬───────┐
//! │ Version (1) │ Op (1) │ Timestamp (8)│ TTL ns (8) │ KeyLen 4│ Key │ ValueLen 4│ Value │
//! └─────────────┴────────┴──────────────┴────────────┴─────────┴─────┴───────────┴───────┘
//! ```
//!
//! All integers little-endian. The length field covers payload + CRC.
//! A TTL of zero encodes "no expiry". The CRC is computed over the payload.

use coral_core::StoreOp;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Current WAL record format version.
pub const WAL_FORMAT_VERSION: u8 = 1;

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// Fixed-size prefix of the payload: version + op + timestamp + ttl + two
/// length fields.
const PAYLOAD_FIXED_LEN: usize = 1 + 1 + 8 + 8 + 4 + 4;

/// Maximum bytes to scan forward for the next valid record after hitting
/// corruption during recovery.
const MAX_RECOVERY_SCAN_WINDOW: usize = 1024 * 1024;

/// A single durable mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub op: StoreOp,
    pub key: String,
    /// Empty for DELETE.
    pub value: Vec<u8>,
    pub ttl_ns: Option<u64>,
    pub timestamp_ns: u64,
}

impl WalRecord {
    pub fn set(key: String, value: Vec<u8>, ttl_ns: Option<u64>, timestamp_ns: u64) -> Self {
        WalRecord {
            op: StoreOp::Set,
            key,
            value,
            ttl_ns,
            timestamp_ns,
        }
    }

    pub fn delete(key: String, timestamp_ns: u64) -> Self {
        WalRecord {
            op: StoreOp::Delete,
            key,
            value: Vec::new(),
            ttl_ns: None,
            timestamp_ns,
        }
    }

    /// Absolute expiry instant, if the record carries a TTL.
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl_ns.map(|ttl| self.timestamp_ns.saturating_add(ttl))
    }

    /// Serialize for appending: length + payload + crc32.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(PAYLOAD_FIXED_LEN + self.key.len() + self.value.len());
        payload.push(WAL_FORMAT_VERSION);
        payload.push(match self.op {
            StoreOp::Set => OP_SET,
            StoreOp::Delete => OP_DELETE,
        });
        payload.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        payload.extend_from_slice(&self.ttl_ns.unwrap_or(0).to_le_bytes());
        payload.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        payload.extend_from_slice(self.key.as_bytes());
        payload.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.value);

        let crc = compute_crc(&payload);
        let total_len = payload.len() + 4;
        let mut record = Vec::with_capacity(4 + total_len);
        record.extend_from_slice(&(total_len as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        record.extend_from_slice(&crc.to_le_bytes());
        record
    }

    /// Deserialize one record from the front of `bytes`.
    ///
    /// Returns `(record, bytes_consumed)` on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalRecordError> {
        if bytes.len() < 4 {
            return Err(WalRecordError::InsufficientData);
        }
        let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        // Minimum: fixed payload prefix + CRC.
        if length < PAYLOAD_FIXED_LEN + 4 {
            return Err(WalRecordError::InvalidFormat);
        }
        if bytes.len() < 4 + length {
            return Err(WalRecordError::InsufficientData);
        }

        let payload = &bytes[4..4 + length - 4];
        let stored_crc = u32::from_le_bytes(bytes[4 + length - 4..4 + length].try_into().unwrap());
        let computed_crc = compute_crc(payload);
        if computed_crc != stored_crc {
            return Err(WalRecordError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let version = payload[0];
        if version != WAL_FORMAT_VERSION {
            return Err(WalRecordError::UnsupportedVersion(version));
        }
        let op = match payload[1] {
            OP_SET => StoreOp::Set,
            OP_DELETE => StoreOp::Delete,
            _ => return Err(WalRecordError::InvalidFormat),
        };
        let timestamp_ns = u64::from_le_bytes(payload[2..10].try_into().unwrap());
        let ttl_raw = u64::from_le_bytes(payload[10..18].try_into().unwrap());
        let key_len = u32::from_le_bytes(payload[18..22].try_into().unwrap()) as usize;
        if payload.len() < 22 + key_len + 4 {
            return Err(WalRecordError::InvalidFormat);
        }
        let key = std::str::from_utf8(&payload[22..22 + key_len])
            .map_err(|_| WalRecordError::InvalidFormat)?
            .to_string();
        let value_len_start = 22 + key_len;
        let value_len = u32::from_le_bytes(
            payload[value_len_start..value_len_start + 4]
                .try_into()
                .unwrap(),
        ) as usize;
        let value_start = value_len_start + 4;
        if payload.len() != value_start + value_len {
            return Err(WalRecordError::InvalidFormat);
        }
        let value = payload[value_start..].to_vec();

        let record = WalRecord {
            op,
            key,
            value,
            ttl_ns: (ttl_raw > 0).then_some(ttl_raw),
            timestamp_ns,
        };
        Ok((record, 4 + length))
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// WAL record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalRecordError {
    /// Not enough bytes for a full record (truncated tail)
    #[error("insufficient data to parse record")]
    InsufficientData,

    /// Length or field bounds are inconsistent
    #[error("invalid record format")]
    InvalidFormat,

    /// Payload failed its integrity check
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Record written by an unknown format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
}

/// Outcome of replaying a WAL file.
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Decodable records, in file order.
    pub records: Vec<WalRecord>,
    /// Corrupted regions skipped by the forward scan.
    pub skipped_corrupted: u64,
}

/// Append handle for a node's WAL file.
///
/// Appends are flushed to stable storage before they return; a failure
/// leaves the in-memory state untouched because callers apply only after
/// a successful append.
pub struct Wal {
    file: File,
    path: PathBuf,
    size: u64,
}

impl Wal {
    /// The WAL location for a node: `<data_dir>/<node_id>-wal.log`.
    pub fn path_for(data_dir: &Path, node_id: &str) -> PathBuf {
        data_dir.join(format!("{node_id}-wal.log"))
    }

    /// Open (creating if absent) the WAL for appending.
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Wal { file, path, size })
    }

    /// Append a record and force it to stable storage.
    pub fn append(&mut self, record: &WalRecord) -> std::io::Result<()> {
        let bytes = record.to_bytes();
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;
        self.size += bytes.len() as u64;
        Ok(())
    }

    /// Current file size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every decodable record from a WAL file.
    ///
    /// A truncated tail ends replay. A record that fails its checksum or
    /// has inconsistent framing is skipped by scanning forward (bounded
    /// window) for the next decodable record, and the skip is counted.
    /// A missing file is an empty log.
    pub fn replay(path: &Path) -> std::io::Result<WalReplay> {
        let mut buffer = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut buffer)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WalReplay::default());
            }
            Err(e) => return Err(e),
        }

        let mut replay = WalReplay::default();
        let mut offset = 0;
        while offset < buffer.len() {
            match WalRecord::from_bytes(&buffer[offset..]) {
                Ok((record, consumed)) => {
                    replay.records.push(record);
                    offset += consumed;
                }
                Err(WalRecordError::InsufficientData) => {
                    // Partial record at the tail — expected after a crash
                    // mid-append.
                    warn!(
                        offset,
                        total = buffer.len(),
                        "WAL ends in a partial record, stopping replay"
                    );
                    break;
                }
                Err(err) => {
                    // Corrupted record. The length field itself may be
                    // garbage, so scan forward byte-by-byte for the next
                    // decodable record instead of trusting it.
                    let scan_end = (offset + MAX_RECOVERY_SCAN_WINDOW).min(buffer.len());
                    let resumed = ((offset + 1)..scan_end)
                        .find(|&probe| WalRecord::from_bytes(&buffer[probe..]).is_ok());
                    match resumed {
                        Some(probe) => {
                            warn!(
                                corrupted_offset = offset,
                                resumed_offset = probe,
                                skipped_bytes = probe - offset,
                                error = %err,
                                "skipped corrupted WAL region, found valid record"
                            );
                            replay.skipped_corrupted += 1;
                            offset = probe;
                        }
                        None => {
                            warn!(
                                corrupted_offset = offset,
                                error = %err,
                                "no valid record past corruption, stopping replay"
                            );
                            replay.skipped_corrupted += 1;
                            break;
                        }
                    }
                }
            }
        }
        Ok(replay)
    }

    /// Rewrite the WAL from a snapshot of live records.
    ///
    /// Writes `<path>.compact`, fsyncs it, atomically renames it over the
    /// live file, and returns a fresh append handle. The caller must hold
    /// whatever lock serializes mutations for the whole procedure.
    pub fn rewrite(path: &Path, records: &[WalRecord]) -> std::io::Result<Wal> {
        let tmp_path = path.with_extension("compact");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            for record in records {
                tmp.write_all(&record.to_bytes())?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Wal::open(path.to_path_buf())
    }
}
