//! Length-framed encoding of records and update events.
//!
//! Every store file starts with an 8-byte header (magic, format version,
//! file kind, flags) followed by frames of `[len u32][checksum u32][payload]`
//! in little-endian. The payload is the bincode encoding of one `Record`
//! (snapshots) or one `StoreUpdate` (deltas), optionally zstd-compressed
//! when the header flag is set. A clean EOF at a frame boundary ends the
//! stream; anything else is corruption.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StateStoreError, StoreResult};
use crate::types::{FileKind, Record, StoreUpdate};

const FILE_MAGIC: u32 = 0x46_53_54_31; // "FST1"
const FORMAT_VERSION: u8 = 1;
const KIND_DELTA: u8 = 1;
const KIND_SNAPSHOT: u8 = 2;
const FLAG_COMPRESSED: u8 = 0x01;
const FILE_HEADER_SIZE: usize = 8;
const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on a single frame payload. A length beyond this is treated
/// as corruption rather than an allocation request.
const MAX_FRAME_BYTES: u32 = 1 << 30;

/// Codec settings derived from the store configuration.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameOptions {
    pub compress: bool,
    pub compression_level: i32,
}

fn kind_byte(kind: FileKind) -> u8 {
    match kind {
        FileKind::Delta => KIND_DELTA,
        FileKind::Snapshot => KIND_SNAPSHOT,
    }
}

fn checksum_to_u32(hash: blake3::Hash) -> u32 {
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn encode_file_header(kind: FileKind, options: FrameOptions) -> [u8; FILE_HEADER_SIZE] {
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[0..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
    header[4] = FORMAT_VERSION;
    header[5] = kind_byte(kind);
    header[6] = if options.compress { FLAG_COMPRESSED } else { 0 };
    header
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StateStoreError {
    StateStoreError::CorruptFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Streaming writer for one store file. Frames are buffered; `finish`
/// flushes and fsyncs so the caller can rename the file afterwards.
pub(crate) struct FrameWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    options: FrameOptions,
}

impl FrameWriter {
    pub(crate) fn create(
        path: impl AsRef<Path>,
        kind: FileKind,
        options: FrameOptions,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&encode_file_header(kind, options))?;
        Ok(Self {
            writer,
            path,
            options,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append<T: Serialize>(&mut self, value: &T) -> StoreResult<()> {
        let encoded = bincode::serialize(value)?;
        let payload = if self.options.compress {
            zstd::stream::encode_all(encoded.as_slice(), self.options.compression_level)?
        } else {
            encoded
        };
        let checksum = checksum_to_u32(blake3::hash(&payload));
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&checksum.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> StoreResult<()> {
        self.writer.flush()?;
        let file = self.writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Writes a complete snapshot file from an iterator of records.
pub(crate) fn write_records<I>(
    path: impl AsRef<Path>,
    records: I,
    options: FrameOptions,
) -> StoreResult<()>
where
    I: IntoIterator<Item = Record>,
{
    let mut writer = FrameWriter::create(path, FileKind::Snapshot, options)?;
    for record in records {
        writer.append(&record)?;
    }
    writer.finish()
}

/// Lazy reader over the frames of one store file.
///
/// Owns the file handle; dropping the reader closes it, whether the
/// consumer finished the stream or abandoned it. The iterator fuses after
/// the first error.
pub struct FrameReader<T> {
    reader: BufReader<File>,
    path: PathBuf,
    compressed: bool,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

pub type RecordReader = FrameReader<Record>;
pub type UpdateReader = FrameReader<StoreUpdate>;

impl<T: DeserializeOwned> FrameReader<T> {
    pub(crate) fn open(path: impl AsRef<Path>, expected_kind: FileKind) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; FILE_HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|_| corrupt(&path, "truncated file header"))?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != FILE_MAGIC {
            return Err(corrupt(&path, "invalid magic"));
        }
        if header[4] != FORMAT_VERSION {
            return Err(corrupt(&path, format!("unsupported format version {}", header[4])));
        }
        if header[5] != kind_byte(expected_kind) {
            return Err(corrupt(&path, "file kind mismatch"));
        }

        Ok(Self {
            reader,
            path,
            compressed: header[6] & FLAG_COMPRESSED != 0,
            finished: false,
            _marker: PhantomData,
        })
    }

    fn read_frame(&mut self) -> StoreResult<Option<T>> {
        // Distinguish a clean EOF at a frame boundary from a torn frame.
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let mut frame_header = [0u8; FRAME_HEADER_SIZE];
        self.reader
            .read_exact(&mut frame_header)
            .map_err(|_| corrupt(&self.path, "truncated frame header"))?;

        let len = u32::from_le_bytes([
            frame_header[0],
            frame_header[1],
            frame_header[2],
            frame_header[3],
        ]);
        let expected_checksum = u32::from_le_bytes([
            frame_header[4],
            frame_header[5],
            frame_header[6],
            frame_header[7],
        ]);

        if len > MAX_FRAME_BYTES {
            return Err(corrupt(&self.path, format!("frame length {len} out of range")));
        }

        let mut payload = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|_| corrupt(&self.path, "truncated frame payload"))?;

        let checksum = checksum_to_u32(blake3::hash(&payload));
        if checksum != expected_checksum {
            return Err(corrupt(&self.path, "frame checksum mismatch"));
        }

        let decoded = if self.compressed {
            zstd::stream::decode_all(payload.as_slice())?
        } else {
            payload
        };
        Ok(Some(bincode::deserialize(&decoded)?))
    }
}

impl<T: DeserializeOwned> Iterator for FrameReader<T> {
    type Item = StoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Opens a snapshot file for reading.
pub(crate) fn read_records(path: impl AsRef<Path>) -> StoreResult<RecordReader> {
    FrameReader::open(path, FileKind::Snapshot)
}

/// Opens a delta file for reading.
pub(crate) fn read_updates(path: impl AsRef<Path>) -> StoreResult<UpdateReader> {
    FrameReader::open(path, FileKind::Delta)
}
