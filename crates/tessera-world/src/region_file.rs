//! Segment-addressed region container.
//!
//! A region file stores one variable-length byte blob per chunk slot. The
//! file is divided into segments of `2^segment_bits` bytes:
//!
//! ```text
//! +----------------------------+---------------------------------------+
//! | header: slot table         | data segments                         |
//! | slot_count * (u32, u32) LE | blob for slot k starts at segment s_k |
//! +----------------------------+---------------------------------------+
//! ```
//!
//! Each header entry is `(start_segment, byte_length)`; a zero start means
//! the slot was never written. A rewrite that still fits the slot's current
//! segment run is done in place, otherwise the blob moves to the end of the
//! file. Freed runs are not reclaimed.
//!
//! All file access goes through one mutex. Exclusive access to a single
//! slot across a whole read or write is the caller's job (see
//! [`crate::file_manager`]).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Bytes per header entry.
const ENTRY_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SlotEntry {
    start: u32,
    length: u32,
}

#[derive(Debug)]
struct Inner {
    file: File,
    table: Vec<SlotEntry>,
    next_free: u32,
}

/// An open region container.
#[derive(Debug)]
pub struct RegionFile {
    path: PathBuf,
    segment_bits: u8,
    slot_count: usize,
    header_segments: u32,
    inner: Mutex<Inner>,
}

impl RegionFile {
    /// Open `path`, creating an empty container if the file is absent or empty.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from opening the file or reading its header, and
    /// `InvalidData` if a header entry points inside the header.
    pub fn open(path: &Path, segment_bits: u8, slot_count: usize) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header_bytes = u64::try_from(slot_count)
            .ok()
            .and_then(|n| n.checked_mul(ENTRY_BYTES))
            .ok_or_else(|| invalid_input("slot count too large"))?;
        let header_segments = u32::try_from(segments_for(header_bytes, segment_bits))
            .map_err(|_err| invalid_input("header too large"))?;

        let len = file.metadata()?.len();
        let table = if len == 0 {
            let padded = u64::from(header_segments) << segment_bits;
            file.set_len(padded)?;
            vec![SlotEntry::default(); slot_count]
        } else {
            read_table(&mut file, slot_count, header_segments)?
        };

        let mut next_free = header_segments;
        for entry in table.iter().filter(|e| e.start != 0) {
            let used = u32::try_from(segments_for(u64::from(entry.length), segment_bits))
                .unwrap_or(u32::MAX);
            next_free = next_free.max(entry.start.saturating_add(used));
        }

        Ok(Self {
            path: path.to_path_buf(),
            segment_bits,
            slot_count,
            header_segments,
            inner: Mutex::new(Inner {
                file,
                table,
                next_free,
            }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Segment size in bytes.
    pub const fn segment_size(&self) -> u64 {
        1 << self.segment_bits
    }

    /// Number of chunk slots.
    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Whether `slot` holds data.
    pub fn has_slot(&self, slot: usize) -> bool {
        self.inner
            .lock()
            .table
            .get(slot)
            .is_some_and(|entry| entry.start != 0)
    }

    /// Read the blob in `slot`, or `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an out-of-range slot, or the underlying
    /// read error.
    pub fn read_slot(&self, slot: usize) -> io::Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let entry = *inner
            .table
            .get(slot)
            .ok_or_else(|| invalid_input("slot out of range"))?;
        if entry.start == 0 {
            return Ok(None);
        }
        let length = usize::try_from(entry.length).map_err(|_err| invalid_input("blob too large"))?;
        let mut data = vec![0; length];
        inner
            .file
            .seek(SeekFrom::Start(u64::from(entry.start) << self.segment_bits))?;
        inner.file.read_exact(&mut data)?;
        Ok(Some(data))
    }

    /// Replace the blob in `slot` with `data`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an out-of-range slot or a blob over
    /// `u32::MAX` bytes, or the underlying write error.
    pub fn write_slot(&self, slot: usize, data: &[u8]) -> io::Result<()> {
        let length = u32::try_from(data.len()).map_err(|_err| invalid_input("blob too large"))?;
        let needed = u32::try_from(segments_for(u64::from(length), self.segment_bits).max(1))
            .map_err(|_err| invalid_input("blob too large"))?;

        let mut inner = self.inner.lock();
        let current = *inner
            .table
            .get(slot)
            .ok_or_else(|| invalid_input("slot out of range"))?;

        let capacity = if current.start == 0 {
            0
        } else {
            segments_for(u64::from(current.length), self.segment_bits).max(1)
        };
        let start = if current.start != 0 && u64::from(needed) <= capacity {
            current.start
        } else {
            let start = inner.next_free;
            inner.next_free = start
                .checked_add(needed)
                .ok_or_else(|| io::Error::other("region file is full"))?;
            start
        };

        inner
            .file
            .seek(SeekFrom::Start(u64::from(start) << self.segment_bits))?;
        inner.file.write_all(data)?;

        let entry = SlotEntry { start, length };
        write_entry(&mut inner.file, slot, entry)?;
        if let Some(cell) = inner.table.get_mut(slot) {
            *cell = entry;
        }
        Ok(())
    }

    /// Forget the blob in `slot`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an out-of-range slot, or the underlying
    /// write error.
    pub fn clear_slot(&self, slot: usize) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if slot >= inner.table.len() {
            return Err(invalid_input("slot out of range"));
        }
        write_entry(&mut inner.file, slot, SlotEntry::default())?;
        if let Some(cell) = inner.table.get_mut(slot) {
            *cell = SlotEntry::default();
        }
        Ok(())
    }

    /// Flush file contents and metadata to disk.
    ///
    /// # Errors
    ///
    /// Returns the underlying sync error.
    pub fn sync(&self) -> io::Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()
    }

    /// Segments occupied by header plus data, including abandoned runs.
    pub fn allocated_segments(&self) -> u32 {
        self.inner.lock().next_free
    }

    /// Segments reserved for the header.
    pub const fn header_segments(&self) -> u32 {
        self.header_segments
    }
}

/// Number of `2^segment_bits`-byte segments needed to hold `bytes`.
fn segments_for(bytes: u64, segment_bits: u8) -> u64 {
    let size = 1_u64 << segment_bits;
    bytes.div_ceil(size)
}

fn read_table(file: &mut File, slot_count: usize, header_segments: u32) -> io::Result<Vec<SlotEntry>> {
    let mut raw = vec![0_u8; slot_count.saturating_mul(8)];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut raw)?;

    raw.chunks_exact(8)
        .map(|bytes| {
            let (start, length) = bytes.split_at(4);
            let entry = SlotEntry {
                start: u32::from_le_bytes(start.try_into().unwrap_or_default()),
                length: u32::from_le_bytes(length.try_into().unwrap_or_default()),
            };
            if entry.start != 0 && entry.start < header_segments {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("slot entry starts inside header at segment {}", entry.start),
                ));
            }
            Ok(entry)
        })
        .collect()
}

fn write_entry(file: &mut File, slot: usize, entry: SlotEntry) -> io::Result<()> {
    let offset = u64::try_from(slot)
        .ok()
        .and_then(|s| s.checked_mul(ENTRY_BYTES))
        .ok_or_else(|| invalid_input("slot out of range"))?;
    let mut bytes = [0_u8; 8];
    let (start, length) = bytes.split_at_mut(4);
    start.copy_from_slice(&entry.start.to_le_bytes());
    length.copy_from_slice(&entry.length.to_le_bytes());
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&bytes)
}

fn invalid_input(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_owned())
}
