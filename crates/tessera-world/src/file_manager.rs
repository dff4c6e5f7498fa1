//! Region file cache with idle eviction.
//!
//! [`RegionFileManager`] owns one [`RegionFileHandle`] per region file name.
//! Handles are installed once and never replaced; the file behind a handle
//! is opened lazily and may be closed and reopened many times over the
//! handle's life.
//!
//! A background thread walks the open handles and closes any that have not
//! been touched for the configured timeout. It paces itself so one full pass
//! takes roughly half the timeout, and closing is refused while a chunk
//! stream still holds a slot of the file.

use std::collections::BTreeSet;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use tessera_core::config::StorageConfig;
use tessera_types::{ChunkCoord, REGION_CHUNK_VOLUME, RegionCoord};

use crate::error::WorldError;
use crate::region_file::RegionFile;

// ---------------------------------------------------------------------------
// Slot leases
// ---------------------------------------------------------------------------

/// Exclusive per-slot access for chunk streams.
#[derive(Debug, Default)]
struct SlotLeases {
    held: Mutex<BTreeSet<usize>>,
    released: Condvar,
    active: AtomicUsize,
}

impl SlotLeases {
    /// Block until `slot` is free, then take it.
    fn acquire(&self, slot: usize) {
        let mut held = self.held.lock();
        while held.contains(&slot) {
            self.released.wait(&mut held);
        }
        held.insert(slot);
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, slot: usize) {
        let mut held = self.held.lock();
        if held.remove(&slot) {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
        self.released.notify_all();
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// What an eviction check did to a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The file was not open.
    NotOpen,
    /// The file was accessed within the timeout.
    Fresh,
    /// The file was idle and has been closed.
    Closed,
    /// The file was idle but a stream still holds one of its slots.
    Busy,
}

/// Lazily-opened wrapper around one region file.
#[derive(Debug)]
pub struct RegionFileHandle {
    coord: RegionCoord,
    path: PathBuf,
    segment_bits: u8,
    file: Mutex<Option<Arc<RegionFile>>>,
    leases: SlotLeases,
    epoch: Instant,
    last_access_ms: AtomicU64,
    opens: AtomicU64,
    closes: AtomicU64,
}

impl RegionFileHandle {
    fn new(coord: RegionCoord, path: PathBuf, segment_bits: u8) -> Self {
        Self {
            coord,
            path,
            segment_bits,
            file: Mutex::new(None),
            leases: SlotLeases::default(),
            epoch: Instant::now(),
            last_access_ms: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        }
    }

    /// Region this file stores.
    pub const fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file is currently open.
    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// How many times the backing file has been opened.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Acquire)
    }

    /// How many times the backing file has been closed.
    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::Acquire)
    }

    /// Number of chunk streams currently holding a slot.
    pub fn active_streams(&self) -> usize {
        self.leases.active()
    }

    /// Record an access now.
    pub fn touch(&self) {
        let now = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_access_ms.fetch_max(now, Ordering::AcqRel);
    }

    /// Time since the last recorded access.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Open the backing file if needed and return it.
    pub fn ensure_open(&self) -> Result<Arc<RegionFile>, WorldError> {
        self.touch();
        let mut slot = self.file.lock();
        if let Some(file) = slot.as_ref() {
            return Ok(Arc::clone(file));
        }
        let file = RegionFile::open(&self.path, self.segment_bits, REGION_CHUNK_VOLUME)
            .map_err(|source| WorldError::io(format!("open region file {}", self.path.display()), source))?;
        let file = Arc::new(file);
        *slot = Some(Arc::clone(&file));
        self.opens.fetch_add(1, Ordering::AcqRel);
        debug!(path = %self.path.display(), "Opened region file");
        Ok(file)
    }

    /// Close the backing file unless a stream still holds one of its slots.
    ///
    /// Returns `true` if the file is closed afterwards.
    pub fn attempt_close(&self) -> bool {
        let mut slot = self.file.lock();
        self.close_locked(&mut slot)
    }

    /// Close the file if it has been idle for at least `timeout`.
    ///
    /// The idle time is read under the file lock, so an access that opened
    /// or reused the file before the check keeps it open.
    pub fn timeout_check(&self, timeout: Duration) -> TimeoutOutcome {
        let mut slot = self.file.lock();
        if slot.is_none() {
            return TimeoutOutcome::NotOpen;
        }
        if self.idle_for() < timeout {
            return TimeoutOutcome::Fresh;
        }
        if self.close_locked(&mut slot) {
            TimeoutOutcome::Closed
        } else {
            TimeoutOutcome::Busy
        }
    }

    fn close_locked(&self, slot: &mut Option<Arc<RegionFile>>) -> bool {
        if self.leases.active() > 0 {
            return false;
        }
        let Some(file) = slot.take() else {
            return true;
        };
        if let Err(e) = file.sync() {
            warn!(path = %self.path.display(), error = %e, "Failed to sync region file on close");
        }
        self.closes.fetch_add(1, Ordering::AcqRel);
        debug!(path = %self.path.display(), "Closed region file");
        true
    }

    /// Take exclusive hold of `slot` and return a stream that writes it.
    ///
    /// Blocks while another stream holds the same slot.
    pub fn output_stream(self: &Arc<Self>, slot: usize) -> ChunkOutputStream {
        self.leases.acquire(slot);
        self.touch();
        ChunkOutputStream {
            handle: Arc::clone(self),
            slot,
            buffer: Vec::new(),
            committed: false,
        }
    }

    /// Take exclusive hold of `slot` and return a stream over its bytes,
    /// or `None` if the slot is empty.
    pub fn input_stream(self: &Arc<Self>, slot: usize) -> Result<Option<ChunkInputStream>, WorldError> {
        self.leases.acquire(slot);
        let data = self.ensure_open().and_then(|file| {
            file.read_slot(slot)
                .map_err(|source| WorldError::io(format!("read slot {slot} of {}", self.path.display()), source))
        });
        match data {
            Ok(Some(bytes)) => Ok(Some(ChunkInputStream {
                handle: Arc::clone(self),
                slot,
                cursor: Cursor::new(bytes),
            })),
            Ok(None) => {
                self.leases.release(slot);
                Ok(None)
            }
            Err(e) => {
                self.leases.release(slot);
                Err(e)
            }
        }
    }

    /// Whether `slot` holds stored data, opening the file if needed.
    pub fn has_slot(&self, slot: usize) -> Result<bool, WorldError> {
        Ok(self.ensure_open()?.has_slot(slot))
    }
}

// ---------------------------------------------------------------------------
// Chunk streams
// ---------------------------------------------------------------------------

/// Buffered writer for one chunk slot.
///
/// The bytes reach the file on [`ChunkOutputStream::finish`], or on drop if
/// `finish` was never called. The slot stays leased until the stream is gone.
#[derive(Debug)]
pub struct ChunkOutputStream {
    handle: Arc<RegionFileHandle>,
    slot: usize,
    buffer: Vec<u8>,
    committed: bool,
}

impl ChunkOutputStream {
    /// Write the buffered bytes to the slot and release it.
    pub fn finish(mut self) -> Result<(), WorldError> {
        self.commit()
    }

    fn commit(&mut self) -> Result<(), WorldError> {
        self.committed = true;
        let file = self.handle.ensure_open()?;
        file.write_slot(self.slot, &self.buffer).map_err(|source| {
            WorldError::io(
                format!("write slot {} of {}", self.slot, self.handle.path.display()),
                source,
            )
        })
    }
}

impl Write for ChunkOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ChunkOutputStream {
    fn drop(&mut self) {
        if !self.committed
            && let Err(e) = self.commit()
        {
            warn!(slot = self.slot, error = %e, "Dropped chunk stream failed to write");
        }
        self.handle.leases.release(self.slot);
    }
}

/// Reader over one chunk slot's stored bytes.
#[derive(Debug)]
pub struct ChunkInputStream {
    handle: Arc<RegionFileHandle>,
    slot: usize,
    cursor: Cursor<Vec<u8>>,
}

impl ChunkInputStream {
    /// Total stored length of the slot.
    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    /// Whether the slot holds zero bytes.
    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }
}

impl Read for ChunkInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Drop for ChunkInputStream {
    fn drop(&mut self) {
        self.handle.leases.release(self.slot);
    }
}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn signal(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.wake.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `duration`. Returns `true` if stopped.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut stopped = self.stopped.lock();
        while !*stopped {
            let Some(deadline) = deadline else {
                self.wake.wait(&mut stopped);
                continue;
            };
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

type HandleCache = DashMap<String, Arc<RegionFileHandle>>;

/// Per-world cache of region files.
#[derive(Debug)]
pub struct RegionFileManager {
    region_dir: PathBuf,
    segment_bits: u8,
    timeout: Duration,
    cache: Arc<HandleCache>,
    stop: Arc<StopSignal>,
    timeout_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RegionFileManager {
    /// Create the region directory under `world_dir` and start the eviction
    /// thread.
    ///
    /// A directory that cannot be created is fatal for the world.
    pub fn new(world_dir: &Path, storage: &StorageConfig) -> Result<Self, WorldError> {
        let region_dir = world_dir.join(&storage.region_dir);
        std::fs::create_dir_all(&region_dir).map_err(|source| WorldError::StorageSetup {
            path: region_dir.clone(),
            source,
        })?;

        let timeout = Duration::from_millis(storage.region_timeout_ms);
        let cache = Arc::new(HandleCache::new());
        let stop = Arc::new(StopSignal::default());

        let name = format!("region-timeout-{}", world_dir.display());
        let thread = {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_timeout_loop(&cache, timeout, &stop))
                .map_err(|source| WorldError::ThreadSpawn { name, source })?
        };

        info!(
            dir = %region_dir.display(),
            segment_bits = storage.segment_bits,
            timeout_ms = storage.region_timeout_ms,
            "Region file manager started"
        );

        Ok(Self {
            region_dir,
            segment_bits: storage.segment_bits,
            timeout,
            cache,
            stop,
            timeout_thread: Mutex::new(Some(thread)),
        })
    }

    /// Directory holding this world's region files.
    pub fn region_dir(&self) -> &Path {
        &self.region_dir
    }

    /// Idle time after which an open file is closed.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the handle for `region`, installing and opening it on first use.
    ///
    /// Concurrent first calls for the same region all receive the one
    /// installed handle. A file that fails to open is logged and the handle
    /// returned anyway; streams retry the open.
    pub fn get_container(&self, region: RegionCoord) -> Arc<RegionFileHandle> {
        let file_name = region.file_name();
        let handle = match self.cache.entry(file_name) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let path = self.region_dir.join(entry.key());
                let handle = Arc::new(RegionFileHandle::new(region, path, self.segment_bits));
                entry.insert(Arc::clone(&handle));
                handle
            }
        };
        if let Err(e) = handle.ensure_open() {
            warn!(region = %region, error = %e, "Unable to open region file");
        }
        handle
    }

    /// Whether a file for `region` exists on disk. Does not open it.
    pub fn region_file_exists(&self, region: RegionCoord) -> bool {
        self.region_dir.join(region.file_name()).is_file()
    }

    /// Stream that writes `chunk` into its region file.
    pub fn get_chunk_output_stream(&self, chunk: ChunkCoord) -> ChunkOutputStream {
        self.get_container(chunk.region()).output_stream(chunk.slot())
    }

    /// Stream over the stored bytes of `chunk`, or `None` if never saved.
    pub fn get_chunk_input_stream(&self, chunk: ChunkCoord) -> Result<Option<ChunkInputStream>, WorldError> {
        self.get_container(chunk.region()).input_stream(chunk.slot())
    }

    /// Number of installed handles, open or not.
    pub fn container_count(&self) -> usize {
        self.cache.len()
    }

    /// Number of handles whose file is open.
    pub fn open_container_count(&self) -> usize {
        self.cache.iter().filter(|entry| entry.value().is_open()).count()
    }

    /// Stop the eviction thread and wait for it, without closing anything.
    ///
    /// Once this returns no file is closed for idleness.
    pub fn stop_timeout_thread(&self) {
        self.stop.signal();
        let thread = self.timeout_thread.lock().take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            info!(dir = %self.region_dir.display(), "Region timeout thread panicked");
        }
    }

    /// Whether the eviction thread is still attached to this manager.
    pub fn timeout_thread_running(&self) -> bool {
        self.timeout_thread.lock().as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the eviction thread, wait for it, and close every file.
    ///
    /// Returns the number of files left open because a stream still held
    /// them.
    pub fn close_all(&self) -> usize {
        self.stop_timeout_thread();

        let mut refused = 0_usize;
        for entry in self.cache.iter() {
            if !entry.value().attempt_close() {
                info!(path = %entry.value().path().display(), "Unable to close region file, streams still open");
                refused = refused.saturating_add(1);
            }
        }
        refused
    }
}

impl Drop for RegionFileManager {
    fn drop(&mut self) {
        self.stop_timeout_thread();
    }
}

// ---------------------------------------------------------------------------
// Eviction loop
// ---------------------------------------------------------------------------

/// Offset into a pass at which the `checked`-th of `total` files should be
/// reached, spreading a pass over half the timeout.
fn pacing_offset(timeout: Duration, checked: usize, total: usize) -> Duration {
    let Some(divisor) = u128::try_from(total).ok().and_then(|t| t.checked_mul(2)).filter(|d| *d > 0) else {
        return Duration::ZERO;
    };
    let checked = u128::try_from(checked).unwrap_or(u128::MAX);
    let nanos = timeout.as_nanos().saturating_mul(checked).checked_div(divisor).unwrap_or(0);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn run_timeout_loop(cache: &HandleCache, timeout: Duration, stop: &StopSignal) {
    debug!(timeout_ms = timeout.as_millis(), "Region timeout thread running");
    while !stop.is_stopped() {
        // Handles installed mid-pass are picked up by the next pass.
        let open: Vec<Arc<RegionFileHandle>> = cache
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if open.is_empty() {
            if stop.sleep(timeout.checked_div(2).unwrap_or_default()) {
                break;
            }
            continue;
        }

        let total = open.len();
        let pass_start = Instant::now();
        for (index, handle) in open.iter().enumerate() {
            match handle.timeout_check(timeout) {
                TimeoutOutcome::Closed => {
                    debug!(region = %handle.coord(), "Closed idle region file");
                }
                TimeoutOutcome::Busy => {
                    info!(region = %handle.coord(), "Idle region file still has open streams");
                }
                TimeoutOutcome::NotOpen | TimeoutOutcome::Fresh => {}
            }

            let ideal = pacing_offset(timeout, index.saturating_add(1), total);
            let excess = ideal.saturating_sub(pass_start.elapsed());
            if !excess.is_zero() && stop.sleep(excess) {
                break;
            }
        }
    }
    debug!("Region timeout thread stopped");
}
