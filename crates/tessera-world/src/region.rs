//! A region: the chunks of one region cube, loaded on demand.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use tessera_types::{ChunkCoord, LoadOption, RegionCoord, WorldId};

use crate::chunk::Chunk;
use crate::error::WorldError;
use crate::file_manager::RegionFileHandle;
use crate::generator::WorldGenerator;

/// The loaded chunks of one region, backed by an optional region file.
#[derive(Debug)]
pub struct Region {
    world: WorldId,
    coord: RegionCoord,
    chunks: DashMap<usize, Arc<Chunk>>,
    storage: Option<Arc<RegionFileHandle>>,
    generator: Arc<dyn WorldGenerator>,
    seed: u64,
    unload_requested: AtomicBool,
}

impl Region {
    /// Build an empty region. `storage` is `None` for worlds that never
    /// touch disk.
    pub fn new(
        world: WorldId,
        coord: RegionCoord,
        storage: Option<Arc<RegionFileHandle>>,
        generator: Arc<dyn WorldGenerator>,
        seed: u64,
    ) -> Self {
        Self {
            world,
            coord,
            chunks: DashMap::new(),
            storage,
            generator,
            seed,
            unload_requested: AtomicBool::new(false),
        }
    }

    /// World this region belongs to.
    pub const fn world(&self) -> WorldId {
        self.world
    }

    /// Coordinate of this region.
    pub const fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// Region file backing this region, if any.
    pub const fn storage(&self) -> Option<&Arc<RegionFileHandle>> {
        self.storage.as_ref()
    }

    /// Whether `chunk` is loaded.
    pub fn has_chunk(&self, chunk: ChunkCoord) -> bool {
        chunk.region() == self.coord && self.chunks.contains_key(&chunk.slot())
    }

    /// Number of loaded chunks.
    pub fn loaded_chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Point-in-time list of loaded chunks.
    pub fn chunks(&self) -> Vec<Arc<Chunk>> {
        self.chunks.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Look up `chunk`, loading or generating it as `option` allows.
    ///
    /// Concurrent loads of the same chunk all return the single installed
    /// instance; losing candidates are dropped.
    pub fn get_chunk(&self, chunk: ChunkCoord, option: LoadOption) -> Option<Arc<Chunk>> {
        if chunk.region() != self.coord {
            warn!(chunk = %chunk, region = %self.coord, "Chunk requested from wrong region");
            return None;
        }
        let slot = chunk.slot();
        if let Some(existing) = self.chunks.get(&slot) {
            return Some(Arc::clone(existing.value()));
        }
        if !option.load_if_needed() {
            return None;
        }

        let candidate = match self.load_chunk(chunk) {
            Ok(Some(loaded)) => loaded,
            Ok(None) if option.generate_if_needed() => {
                let generated = self.generator.generate(chunk, self.seed);
                generated.mark_dirty();
                generated
            }
            Ok(None) => return None,
            Err(e) => {
                // Never generate over stored data that failed to load.
                warn!(chunk = %chunk, error = %e, "Unable to load chunk");
                return None;
            }
        };

        match self.chunks.entry(slot) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let installed = Arc::new(candidate);
                entry.insert(Arc::clone(&installed));
                Some(installed)
            }
        }
    }

    /// Read `chunk` from the region file.
    ///
    /// `Ok(None)` means the slot was never written. Read failures and
    /// undecodable bytes are errors; the stored bytes are left untouched.
    fn load_chunk(&self, chunk: ChunkCoord) -> Result<Option<Chunk>, WorldError> {
        let Some(storage) = self.storage.as_ref() else {
            return Ok(None);
        };
        let Some(mut stream) = storage.input_stream(chunk.slot())? else {
            return Ok(None);
        };
        let mut bytes = Vec::with_capacity(stream.len());
        stream
            .read_to_end(&mut bytes)
            .map_err(|source| WorldError::io("read chunk", source))?;
        Chunk::decode(chunk, &bytes).map(Some)
    }

    /// Write every dirty chunk to the region file.
    ///
    /// Returns the number of chunks written. Chunks that fail to save stay
    /// dirty. Without storage nothing is written.
    pub fn save_dirty_chunks(&self) -> usize {
        let Some(storage) = self.storage.as_ref() else {
            return 0;
        };
        let mut saved = 0_usize;
        for chunk in self.chunks() {
            if !chunk.take_dirty() {
                continue;
            }
            let mut stream = storage.output_stream(chunk.coord().slot());
            let written = stream
                .write_all(&chunk.encode())
                .map_err(|source| WorldError::io("buffer chunk", source))
                .and_then(|()| stream.finish());
            match written {
                Ok(()) => saved = saved.saturating_add(1),
                Err(e) => {
                    chunk.mark_dirty();
                    warn!(chunk = %chunk.coord(), error = %e, "Failed to save chunk");
                }
            }
        }
        if saved > 0 {
            debug!(region = %self.coord, saved, "Saved dirty chunks");
        }
        saved
    }

    /// Number of chunks with unsaved changes.
    pub fn dirty_chunk_count(&self) -> usize {
        self.chunks.iter().filter(|entry| entry.value().is_dirty()).count()
    }

    /// Flag this region to be saved and removed at the next snapshot.
    pub fn request_unload(&self) {
        self.unload_requested.store(true, Ordering::Release);
    }

    /// Withdraw a pending unload request.
    pub fn cancel_unload(&self) {
        self.unload_requested.store(false, Ordering::Release);
    }

    /// Whether an unload has been requested.
    pub fn is_unload_requested(&self) -> bool {
        self.unload_requested.load(Ordering::Acquire)
    }
}
