//! Copy-on-write chunk storage shared by the hex and disassembly views.
//!
//! Readers take an `Arc` to an immutable [`Snapshot`] and never block on a
//! load in progress. A completing load clones the chunk map, inserts its
//! chunk and swaps the snapshot in. Chunks are `Arc`ed so the clone copies
//! pointers, not rows.
//!
//! Two tags keep stale data out:
//! - `generation` is bumped by every invalidation; a load that started under
//!   an older generation is discarded at commit.
//! - `session_id` ties the whole snapshot to one engine session; a view that
//!   sees a different session resets before serving anything.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, trace};

/// Rows fetched by one engine command.
#[derive(Debug)]
pub struct Chunk<R> {
    pub anchor: u64,
    /// Exclusive end of the addresses this chunk answers for.
    pub end: u64,
    pub rows: Vec<R>,
    pub session_id: u64,
    pub generation: u64,
}

impl<R> Chunk<R> {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.anchor && address < self.end
    }
}

/// Immutable view of the cache at one instant.
#[derive(Debug)]
pub struct Snapshot<R> {
    pub chunks: BTreeMap<u64, Arc<Chunk<R>>>,
    pub generation: u64,
    pub session_id: u64,
    /// Bumped on every change; lets derived indexes detect staleness.
    pub version: u64,
}

impl<R> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self {
            chunks: self.chunks.clone(),
            generation: self.generation,
            session_id: self.session_id,
            version: self.version,
        }
    }
}

impl<R> Snapshot<R> {
    fn empty(session_id: u64) -> Self {
        Self {
            chunks: BTreeMap::new(),
            generation: 0,
            session_id,
            version: 0,
        }
    }

    pub fn chunk_containing(&self, address: u64) -> Option<&Arc<Chunk<R>>> {
        self.chunks
            .range(..=address)
            .next_back()
            .map(|(_, chunk)| chunk)
            .filter(|chunk| chunk.contains(address))
    }

    /// Anchor of the first chunk strictly after `address`.
    pub fn next_anchor_after(&self, address: u64) -> Option<u64> {
        self.chunks
            .range((Bound::Excluded(address), Bound::Unbounded))
            .next()
            .map(|(anchor, _)| *anchor)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// The chunk map of one view plus its in-flight load registry.
#[derive(Debug)]
pub(crate) struct ChunkStore<R> {
    snapshot: RwLock<Arc<Snapshot<R>>>,
    pending: Mutex<HashSet<(u64, u64)>>,
    max_chunks: usize,
}

/// Registration of one in-flight load; deregisters on drop.
pub(crate) struct LoadTicket<'a, R> {
    store: &'a ChunkStore<R>,
    key: (u64, u64),
}

impl<R> Drop for LoadTicket<'_, R> {
    fn drop(&mut self) {
        self.store.pending.lock().remove(&self.key);
    }
}

impl<R> ChunkStore<R> {
    pub(crate) fn new(session_id: u64, max_chunks: usize) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::empty(session_id))),
            pending: Mutex::new(HashSet::new()),
            max_chunks: max_chunks.max(1),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Snapshot<R>> {
        self.snapshot.read().clone()
    }

    /// Drop everything if the snapshot belongs to another session.
    ///
    /// Returns the new generation when a reset happened.
    pub(crate) fn ensure_session(&self, session_id: u64) -> Option<u64> {
        if self.snapshot.read().session_id == session_id {
            return None;
        }
        let mut guard = self.snapshot.write();
        if guard.session_id == session_id {
            return None;
        }
        debug!(
            from = guard.session_id,
            to = session_id,
            "Engine session changed; dropping cached chunks"
        );
        Some(Self::reset_locked(&mut guard, session_id))
    }

    /// Drop every chunk and bump the generation.
    pub(crate) fn invalidate(&self, session_id: u64) -> u64 {
        let mut guard = self.snapshot.write();
        Self::reset_locked(&mut guard, session_id)
    }

    fn reset_locked(guard: &mut Arc<Snapshot<R>>, session_id: u64) -> u64 {
        let generation = guard.generation + 1;
        *guard = Arc::new(Snapshot {
            chunks: BTreeMap::new(),
            generation,
            session_id,
            version: guard.version + 1,
        });
        generation
    }

    /// Claim the load of `anchor` under `generation`; `None` if already claimed.
    pub(crate) fn begin_load(&self, generation: u64, anchor: u64) -> Option<LoadTicket<'_, R>> {
        let key = (generation, anchor);
        if self.pending.lock().insert(key) {
            Some(LoadTicket { store: self, key })
        } else {
            trace!(anchor, generation, "Load already in flight");
            None
        }
    }

    pub(crate) fn is_pending(&self, generation: u64, anchor: u64) -> bool {
        self.pending.lock().contains(&(generation, anchor))
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Publish a loaded chunk unless an invalidation or session change
    /// happened since its load began.
    pub(crate) fn commit(&self, chunk: Chunk<R>) -> bool {
        let mut guard = self.snapshot.write();
        if chunk.generation != guard.generation || chunk.session_id != guard.session_id {
            debug!(
                anchor = chunk.anchor,
                loaded_under = chunk.generation,
                current = guard.generation,
                "Discarding chunk loaded before an invalidation"
            );
            return false;
        }

        let focus = chunk.anchor;
        let mut next = Snapshot::clone(&guard);
        next.chunks.insert(chunk.anchor, Arc::new(chunk));
        while next.chunks.len() > self.max_chunks {
            let farthest = next
                .chunks
                .keys()
                .copied()
                .max_by_key(|anchor| anchor.abs_diff(focus));
            match farthest {
                Some(anchor) => {
                    trace!(anchor, "Evicting chunk");
                    next.chunks.remove(&anchor);
                }
                None => break,
            }
        }
        next.version += 1;
        *guard = Arc::new(next);
        true
    }
}
