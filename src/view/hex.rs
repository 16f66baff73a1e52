//! Hex view: fixed 16-byte rows over the view range.

use crate::config::ViewConfig;
use crate::error::Result;
use crate::repository::Repository;
use crate::view::events::{EventHub, ViewEvent};
use crate::view::range::ViewRange;
use crate::view::store::{Chunk, ChunkStore, Snapshot};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Bytes per row.
pub const ROW_SIZE: u64 = 16;
/// Bytes per presentation half-row.
pub const SUB_ROW_SIZE: usize = 8;

/// One row of the hex view.
///
/// `bytes` is shorter than [`ROW_SIZE`] at the end of the range or where
/// the engine returned less data than requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRow {
    pub index: u64,
    pub address: u64,
    pub bytes: Vec<u8>,
}

impl HexRow {
    /// The two 8-byte halves shown side by side.
    pub fn halves(&self) -> (&[u8], &[u8]) {
        let split = self.bytes.len().min(SUB_ROW_SIZE);
        self.bytes.split_at(split)
    }

    /// `00 11 .. 77  88 99 .. ff`
    pub fn hex(&self) -> String {
        let (lo, hi) = self.halves();
        let mut out = String::with_capacity(ROW_SIZE as usize * 3 + 1);
        for (i, b) in lo.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02x}", b);
        }
        if !hi.is_empty() {
            out.push_str("  ");
            for (i, b) in hi.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{:02x}", b);
            }
        }
        out
    }

    /// Printable ASCII with `.` for everything else.
    pub fn ascii(&self) -> String {
        self.bytes
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect()
    }
}

struct HexInner {
    range: ViewRange,
    repo: Arc<dyn Repository>,
    config: ViewConfig,
    store: ChunkStore<u8>,
    events: EventHub,
}

/// Demand-paged byte rows. Cloning shares the cache.
#[derive(Clone)]
pub struct HexView {
    inner: Arc<HexInner>,
}

impl std::fmt::Debug for HexView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HexView")
            .field("range", &self.inner.range)
            .field("chunks", &self.inner.store.snapshot().len())
            .finish()
    }
}

impl HexView {
    pub fn new(range: ViewRange, repo: Arc<dyn Repository>, config: ViewConfig) -> Self {
        let store = ChunkStore::new(repo.session_id(), config.max_cached_chunks);
        Self {
            inner: Arc::new(HexInner {
                range,
                repo,
                config,
                store,
                events: EventHub::new(),
            }),
        }
    }

    /// Build a view over the range the repository's metadata describes.
    pub async fn discover(repo: Arc<dyn Repository>, config: ViewConfig) -> Self {
        let (range, _) = ViewRange::discover(repo.as_ref(), config.default_span).await;
        Self::new(range, repo, config)
    }

    pub fn range(&self) -> ViewRange {
        self.inner.range
    }

    pub fn row_count(&self) -> u64 {
        self.inner.range.span().div_ceil(ROW_SIZE)
    }

    pub fn row_address_of(&self, index: u64) -> u64 {
        self.inner
            .range
            .start
            .saturating_add(index.saturating_mul(ROW_SIZE))
    }

    /// Row containing `address`; addresses outside the range clamp to the
    /// first or last row.
    pub fn index_of_address(&self, address: u64) -> u64 {
        let range = self.inner.range;
        if range.is_empty() {
            return 0;
        }
        (range.clamp(address) - range.start) / ROW_SIZE
    }

    /// Cached row `index`, or `None` while it is not loaded.
    ///
    /// Never waits: a miss schedules a background load when called inside a
    /// tokio runtime.
    pub fn get_row_data(&self, index: u64) -> Option<HexRow> {
        if index >= self.row_count() {
            return None;
        }
        let address = self.row_address_of(index);
        let snapshot = self.current_snapshot();
        match snapshot.chunk_containing(address) {
            Some(chunk) => {
                let offset = (address - chunk.anchor) as usize;
                let row_end = address.saturating_add(ROW_SIZE).min(chunk.end);
                let stop = ((row_end - chunk.anchor) as usize).min(chunk.rows.len());
                let bytes = chunk.rows.get(offset..stop).unwrap_or_default().to_vec();
                Some(HexRow {
                    index,
                    address,
                    bytes,
                })
            }
            None => {
                self.schedule_load(&snapshot, address);
                None
            }
        }
    }

    pub fn is_loaded(&self, address: u64) -> bool {
        self.current_snapshot().chunk_containing(address).is_some()
    }

    /// Fetch the chunk for `address` unless it is cached or already loading.
    ///
    /// Returns whether a new chunk was published.
    pub async fn load_chunk_if_needed(&self, address: u64) -> Result<bool> {
        let inner = &self.inner;
        let range = inner.range;
        if !range.contains(address) {
            return Ok(false);
        }

        let snapshot = self.current_snapshot();
        if snapshot.chunk_containing(address).is_some() {
            return Ok(false);
        }

        let anchor = self.row_address_of(self.index_of_address(address));
        let Some(_ticket) = inner.store.begin_load(snapshot.generation, anchor) else {
            return Ok(false);
        };

        let chunk_bytes = (inner.config.chunk_rows as u64).saturating_mul(ROW_SIZE);
        let mut end = anchor.saturating_add(chunk_bytes).min(range.end);
        if let Some(next) = snapshot.next_anchor_after(anchor) {
            end = end.min(next);
        }
        let length = end - anchor;

        trace!(anchor, length, "Loading hex chunk");
        let mut bytes = match inner.repo.fetch_bytes(anchor, length).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(anchor, error = %e, "Hex chunk load failed");
                inner.events.emit(ViewEvent::LoadFailed {
                    anchor,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        bytes.truncate(length as usize);

        let session_id = snapshot.session_id;
        if inner.repo.session_id() != session_id {
            debug!(anchor, "Session changed during load; discarding");
            return Ok(false);
        }

        let committed = inner.store.commit(Chunk {
            anchor,
            end,
            rows: bytes,
            session_id,
            generation: snapshot.generation,
        });
        if committed {
            inner.events.emit(ViewEvent::ChunkLoaded {
                anchor,
                end,
                rows: length.div_ceil(ROW_SIZE) as usize,
            });
        }
        Ok(committed)
    }

    /// Load the focus chunk and `radius` chunks on either side of it.
    ///
    /// Failures are reported as [`ViewEvent::LoadFailed`]; returns how many
    /// chunks were newly loaded.
    pub async fn preload_around(&self, address: u64, radius: usize) -> usize {
        let range = self.inner.range;
        if range.is_empty() {
            return 0;
        }
        let focus = range.clamp(address);
        let step = (self.inner.config.chunk_rows as u64).saturating_mul(ROW_SIZE);

        let mut targets = vec![focus];
        for i in 1..=radius as u64 {
            let distance = step.saturating_mul(i);
            if let Some(after) = focus.checked_add(distance).filter(|a| range.contains(*a)) {
                targets.push(after);
            }
            if let Some(before) = focus.checked_sub(distance).filter(|a| range.contains(*a)) {
                targets.push(before);
            }
        }

        let mut loaded = 0;
        for target in targets {
            if let Ok(true) = self.load_chunk_if_needed(target).await {
                loaded += 1;
            }
        }
        loaded
    }

    /// Drop every cached row. Loads already in flight are discarded when they finish.
    pub fn invalidate_all(&self) {
        let inner = &self.inner;
        let generation = inner.store.invalidate(inner.repo.session_id());
        debug!(generation, "Hex view invalidated");
        inner.events.emit(ViewEvent::Invalidated { generation });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.inner.events.subscribe()
    }

    pub fn cached_chunks(&self) -> usize {
        self.inner.store.snapshot().len()
    }

    pub fn pending_loads(&self) -> usize {
        self.inner.store.pending_count()
    }

    pub fn generation(&self) -> u64 {
        self.inner.store.snapshot().generation
    }

    fn current_snapshot(&self) -> Arc<Snapshot<u8>> {
        let inner = &self.inner;
        if let Some(generation) = inner.store.ensure_session(inner.repo.session_id()) {
            inner.events.emit(ViewEvent::Invalidated { generation });
        }
        inner.store.snapshot()
    }

    fn schedule_load(&self, snapshot: &Snapshot<u8>, address: u64) {
        let anchor = self.row_address_of(self.index_of_address(address));
        if self.inner.store.is_pending(snapshot.generation, anchor) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let view = self.clone();
                handle.spawn(async move {
                    let _ = view.load_chunk_if_needed(address).await;
                });
            }
            Err(_) => trace!(address, "No runtime; row load not scheduled"),
        }
    }
}
