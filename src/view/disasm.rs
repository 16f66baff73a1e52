//! Disassembly view: one decoded instruction per row.
//!
//! Instruction lengths vary, so the mapping between row index and address
//! is only known where instructions have been loaded. Loaded instructions
//! are kept in address order, deduplicated, with any instruction that
//! overlaps its predecessor dropped.
//!
//! # Row space
//!
//! Every accessor works in one index space covering the whole range. Each
//! loaded instruction is one row. Each unloaded gap between them (and before
//! the first or after the last) contributes `ceil(gap_bytes / avg_len)`
//! estimated rows, where `avg_len` is the mean loaded instruction length (the
//! configured default before anything is loaded). A gap is therefore never
//! empty in row space, so scrolling reaches every unloaded byte.
//!
//! For an address `a` inside a gap that starts at `g` and whose first row is
//! `r`:
//!
//! ```text
//! index(a) = r + floor((a - g) / avg_len)
//! ```
//!
//! An address inside a loaded instruction maps to that instruction's row.
//! The mapping is monotonic, stays inside the gap's rows, and is exact when
//! no unloaded bytes precede `a`. Every instruction is at least one byte and
//! `avg_len >= 1`, so both the estimated and the true row count of a gap lie
//! in `[0, gap_bytes]`: the error is bounded by the unloaded bytes before
//! `a`. Loading a chunk replaces its share of a gap with real rows, which
//! corrects the estimate for everything after it.

use crate::config::ViewConfig;
use crate::core::Instruction;
use crate::error::Result;
use crate::repository::Repository;
use crate::view::events::{EventHub, ViewEvent};
use crate::view::range::ViewRange;
use crate::view::store::{Chunk, ChunkStore, Snapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Where a row index lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowSlot {
    /// The `k`-th loaded instruction.
    Loaded(usize),
    /// `offset` rows into the gap that precedes loaded instruction `next`
    /// (`next == len` for the trailing gap).
    Gap { next: usize, offset: u64 },
}

/// Row index derived from one snapshot.
struct RowIndex {
    version: u64,
    range: ViewRange,
    default_len: u64,
    chunks: Vec<Arc<Chunk<Instruction>>>,
    /// (chunk, position) of each loaded row
    rows: Vec<(usize, usize)>,
    addresses: Vec<u64>,
    /// Row ends clipped to the range end
    ends: Vec<u64>,
    /// Row index of each loaded instruction
    positions: Vec<u64>,
    covered: u64,
    total: u64,
}

impl RowIndex {
    fn build(snapshot: &Snapshot<Instruction>, range: ViewRange, default_len: u64) -> Self {
        let mut index = Self {
            version: snapshot.version,
            range,
            default_len: default_len.max(1),
            chunks: Vec::with_capacity(snapshot.len()),
            rows: Vec::new(),
            addresses: Vec::new(),
            ends: Vec::new(),
            positions: Vec::new(),
            covered: 0,
            total: 0,
        };

        let mut last_end: Option<u64> = None;
        for chunk in snapshot.chunks.values() {
            let chunk_pos = index.chunks.len();
            index.chunks.push(chunk.clone());
            for (pos, ins) in chunk.rows.iter().enumerate() {
                if !range.contains(ins.address) {
                    continue;
                }
                if last_end.is_some_and(|end| ins.address < end) {
                    continue;
                }
                let end = ins.end_address().min(range.end);
                index.rows.push((chunk_pos, pos));
                index.addresses.push(ins.address);
                index.ends.push(end);
                index.covered += end - ins.address;
                last_end = Some(end);
            }
        }

        let mut row = 0u64;
        for k in 0..index.addresses.len() {
            row += index.gap_rows(index.addresses[k] - index.gap_start(k));
            index.positions.push(row);
            row += 1;
        }
        let trailing = index.addresses.len();
        index.total = row + index.gap_rows(range.end - index.gap_start(trailing));
        index
    }

    fn len(&self) -> u64 {
        self.rows.len() as u64
    }

    fn instruction(&self, k: usize) -> Option<&Instruction> {
        let (chunk, pos) = *self.rows.get(k)?;
        self.chunks.get(chunk)?.rows.get(pos)
    }

    /// First address of the gap before loaded row `next`.
    fn gap_start(&self, next: usize) -> u64 {
        match next.checked_sub(1) {
            Some(prev) => self.ends[prev],
            None => self.range.start,
        }
    }

    /// One past the last address of the gap before loaded row `next`.
    fn gap_end(&self, next: usize) -> u64 {
        self.addresses.get(next).copied().unwrap_or(self.range.end)
    }

    /// First row index of the gap before loaded row `next`.
    fn gap_first_row(&self, next: usize) -> u64 {
        match next.checked_sub(1) {
            Some(prev) => self.positions[prev] + 1,
            None => 0,
        }
    }

    /// Estimated rows for a gap of `bytes`, rounded up.
    fn gap_rows(&self, bytes: u64) -> u64 {
        if bytes == 0 {
            return 0;
        }
        let n = self.len();
        if n == 0 {
            return bytes.div_ceil(self.default_len);
        }
        let scaled = bytes as u128 * n as u128;
        scaled.div_ceil(self.covered.max(1) as u128) as u64
    }

    /// Rows of a gap that start before byte `offset` into it.
    fn rows_within(&self, offset: u64) -> u64 {
        let n = self.len();
        if n == 0 {
            return offset / self.default_len;
        }
        (offset as u128 * n as u128 / self.covered.max(1) as u128) as u64
    }

    /// Byte offset of estimated row `rows` into a gap.
    fn bytes_within(&self, rows: u64) -> u64 {
        let n = self.len();
        if n == 0 {
            return rows.saturating_mul(self.default_len);
        }
        let bytes = (rows as u128 * self.covered as u128).div_ceil(n as u128);
        u64::try_from(bytes).unwrap_or(u64::MAX)
    }

    fn slot(&self, row: u64) -> RowSlot {
        let k = self.positions.partition_point(|p| *p < row);
        if self.positions.get(k) == Some(&row) {
            RowSlot::Loaded(k)
        } else {
            RowSlot::Gap {
                next: k,
                offset: row - self.gap_first_row(k),
            }
        }
    }

    /// Estimated address of a gap row, kept inside the gap.
    fn gap_address(&self, next: usize, offset: u64) -> u64 {
        let start = self.gap_start(next);
        let last = self.gap_end(next).saturating_sub(1).max(start);
        start.saturating_add(self.bytes_within(offset)).min(last)
    }

    fn address_of(&self, row: u64) -> u64 {
        match self.slot(row) {
            RowSlot::Loaded(k) => self.addresses[k],
            RowSlot::Gap { next, offset } => self.gap_address(next, offset),
        }
    }

    fn index_of(&self, address: u64) -> u64 {
        let k = self.ends.partition_point(|end| *end <= address);
        if self.addresses.get(k).is_some_and(|start| *start <= address) {
            return self.positions[k];
        }
        self.gap_first_row(k) + self.rows_within(address - self.gap_start(k))
    }
}

struct DisasmInner {
    range: ViewRange,
    repo: Arc<dyn Repository>,
    config: ViewConfig,
    store: ChunkStore<Instruction>,
    index: Mutex<Option<Arc<RowIndex>>>,
    events: EventHub,
}

/// Demand-paged instruction rows. Cloning shares the cache.
#[derive(Clone)]
pub struct DisasmView {
    inner: Arc<DisasmInner>,
}

impl std::fmt::Debug for DisasmView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisasmView")
            .field("range", &self.inner.range)
            .field("chunks", &self.inner.store.snapshot().len())
            .finish()
    }
}

impl DisasmView {
    pub fn new(range: ViewRange, repo: Arc<dyn Repository>, config: ViewConfig) -> Self {
        let store = ChunkStore::new(repo.session_id(), config.max_cached_chunks);
        Self {
            inner: Arc::new(DisasmInner {
                range,
                repo,
                config,
                store,
                index: Mutex::new(None),
                events: EventHub::new(),
            }),
        }
    }

    pub async fn discover(repo: Arc<dyn Repository>, config: ViewConfig) -> Self {
        let (range, _) = ViewRange::discover(repo.as_ref(), config.default_span).await;
        Self::new(range, repo, config)
    }

    pub fn range(&self) -> ViewRange {
        self.inner.range
    }

    /// Instructions loaded so far; grows as chunks arrive.
    pub fn row_count(&self) -> u64 {
        self.row_index().len()
    }

    /// Loaded rows plus an estimate for the bytes not yet disassembled;
    /// the size of the row space every index refers to.
    pub fn estimated_row_count(&self) -> u64 {
        self.row_index().total
    }

    /// Instruction at row `index`, or `None` while that row is an estimate.
    ///
    /// A miss inside an unloaded gap schedules a load there. Anchors are
    /// spaced one chunk apart from the start of the gap, so neighbouring
    /// misses share a fetch and a gap entered from above starts at a real
    /// instruction boundary.
    pub fn get_row_data(&self, index: u64) -> Option<Instruction> {
        let rows = self.row_index();
        match rows.slot(index) {
            RowSlot::Loaded(k) => rows.instruction(k).cloned(),
            RowSlot::Gap { next, offset } => {
                if index < rows.total {
                    let step = self.inner.config.chunk_rows.max(1) as u64;
                    let anchor = rows.gap_address(next, offset - offset % step);
                    self.schedule_load(anchor);
                }
                None
            }
        }
    }

    /// Cached instruction covering `address`; schedules a load on a miss.
    pub fn get_instruction_at(&self, address: u64) -> Option<Instruction> {
        let snapshot = self.current_snapshot();
        match snapshot.chunk_containing(address) {
            Some(chunk) => {
                let k = chunk.rows.partition_point(|ins| ins.address <= address);
                k.checked_sub(1)
                    .and_then(|i| chunk.rows.get(i))
                    .filter(|ins| ins.contains(address))
                    .cloned()
            }
            None => {
                self.schedule_load(address);
                None
            }
        }
    }

    /// Address of row `index`. Rows inside unloaded gaps are placed
    /// `avg_len` bytes apart from the start of their gap.
    pub fn row_address_of(&self, index: u64) -> u64 {
        let range = self.inner.range;
        if range.is_empty() {
            return range.start;
        }
        range.clamp(self.row_index().address_of(index))
    }

    /// Row of `address`; see the module docs for the error bound.
    pub fn index_of_address(&self, address: u64) -> u64 {
        let range = self.inner.range;
        if range.is_empty() {
            return 0;
        }
        self.row_index().index_of(range.clamp(address))
    }

    pub fn is_loaded(&self, address: u64) -> bool {
        self.current_snapshot().chunk_containing(address).is_some()
    }

    /// Disassemble a chunk starting at `address` unless it is cached or
    /// already loading. Returns whether a new chunk was published.
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
        let Some(_ticket) = inner.store.begin_load(snapshot.generation, address) else {
            return Ok(false);
        };

        trace!(address, count = inner.config.chunk_rows, "Loading instruction chunk");
        let mut rows = match inner
            .repo
            .fetch_instructions(address, inner.config.chunk_rows)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(anchor = address, error = %e, "Instruction chunk load failed");
                inner.events.emit(ViewEvent::LoadFailed {
                    anchor: address,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let next_anchor = snapshot.next_anchor_after(address);
        rows.sort_by_key(|ins| ins.address);
        rows.dedup_by_key(|ins| ins.address);
        rows.retain(|ins| {
            ins.address >= address
                && range.contains(ins.address)
                && next_anchor.map_or(true, |next| ins.address < next)
        });

        // An empty chunk still marks the address as visited.
        let end = rows
            .last()
            .map_or(address, |ins| ins.end_address().min(range.end))
            .max(address + 1);

        let session_id = snapshot.session_id;
        if inner.repo.session_id() != session_id {
            debug!(anchor = address, "Session changed during load; discarding");
            return Ok(false);
        }

        let count = rows.len();
        let committed = inner.store.commit(Chunk {
            anchor: address,
            end,
            rows,
            session_id,
            generation: snapshot.generation,
        });
        if committed {
            inner.events.emit(ViewEvent::ChunkLoaded {
                anchor: address,
                end,
                rows: count,
            });
        }
        Ok(committed)
    }

    /// Load forward from the start of the function around `address`, then
    /// from `address` itself, `radius + 1` chunks each.
    ///
    /// Walking from the function start keeps instruction boundaries aligned
    /// with real code instead of guessing from an arbitrary address. Returns
    /// how many chunks were newly loaded.
    pub async fn preload_around(&self, address: u64, radius: usize) -> usize {
        let range = self.inner.range;
        if range.is_empty() {
            return 0;
        }
        let focus = range.clamp(address);
        let origin = match self.inner.repo.function_start(focus).await {
            Ok(start) if range.contains(start) && start <= focus => start,
            Ok(_) => focus,
            Err(e) => {
                debug!(address = focus, error = %e, "No function start; preloading from focus");
                focus
            }
        };

        let mut loaded = self.walk_forward(origin, radius + 1).await;
        if origin != focus {
            loaded += self.walk_forward(focus, radius + 1).await;
        }
        loaded
    }

    /// Load the chunk at the start of the function containing `address`.
    pub async fn load_function_containing(&self, address: u64) -> Result<u64> {
        let start = self.inner.repo.function_start(address).await?;
        self.load_chunk_if_needed(start).await?;
        Ok(start)
    }

    /// Drop every cached row. Loads already in flight are discarded when they finish.
    pub fn invalidate_all(&self) {
        let inner = &self.inner;
        let generation = inner.store.invalidate(inner.repo.session_id());
        *inner.index.lock() = None;
        debug!(generation, "Disassembly view invalidated");
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

    async fn walk_forward(&self, from: u64, steps: usize) -> usize {
        let mut cursor = from;
        let mut loaded = 0;
        for _ in 0..steps {
            if !self.inner.range.contains(cursor) {
                break;
            }
            match self.load_chunk_if_needed(cursor).await {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(_) => break,
            }
            match self.current_snapshot().chunk_containing(cursor) {
                Some(chunk) => cursor = chunk.end,
                None => break,
            }
        }
        loaded
    }

    fn current_snapshot(&self) -> Arc<Snapshot<Instruction>> {
        let inner = &self.inner;
        if let Some(generation) = inner.store.ensure_session(inner.repo.session_id()) {
            inner.events.emit(ViewEvent::Invalidated { generation });
        }
        inner.store.snapshot()
    }

    fn row_index(&self) -> Arc<RowIndex> {
        let snapshot = self.current_snapshot();
        let mut cached = self.inner.index.lock();
        if let Some(index) = cached.as_ref().filter(|i| i.version == snapshot.version) {
            return index.clone();
        }
        let index = Arc::new(RowIndex::build(
            &snapshot,
            self.inner.range,
            self.inner.config.default_instruction_len,
        ));
        *cached = Some(index.clone());
        index
    }

    fn schedule_load(&self, address: u64) {
        if !self.inner.range.contains(address) {
            return;
        }
        let generation = self.inner.store.snapshot().generation;
        if self.inner.store.is_pending(generation, address) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let view = self.clone();
                handle.spawn(async move {
                    let _ = view.load_chunk_if_needed(address).await;
                });
            }
            Err(_) => trace!(address, "No runtime; instruction load not scheduled"),
        }
    }
}
