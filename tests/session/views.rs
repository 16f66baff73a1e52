//! View caches over an in-memory repository and over a live channel.

use crate::common::mock_channel;
use enginelink::config::ViewConfig;
use enginelink::core::{FunctionInfo, Section};
use enginelink::repository::{MemoryRepository, Repository};
use enginelink::view::{DisasmView, HexView, RangeSource, ViewEvent, ViewRange, ViewSet, ROW_SIZE};
use enginelink::LaunchSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const START: u64 = 0x1000;
const END: u64 = 0x2000;

fn image() -> Vec<u8> {
    (0..(END - START) as usize).map(|i| (i % 256) as u8).collect()
}

fn memory_repo() -> Arc<MemoryRepository> {
    Arc::new(MemoryRepository::new(START, image()).with_uniform_instructions(4))
}

fn range() -> ViewRange {
    ViewRange::new(START, END).unwrap()
}

async fn next_loaded(events: &mut broadcast::Receiver<ViewEvent>) -> (u64, u64) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no view event")
            .unwrap();
        if let ViewEvent::ChunkLoaded { anchor, end, .. } = event {
            return (anchor, end);
        }
    }
}

#[tokio::test]
async fn test_hex_miss_loads_in_background() {
    let repo = memory_repo();
    let view = HexView::new(range(), repo.clone(), ViewConfig::default());
    assert_eq!(view.row_count(), 256);

    let mut events = view.subscribe();
    assert!(view.get_row_data(0).is_none());
    let (anchor, end) = next_loaded(&mut events).await;
    assert_eq!(anchor, START);
    assert_eq!(end, START + 64 * ROW_SIZE);

    let row = view.get_row_data(0).unwrap();
    assert_eq!(row.address, START);
    assert_eq!(row.bytes, (0u8..16).collect::<Vec<_>>());
    let row = view.get_row_data(63).unwrap();
    assert_eq!(row.address, START + 63 * ROW_SIZE);
    assert!(view.get_row_data(64).is_none());
    assert_eq!(repo.byte_fetches(), 1);
}

#[tokio::test]
async fn test_hex_single_row_scenario() {
    let repo = memory_repo();
    let config = ViewConfig {
        chunk_rows: 1,
        ..ViewConfig::default()
    };
    let view = HexView::new(range(), repo.clone(), config);

    assert_eq!(view.index_of_address(0x1010), 1);
    assert_eq!(view.row_address_of(1), 0x1010);
    assert!(view.get_row_data(1).is_none());

    view.load_chunk_if_needed(0x1010).await.unwrap();
    let row = view.get_row_data(1).unwrap();
    assert_eq!(row.bytes, (16u8..32).collect::<Vec<_>>());
    assert_eq!(row.bytes.len(), ROW_SIZE as usize);
}

#[tokio::test]
async fn test_hex_address_round_trip_stays_within_a_row() {
    let view = HexView::new(range(), memory_repo(), ViewConfig::default());
    for address in START..END {
        let back = view.row_address_of(view.index_of_address(address));
        assert!(back <= address && address - back < ROW_SIZE);
    }
}

#[tokio::test]
async fn test_hex_index_and_address_agree_on_every_row() {
    let view = HexView::new(range(), memory_repo(), ViewConfig::default());
    for index in 0..view.row_count() {
        let address = view.row_address_of(index);
        assert_eq!(view.index_of_address(address), index);
        assert_eq!(view.index_of_address(address + ROW_SIZE - 1), index);
    }
}

#[tokio::test]
async fn test_disasm_index_and_address_agree_on_loaded_rows() {
    let repo = memory_repo();
    let view = DisasmView::new(range(), repo, ViewConfig::default());
    assert!(view.load_chunk_if_needed(START).await.unwrap());
    assert!(view.load_chunk_if_needed(START + 0x100).await.unwrap());

    assert_eq!(view.row_count(), 128);
    for index in 0..view.row_count() {
        let address = view.row_address_of(index);
        assert_eq!(view.index_of_address(address), index);
    }
    assert_eq!(view.estimated_row_count(), 1024);
}

#[tokio::test]
async fn test_disasm_estimate_is_monotonic_across_gaps() {
    let repo = memory_repo();
    let view = DisasmView::new(range(), repo, ViewConfig::default());
    view.load_chunk_if_needed(START + 0x400).await.unwrap();

    let mut last = 0;
    for address in (START..END).step_by(4) {
        let index = view.index_of_address(address);
        assert!(index >= last, "index went backwards at {:#x}", address);
        last = index;
    }
    // Everything before the loaded chunk is one gap of 0x400 bytes.
    assert_eq!(view.index_of_address(START + 0x400), 0x100);
    assert_eq!(view.get_row_data(0x100).unwrap().address, START + 0x400);
}

#[tokio::test]
async fn test_disasm_seek_into_a_middle_chunk_serves_the_row() {
    let repo = memory_repo();
    let view = DisasmView::new(range(), repo.clone(), ViewConfig::default());
    view.load_chunk_if_needed(START + 0x400).await.unwrap();
    assert_eq!(view.row_count(), 64);

    let target = START + 0x400;
    let index = view.index_of_address(target);
    assert_eq!(index, 256);
    assert_eq!(view.row_address_of(index), target);
    assert_eq!(view.get_row_data(index).unwrap().address, target);
    assert_eq!(view.row_address_of(0), START);

    // Scrolling to the top fills the gap from its first byte.
    let mut events = view.subscribe();
    assert!(view.get_row_data(10).is_none());
    let (anchor, end) = next_loaded(&mut events).await;
    assert_eq!((anchor, end), (START, START + 0x100));
    assert_eq!(view.get_row_data(10).unwrap().address, START + 0x28);
    assert_eq!(view.get_row_data(view.index_of_address(target)).unwrap().address, target);

    // Scrolling up from the middle chunk loads the rows right above it.
    assert!(view.get_row_data(255).is_none());
    let (anchor, end) = next_loaded(&mut events).await;
    assert_eq!((anchor, end), (START + 0x300, START + 0x400));
    assert_eq!(view.get_row_data(255).unwrap().address, target - 4);

    assert_eq!(view.row_count(), 192);
    assert_eq!(view.index_of_address(target), 256);
    assert_eq!(view.get_row_data(256).unwrap().address, target);
    assert_eq!(repo.instruction_fetches(), 3);
}

#[tokio::test]
async fn test_load_function_containing_loads_the_entry_chunk() {
    let repo = Arc::new(
        MemoryRepository::new(START, image())
            .with_uniform_instructions(4)
            .with_functions(vec![FunctionInfo {
                address: START + 0x200,
                name: "main".to_string(),
                size: 0x400,
                nbbs: 3,
            }]),
    );
    let config = ViewConfig {
        chunk_rows: 16,
        ..ViewConfig::default()
    };
    let view = DisasmView::new(range(), repo.clone(), config);

    let entry = view.load_function_containing(START + 0x340).await.unwrap();
    assert_eq!(entry, START + 0x200);
    assert!(view.is_loaded(START + 0x200));
    assert!(!view.is_loaded(START + 0x340));
    assert_eq!(
        view.get_instruction_at(START + 0x202).unwrap().address,
        START + 0x200
    );
    assert_eq!(repo.instruction_fetches(), 1);

    // Outside any function the address is its own entry.
    let entry = view.load_function_containing(START + 0x800).await.unwrap();
    assert_eq!(entry, START + 0x800);
    assert!(view.is_loaded(START + 0x800));
    assert_eq!(repo.instruction_fetches(), 2);
}

#[tokio::test]
async fn test_mutation_never_serves_stale_bytes() {
    let repo = memory_repo();
    let view = HexView::new(range(), repo.clone(), ViewConfig::default());
    view.load_chunk_if_needed(START).await.unwrap();
    assert_eq!(view.get_row_data(0).unwrap().bytes[0], 0);

    repo.write(START, &[0xff, 0xee]);
    view.invalidate_all();
    assert!(view.get_row_data(0).is_none());

    view.load_chunk_if_needed(START).await.unwrap();
    assert_eq!(&view.get_row_data(0).unwrap().bytes[..3], &[0xff, 0xee, 0x02]);
}

#[tokio::test]
async fn test_load_in_flight_during_invalidation_is_discarded() {
    let repo = memory_repo();
    repo.set_latency(Some(Duration::from_millis(100)));
    let view = HexView::new(range(), repo.clone(), ViewConfig::default());

    let load = {
        let view = view.clone();
        tokio::spawn(async move { view.load_chunk_if_needed(START).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(view.pending_loads(), 1);
    view.invalidate_all();

    assert!(!load.await.unwrap().unwrap());
    assert_eq!(view.cached_chunks(), 0);
    assert_eq!(view.pending_loads(), 0);

    repo.set_latency(None);
    assert!(view.load_chunk_if_needed(START).await.unwrap());
    assert_eq!(view.cached_chunks(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let repo = memory_repo();
    repo.set_latency(Some(Duration::from_millis(50)));
    let view = HexView::new(range(), repo.clone(), ViewConfig::default());

    let (a, b) = tokio::join!(
        view.load_chunk_if_needed(START),
        view.load_chunk_if_needed(START + 0x5)
    );
    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(repo.byte_fetches(), 1);
}

#[tokio::test]
async fn test_session_change_drops_cache() {
    let repo = memory_repo();
    let view = DisasmView::new(range(), repo.clone(), ViewConfig::default());
    view.load_chunk_if_needed(START).await.unwrap();
    assert!(view.get_instruction_at(START + 5).is_some());

    let mut events = view.subscribe();
    repo.set_session_id(2);
    assert!(!view.is_loaded(START));
    assert!(matches!(
        events.try_recv(),
        Ok(ViewEvent::Invalidated { .. })
    ));
}

#[tokio::test]
async fn test_failed_load_is_reported() {
    let repo = memory_repo();
    repo.set_failing(true);
    let view = HexView::new(range(), repo.clone(), ViewConfig::default());
    let mut events = view.subscribe();

    assert!(view.load_chunk_if_needed(START + 0x13).await.is_err());
    match events.try_recv() {
        Ok(ViewEvent::LoadFailed { anchor, .. }) => assert_eq!(anchor, START + 0x10),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!view.is_loaded(START + 0x13));
    assert_eq!(view.pending_loads(), 0);
}

#[tokio::test]
async fn test_cache_evicts_chunks_far_from_the_newest() {
    let repo = memory_repo();
    let config = ViewConfig {
        chunk_rows: 1,
        max_cached_chunks: 2,
        ..ViewConfig::default()
    };
    let view = HexView::new(range(), repo, config);
    for address in [START, START + 0x10, START + 0x20] {
        assert!(view.load_chunk_if_needed(address).await.unwrap());
    }
    assert_eq!(view.cached_chunks(), 2);
    assert!(!view.is_loaded(START));
    assert!(view.is_loaded(START + 0x20));
}

#[tokio::test]
async fn test_preload_starts_at_the_function_entry() {
    let repo = Arc::new(
        MemoryRepository::new(START, image())
            .with_uniform_instructions(4)
            .with_functions(vec![FunctionInfo {
                address: START + 0x200,
                name: "main".to_string(),
                size: 0x400,
                nbbs: 3,
            }]),
    );
    let config = ViewConfig {
        chunk_rows: 16,
        ..ViewConfig::default()
    };
    let view = DisasmView::new(range(), repo.clone(), config);

    let loaded = view.preload_around(START + 0x300, 1).await;
    assert_eq!(loaded, 4);
    assert!(view.is_loaded(START + 0x200));
    assert!(view.is_loaded(START + 0x300));
    let entry_row = view.index_of_address(START + 0x200);
    assert_eq!(entry_row, 0x80);
    assert_eq!(view.get_row_data(entry_row).unwrap().address, START + 0x200);
}

#[tokio::test]
async fn test_range_discovery_prefers_sections() {
    let repo = MemoryRepository::new(START, image())
        .with_sections(vec![
            Section::new(".text", 0x1400, 0x200),
            Section::new(".data", 0x1800, 0x100),
            Section::new(".bss", 0x3000, 0),
        ])
        .with_file_size(Some(0x5000));
    let (range, source) = ViewRange::discover(&repo, 0x100).await;
    assert_eq!((range.start, range.end), (0x1400, 0x1900));
    assert_eq!(source, RangeSource::Sections);

    let repo = MemoryRepository::new(START, image()).with_sections(Vec::new());
    let (range, source) = ViewRange::discover(&repo, 0x100).await;
    assert_eq!((range.start, range.end), (0, 0x1000));
    assert_eq!(source, RangeSource::FileSize);

    let repo = MemoryRepository::new(START, image())
        .with_sections(Vec::new())
        .with_file_size(None);
    let (range, source) = ViewRange::discover(&repo, 0x100).await;
    assert_eq!((range.start, range.end), (0, 0x100));
    assert_eq!(source, RangeSource::Default);
}

#[tokio::test]
async fn test_view_set_over_live_channel() {
    let (channel, launcher) = mock_channel(START, (END - START) as usize);
    channel.open(LaunchSpec::file("target")).await.unwrap();
    let views = ViewSet::open(channel.clone()).await;
    assert_eq!(views.hex().range(), range());

    views.after_mutation(START).await;
    let row = views.hex().get_row_data(0).unwrap();
    assert_eq!(row.bytes, launcher.engine.bytes_at(START, 16));
    let ins = views.disasm().get_instruction_at(START + 4).unwrap();
    assert_eq!(ins.address, START + 4);
    assert_eq!(ins.size, 4);

    views.execute_mutating("wx ffee @ 0x1000", START).await.unwrap();
    let row = views.hex().get_row_data(0).unwrap();
    assert_eq!(&row.bytes[..3], &[0xff, 0xee, 0x02]);
    let ins = views.disasm().get_instruction_at(START).unwrap();
    assert_eq!(ins.bytes, "ffee0203");
}

#[tokio::test]
async fn test_reopening_the_session_invalidates_views() {
    let (channel, _launcher) = mock_channel(START, (END - START) as usize);
    channel.open(LaunchSpec::file("target")).await.unwrap();
    let views = ViewSet::open(channel.clone()).await;
    views.hex().load_chunk_if_needed(START).await.unwrap();
    assert!(views.hex().is_loaded(START));

    channel.open(LaunchSpec::file("target")).await.unwrap();
    assert!(!views.hex().is_loaded(START));
    assert!(views.hex().load_chunk_if_needed(START).await.unwrap());
}

#[tokio::test]
async fn test_failed_mutation_keeps_cache() {
    let (channel, _launcher) = mock_channel(START, (END - START) as usize);
    channel.open(LaunchSpec::file("target")).await.unwrap();
    let views = ViewSet::open(channel.clone()).await;
    views.hex().load_chunk_if_needed(START).await.unwrap();
    let generation = views.hex().generation();

    assert!(views.execute_mutating("wx zz @ 0x1000", START).await.is_err());
    assert_eq!(views.hex().generation(), generation);
    assert!(views.hex().is_loaded(START));
}

#[tokio::test]
async fn test_repository_trait_objects_are_shareable() {
    let repo: Arc<dyn Repository> = memory_repo();
    let hex = HexView::discover(repo.clone(), ViewConfig::default()).await;
    let disasm = DisasmView::discover(repo, ViewConfig::default()).await;
    assert_eq!(hex.range(), disasm.range());
    assert_eq!(hex.range(), range());
}
