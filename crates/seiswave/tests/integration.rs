//! Black-box tests for the seiswave core
//!
//! These exercise parse → query → encode, and import → filter → store.

use std::sync::Arc;

use seiswave::{
    ChannelBatch, Command, CommandCache, Filter, FilterChain, FilterSpec, Grammar, IngestConfig,
    Ingestor, MemoryStore, QueryConfig, QueryEngine, QueryKind, QueryRequest, RsamParams,
    SECONDS_PER_DAY, Scnl, WaveRecord, WaveStore, Waveform, decode_binary_chunks, encode_binary,
    encode_text, parse,
};

const NOW: f64 = 1_700_000_000.0;

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .insert(WaveRecord::new(
            Scnl::new("STA1", "EHZ", "NW", "--"),
            Waveform::new(1000.0, 50.0, (0..500).collect()),
        ))
        .unwrap();
    store
}

fn run(line: &str, grammar: Grammar, store: &dyn WaveStore, engine: &QueryEngine) -> Vec<u8> {
    let command: Command = parse(line, grammar).unwrap();
    let request = QueryRequest::from_command(&command).unwrap();
    let chunks = engine.query(store, &request, NOW).unwrap();
    let mut out = Vec::new();
    encode_binary(&chunks, &mut out).unwrap();
    out
}

// ============ Query ============

#[test]
fn raw_query_end_to_end() {
    let store = seeded_store();
    let engine = QueryEngine::default();
    let payload = run(
        "GETSCNLRAW 1 STA1 EHZ NW -- 1000.0 1010.0 0 1",
        Grammar::Scnl,
        &store,
        &engine,
    );

    let chunks = decode_binary_chunks(&payload).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, QueryKind::Raw);
    assert_eq!(chunks[0].values.len(), 500);
    assert_eq!(chunks[0].values[499], 499.0);
    assert_eq!(chunks[0].first, 1000.0);
}

#[test]
fn scn_query_matches_empty_location() {
    let store = seeded_store();
    let engine = QueryEngine::default();
    let payload = run("GETSCNRAW 2 STA1 EHZ NW 1000 1001", Grammar::Scn, &store, &engine);
    let chunks = decode_binary_chunks(&payload).unwrap();
    assert_eq!(chunks[0].values.len(), 51);
}

#[test]
fn unknown_channel_is_empty() {
    let store = seeded_store();
    let engine = QueryEngine::default();
    let payload = run(
        "GETSCNLRAW 3 STA9 EHZ NW -- 1000 1010",
        Grammar::Scnl,
        &store,
        &engine,
    );
    assert!(payload.is_empty());
}

#[test]
fn rsam_query_with_downsample() {
    let store = seeded_store();
    let engine = QueryEngine::new(QueryConfig {
        max_days: 0.0,
        rsam: RsamParams {
            delta: 1.0,
            duration: 3.0,
        },
        ..QueryConfig::default()
    });
    let payload = run(
        "GETSCNLRSAMRAW 4 STA1 EHZ NW -- 1000 1010 2 1",
        Grammar::Rsam,
        &store,
        &engine,
    );

    let chunks = decode_binary_chunks(&payload).unwrap();
    assert_eq!(chunks[0].kind, QueryKind::Rsam);
    // ten one-second windows, averaged in pairs
    assert_eq!(chunks[0].values.len(), 5);
    // window 0 holds samples 0..50, mean 24.5; window 1 holds 50..100, mean 74.5
    assert_eq!(chunks[0].values[0], 49.5);
}

#[test]
fn text_framing_lists_values() {
    let store = seeded_store();
    let command = parse("GETSCNLRAW 5 STA1 EHZ NW -- 1000 1000.05 0 0", Grammar::Scnl).unwrap();
    assert!(!command.binary);

    let request = QueryRequest::from_command(&command).unwrap();
    let chunks = QueryEngine::default().query(&store, &request, NOW).unwrap();
    let mut text = String::new();
    encode_text(&chunks, &mut text);
    assert_eq!(text, "STA1 EHZ NW -- 1000.000000 1000.040000 3\n0 1 2\n");
}

#[test]
fn cached_command_resolves_now_each_time() {
    let store = MemoryStore::new();
    store
        .insert(WaveRecord::new(
            Scnl::scn("STA1", "EHZ", "NW"),
            Waveform::new(NOW - 5.0, 1.0, vec![1; 20]),
        ))
        .unwrap();

    let mut cache = CommandCache::new();
    let line = "GETSCNRAW 1 STA1 EHZ NW now 0";
    let engine = QueryEngine::default();

    let command = cache.get_or_parse(line, Grammar::Scn).unwrap();
    let request = QueryRequest::from_command(&command).unwrap();
    let points = engine.points(&store, &request, NOW).unwrap();
    assert_eq!(points.len(), 1);

    let command = cache.get_or_parse(line, Grammar::Scn).unwrap();
    let request = QueryRequest::from_command(&command).unwrap();
    assert!(engine.points(&store, &request, NOW + 100.0).unwrap().is_empty());
    assert_eq!(cache.hits(), 1);
}

// ============ Ingest ============

fn aged_batch(code: &str, ages: &[f64]) -> ChannelBatch {
    let mut batch = ChannelBatch::new();
    batch.insert(
        code.to_string(),
        ages.iter()
            .map(|days| Waveform::new(NOW - days * SECONDS_PER_DAY, 1.0, vec![7; 4]))
            .collect(),
    );
    batch
}

#[test]
fn age_filter_from_config() {
    let spec: FilterSpec = serde_json::from_str(r#"{"kind": "max_days", "max_days": 30}"#).unwrap();
    let chain = FilterChain::from_specs([spec]).unwrap();
    let store = Arc::new(MemoryStore::new());
    let ingestor = Ingestor::new(store.clone(), chain, IngestConfig::default());

    let report = ingestor
        .import_batch(aged_batch("STA1$EHZ$NW$--", &[40.0, 10.0]), NOW)
        .unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected, 1);

    let channels = store.channels();
    assert_eq!(channels.len(), 1);
    let span = channels[0].span.unwrap();
    assert_eq!(span.start(), NOW - 10.0 * SECONDS_PER_DAY);
}

#[test]
fn ingested_data_is_queryable() {
    let store = Arc::new(MemoryStore::new());
    let chain = FilterChain::new([Filter::future_time(60.0)]);
    let ingestor = Ingestor::new(store.clone(), chain, IngestConfig::default());
    ingestor
        .import_batch(aged_batch("STA2$BHZ$XX", &[1.0, 2.0]), NOW)
        .unwrap();

    let command = parse("GETSCNRAW 9 STA2 BHZ XX 0 now", Grammar::Scn).unwrap();
    let request = QueryRequest::from_command(&command).unwrap();
    let points = QueryEngine::default().points(store.as_ref(), &request, NOW).unwrap();
    assert_eq!(points.len(), 8);
    assert!(points.windows(2).all(|w| w[0].first <= w[1].first));
}
