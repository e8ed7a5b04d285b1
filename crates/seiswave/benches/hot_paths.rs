use criterion::{Criterion, black_box, criterion_group, criterion_main};
use seiswave::{
    CommandCache, Grammar, MemoryStore, Point, QueryEngine, QueryKind, QueryRequest, RequestSpan,
    Scnl, WaveRecord, Waveform, encode_binary, parse, split_chunks,
};

const LINE: &str = "GETSCNLRAW 42 STA1 EHZ NW -- 1700000000.0 1700003600.0 0 1";

fn hour_of_data() -> MemoryStore {
    let store = MemoryStore::new();
    let scnl = Scnl::new("STA1", "EHZ", "NW", "--");
    for block in 0..36 {
        let start = 1_700_000_000.0 + f64::from(block) * 100.0;
        let samples = (0..10_000).map(|i| (i % 2048) - 1024).collect();
        store
            .insert(WaveRecord::new(scnl.clone(), Waveform::new(start, 100.0, samples)))
            .unwrap();
    }
    store
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_scnl_command", |b| {
        b.iter(|| parse(black_box(LINE), Grammar::Scnl).unwrap())
    });
}

fn bench_cached_parse(c: &mut Criterion) {
    let mut cache = CommandCache::new();

    c.bench_function("cached_parse_scnl_command", |b| {
        b.iter(|| cache.get_or_parse(black_box(LINE), Grammar::Scnl).unwrap())
    });
}

fn bench_split_chunks(c: &mut Criterion) {
    let scnl = Scnl::scn("STA1", "EHZ", "NW");
    let points: Vec<Point> = (0..360_000)
        .map(|i| Point {
            first: f64::from(i),
            last: f64::from(i),
            value: f64::from(i % 1000),
        })
        .collect();

    c.bench_function("split_chunks_360k", |b| {
        b.iter(|| split_chunks(black_box(&scnl), QueryKind::Raw, black_box(&points)))
    });
}

fn bench_raw_query(c: &mut Criterion) {
    let store = hour_of_data();
    let engine = QueryEngine::default();
    let request = QueryRequest::new(
        Scnl::new("STA1", "EHZ", "NW", "--"),
        RequestSpan::between(1_700_000_000.0, 1_700_003_600.0),
        QueryKind::Raw,
    );

    c.bench_function("raw_query_encode_hour", |b| {
        b.iter(|| {
            let chunks = engine.query(&store, black_box(&request), 1_700_010_000.0).unwrap();
            let mut out = Vec::new();
            encode_binary(&chunks, &mut out).unwrap();
            out
        })
    });
}

criterion_group!(
    hot_paths,
    bench_parse,
    bench_cached_parse,
    bench_split_chunks,
    bench_raw_query
);
criterion_main!(hot_paths);
