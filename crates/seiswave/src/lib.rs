//! seiswave - waveform time-series core
//!
//! Request parsing, filtering, storage and query execution for a wave server
//! that answers line-oriented requests for seismic channel data.
//!
//! ## Quick Start
//!
//! ```ignore
//! use seiswave::{MemoryStore, QueryConfig, QueryEngine, QueryRequest, Grammar};
//!
//! let store = MemoryStore::new();
//! let engine = QueryEngine::new(QueryConfig::default());
//!
//! let command = seiswave::parse("GETSCNLRAW 1 STA1 EHZ NW -- 1000 1010", Grammar::Scnl)?;
//! let request = QueryRequest::from_command(&command).unwrap();
//! let chunks = engine.query(&store, &request, seiswave::epoch_now())?;
//! ```
//!
//! ## Request grammar
//!
//! - `<OPCODE> <SEQ> [<STA> <CHA> <NET> [<LOC>]] [<T1> <T2>] [<DS>] [<FLAG>]`
//! - `T1`/`T2`: epoch seconds, `now`, or `0` for an open bound
//! - `DS >= 2` averages runs of `DS` values
//! - `FLAG` `1` (or absent) selects binary chunks, anything else text

mod cache;
mod chunk;
mod codec;
mod filter;
mod ingest;
mod model;
mod parse;
mod query;
mod reduce;
mod store;

// ============ Primary Public API ============

pub use cache::CommandCache;
pub use chunk::{MAX_CHUNK_SAMPLES, WaveformChunk, split_chunks};
pub use codec::{CodecError, decode_binary_chunks, encode_binary, encode_text};
pub use filter::{
    Filter, FilterAction, FilterChain, FilterConfigError, FilterKind, FilterSpec, FilterVerdict,
    ScnlPattern,
};
pub use ingest::{ChannelBatch, IngestConfig, IngestError, IngestReport, Importer, Ingestor};
pub use model::{
    NO_LOCATION, Point, QueryKind, RequestSpan, SECONDS_PER_DAY, Sample, Scnl, TimeBound,
    TimeSpan, WaveRecord, Waveform, epoch_now,
};
pub use parse::{Command, Grammar, MAX_CODE_LEN, ParseError, opcode_of, parse};
pub use query::{
    MAX_RSAM_WINDOWS, QueryConfig, QueryEngine, QueryError, QueryRequest, RsamParams,
};
pub use reduce::{Reduction, RsamWindows, downsample_mean, rsam, window_count};
pub use store::{ChannelInfo, MemoryStore, StoreError, WaveStore};
