//! Splitting result series into wire-sized chunks

use crate::model::{Point, QueryKind, Scnl};

/// Most values a single chunk may carry (2^16 bytes of 4-byte values).
pub const MAX_CHUNK_SAMPLES: usize = 16384;

/// A run of consecutive result values for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformChunk {
    pub scnl: Scnl,
    pub kind: QueryKind,
    /// Time of the first value.
    pub first: f64,
    /// Time of the last value.
    pub last: f64,
    pub values: Vec<f64>,
}

impl WaveformChunk {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Partition `points` in time order into chunks of at most
/// [`MAX_CHUNK_SAMPLES`] values. No point is dropped, repeated or moved.
pub fn split_chunks(scnl: &Scnl, kind: QueryKind, points: &[Point]) -> Vec<WaveformChunk> {
    points
        .chunks(MAX_CHUNK_SAMPLES)
        .filter_map(|part| {
            let first = part.first()?.first;
            let last = part.last()?.last;
            Some(WaveformChunk {
                scnl: scnl.clone(),
                kind,
                first,
                last,
                values: part.iter().map(|p| p.value).collect(),
            })
        })
        .collect()
}
