//! Query execution: resolve, fetch, reduce, chunk

use log::{debug, trace};
use serde::Deserialize;
use thiserror::Error;

use crate::chunk::{MAX_CHUNK_SAMPLES, WaveformChunk, split_chunks};
use crate::model::{Point, QueryKind, RequestSpan, Scnl, TimeSpan};
use crate::parse::Command;
use crate::reduce::{Reduction, RsamWindows, window_count};
use crate::store::{StoreError, WaveStore};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("query task did not complete: {0}")]
    Cancelled(String),
}

/// RSAM computation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RsamParams {
    /// Window width in seconds; one output value per window.
    pub delta: f64,
    /// Length in seconds of each raw fetch while computing the series.
    pub duration: f64,
}

impl Default for RsamParams {
    fn default() -> Self {
        Self {
            delta: 10.0,
            duration: 60.0,
        }
    }
}

impl RsamParams {
    /// Fetch block length: `duration` rounded up to a whole number of windows,
    /// so blocks never split a window. Without windows the span is one block.
    pub fn block_len(&self) -> f64 {
        if self.delta <= 0.0 {
            return f64::INFINITY;
        }
        (self.duration / self.delta).ceil().max(1.0) * self.delta
    }
}

/// Default bound on the RSAM windows one request may produce.
pub const MAX_RSAM_WINDOWS: usize = MAX_CHUNK_SAMPLES * 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryConfig {
    /// Lookback limit in days; 0 is unlimited.
    pub max_days: f64,
    pub rsam: RsamParams,
    /// A longer RSAM request keeps only its most recent windows.
    pub max_rsam_windows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_days: 0.0,
            rsam: RsamParams::default(),
            max_rsam_windows: MAX_RSAM_WINDOWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub scnl: Scnl,
    pub span: RequestSpan,
    pub kind: QueryKind,
    pub reduction: Reduction,
}

impl QueryRequest {
    pub fn new(scnl: Scnl, span: RequestSpan, kind: QueryKind) -> Self {
        Self {
            scnl,
            span,
            kind,
            reduction: Reduction::None,
        }
    }

    pub fn with_downsample(mut self, factor: i32) -> Self {
        self.reduction = Reduction::from_factor(factor);
        self
    }

    /// `None` for commands that carry no locator or time range.
    pub fn from_command(command: &Command) -> Option<Self> {
        let request = Self::new(command.scnl.clone()?, command.span?, command.kind);
        Some(request.with_downsample(command.downsample_factor()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// The concrete range a request covers at `now`, if any.
    pub fn resolve(&self, request: &QueryRequest, now: f64) -> Option<TimeSpan> {
        request.span.resolve(now, self.config.max_days)
    }

    /// Result series before chunking.
    pub fn points(
        &self,
        store: &dyn WaveStore,
        request: &QueryRequest,
        now: f64,
    ) -> Result<Vec<Point>, QueryError> {
        let Some(span) = self.resolve(request, now) else {
            trace!("{}: request older than lookback", request.scnl);
            return Ok(Vec::new());
        };

        let points = match request.kind {
            QueryKind::Raw => store
                .fetch_samples(&request.scnl, span)?
                .into_iter()
                .map(Point::from)
                .collect(),
            QueryKind::Rsam => self.rsam_points(store, &request.scnl, span)?,
        };
        Ok(request.reduction.apply(points))
    }

    fn rsam_points(
        &self,
        store: &dyn WaveStore,
        scnl: &Scnl,
        span: TimeSpan,
    ) -> Result<Vec<Point>, QueryError> {
        let params = self.config.rsam;
        let span = self.cap_windows(span);
        let block = params.block_len();
        let mut windows = RsamWindows::new(span, params.delta);

        let mut block_start = span.start();
        loop {
            let block_end = (block_start + block).min(span.end());
            let samples = store.fetch_samples(scnl, TimeSpan::new(block_start, block_end))?;
            trace!(
                "{scnl}: rsam block {block_start:.3} - {block_end:.3}, {} samples",
                samples.len()
            );
            if block_end >= span.end() {
                windows.add(&samples);
                break;
            }
            // The block end is the next block's start; count it there.
            let interior: Vec<_> = samples.into_iter().filter(|s| s.time < block_end).collect();
            windows.add(&interior);
            block_start = block_end;
        }
        Ok(windows.finish())
    }

    /// Drop the oldest windows of a span wider than `max_rsam_windows`.
    fn cap_windows(&self, span: TimeSpan) -> TimeSpan {
        let delta = self.config.rsam.delta;
        let max = self.config.max_rsam_windows.max(1);
        if window_count(span, delta) <= max {
            return span;
        }
        let start = span.end() - max as f64 * delta;
        debug!(
            "rsam span {:.3} - {:.3} exceeds {max} windows, starting at {start:.3}",
            span.start(),
            span.end()
        );
        TimeSpan::new(start, span.end())
    }

    /// Run a request and split the result into wire chunks.
    pub fn query(
        &self,
        store: &dyn WaveStore,
        request: &QueryRequest,
        now: f64,
    ) -> Result<Vec<WaveformChunk>, QueryError> {
        let points = self.points(store, request, now)?;
        Ok(split_chunks(&request.scnl, request.kind, &points))
    }
}
