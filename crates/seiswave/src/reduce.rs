//! Sample reduction: mean downsampling and windowed RSAM

use crate::model::{Point, Sample, TimeSpan};

/// How a series is thinned before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    None,
    /// Mean of each run of `n` consecutive points, `n >= 2`.
    Mean(usize),
}

impl Reduction {
    /// Factors below 2 mean no reduction.
    pub fn from_factor(factor: i32) -> Self {
        match usize::try_from(factor) {
            Ok(n) if n >= 2 => Reduction::Mean(n),
            _ => Reduction::None,
        }
    }

    pub fn apply(self, points: Vec<Point>) -> Vec<Point> {
        match self {
            Reduction::None => points,
            Reduction::Mean(n) => downsample_mean(&points, n),
        }
    }
}

/// Collapse each run of `factor` points into one carrying their mean.
///
/// Output length is `ceil(len / factor)`. Each output point spans its run,
/// so the first and last time bounds of the series are preserved. NaN
/// values are skipped; a run of only NaN stays NaN.
pub fn downsample_mean(points: &[Point], factor: usize) -> Vec<Point> {
    if factor < 2 {
        return points.to_vec();
    }
    points
        .chunks(factor)
        .filter_map(|run| {
            let first = run.first()?.first;
            let last = run.last()?.last;
            Some(Point {
                first,
                last,
                value: nan_mean(run.iter().map(|p| p.value)),
            })
        })
        .collect()
}

fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

/// Number of `delta`-second windows covering `span`, at least one.
pub fn window_count(span: TimeSpan, delta: f64) -> usize {
    if delta <= 0.0 {
        return 1;
    }
    ((span.duration() / delta).ceil() as usize).max(1)
}

/// Incremental mean(|x|) over fixed windows aligned at a span start.
///
/// Windows are half-open `[start + i·delta, start + (i+1)·delta)` except the
/// last, which also takes a sample lying exactly on the span end. Samples
/// may arrive in several batches as long as no sample is added twice.
#[derive(Debug, Clone)]
pub struct RsamWindows {
    span: TimeSpan,
    delta: f64,
    sums: Vec<f64>,
    counts: Vec<u32>,
}

impl RsamWindows {
    pub fn new(span: TimeSpan, delta: f64) -> Self {
        let count = window_count(span, delta);
        Self {
            span,
            delta,
            sums: vec![0.0; count],
            counts: vec![0; count],
        }
    }

    pub fn add(&mut self, samples: &[Sample]) {
        for sample in samples {
            if let Some(index) = self.window_of(sample.time) {
                self.sums[index] += f64::from(sample.value).abs();
                self.counts[index] += 1;
            }
        }
    }

    fn window_of(&self, time: f64) -> Option<usize> {
        if !self.span.contains(time) {
            return None;
        }
        let last = self.sums.len() - 1;
        if self.delta <= 0.0 {
            return Some(last);
        }
        let index = ((time - self.span.start()) / self.delta).floor() as usize;
        Some(index.min(last))
    }

    /// One point per window, NaN where no sample landed.
    pub fn finish(self) -> Vec<Point> {
        let start = self.span.start();
        let end = self.span.end();
        let delta = self.delta.max(0.0);
        self.sums
            .iter()
            .zip(&self.counts)
            .enumerate()
            .map(|(i, (&sum, &count))| Point {
                first: start + i as f64 * delta,
                last: (start + (i + 1) as f64 * delta).min(end),
                value: if count == 0 { f64::NAN } else { sum / f64::from(count) },
            })
            .collect()
    }
}

/// RSAM of a complete sample set in one call.
pub fn rsam(samples: &[Sample], span: TimeSpan, delta: f64) -> Vec<Point> {
    let mut windows = RsamWindows::new(span, delta);
    windows.add(samples);
    windows.finish()
}
