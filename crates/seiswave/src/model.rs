//! Core data types shared by the parser, query engine and ingest path

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Location code used when a request or record carries none.
pub const NO_LOCATION: &str = "--";

/// Current wall-clock time as epoch seconds.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ============ Channel locator ============

/// Station/Channel/Network/Location, identifying one waveform channel.
///
/// Equality is exact and case-sensitive on all four codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scnl {
    pub station: String,
    pub channel: String,
    pub network: String,
    pub location: String,
}

impl Scnl {
    pub fn new(
        station: impl Into<String>,
        channel: impl Into<String>,
        network: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            station: station.into(),
            channel: channel.into(),
            network: network.into(),
            location: location.into(),
        }
    }

    /// Build a locator without a location code (SCN form).
    pub fn scn(
        station: impl Into<String>,
        channel: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self::new(station, channel, network, NO_LOCATION)
    }

    /// Storage code: `STA$CHA$NET$LOC`
    pub fn code(&self) -> String {
        format!(
            "{}${}${}${}",
            self.station, self.channel, self.network, self.location
        )
    }

    /// Parse a storage code. Three-part codes get the empty location `--`.
    pub fn from_code(code: &str) -> Option<Self> {
        let parts: Vec<&str> = code.split('$').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [s, c, n] => Some(Self::scn(*s, *c, *n)),
            [s, c, n, l] => Some(Self::new(*s, *c, *n, *l)),
            _ => None,
        }
    }
}

impl fmt::Display for Scnl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

// ============ Time ============

/// A resolved `[start, end]` range in epoch seconds, always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    start: f64,
    end: f64,
}

impl TimeSpan {
    /// Reversed bounds are swapped.
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Inclusive at both ends.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// One side of a requested time range, before it is resolved against "now".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeBound {
    At(f64),
    Now,
    /// Omitted or zero: open start, or an end that runs up to now.
    Open,
}

/// Time range as written by the client. Resolution happens per execution so
/// that a cached command never freezes "now".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestSpan {
    pub start: TimeBound,
    pub end: TimeBound,
}

impl RequestSpan {
    pub fn new(start: TimeBound, end: TimeBound) -> Self {
        Self { start, end }
    }

    pub fn between(start: f64, end: f64) -> Self {
        Self::new(TimeBound::At(start), TimeBound::At(end))
    }

    /// Resolve against `now`, bounded by a `max_days` lookback (0 = unlimited).
    ///
    /// Returns `None` when the whole request is older than the lookback or
    /// lies entirely after `now`.
    pub fn resolve(&self, now: f64, max_days: f64) -> Option<TimeSpan> {
        let floor = (max_days > 0.0).then(|| now - max_days * SECONDS_PER_DAY);

        let start = match self.start {
            TimeBound::At(t) => t,
            TimeBound::Now => now,
            TimeBound::Open => floor.unwrap_or(0.0),
        };
        let end = match self.end {
            TimeBound::At(t) => t,
            TimeBound::Now | TimeBound::Open => now,
        };

        // Nothing is stored ahead of now; a future end stops at now.
        let span = TimeSpan::new(start, end);
        if span.start() > now {
            return None;
        }
        let span = TimeSpan::new(span.start(), span.end().min(now));
        match floor {
            Some(floor) if span.end() < floor => None,
            Some(floor) => Some(TimeSpan::new(span.start().max(floor), span.end())),
            None => Some(span),
        }
    }
}

// ============ Samples ============

/// A stored sample: integer counts at an epoch time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub value: i32,
}

/// An encodable value covering the input samples between `first` and `last`.
///
/// Raw samples have `first == last`; reduced values span their window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub first: f64,
    pub last: f64,
    pub value: f64,
}

impl From<Sample> for Point {
    fn from(sample: Sample) -> Self {
        Self {
            first: sample.time,
            last: sample.time,
            value: f64::from(sample.value),
        }
    }
}

/// What a query returns: raw counts or the derived amplitude series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Raw,
    Rsam,
}

impl QueryKind {
    pub fn code(self) -> u8 {
        match self {
            QueryKind::Raw => 0,
            QueryKind::Rsam => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(QueryKind::Raw),
            1 => Some(QueryKind::Rsam),
            _ => None,
        }
    }
}

// ============ Ingest records ============

/// An evenly sampled run of counts, as produced by importers.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub start: f64,
    pub sample_rate: f64,
    pub samples: Vec<i32>,
}

impl Waveform {
    pub fn new(start: f64, sample_rate: f64, samples: Vec<i32>) -> Self {
        Self {
            start,
            sample_rate,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_time(&self, index: usize) -> f64 {
        if self.sample_rate > 0.0 {
            self.start + index as f64 / self.sample_rate
        } else {
            self.start
        }
    }

    pub fn first_sample_time(&self) -> f64 {
        self.start
    }

    pub fn last_sample_time(&self) -> f64 {
        self.sample_time(self.samples.len().saturating_sub(1))
    }

    /// Split into consecutive waveforms of at most `max` samples.
    pub fn split(&self, max: usize) -> Vec<Waveform> {
        let max = max.max(1);
        self.samples
            .chunks(max)
            .enumerate()
            .map(|(i, part)| Waveform::new(self.sample_time(i * max), self.sample_rate, part.to_vec()))
            .collect()
    }
}

/// A waveform bound to its channel: the unit of ingest and storage.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveRecord {
    pub scnl: Scnl,
    pub wave: Waveform,
}

impl WaveRecord {
    pub fn new(scnl: Scnl, wave: Waveform) -> Self {
        Self { scnl, wave }
    }

    pub fn first_sample_time(&self) -> f64 {
        self.wave.first_sample_time()
    }

    pub fn last_sample_time(&self) -> f64 {
        self.wave.last_sample_time()
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan::new(self.first_sample_time(), self.last_sample_time())
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.wave
            .samples
            .iter()
            .enumerate()
            .map(|(i, &value)| Sample {
                time: self.wave.sample_time(i),
                value,
            })
    }
}
