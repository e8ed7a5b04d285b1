//! Backend storage interface and the in-memory implementation

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::model::{Sample, Scnl, TimeSpan, WaveRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("invalid channel code '{0}'")]
    BadCode(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A channel known to the store, with the time range it holds data for.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub scnl: Scnl,
    pub span: Option<TimeSpan>,
}

/// Time-series storage keyed by channel code (`STA$CHA$NET$LOC`).
///
/// Implementations are blocking; the server calls them from
/// `spawn_blocking` through a bounded handle pool.
pub trait WaveStore: Send + Sync {
    /// Samples of `scnl` whose time falls inside `span`, in time order.
    /// An unknown channel yields no samples.
    fn fetch_samples(&self, scnl: &Scnl, span: TimeSpan) -> Result<Vec<Sample>, StoreError>;

    fn channel_exists(&self, code: &str) -> bool;

    /// Creating an existing channel is a no-op.
    fn create_channel(&self, code: &str) -> Result<(), StoreError>;

    /// Fails with [`StoreError::UnknownChannel`] unless the channel was created.
    fn write_record(&self, record: &WaveRecord) -> Result<(), StoreError>;

    fn channels(&self) -> Vec<ChannelInfo>;
}

#[derive(Debug)]
struct ChannelData {
    scnl: Scnl,
    /// Sorted by first sample time.
    records: Vec<WaveRecord>,
}

impl ChannelData {
    fn span(&self) -> Option<TimeSpan> {
        let first = self.records.first()?.first_sample_time();
        let last = self
            .records
            .iter()
            .map(WaveRecord::last_sample_time)
            .fold(f64::NEG_INFINITY, f64::max);
        Some(TimeSpan::new(first, last))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: RwLock<BTreeMap<String, ChannelData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record's channel if needed and write the record.
    pub fn insert(&self, record: WaveRecord) -> Result<(), StoreError> {
        self.create_channel(&record.scnl.code())?;
        self.write_record(&record)
    }

    pub fn sample_count(&self, code: &str) -> usize {
        self.read()
            .map(|channels| {
                channels
                    .get(code)
                    .map(|data| data.records.iter().map(|r| r.wave.len()).sum())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    pub fn record_count(&self, code: &str) -> usize {
        self.read()
            .map(|channels| channels.get(code).map(|data| data.records.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, ChannelData>>, StoreError> {
        self.channels.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, ChannelData>>, StoreError> {
        self.channels.write().map_err(|_| StoreError::Poisoned)
    }
}

impl WaveStore for MemoryStore {
    fn fetch_samples(&self, scnl: &Scnl, span: TimeSpan) -> Result<Vec<Sample>, StoreError> {
        let channels = self.read()?;
        let Some(data) = channels.get(&scnl.code()) else {
            return Ok(Vec::new());
        };

        let mut samples: Vec<Sample> = data
            .records
            .iter()
            .take_while(|record| record.first_sample_time() <= span.end())
            .filter(|record| record.span().overlaps(&span))
            .flat_map(|record| record.samples())
            .filter(|sample| span.contains(sample.time))
            .collect();
        samples.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(samples)
    }

    fn channel_exists(&self, code: &str) -> bool {
        self.read()
            .map(|channels| channels.contains_key(code))
            .unwrap_or(false)
    }

    fn create_channel(&self, code: &str) -> Result<(), StoreError> {
        let scnl = Scnl::from_code(code).ok_or_else(|| StoreError::BadCode(code.to_string()))?;
        self.write()?
            .entry(scnl.code())
            .or_insert_with(|| ChannelData {
                scnl,
                records: Vec::new(),
            });
        Ok(())
    }

    fn write_record(&self, record: &WaveRecord) -> Result<(), StoreError> {
        let code = record.scnl.code();
        let mut channels = self.write()?;
        let data = channels
            .get_mut(&code)
            .ok_or(StoreError::UnknownChannel(code))?;
        let at = data
            .records
            .partition_point(|r| r.first_sample_time() <= record.first_sample_time());
        data.records.insert(at, record.clone());
        Ok(())
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        let Ok(channels) = self.read() else {
            return Vec::new();
        };
        channels
            .values()
            .map(|data| ChannelInfo {
                scnl: data.scnl.clone(),
                span: data.span(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Waveform;

    fn scnl() -> Scnl {
        Scnl::new("STA1", "EHZ", "NW", "--")
    }

    #[test]
    fn write_requires_channel() {
        let store = MemoryStore::new();
        let record = WaveRecord::new(scnl(), Waveform::new(0.0, 1.0, vec![1]));
        assert!(matches!(
            store.write_record(&record),
            Err(StoreError::UnknownChannel(code)) if code == "STA1$EHZ$NW$--"
        ));

        store.create_channel("STA1$EHZ$NW$--").unwrap();
        store.create_channel("STA1$EHZ$NW$--").unwrap();
        store.write_record(&record).unwrap();
        assert_eq!(store.record_count("STA1$EHZ$NW$--"), 1);
    }

    #[test]
    fn bad_code_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(store.create_channel("STA1"), Err(StoreError::BadCode(_))));
    }

    #[test]
    fn fetch_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store
            .insert(WaveRecord::new(scnl(), Waveform::new(10.0, 1.0, vec![10, 11, 12])))
            .unwrap();
        store
            .insert(WaveRecord::new(scnl(), Waveform::new(0.0, 1.0, vec![0, 1, 2, 3])))
            .unwrap();

        let samples = store.fetch_samples(&scnl(), TimeSpan::new(2.0, 11.0)).unwrap();
        let values: Vec<i32> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2, 3, 10, 11]);

        let unknown = Scnl::scn("X", "Y", "Z");
        assert!(store.fetch_samples(&unknown, TimeSpan::new(0.0, 100.0)).unwrap().is_empty());
    }

    #[test]
    fn channels_report_spans() {
        let store = MemoryStore::new();
        store.create_channel("A$B$C").unwrap();
        store
            .insert(WaveRecord::new(scnl(), Waveform::new(5.0, 2.0, vec![0; 5])))
            .unwrap();

        let channels = store.channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].scnl, Scnl::scn("A", "B", "C"));
        assert_eq!(channels[0].span, None);
        assert_eq!(channels[1].span, Some(TimeSpan::new(5.0, 7.0)));
    }
}
