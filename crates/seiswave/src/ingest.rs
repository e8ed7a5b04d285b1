//! Ingest pipeline: importer output through the filter chain into the store

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{info, log};
use serde::Deserialize;
use thiserror::Error;

use crate::chunk::MAX_CHUNK_SAMPLES;
use crate::filter::FilterChain;
use crate::model::{Scnl, WaveRecord, Waveform};
use crate::store::{StoreError, WaveStore};

/// Waveforms grouped by channel code, in import order.
pub type ChannelBatch = IndexMap<String, Vec<Waveform>>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid channel code '{0}'")]
    BadCode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Turns a file into a channel batch.
pub trait Importer {
    fn read_file(&self, path: &Path) -> Result<ChannelBatch, IngestError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Quarantine every rejected record, whatever the filter says.
    pub keep_rejects: bool,
    /// Records longer than this are split before filtering.
    pub max_record_samples: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            keep_rejects: false,
            max_record_samples: MAX_CHUNK_SAMPLES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub accepted: usize,
    /// All rejected records, quarantined or not.
    pub rejected: usize,
    pub quarantined: usize,
    pub channels_created: usize,
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.quarantined += other.quarantined;
        self.channels_created += other.channels_created;
        self.elapsed += other.elapsed;
    }
}

pub struct Ingestor {
    store: Arc<dyn WaveStore>,
    quarantine: Option<Arc<dyn WaveStore>>,
    chain: FilterChain,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(store: Arc<dyn WaveStore>, chain: FilterChain, config: IngestConfig) -> Self {
        Self {
            store,
            quarantine: None,
            chain,
            config,
        }
    }

    /// Rejected records marked keep-rejects are written here instead of dropped.
    pub fn with_quarantine(mut self, quarantine: Arc<dyn WaveStore>) -> Self {
        self.quarantine = Some(quarantine);
        self
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Import every channel of `batch`, in order.
    pub fn import_batch(&self, batch: ChannelBatch, now: f64) -> Result<IngestReport, IngestError> {
        let started = Instant::now();
        let mut report = IngestReport::default();

        for (code, waves) in batch {
            let scnl = Scnl::from_code(&code).ok_or_else(|| IngestError::BadCode(code.clone()))?;
            let channel = self.import_channel(&scnl, waves, now)?;
            info!(
                "{scnl}: {} accepted, {} rejected, {} quarantined",
                channel.accepted, channel.rejected, channel.quarantined
            );
            report.merge(&channel);
        }

        report.elapsed = started.elapsed();
        info!(
            "Import finished in {:.2?}: {} accepted, {} rejected, {} channels created",
            report.elapsed, report.accepted, report.rejected, report.channels_created
        );
        Ok(report)
    }

    fn import_channel(
        &self,
        scnl: &Scnl,
        waves: Vec<Waveform>,
        now: f64,
    ) -> Result<IngestReport, IngestError> {
        let code = scnl.code();
        let mut report = IngestReport::default();
        if !self.store.channel_exists(&code) {
            self.store.create_channel(&code)?;
            report.channels_created += 1;
        }

        for part in waves
            .iter()
            .flat_map(|wave| wave.split(self.config.max_record_samples))
        {
            let record = WaveRecord::new(scnl.clone(), part);
            let verdict = self.chain.evaluate(&record, now);
            if verdict.is_accept() {
                self.store.write_record(&record)?;
                report.accepted += 1;
                continue;
            }

            report.rejected += 1;
            let keep = verdict.keep_rejects || self.config.keep_rejects;
            match &self.quarantine {
                Some(quarantine) if keep => {
                    quarantine.create_channel(&code)?;
                    quarantine.write_record(&record)?;
                    report.quarantined += 1;
                }
                _ => log!(
                    verdict.level,
                    "Dropped {code} record at {:.3}: {}",
                    record.first_sample_time(),
                    verdict.reason.as_deref().unwrap_or("rejected")
                ),
            }
        }
        Ok(report)
    }

    /// Read each file with `importer` and import it.
    pub fn import_files(
        &self,
        importer: &dyn Importer,
        paths: &[PathBuf],
        now: f64,
    ) -> Result<IngestReport, IngestError> {
        let mut total = IngestReport::default();
        for path in paths {
            let batch = importer.read_file(path)?;
            info!("Importing {} ({} channels)", path.display(), batch.len());
            total.merge(&self.import_batch(batch, now)?);
        }
        Ok(total)
    }
}
