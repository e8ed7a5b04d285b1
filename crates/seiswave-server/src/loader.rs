//! Plain-text sample importer
//!
//! A file named `STA.CHA.NET[.LOC].txt` holds one channel. Each non-blank,
//! non-`#` line is `<epoch seconds> <count>`, in increasing time order.
//! Evenly spaced runs of samples become one waveform; a gap or a change in
//! spacing starts the next.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use seiswave::{ChannelBatch, Importer, IngestError, IngestReport, Ingestor, Scnl, Waveform};

/// Reads the two-column text format.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextImporter;

impl Importer for TextImporter {
    fn read_file(&self, path: &Path) -> Result<ChannelBatch, IngestError> {
        let code = channel_code_from_path(path)
            .ok_or_else(|| IngestError::BadCode(file_stem(path).to_string()))?;
        let text = fs::read_to_string(path).map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let waves = parse_waveforms(path, &text)?;

        let mut batch = ChannelBatch::new();
        batch.insert(code, waves);
        Ok(batch)
    }
}

fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown")
}

/// Storage code from a file name, e.g. `STA1.EHZ.NW.txt` -> `STA1$EHZ$NW$--`.
pub fn channel_code_from_path(path: &Path) -> Option<String> {
    let stem = file_stem(path);
    let parts: Vec<&str> = stem.split('.').collect();
    if parts.iter().any(|p| p.contains('$')) {
        return None;
    }
    Scnl::from_code(&parts.join("$")).map(|scnl| scnl.code())
}

/// Check if a file has a supported extension
pub fn is_supported_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("txt"))
}

/// Collect all supported files from paths (files or directories)
pub fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            if let Ok(entries) = fs::read_dir(path) {
                let mut found: Vec<PathBuf> = entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|p| p.is_file() && is_supported_file(p))
                    .collect();
                found.sort();
                files.extend(found);
            }
        } else if path.is_file() && is_supported_file(path) {
            files.push(path.clone());
        }
    }
    files
}

fn format_error(path: &Path, line: usize, message: impl Into<String>) -> IngestError {
    IngestError::Format {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

struct Run {
    start: f64,
    last: f64,
    interval: Option<f64>,
    samples: Vec<i32>,
}

impl Run {
    fn new(time: f64, value: i32) -> Self {
        Self {
            start: time,
            last: time,
            interval: None,
            samples: vec![value],
        }
    }

    /// Append if `time` continues the run's spacing.
    fn extend(&mut self, time: f64, value: i32) -> bool {
        let step = time - self.last;
        let fits = match self.interval {
            None => true,
            Some(interval) => (step - interval).abs() <= interval / 2.0,
        };
        if fits {
            self.interval.get_or_insert(step);
            self.last = time;
            self.samples.push(value);
        }
        fits
    }
}

fn parse_waveforms(path: &Path, text: &str) -> Result<Vec<Waveform>, IngestError> {
    let mut runs: Vec<(usize, Run)> = Vec::new();
    let mut previous: Option<f64> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [time, value] = fields.as_slice() else {
            return Err(format_error(path, line_no, "expected '<time> <value>'"));
        };
        let time: f64 = time
            .parse()
            .map_err(|_| format_error(path, line_no, format!("bad time '{time}'")))?;
        let value: i32 = value
            .parse()
            .map_err(|_| format_error(path, line_no, format!("bad value '{value}'")))?;
        if !time.is_finite() {
            return Err(format_error(path, line_no, "time is not finite"));
        }
        if previous.is_some_and(|p| time <= p) {
            return Err(format_error(path, line_no, "times must increase"));
        }
        previous = Some(time);

        let extended = match runs.last_mut() {
            Some((_, run)) => run.extend(time, value),
            None => false,
        };
        if !extended {
            runs.push((line_no, Run::new(time, value)));
        }
    }

    // A lone sample borrows the rate of the run before it.
    let mut waves = Vec::with_capacity(runs.len());
    let mut rate: Option<f64> = None;
    for (line_no, run) in runs {
        if let Some(interval) = run.interval {
            rate = Some(1.0 / interval);
        }
        let Some(rate) = rate else {
            return Err(format_error(
                path,
                line_no,
                "cannot infer a sample rate from a single sample",
            ));
        };
        waves.push(Waveform::new(run.start, rate, run.samples));
    }
    Ok(waves)
}

/// Import every file, logging and skipping the ones that fail (runs on the
/// blocking thread pool).
pub async fn import_files(ingestor: Arc<Ingestor>, files: Vec<PathBuf>, now: f64) -> IngestReport {
    let task = tokio::task::spawn_blocking(move || {
        let mut total = IngestReport::default();
        for path in &files {
            match ingestor.import_files(&TextImporter, std::slice::from_ref(path), now) {
                Ok(report) => total.merge(&report),
                Err(e) => log::warn!("Failed to import {}: {}", path.display(), e),
            }
        }
        total
    });
    match task.await {
        Ok(report) => report,
        Err(e) => {
            log::error!("Import task failed: {e}");
            IngestReport::default()
        }
    }
}
