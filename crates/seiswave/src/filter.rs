//! Ordered accept/reject filters applied to incoming records
//!
//! Filters are sorted once, by `(order, registration index)`, when the chain
//! is built. Evaluation walks them in that order and stops at the first
//! terminal verdict; a record no terminal filter claims is accepted.

use std::collections::BTreeMap;

use log::{Level, log};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{SECONDS_PER_DAY, Scnl, WaveRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterConfigError {
    #[error("invalid SCNL pattern '{0}'")]
    BadPattern(String),
    #[error("invalid log level {0}, expected 0, 1 or 2")]
    BadLogLevel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    #[default]
    Accept,
    Reject,
}

/// What a filter tests. Deserialized from the `kind` key of a filter table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// Record starts more than `max_days` days before now. `<= 0` disables.
    MaxDays { max_days: f64 },
    /// Record starts more than `max_seconds` after now. `<= 0` disables.
    FutureTime { max_seconds: f64 },
    /// `STA$CHA$NET[$LOC]`, `*` matching any code.
    Scnl { pattern: String },
    /// Matches every record.
    Default,
}

impl FilterKind {
    fn default_action(&self) -> FilterAction {
        match self {
            FilterKind::MaxDays { .. } | FilterKind::FutureTime { .. } => FilterAction::Reject,
            FilterKind::Scnl { .. } | FilterKind::Default => FilterAction::Accept,
        }
    }
}

/// Configuration for one filter, as it appears in a `[[filter]]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterSpec {
    #[serde(flatten)]
    pub kind: FilterKind,
    #[serde(default = "default_order")]
    pub order: i32,
    /// Defaults to reject for time filters, accept otherwise.
    #[serde(default)]
    pub action: Option<FilterAction>,
    #[serde(default = "default_terminal")]
    pub terminal: bool,
    #[serde(default)]
    pub keep_rejects: bool,
    /// 0 = trace, 1 = debug, 2 = warn
    #[serde(default)]
    pub log: u8,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_order() -> i32 {
    1
}

fn default_terminal() -> bool {
    true
}

/// Outcome of a filter (or of a whole chain) for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterVerdict {
    pub action: FilterAction,
    pub terminal: bool,
    pub reason: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Rejected records should be archived rather than dropped.
    pub keep_rejects: bool,
    /// Level at which the ingest path logs this verdict.
    pub level: Level,
}

impl FilterVerdict {
    /// The verdict of a chain in which no terminal filter matched.
    pub fn accept() -> Self {
        Self {
            action: FilterAction::Accept,
            terminal: false,
            reason: None,
            metadata: BTreeMap::new(),
            keep_rejects: false,
            level: Level::Trace,
        }
    }

    pub fn is_accept(&self) -> bool {
        self.action == FilterAction::Accept
    }

    pub fn is_reject(&self) -> bool {
        self.action == FilterAction::Reject
    }
}

// ============ Patterns ============

/// Locator pattern; `None` fields are wildcards.
#[derive(Debug, Clone, PartialEq)]
pub struct ScnlPattern {
    fields: [Option<String>; 4],
}

impl ScnlPattern {
    pub fn parse(pattern: &str) -> Result<Self, FilterConfigError> {
        let parts: Vec<&str> = pattern.split('$').collect();
        if !(3..=4).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(FilterConfigError::BadPattern(pattern.to_string()));
        }
        let field = |i: usize| {
            parts
                .get(i)
                .filter(|p| **p != "*")
                .map(|p| p.to_string())
        };
        Ok(Self {
            fields: [field(0), field(1), field(2), field(3)],
        })
    }

    pub fn matches(&self, scnl: &Scnl) -> bool {
        let codes = [&scnl.station, &scnl.channel, &scnl.network, &scnl.location];
        self.fields
            .iter()
            .zip(codes)
            .all(|(want, got)| want.as_ref().is_none_or(|w| w == got))
    }
}

// ============ Filters ============

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    MaxDays(f64),
    FutureTime(f64),
    Scnl(ScnlPattern),
    Any,
}

#[derive(Debug, Clone)]
pub struct Filter {
    name: String,
    matcher: Matcher,
    order: i32,
    action: FilterAction,
    terminal: bool,
    keep_rejects: bool,
    level: Level,
    metadata: BTreeMap<String, String>,
}

impl Filter {
    fn with_matcher(name: String, matcher: Matcher, action: FilterAction) -> Self {
        Self {
            name,
            matcher,
            order: default_order(),
            action,
            terminal: true,
            keep_rejects: false,
            level: Level::Trace,
            metadata: BTreeMap::new(),
        }
    }

    /// Age filter: terminally rejects records older than `max_days` days.
    pub fn max_days(max_days: f64) -> Self {
        Self::with_matcher(
            format!("MaxDaysFilter({max_days})"),
            Matcher::MaxDays(max_days),
            FilterAction::Reject,
        )
    }

    /// Terminally rejects records starting more than `max_seconds` in the future.
    pub fn future_time(max_seconds: f64) -> Self {
        Self::with_matcher(
            format!("FutureTimeFilter({max_seconds})"),
            Matcher::FutureTime(max_seconds),
            FilterAction::Reject,
        )
    }

    pub fn scnl(pattern: &str, action: FilterAction) -> Result<Self, FilterConfigError> {
        Ok(Self::with_matcher(
            format!("ScnlFilter({pattern})"),
            Matcher::Scnl(ScnlPattern::parse(pattern)?),
            action,
        ))
    }

    /// Matches everything; useful as a low-priority catch-all.
    pub fn catch_all(action: FilterAction) -> Self {
        Self::with_matcher("DefaultFilter".to_string(), Matcher::Any, action)
    }

    pub fn from_spec(spec: FilterSpec) -> Result<Self, FilterConfigError> {
        let action = spec.action.unwrap_or_else(|| spec.kind.default_action());
        let filter = match &spec.kind {
            FilterKind::MaxDays { max_days } => Self::max_days(*max_days),
            FilterKind::FutureTime { max_seconds } => Self::future_time(*max_seconds),
            FilterKind::Scnl { pattern } => Self::scnl(pattern, action)?,
            FilterKind::Default => Self::catch_all(action),
        };
        Ok(Filter {
            order: spec.order,
            action,
            terminal: spec.terminal,
            keep_rejects: spec.keep_rejects,
            level: level_from_config(spec.log)?,
            metadata: spec.metadata,
            ..filter
        })
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_action(mut self, action: FilterAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_keep_rejects(mut self, keep: bool) -> Self {
        self.keep_rejects = keep;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn matches(&self, record: &WaveRecord, now: f64) -> bool {
        match &self.matcher {
            Matcher::MaxDays(max_days) => {
                *max_days > 0.0 && now - record.first_sample_time() > max_days * SECONDS_PER_DAY
            }
            Matcher::FutureTime(max_seconds) => {
                *max_seconds > 0.0 && record.first_sample_time() - now > *max_seconds
            }
            Matcher::Scnl(pattern) => pattern.matches(&record.scnl),
            Matcher::Any => true,
        }
    }

    /// `None` when the filter does not apply to `record`.
    pub fn evaluate(&self, record: &WaveRecord, now: f64) -> Option<FilterVerdict> {
        if !self.matches(record, now) {
            return None;
        }
        Some(FilterVerdict {
            action: self.action,
            terminal: self.terminal,
            reason: Some(format!(
                "{} matched {} at {:.3}",
                self.name,
                record.scnl,
                record.first_sample_time()
            )),
            metadata: self.metadata.clone(),
            keep_rejects: self.keep_rejects,
            level: self.level,
        })
    }
}

fn level_from_config(log: u8) -> Result<Level, FilterConfigError> {
    match log {
        0 => Ok(Level::Trace),
        1 => Ok(Level::Debug),
        2 => Ok(Level::Warn),
        other => Err(FilterConfigError::BadLogLevel(other)),
    }
}

// ============ Chain ============

#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut keyed: Vec<((i32, usize), Filter)> = filters
            .into_iter()
            .enumerate()
            .map(|(index, filter)| ((filter.order, index), filter))
            .collect();
        keyed.sort_by_key(|(key, _)| *key);
        Self {
            filters: keyed.into_iter().map(|(_, filter)| filter).collect(),
        }
    }

    pub fn from_specs(specs: impl IntoIterator<Item = FilterSpec>) -> Result<Self, FilterConfigError> {
        let filters = specs
            .into_iter()
            .map(Filter::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(filters))
    }

    /// Filters in evaluation order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The first terminal verdict, unchanged, or accept. Non-terminal
    /// matches are logged at their own level and never alter the result.
    pub fn evaluate(&self, record: &WaveRecord, now: f64) -> FilterVerdict {
        for filter in &self.filters {
            let Some(verdict) = filter.evaluate(record, now) else {
                continue;
            };
            if verdict.terminal {
                return verdict;
            }
            if let Some(reason) = &verdict.reason {
                log!(verdict.level, "{reason} (non-terminal, {:?})", verdict.action);
            }
        }
        FilterVerdict::accept()
    }
}
