//! Connection registry and per-connection statistics
//!
//! The registry is shared by every session. Counters are plain atomics so
//! recording never blocks a session; the map itself is a `DashMap` keyed by
//! remote address.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Protocol most recently spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Unknown,
    Wws,
    Http,
}

impl ProtocolKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProtocolKind::Wws,
            2 => ProtocolKind::Http,
            _ => ProtocolKind::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProtocolKind::Unknown => 0,
            ProtocolKind::Wws => 1,
            ProtocolKind::Http => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProtocolKind::Unknown => "-",
            ProtocolKind::Wws => "WWS",
            ProtocolKind::Http => "HTTP",
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    address: SocketAddr,
    connected_at: Instant,
    /// Milliseconds after `connected_at`.
    last_activity: AtomicU64,
    kind: AtomicU8,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    queries: AtomicU64,
    query_micros: AtomicU64,
    query_bytes: AtomicU64,
}

impl Connection {
    fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connected_at: Instant::now(),
            last_activity: AtomicU64::new(0),
            kind: AtomicU8::new(ProtocolKind::Unknown.as_u8()),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            query_micros: AtomicU64::new(0),
            query_bytes: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn kind(&self) -> ProtocolKind {
        ProtocolKind::from_u8(self.kind.load(Ordering::Relaxed))
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let connected_for = self.connected_at.elapsed();
        let last_activity = Duration::from_millis(self.last_activity.load(Ordering::Relaxed));
        ConnectionSnapshot {
            address: self.address,
            kind: self.kind(),
            connected_for,
            idle_for: connected_for.saturating_sub(last_activity),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            query_time: Duration::from_micros(self.query_micros.load(Ordering::Relaxed)),
            query_bytes: self.query_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one connection's counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub address: SocketAddr,
    pub kind: ProtocolKind,
    pub connected_for: Duration,
    pub idle_for: Duration,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub queries: u64,
    pub query_time: Duration,
    pub query_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryTotals {
    pub total: u64,
    pub open: u64,
    pub wws: u64,
    pub http: u64,
}

// ============ Sorting ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Address,
    Connected,
    Idle,
    Read,
    Written,
}

/// Report ordering, written as one letter with an optional trailing `-`:
/// `A`ddress, `C`onnect duration, `I`dle time, bytes `R`ead, bytes
/// `T`ransmitted. `-` sorts descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: SortKey::Written,
            descending: false,
        }
    }
}

impl SortSpec {
    /// Unknown letters fall back to the default key.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let descending = spec.ends_with('-');
        let key = match spec.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('A') => SortKey::Address,
            Some('C') => SortKey::Connected,
            Some('I') => SortKey::Idle,
            Some('R') => SortKey::Read,
            _ => SortKey::Written,
        };
        Self { key, descending }
    }

    fn sort(&self, rows: &mut [ConnectionSnapshot]) {
        match self.key {
            SortKey::Address => rows.sort_by_key(|r| r.address),
            SortKey::Connected => rows.sort_by_key(|r| r.connected_for),
            SortKey::Idle => rows.sort_by_key(|r| r.idle_for),
            SortKey::Read => rows.sort_by_key(|r| r.bytes_read),
            SortKey::Written => rows.sort_by_key(|r| r.bytes_written),
        }
        if self.descending {
            rows.reverse();
        }
    }
}

// ============ Registry ============

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<SocketAddr, Arc<Connection>>,
    total: AtomicU64,
    open: AtomicU64,
    wws_count: AtomicU64,
    http_count: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, address: SocketAddr) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(address));
        if self
            .connections
            .insert(address, connection.clone())
            .is_none()
        {
            self.open.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        connection
    }

    /// Closing an address twice is harmless.
    pub fn close(&self, address: SocketAddr) {
        if self.connections.remove(&address).is_some() {
            self.open.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, address: SocketAddr) -> Option<Arc<Connection>> {
        self.connections.get(&address).map(|entry| entry.value().clone())
    }

    fn with(&self, address: SocketAddr, f: impl FnOnce(&Connection)) {
        if let Some(entry) = self.connections.get(&address) {
            f(entry.value());
        }
    }

    pub fn record_command(&self, address: SocketAddr, kind: ProtocolKind) {
        match kind {
            ProtocolKind::Wws => self.wws_count.fetch_add(1, Ordering::Relaxed),
            ProtocolKind::Http => self.http_count.fetch_add(1, Ordering::Relaxed),
            ProtocolKind::Unknown => 0,
        };
        self.with(address, |c| {
            c.kind.store(kind.as_u8(), Ordering::Relaxed);
            c.touch();
        });
    }

    pub fn record_read(&self, address: SocketAddr, bytes: usize) {
        self.with(address, |c| {
            c.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
            c.touch();
        });
    }

    pub fn record_written(&self, address: SocketAddr, bytes: usize) {
        self.with(address, |c| {
            c.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
            c.touch();
        });
    }

    pub fn record_query(&self, address: SocketAddr, elapsed: Duration, bytes: usize) {
        self.with(address, |c| {
            c.queries.fetch_add(1, Ordering::Relaxed);
            let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
            c.query_micros.fetch_add(micros, Ordering::Relaxed);
            c.query_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        });
    }

    pub fn totals(&self) -> RegistryTotals {
        RegistryTotals {
            total: self.total.load(Ordering::Relaxed),
            open: self.open.load(Ordering::Relaxed),
            wws: self.wws_count.load(Ordering::Relaxed),
            http: self.http_count.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.connections
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    /// Fixed-width table of open connections followed by totals.
    pub fn report(&self, sort: SortSpec) -> String {
        let mut rows = self.snapshot();
        sort.sort(&mut rows);

        let mut out = String::new();
        let rule = "-".repeat(REPORT_WIDTH);
        let _ = writeln!(
            out,
            "{:<25} {:<5} {:>12} {:>12} {:>10} {:>10} {:>8} {:>10}",
            "Address", "Type", "Connected", "Idle", "Read", "Written", "Queries", "Query ms"
        );
        let _ = writeln!(out, "{rule}");
        for row in &rows {
            let _ = writeln!(
                out,
                "{:<25} {:<5} {:>12} {:>12} {:>10} {:>10} {:>8} {:>10}",
                row.address.to_string(),
                row.kind.label(),
                format_span(row.connected_for),
                format_span(row.idle_for),
                format_bytes(row.bytes_read),
                format_bytes(row.bytes_written),
                row.queries,
                row.query_time.as_millis(),
            );
        }
        let _ = writeln!(out, "{rule}");

        let totals = self.totals();
        let _ = writeln!(out, "Total Connections: {}", totals.total);
        let _ = writeln!(out, "Open Connections: {}", totals.open);
        let _ = writeln!(out, "WWS Commands: {}", totals.wws);
        let _ = writeln!(out, "HTTP Commands: {}", totals.http);
        out
    }
}

const REPORT_WIDTH: usize = 99;

/// `1.5K`, `12.0M`, or plain bytes below 1 KiB.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if bytes < 1024 {
        return bytes.to_string();
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1}{}", UNITS[unit])
}

/// `HH:MM:SS`, with a day prefix past 24 hours.
pub fn format_span(span: Duration) -> String {
    let secs = span.as_secs();
    let (days, rest) = (secs / 86_400, secs % 86_400);
    let clock = format!("{:02}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);
    if days > 0 {
        format!("{days}d {clock}")
    } else {
        clock
    }
}
