//! Per-connection memo of the last parsed command
//!
//! Pollers tend to resend the same line over and over, so each connection keeps
//! exactly one `(raw line, parsed command)` pair. A hit requires both the content
//! hash and the raw text to match; a hash match alone is treated as a miss.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::parse::{Command, Grammar, ParseError, parse};

struct CacheEntry {
    hash: u64,
    grammar: Grammar,
    raw: String,
    command: Arc<Command>,
}

/// Single-entry parse cache. Owned by one session, never shared.
#[derive(Default)]
pub struct CommandCache {
    entry: Option<CacheEntry>,
    hits: u64,
    misses: u64,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached command when `raw` is identical to the last line,
    /// otherwise parse it and replace the entry.
    pub fn get_or_parse(&mut self, raw: &str, grammar: Grammar) -> Result<Arc<Command>, ParseError> {
        self.lookup(content_hash(raw), raw, grammar)
    }

    fn lookup(&mut self, hash: u64, raw: &str, grammar: Grammar) -> Result<Arc<Command>, ParseError> {
        if let Some(entry) = &self.entry
            && entry.hash == hash
            && entry.grammar == grammar
            && entry.raw == raw
        {
            self.hits += 1;
            return Ok(entry.command.clone());
        }

        self.misses += 1;
        match parse(raw, grammar) {
            Ok(command) => {
                let command = Arc::new(command);
                self.entry = Some(CacheEntry {
                    hash,
                    grammar,
                    raw: raw.to_string(),
                    command: command.clone(),
                });
                Ok(command)
            }
            Err(e) => {
                self.entry = None;
                Err(e)
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

fn content_hash(raw: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}
