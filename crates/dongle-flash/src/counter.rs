//! Persistent device counters.

use std::collections::BTreeMap;

use dongle_error::{DongleError, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Keys of the persisted device counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CounterKey {
    DongleId,
    TInit,
    TCur,
    BackendPkSize,
    DongleSkSize,
    LogHead,
    LogTail,
    LogLen,
    /// One 32-bit word of the encounter match bitmap.
    MatchWord(u16),
}

/// Object key of match-bitmap word 0; later words follow.
const MATCH_WORD_BASE: u32 = 0x100;

impl CounterKey {
    /// Every fixed key; [`CounterKey::MatchWord`] keys are addressed by index.
    pub const ALL: [Self; 8] = [
        Self::DongleId,
        Self::TInit,
        Self::TCur,
        Self::BackendPkSize,
        Self::DongleSkSize,
        Self::LogHead,
        Self::LogTail,
        Self::LogLen,
    ];

    /// Object key in the vendor store.
    #[must_use]
    pub const fn object_key(self) -> u32 {
        match self {
            Self::DongleId => 0,
            Self::TInit => 1,
            Self::TCur => 2,
            Self::BackendPkSize => 3,
            Self::DongleSkSize => 4,
            Self::LogHead => 5,
            Self::LogTail => 6,
            Self::LogLen => 7,
            Self::MatchWord(word) => MATCH_WORD_BASE + word as u32,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DongleId => "dongle_id",
            Self::TInit => "t_init",
            Self::TCur => "t_cur",
            Self::BackendPkSize => "backend_pk_size",
            Self::DongleSkSize => "dongle_sk_size",
            Self::LogHead => "log_head",
            Self::LogTail => "log_tail",
            Self::LogLen => "log_len",
            Self::MatchWord(_) => "match_word",
        }
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MatchWord(word) => write!(f, "match_word[{word}]"),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Key/value counter store whose batch writes are atomic.
pub trait CounterStore {
    /// Current value, or `None` if the key was never written.
    fn read(&self, key: CounterKey) -> Result<Option<u32>>;

    /// Commit every entry or none of them.
    fn write_batch(&mut self, entries: &[(CounterKey, u32)]) -> Result<()>;
}

impl<T: CounterStore + ?Sized> CounterStore for &mut T {
    fn read(&self, key: CounterKey) -> Result<Option<u32>> {
        (**self).read(key)
    }

    fn write_batch(&mut self, entries: &[(CounterKey, u32)]) -> Result<()> {
        (**self).write_batch(entries)
    }
}

/// In-memory counter store.
#[derive(Debug, Clone, Default)]
pub struct MemCounterStore {
    values: BTreeMap<CounterKey, u32>,
    fail_next_write: bool,
    batches: u64,
}

impl MemCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next batch fail without applying any entry.
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Committed batches so far.
    #[must_use]
    pub const fn batch_count(&self) -> u64 {
        self.batches
    }

    /// Snapshot of every stored counter.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<CounterKey, u32> {
        &self.values
    }
}

impl CounterStore for MemCounterStore {
    fn read(&self, key: CounterKey) -> Result<Option<u32>> {
        Ok(self.values.get(&key).copied())
    }

    fn write_batch(&mut self, entries: &[(CounterKey, u32)]) -> Result<()> {
        if std::mem::take(&mut self.fail_next_write) {
            let key = entries
                .first()
                .map_or_else(|| "<empty batch>".to_owned(), |(key, _)| key.to_string());
            return Err(DongleError::Counter {
                key,
                detail: "injected write fault".to_owned(),
            });
        }
        for &(key, value) in entries {
            self.values.insert(key, value);
        }
        self.batches += 1;
        trace!(entries = entries.len(), "counter batch committed");
        Ok(())
    }
}
