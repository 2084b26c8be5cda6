//! The encounter log store.

use dongle_error::{DongleError, Result};
use dongle_flash::{CounterKey, CounterStore, ERASED_BYTE, FlashDevice};
use dongle_observability::{LogMetrics, LogMetricsSnapshot};
use dongle_types::{DongleTimer, EncounterRecord, LogIndex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cursor::LogCursor;
use crate::erase::{ErasePlan, plan_erase};
use crate::layout::LogLayout;

/// What an append did besides writing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Physical slot the record went to.
    pub slot: LogIndex,
    /// The ring was full and the oldest record was discarded.
    pub forced_deletion: bool,
    /// Live records dropped because a page they occupied had to be erased.
    pub erase_evictions: u32,
    pub pages_erased: u32,
}

/// Serializable view of the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CursorSnapshot {
    pub head: u32,
    pub tail: u32,
    pub count: u32,
    pub capacity: u32,
    pub total_appended: u64,
}

/// Flash-backed ring of encounter records.
///
/// Single writer. Every cursor change is persisted through the counter store
/// together with the current clock value in one atomic batch.
pub struct LogStore<F: FlashDevice, C: CounterStore> {
    flash: F,
    counters: C,
    layout: LogLayout,
    cursor: LogCursor,
    total_appended: u64,
    metrics: LogMetrics,
}

impl<F: FlashDevice, C: CounterStore> LogStore<F, C> {
    /// Open the log, restoring the persisted cursor when it is present and
    /// consistent with `layout`; otherwise the log starts empty.
    pub fn open(flash: F, counters: C, layout: LogLayout) -> Result<Self> {
        let capacity = layout.capacity();
        let persisted = (
            counters.read(CounterKey::LogHead)?,
            counters.read(CounterKey::LogTail)?,
            counters.read(CounterKey::LogLen)?,
        );
        let cursor = match persisted {
            (None, None, None) => LogCursor::new(),
            (Some(head), Some(tail), Some(len)) => LogCursor::restore(head, tail, len, capacity)
                .unwrap_or_else(|| {
                    warn!(
                        head,
                        tail,
                        len,
                        capacity = capacity.get(),
                        "persisted log cursor inconsistent with layout, starting empty"
                    );
                    LogCursor::new()
                }),
            _ => {
                warn!("persisted log cursor incomplete, starting empty");
                LogCursor::new()
            }
        };
        info!(
            base = layout.base(),
            stride = layout.stride(),
            capacity = capacity.get(),
            head = cursor.head().get(),
            tail = cursor.tail().get(),
            count = cursor.count(),
            "log store opened"
        );
        Ok(Self {
            flash,
            counters,
            layout,
            cursor,
            total_appended: 0,
            metrics: LogMetrics::new(),
        })
    }

    /// Append `record` at the head.
    ///
    /// Erases every page the slot enters first, discards the oldest record
    /// when the ring is full, and persists the new cursor with `now`.
    ///
    /// A failed erase or write is logged and counted but the cursor still
    /// advances, so record positions stay monotonic for readers. The first
    /// such failure is returned after the cursor has moved.
    pub fn append(&mut self, record: &EncounterRecord, now: DongleTimer) -> Result<AppendOutcome> {
        let capacity = self.layout.capacity();
        let slot = self.layout.slot(self.cursor.head())?;

        let forced_deletion = self.cursor.is_full(capacity) && self.cursor.pop_tail(capacity);
        if forced_deletion {
            self.metrics.record_forced_deletion();
            debug!(
                slot = slot.index.get(),
                tail = self.cursor.tail().get(),
                "log full, oldest record discarded"
            );
        }

        let mut io_error = None;
        let plan = plan_erase(&self.flash.geometry(), slot.addr, slot.stride);
        let mut erased = Vec::with_capacity(plan.pages().len());
        for &page in plan.pages() {
            match self.flash.erase_page(page) {
                Ok(()) => {
                    self.metrics.record_page_erase();
                    erased.push(page);
                }
                Err(err) => {
                    error!(addr = page, error = %err, "flash erase failed");
                    self.metrics.record_flash_error();
                    io_error.get_or_insert(err);
                }
            }
        }
        let erase_evictions = self.evict_erased(&erased)?;

        let mut bytes = self.layout.format().encode(record);
        bytes.resize(slot.stride as usize, ERASED_BYTE);
        if let Err(err) = self.flash.write(slot.addr, &bytes) {
            error!(addr = slot.addr, slot = slot.index.get(), error = %err, "flash write failed");
            self.metrics.record_flash_error();
            io_error.get_or_insert(err);
        }

        self.cursor.push_head(capacity);
        self.total_appended += 1;
        self.metrics.record_append();
        debug!(
            slot = slot.index.get(),
            addr = slot.addr,
            head = self.cursor.head().get(),
            tail = self.cursor.tail().get(),
            count = self.cursor.count(),
            "encounter appended"
        );

        let persisted = self.persist_cursor(now);
        if let Some(err) = io_error {
            return Err(err);
        }
        persisted?;
        Ok(AppendOutcome {
            slot: slot.index,
            forced_deletion,
            erase_evictions,
            pages_erased: erased.len() as u32,
        })
    }

    /// Drop tail records whose slot overlaps a freshly erased page.
    ///
    /// Erased pages start at or after the slot being written, so the records
    /// they held are always the oldest ones.
    fn evict_erased(&mut self, erased: &[u32]) -> Result<u32> {
        if erased.is_empty() {
            return Ok(0);
        }
        let capacity = self.layout.capacity();
        let mut evicted = 0;
        while !self.cursor.is_empty() {
            let tail = self.layout.slot(self.cursor.tail())?;
            if !ErasePlan::overlaps(erased, self.layout.page_size(), tail.addr, tail.stride) {
                break;
            }
            self.cursor.pop_tail(capacity);
            evicted += 1;
        }
        if evicted > 0 {
            self.metrics.record_page_erase_evictions(evicted);
            warn!(
                evicted,
                tail = self.cursor.tail().get(),
                "page erase discarded live records"
            );
        }
        Ok(evicted)
    }

    fn persist_cursor(&mut self, now: DongleTimer) -> Result<()> {
        let batch = [
            (CounterKey::LogHead, self.cursor.head().get()),
            (CounterKey::LogTail, self.cursor.tail().get()),
            (CounterKey::LogLen, self.cursor.count()),
            (CounterKey::TCur, now),
        ];
        self.counters.write_batch(&batch).inspect_err(|err| {
            error!(error = %err, "failed to persist log cursor");
            self.metrics.record_cursor_persist_error();
        })
    }

    /// Number of live records.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.cursor.count()
    }

    /// Physical slot of logical record `i` (0 = oldest).
    pub fn slot_for(&self, i: u32) -> Result<LogIndex> {
        self.cursor
            .physical(i, self.layout.capacity())
            .ok_or_else(|| {
                DongleError::out_of_range("log index", format!("{i} (count {})", self.count()))
            })
    }

    /// Read logical record `i` (0 = oldest).
    pub fn load(&self, i: u32) -> Result<EncounterRecord> {
        let index = self.slot_for(i)?;
        let slot = self.layout.slot(index)?;
        let mut buf = vec![0_u8; self.layout.format().encoded_len()];
        self.flash.read(slot.addr, &mut buf)?;
        self.layout.format().decode(&buf)
    }

    /// Visit records from logical index `start` towards the head until `f`
    /// returns `false`. Returns the number of records visited.
    pub fn iterate_from<G>(&self, start: u32, mut f: G) -> Result<u32>
    where
        G: FnMut(u32, &EncounterRecord) -> bool,
    {
        let mut visited = 0;
        for i in start..self.count() {
            let record = self.load(i)?;
            visited += 1;
            if !f(i, &record) {
                break;
            }
        }
        Ok(visited)
    }

    /// Drop records from the tail while their last observation is more than
    /// `max_age` units before `now`. Stops at the first young record.
    pub fn evict_older_than(&mut self, now: DongleTimer, max_age: u32) -> Result<u32> {
        let capacity = self.layout.capacity();
        let mut evicted = 0;
        while !self.cursor.is_empty() {
            let oldest = self.load(0)?;
            let age = u64::from(now).saturating_sub(oldest.dongle_time_end());
            if age <= u64::from(max_age) {
                break;
            }
            self.cursor.pop_tail(capacity);
            evicted += 1;
        }
        if evicted > 0 {
            self.metrics.record_age_evictions(evicted);
            info!(
                evicted,
                now,
                max_age,
                remaining = self.cursor.count(),
                "aged records evicted"
            );
            self.persist_cursor(now)?;
        }
        Ok(evicted)
    }

    #[must_use]
    pub const fn head(&self) -> LogIndex {
        self.cursor.head()
    }

    #[must_use]
    pub const fn tail(&self) -> LogIndex {
        self.cursor.tail()
    }

    #[must_use]
    pub const fn cursor(&self) -> LogCursor {
        self.cursor
    }

    #[must_use]
    pub const fn layout(&self) -> &LogLayout {
        &self.layout
    }

    /// Records appended since the store was opened.
    #[must_use]
    pub const fn total_appended(&self) -> u64 {
        self.total_appended
    }

    #[must_use]
    pub fn metrics(&self) -> LogMetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub const fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            head: self.cursor.head().get(),
            tail: self.cursor.tail().get(),
            count: self.cursor.count(),
            capacity: self.layout.capacity().get(),
            total_appended: self.total_appended,
        }
    }

    #[must_use]
    pub const fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutable access for the other tenants of the storage area.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    #[must_use]
    pub const fn counters(&self) -> &C {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut C {
        &mut self.counters
    }

    /// Release the medium and the counter store.
    pub fn into_parts(self) -> (F, C) {
        (self.flash, self.counters)
    }
}
