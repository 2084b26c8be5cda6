//! Mutex-guarded handle for hosts that deliver events on several threads.

use std::sync::Arc;

use dongle_error::Result;
use dongle_flash::{CounterStore, FlashDevice};
use dongle_tracker::ObservationOutcome;
use dongle_types::DongleTimer;
use parking_lot::Mutex;

use crate::dongle::Dongle;
use crate::report::{DongleReport, DownloadNotice, TickReport};

/// Cloneable handle to one [`Dongle`]. Every operation holds the lock for
/// its whole duration, so scan, download and timer events never interleave.
pub struct SharedDongle<F: FlashDevice, C: CounterStore> {
    inner: Arc<Mutex<Dongle<F, C>>>,
}

impl<F: FlashDevice, C: CounterStore> Clone for SharedDongle<F, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: FlashDevice, C: CounterStore> SharedDongle<F, C> {
    #[must_use]
    pub fn new(dongle: Dongle<F, C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dongle)),
        }
    }

    pub fn on_scan(&self, raw: &[u8], rssi: i8) -> Option<ObservationOutcome> {
        self.inner.lock().on_scan(raw, rssi)
    }

    pub fn on_periodic_data(&self, data: &[u8], rssi: i8) -> Result<Vec<DownloadNotice>> {
        self.inner.lock().on_periodic_data(data, rssi)
    }

    pub fn on_periodic_data_error(&self, rssi: i8) {
        self.inner.lock().on_periodic_data_error(rssi);
    }

    pub fn on_sync_lost(&self) {
        self.inner.lock().on_sync_lost();
    }

    pub fn tick(&self) -> Result<TickReport> {
        self.inner.lock().tick()
    }

    pub fn report(&self) -> DongleReport {
        self.inner.lock().report()
    }

    pub fn download_fresh(&self, since: DongleTimer) -> bool {
        self.inner.lock().download_fresh(since)
    }

    /// Run `f` with exclusive access to the context.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut Dongle<F, C>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
