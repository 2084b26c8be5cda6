//! The dongle context.
//!
//! [`Dongle`] owns every piece of device state (clock, encounter log,
//! tracking ring, download session, match bitmap, statistics) and exposes
//! one entry point per radio or timer event. [`SharedDongle`] serializes
//! those entry points behind a single mutex for hosts that deliver events
//! from more than one thread.

pub mod config;
pub mod device;
pub mod dongle;
pub mod report;
pub mod shared;

pub use config::{DongleConfig, LogConfig};
pub use device::DeviceConfig;
pub use dongle::Dongle;
pub use report::{DongleReport, DownloadNotice, DownloadOutcome, TickReport};
pub use shared::SharedDongle;
