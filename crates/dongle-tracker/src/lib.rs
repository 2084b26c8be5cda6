//! Encounter tracking.
//!
//! The radio reports every sighting of a beacon advertisement but never says
//! when a beacon went out of range. [`EncounterTracker`] keeps a small ring of
//! ephemeral ids currently in view, folds repeated sightings into one
//! candidate [`EncounterRecord`](dongle_types::EncounterRecord), and commits
//! candidates to the log from the clock tick once they have been tracked for
//! long enough.

pub mod config;
pub mod tracker;

pub use config::TrackerConfig;
pub use tracker::{
    EncounterTracker, FlushReport, ObservationOutcome, Promotion, TrackedEncounter,
};
