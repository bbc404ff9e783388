//! The recording and correlation engine.
//!
//! [`recorder::Recorder`] is the entry point; the sibling modules hold the
//! pure algorithms it composes (coalescing, similarity, correlation,
//! screenshot identity) and the collaborator contracts (clock, capture).

pub mod capture;
pub mod clock;
pub mod coalesce;
pub mod correlate;
pub mod recorder;
pub mod screenshots;
pub mod similarity;
