//! Canonical folder taxonomy: normalization, sync eligibility, and
//! priority ordering (spec §4.3).

pub mod normalizer;
pub mod priority;

pub use normalizer::{normalize, normalize_and_filter, should_sync_folder, RawFolder};
pub use priority::{priority as folder_priority, sort_by_priority};
