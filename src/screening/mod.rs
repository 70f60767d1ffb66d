//! The screening stages, in pipeline order: quality/exclusion filters,
//! market enrichment, ranking, share-class deduplication, selection and
//! sector diversification.
//!
//! Each stage is a pure function over the surviving candidate set (plus the
//! rejection trail); orchestration lives in [`crate::engine`].

pub mod dedup;
pub mod diversify;
pub mod enrich;
pub mod filters;
pub mod rank;
pub mod select;

pub use diversify::DEFAULT_SECTOR_LIMIT;
pub use filters::VOLUME_COVERAGE_FLOOR;
pub use select::{AdmissionVia, Selection};
