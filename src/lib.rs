//! Fetches open statistics for Chichester (NOMIS, ONS, police.uk), reshapes
//! them into tidy tables and persists them as CSV for the dashboard.
//!
//! Each dataset runs `fetch → validate → normalize → pivot → persist`; see
//! [`pipeline::run_dataset`].

pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod pivot;
pub mod store;
pub mod table;

pub use config::{DatasetConfig, Layout, PipelineConfig};
pub use error::{PipelineError, Result};
pub use fetch::{Fetcher, RetryPolicy, Source, SourceDescriptor};
pub use normalize::{normalize, CategoryType, Filter, NormalizeRules, NormalizedRecord};
pub use pipeline::{run_all, run_dataset, run_named, RunOutcome, RunSummary};
pub use pivot::{pivot, WideTable};
pub use store::{load_long, load_wide, persist, Table};
pub use table::{RawRecord, RawTable, SourceFormat};
