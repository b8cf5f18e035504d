//! Usage module
//!
//! Write-back of completed calls and per-organization spend summaries.

pub mod recorder;
pub mod summary;

pub use recorder::{MeteringOptions, PersistError, UsageRecorder};
pub use summary::{ProviderUsage, UsageSummaries, UsageSummary};
