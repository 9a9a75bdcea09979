//! Reporting: text tables for phase summaries, comparisons and scenario
//! descriptions. JSON output goes through `serde_json` on the same types.

pub mod format;

pub use format::*;
