//! Memory Consolidation
//!
//! The ordered maintenance pipeline: tier transitions, decay, expiry,
//! dedup, embedding backfill, utility recompute, anchor promotion,
//! hybrid contradiction detection, pending-queue drain, feedback report
//! and index pruning.

mod pipeline;

pub use pipeline::{ConsolidationReport, Consolidator, StaleSummary, PENDING_DRAIN_LIMIT};
