//! Session activity tracking and auto-reflection

mod activity;
mod reflect;

pub use activity::{
    ActivityTracker, SessionActivity, ACTIVITY_TTL, MAX_TRACKED_FRAGMENTS, MAX_TRACKED_KEYWORDS,
};
pub use reflect::AutoReflector;
