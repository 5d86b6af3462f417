//! In-memory retrieval tier and worker queues

mod keyword;

pub use keyword::{
    EvalJob, MemoryIndex, PendingContradiction, WorkingEntry, HOT_CACHE_TTL, MAX_SET_SIZE,
    SESSION_TTL, WM_RETAIN_IMPORTANCE,
};
