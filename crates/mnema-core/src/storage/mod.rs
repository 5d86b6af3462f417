//! Durable persistence layer

pub mod migrations;
mod sqlite;

pub use sqlite::{
    FragmentPatch, FragmentStore, InsertOutcome, KeywordFilter, RcaNode, UpdateOutcome,
    DECAY_FACTOR, EMBED_IMPORTANCE_THRESHOLD, EXPIRE_INACTIVE_DAYS,
};
