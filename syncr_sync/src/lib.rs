//! Bounded concurrency primitives and the sync engine built on top of
//! them (spec.md sections 4.9, 4.10): drop creation and publication,
//! the six-step drop sync algorithm, and the request handler that
//! serves local state to other nodes.

pub mod concurrency;
pub mod engine;

pub use concurrency::{bounded_gather, bounded_queue_process};
pub use engine::{
    MAX_CHUNKS_PER_PEER, MAX_CONCURRENT_CHUNK_DOWNLOADS, MAX_CONCURRENT_FILE_DOWNLOADS, SyncEngine,
};
