//! Signed drop metadata, per-file chunk manifests, and the local
//! drop-location registry (spec.md sections 3, 4.4, 4.5).

pub mod chunk;
pub mod drop_metadata;
pub mod file_metadata;
pub mod registry;

pub use chunk::{DEFAULT_CHUNK_SIZE, chunk_len, chunk_range, num_chunks};
pub use drop_metadata::{DropMetadata, DropVersion, gen_drop_id};
pub use file_metadata::FileMetadata;
pub use registry::DropRegistry;
