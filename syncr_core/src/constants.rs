//! Shared constants referenced from more than one crate, so that on-disk
//! layout stays in lockstep (spec.md section 3 "On-disk layout").

/// Name of the per-drop metadata directory under a drop root. Always
/// excluded from directory walks (spec.md section 4.3 "walk").
pub const METADATA_DIR_NAME: &str = ".5yncr";

/// Subdirectory of the metadata directory holding drop-metadata blobs.
pub const DROP_METADATA_SUBDIR: &str = "drop";

/// Subdirectory of the metadata directory holding file-metadata blobs.
pub const FILES_METADATA_SUBDIR: &str = "files";

/// Suffix naming the `LATEST` pointer file for a given drop ID.
pub const LATEST_SUFFIX: &str = "LATEST";

/// Suffix applied to a path while a file is only partially downloaded.
pub const PART_SUFFIX: &str = "part";

/// Node ID byte length (spec.md section 3 "Node identity").
pub const NODE_ID_SIZE: usize = 32;

/// Drop ID byte length: 32-byte owner node ID + 32 random bytes.
pub const DROP_ID_SIZE: usize = 64;
