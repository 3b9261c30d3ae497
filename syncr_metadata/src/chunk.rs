//! Chunk geometry (spec.md section 3 "Chunk").
//!
//! A chunk is a byte range of at most `chunk_size` bytes. Chunk `i` covers
//! `[i*chunk_size, min(len, (i+1)*chunk_size))`. The final chunk is never
//! padded; its digest is of the actual tail bytes.

/// Default chunk size: 2^23 bytes (8 MiB), spec.md section 6 "Tunables".
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 23;

/// Number of chunks needed to cover a file of length `len` with the given
/// `chunk_size`. A zero-length file has zero chunks.
pub fn num_chunks(len: u64, chunk_size: u64) -> u64 {
    if len == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// The half-open byte range `[start, end)` covered by chunk `index` of a
/// file of length `len`.
pub fn chunk_range(index: u64, len: u64, chunk_size: u64) -> (u64, u64) {
    let start = index * chunk_size;
    let end = std::cmp::min(len, start + chunk_size);
    (start, end)
}

/// The length in bytes of chunk `index` of a file of length `len`.
pub fn chunk_len(index: u64, len: u64, chunk_size: u64) -> u64 {
    let (start, end) = chunk_range(index, len, chunk_size);
    end.saturating_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_chunks_matches_ceiling_division() {
        assert_eq!(num_chunks(0, 8), 0);
        assert_eq!(num_chunks(1, 8), 1);
        assert_eq!(num_chunks(8, 8), 1);
        assert_eq!(num_chunks(9, 8), 2);
        assert_eq!(num_chunks(64, 8), 8);
    }

    #[test]
    fn last_chunk_is_not_padded() {
        let len = 20u64;
        let chunk_size = 8u64;
        assert_eq!(num_chunks(len, chunk_size), 3);
        assert_eq!(chunk_range(0, len, chunk_size), (0, 8));
        assert_eq!(chunk_range(1, len, chunk_size), (8, 16));
        assert_eq!(chunk_range(2, len, chunk_size), (16, 20));
        assert_eq!(chunk_len(2, len, chunk_size), 4);
    }
}
