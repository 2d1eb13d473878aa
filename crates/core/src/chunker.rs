//! Splits long sessions into overlapping chunks.
//!
//! Chunks of size `T` start every `step = floor(T * (1 - f))` exchanges; the
//! last chunk is right-aligned so it ends exactly at the session length and is
//! never a short sliver.

use crate::config::ChunkParams;
use crate::model::{Chunk, Session};

/// Compute the `[start, end)` ranges for a session of `len` exchanges.
pub fn chunk_ranges(len: usize, params: &ChunkParams) -> Vec<(usize, usize)> {
    let max = params.max_session_exchanges();
    if len <= max {
        return vec![(0, len)];
    }

    let step = params.step();
    let mut ranges = Vec::with_capacity(len / step + 1);
    let mut start = 0;
    while start + max < len {
        ranges.push((start, start + max));
        start += step;
    }
    ranges.push((len - max, len));
    ranges
}

/// Split a session into chunks that borrow its exchanges.
pub fn chunk_session<'a>(session: &'a Session, params: &ChunkParams) -> Vec<Chunk<'a>> {
    let exchanges = session.exchanges();
    chunk_ranges(exchanges.len(), params)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (start, end))| Chunk {
            parent_session_id: session.id(),
            chunk_index,
            start_offset: start,
            end_offset: end,
            exchanges: &exchanges[start..end],
        })
        .collect()
}
