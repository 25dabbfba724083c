//! Content-addressed chunked storage for arrays of one element stride.
//!
//! Arrays are split into fixed-size chunks; each chunk is stored once and
//! reference-counted. Adding an array against a reference handle compares
//! chunks positionally first (the common case for near-identical successive
//! snapshots), then falls back to a content-digest lookup over everything
//! already stored at this stride.

use md5::{Digest, Md5};
use smallvec::SmallVec;
use std::collections::HashMap;

/// 128-bit digest identifying chunk content.
pub type ChunkDigest = [u8; 16];

/// Compute the MD5 digest of a chunk for the content lookup.
#[inline]
fn chunk_digest(data: &[u8]) -> ChunkDigest {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Content key for the chunk lookup table.
///
/// Carries the byte length alongside the digest so short trailing chunks
/// never collide with full ones.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Debug)]
struct ChunkKey {
    digest: ChunkDigest,
    len: usize,
}

impl ChunkKey {
    fn from_data(data: &[u8]) -> Self {
        Self {
            digest: chunk_digest(data),
            len: data.len(),
        }
    }
}

/// Opaque handle to one deduplicated array within a [`ChunkStore`].
///
/// Handles are arena indices owned by the store that issued them; they are
/// only meaningful for that store and become invalid after
/// [`ChunkStore::state_remove`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArrayState(u32);

struct ChunkSlot {
    data: Vec<u8>,
    /// Content key when registered in the lookup; `None` for chunks stored
    /// via [`ChunkStore::state_add_unique`].
    key: Option<ChunkKey>,
    users: u32,
}

struct StateSlot {
    chunks: Vec<u32>,
    len: usize,
    live: bool,
}

/// Deduplicated storage for byte arrays of one fixed element stride.
///
/// Not internally synchronized; the owning [`StoreSet`](super::StoreSet)
/// wraps each store in a mutex.
pub struct ChunkStore {
    stride: usize,
    chunk_bytes: usize,
    chunks: Vec<ChunkSlot>,
    free_chunks: Vec<u32>,
    states: Vec<StateSlot>,
    free_states: Vec<u32>,
    lookup: HashMap<ChunkKey, SmallVec<[u32; 2]>>,
}

impl ChunkStore {
    /// Create a store for the given stride, chunking at `chunk_elems`
    /// elements per chunk.
    pub(crate) fn new(stride: usize, chunk_elems: usize) -> Self {
        assert!(stride > 0);
        assert!(chunk_elems > 0);
        Self {
            stride,
            chunk_bytes: stride * chunk_elems,
            chunks: Vec::new(),
            free_chunks: Vec::new(),
            states: Vec::new(),
            free_states: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Element stride of this store.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Add an array, deduplicating against `reference` chunk-by-chunk when
    /// given, then against all stored content. Returns a new handle.
    ///
    /// `data.len()` must be a multiple of the stride.
    pub fn state_add(&mut self, data: &[u8], reference: Option<ArrayState>) -> ArrayState {
        assert_eq!(
            data.len() % self.stride,
            0,
            "array length {} is not a multiple of stride {}",
            data.len(),
            self.stride
        );

        // Clone the reference chunk list up front; `chunk_for` needs mutable
        // access to the arena while we index into it.
        let ref_chunks: Option<Vec<u32>> = reference.map(|r| {
            let slot = &self.states[r.0 as usize];
            assert!(slot.live, "reference handle used after removal");
            slot.chunks.clone()
        });

        let mut chunks = Vec::with_capacity(data.len().div_ceil(self.chunk_bytes));
        for (i, piece) in data.chunks(self.chunk_bytes).enumerate() {
            let positional = ref_chunks.as_ref().and_then(|c| c.get(i).copied());
            chunks.push(self.chunk_for(piece, positional));
        }
        self.state_alloc(chunks, data.len())
    }

    /// Add an array with deduplication disabled: every chunk is a fresh copy
    /// and none is registered in the content lookup.
    ///
    /// Used for layers whose bytes embed editor-owned allocations; comparing
    /// those burns CPU looking for duplicate content that cannot exist.
    pub fn state_add_unique(&mut self, data: &[u8]) -> ArrayState {
        assert_eq!(
            data.len() % self.stride,
            0,
            "array length {} is not a multiple of stride {}",
            data.len(),
            self.stride
        );

        let mut chunks = Vec::with_capacity(data.len().div_ceil(self.chunk_bytes));
        for piece in data.chunks(self.chunk_bytes) {
            chunks.push(self.chunk_alloc(ChunkSlot {
                data: piece.to_vec(),
                key: None,
                users: 1,
            }));
        }
        self.state_alloc(chunks, data.len())
    }

    fn state_alloc(&mut self, chunks: Vec<u32>, len: usize) -> ArrayState {
        let slot = StateSlot {
            chunks,
            len,
            live: true,
        };
        let id = match self.free_states.pop() {
            Some(id) => {
                self.states[id as usize] = slot;
                id
            }
            None => {
                self.states.push(slot);
                (self.states.len() - 1) as u32
            }
        };
        ArrayState(id)
    }

    fn chunk_alloc(&mut self, slot: ChunkSlot) -> u32 {
        match self.free_chunks.pop() {
            Some(id) => {
                self.chunks[id as usize] = slot;
                id
            }
            None => {
                self.chunks.push(slot);
                (self.chunks.len() - 1) as u32
            }
        }
    }

    /// Find or create a chunk holding exactly `piece`.
    fn chunk_for(&mut self, piece: &[u8], positional: Option<u32>) -> u32 {
        // Fast path: the same-position chunk of the reference array.
        if let Some(id) = positional {
            let slot = &mut self.chunks[id as usize];
            if slot.data == piece {
                slot.users += 1;
                return id;
            }
        }

        // Slow path: content lookup over everything stored at this stride.
        let key = ChunkKey::from_data(piece);
        if let Some(bucket) = self.lookup.get(&key) {
            for &id in bucket {
                if self.chunks[id as usize].data == piece {
                    self.chunks[id as usize].users += 1;
                    return id;
                }
            }
        }

        // Genuinely new content.
        let id = self.chunk_alloc(ChunkSlot {
            data: piece.to_vec(),
            key: Some(key),
            users: 1,
        });
        self.lookup.entry(key).or_default().push(id);
        id
    }

    /// Release a handle, decrementing chunk reference counts. Chunks reaching
    /// zero references are freed immediately.
    pub fn state_remove(&mut self, state: ArrayState) {
        let slot = &mut self.states[state.0 as usize];
        assert!(slot.live, "handle removed twice");
        slot.live = false;
        let chunk_ids = std::mem::take(&mut slot.chunks);
        self.free_states.push(state.0);

        for id in chunk_ids {
            let chunk = &mut self.chunks[id as usize];
            assert!(chunk.users > 0, "chunk reference count underflow");
            chunk.users -= 1;
            if chunk.users == 0 {
                let key = chunk.key.take();
                chunk.data = Vec::new();
                if let Some(key) = key {
                    if let Some(bucket) = self.lookup.get_mut(&key) {
                        bucket.retain(|c| *c != id);
                        if bucket.is_empty() {
                            self.lookup.remove(&key);
                        }
                    }
                }
                self.free_chunks.push(id);
            }
        }
    }

    /// Materialize the full byte array for a handle.
    ///
    /// Reproduces the exact bytes passed to the originating
    /// [`state_add`](Self::state_add).
    pub fn state_bytes(&self, state: ArrayState) -> Vec<u8> {
        let slot = &self.states[state.0 as usize];
        assert!(slot.live, "handle read after removal");
        let mut out = Vec::with_capacity(slot.len);
        for &id in &slot.chunks {
            out.extend_from_slice(&self.chunks[id as usize].data);
        }
        debug_assert_eq!(out.len(), slot.len);
        out
    }

    /// Byte length of the array behind a handle.
    pub fn state_len(&self, state: ArrayState) -> usize {
        let slot = &self.states[state.0 as usize];
        assert!(slot.live, "handle read after removal");
        slot.len
    }

    /// Number of live (referenced) chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.users > 0).count()
    }

    /// Check if the store holds no live states or chunks.
    pub fn is_empty(&self) -> bool {
        self.states.iter().all(|s| !s.live)
    }

    /// (expanded, compacted) byte totals: the sum of live state lengths
    /// versus the bytes actually held in unique chunks.
    pub fn memory_usage(&self) -> (usize, usize) {
        let expanded = self.states.iter().filter(|s| s.live).map(|s| s.len).sum();
        let compacted = self
            .chunks
            .iter()
            .filter(|c| c.users > 0)
            .map(|c| c.data.len())
            .sum();
        (expanded, compacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_roundtrip() {
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 100, 1);
        let state = store.state_add(&data, None);
        assert_eq!(store.state_bytes(state), data);
        assert_eq!(store.state_len(state), data.len());
    }

    #[test]
    fn test_roundtrip_partial_tail_chunk() {
        // 10 elements with 8-element chunks leaves a short trailing chunk.
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 10, 3);
        let state = store.state_add(&data, None);
        assert_eq!(store.state_bytes(state), data);
    }

    #[test]
    fn test_empty_array() {
        let mut store = ChunkStore::new(4, 8);
        let state = store.state_add(&[], None);
        assert!(store.state_bytes(state).is_empty());
        assert_eq!(store.chunk_count(), 0);
    }

    #[test]
    fn test_dedup_against_reference() {
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 64, 7);
        let a = store.state_add(&data, None);
        let before = store.chunk_count();
        let b = store.state_add(&data, Some(a));
        assert_eq!(store.chunk_count(), before);
        assert_eq!(store.state_bytes(b), data);
    }

    #[test]
    fn test_dedup_without_reference() {
        // Identical content found through the content lookup alone.
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 64, 9);
        let _a = store.state_add(&data, None);
        let before = store.chunk_count();
        let _b = store.state_add(&data, None);
        assert_eq!(store.chunk_count(), before);
    }

    #[test]
    fn test_partial_change_shares_other_chunks() {
        let mut store = ChunkStore::new(4, 8);
        let chunk_bytes = 4 * 8;
        let data = bytes(chunk_bytes * 6, 11);
        let a = store.state_add(&data, None);
        assert_eq!(store.chunk_count(), 6);

        // Mutate exactly one chunk-sized region.
        let mut changed = data.clone();
        for b in &mut changed[2 * chunk_bytes..3 * chunk_bytes] {
            *b = b.wrapping_add(1);
        }
        let b = store.state_add(&changed, Some(a));
        assert_eq!(store.chunk_count(), 7);
        assert_eq!(store.state_bytes(b), changed);
    }

    #[test]
    fn test_refcount_reclaims_chunks() {
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 32, 13);
        let a = store.state_add(&data, None);
        let b = store.state_add(&data, Some(a));

        store.state_remove(a);
        assert!(store.chunk_count() > 0, "still referenced by b");
        assert_eq!(store.state_bytes(b), data);

        store.state_remove(b);
        assert_eq!(store.chunk_count(), 0);
        assert!(store.is_empty());
        assert_eq!(store.memory_usage(), (0, 0));
    }

    #[test]
    #[should_panic(expected = "removed twice")]
    fn test_double_remove_asserts() {
        let mut store = ChunkStore::new(4, 8);
        let state = store.state_add(&bytes(4 * 4, 17), None);
        store.state_remove(state);
        store.state_remove(state);
    }

    #[test]
    #[should_panic(expected = "not a multiple of stride")]
    fn test_stride_mismatch_asserts() {
        let mut store = ChunkStore::new(4, 8);
        let _ = store.state_add(&[0u8; 5], None);
    }

    #[test]
    fn test_unique_add_never_shares() {
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 16, 21);
        let a = store.state_add(&data, None);
        let before = store.chunk_count();

        // Identical bytes, but the unique path bypasses all matching.
        let b = store.state_add_unique(&data);
        assert_eq!(store.chunk_count(), before * 2);
        assert_eq!(store.state_bytes(b), data);

        // And later deduplicating adds never alias the unique chunks.
        let c = store.state_add(&data, None);
        assert_eq!(store.chunk_count(), before * 2);

        store.state_remove(b);
        assert_eq!(store.chunk_count(), before);
        store.state_remove(a);
        store.state_remove(c);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_usage_counts_sharing() {
        let mut store = ChunkStore::new(4, 8);
        let data = bytes(4 * 64, 19);
        let _a = store.state_add(&data, None);
        let _b = store.state_add(&data, None);
        let (expanded, compacted) = store.memory_usage();
        assert_eq!(expanded, data.len() * 2);
        assert_eq!(compacted, data.len());
    }
}
