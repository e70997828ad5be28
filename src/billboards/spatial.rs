// src/billboards/spatial.rs
//! Chunk key -> live instance handles. Only chunks that actually hold
//! instances have an entry.

use std::collections::{HashMap, HashSet};

use super::core::{ChunkKey, InstanceHandle};

#[derive(Debug, Default, Clone)]
pub struct ChunkIndex {
    by_chunk: HashMap<ChunkKey, HashSet<InstanceHandle>>,
    len: usize,
}

impl ChunkIndex {
    pub fn register(&mut self, handle: InstanceHandle, key: ChunkKey) {
        if self.by_chunk.entry(key).or_default().insert(handle) {
            self.len += 1;
        }
    }

    /// Returns false if the handle was not in that chunk.
    pub fn unregister(&mut self, handle: InstanceHandle, key: ChunkKey) -> bool {
        let Some(set) = self.by_chunk.get_mut(&key) else { return false };
        let removed = set.remove(&handle);
        if removed {
            self.len -= 1;
        }
        if set.is_empty() {
            self.by_chunk.remove(&key);
        }
        removed
    }

    /// Remove a whole chunk, returning its handles.
    pub fn take_chunk(&mut self, key: ChunkKey) -> Vec<InstanceHandle> {
        let Some(set) = self.by_chunk.remove(&key) else { return Vec::new() };
        self.len -= set.len();
        set.into_iter().collect()
    }

    pub fn chunk(&self, key: ChunkKey) -> Option<&HashSet<InstanceHandle>> {
        self.by_chunk.get(&key)
    }

    /// Every tracked chunk inside the `(2r+1)^2` window around `center`.
    /// Missing chunks cost one hash lookup each.
    pub fn query_window(
        &self,
        center: ChunkKey,
        radius: i32,
    ) -> impl Iterator<Item = (ChunkKey, &HashSet<InstanceHandle>)> + '_ {
        (-radius..=radius)
            .flat_map(move |dz| {
                (-radius..=radius).map(move |dx| ChunkKey::new(center.x + dx, center.z + dz))
            })
            .filter_map(move |key| self.by_chunk.get(&key).map(|set| (key, set)))
    }

    pub fn chunk_count(&self) -> usize {
        self.by_chunk.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
