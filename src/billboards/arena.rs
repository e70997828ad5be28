// src/billboards/arena.rs
//! Generational handle -> record table for placed instances.

use bevy::prelude::*;

use super::core::{CategoryId, ChunkKey, InstanceHandle, OwnerKey};

/// Everything the engine remembers about one placed object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceRecord {
    pub owner: OwnerKey,
    pub category: CategoryId,
    /// Row in the category's instance buffer; stable while the record lives.
    pub slot: u32,
    /// World position snapshotted at registration.
    pub position: Vec3,
    pub chunk: ChunkKey,
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u32,
    record: Option<InstanceRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceArena {
    entries: Vec<Entry>,
    vacant: Vec<u32>,
    len: usize,
}

impl InstanceArena {
    pub fn insert(&mut self, record: InstanceRecord) -> InstanceHandle {
        self.len += 1;
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index as usize];
            entry.record = Some(record);
            return InstanceHandle { index, generation: entry.generation };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry { generation: 0, record: Some(record) });
        InstanceHandle { index, generation: 0 }
    }

    pub fn get(&self, handle: InstanceHandle) -> Option<&InstanceRecord> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.record.as_ref())
    }

    /// Remove and return the record; stale handles return `None`.
    pub fn remove(&mut self, handle: InstanceHandle) -> Option<InstanceRecord> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let record = entry.record.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.vacant.push(handle.index);
        self.len -= 1;
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
