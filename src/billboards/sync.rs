// src/billboards/sync.rs
//! Deferred buffer uploads.
//!
//! Mutations only set dirty bits; `BillboardEngine::flush` hands each dirty
//! category to a [`BufferSink`] once and clears its bits.

use super::buffer::{DirtyMask, InstanceBuffer};
use super::core::CategoryId;

/// Read-only view of one category handed to a sink.
#[derive(Clone, Copy)]
pub struct CategoryView<'a> {
    pub id: CategoryId,
    pub name: &'a str,
    pub buffer: &'a InstanceBuffer,
    /// A fade band currently applies, so the height correction blends in.
    pub banded: bool,
}

/// Receives uploads. Implementations upload only what `dirty` names.
pub trait BufferSink {
    fn upload(&mut self, view: CategoryView<'_>, dirty: DirtyMask);
}

/// Result of one flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub categories: u32,
    /// Rows covered by the uploads (bounded by each high-water mark).
    pub rows: u32,
}

/// Sink that only remembers what it was asked to upload. Handy for headless
/// runs and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub uploads: Vec<(CategoryId, DirtyMask, usize)>,
}

impl RecordingSink {
    pub fn uploads_for(&self, id: CategoryId) -> usize {
        self.uploads.iter().filter(|(c, _, _)| *c == id).count()
    }

    pub fn clear(&mut self) {
        self.uploads.clear();
    }
}

impl BufferSink for RecordingSink {
    fn upload(&mut self, view: CategoryView<'_>, dirty: DirtyMask) {
        self.uploads.push((view.id, dirty, view.buffer.rows()));
    }
}
