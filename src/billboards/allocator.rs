// src/billboards/allocator.rs
//! Fixed-capacity slot pool, one per category.
//!
//! Slots are handed out from a LIFO free list first, then from the
//! high-water mark. The high-water mark (`active_count`) never shrinks and
//! bounds every buffer scan: rows at or above it are never uploaded.

use bevy::prelude::*;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot pool exhausted ({capacity} of {capacity} slots in use)")]
    Exhausted { capacity: u32 },
    #[error("slot {slot} is outside the pool (capacity {capacity})")]
    OutOfRange { slot: u32, capacity: u32 },
    #[error("slot {slot} is not allocated")]
    NotAllocated { slot: u32 },
}

#[derive(Debug, Clone)]
pub struct SlotPool {
    capacity: u32,
    /// Freed slots below the high-water mark, reused last-in first-out.
    free: Vec<u32>,
    /// One flag per slot below the high-water mark.
    allocated: Vec<bool>,
    used: u32,
}

impl SlotPool {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            free: Vec::new(),
            allocated: Vec::new(),
            used: 0,
        }
    }

    /// Take an unused slot. Exhaustion leaves the pool untouched.
    pub fn allocate(&mut self) -> Result<u32, SlotError> {
        if let Some(slot) = self.free.pop() {
            self.allocated[slot as usize] = true;
            self.used += 1;
            return Ok(slot);
        }

        let next = self.allocated.len() as u32;
        if next >= self.capacity {
            return Err(SlotError::Exhausted { capacity: self.capacity });
        }
        self.allocated.push(true);
        self.used += 1;
        Ok(next)
    }

    /// Return a slot. Double frees and foreign slots are rejected and logged;
    /// the pool is unchanged in that case.
    pub fn free(&mut self, slot: u32) -> Result<(), SlotError> {
        if slot >= self.capacity {
            warn!("Billboards: free of slot {} outside capacity {}", slot, self.capacity);
            return Err(SlotError::OutOfRange { slot, capacity: self.capacity });
        }
        match self.allocated.get_mut(slot as usize) {
            Some(flag) if *flag => {
                *flag = false;
                self.free.push(slot);
                self.used -= 1;
                Ok(())
            }
            _ => {
                warn!("Billboards: double free of slot {}", slot);
                Err(SlotError::NotAllocated { slot })
            }
        }
    }

    #[inline]
    pub fn is_allocated(&self, slot: u32) -> bool {
        self.allocated.get(slot as usize).copied().unwrap_or(false)
    }

    /// True for any in-range slot not currently handed out.
    #[inline]
    pub fn is_free(&self, slot: u32) -> bool {
        slot < self.capacity && !self.is_allocated(slot)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn available(&self) -> u32 {
        self.capacity - self.used
    }

    /// High-water mark: number of slots ever handed out.
    pub fn active_count(&self) -> u32 {
        self.allocated.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn never_hands_out_a_live_slot_twice() {
        let mut pool = SlotPool::new(64);
        let mut live = HashSet::new();
        for round in 0..200u32 {
            if round % 3 == 2 {
                let victim = *live.iter().next().unwrap();
                live.remove(&victim);
                pool.free(victim).unwrap();
            } else if let Ok(slot) = pool.allocate() {
                assert!(live.insert(slot), "slot {slot} handed out twice");
            }
            assert_eq!(pool.used() as usize, live.len());
        }
    }

    #[test]
    fn exhausts_at_capacity_without_side_effects() {
        let mut pool = SlotPool::new(3);
        for _ in 0..3 {
            pool.allocate().unwrap();
        }
        assert_eq!(pool.allocate(), Err(SlotError::Exhausted { capacity: 3 }));
        assert_eq!(pool.used(), 3);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut pool = SlotPool::new(4);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.free(a).unwrap();
        assert!(pool.is_free(a));
        assert_eq!(pool.allocate().unwrap(), a);
        assert!(pool.is_allocated(b));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut pool = SlotPool::new(4);
        let a = pool.allocate().unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(SlotError::NotAllocated { slot: a }));
        assert_eq!(pool.free(3), Err(SlotError::NotAllocated { slot: 3 }));
        assert_eq!(pool.free(9), Err(SlotError::OutOfRange { slot: 9, capacity: 4 }));
        assert_eq!(pool.used(), 0);
        // Still only one copy of `a` on the free list.
        assert_eq!(pool.allocate().unwrap(), a);
        assert_eq!(pool.allocate().unwrap(), 1);
    }

    #[test]
    fn high_water_mark_never_shrinks() {
        let mut pool = SlotPool::new(8);
        let slots: Vec<u32> = (0..5).map(|_| pool.allocate().unwrap()).collect();
        for s in slots {
            pool.free(s).unwrap();
        }
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.active_count(), 5);
    }
}
