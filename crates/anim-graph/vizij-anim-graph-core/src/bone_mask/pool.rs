use std::sync::Arc;

use super::BoneMask;
use crate::skeleton::Skeleton;

pub type BoneMaskPoolIndex = i8;

pub const INVALID_POOL_INDEX: BoneMaskPoolIndex = -1;

/// Hard limit on concurrently live pool slots.
pub const MAX_POOL_MASKS: usize = 127;

const GROWTH_STEP: usize = 4;

#[derive(Debug)]
struct PoolSlot {
    mask: BoneMask,
    is_used: bool,
}

/// Reusable bone mask buffers for one instance. Slots are handed out explicitly and must be
/// released by whoever acquired them.
#[derive(Debug)]
pub struct BoneMaskPool {
    skeleton: Arc<Skeleton>,
    slots: Vec<PoolSlot>,
}

impl BoneMaskPool {
    pub fn new(skeleton: Arc<Skeleton>, initial_slots: usize) -> Self {
        let mut pool = Self {
            skeleton,
            slots: Vec::with_capacity(initial_slots.min(MAX_POOL_MASKS)),
        };
        pool.grow(initial_slots);
        pool
    }

    fn grow(&mut self, additional: usize) {
        let target = (self.slots.len() + additional).min(MAX_POOL_MASKS);
        while self.slots.len() < target {
            self.slots.push(PoolSlot {
                mask: BoneMask::new(Arc::clone(&self.skeleton)),
                is_used: false,
            });
        }
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    /// Number of allocated slots (used or free).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn num_used(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_used).count()
    }

    /// Hand out a free slot, growing the pool if needed. Exceeding [`MAX_POOL_MASKS`] live
    /// slots is fatal.
    pub fn acquire_mask(&mut self, reset_to_zero: bool) -> BoneMaskPoolIndex {
        let free = match self.slots.iter().position(|slot| !slot.is_used) {
            Some(idx) => idx,
            None => {
                assert!(
                    self.slots.len() < MAX_POOL_MASKS,
                    "bone mask pool exhausted ({MAX_POOL_MASKS} slots in use)"
                );
                let idx = self.slots.len();
                self.grow(GROWTH_STEP);
                idx
            }
        };

        let slot = &mut self.slots[free];
        slot.is_used = true;
        if reset_to_zero {
            slot.mask.reset_fixed_weight(0.0, 0.0);
        }
        free as BoneMaskPoolIndex
    }

    pub fn release_mask(&mut self, idx: BoneMaskPoolIndex) {
        let slot = &mut self.slots[Self::slot(idx)];
        debug_assert!(slot.is_used, "releasing bone mask slot {idx} twice");
        slot.is_used = false;
    }

    /// Release every slot. Called once per top-level update.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.is_used = false;
        }
    }

    pub fn get(&self, idx: BoneMaskPoolIndex) -> &BoneMask {
        let slot = &self.slots[Self::slot(idx)];
        debug_assert!(slot.is_used);
        &slot.mask
    }

    pub fn get_mut(&mut self, idx: BoneMaskPoolIndex) -> &mut BoneMask {
        let slot = &mut self.slots[Self::slot(idx)];
        debug_assert!(slot.is_used);
        &mut slot.mask
    }

    /// Borrow one slot mutably and another immutably.
    pub fn get_pair_mut(
        &mut self,
        write_idx: BoneMaskPoolIndex,
        read_idx: BoneMaskPoolIndex,
    ) -> (&mut BoneMask, &BoneMask) {
        let (write, read) = (Self::slot(write_idx), Self::slot(read_idx));
        assert_ne!(write, read, "bone mask slot {write_idx} aliased");
        if write < read {
            let (head, tail) = self.slots.split_at_mut(read);
            (&mut head[write].mask, &tail[0].mask)
        } else {
            let (head, tail) = self.slots.split_at_mut(write);
            (&mut tail[0].mask, &head[read].mask)
        }
    }

    #[inline]
    fn slot(idx: BoneMaskPoolIndex) -> usize {
        assert!(idx != INVALID_POOL_INDEX, "invalid bone mask pool index");
        idx as usize
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::chain_skeleton;
    use super::*;

    #[test]
    fn acquired_slots_are_never_shared() {
        let mut pool = BoneMaskPool::new(chain_skeleton(vec![]), 2);
        let a = pool.acquire_mask(true);
        let b = pool.acquire_mask(true);
        let c = pool.acquire_mask(false);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(pool.num_used(), 3);

        pool.release_mask(b);
        assert_eq!(pool.acquire_mask(false), b);
    }

    #[test]
    fn exhausting_then_releasing_frees_exactly_one() {
        let mut pool = BoneMaskPool::new(chain_skeleton(vec![]), 0);
        let acquired: Vec<_> = (0..MAX_POOL_MASKS).map(|_| pool.acquire_mask(false)).collect();
        assert_eq!(pool.capacity(), MAX_POOL_MASKS);
        assert_eq!(pool.num_used(), MAX_POOL_MASKS);

        pool.release_mask(acquired[40]);
        assert_eq!(pool.acquire_mask(false), acquired[40]);
        assert_eq!(pool.num_used(), MAX_POOL_MASKS);
    }

    #[test]
    #[should_panic(expected = "bone mask pool exhausted")]
    fn exceeding_capacity_is_fatal() {
        let mut pool = BoneMaskPool::new(chain_skeleton(vec![]), 0);
        for _ in 0..=MAX_POOL_MASKS {
            pool.acquire_mask(false);
        }
    }

    #[test]
    fn acquire_can_zero_the_slot() {
        let mut pool = BoneMaskPool::new(chain_skeleton(vec![]), 1);
        let idx = pool.acquire_mask(false);
        pool.get_mut(idx).reset_fixed_weight(1.0, 1.0);
        pool.release_mask(idx);
        let idx = pool.acquire_mask(true);
        assert!(pool.get(idx).weights().iter().all(|w| *w == 0.0));
    }
}
