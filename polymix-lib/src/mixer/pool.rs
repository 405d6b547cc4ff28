//! Channel pool manager: partitions channel ids into available, reserved and
//! active sets and answers allocation requests from arbitrary threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Pool membership registry.
///
/// Every id in `[0, capacity)` lives in exactly one of the three sets at any
/// instant. The sets sit behind one mutex with short critical sections that
/// never span a blocking call, so neither the mixing thread nor caller
/// threads ever wait on more than a few list operations. The busy flag is a
/// separate atomic gating the mixing thread's idle backoff.
pub(crate) struct ChannelPool {
    state: Mutex<PoolState>,
    busy: AtomicBool,
}

struct PoolState {
    capacity: usize,
    reserved_count: usize,
    available: VecDeque<i32>,
    reserved: VecDeque<i32>,
    active: VecDeque<i32>,
}

fn remove_id(deque: &mut VecDeque<i32>, id: i32) {
    if let Some(pos) = deque.iter().position(|&entry| entry == id) {
        deque.remove(pos);
    }
}

impl ChannelPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                capacity,
                reserved_count: 0,
                available: (0..capacity as i32).collect(),
                reserved: VecDeque::new(),
                active: VecDeque::new(),
            }),
            busy: AtomicBool::new(false),
        }
    }

    /// True while any channel is registered active.
    pub fn busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().capacity
    }

    pub fn reserved_count(&self) -> usize {
        self.state.lock().unwrap().reserved_count
    }

    /// Resize the id space. Growth appends fresh ids to `available`; a shrink
    /// removes the dropped ids from every set (the engine stops the affected
    /// channels before calling this, so they are normally inactive already).
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock().unwrap();
        let old = state.capacity;
        if capacity >= old {
            for id in old as i32..capacity as i32 {
                state.available.push_back(id);
            }
        } else {
            for id in capacity as i32..old as i32 {
                remove_id(&mut state.available, id);
                remove_id(&mut state.reserved, id);
                remove_id(&mut state.active, id);
            }
            state.reserved_count = state.reserved_count.min(capacity);
        }
        state.capacity = capacity;
        // A shrink can drop paused ids straight out of the active set.
        let empty = state.active.is_empty();
        drop(state);
        if empty {
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    /// Re-partition the inactive sets so ids `[0, count)` are reserved.
    /// Currently-active ids keep playing and are re-homed by the id
    /// threshold when they are restored.
    pub fn set_reserved(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        let count = count.min(state.capacity);
        state.reserved_count = count;

        let mut inactive: Vec<i32> = state.available.drain(..).collect();
        inactive.extend(state.reserved.drain(..));
        inactive.sort_unstable();
        for id in inactive {
            if (id as usize) < count {
                state.reserved.push_back(id);
            } else {
                state.available.push_back(id);
            }
        }
    }

    /// Peek an inactive id without claiming it (round-robin: the id is
    /// requeued at the back). Falls back to the reserved set, and returns
    /// `None` only when both sets are empty.
    pub fn find(&self) -> Option<i32> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.available.pop_front() {
            state.available.push_back(id);
            return Some(id);
        }
        if state.reserved_count > 0 {
            if let Some(id) = state.reserved.pop_front() {
                state.reserved.push_back(id);
                return Some(id);
            }
        }
        None
    }

    /// Pick a forced-reclamation victim: the oldest-activated non-reserved
    /// id, else the oldest-activated reserved id, else channel 0.
    pub fn force_find(&self) -> i32 {
        let state = self.state.lock().unwrap();
        let mut oldest_reserved = None;
        for &id in &state.active {
            if id >= state.reserved_count as i32 {
                return id;
            }
            if id > -1 && oldest_reserved.is_none() {
                oldest_reserved = Some(id);
            }
        }
        oldest_reserved.unwrap_or(0)
    }

    /// Claim an available id and register it active. `None` when the
    /// available set is empty (not an error: the caller simply does nothing).
    pub fn retrieve(&self) -> Option<i32> {
        let mut state = self.state.lock().unwrap();
        let id = state.available.pop_front()?;
        state.active.push_back(id);
        drop(state);
        self.busy.store(true, Ordering::SeqCst);
        Some(id)
    }

    /// Move an id from its inactive set into the active set. Idempotent: an
    /// id that is already active is moved to the back, never duplicated.
    pub fn activate(&self, id: i32) {
        let mut state = self.state.lock().unwrap();
        if id >= 0 {
            if (id as usize) < state.reserved_count {
                remove_id(&mut state.reserved, id);
            } else {
                remove_id(&mut state.available, id);
            }
        }
        remove_id(&mut state.active, id);
        state.active.push_back(id);
        drop(state);
        self.busy.store(true, Ordering::SeqCst);
    }

    /// Remove an id from the active set, clearing the busy flag when the set
    /// empties.
    pub fn deactivate(&self, id: i32) {
        let mut state = self.state.lock().unwrap();
        remove_id(&mut state.active, id);
        let empty = state.active.is_empty();
        drop(state);
        if empty {
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    /// Return an id to the inactive set selected by the reserved threshold.
    /// No-op for `-1` (the music channel is never pooled) and for ids a
    /// capacity shrink has already dropped, which would otherwise circulate
    /// as phantom slots.
    pub fn restore(&self, id: i32) {
        if id < 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if (id as usize) >= state.capacity {
            return;
        }
        if (id as usize) < state.reserved_count {
            state.reserved.push_back(id);
        } else {
            state.available.push_back(id);
        }
    }

    pub fn is_active(&self, id: i32) -> bool {
        self.state.lock().unwrap().active.contains(&id)
    }

    /// Activation-ordered snapshot of the active set. Weakly consistent with
    /// respect to concurrent play/stop, which the mixing cycle tolerates.
    pub fn active_snapshot(&self) -> Vec<i32> {
        self.state.lock().unwrap().active.iter().copied().collect()
    }

    #[cfg(test)]
    pub fn available_snapshot(&self) -> Vec<i32> {
        self.state
            .lock()
            .unwrap()
            .available
            .iter()
            .copied()
            .collect()
    }

    #[cfg(test)]
    pub fn reserved_snapshot(&self) -> Vec<i32> {
        self.state
            .lock()
            .unwrap()
            .reserved
            .iter()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn partition(pool: &ChannelPool) -> Vec<i32> {
        let mut all: Vec<i32> = pool
            .available_snapshot()
            .into_iter()
            .chain(pool.reserved_snapshot())
            .chain(pool.active_snapshot())
            .collect();
        let unique: BTreeSet<i32> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "sets overlap: {:?}", all);
        all.sort_unstable();
        all
    }

    #[test]
    fn new_pool_seeds_available_ids() {
        let pool = ChannelPool::new(8);
        assert_eq!(pool.available_snapshot(), (0..8).collect::<Vec<_>>());
        assert!(!pool.busy());
    }

    #[test]
    fn growth_appends_and_shrink_removes_high_ids() {
        let pool = ChannelPool::new(4);
        pool.set_capacity(6);
        assert_eq!(partition(&pool), (0..6).collect::<Vec<_>>());

        pool.set_capacity(2);
        assert_eq!(partition(&pool), vec![0, 1]);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn set_reserved_partitions_low_ids() {
        let pool = ChannelPool::new(8);
        pool.set_reserved(3);
        assert_eq!(pool.reserved_snapshot(), vec![0, 1, 2]);
        assert_eq!(pool.available_snapshot(), (3..8).collect::<Vec<_>>());

        // Shrinking the reservation releases ids back to available.
        pool.set_reserved(1);
        assert_eq!(pool.reserved_snapshot(), vec![0]);
        assert_eq!(partition(&pool), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn set_reserved_clamps_to_capacity() {
        let pool = ChannelPool::new(4);
        pool.set_reserved(10);
        assert_eq!(pool.reserved_count(), 4);
        assert!(pool.available_snapshot().is_empty());
    }

    #[test]
    fn find_peeks_round_robin() {
        let pool = ChannelPool::new(3);
        assert_eq!(pool.find(), Some(0));
        assert_eq!(pool.find(), Some(1));
        assert_eq!(pool.find(), Some(2));
        assert_eq!(pool.find(), Some(0));
        // Peeking never removes anything.
        assert_eq!(pool.available_snapshot().len(), 3);
    }

    #[test]
    fn find_falls_back_to_reserved_then_none() {
        let pool = ChannelPool::new(2);
        pool.set_reserved(2);
        assert_eq!(pool.find(), Some(0));

        pool.activate(0);
        pool.activate(1);
        assert_eq!(pool.find(), None);
    }

    #[test]
    fn retrieve_claims_and_marks_busy() {
        let pool = ChannelPool::new(1);
        assert_eq!(pool.retrieve(), Some(0));
        assert!(pool.busy());
        assert!(pool.is_active(0));
        assert_eq!(pool.retrieve(), None);
    }

    #[test]
    fn deactivate_clears_busy_when_active_empties() {
        let pool = ChannelPool::new(2);
        pool.activate(0);
        pool.activate(1);
        pool.deactivate(0);
        assert!(pool.busy());
        pool.deactivate(1);
        assert!(!pool.busy());
    }

    #[test]
    fn restore_honors_the_reserved_threshold() {
        let pool = ChannelPool::new(4);
        pool.set_reserved(2);
        pool.activate(1);
        pool.activate(3);
        pool.deactivate(1);
        pool.deactivate(3);
        pool.restore(1);
        pool.restore(3);

        assert!(pool.reserved_snapshot().contains(&1));
        assert!(pool.available_snapshot().contains(&3));
        assert_eq!(partition(&pool), (0..4).collect::<Vec<_>>());
    }

    #[test]
    fn restore_discards_ids_dropped_by_a_shrink() {
        let pool = ChannelPool::new(2);
        pool.retrieve();
        let claimed = pool.retrieve().unwrap();
        assert_eq!(claimed, 1);
        pool.set_capacity(1);

        // A caller that claimed the id before the shrink gives it back; it
        // must not re-enter circulation.
        pool.deactivate(claimed);
        pool.restore(claimed);
        assert!(!pool.available_snapshot().contains(&claimed));
        assert_eq!(partition(&pool), vec![0]);
    }

    #[test]
    fn shrink_clears_busy_when_it_empties_the_active_set() {
        let pool = ChannelPool::new(2);
        pool.activate(1);
        assert!(pool.busy());

        pool.set_capacity(1);
        assert!(!pool.busy());
        assert_eq!(partition(&pool), vec![0]);
    }

    #[test]
    fn restore_ignores_the_music_channel() {
        let pool = ChannelPool::new(2);
        pool.restore(-1);
        assert_eq!(partition(&pool), vec![0, 1]);
    }

    #[test]
    fn force_find_prefers_oldest_nonreserved() {
        let pool = ChannelPool::new(4);
        pool.set_reserved(2);
        pool.activate(0);
        pool.activate(2);
        pool.activate(3);
        assert_eq!(pool.force_find(), 2);
    }

    #[test]
    fn force_find_falls_back_to_reserved_then_zero() {
        let pool = ChannelPool::new(4);
        pool.set_reserved(2);
        pool.activate(1);
        pool.activate(0);
        assert_eq!(pool.force_find(), 1);

        let idle = ChannelPool::new(4);
        assert_eq!(idle.force_find(), 0);
    }

    #[test]
    fn force_find_skips_the_music_channel() {
        let pool = ChannelPool::new(2);
        pool.set_reserved(2);
        pool.activate(-1);
        pool.activate(1);
        assert_eq!(pool.force_find(), 1);
    }

    #[test]
    fn activate_never_duplicates_an_id() {
        let pool = ChannelPool::new(2);
        pool.activate(0);
        pool.activate(0);
        assert_eq!(pool.active_snapshot(), vec![0]);
        assert_eq!(partition(&pool), vec![0, 1]);
    }

    #[test]
    fn lifecycle_preserves_the_partition_invariant() {
        let pool = ChannelPool::new(5);
        pool.set_reserved(2);
        let id = pool.retrieve().unwrap();
        assert_eq!(partition(&pool), (0..5).collect::<Vec<_>>());

        pool.deactivate(id);
        pool.restore(id);
        assert_eq!(partition(&pool), (0..5).collect::<Vec<_>>());
        assert!(!pool.busy());
    }
}
