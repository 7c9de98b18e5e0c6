//! Visited-slot tracking for graph traversal.
//!
//! A [`VisitedSet`] stamps slots with the current generation instead of
//! clearing a bitmap, so starting a new traversal is O(1). One set per thread
//! is kept in a thread-local pool and handed out by [`with_visited`].

use std::cell::RefCell;

thread_local! {
    static VISITED_POOL: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Runs `f` with this thread's pooled visited set, sized for `capacity` slots.
///
/// `f` must not call `with_visited` again.
pub fn with_visited<R>(capacity: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    VISITED_POOL.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(capacity);
        f(&mut visited)
    })
}

/// Slot-indexed visited marks with a u16 generation stamp.
///
/// The backing array is only zeroed when the generation wraps (every 65534 clears).
#[derive(Debug)]
pub struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Starts a new traversal.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grows the mark array to cover `capacity` slots.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
    }

    /// Marks `id`. Returns `true` the first time `id` is seen in this traversal.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let mark = &mut self.marks[id as usize];
        if *mark == self.generation {
            false
        } else {
            *mark = self.generation;
            true
        }
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_clear() {
        let mut vs = VisitedSet::new(100);
        assert!(vs.insert(0));
        assert!(!vs.insert(0));
        assert!(vs.insert(50));

        vs.clear();
        assert!(vs.insert(0));
        assert!(!vs.insert(0));
        assert!(vs.insert(50));
    }

    #[test]
    fn test_generation_wraps() {
        let mut vs = VisitedSet::new(10);
        for _ in 0..65534 {
            vs.clear();
        }
        assert_eq!(vs.generation, u16::MAX);
        vs.insert(5);

        vs.clear();
        assert_eq!(vs.generation, 1);
        assert!(vs.insert(5));
    }

    #[test]
    fn test_pool_grows_on_demand() {
        with_visited(4, |vs| {
            vs.clear();
            assert!(vs.insert(3));
        });
        with_visited(1000, |vs| {
            vs.clear();
            assert!(vs.insert(999));
        });
    }
}
