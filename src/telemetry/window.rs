use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Fixed-capacity FIFO of the most recent items
///
/// Pushing into a full window evicts the oldest item, so `len()` never
/// exceeds `capacity()` and items stay in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow<T> {
    capacity: NonZeroUsize,
    items: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    pub const DEFAULT_CAPACITY: usize = 7;

    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.get()),
        }
    }

    /// Appends `item`, returning the evicted oldest item if the window was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity.get() {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity.get()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }
}

impl<T: Clone> RollingWindow<T> {
    /// Owned copy, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> Default for RollingWindow<T> {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(Self::DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}
