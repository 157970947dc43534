//! Bounded replay buffer for late subscribers

/// Keeps the most recent `capacity` emissions, oldest evicted first.
///
/// Not synchronized on its own; the hub only touches it under its state lock.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
    /// Circular buffer of items
    items: Vec<T>,

    /// Maximum capacity
    capacity: usize,

    /// Next write position once the buffer is full
    position: usize,
}

impl<T: Clone> ReplayBuffer<T> {
    /// Create new buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            position: 0,
        }
    }

    /// Record an item, overwriting the oldest one when full
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }

        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.position] = item;
        }

        self.position = (self.position + 1) % self.capacity;
    }

    /// Items in emission order, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        if self.items.len() < self.capacity {
            return self.items.clone();
        }

        let (newer, older) = self.items.split_at(self.position);
        older.iter().chain(newer.iter()).cloned().collect()
    }

    /// Drop every recorded item
    pub fn clear(&mut self) {
        self.items.clear();
        self.position = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
