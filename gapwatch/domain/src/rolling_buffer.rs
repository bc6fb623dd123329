use serde::{Deserialize, Serialize};

/// Fixed-capacity ring buffer holding the most recent `capacity` items.
///
/// Storage is allocated once; pushing into a full buffer overwrites the
/// oldest item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    // index of the oldest item once the buffer is full
    cursor: usize,
}

impl<T: Clone> RollingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.data.len() < self.capacity {
            self.data.push(item);
        } else {
            self.data[self.cursor] = item;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.data.split_at(self.cursor);
        older.iter().chain(newer.iter())
    }

    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<&T> {
        if self.data.is_empty() {
            return None;
        }
        let last_idx = if self.cursor == 0 {
            self.data.len() - 1
        } else {
            self.cursor - 1
        };
        self.data.get(last_idx)
    }

    /// The newest `n` items, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<T> {
        let skip = self.data.len().saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}
