//! Bounded staging buffer with flush-on-full-or-end semantics.
//!
//! Reconciliation stages one record per cache hit and writes staged records
//! in bulk. The buffer hands back a full batch as soon as it reaches
//! capacity and the remainder when the caller finishes a page.

/// Bounded buffer that yields batches of at most `capacity` items.
#[derive(Debug)]
pub struct BatchBuffer<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> BatchBuffer<T> {
    /// Create a buffer. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Items held before [`push`](Self::push) returns a full batch.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently staged.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Stage an item. Returns a full batch when capacity is reached.
    #[must_use = "a returned batch must be flushed"]
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Drain whatever is staged. `None` when nothing is pending.
    #[must_use = "a returned batch must be flushed"]
    pub fn flush(&mut self) -> Option<Vec<T>> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity))
    }
}
