use leaky::Monotonic;

/// The non-reclaiming queue with its nodes carved from a private arena.
///
/// Dequeued nodes are never reused; the arena hands all of them back when the queue is dropped.
pub struct Queue<T: Send> {
    inner: leaky::Queue<T, Monotonic>,
}

impl<T: Send> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Queue<T> {
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: leaky::Queue::new_in(Monotonic::new()),
        }
    }

    #[inline]
    pub fn enqueue(&self, item: T) {
        self.inner.push(item);
    }

    #[inline]
    pub fn dequeue(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Bytes the arena holds, including every node ever dequeued.
    pub fn allocated(&self) -> usize {
        self.inner.resource().allocated()
    }
}
