//! Michael-Scott lock-free queue that never frees the nodes it unlinks.
//!
//! Usable with any number of producers and consumers.
//!
//! Michael and Scott.  Simple, Fast, and Practical Non-Blocking and Blocking Concurrent Queue
//! Algorithms.  PODC 1996.  http://dl.acm.org/citation.cfm?id=248106

use core::fmt;
use core::mem::MaybeUninit;
use core::sync::atomic::AtomicIsize;

use crossbeam_utils::CachePadded;
use portable_atomic::Ordering::{Acquire, Relaxed, Release};

use crate::resource::{alloc_value, Global, MemoryResource};
use crate::tagged::{AtomicTaggedPtr, TaggedPtr};

// The representation here is a singly-linked list, with a sentinel node at the front. In general
// the `tail` pointer may lag behind the actual tail. A popped node becomes the new sentinel and
// the old sentinel is simply dropped from the structure; its storage stays with the resource.
pub struct Queue<T, R: MemoryResource = Global> {
    head: CachePadded<AtomicTaggedPtr<Node<T>>>,
    tail: CachePadded<AtomicTaggedPtr<Node<T>>>,
    size: CachePadded<AtomicIsize>,
    resource: R,
}

struct Node<T> {
    /// The slot in which a value of type `T` can be stored.
    ///
    /// The sentinel never holds a value. Any other node holds one from its push until the pop that
    /// turns it into the sentinel moves the value out.
    data: MaybeUninit<T>,

    next: AtomicTaggedPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            data: MaybeUninit::uninit(),
            next: AtomicTaggedPtr::null(),
        }
    }
}

// Any particular `T` should never be accessed concurrently, so no need for `T: Sync`.
unsafe impl<T: Send, R: MemoryResource + Send> Send for Queue<T, R> {}
unsafe impl<T: Send, R: MemoryResource + Sync> Sync for Queue<T, R> {}

impl<T> Queue<T> {
    /// Creates a new, empty queue on the global allocator.
    pub fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R: MemoryResource> Queue<T, R> {
    /// Creates a new, empty queue whose nodes come from `resource`.
    pub fn new_in(resource: R) -> Self {
        let sentinel = TaggedPtr::new(alloc_value(&resource, Node::sentinel()).as_ptr());
        Self {
            head: CachePadded::new(AtomicTaggedPtr::new(sentinel)),
            tail: CachePadded::new(AtomicTaggedPtr::new(sentinel)),
            size: CachePadded::new(AtomicIsize::new(0)),
            resource,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Adds `t` to the back of the queue.
    ///
    /// Aborts through `handle_alloc_error` if the resource cannot provide a node.
    pub fn push(&self, t: T) {
        let node = alloc_value(&self.resource, Node::sentinel());
        unsafe { (*node.as_ptr()).data = MaybeUninit::new(t) };
        let new = TaggedPtr::new(node.as_ptr());

        loop {
            // We push onto the tail, so we'll start optimistically by looking there first.
            let tail = self.tail.load(Acquire);
            let next = unsafe { tail.deref() }.next.load(Acquire);
            if tail != self.tail.load(Acquire) {
                continue;
            }

            if !next.is_null() {
                // `tail` is lagging behind the actual end; help it forward and retry.
                let _ = self.tail.compare_exchange(tail, next, Release, Relaxed);
                continue;
            }

            if unsafe { tail.deref() }
                .next
                .compare_exchange(next, new, Release, Relaxed)
                .is_ok()
            {
                // A failure here means someone else already swung the tail for us.
                let _ = self.tail.compare_exchange(tail, new, Release, Relaxed);
                self.size.fetch_add(1, Relaxed);
                return;
            }
        }
    }

    /// Attempts to dequeue from the front.
    ///
    /// Returns `None` if the queue is observed to be empty.
    pub fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Acquire);
            let tail = self.tail.load(Acquire);
            let next = unsafe { head.deref() }.next.load(Acquire);
            if head != self.head.load(Acquire) {
                continue;
            }

            if next.is_null() {
                return None;
            }

            if head.as_raw() == tail.as_raw() {
                let _ = self.tail.compare_exchange(tail, next, Release, Relaxed);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Release, Relaxed)
                .is_ok()
            {
                // `next` is the new sentinel, and its value was claimed by the CAS above.
                let data = unsafe { next.deref().data.assume_init_read() };
                self.size.fetch_sub(1, Relaxed);
                return Some(data);
            }
        }
    }

    /// Snapshot of `head == tail`. Advisory only while other threads are operating.
    pub fn is_empty(&self) -> bool {
        self.head.load(Acquire) == self.tail.load(Acquire)
    }

    /// Approximate number of elements.
    ///
    /// The counter is updated after the linking CAS, so concurrent callers may observe a value that
    /// briefly disagrees with the structure.
    pub fn len(&self) -> usize {
        self.size.load(Relaxed).max(0) as usize
    }
}

impl<T, R: MemoryResource> Drop for Queue<T, R> {
    fn drop(&mut self) {
        // Only the values are dropped; node storage stays with the resource.
        while self.pop().is_some() {}
    }
}

impl<T, R: MemoryResource> fmt::Debug for Queue<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("head", &*self.head)
            .field("tail", &*self.tail)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::monotonic::Monotonic;
    use crossbeam_utils::thread;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CONC_COUNT: i64 = 100_000;

    #[test]
    fn push_pop_1() {
        let q: Queue<i64> = Queue::new();
        assert!(q.is_empty());
        q.push(37);
        assert!(!q.is_empty());
        assert_eq!(q.pop(), Some(37));
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_pop_2() {
        let q: Queue<i64> = Queue::new();
        q.push(37);
        q.push(48);
        assert_eq!(q.pop(), Some(37));
        assert!(!q.is_empty());
        assert_eq!(q.pop(), Some(48));
        assert!(q.is_empty());
    }

    #[test]
    fn push_pop_many_seq_tracks_len() {
        let q: Queue<i64> = Queue::new();
        assert_eq!(q.len(), 0);
        for i in 0..200 {
            q.push(i);
            assert_eq!(q.len(), i as usize + 1);
        }
        for i in 0..150 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.len(), 50);
        for i in 150..200 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.len(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn interleaved_seq() {
        let q: Queue<String> = Queue::new();
        let mut expected = std::collections::VecDeque::new();
        for i in 0..1000 {
            if i % 3 == 2 {
                assert_eq!(q.pop(), expected.pop_front());
            } else {
                q.push(i.to_string());
                expected.push_back(i.to_string());
            }
            assert_eq!(q.len(), expected.len());
        }
    }

    #[test]
    fn drop_releases_values() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let q = Queue::new_in(Monotonic::new());
            for _ in 0..10 {
                q.push(Tracked(drops.clone()));
            }
            drop(q.pop());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn push_pop_many_spsc() {
        let q: Queue<i64> = Queue::new();

        thread::scope(|scope| {
            scope.spawn(|_| {
                let mut next = 0;
                while next < CONC_COUNT {
                    if let Some(elem) = q.pop() {
                        assert_eq!(elem, next);
                        next += 1;
                    }
                }
            });

            for i in 0..CONC_COUNT {
                q.push(i)
            }
        })
        .unwrap();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn push_pop_many_mpmc() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 20_000;

        let q: Queue<usize> = Queue::new();
        let popped = AtomicUsize::new(0);

        let results = thread::scope(|scope| {
            for t in 0..PRODUCERS {
                let q = &q;
                scope.spawn(move |_| {
                    for i in 0..PER_PRODUCER {
                        q.push(t * PER_PRODUCER + i);
                    }
                });
            }

            let consumers: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    scope.spawn(|_| {
                        let mut got = Vec::new();
                        while popped.load(Ordering::Relaxed) < PRODUCERS * PER_PRODUCER {
                            if let Some(v) = q.pop() {
                                popped.fetch_add(1, Ordering::Relaxed);
                                got.push(v);
                            }
                        }
                        got
                    })
                })
                .collect();
            consumers
                .into_iter()
                .map(|c| c.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        let mut seen = vec![false; PRODUCERS * PER_PRODUCER];
        for got in results {
            // Values from one producer come out in the order it pushed them.
            let mut last = vec![None; PRODUCERS];
            for v in got {
                assert!(!seen[v], "{} popped twice", v);
                seen[v] = true;
                let producer = v / PER_PRODUCER;
                assert!(last[producer].map_or(true, |l| l < v));
                last[producer] = Some(v);
            }
        }
        assert!(seen.iter().all(|s| *s));
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }
}
