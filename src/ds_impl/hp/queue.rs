use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;
use hazard::{Handle, HazardPointer};
use leaky::{AtomicTaggedPtr, TaggedPtr};

struct Node<T> {
    item: MaybeUninit<T>,
    next: AtomicTaggedPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            item: MaybeUninit::uninit(),
            next: AtomicTaggedPtr::null(),
        }
    }

    fn new(item: T) -> Self {
        Self {
            item: MaybeUninit::new(item),
            next: AtomicTaggedPtr::null(),
        }
    }
}

/// Michael-Scott queue whose dequeued sentinels are retired into a hazard pointer domain.
pub struct Queue<T: Send> {
    head: CachePadded<AtomicTaggedPtr<Node<T>>>,
    tail: CachePadded<AtomicTaggedPtr<Node<T>>>,
}

/// The two hazard pointers a queue operation needs, plus the handle that retires nodes.
pub struct Shields<'h, 'd> {
    handle: &'h Handle<'d>,
    pri: HazardPointer<'h>,
    sub: HazardPointer<'h>,
}

impl<'h, 'd> Shields<'h, 'd> {
    pub fn new(handle: &'h Handle<'d>) -> Result<Self, hazard::Error> {
        Ok(Self {
            handle,
            pri: handle.hazard_pointer()?,
            sub: handle.hazard_pointer()?,
        })
    }

    fn reset(&mut self) {
        self.pri.reset_protection();
        self.sub.reset_protection();
    }
}

impl<T: Send> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Queue<T> {
    #[inline]
    pub fn new() -> Self {
        let sentinel = TaggedPtr::new(Box::into_raw(Box::new(Node::sentinel())));
        Self {
            head: CachePadded::new(AtomicTaggedPtr::new(sentinel)),
            tail: CachePadded::new(AtomicTaggedPtr::new(sentinel)),
        }
    }

    #[inline]
    pub fn enqueue(&self, item: T, shields: &mut Shields) {
        let node = TaggedPtr::new(Box::into_raw(Box::new(Node::new(item))));
        loop {
            // A validated tail is never retired: `head` does not move past `tail`.
            let ltail = shields.pri.protect_tagged(&self.tail);
            let tail_ref = unsafe { ltail.deref() };
            let lnext = tail_ref.next.load(Ordering::Acquire);

            if !lnext.is_null() {
                let _ = self
                    .tail
                    .compare_exchange(ltail, lnext, Ordering::Release, Ordering::Relaxed);
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(lnext, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                let _ = self
                    .tail
                    .compare_exchange(ltail, node, Ordering::Release, Ordering::Relaxed);
                shields.reset();
                return;
            }
        }
    }

    #[inline]
    pub fn dequeue(&self, shields: &mut Shields) -> Option<T> {
        loop {
            let lhead = shields.pri.protect_tagged(&self.head);
            let lnext = unsafe { lhead.deref() }.next.load(Ordering::Acquire);
            if lnext.is_null() {
                shields.reset();
                return None;
            }

            shields.sub.protect_raw(lnext.as_raw());
            if self.head.load(Ordering::Acquire) != lhead {
                continue;
            }

            let ltail = self.tail.load(Ordering::Acquire);
            if ltail.as_raw() == lhead.as_raw() {
                let _ = self
                    .tail
                    .compare_exchange(ltail, lnext, Ordering::Release, Ordering::Relaxed);
                continue;
            }

            if self
                .head
                .compare_exchange(lhead, lnext, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                // `lnext` is the new sentinel; the CAS gave us its item.
                let item = unsafe { lnext.deref().item.assume_init_read() };
                shields.reset();
                unsafe { shields.handle.retire(lhead.as_raw()) };
                return Some(item);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}

impl<T: Send> Drop for Queue<T> {
    fn drop(&mut self) {
        unsafe {
            let sentinel = Box::from_raw(self.head.load(Ordering::Relaxed).as_raw());
            let mut cur = sentinel.next.load(Ordering::Relaxed).as_raw();
            while !cur.is_null() {
                let mut node = Box::from_raw(cur);
                node.item.assume_init_drop();
                cur = node.next.load(Ordering::Relaxed).as_raw();
            }
        }
    }
}
