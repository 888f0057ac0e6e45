use core::alloc::Layout;
use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

use crate::resource::{alloc_value, Global, MemoryResource};

/// A head-only lock-free list.
///
/// Nodes are only ever added at the front, and whole chains move between lists in one atomic step.
/// There is no way to unlink a single node, so a node's address stays valid until the chain that
/// holds it is consumed with [`IntoIterator`] or the list is dropped.
pub struct List<T, R: MemoryResource = Global> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    resource: R,
}

struct Node<T> {
    data: T,
    next: *mut Node<T>,
}

unsafe impl<T: Send, R: MemoryResource + Send> Send for List<T, R> {}
unsafe impl<T: Send + Sync, R: MemoryResource + Sync> Sync for List<T, R> {}

impl<T> List<T> {
    pub fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R: MemoryResource> List<T, R> {
    pub fn new_in(resource: R) -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            resource,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn push_front(&self, data: T) {
        self.emplace_front(|| data);
    }

    /// Builds a value with `f` in a fresh node, links it at the front, and returns its address.
    pub fn emplace_front<F>(&self, f: F) -> NonNull<T>
    where
        F: FnOnce() -> T,
    {
        let node = alloc_value(
            &self.resource,
            Node {
                data: f(),
                next: ptr::null_mut(),
            },
        );
        self.link(node.as_ptr(), node.as_ptr());
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*node.as_ptr()).data)) }
    }

    /// Links the chain `first ..= last` in front of the current head.
    fn link(&self, first: *mut Node<T>, last: *mut Node<T>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*last).next = head };
            match self
                .head
                .compare_exchange_weak(head, first, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(cur) => head = cur,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Detaches the whole chain and returns it as a new list on the same resource.
    ///
    /// A `push_front` racing with this call lands in exactly one of the two lists.
    pub fn take(&self) -> Self
    where
        R: Clone,
    {
        let head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        Self {
            head: CachePadded::new(AtomicPtr::new(head)),
            resource: self.resource.clone(),
        }
    }

    /// Detaches the chain of `other` and installs it as this list's chain.
    ///
    /// The values of the chain being replaced are dropped; their nodes stay with the resource.
    ///
    /// # Panics
    ///
    /// Panics if `other` allocates from a different resource than `self`.
    pub fn assign_from(&self, other: &Self) {
        assert!(
            self.resource.is_equal(&other.resource),
            "lists must share the same resource"
        );
        let head = other.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let old = self.head.swap(head, Ordering::AcqRel);
        unsafe { drop_chain(old) };
    }

    /// Splices the chain of `other` in front of this list's head with a single CAS.
    ///
    /// # Panics
    ///
    /// Panics if `other` allocates from a different resource than `self`.
    pub fn append(&self, other: Self) {
        assert!(
            self.resource.is_equal(&other.resource),
            "lists must share the same resource"
        );
        let first = other.head.swap(ptr::null_mut(), Ordering::Acquire);
        if first.is_null() {
            return;
        }

        let mut last = first;
        unsafe {
            while !(*last).next.is_null() {
                last = (*last).next;
            }
        }
        self.link(first, last);
    }

    /// Walks the chain from the current head.
    ///
    /// # Safety
    ///
    /// No chain observed by the iterator may be consumed (or have its list dropped) while the
    /// iterator is alive. Pushes racing with the walk are fine; they are simply not observed.
    pub unsafe fn iter(&self) -> Iter<'_, T> {
        Iter {
            cur: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }
}

unsafe fn drop_chain<T>(mut cur: *mut Node<T>) {
    while !cur.is_null() {
        let next = (*cur).next;
        ptr::drop_in_place(ptr::addr_of_mut!((*cur).data));
        cur = next;
    }
}

impl<T, R: MemoryResource> Drop for List<T, R> {
    fn drop(&mut self) {
        unsafe { drop_chain(*self.head.get_mut()) };
    }
}

impl<T, R: MemoryResource> fmt::Debug for List<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("head", &self.head.load(Ordering::Relaxed))
            .finish()
    }
}

pub struct Iter<'a, T> {
    cur: *const Node<T>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = unsafe { self.cur.as_ref() }?;
        self.cur = node.next;
        Some(&node.data)
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

/// Drains a list head first, handing each node's storage back to the resource.
pub struct IntoIter<T, R: MemoryResource = Global> {
    cur: *mut Node<T>,
    resource: R,
}

unsafe impl<T: Send, R: MemoryResource + Send> Send for IntoIter<T, R> {}

impl<T, R: MemoryResource> IntoIterator for List<T, R> {
    type Item = T;
    type IntoIter = IntoIter<T, R>;

    fn into_iter(self) -> Self::IntoIter {
        let mut list = ManuallyDrop::new(self);
        let cur = *list.head.get_mut();
        // `list` is never dropped, so the resource moves out exactly once.
        let resource = unsafe { ptr::read(&list.resource) };
        IntoIter { cur, resource }
    }
}

impl<T, R: MemoryResource> Iterator for IntoIter<T, R> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let node = NonNull::new(self.cur)?;
        unsafe {
            let Node { data, next } = ptr::read(node.as_ptr());
            self.cur = next;
            self.resource
                .deallocate(node.cast::<u8>(), Layout::new::<Node<T>>());
            Some(data)
        }
    }
}

impl<T, R: MemoryResource> FusedIterator for IntoIter<T, R> {}

impl<T, R: MemoryResource> Drop for IntoIter<T, R> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}
