use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::OnceLock;

use crate::monotonic::Monotonic;
use crate::queue::Queue;
use crate::resource::{AllocError, Global, MemoryResource};

/// Upper bound on the number of chunks kept for reuse.
pub const RECYCLE_CAPACITY: usize = 1024;

/// A pool of same-shaped blocks in front of an upstream resource.
///
/// Freed blocks are parked in a lock-free queue and handed out again before anything is requested
/// from upstream. The pool serves exactly one [`Layout`], fixed by [`Recycling::with_shape`] or by
/// the first request; blocks of any other shape pass straight through to upstream.
#[derive(Debug)]
pub struct Recycling<U: MemoryResource = Global> {
    recycle: Queue<Chunk, Monotonic>,
    shape: OnceLock<Layout>,
    upstream: U,
}

#[derive(Debug)]
struct Chunk(NonNull<u8>);

// A parked chunk is owned by the pool alone.
unsafe impl Send for Chunk {}

impl<U: MemoryResource> Recycling<U> {
    pub fn new(upstream: U) -> Self {
        Self {
            recycle: Queue::new_in(Monotonic::with_capacity(1024)),
            shape: OnceLock::new(),
            upstream,
        }
    }

    pub fn with_shape(upstream: U, shape: Layout) -> Self {
        let this = Self::new(upstream);
        let _ = this.shape.set(shape);
        this
    }

    /// The block shape served from the pool, once known.
    pub fn shape(&self) -> Option<Layout> {
        self.shape.get().copied()
    }

    /// Approximate number of parked chunks.
    pub fn pooled(&self) -> usize {
        self.recycle.len()
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    fn serves(&self, layout: Layout) -> bool {
        *self.shape.get_or_init(|| layout) == layout
    }
}

unsafe impl<U: MemoryResource> MemoryResource for Recycling<U> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if self.serves(layout) {
            if let Some(Chunk(block)) = self.recycle.pop() {
                return Ok(block);
            }
        }
        tracing::trace!(
            size = layout.size(),
            align = layout.align(),
            "recycle pool miss, allocating upstream"
        );
        self.upstream.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if self.serves(layout) && self.recycle.len() < RECYCLE_CAPACITY {
            self.recycle.push(Chunk(ptr));
            return;
        }
        tracing::trace!(
            size = layout.size(),
            align = layout.align(),
            "recycle pool full, returning block upstream"
        );
        self.upstream.deallocate(ptr, layout)
    }
}

impl<U: MemoryResource> Drop for Recycling<U> {
    fn drop(&mut self) {
        let Some(shape) = self.shape.get().copied() else {
            return;
        };
        while let Some(Chunk(block)) = self.recycle.pop() {
            unsafe { self.upstream.deallocate(block, shape) };
        }
    }
}
