use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::resource::{AllocError, Global, MemoryResource};

const CHUNK_ALIGN: usize = 16;
const MAX_CHUNK_SIZE: usize = 1 << 20;

/// A thread-safe bump arena.
///
/// Blocks are carved out of upstream chunks with a CAS on the chunk's bump offset; `deallocate` is
/// a no-op and everything goes back upstream at once on [`Monotonic::release`] or drop. Chunk sizes
/// double up to 1 MiB.
#[derive(Debug)]
pub struct Monotonic<U: MemoryResource = Global> {
    current: CachePadded<AtomicPtr<Chunk>>,
    next_size: AtomicUsize,
    allocated: AtomicUsize,
    upstream: U,
}

#[derive(Debug)]
struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
    used: AtomicUsize,
    prev: *mut Chunk,
}

impl Chunk {
    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.base.as_ptr() as usize;
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let start = (base + used + layout.align() - 1) & !(layout.align() - 1);
            let offset = start - base;
            let next = offset.checked_add(layout.size())?;
            if next > self.layout.size() {
                return None;
            }
            match self
                .used
                .compare_exchange_weak(used, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return NonNull::new(self.base.as_ptr().wrapping_add(offset)),
                Err(cur) => used = cur,
            }
        }
    }
}

impl Monotonic<Global> {
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(initial: usize) -> Self {
        Self::with_capacity_in(initial, Global)
    }
}

impl Default for Monotonic<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: MemoryResource> Monotonic<U> {
    /// Creates an empty arena whose first chunk will hold at least `initial` bytes.
    pub fn with_capacity_in(initial: usize, upstream: U) -> Self {
        Self {
            current: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            next_size: AtomicUsize::new(initial.clamp(CHUNK_ALIGN, MAX_CHUNK_SIZE)),
            allocated: AtomicUsize::new(0),
            upstream,
        }
    }

    /// Bytes currently held from upstream.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Returns every chunk upstream. All blocks handed out so far become dangling.
    pub fn release(&mut self) {
        let mut cur = self.current.swap(ptr::null_mut(), Ordering::Acquire);
        while !cur.is_null() {
            let chunk = unsafe { Box::from_raw(cur) };
            unsafe { self.upstream.deallocate(chunk.base, chunk.layout) };
            cur = chunk.prev;
        }
        self.allocated.store(0, Ordering::Relaxed);
    }

    fn grow(&self, seen: *mut Chunk, layout: Layout) -> Result<(), AllocError> {
        let size = self
            .next_size
            .load(Ordering::Relaxed)
            .max(layout.size().saturating_add(layout.align()));
        let chunk_layout =
            Layout::from_size_align(size, CHUNK_ALIGN).map_err(|_| AllocError::new(layout))?;
        let base = self.upstream.allocate(chunk_layout)?;
        let new = Box::into_raw(Box::new(Chunk {
            base,
            layout: chunk_layout,
            used: AtomicUsize::new(0),
            prev: seen,
        }));

        match self
            .current
            .compare_exchange(seen, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.allocated.fetch_add(size, Ordering::Relaxed);
                self.next_size
                    .fetch_max(size.saturating_mul(2).min(MAX_CHUNK_SIZE), Ordering::Relaxed);
                tracing::trace!(size, "monotonic arena grew");
            }
            Err(_) => {
                // Another thread installed a chunk first; ours was never shared.
                let new = unsafe { Box::from_raw(new) };
                unsafe { self.upstream.deallocate(new.base, new.layout) };
            }
        }
        Ok(())
    }
}

unsafe impl<U: MemoryResource> MemoryResource for Monotonic<U> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        loop {
            let chunk = self.current.load(Ordering::Acquire);
            if let Some(chunk_ref) = unsafe { chunk.as_ref() } {
                if let Some(block) = chunk_ref.bump(layout) {
                    return Ok(block);
                }
            }
            self.grow(chunk, layout)?;
        }
    }

    #[inline]
    unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {}
}

impl<U: MemoryResource> Drop for Monotonic<U> {
    fn drop(&mut self) {
        self.release();
    }
}
