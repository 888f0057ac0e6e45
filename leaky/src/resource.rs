use core::alloc::Layout;
use core::fmt;
use core::ptr::{self, NonNull};
use std::alloc;
use std::sync::Arc;

/// An upstream resource could not hand out a block of `layout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory allocation of {} bytes (align {}) failed",
            self.layout.size(),
            self.layout.align()
        )
    }
}

impl std::error::Error for AllocError {}

/// A source of raw blocks that containers are parameterized by.
///
/// # Safety
///
/// `allocate` must return a block valid for `layout` that stays valid until it is passed back to
/// `deallocate` of an equal resource.
pub unsafe trait MemoryResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this resource (or one it `is_equal` to) with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Whether blocks from `self` may be returned to `other`. Identity unless overridden.
    fn is_equal(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

unsafe impl<R: MemoryResource> MemoryResource for &R {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }

    fn is_equal(&self, other: &Self) -> bool {
        (**self).is_equal(other)
    }
}

unsafe impl<R: MemoryResource> MemoryResource for Arc<R> {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }

    fn is_equal(&self, other: &Self) -> bool {
        (**self).is_equal(other)
    }
}

/// The process-wide allocator, i.e. whatever `#[global_allocator]` the binary installs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

unsafe impl MemoryResource for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            // Any non-null, aligned address is a valid zero-sized block.
            return Ok(unsafe { NonNull::new_unchecked(layout.align() as *mut u8) });
        }
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError::new(layout))
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            alloc::dealloc(ptr.as_ptr(), layout)
        }
    }

    fn is_equal(&self, _: &Self) -> bool {
        true
    }
}

/// Allocates one `T`-shaped block and moves `value` into it, aborting like `Box::new` on failure.
pub(crate) fn alloc_value<T, R: MemoryResource>(resource: &R, value: T) -> NonNull<T> {
    let layout = Layout::new::<T>();
    match resource.allocate(layout) {
        Ok(ptr) => {
            let ptr = ptr.cast::<T>();
            unsafe { ptr.as_ptr().write(value) };
            ptr
        }
        Err(_) => alloc::handle_alloc_error(layout),
    }
}
