use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::ptr;

use portable_atomic::{AtomicU128, Ordering};

thread_local! {
    static TAG_COUNTER: Cell<u64> = const { Cell::new(0) };
}

/// Draws the next generation from the calling thread's counter.
///
/// Tags are unique only within one thread's sequence; two threads may hand out the same value.
#[inline]
pub fn next_tag() -> u64 {
    TAG_COUNTER.with(|counter| {
        let tag = counter.get();
        counter.set(tag.wrapping_add(1));
        tag
    })
}

/// An address paired with a generation tag.
///
/// Two tagged pointers are equal only if both the address and the tag match, so a CAS operand that
/// was read before the address got recycled fails even though the raw address is the same.
pub struct TaggedPtr<T> {
    ptr: *mut T,
    tag: u64,
}

impl<T> TaggedPtr<T> {
    /// The null pointer with tag 0.
    #[inline]
    pub const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            tag: 0,
        }
    }

    /// Tags `ptr` with a fresh generation from the per-thread counter.
    #[inline]
    pub fn new(ptr: *mut T) -> Self {
        Self::with_tag(ptr, next_tag())
    }

    #[inline]
    pub const fn with_tag(ptr: *mut T, tag: u64) -> Self {
        Self { ptr, tag }
    }

    #[inline]
    pub fn as_raw(&self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// # Safety
    ///
    /// The address must point to a live `T`.
    #[inline]
    pub unsafe fn deref<'a>(&self) -> &'a T {
        &*self.ptr
    }

    /// # Safety
    ///
    /// The address must be null or point to a live `T`.
    #[inline]
    pub unsafe fn as_ref<'a>(&self) -> Option<&'a T> {
        self.ptr.as_ref()
    }
}

impl<T> Default for TaggedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for TaggedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPtr<T> {}

impl<T> PartialEq for TaggedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.tag == other.tag
    }
}

impl<T> Eq for TaggedPtr<T> {}

impl<T> fmt::Debug for TaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("ptr", &self.ptr)
            .field("tag", &self.tag)
            .finish()
    }
}

impl<T> fmt::Display for TaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:p}, {}>", self.ptr, self.tag)
    }
}

/// A [`TaggedPtr`] cell updated with a double-width compare-and-swap.
///
/// The address lives in the low 64 bits and the tag in the high 64 bits of one `u128`.
pub struct AtomicTaggedPtr<T> {
    link: AtomicU128,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T> Sync for AtomicTaggedPtr<T> {}
unsafe impl<T> Send for AtomicTaggedPtr<T> {}

impl<T> AtomicTaggedPtr<T> {
    #[inline]
    pub const fn null() -> Self {
        Self {
            link: AtomicU128::new(0),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn new(init: TaggedPtr<T>) -> Self {
        Self {
            link: AtomicU128::new(compose_u128(init)),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> TaggedPtr<T> {
        decompose_u128(self.link.load(order))
    }

    #[inline]
    pub fn store(&self, new: TaggedPtr<T>, order: Ordering) {
        self.link.store(compose_u128(new), order)
    }

    /// Replaces `current` with `new` if both the address and the tag still match.
    ///
    /// On failure the value actually found is returned.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.link
            .compare_exchange(compose_u128(current), compose_u128(new), success, failure)
            .map(decompose_u128)
            .map_err(decompose_u128)
    }
}

impl<T> Default for AtomicTaggedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for AtomicTaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}

#[inline]
fn compose_u128<T>(ptr: TaggedPtr<T>) -> u128 {
    ((ptr.tag as u128) << 64) | (ptr.ptr as usize as u128)
}

#[inline]
fn decompose_u128<T>(value: u128) -> TaggedPtr<T> {
    TaggedPtr {
        ptr: (value & (u64::MAX as u128)) as usize as *mut T,
        tag: (value >> 64) as u64,
    }
}
