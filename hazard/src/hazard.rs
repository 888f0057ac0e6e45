use core::ptr;
use core::sync::atomic::{fence, AtomicBool, AtomicPtr, Ordering};

use leaky::{AtomicTaggedPtr, TaggedPtr};

use crate::thread::Local;

/// A published address. Records are never unlinked; an inactive one can be taken over by any
/// thread.
#[derive(Debug)]
pub(crate) struct HazardRecord {
    pub(crate) hazard: AtomicPtr<u8>,
    pub(crate) active: AtomicBool,
}

impl HazardRecord {
    pub(crate) fn active() -> Self {
        Self {
            hazard: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(true),
        }
    }

    /// Marks the record free for the next thread that needs one.
    pub(crate) fn release(&self) {
        self.hazard.store(ptr::null_mut(), Ordering::Release);
        self.active.store(false, Ordering::Release);
    }
}

/// One of the calling thread's hazard slots, obtained with [`crate::Handle::hazard_pointer`].
#[derive(Debug)]
pub struct HazardPointer<'h> {
    record: &'h HazardRecord,
    local: &'h Local,
    idx: usize,
}

impl<'h> HazardPointer<'h> {
    pub(crate) fn new(record: &'h HazardRecord, local: &'h Local, idx: usize) -> Self {
        Self { record, local, idx }
    }

    /// Protect the given address.
    ///
    /// The protection is only meaningful if the address was still reachable after it was
    /// published, so prefer [`HazardPointer::try_protect`] and friends, which check exactly that.
    pub fn protect_raw<T>(&mut self, ptr: *mut T) {
        self.record.hazard.store(ptr as *mut u8, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Release the protection awarded by this hazard pointer, if any.
    pub fn reset_protection(&mut self) {
        self.record.hazard.store(ptr::null_mut(), Ordering::Release);
    }

    /// The currently published address.
    pub fn hazard(&self) -> *mut u8 {
        self.record.hazard.load(Ordering::Relaxed)
    }

    /// Try protecting `pointer` obtained from `src`. If `src` moved on, returns the current value.
    ///
    /// If "`src` still points to `pointer`" implies that `pointer` is not retired, then `Ok(())`
    /// means that the object is safe to dereference until the protection is reset.
    pub fn try_protect<T>(&mut self, pointer: *mut T, src: &AtomicPtr<T>) -> Result<(), *mut T> {
        self.protect_raw(pointer);
        let new = src.load(Ordering::Acquire);
        if pointer == new {
            Ok(())
        } else {
            Err(new)
        }
    }

    /// Get a protected pointer from `src`.
    ///
    /// See `try_protect()`.
    pub fn protect<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        let mut pointer = src.load(Ordering::Relaxed);
        while let Err(new) = self.try_protect(pointer, src) {
            pointer = new;
        }
        pointer
    }

    /// Like [`HazardPointer::try_protect`], validating the address together with its tag.
    pub fn try_protect_tagged<T>(
        &mut self,
        pointer: TaggedPtr<T>,
        src: &AtomicTaggedPtr<T>,
    ) -> Result<(), TaggedPtr<T>> {
        self.protect_raw(pointer.as_raw());
        let new = src.load(Ordering::Acquire);
        if pointer == new {
            Ok(())
        } else {
            Err(new)
        }
    }

    pub fn protect_tagged<T>(&mut self, src: &AtomicTaggedPtr<T>) -> TaggedPtr<T> {
        let mut pointer = src.load(Ordering::Relaxed);
        while let Err(new) = self.try_protect_tagged(pointer, src) {
            pointer = new;
        }
        pointer
    }
}

impl Drop for HazardPointer<'_> {
    fn drop(&mut self) {
        self.reset_protection();
        self.local.release_slot(self.idx);
    }
}
