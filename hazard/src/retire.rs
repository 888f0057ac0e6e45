/// An object unlinked from a shared structure, waiting until no hazard covers it.
pub(crate) struct Retired {
    pub(crate) ptr: *mut u8,
    reclaim: Reclaim,
}

enum Reclaim {
    Free(unsafe fn(*mut u8)),
    With(Box<dyn FnOnce(*mut u8) + Send>),
}

// Entries move between lists and threads but are never accessed through a shared reference from
// two threads at once.
unsafe impl Send for Retired {}
unsafe impl Sync for Retired {}

impl Retired {
    pub(crate) fn new<T>(ptr: *mut T) -> Self {
        Self {
            ptr: ptr as *mut u8,
            reclaim: Reclaim::Free(free::<T>),
        }
    }

    pub(crate) fn with<F>(ptr: *mut u8, f: F) -> Self
    where
        F: FnOnce(*mut u8) + Send + 'static,
    {
        Self {
            ptr,
            reclaim: Reclaim::With(Box::new(f)),
        }
    }

    /// # Safety
    ///
    /// No thread may still access the object.
    pub(crate) unsafe fn reclaim(self) {
        match self.reclaim {
            Reclaim::Free(deleter) => deleter(self.ptr),
            Reclaim::With(f) => f(self.ptr),
        }
    }
}

unsafe fn free<T>(ptr: *mut u8) {
    drop(Box::from_raw(ptr as *mut T))
}
