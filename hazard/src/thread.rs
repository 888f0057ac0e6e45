use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use leaky::{List, Recycling};

use crate::domain::Domain;
use crate::error::Error;
use crate::hazard::{HazardPointer, HazardRecord};
use crate::retire::Retired;

pub(crate) type RetiredList = List<Retired, Arc<Recycling>>;

/// Per-thread state, registered in the domain on the thread's first [`Domain::handle`] call and
/// kept until the domain is dropped.
#[derive(Debug)]
pub(crate) struct Local {
    pub(crate) owner: ThreadId,
    /// Hazard records bound to this thread's slots, taken from the domain on first use.
    slots: Box<[AtomicPtr<HazardRecord>]>,
    /// Bit `i` is set while slot `i` backs a live `HazardPointer`.
    busy: AtomicUsize,
    pub(crate) retired: RetiredList,
    count: AtomicUsize,
    handles: AtomicUsize,
}

impl Local {
    pub(crate) fn new(owner: ThreadId, slots: usize, retired: RetiredList) -> Self {
        Self {
            owner,
            slots: (0..slots)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            busy: AtomicUsize::new(0),
            retired,
            count: AtomicUsize::new(0),
            handles: AtomicUsize::new(0),
        }
    }

    fn acquire_slot(&self) -> Option<usize> {
        let busy = self.busy.load(Ordering::Relaxed);
        let idx = (!busy).trailing_zeros() as usize;
        if idx >= self.slots.len() {
            return None;
        }
        // Only the owner sets bits; a guard dropped elsewhere may clear one concurrently.
        self.busy.fetch_or(1 << idx, Ordering::Relaxed);
        Some(idx)
    }

    pub(crate) fn release_slot(&self, idx: usize) {
        self.busy.fetch_and(!(1 << idx), Ordering::Relaxed);
    }

    fn record<'d>(&'d self, idx: usize, domain: &'d Domain) -> &'d HazardRecord {
        let slot = &self.slots[idx];
        if let Some(record) = unsafe { slot.load(Ordering::Relaxed).as_ref() } {
            return record;
        }
        let record = domain.acquire_record();
        slot.store(record as *const _ as *mut _, Ordering::Relaxed);
        record
    }

    /// Hands every bound record back to the domain.
    fn release_records(&self) {
        for slot in self.slots.iter() {
            let record = slot.swap(ptr::null_mut(), Ordering::Relaxed);
            if let Some(record) = unsafe { record.as_ref() } {
                record.release();
            }
        }
    }
}

/// A thread's access point to a [`Domain`].
///
/// Handles stay on the thread that created them. A thread may hold several at once; they share
/// the same slots and private retired list.
pub struct Handle<'d> {
    domain: &'d Domain,
    local: &'d Local,
    _marker: PhantomData<*const ()>,
}

impl<'d> Handle<'d> {
    pub(crate) fn new(domain: &'d Domain, local: &'d Local) -> Self {
        local.handles.fetch_add(1, Ordering::Relaxed);
        Self {
            domain,
            local,
            _marker: PhantomData,
        }
    }

    pub fn domain(&self) -> &'d Domain {
        self.domain
    }

    /// Takes a free hazard slot of this thread.
    pub fn hazard_pointer(&self) -> Result<HazardPointer<'_>, Error> {
        let idx = self.local.acquire_slot().ok_or(Error::SlotsExhausted {
            capacity: self.local.slots.len(),
        })?;
        let record = self.local.record(idx, self.domain);
        Ok(HazardPointer::new(record, self.local, idx))
    }

    /// Retires a pointer obtained from `Box::into_raw`.
    ///
    /// # Safety
    ///
    /// * `ptr` must already be unreachable from the shared structure it was unlinked from.
    /// * It must not be retired twice.
    /// * The box may be dropped on any thread.
    pub unsafe fn retire<T>(&self, ptr: *mut T) {
        self.push(Retired::new(ptr));
    }

    /// Retires `ptr` with a custom reclamation action, run once no hazard covers it.
    ///
    /// # Safety
    ///
    /// The first two requirements of [`Handle::retire`] apply.
    pub unsafe fn retire_with<F>(&self, ptr: *mut u8, f: F)
    where
        F: FnOnce(*mut u8) + Send + 'static,
    {
        self.push(Retired::with(ptr, f));
    }

    fn push(&self, retired: Retired) {
        self.local.retired.push_front(retired);
        self.domain.count_retired();

        let config = self.domain.config();
        let count = self.local.count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if count % config.flush_threshold == 0 {
            self.flush();
            if self.domain.num_retired() >= config.reclaim_threshold {
                self.domain.reclaim();
            }
        }
    }

    /// Moves this thread's private retired objects into the shared list.
    pub fn flush(&self) {
        if !self.local.retired.is_empty() {
            self.domain.publish(self.local.retired.take());
        }
    }

    /// Runs a reclamation pass. See [`Domain::reclaim`].
    pub fn reclaim(&self) -> crate::Reclaimed {
        self.domain.reclaim()
    }
}

impl Drop for Handle<'_> {
    fn drop(&mut self) {
        if self.local.handles.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.flush();
            self.local.release_records();
        }
    }
}
