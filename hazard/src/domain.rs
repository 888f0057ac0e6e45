use core::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use crossbeam_utils::CachePadded;
use leaky::{List, Monotonic, Recycling};
use scopeguard::{defer, guard};

use crate::config::Config;
use crate::error::Error;
use crate::hazard::HazardRecord;
use crate::thread::{Handle, Local, RetiredList};

/// Outcome of a reclamation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaimed {
    /// Another pass held the in-progress flag; nothing was examined.
    Skipped,
    Done {
        freed: usize,
        /// Entries still protected, carried over to the next pass.
        deferred: usize,
    },
}

/// Coordinates hazard records and retired objects for a set of threads.
///
/// Hazard records and per-thread state live in a bump arena and are never unlinked, so their
/// number is bounded by the peak number of threads (times the slot count) over the domain's life.
pub struct Domain {
    config: Config,
    hazards: List<HazardRecord, Arc<Recycling<Arc<Monotonic>>>>,
    threads: List<Local, Arc<Monotonic>>,
    retired: CachePadded<RetiredList>,
    leftovers: RetiredList,
    retired_nodes: CachePadded<AtomicUsize>,
    reclaiming: CachePadded<AtomicBool>,
    retired_alloc: Arc<Recycling>,
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl Domain {
    pub fn new() -> Self {
        Self::build(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let arena = Arc::new(Monotonic::with_capacity(4096));
        let record_alloc = Arc::new(Recycling::new(arena.clone()));
        let retired_alloc = Arc::new(Recycling::new(leaky::Global));
        Self {
            config,
            hazards: List::new_in(record_alloc),
            threads: List::new_in(arena),
            retired: CachePadded::new(List::new_in(retired_alloc.clone())),
            leftovers: List::new_in(retired_alloc.clone()),
            retired_nodes: CachePadded::new(AtomicUsize::new(0)),
            reclaiming: CachePadded::new(AtomicBool::new(false)),
            retired_alloc,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the calling thread's handle, registering the thread on first use.
    pub fn handle(&self) -> Handle<'_> {
        let id = thread::current().id();
        // The registry is only consumed on drop, which needs `&mut self`.
        let found = unsafe { self.threads.iter() }.find(|local| local.owner == id);
        let local = match found {
            Some(local) => local,
            None => {
                let local = self.threads.emplace_front(|| {
                    Local::new(
                        id,
                        self.config.slots_per_thread,
                        List::new_in(self.retired_alloc.clone()),
                    )
                });
                tracing::debug!(thread = ?id, "registered thread in hazard domain");
                unsafe { &*local.as_ptr() }
            }
        };
        Handle::new(self, local)
    }

    /// Number of retired objects not yet reclaimed, including those still in private lists.
    pub fn num_retired(&self) -> usize {
        self.retired_nodes.load(Ordering::Relaxed)
    }

    pub(crate) fn count_retired(&self) {
        self.retired_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn publish(&self, batch: RetiredList) {
        self.retired.append(batch);
    }

    /// Takes over an inactive record, or creates a new one.
    pub(crate) fn acquire_record(&self) -> &HazardRecord {
        for record in unsafe { self.hazards.iter() } {
            if !record.active.load(Ordering::Relaxed)
                && record
                    .active
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return record;
            }
        }
        let record = self.hazards.emplace_front(HazardRecord::active);
        unsafe { &*record.as_ptr() }
    }

    fn collect_guarded_ptrs(&self) -> HashSet<*mut u8> {
        unsafe { self.hazards.iter() }
            .map(|record| record.hazard.load(Ordering::Acquire))
            .filter(|hazard| !hazard.is_null())
            .collect()
    }

    /// Frees every retired object in the shared list and the leftovers that no hazard covers.
    ///
    /// Objects still in some thread's private list are not examined. Returns
    /// [`Reclaimed::Skipped`] if another pass is running.
    pub fn reclaim(&self) -> Reclaimed {
        if self
            .reclaiming
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Reclaimed::Skipped;
        }
        defer! {
            self.reclaiming.store(false, Ordering::Release);
        }

        let leftovers = self.leftovers.take();
        let retired = self.retired.take();
        fence(Ordering::SeqCst);

        let guarded_ptrs = self.collect_guarded_ptrs();
        // On a panicking reclaim action, unvisited entries go back to the leftovers and every
        // consumed entry still leaves the count.
        let mut pass = guard(
            (leftovers.into_iter().chain(retired), 0usize),
            |(rest, consumed)| {
                for entry in rest {
                    self.leftovers.push_front(entry);
                }
                self.retired_nodes.fetch_sub(consumed, Ordering::Relaxed);
            },
        );
        let mut deferred = 0;
        while let Some(entry) = pass.0.next() {
            if guarded_ptrs.contains(&entry.ptr) {
                self.leftovers.push_front(entry);
                deferred += 1;
            } else {
                pass.1 += 1;
                unsafe { entry.reclaim() };
            }
        }
        let freed = pass.1;
        drop(pass);
        tracing::debug!(freed, deferred, "hazard domain reclamation pass");
        Reclaimed::Done { freed, deferred }
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        // Every handle borrowed the domain, so nothing is protected any more.
        let mut remaining = self.leftovers.take();
        remaining.append(self.retired.take());
        for local in unsafe { self.threads.iter() } {
            remaining.append(local.retired.take());
        }
        for entry in remaining {
            unsafe { entry.reclaim() };
        }
    }
}
