use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering::*};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{scope, sleep};
use std::time::Duration;

use hazard::*;

#[test]
fn counter() {
    const THREADS: usize = 4;
    const ITER: usize = 1024 * 16;

    let domain = Domain::new();
    let count = AtomicPtr::new(Box::leak(Box::new(0usize)));
    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let handle = domain.handle();
                for _ in 0..ITER {
                    let mut new = Box::new(0);
                    let mut hp = handle.hazard_pointer().unwrap();
                    loop {
                        let cur_ptr = hp.protect(&count);
                        let value = unsafe { *cur_ptr };
                        *new = value + 1;
                        let new_ptr = Box::leak(new);
                        if count
                            .compare_exchange(cur_ptr, new_ptr, AcqRel, Acquire)
                            .is_ok()
                        {
                            unsafe { handle.retire(cur_ptr) };
                            break;
                        } else {
                            new = unsafe { Box::from_raw(new_ptr) };
                        }
                    }
                }
            });
        }
    });
    let cur = count.load(Acquire);
    // exclusive access
    assert_eq!(unsafe { *cur }, THREADS * ITER);
    unsafe { domain.handle().retire(cur) };
}

// like `counter`, but trigger interesting interleaving using `sleep` and always call
// `reclaim`.
#[test]
fn counter_sleep() {
    const THREADS: usize = 4;
    const ITER: usize = 1024 * 2;

    let domain = Domain::new();
    let count = AtomicPtr::new(Box::leak(Box::new(0usize)));
    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let handle = domain.handle();
                for _ in 0..ITER {
                    let mut new = Box::new(0);
                    let mut hp = handle.hazard_pointer().unwrap();
                    loop {
                        let cur_ptr = {
                            let mut cur = count.load(Relaxed);
                            loop {
                                match hp.try_protect(cur, &count) {
                                    Ok(_) => break cur,
                                    Err(new) => {
                                        sleep(Duration::from_micros(1));
                                        cur = new;
                                    }
                                }
                            }
                        };
                        sleep(Duration::from_micros(1));
                        let value = unsafe { *cur_ptr };
                        *new = value + 1;
                        let new_ptr = Box::leak(new);
                        if count
                            .compare_exchange(cur_ptr, new_ptr, AcqRel, Acquire)
                            .is_ok()
                        {
                            unsafe { handle.retire(cur_ptr) };
                            handle.flush();
                            handle.reclaim();
                            break;
                        } else {
                            new = unsafe { Box::from_raw(new_ptr) };
                        }
                    }
                }
            });
        }
    });
    let cur = count.load(Acquire);
    assert_eq!(unsafe { *cur }, THREADS * ITER);
    unsafe { drop(Box::from_raw(cur)) };
}

struct Node {
    value: usize,
    dead: AtomicBool,
}

/// Readers assert that a validated hazard never points at a reclaimed node. Reclamation only
/// marks nodes dead and parks them, so the check never touches freed memory.
#[test]
fn protected_address_is_never_reclaimed() {
    const WRITERS: usize = 2;
    const READERS: usize = 4;
    const ITER: usize = 1024 * 8;

    let domain = Domain::with_config(Config {
        flush_threshold: 4,
        reclaim_threshold: 8,
        ..Config::default()
    })
    .unwrap();
    let graveyard = Arc::new(Mutex::new(Vec::new()));
    let reclaimed = Arc::new(AtomicUsize::new(0));
    let shared = AtomicPtr::new(Box::into_raw(Box::new(Node {
        value: 0,
        dead: AtomicBool::new(false),
    })));
    let done = AtomicUsize::new(0);

    scope(|s| {
        for w in 0..WRITERS {
            let (domain, shared, done) = (&domain, &shared, &done);
            let graveyard = graveyard.clone();
            let reclaimed = reclaimed.clone();
            s.spawn(move || {
                let handle = domain.handle();
                for i in 0..ITER {
                    let new = Box::into_raw(Box::new(Node {
                        value: w * ITER + i,
                        dead: AtomicBool::new(false),
                    }));
                    let old = shared.swap(new, AcqRel);
                    let graveyard = graveyard.clone();
                    let reclaimed = reclaimed.clone();
                    unsafe {
                        handle.retire_with(old as *mut u8, move |p| {
                            (*(p as *mut Node)).dead.store(true, Release);
                            reclaimed.fetch_add(1, Relaxed);
                            graveyard.lock().unwrap().push(p as usize);
                        })
                    };
                }
                done.fetch_add(1, Release);
            });
        }
        for _ in 0..READERS {
            s.spawn(|| {
                let handle = domain.handle();
                let mut hp = handle.hazard_pointer().unwrap();
                while done.load(Acquire) < WRITERS {
                    let node = hp.protect(&shared);
                    let node = unsafe { &*node };
                    assert!(!node.dead.load(Acquire), "node {} reclaimed", node.value);
                    hp.reset_protection();
                }
            });
        }
    });

    assert!(reclaimed.load(Relaxed) > 0);
    drop(domain);
    assert_eq!(reclaimed.load(Relaxed), WRITERS * ITER);
    for p in graveyard.lock().unwrap().drain(..) {
        unsafe { drop(Box::from_raw(p as *mut Node)) };
    }
    unsafe { drop(Box::from_raw(shared.load(Relaxed))) };
}

#[test]
fn protected_entry_is_deferred() {
    let domain = Domain::new();
    let handle = domain.handle();
    let freed = Arc::new(AtomicUsize::new(0));

    let a = Box::into_raw(Box::new(1u64));
    let b = Box::into_raw(Box::new(2u64));
    let mut hp = handle.hazard_pointer().unwrap();
    hp.protect_raw(a);

    for p in [a, b] {
        let freed = freed.clone();
        unsafe {
            handle.retire_with(p as *mut u8, move |p| {
                drop(Box::from_raw(p as *mut u64));
                freed.fetch_add(1, Relaxed);
            })
        };
    }
    handle.flush();
    assert_eq!(domain.num_retired(), 2);
    assert_eq!(handle.reclaim(), Reclaimed::Done { freed: 1, deferred: 1 });
    assert_eq!(freed.load(Relaxed), 1);
    assert_eq!(domain.num_retired(), 1);

    hp.reset_protection();
    assert_eq!(handle.reclaim(), Reclaimed::Done { freed: 1, deferred: 0 });
    assert_eq!(freed.load(Relaxed), 2);
    assert_eq!(domain.num_retired(), 0);
}

#[test]
fn private_entries_wait_for_flush() {
    let domain = Domain::new();
    let handle = domain.handle();
    unsafe { handle.retire(Box::into_raw(Box::new([0u8; 32]))) };
    assert_eq!(domain.num_retired(), 1);
    assert_eq!(domain.reclaim(), Reclaimed::Done { freed: 0, deferred: 0 });
    handle.flush();
    assert_eq!(domain.reclaim(), Reclaimed::Done { freed: 1, deferred: 0 });
}

#[test]
fn threshold_triggers_reclamation() {
    let config = Config {
        flush_threshold: 8,
        reclaim_threshold: 16,
        ..Config::default()
    };
    let domain = Domain::with_config(config).unwrap();
    let handle = domain.handle();
    for i in 0..16u64 {
        unsafe { handle.retire(Box::into_raw(Box::new(i))) };
    }
    assert_eq!(domain.num_retired(), 0);
    unsafe { handle.retire(Box::into_raw(Box::new(16u64))) };
    assert_eq!(domain.num_retired(), 1);
}

#[test]
fn slots_are_bounded() {
    let domain = Domain::new();
    let handle = domain.handle();
    let first = handle.hazard_pointer().unwrap();
    let second = handle.hazard_pointer().unwrap();
    assert_eq!(
        handle.hazard_pointer().unwrap_err(),
        Error::SlotsExhausted { capacity: 2 }
    );
    drop(first);
    let third = handle.hazard_pointer().unwrap();
    drop((second, third));

    let domain = Domain::with_config(Config {
        slots_per_thread: 5,
        ..Config::default()
    })
    .unwrap();
    let handle = domain.handle();
    let hps: Vec<_> = (0..5).map(|_| handle.hazard_pointer().unwrap()).collect();
    assert!(handle.hazard_pointer().is_err());
    drop(hps);
}

#[test]
fn invalid_config_is_rejected() {
    let config = Config {
        flush_threshold: 0,
        ..Config::default()
    };
    assert!(matches!(
        Domain::with_config(config),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn concurrent_pass_is_skipped() {
    static INNER: AtomicUsize = AtomicUsize::new(usize::MAX);

    let domain: &'static Domain = Box::leak(Box::new(Domain::new()));
    let handle = domain.handle();
    unsafe {
        handle.retire_with(ptr::null_mut(), |_| {
            let outcome = domain.reclaim();
            INNER.store((outcome == Reclaimed::Skipped) as usize, SeqCst);
        })
    };
    handle.flush();
    assert_eq!(domain.reclaim(), Reclaimed::Done { freed: 1, deferred: 0 });
    assert_eq!(INNER.load(SeqCst), 1);

    // The flag is released once the pass ends.
    assert_eq!(domain.reclaim(), Reclaimed::Done { freed: 0, deferred: 0 });
}

#[test]
fn panicking_reclaim_keeps_unvisited_entries() {
    let domain = Domain::new();
    let handle = domain.handle();
    let ran = Arc::new(AtomicUsize::new(0));
    for i in 0..4 {
        let ran = ran.clone();
        unsafe {
            handle.retire_with(ptr::null_mut(), move |_| {
                if i == 2 {
                    panic!("reclaim action failed");
                }
                ran.fetch_add(1, SeqCst);
            })
        };
    }
    handle.flush();

    // The shared list runs newest first: 3 succeeds, 2 panics, 1 and 0 are never visited.
    assert!(panic::catch_unwind(AssertUnwindSafe(|| domain.reclaim())).is_err());
    assert_eq!(ran.load(SeqCst), 1);
    assert_eq!(domain.num_retired(), 2);

    assert_eq!(domain.reclaim(), Reclaimed::Done { freed: 2, deferred: 0 });
    assert_eq!(ran.load(SeqCst), 3);
    assert_eq!(domain.num_retired(), 0);
}

#[test]
fn unvisited_entries_survive_until_domain_drop() {
    let domain = Domain::new();
    let handle = domain.handle();
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let ran = ran.clone();
        unsafe {
            handle.retire_with(ptr::null_mut(), move |_| {
                ran.fetch_add(1, SeqCst);
            })
        };
    }
    unsafe { handle.retire_with(ptr::null_mut(), |_| panic!("reclaim action failed")) };
    handle.flush();

    assert!(panic::catch_unwind(AssertUnwindSafe(|| domain.reclaim())).is_err());
    assert_eq!(ran.load(SeqCst), 0);
    assert_eq!(domain.num_retired(), 3);
    drop(handle);
    drop(domain);
    assert_eq!(ran.load(SeqCst), 3);
}

#[test]
fn drop_runs_every_entry() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Domain::new();
    scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let handle = domain.handle();
                for _ in 0..100 {
                    unsafe { handle.retire(Box::into_raw(Box::new(Tracked(drops.clone())))) };
                }
            });
        }
    });
    let handle = domain.handle();
    for _ in 0..10 {
        unsafe { handle.retire(Box::into_raw(Box::new(Tracked(drops.clone())))) };
    }
    drop(handle);
    drop(domain);
    assert_eq!(drops.load(SeqCst), 410);
}

#[test]
fn tagged_protection_validates_tag() {
    use leaky::{AtomicTaggedPtr, TaggedPtr};

    let domain = Domain::new();
    let handle = domain.handle();
    let mut hp = handle.hazard_pointer().unwrap();

    let mut x = 3u32;
    let addr = &mut x as *mut u32;
    let src = AtomicTaggedPtr::new(TaggedPtr::with_tag(addr, 1));
    let stale = TaggedPtr::with_tag(addr, 0);
    assert_eq!(
        hp.try_protect_tagged(stale, &src),
        Err(TaggedPtr::with_tag(addr, 1))
    );
    let got = hp.protect_tagged(&src);
    assert_eq!(got.tag(), 1);
    assert_eq!(hp.hazard(), addr as *mut u8);
}
