extern crate leaky_smr;

use crossbeam_utils::thread::scope;
use rand::prelude::*;
use std::cmp::max;
use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Instant;

use hazard::Domain;
use leaky_smr::config::queue::{setup, Config, Perf, MM};
use leaky_smr::ds_impl::{hp, nr};

fn main() {
    let (config, output) = setup();
    println!("{}", config);
    let perf = match config.mm {
        MM::NR => bench_queue_nr(&config),
        MM::HP => bench_queue_hp(&config),
    };
    output.write_record(&config, &perf);
    println!("{}", perf);
}

/// Samples allocated bytes and the garbage count returned by `garbage` until the run ends.
fn sample<G>(config: &Config, barrier: &Barrier, garbage: G) -> (usize, usize, usize, usize)
where
    G: Fn() -> usize,
{
    let mut samples = 0usize;
    let mut acc = 0usize;
    let mut peak = 0usize;
    let mut garb_acc = 0usize;
    let mut garb_peak = 0usize;
    barrier.wait();

    let start = Instant::now();
    let mut next_sampling = start + config.sampling_period;
    while start.elapsed() < config.duration {
        let now = Instant::now();
        if now > next_sampling {
            let allocated = config.mem_sampler.sample();
            let garb = garbage();
            samples += 1;

            acc += allocated;
            peak = max(peak, allocated);
            garb_acc += garb;
            garb_peak = max(garb_peak, garb);

            next_sampling = now + config.sampling_period;
        }
        std::thread::sleep(config.aux_thread_period);
    }

    if config.sampling && samples > 0 {
        (peak, acc / samples, garb_peak, garb_acc / samples)
    } else {
        (0, 0, 0, 0)
    }
}

fn collect(
    config: &Config,
    ops_receiver: mpsc::Receiver<u64>,
    mem_receiver: mpsc::Receiver<(usize, usize, usize, usize)>,
) -> Perf {
    let mut ops = 0;
    for _ in 0..config.threads {
        let local_ops = ops_receiver.recv().unwrap();
        ops += local_ops;
    }
    let ops_per_sec = ops / config.interval.max(1);
    let (peak_mem, avg_mem, peak_garb, avg_garb) = mem_receiver.recv().unwrap();
    Perf {
        ops_per_sec,
        peak_mem,
        avg_mem,
        peak_garb,
        avg_garb,
    }
}

fn bench_queue_nr(config: &Config) -> Perf {
    let queue = &nr::Queue::new();
    let rng = &mut rand::thread_rng();
    for _ in 0..config.prefill {
        queue.enqueue(config.key_dist.sample(rng).to_string());
    }

    let barrier = &Arc::new(Barrier::new(config.threads + config.aux_thread));
    let (ops_sender, ops_receiver) = mpsc::channel();
    let (mem_sender, mem_receiver) = mpsc::channel();

    scope(|s| {
        // sampling thread
        if config.aux_thread > 0 {
            let mem_sender = mem_sender.clone();
            s.spawn(move |_| {
                mem_sender.send(sample(config, barrier, || 0)).unwrap();
            });
        } else {
            mem_sender.send((0, 0, 0, 0)).unwrap();
        }

        for _ in 0..config.threads {
            let ops_sender = ops_sender.clone();
            s.spawn(move |_| {
                let mut ops: u64 = 0;
                let rng = &mut rand::thread_rng();
                barrier.clone().wait();
                let start = Instant::now();

                while start.elapsed() < config.duration {
                    let item = config.key_dist.sample(rng).to_string();
                    queue.enqueue(item);
                    compiler_fence(Ordering::SeqCst);
                    queue.dequeue().unwrap();
                    compiler_fence(Ordering::SeqCst);

                    ops += 1;
                }
                ops_sender.send(ops).unwrap();
            });
        }
    })
    .unwrap();
    println!("end (arena holds {} bytes)", queue.allocated());

    collect(config, ops_receiver, mem_receiver)
}

fn bench_queue_hp(config: &Config) -> Perf {
    let domain = &Domain::with_config(config.domain).unwrap();
    let queue = &hp::Queue::new();
    {
        let handle = domain.handle();
        let shields = &mut hp::Shields::new(&handle).unwrap();
        let rng = &mut rand::thread_rng();
        for _ in 0..config.prefill {
            queue.enqueue(config.key_dist.sample(rng).to_string(), shields);
        }
    }

    let barrier = &Arc::new(Barrier::new(config.threads + config.aux_thread));
    let (ops_sender, ops_receiver) = mpsc::channel();
    let (mem_sender, mem_receiver) = mpsc::channel();

    scope(|s| {
        // sampling thread
        if config.aux_thread > 0 {
            let mem_sender = mem_sender.clone();
            s.spawn(move |_| {
                mem_sender
                    .send(sample(config, barrier, || domain.num_retired()))
                    .unwrap();
            });
        } else {
            mem_sender.send((0, 0, 0, 0)).unwrap();
        }

        for _ in 0..config.threads {
            let ops_sender = ops_sender.clone();
            s.spawn(move |_| {
                let mut ops: u64 = 0;
                let rng = &mut rand::thread_rng();
                let handle = domain.handle();
                let mut shields = hp::Shields::new(&handle).unwrap();
                barrier.clone().wait();
                let start = Instant::now();

                while start.elapsed() < config.duration {
                    let item = config.key_dist.sample(rng).to_string();
                    queue.enqueue(item, &mut shields);
                    compiler_fence(Ordering::SeqCst);
                    queue.dequeue(&mut shields).unwrap();
                    compiler_fence(Ordering::SeqCst);

                    ops += 1;
                }
                ops_sender.send(ops).unwrap();
            });
        }
    })
    .unwrap();
    println!("end ({} objects still retired)", domain.num_retired());

    collect(config, ops_receiver, mem_receiver)
}

