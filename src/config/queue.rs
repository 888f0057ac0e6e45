use crate::MemSampler;
use clap::{value_parser, Arg, ArgAction, Command, ValueEnum};
use csv::Writer;
use rand::distributions::Uniform;
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::time::Duration;

#[derive(PartialEq, Debug, ValueEnum, Clone, Copy)]
pub enum MM {
    /// The raw queue; unlinked nodes stay in its arena until the queue is dropped.
    NR,
    /// Michael-Scott queue retiring unlinked nodes into a hazard pointer domain.
    HP,
}

pub struct Config {
    pub mm: MM,
    pub threads: usize,

    pub aux_thread: usize,
    pub aux_thread_period: Duration,
    pub sampling: bool,
    pub sampling_period: Duration,

    pub key_dist: Uniform<usize>,
    pub prefill: usize,
    pub interval: u64,
    pub duration: Duration,
    pub domain: hazard::Config,

    pub mem_sampler: MemSampler,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} threads, prefill {}, flush {}, reclaim {}",
            self.mm.to_possible_value().unwrap().get_name(),
            self.threads,
            self.prefill,
            self.domain.flush_threshold,
            self.domain.reclaim_threshold,
        )
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

#[derive(Clone, Default)]
pub struct Perf {
    pub ops_per_sec: u64,
    pub peak_mem: usize,
    pub avg_mem: usize,
    pub peak_garb: usize,
    pub avg_garb: usize,
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops/s: {}, peak mem: {}, avg_mem: {}, peak garb: {}, avg garb: {}",
            self.ops_per_sec,
            readable_bytes(self.peak_mem),
            readable_bytes(self.avg_mem),
            self.peak_garb,
            self.avg_garb
        )
    }
}

fn readable_bytes(num: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    for (i, unit) in UNITS.iter().enumerate() {
        if num / 2usize.pow(i as u32 * 10) < 1000 {
            return format!("{:.3} {}", num as f64 / 2f64.powf(i as f64 * 10.0), unit);
        }
    }
    format!(
        "{:.3} {}",
        num as f64 / 2f64.powf((UNITS.len() - 1) as f64 * 10.0),
        UNITS.last().unwrap()
    )
}

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) {
        if let Some(mut output) = self.output {
            output
                .write_record(&[
                    config
                        .mm
                        .to_possible_value()
                        .unwrap()
                        .get_name()
                        .to_string(),
                    config.threads.to_string(),
                    config.prefill.to_string(),
                    config.domain.flush_threshold.to_string(),
                    config.domain.reclaim_threshold.to_string(),
                    config.sampling_period.as_millis().to_string(),
                    perf.ops_per_sec.to_string(),
                    perf.peak_mem.to_string(),
                    perf.avg_mem.to_string(),
                    perf.peak_garb.to_string(),
                    perf.avg_garb.to_string(),
                    config.interval.to_string(),
                ])
                .unwrap();
            output.flush().unwrap();
        }
    }
}

fn command() -> Command {
    Command::new("queue")
        .arg(
            Arg::new("memory manager")
                .short('m')
                .value_parser(value_parser!(MM))
                .required(true)
                .ignore_case(true)
                .help("Memory manager"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .value_parser(value_parser!(usize))
                .required(true)
                .help("Numbers of threads which perform enqueue and dequeue."),
        )
        .arg(
            Arg::new("prefill")
                .short('p')
                .value_parser(value_parser!(usize))
                .help("Number of items enqueued before the measurement starts")
                .default_value("0"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .value_parser(value_parser!(u64))
                .help("Time interval in seconds to run the benchmark")
                .default_value("10"),
        )
        .arg(
            Arg::new("sampling period")
                .short('s')
                .value_parser(value_parser!(u64))
                .help(
                    "The period to query jemalloc stats.allocated (ms). 0 for no sampling. \
                     Only supported on linux.",
                )
                .default_value("1"),
        )
        .arg(
            Arg::new("flush threshold")
                .short('f')
                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..))
                .help("Retirements between two flushes of a thread's retired list (HP only)")
                .default_value("64"),
        )
        .arg(
            Arg::new("reclaim threshold")
                .short('r')
                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..))
                .help("Retired-object count that triggers a reclamation pass (HP only)")
                .default_value("128"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn setup() -> (Config, BenchWriter) {
    let m = command().get_matches();

    let mm = m.get_one::<MM>("memory manager").copied().unwrap();
    let threads = m.get_one::<usize>("threads").copied().unwrap();
    assert!(
        threads >= 1,
        "The number of threads must be greater than zero!"
    );
    let prefill = m.get_one::<usize>("prefill").copied().unwrap();
    let interval = m.get_one::<u64>("interval").copied().unwrap();
    let sampling_period = m.get_one::<u64>("sampling period").copied().unwrap();
    let sampling = sampling_period > 0 && cfg!(all(not(feature = "sanitize"), target_os = "linux"));
    let duration = Duration::from_secs(interval);

    let domain = hazard::Config {
        flush_threshold: m.get_one::<usize>("flush threshold").copied().unwrap(),
        reclaim_threshold: m.get_one::<usize>("reclaim threshold").copied().unwrap(),
        ..hazard::Config::default()
    };
    if let Err(e) = domain.validate() {
        panic!("{}", e);
    }

    let output = m.get_one::<String>("output").map(|output_name| {
        let output_path = Path::new(output_name);
        if let Some(dir) = output_path.parent() {
            create_dir_all(dir).unwrap();
        }
        match OpenOptions::new().read(true).append(true).open(output_path) {
            Ok(f) => csv::Writer::from_writer(f),
            Err(_) => {
                let f = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(output_path)
                    .unwrap();
                let mut output = csv::Writer::from_writer(f);
                // NOTE: `write_record` on `bench`
                output
                    .write_record([
                        "mm",
                        "threads",
                        "prefill",
                        "flush_threshold",
                        "reclaim_threshold",
                        "sampling_period",
                        "throughput",
                        "peak_mem",
                        "avg_mem",
                        "peak_garb",
                        "avg_garb",
                        "interval",
                    ])
                    .unwrap();
                output.flush().unwrap();
                output
            }
        }
    });
    let mem_sampler = MemSampler::new();
    let config = Config {
        mm,
        threads,

        aux_thread: if sampling { 1 } else { 0 },
        aux_thread_period: Duration::from_millis(1),
        sampling,
        sampling_period: Duration::from_millis(sampling_period),

        key_dist: Uniform::from(0..100000),
        prefill,
        interval,
        duration,
        domain,

        mem_sampler,
    };

    if m.get_flag("dry run") {
        std::process::exit(0);
    }

    (config, BenchWriter { output })
}
