//! Radix Sort Pipeline Demo
//!
//! Sorts a random `u32` array three ways and compares them:
//! - **Serial radix sort**: single-threaded LSD reference
//! - **Pipeline radix sort**: the four-stage parallel pipeline on the CPU device
//! - **std sort_unstable**: pdqsort baseline
//!
//! Set `RUST_LOG=debug` for per-pass timings from the pipeline.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use log::error;
use rand::Rng;

use simt_radix_sort::config::{DEFAULT_MAX_WORKGROUPS, DEFAULT_RADIX_BITS, DEFAULT_WORKGROUP_SIZE};
use simt_radix_sort::cpu_radix_sort::{self, is_sorted};
use simt_radix_sort::mwc::Mwc;
use simt_radix_sort::{RadixSorter, SortConfig};

/// Default array size for benchmarking
const DEFAULT_ARRAY_SIZE: usize = 1 << 20; // 1 million elements

#[derive(Parser, Debug)]
#[command(version, about = "Parallel LSD radix sort pipeline")]
struct Args {
    /// Number of keys to sort
    #[arg(default_value_t = DEFAULT_ARRAY_SIZE)]
    size: usize,

    /// Bits per pass
    #[arg(long, default_value_t = DEFAULT_RADIX_BITS)]
    radix_bits: u32,

    /// Work items per workgroup
    #[arg(long, default_value_t = DEFAULT_WORKGROUP_SIZE)]
    workgroup_size: u32,

    /// Largest workgroup count per dispatch
    #[arg(long, default_value_t = DEFAULT_MAX_WORKGROUPS)]
    max_workgroups: u32,

    /// Worker threads (defaults to one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Seconds to wait for a pass before giving up
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Generate keys with the deterministic MWC generator from this seed
    #[arg(long)]
    seed: Option<u64>,

    /// Also run a sweep over array sizes
    #[arg(long)]
    benchmark: bool,
}

impl Args {
    fn config(&self) -> SortConfig {
        let mut config = SortConfig::default()
            .with_radix_bits(self.radix_bits)
            .with_workgroup_size(self.workgroup_size)
            .with_max_workgroups(self.max_workgroups)
            .with_wait_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        config
    }

    fn generate(&self, size: usize) -> Vec<u32> {
        match self.seed {
            Some(seed) => Mwc::seeded(seed).keys(size),
            None => {
                let mut rng = rand::thread_rng();
                (0..size).map(|_| rng.gen()).collect()
            }
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    println!("Parallel Radix Sort Pipeline");
    println!("============================\n");

    let mut sorter = match RadixSorter::with_config(args.config()) {
        Ok(sorter) => sorter,
        Err(e) => {
            error!("failed to set up the sorter: {e}");
            return ExitCode::FAILURE;
        }
    };
    let config = sorter.config().clone();

    println!(
        "Array size: {} elements ({} MB)",
        args.size,
        args.size * 4 / 1_000_000
    );
    println!(
        "Radix: {} bits, {} passes; workgroups of {} on {} threads",
        config.radix_bits,
        config.pass_count(),
        config.workgroup_size,
        sorter.device().thread_count()
    );

    println!("\nGenerating data...");
    let data = args.generate(args.size);

    // Serial reference
    println!("\n--- Serial radix sort (reference) ---");
    let mut reference = data.clone();
    let start = Instant::now();
    cpu_radix_sort::sort_with_radix(&mut reference, config.radix_bits);
    let serial_duration = start.elapsed();
    println!("Serial radix sort time: {:.3} ms", millis(serial_duration));

    // Pipeline
    println!("\n--- Pipeline radix sort ---");
    let mut sorted = data.clone();
    let start = Instant::now();
    if let Err(e) = sorter.sort(&mut sorted) {
        println!("Pipeline radix sort error: {e}");
        return ExitCode::FAILURE;
    }
    let pipeline_duration = start.elapsed();
    println!("Pipeline radix sort time: {:.3} ms", millis(pipeline_duration));
    let pass_total: Duration = sorter.pass_times().iter().sum();
    println!(
        "  of which device passes: {:.3} ms over {} passes",
        millis(pass_total),
        sorter.pass_times().len()
    );

    if !is_sorted(&sorted) {
        println!("ERROR: pipeline output failed verification!");
        return ExitCode::FAILURE;
    }
    println!("The array is sorted");
    if sorted == reference {
        println!("Results match serial radix sort: OK");
    } else {
        println!("WARNING: Results differ from serial radix sort!");
        return ExitCode::FAILURE;
    }

    // std baseline
    println!("\n--- std sort_unstable (pdqsort) ---");
    let mut baseline = data;
    let start = Instant::now();
    baseline.sort_unstable();
    let std_duration = start.elapsed();
    println!("sort_unstable time: {:.3} ms", millis(std_duration));

    println!("\n--- Performance Comparison ---");
    report_speedup("Pipeline vs serial radix", serial_duration, pipeline_duration);
    report_speedup("Pipeline vs sort_unstable", std_duration, pipeline_duration);

    if args.benchmark {
        run_benchmark(&args, &mut sorter);
    }
    ExitCode::SUCCESS
}

fn report_speedup(label: &str, baseline: Duration, candidate: Duration) {
    let speedup = baseline.as_secs_f64() / candidate.as_secs_f64();
    if speedup > 1.0 {
        println!("{label}: pipeline is {speedup:.2}x faster");
    } else {
        println!("{label}: pipeline is {:.2}x slower", 1.0 / speedup);
    }
}

/// Run benchmarks across multiple array sizes
fn run_benchmark(args: &Args, sorter: &mut RadixSorter) {
    println!("\n\n====================================");
    println!("Running comprehensive benchmark...");
    println!("====================================\n");

    let sizes: Vec<usize> = vec![
        1 << 10, // 1K
        1 << 12, // 4K
        1 << 14, // 16K
        1 << 16, // 64K
        1 << 18, // 256K
        1 << 20, // 1M
        1 << 22, // 4M
        1 << 24, // 16M
    ];
    let radix_bits = sorter.config().radix_bits;

    println!(
        "{:>12} | {:>12} | {:>14} | {:>14} | {:>12}",
        "Size", "Serial (ms)", "Pipeline (ms)", "std (ms)", "vs serial"
    );
    println!(
        "{:-<12}-+-{:-<12}-+-{:-<14}-+-{:-<14}-+-{:-<12}",
        "", "", "", "", ""
    );

    for &size in &sizes {
        let data = args.generate(size);

        let mut serial = data.clone();
        let start = Instant::now();
        cpu_radix_sort::sort_with_radix(&mut serial, radix_bits);
        let serial_ms = millis(start.elapsed());

        let mut pipeline = data.clone();
        let start = Instant::now();
        let (pipeline_ms, speedup) = match sorter.sort(&mut pipeline) {
            Ok(()) if pipeline == serial => {
                let ms = millis(start.elapsed());
                (format!("{ms:.3}"), format!("{:.2}x", serial_ms / ms))
            }
            Ok(()) => ("MISMATCH".to_string(), "N/A".to_string()),
            Err(e) => {
                error!("pipeline failed at {size} keys: {e}");
                ("ERROR".to_string(), "N/A".to_string())
            }
        };

        let mut baseline = data;
        let start = Instant::now();
        baseline.sort_unstable();
        let std_ms = millis(start.elapsed());

        println!(
            "{:>12} | {:>12.3} | {:>14} | {:>14.3} | {:>12}",
            size, serial_ms, pipeline_ms, std_ms, speedup
        );
    }

    println!("\nNote: speedup > 1.0x means the pipeline beats the serial sort");
}
