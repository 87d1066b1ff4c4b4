//! Host-side stress run of the physical page allocator.
//!
//! ```text
//! pmm-sim [threads] [pages] [rounds]
//! ```
//!
//! Simulates `pages` frames of RAM behind a small "kernel image", then lets
//! `threads` workers allocate, share, and free frames for `rounds` iterations
//! each. Every worker stamps its frames and verifies the stamp before
//! releasing them, so a frame handed to two owners at once is caught. Set
//! `PMM_LOG=debug` or `PMM_LOG=trace` to watch individual operations.

mod logger;

use kernel_memory_addresses::PhysicalAddress;
use kernel_pmm::host::{ArenaError, HostArena};
use kernel_pmm::{
    AllocError, Frame, InitError, PageAllocator, PmmConfig, PmmStats, RefCount, ref_table_len_for,
};
use log::{info, warn};
use logger::StderrLogger;
use std::sync::Barrier;
use std::{env, process, thread};

/// Where the simulated RAM starts.
const RAM_BASE: u64 = 0x0010_0000;

/// Bytes the pretend kernel image occupies at the start of RAM.
const KERNEL_IMAGE_BYTES: u64 = 0x5A10;

#[derive(Debug, thiserror::Error)]
enum SimError {
    #[error("usage: pmm-sim [threads] [pages] [rounds] ({0})")]
    Usage(String),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("frame {0} was modified while owned by worker {1}")]
    Clobbered(Frame, usize),
    #[error("accounting mismatch after run: {0:?}")]
    Leak(PmmStats),
}

#[derive(Debug, Copy, Clone)]
struct SimConfig {
    threads: usize,
    pages: u64,
    rounds: usize,
}

impl SimConfig {
    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, SimError> {
        let mut next = |name: &str, default: u64| -> Result<u64, SimError> {
            match args.next() {
                None => Ok(default),
                Some(v) => v
                    .parse()
                    .map_err(|_| SimError::Usage(format!("invalid {name}: {v}"))),
            }
        };
        let threads = next("threads", 4)?;
        let pages = next("pages", 64)?;
        let rounds = next("rounds", 10_000)?;
        if threads == 0 || pages == 0 {
            return Err(SimError::Usage("threads and pages must be positive".into()));
        }
        Ok(Self {
            threads: usize::try_from(threads).map_err(|_| SimError::Usage("threads".into()))?,
            pages,
            rounds: usize::try_from(rounds).map_err(|_| SimError::Usage("rounds".into()))?,
        })
    }
}

fn main() {
    if let Err(e) = StderrLogger::from_env().init() {
        eprintln!("logger: {e}");
    }

    if let Err(e) = SimConfig::from_args(env::args().skip(1)).and_then(run) {
        eprintln!("pmm-sim: {e}");
        process::exit(1);
    }
}

fn run(config: SimConfig) -> Result<(), SimError> {
    let ram_bytes = KERNEL_IMAGE_BYTES.next_multiple_of(4096) + config.pages * 4096;
    let ram = HostArena::new(PhysicalAddress::new(RAM_BASE), ram_bytes)?;
    let pmm_config = PmmConfig::new(
        PhysicalAddress::new(RAM_BASE + KERNEL_IMAGE_BYTES),
        ram.top(),
    );
    let mut refs: Vec<RefCount> = vec![0; ref_table_len_for(ram.top().as_u64())];

    // SAFETY: the arena is exclusively ours and covers the managed range.
    let pmm = unsafe { PageAllocator::new(&ram, pmm_config, &mut refs) }?;
    info!("simulating {config:?}");

    let start = Barrier::new(config.threads);
    let results: Vec<Result<WorkerReport, SimError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|id| {
                let (pmm, start) = (&pmm, &start);
                s.spawn(move || {
                    start.wait();
                    worker(pmm, id, config.rounds)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
            .collect()
    });

    let mut total = WorkerReport::default();
    for report in results {
        total.merge(report?);
    }

    let stats = pmm.stats();
    if stats.allocated_pages != 0 || stats.free_pages != config.pages {
        return Err(SimError::Leak(stats));
    }

    info!(
        "done: {} allocations, {} shared frees, {} exhaustions; {} of {} pages free",
        total.allocs, total.shared_frees, total.exhausted, stats.free_pages, stats.managed_pages
    );
    Ok(())
}

#[derive(Debug, Default)]
struct WorkerReport {
    allocs: u64,
    shared_frees: u64,
    exhausted: u64,
}

impl WorkerReport {
    const fn merge(&mut self, other: Self) {
        self.allocs += other.allocs;
        self.shared_frees += other.shared_frees;
        self.exhausted += other.exhausted;
    }
}

/// Allocate a frame, stamp it, occasionally share it with a pretend second
/// mapping, verify the stamp, then drop every reference.
fn worker(
    pmm: &PageAllocator<'_, &HostArena>,
    id: usize,
    rounds: usize,
) -> Result<WorkerReport, SimError> {
    let mut report = WorkerReport::default();
    #[allow(clippy::cast_possible_truncation)]
    let stamp = (id as u8).wrapping_mul(37).wrapping_add(0x40);

    for round in 0..rounds {
        let page = match pmm.alloc_page() {
            Ok(page) => page,
            Err(AllocError::OutOfMemory) => {
                report.exhausted += 1;
                thread::yield_now();
                continue;
            }
        };
        report.allocs += 1;
        pmm.mapper().fill_page(page, stamp);

        let shared = round % 4 == 0;
        if shared {
            pmm.inc_ref(page);
        }

        thread::yield_now();
        if pmm.mapper().read_page(page).iter().any(|&b| b != stamp) {
            warn!("worker {id}: frame {page} clobbered");
            return Err(SimError::Clobbered(page, id));
        }

        if shared {
            pmm.free_page(page);
            report.shared_frees += 1;
            // still owned by the second mapping: contents must be intact
            if pmm.mapper().read_page(page).iter().any(|&b| b != stamp) {
                return Err(SimError::Clobbered(page, id));
            }
        }
        pmm.free_page(page);
    }
    Ok(report)
}
