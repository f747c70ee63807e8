//! Bounded-concurrency dispatch of per-frame work.
//!
//! The [`Scheduler`] hands out one [`RenderJob`] per frame, in ascending index
//! order, to a rayon pool. A [`ConcurrencyBudget`] caps how many jobs are in
//! flight: the dispatch loop takes a [`BudgetPermit`] before spawning and
//! sleeps for a short poll interval whenever none is free. Every worker sends
//! a [`JobOutcome`] when it finishes, and the run only returns once all of
//! them have arrived. The stall timeout applies to both phases: if no job
//! finishes for that long, either while waiting for a slot or while waiting
//! for the last outcomes, the run fails with [`PipelineError::Stalled`].

use anyhow::{Context, Result};
use log::{debug, trace, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::PipelineError;

pub const DEFAULT_MAX_WORKERS: usize = 64;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Count of free worker slots.
///
/// `available() + in_flight() == capacity()` holds at every instant: slots are
/// taken with an atomic conditional decrement and handed back when the
/// [`BudgetPermit`] is dropped.
#[derive(Debug)]
pub struct ConcurrencyBudget {
    capacity: usize,
    free: AtomicUsize,
}

impl ConcurrencyBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: AtomicUsize::new(capacity),
        }
    }

    /// Take a slot if one is free. Never blocks.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BudgetPermit> {
        self.free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| BudgetPermit {
                budget: Arc::clone(self),
            })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

/// One occupied slot of a [`ConcurrencyBudget`]. Dropping it frees the slot.
#[derive(Debug)]
pub struct BudgetPermit {
    budget: Arc<ConcurrencyBudget>,
}

impl Drop for BudgetPermit {
    fn drop(&mut self) {
        self.budget.free.fetch_add(1, Ordering::AcqRel);
    }
}

/// A unit of work: one item plus its position in the sequence.
#[derive(Debug, Clone)]
pub struct RenderJob<T> {
    pub index: usize,
    pub item: T,
    /// Set on the final item of the run only.
    pub is_last: bool,
}

/// What a worker reports back when its job is over.
#[derive(Debug)]
pub struct JobOutcome {
    pub index: usize,
    pub is_last: bool,
    pub result: std::result::Result<(), String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub index: usize,
    pub message: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub total: usize,
    pub succeeded: usize,
    /// Sorted by index.
    pub failures: Vec<FrameFailure>,
    /// The job flagged `is_last` has reported back.
    pub last_frame_done: bool,
}

impl ScheduleReport {
    fn record(&mut self, outcome: JobOutcome) {
        if outcome.is_last {
            self.last_frame_done = true;
        }
        match outcome.result {
            Ok(()) => self.succeeded += 1,
            Err(message) => {
                warn!("frame {} failed: {}", outcome.index + 1, message);
                self.failures.push(FrameFailure {
                    index: outcome.index,
                    message,
                });
            }
        }
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_workers: usize,
    /// Sleep between budget checks while every slot is busy.
    pub poll_interval: Duration,
    /// Give up when no job finishes for this long. `None` waits forever.
    pub stall_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
        }
    }
}

pub struct Scheduler {
    options: SchedulerOptions,
    budget: Arc<ConcurrencyBudget>,
    pool: rayon::ThreadPool,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions) -> Result<Self> {
        if options.max_workers == 0 {
            return Err(PipelineError::InvalidConfig("max_workers must be at least 1".into()).into());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_workers)
            .thread_name(|i| format!("asciivid-worker-{}", i))
            .build()
            .context("building worker pool")?;
        Ok(Self {
            budget: Arc::new(ConcurrencyBudget::new(options.max_workers)),
            options,
            pool,
        })
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn budget(&self) -> Arc<ConcurrencyBudget> {
        Arc::clone(&self.budget)
    }

    /// Run `work` once for every item and wait until all of them are done.
    ///
    /// A job that returns an error or panics is recorded in the report and
    /// does not disturb the others. `on_progress(completed, total)` is called
    /// from the worker thread after each job.
    pub fn run<T, W, P>(&self, items: Vec<T>, work: W, on_progress: P) -> Result<ScheduleReport>
    where
        T: Send + 'static,
        W: Fn(&RenderJob<T>) -> Result<()> + Send + Sync + 'static,
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(ScheduleReport::default());
        }

        let work = Arc::new(work);
        let on_progress = Arc::new(on_progress);
        let completed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<JobOutcome>();

        let mut watch = StallWatch::new(Arc::clone(&completed));
        for (index, item) in items.into_iter().enumerate() {
            let permit = self.acquire_slot(&mut watch, total)?;
            let job = RenderJob {
                index,
                item,
                is_last: index + 1 == total,
            };
            debug!("starting frame ({} / {})", index + 1, total);

            let work = Arc::clone(&work);
            let on_progress = Arc::clone(&on_progress);
            let completed = Arc::clone(&completed);
            let tx = tx.clone();
            self.pool.spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| work(&job)));
                drop(permit);

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_progress(done, total))) {
                    warn!("progress callback panicked: {}", panic_message(payload.as_ref()));
                }

                let result = match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(payload) => Err(format!("worker panicked: {}", panic_message(payload.as_ref()))),
                };
                // The receiver only goes away once the run has given up.
                let _ = tx.send(JobOutcome {
                    index: job.index,
                    is_last: job.is_last,
                    result,
                });
            });
        }
        drop(tx);
        debug!("all {} frames dispatched, waiting for workers", total);

        CompletionBarrier::new(rx, total).wait(self.options.stall_timeout)
    }

    fn acquire_slot(&self, watch: &mut StallWatch, total: usize) -> Result<BudgetPermit> {
        loop {
            if let Some(permit) = self.budget.try_acquire() {
                return Ok(permit);
            }
            let done = watch.observe();
            if let Some(timeout) = self.options.stall_timeout {
                if watch.idle_for() >= timeout {
                    return Err(PipelineError::Stalled {
                        completed: done,
                        expected: total,
                        waited: timeout,
                    }
                    .into());
                }
            }
            trace!("all {} workers busy", self.budget.capacity());
            thread::sleep(self.options.poll_interval);
        }
    }
}

/// Time since the completed-job counter last moved.
struct StallWatch {
    completed: Arc<AtomicUsize>,
    seen: usize,
    since: Instant,
}

impl StallWatch {
    fn new(completed: Arc<AtomicUsize>) -> Self {
        let seen = completed.load(Ordering::SeqCst);
        Self {
            completed,
            seen,
            since: Instant::now(),
        }
    }

    /// Current completion count; restarts the clock when it changed.
    fn observe(&mut self) -> usize {
        let done = self.completed.load(Ordering::SeqCst);
        if done != self.seen {
            self.seen = done;
            self.since = Instant::now();
        }
        done
    }

    fn idle_for(&self) -> Duration {
        self.since.elapsed()
    }
}

/// Waits for a known number of [`JobOutcome`]s.
struct CompletionBarrier {
    rx: Receiver<JobOutcome>,
    expected: usize,
}

impl CompletionBarrier {
    fn new(rx: Receiver<JobOutcome>, expected: usize) -> Self {
        Self { rx, expected }
    }

    fn wait(self, stall_timeout: Option<Duration>) -> Result<ScheduleReport> {
        let mut report = ScheduleReport {
            total: self.expected,
            ..ScheduleReport::default()
        };
        while report.completed() < self.expected {
            let outcome = match stall_timeout {
                Some(timeout) => match self.rx.recv_timeout(timeout) {
                    Ok(outcome) => outcome,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(PipelineError::Stalled {
                            completed: report.completed(),
                            expected: self.expected,
                            waited: timeout,
                        }
                        .into())
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(self.lost(&report)),
                },
                None => match self.rx.recv() {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(self.lost(&report)),
                },
            };
            report.record(outcome);
        }
        report.failures.sort_by_key(|f| f.index);
        Ok(report)
    }

    fn lost(&self, report: &ScheduleReport) -> anyhow::Error {
        PipelineError::WorkersLost {
            completed: report.completed(),
            expected: self.expected,
        }
        .into()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
