//! Fixed-cadence delivery of classified units.
//!
//! [`PacingScheduler`] accepts [`PacedChunk`]s as fast as ingestion produces
//! them and hands them to a [`ChunkConsumer`] at a fixed target interval. It
//! never reads a clock itself: every call to [`tick`](PacingScheduler::tick)
//! carries the current instant, so a real per-frame clock ([`FrameClock`])
//! and a synthetic test clock drive it identically.
//!
//! Each tick measures `elapsed = now - baseline` and applies exactly one of:
//!
//! | Condition                          | Emits | Baseline               |
//! |------------------------------------|-------|------------------------|
//! | `elapsed >= 1.5 * interval`        | 2     | `= now`                |
//! | `interval <= elapsed < 1.5 * int.` | 1     | `+= interval`          |
//! | otherwise                          | 0     | unchanged              |
//!
//! The fixed-step advance keeps per-tick jitter from accumulating; the
//! catch-up path resets to `now` so lag does not compound.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//!
//! use vidpace::{PacedChunk, PacingScheduler};
//!
//! let mut delivered = Vec::new();
//! let mut scheduler = PacingScheduler::new(Duration::from_millis(40), |chunk: PacedChunk| {
//!     delivered.push(chunk.sequence_number)
//! });
//! let start = Instant::now();
//! for n in 0..3 {
//!     scheduler.enqueue(PacedChunk::new(n, vec![0, 0, 1, 0x65], n == 0), start);
//! }
//! scheduler.tick(start + Duration::from_millis(45));
//! scheduler.tick(start + Duration::from_millis(150));
//! drop(scheduler);
//! assert_eq!(delivered, vec![0, 1, 2]);
//! ```

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use crate::progress::CancellationToken;

/// One decodable unit waiting to be paced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedChunk {
    /// Annex B or length-prefixed access unit, as demuxed.
    pub payload: Vec<u8>,
    /// The unit can be decoded on its own.
    pub is_keyframe: bool,
    /// Position among the video packets of the stream, from 0.
    pub sequence_number: u64,
    /// Presentation timestamp in the stream time base.
    pub pts: Option<i64>,
}

impl PacedChunk {
    /// A chunk without a presentation timestamp.
    pub fn new(sequence_number: u64, payload: Vec<u8>, is_keyframe: bool) -> Self {
        Self {
            payload,
            is_keyframe,
            sequence_number,
            pts: None,
        }
    }

    #[must_use]
    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }
}

/// Receives chunks as the scheduler emits them.
pub trait ChunkConsumer {
    fn consume(&mut self, chunk: PacedChunk);
}

impl<F: FnMut(PacedChunk)> ChunkConsumer for F {
    fn consume(&mut self, chunk: PacedChunk) {
        self(chunk)
    }
}

/// Externally visible lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing has been enqueued yet.
    Idle,
    /// Ticking and draining.
    Running,
    /// Terminal. Ticks and enqueues are ignored.
    Destroyed,
}

/// Which branch a tick took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Scheduler idle or destroyed.
    Inactive,
    /// Less than one interval elapsed.
    Wait,
    /// One interval elapsed; baseline advanced by one interval.
    Step,
    /// At least 1.5 intervals elapsed; baseline reset to the tick instant.
    CatchUp,
}

/// Result of one [`tick`](PacingScheduler::tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// What the tick did.
    pub action: TickAction,
    /// Chunks handed to the consumer during this tick.
    pub emitted: usize,
}

/// Timed queue between ingestion and the decoder.
pub struct PacingScheduler<C: ChunkConsumer> {
    consumer: C,
    target_interval: Duration,
    pending: VecDeque<PacedChunk>,
    baseline: Option<Instant>,
    paused: bool,
    state: SchedulerState,
    emitted: u64,
}

impl<C: ChunkConsumer> PacingScheduler<C> {
    /// An idle scheduler emitting into `consumer` every `target_interval`.
    pub fn new(target_interval: Duration, consumer: C) -> Self {
        Self {
            consumer,
            target_interval,
            pending: VecDeque::new(),
            baseline: None,
            paused: false,
            state: SchedulerState::Idle,
            emitted: 0,
        }
    }

    /// Queue a chunk. The first enqueue starts the scheduler with
    /// `baseline = now`. Returns `false` (dropping the chunk) once
    /// destroyed.
    pub fn enqueue(&mut self, chunk: PacedChunk, now: Instant) -> bool {
        match self.state {
            SchedulerState::Destroyed => return false,
            SchedulerState::Idle => {
                self.state = SchedulerState::Running;
                self.baseline = Some(now);
            }
            SchedulerState::Running => {}
        }
        self.pending.push_back(chunk);
        true
    }

    /// Advance the cadence to `now`.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let (SchedulerState::Running, Some(baseline)) = (self.state, self.baseline) else {
            return TickOutcome {
                action: TickAction::Inactive,
                emitted: 0,
            };
        };

        let elapsed = now.saturating_duration_since(baseline);
        let catch_up_threshold = self.target_interval * 3 / 2;

        if elapsed >= catch_up_threshold {
            let emitted = self.emit(2);
            self.baseline = Some(now);
            TickOutcome {
                action: TickAction::CatchUp,
                emitted,
            }
        } else if elapsed >= self.target_interval {
            let emitted = self.emit(1);
            self.baseline = Some(baseline + self.target_interval);
            TickOutcome {
                action: TickAction::Step,
                emitted,
            }
        } else {
            TickOutcome {
                action: TickAction::Wait,
                emitted: 0,
            }
        }
    }

    fn emit(&mut self, count: usize) -> usize {
        if self.paused {
            return 0;
        }
        let mut emitted = 0;
        for _ in 0..count {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            self.consumer.consume(chunk);
            emitted += 1;
        }
        self.emitted += emitted as u64;
        emitted
    }

    /// Suppress emission. The baseline keeps advancing on ticks.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Allow emission again.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Emission is suppressed.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop ticking and discard queued chunks without consuming them.
    ///
    /// Returns the number discarded; `0` on repeated calls.
    pub fn destroy(&mut self) -> usize {
        if self.state == SchedulerState::Destroyed {
            return 0;
        }
        self.state = SchedulerState::Destroyed;
        let discarded = self.pending.len();
        self.pending.clear();
        if discarded > 0 {
            log::debug!("Pacing scheduler destroyed with {discarded} chunk(s) pending");
        }
        discarded
    }

    /// Lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Instant ticks are measured from; `None` until the first enqueue.
    pub fn baseline(&self) -> Option<Instant> {
        self.baseline
    }

    /// Chunks still queued.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Total chunks handed to the consumer.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Interval between emissions.
    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    /// The receiving consumer.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Take the consumer back, dropping anything still queued.
    pub fn into_consumer(self) -> C {
        self.consumer
    }
}

/// Source of tick instants for [`drive`].
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block until the next tick is due.
    fn wait_for_tick(&mut self);
}

/// Wall clock ticking once per display refresh.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    period: Duration,
}

impl FrameClock {
    /// A clock ticking every `period`.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Clock for FrameClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait_for_tick(&mut self) {
        thread::sleep(self.period);
    }
}

/// How a [`drive`] loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveReport {
    /// Ticks performed.
    pub ticks: u64,
    /// Chunks dropped by the final destroy.
    pub discarded: usize,
    /// The watchdog deadline passed with chunks still queued.
    pub timed_out: bool,
    /// The stop token was cancelled.
    pub stopped: bool,
}

/// Tick `scheduler` from `clock` until its queue drains, `stop` is
/// cancelled, or `watchdog` elapses; then destroy it.
pub fn drive<C: ChunkConsumer, K: Clock>(
    scheduler: &mut PacingScheduler<C>,
    clock: &mut K,
    watchdog: Duration,
    stop: &CancellationToken,
) -> DriveReport {
    let deadline = clock.now() + watchdog;
    let mut report = DriveReport::default();

    while scheduler.state() == SchedulerState::Running && scheduler.pending() > 0 {
        if stop.is_cancelled() {
            report.stopped = true;
            break;
        }
        if clock.now() >= deadline {
            log::warn!(
                "Pacing watchdog expired after {watchdog:?} with {} chunk(s) queued",
                scheduler.pending()
            );
            report.timed_out = true;
            break;
        }
        clock.wait_for_tick();
        scheduler.tick(clock.now());
        report.ticks += 1;
    }

    report.discarded = scheduler.destroy();
    report
}
