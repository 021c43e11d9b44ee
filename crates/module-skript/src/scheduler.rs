//! Tick-driven resumption of suspended walks.
//!
//! Delays are rounded up to whole ticks. Async bodies run on the rayon pool
//! and send their continuation back over a channel; it is resumed by the
//! next [`TickScheduler::tick`], on the thread that ticks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use skript_lang::value::TICK;
use skript_lang::{AsyncTask, Continuation, Scheduler, WalkOutcome};
use tracing::{debug, error, trace};

#[derive(Default)]
struct Timeline {
    now: u64,
    /// Continuations by the tick they are due on.
    due: BTreeMap<u64, Vec<Continuation>>,
}

pub struct TickScheduler {
    tick_length: Duration,
    timeline: Mutex<Timeline>,
    finished_tx: Sender<Continuation>,
    finished_rx: Receiver<Continuation>,
    /// Async bodies started but not yet resumed or failed.
    in_flight: Arc<AtomicUsize>,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(TICK)
    }
}

impl TickScheduler {
    pub fn new(tick_length: Duration) -> Self {
        let (finished_tx, finished_rx) = crossbeam_channel::unbounded();
        Self {
            tick_length: tick_length.max(Duration::from_millis(1)),
            timeline: Mutex::new(Timeline::default()),
            finished_tx,
            finished_rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub const fn tick_length(&self) -> Duration {
        self.tick_length
    }

    /// Ticks run so far.
    pub fn current_tick(&self) -> u64 {
        self.timeline.lock().now
    }

    /// Walks waiting on a delay or an async body.
    pub fn pending(&self) -> usize {
        let delayed: usize = self.timeline.lock().due.values().map(Vec::len).sum();
        delayed + self.in_flight.load(Ordering::Acquire)
    }

    fn ticks_for(&self, delay: Duration) -> u64 {
        let ticks = delay.as_nanos().div_ceil(self.tick_length.as_nanos()).max(1);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    /// Advance one tick: resume every delay that is now due, then every
    /// continuation whose async body has finished. Returns how many walks
    /// were resumed.
    pub fn tick(&self) -> usize {
        let due = {
            let mut timeline = self.timeline.lock();
            timeline.now += 1;
            let after_now = timeline.now + 1;
            let later = timeline.due.split_off(&after_now);
            std::mem::replace(&mut timeline.due, later)
        };

        let mut resumed = 0;
        for continuation in due.into_values().flatten() {
            resume(continuation);
            resumed += 1;
        }
        for continuation in self.finished_rx.try_iter() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            resume(continuation);
            resumed += 1;
        }
        if resumed > 0 {
            trace!(tick = self.current_tick(), resumed, "resumed walks");
        }
        resumed
    }
}

fn resume(continuation: Continuation) {
    let trigger = continuation.trigger().name().to_string();
    if let WalkOutcome::Failed(e) = continuation.resume() {
        debug!(trigger, "resumed walk failed: {e}");
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&self, delay: Duration, continuation: Continuation) {
        let ticks = self.ticks_for(delay);
        let mut timeline = self.timeline.lock();
        let at = timeline.now.saturating_add(ticks);
        timeline.due.entry(at).or_default().push(continuation);
    }

    fn spawn_async(&self, task: AsyncTask, continuation: Continuation) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let finished = self.finished_tx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        rayon::spawn(move || match task() {
            Ok(()) => {
                // The receiver lives as long as the scheduler.
                if finished.send(continuation).is_err() {
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                }
            }
            Err(e) => {
                in_flight.fetch_sub(1, Ordering::AcqRel);
                error!(
                    trigger = continuation.trigger().name(),
                    event = continuation.event().name(),
                    "async body failed: {e}"
                );
            }
        });
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("tick_length", &self.tick_length)
            .field("now", &self.current_tick())
            .field("pending", &self.pending())
            .finish()
    }
}
