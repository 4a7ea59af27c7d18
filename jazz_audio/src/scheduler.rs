//! Single-timer priority scheduler.
//!
//! Callbacks are ordered by `(time, priority, insertion id)` and released in
//! that order once the audio clock reaches them. There is only ever one
//! outstanding sleep: `tick()` recomputes how long to wait for the current
//! head every time it's called, so inserting an earlier event or cancelling
//! the head is naturally picked up on the next await rather than needing an
//! explicit rearm.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use jazz_core::log;

/// Epsilon below which two scheduled times are considered simultaneous.
pub const EPSILON: f64 = 1e-4;

/// Wall-clock margin trimmed off every sleep so `flush` wakes slightly early
/// and never drifts past its target by a whole scheduler cycle.
pub const SCHEDULER_GUARD: Duration = Duration::from_millis(25);

type Callback = Box<dyn FnOnce() + Send>;

/// Handle returned by [`Scheduler::schedule`]. Dropping it does not cancel
/// the event; call [`Handle::cancel`] explicitly.
#[derive(Clone)]
pub struct Handle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl Handle {
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Entry {
    time: f64,
    priority: i32,
    id: u64,
    cancelled: Arc<AtomicBool>,
    callback: Option<Callback>,
}

impl Entry {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    fn key(&self) -> (f64, i32, u64) {
        (self.time, self.priority, self.id)
    }
}

// BinaryHeap is a max-heap; reverse the comparison so the smallest
// (time, priority, id) tuple sits at the top.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .partial_cmp(&self.time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.id.cmp(&self.id))
    }
}

pub struct Scheduler {
    queue: BinaryHeap<Entry>,
    next_id: u64,
    clock: Arc<dyn crate::clock::Clock>,
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn crate::clock::Clock>) -> Self {
        Self { queue: BinaryHeap::new(), next_id: 0, clock }
    }

    /// Schedule `callback` to run at audio-clock time `time`, breaking ties
    /// in ascending `priority` then ascending insertion order.
    pub fn schedule(
        &mut self,
        time: f64,
        priority: i32,
        callback: impl FnOnce() + Send + 'static,
    ) -> Handle {
        let id = self.next_id;
        self.next_id += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = Handle { id, cancelled: cancelled.clone() };
        self.queue.push(Entry { time, priority, id, cancelled, callback: Some(Box::new(callback)) });
        handle
    }

    pub fn cancel(&mut self, handle: &Handle) {
        handle.cancel();
    }

    /// Drop every pending event without running its callback.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// True once every pending entry has been cancelled or fired.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.iter().all(Entry::is_cancelled)
    }

    fn drop_cancelled_head(&mut self) {
        while matches!(self.queue.peek(), Some(entry) if entry.is_cancelled()) {
            self.queue.pop();
        }
    }

    /// How long to sleep before the current head becomes due, guard band
    /// already subtracted. Split out of [`Scheduler::tick`] so a caller that
    /// shares this scheduler behind a lock (e.g. a dedicated pump task
    /// running alongside the generation loop) can sleep *outside* the lock
    /// instead of holding it for the whole wait.
    pub fn wait_duration(&mut self) -> Duration {
        self.drop_cancelled_head();
        match self.queue.peek() {
            Some(entry) => {
                let now = self.clock.now();
                let remaining = (entry.time - now).max(0.0);
                Duration::from_secs_f64(remaining).saturating_sub(SCHEDULER_GUARD)
            }
            None => SCHEDULER_GUARD,
        }
    }

    /// Sleep until the current head is due (minus the guard band), then run
    /// every event now due. Returns the number of callbacks actually fired.
    /// Safe to call in a loop: an empty queue sleeps for one guard interval
    /// and returns 0, giving callers a chance to insert new work.
    pub async fn tick(&mut self) -> usize {
        let wait = self.wait_duration();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.flush()
    }

    /// Run every event whose time has arrived (within [`EPSILON`]) without
    /// sleeping. Useful for deterministic tests with a [`crate::clock::FakeClock`].
    pub fn flush(&mut self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        loop {
            self.drop_cancelled_head();
            match self.queue.peek() {
                Some(entry) if entry.time <= now + EPSILON => {
                    let mut entry = self.queue.pop().expect("peeked entry must be present");
                    if entry.is_cancelled() {
                        continue;
                    }
                    let callback = entry.callback.take().expect("callback consumed once");
                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        log::error("scheduler callback panicked; continuing flush");
                    }
                    fired += 1;
                }
                _ => break,
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::sync::Mutex;

    fn scheduler_at(t: f64) -> (Scheduler, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(t));
        (Scheduler::new(clock.clone()), clock)
    }

    #[test]
    fn fires_in_time_then_priority_then_insertion_order() {
        let (mut sched, clock) = scheduler_at(0.0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let push = |tag: &'static str| {
            let order = order.clone();
            move || order.lock().unwrap().push(tag)
        };
        sched.schedule(1.0, 5, push("b-late-low-pri"));
        sched.schedule(1.0, 1, push("a-late-high-pri"));
        sched.schedule(0.0, 0, push("first"));
        clock.set(2.0);
        sched.flush();
        assert_eq!(*order.lock().unwrap(), vec!["first", "a-late-high-pri", "b-late-low-pri"]);
    }

    #[test]
    fn does_not_fire_before_its_time() {
        let (mut sched, clock) = scheduler_at(0.0);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        sched.schedule(5.0, 0, move || flag.store(true, AtomicOrdering::SeqCst));
        clock.set(4.0);
        sched.flush();
        assert!(!fired.load(AtomicOrdering::SeqCst));
        clock.set(5.0);
        sched.flush();
        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn epsilon_treats_near_simultaneous_times_as_due() {
        let (mut sched, clock) = scheduler_at(0.0);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        sched.schedule(1.0, 0, move || flag.store(true, AtomicOrdering::SeqCst));
        clock.set(1.0 - EPSILON / 2.0);
        sched.flush();
        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn cancelled_head_is_skipped_without_firing() {
        let (mut sched, clock) = scheduler_at(0.0);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = sched.schedule(1.0, 0, move || flag.store(true, AtomicOrdering::SeqCst));
        handle.cancel();
        clock.set(2.0);
        sched.flush();
        assert!(!fired.load(AtomicOrdering::SeqCst));
        assert!(sched.is_idle());
    }

    #[test]
    fn clear_drops_everything_unfired() {
        let (mut sched, clock) = scheduler_at(0.0);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        sched.schedule(1.0, 0, move || flag.store(true, AtomicOrdering::SeqCst));
        sched.clear();
        clock.set(2.0);
        sched.flush();
        assert!(!fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn a_panicking_callback_does_not_stop_the_flush() {
        let (mut sched, clock) = scheduler_at(0.0);
        let after = Arc::new(AtomicBool::new(false));
        let flag = after.clone();
        sched.schedule(0.0, 0, || panic!("boom"));
        sched.schedule(0.0, 1, move || flag.store(true, AtomicOrdering::SeqCst));
        clock.set(0.0);
        let fired = sched.flush();
        assert_eq!(fired, 2);
        assert!(after.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sleeps_until_guarded_wake_then_flushes() {
        let (mut sched, clock) = scheduler_at(0.0);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        sched.schedule(1.0, 0, move || flag.store(true, AtomicOrdering::SeqCst));
        clock.set(1.0);
        let n = sched.tick().await;
        assert_eq!(n, 1);
        assert!(fired.load(AtomicOrdering::SeqCst));
    }
}
