//! Event Loop Implementation
//!
//! This module provides the deferred-execution primitive that deferred values
//! dispatch their handlers on: a FIFO microtask queue drained between
//! macrotasks, and a virtual-time timer queue for macrotasks.
//!
//! Each iteration of [`EventLoop::run_to_completion`]:
//! 1. Drains the microtask queue (bounded by the microtask budget)
//! 2. Reports rejections that are still unhandled
//! 3. Fires the next due timer, advancing virtual time if none is due yet
//! 4. Stops when no microtasks and no timers remain

mod config;

pub use config::EventLoopConfig;

use crate::deferred::{Deferred, DeferredState};
use crate::error::Result;
use crate::runtime::Value;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// The scheduler capability deferred values depend on.
///
/// `schedule` must run the task on a later turn, never synchronously. The
/// remaining hooks let a scheduler observe deferred values; they default to
/// doing nothing.
pub trait Scheduler {
    /// Run `task` on a later turn
    fn schedule(&self, task: Microtask);

    /// The handle a deferred value keeps to reach this scheduler.
    ///
    /// Queued tasks own deferred values, so the handle must not keep the
    /// scheduler's queues alive.
    fn handle(&self) -> Rc<dyn Scheduler>;

    /// A deferred value rejected while no handler was registered against it
    fn track_rejection(&self, _deferred: &Deferred) {}

    /// A deferred value was created
    fn record_creation(&self) {}

    /// A deferred value left `Pending`
    fn record_settlement(&self, _state: DeferredState) {}
}

/// A microtask to be executed (handler dispatch, queued callbacks)
pub struct Microtask {
    callback: Box<dyn FnOnce()>,
}

impl Microtask {
    /// Creates a new Microtask from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the microtask.
    pub fn run(self) {
        (self.callback)()
    }
}

impl fmt::Debug for Microtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Microtask {{ ... }}")
    }
}

/// Identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// A macrotask to be executed when virtual time reaches `fire_at`
struct Macrotask {
    id: TimerId,
    callback: Box<dyn FnOnce()>,
    fire_at: u64,
}

/// A rejection that nobody registered a handler for
#[derive(Debug, Clone)]
pub struct UnhandledRejection {
    /// Id of the rejected deferred value
    pub deferred_id: u64,
    /// The rejection reason
    pub reason: Value,
}

/// Result of running the event loop to completion via `run_to_completion()`
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// Number of full event loop iterations
    pub iterations: usize,
    /// The virtual time when the event loop finished
    pub final_time: u64,
    /// Rejections reported as unhandled during this run
    pub unhandled_rejections: usize,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, Serialize)]
pub struct EventLoopStats {
    /// Total microtasks processed across all ticks
    pub total_microtasks: u64,
    /// Total macrotasks processed across all ticks
    pub total_macrotasks: u64,
    /// Total number of event loop ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single tick
    pub max_microtasks_per_tick: u64,
    /// Longest tick duration in milliseconds (wall-clock)
    pub longest_tick_ms: u64,
    /// Total deferred values created
    pub total_deferred_created: u64,
    /// Total deferred values settled (fulfilled or rejected)
    pub total_deferred_settled: u64,
    /// Total rejections reported as unhandled
    pub total_unhandled_rejections: u64,
}

struct LoopState {
    /// Microtask queue (runs between macrotasks)
    microtask_queue: VecDeque<Microtask>,
    /// Timer queue
    macrotask_queue: Vec<Macrotask>,
    /// Current virtual time in milliseconds
    virtual_time: u64,
    next_timer_id: u64,
    /// Rejected deferred values to re-check after the current drain
    pending_rejections: Vec<Deferred>,
    /// Reported, not yet drained
    unhandled_rejections: Vec<UnhandledRejection>,
    config: EventLoopConfig,
    stats: EventLoopStats,
}

/// The event loop manages task queues and execution order.
///
/// `EventLoop` is a cheap handle; clones share the same queues. It is
/// single-threaded by construction.
///
/// # Examples
///
/// ```
/// use deferred::EventLoop;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let event_loop = EventLoop::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// event_loop.set_timeout(100, move || flag.set(true));
///
/// let result = event_loop.run_to_completion();
/// assert!(fired.get());
/// assert_eq!(result.final_time, 100);
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<LoopState>>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a new event loop with the default configuration
    pub fn new() -> Self {
        Self::from_config(EventLoopConfig::default())
    }

    /// Create an event loop from a validated configuration
    pub fn with_config(config: EventLoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: EventLoopConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LoopState {
                microtask_queue: VecDeque::new(),
                macrotask_queue: Vec::new(),
                virtual_time: 0,
                next_timer_id: 1,
                pending_rejections: Vec::new(),
                unhandled_rejections: Vec::new(),
                config,
                stats: EventLoopStats::default(),
            })),
        }
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.inner.borrow().virtual_time
    }

    /// Advance virtual time without firing timers; they fire on the next run
    pub fn advance_time(&self, ms: u64) {
        let mut state = self.inner.borrow_mut();
        state.virtual_time = state.virtual_time.saturating_add(ms);
    }

    /// Enqueue a microtask
    pub fn enqueue_microtask(&self, task: Microtask) {
        self.inner.borrow_mut().microtask_queue.push_back(task);
    }

    /// Enqueue a plain callback as a microtask
    pub fn queue_microtask<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.enqueue_microtask(Microtask::new(f));
    }

    /// Schedule `f` to run once `delay` ms of virtual time have passed
    pub fn set_timeout<F>(&self, delay: u64, f: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let mut state = self.inner.borrow_mut();
        let id = TimerId(state.next_timer_id);
        state.next_timer_id += 1;

        let fire_at = state.virtual_time.saturating_add(delay);
        state.macrotask_queue.push(Macrotask {
            id,
            callback: Box::new(f),
            fire_at,
        });
        tracing::trace!(timer = id.0, fire_at, "timer scheduled");
        id
    }

    /// Schedule a macrotask with 0ms delay (equivalent to `setImmediate`).
    pub fn set_immediate<F>(&self, f: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        self.set_timeout(0, f)
    }

    /// Cancel a timer by ID. Returns whether the timer was still scheduled.
    pub fn clear_timer(&self, id: TimerId) -> bool {
        let mut state = self.inner.borrow_mut();
        let before = state.macrotask_queue.len();
        state.macrotask_queue.retain(|task| task.id != id);
        state.macrotask_queue.len() != before
    }

    /// Check if there are pending microtasks
    pub fn has_pending_microtasks(&self) -> bool {
        !self.inner.borrow().microtask_queue.is_empty()
    }

    /// Check if there are pending macrotasks
    pub fn has_pending_macrotasks(&self) -> bool {
        !self.inner.borrow().macrotask_queue.is_empty()
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks() || self.has_pending_macrotasks()
    }

    /// Get the time of the next scheduled macrotask
    pub fn next_macrotask_time(&self) -> Option<u64> {
        self.inner
            .borrow()
            .macrotask_queue
            .iter()
            .map(|t| t.fire_at)
            .min()
    }

    /// Drain microtasks up to the budget limit, including ones queued while draining.
    ///
    /// Once the queue is empty, tracked rejections that are still unhandled are
    /// reported. Returns the number of microtasks that ran.
    pub fn run_microtasks(&self) -> usize {
        let budget = self.microtask_budget();
        let mut count: usize = 0;

        while count < budget {
            let task = self.inner.borrow_mut().microtask_queue.pop_front();
            match task {
                Some(task) => {
                    task.run();
                    count += 1;
                }
                None => break,
            }
        }

        {
            let mut state = self.inner.borrow_mut();
            state.stats.total_microtasks += count as u64;
            if (count as u64) > state.stats.max_microtasks_per_tick {
                state.stats.max_microtasks_per_tick = count as u64;
            }
        }

        if !self.has_pending_microtasks() {
            self.report_unhandled_rejections();
        }
        count
    }

    /// Run the event loop to completion following the standard algorithm:
    ///   1. Drain all microtasks
    ///   2. Report unhandled rejections
    ///   3. If a macrotask is due, execute it (advance time if needed)
    ///   4. Repeat from step 1
    ///   5. Stop when no microtasks and no macrotasks remain
    ///
    /// Returns a `RunResult` with statistics about what was processed.
    pub fn run_to_completion(&self) -> RunResult {
        let mut result = RunResult::default();
        let reported_before = self.stats().total_unhandled_rejections;

        loop {
            let tick_start = Instant::now();

            result.microtasks_processed += self.run_microtasks();

            let macrotask = self.next_macrotask();

            let tick_elapsed = tick_start.elapsed().as_millis() as u64;
            {
                let mut state = self.inner.borrow_mut();
                if tick_elapsed > state.stats.longest_tick_ms {
                    state.stats.longest_tick_ms = tick_elapsed;
                }
                state.stats.total_ticks += 1;
            }

            if let Some(task) = macrotask {
                tracing::trace!(timer = task.id.0, time = task.fire_at, "timer fired");
                (task.callback)();
                result.macrotasks_processed += 1;
                result.iterations += 1;
                self.inner.borrow_mut().stats.total_macrotasks += 1;
                continue;
            }

            // Nothing due and nothing queued: done
            if !self.has_pending_microtasks() {
                break;
            }

            result.iterations += 1;
        }

        result.final_time = self.current_time();
        result.unhandled_rejections =
            self.stats().total_unhandled_rejections.saturating_sub(reported_before) as usize;
        tracing::debug!(?result, "event loop idle");
        result
    }

    /// Remove the next timer, advancing virtual time to it when it is not yet due.
    /// Ties fire in scheduling order.
    fn next_macrotask(&self) -> Option<Macrotask> {
        let mut state = self.inner.borrow_mut();
        let idx = state
            .macrotask_queue
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.fire_at, t.id))
            .map(|(i, _)| i)?;

        let task = state.macrotask_queue.remove(idx);
        if task.fire_at > state.virtual_time {
            state.virtual_time = task.fire_at;
        }
        Some(task)
    }

    /// Re-check tracked rejections; report the ones that are still unhandled.
    fn report_unhandled_rejections(&self) {
        let tracked = std::mem::take(&mut self.inner.borrow_mut().pending_rejections);
        let mut reported = Vec::new();

        for deferred in tracked {
            if deferred.is_handled() {
                continue;
            }
            let reason = match deferred.settlement() {
                Some(Err(reason)) => reason,
                _ => continue,
            };
            tracing::warn!(id = deferred.id(), %reason, "unhandled rejection");
            reported.push(UnhandledRejection {
                deferred_id: deferred.id(),
                reason,
            });
        }

        let mut state = self.inner.borrow_mut();
        state.stats.total_unhandled_rejections += reported.len() as u64;
        state.unhandled_rejections.extend(reported);
    }

    /// Get and clear reported unhandled rejections
    pub fn drain_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut self.inner.borrow_mut().unhandled_rejections)
    }

    /// Clear all pending work (for cleanup)
    pub fn clear(&self) {
        let mut state = self.inner.borrow_mut();
        state.microtask_queue.clear();
        state.macrotask_queue.clear();
        state.pending_rejections.clear();
        state.unhandled_rejections.clear();
    }

    /// Set the maximum number of microtasks to drain per tick (starvation protection).
    pub fn set_microtask_budget(&self, limit: usize) {
        self.inner.borrow_mut().config.microtask_budget = limit.max(1);
    }

    /// Get the current microtask budget limit.
    pub fn microtask_budget(&self) -> usize {
        self.inner.borrow().config.microtask_budget
    }

    /// Get a snapshot of the current event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        self.inner.borrow().stats.clone()
    }

    /// Reset all event loop statistics to zero.
    pub fn reset_stats(&self) {
        self.inner.borrow_mut().stats = EventLoopStats::default();
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, task: Microtask) {
        self.enqueue_microtask(task);
    }

    fn handle(&self) -> Rc<dyn Scheduler> {
        Rc::new(WeakEventLoop {
            inner: Rc::downgrade(&self.inner),
        })
    }

    fn track_rejection(&self, deferred: &Deferred) {
        let mut state = self.inner.borrow_mut();
        if state.config.report_unhandled_rejections {
            state.pending_rejections.push(deferred.clone());
        }
    }

    fn record_creation(&self) {
        self.inner.borrow_mut().stats.total_deferred_created += 1;
    }

    fn record_settlement(&self, _state: DeferredState) {
        self.inner.borrow_mut().stats.total_deferred_settled += 1;
    }
}

/// Non-owning event loop handle held by deferred values.
///
/// Once every `EventLoop` handle is gone, the queues are freed and work
/// scheduled through this handle is dropped.
#[derive(Clone)]
struct WeakEventLoop {
    inner: Weak<RefCell<LoopState>>,
}

impl WeakEventLoop {
    fn upgrade(&self) -> Option<EventLoop> {
        self.inner.upgrade().map(|inner| EventLoop { inner })
    }
}

impl Scheduler for WeakEventLoop {
    fn schedule(&self, task: Microtask) {
        match self.upgrade() {
            Some(event_loop) => event_loop.schedule(task),
            None => tracing::trace!("event loop dropped; discarding microtask"),
        }
    }

    fn handle(&self) -> Rc<dyn Scheduler> {
        Rc::new(self.clone())
    }

    fn track_rejection(&self, deferred: &Deferred) {
        if let Some(event_loop) = self.upgrade() {
            event_loop.track_rejection(deferred);
        }
    }

    fn record_creation(&self) {
        if let Some(event_loop) = self.upgrade() {
            event_loop.record_creation();
        }
    }

    fn record_settlement(&self, state: DeferredState) {
        if let Some(event_loop) = self.upgrade() {
            event_loop.record_settlement(state);
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(state) => f
                .debug_struct("EventLoop")
                .field("virtual_time", &state.virtual_time)
                .field("microtasks", &state.microtask_queue.len())
                .field("macrotasks", &state.macrotask_queue.len())
                .finish(),
            Err(_) => write!(f, "EventLoop {{ ... }}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_event_loop_creation() {
        let el = EventLoop::new();
        assert_eq!(el.current_time(), 0);
        assert!(!el.has_pending_work());
        assert_eq!(el.microtask_budget(), 10_000);
    }

    #[test]
    fn test_microtask_queue() {
        let el = EventLoop::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        el.queue_microtask(move || h.set(h.get() + 1));
        assert!(el.has_pending_microtasks());

        assert_eq!(el.run_microtasks(), 1);
        assert_eq!(hits.get(), 1);
        assert!(!el.has_pending_microtasks());
    }

    #[test]
    fn test_microtasks_queued_while_draining_run_in_same_drain() {
        let el = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        let inner_loop = el.clone();
        el.queue_microtask(move || {
            o.borrow_mut().push(1);
            let o2 = o.clone();
            inner_loop.queue_microtask(move || o2.borrow_mut().push(3));
        });
        let o = order.clone();
        el.queue_microtask(move || o.borrow_mut().push(2));

        assert_eq!(el.run_microtasks(), 3);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_timer_scheduling() {
        let el = EventLoop::new();
        let id = el.set_timeout(100, || {});
        assert_eq!(id, TimerId(1));
        assert!(el.has_pending_macrotasks());
        assert_eq!(el.next_macrotask_time(), Some(100));
    }

    #[test]
    fn test_advance_time_moves_timer_origin() {
        let el = EventLoop::new();
        el.advance_time(40);
        assert_eq!(el.current_time(), 40);

        el.set_timeout(10, || {});
        assert_eq!(el.next_macrotask_time(), Some(50));
        assert_eq!(el.run_to_completion().final_time, 50);
    }

    #[test]
    fn test_huge_delay_saturates() {
        let el = EventLoop::new();
        el.advance_time(5);
        el.set_timeout(u64::MAX, || {});
        assert_eq!(el.next_macrotask_time(), Some(u64::MAX));

        el.advance_time(u64::MAX);
        assert_eq!(el.current_time(), u64::MAX);
    }

    #[test]
    fn test_run_microtasks_reports_unhandled_rejections() {
        let el = EventLoop::new();
        let _d = Deferred::rejected(&el, "lost");
        el.run_microtasks();

        assert_eq!(el.stats().total_unhandled_rejections, 1);
        assert!(el.inner.borrow().pending_rejections.is_empty());
        assert_eq!(el.drain_unhandled_rejections().len(), 1);
    }

    #[test]
    fn test_partial_drain_defers_report() {
        let el = EventLoop::new();
        el.set_microtask_budget(1);
        let d = Deferred::rejected(&el, "later");
        el.queue_microtask(|| {});
        el.queue_microtask(|| {});
        let inner = d.clone();
        el.queue_microtask(move || {
            inner.catch(Ok);
        });

        el.run_microtasks();
        assert_eq!(el.inner.borrow().pending_rejections.len(), 1);
        let result = el.run_to_completion();
        assert_eq!(result.unhandled_rejections, 0);
        assert!(el.inner.borrow().pending_rejections.is_empty());
    }

    #[test]
    fn test_deferred_handle_does_not_own_loop() {
        let el = EventLoop::new();
        let d = Deferred::resolved(&el, 1);
        assert_eq!(Rc::strong_count(&el.inner), 1);

        drop(el);
        let next = d.and_then(Ok);
        assert!(next.is_pending());
        assert_eq!(d.settlement(), Some(Ok(Value::from(1))));
    }

    #[test]
    fn test_timer_cancellation() {
        let el = EventLoop::new();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let id = el.set_timeout(100, move || f.set(true));
        assert!(el.clear_timer(id));
        assert!(!el.clear_timer(id));

        el.run_to_completion();
        assert!(!fired.get());
    }

    #[test]
    fn test_timers_fire_in_time_order() {
        let el = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (delay, tag) in [(30, 'c'), (10, 'a'), (20, 'b'), (10, 'A')] {
            let o = order.clone();
            el.set_timeout(delay, move || o.borrow_mut().push(tag));
        }

        let result = el.run_to_completion();
        assert_eq!(*order.borrow(), vec!['a', 'A', 'b', 'c']);
        assert_eq!(result.macrotasks_processed, 4);
        assert_eq!(result.final_time, 30);
    }

    #[test]
    fn test_microtasks_drain_before_next_timer() {
        let el = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        let handle = el.clone();
        el.set_immediate(move || {
            o.borrow_mut().push("T1");
            let o2 = o.clone();
            handle.queue_microtask(move || o2.borrow_mut().push("M"));
        });
        let o = order.clone();
        el.set_immediate(move || o.borrow_mut().push("T2"));

        el.run_to_completion();
        assert_eq!(*order.borrow(), vec!["T1", "M", "T2"]);
    }

    #[test]
    fn test_microtask_budget() {
        let el = EventLoop::new();
        el.set_microtask_budget(2);
        for _ in 0..5 {
            el.queue_microtask(|| {});
        }
        assert_eq!(el.run_microtasks(), 2);
        assert!(el.has_pending_microtasks());

        let result = el.run_to_completion();
        assert_eq!(result.microtasks_processed, 3);
        assert!(!el.has_pending_work());
    }

    #[test]
    fn test_stats_tracking() {
        let el = EventLoop::new();
        el.queue_microtask(|| {});
        el.set_timeout(5, || {});
        el.run_to_completion();

        let stats = el.stats();
        assert_eq!(stats.total_microtasks, 1);
        assert_eq!(stats.total_macrotasks, 1);
        assert!(stats.total_ticks >= 2);

        el.reset_stats();
        assert_eq!(el.stats().total_microtasks, 0);
    }

    #[test]
    fn test_clear() {
        let el = EventLoop::new();
        el.queue_microtask(|| {});
        el.set_timeout(1, || {});
        el.clear();
        assert!(!el.has_pending_work());
    }
}
