//! Timers
//!
//! Host timer facility the engine schedules all deferred work on, with a
//! virtual-clock implementation for headless runs and a real-time one on
//! top of `smol`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use smol::{LocalExecutor, Task, Timer};

/// Delay used to push work onto the next turn of the host loop
pub const NEXT_TURN: Duration = Duration::from_millis(1);

/// Boxed one-shot timer callback
pub type TimerCallback = Box<dyn FnOnce()>;

/// Handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Host timer facility
pub trait TimerHost {
    /// Run `callback` once, `delay` from now
    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> TimerId;

    /// Cancel a timer. Unknown or already fired timers are ignored.
    fn clear_timeout(&self, id: TimerId);

    /// Current host time, measured from an arbitrary fixed origin
    fn now(&self) -> Duration;

    /// Schedule `callback` after the current call stack has cleared
    fn defer(&self, callback: TimerCallback) -> TimerId {
        self.set_timeout(NEXT_TURN, callback)
    }
}

// ============================================================================
// Virtual clock
// ============================================================================

/// Deterministic timer queue driven by an explicit clock.
///
/// Timers fire in due-time order; timers due at the same instant fire in
/// registration order.
#[derive(Default)]
pub struct ManualTimers {
    now: Cell<Duration>,
    next_id: Cell<u64>,
    queue: RefCell<BTreeMap<(Duration, TimerId), TimerCallback>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with the clock starting at `origin`
    pub fn starting_at(origin: Duration) -> Self {
        let timers = Self::default();
        timers.now.set(origin);
        timers
    }

    /// Number of timers waiting to fire
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Move the clock forward by `by`, firing every timer that falls due,
    /// including timers scheduled by callbacks within the window.
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get() + by;
        let mut fired = 0;

        while let Some((due, callback)) = self.pop_due(target) {
            self.now.set(due);
            callback();
            fired += 1;
        }

        self.now.set(target);
        fired
    }

    /// Fire timers until the queue is empty, moving the clock as needed.
    ///
    /// Gives up after `max_callbacks` to stop self-rescheduling timers from
    /// spinning forever; returns the number of callbacks run.
    pub fn run_until_idle(&self, max_callbacks: usize) -> usize {
        let mut fired = 0;

        while fired < max_callbacks {
            let Some((due, callback)) = self.pop_due(Duration::MAX) else {
                break;
            };
            if due > self.now.get() {
                self.now.set(due);
            }
            callback();
            fired += 1;
        }

        fired
    }

    fn pop_due(&self, deadline: Duration) -> Option<(Duration, TimerCallback)> {
        let mut queue = self.queue.borrow_mut();
        let (&(due, id), _) = queue.first_key_value()?;
        if due > deadline {
            return None;
        }
        queue.remove(&(due, id)).map(|callback| (due, callback))
    }
}

impl TimerHost for ManualTimers {
    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let due = self.now.get() + delay;
        self.queue.borrow_mut().insert((due, id), callback);
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.queue.borrow_mut().retain(|(_, queued), _| *queued != id);
    }

    fn now(&self) -> Duration {
        self.now.get()
    }
}

impl std::fmt::Debug for ManualTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimers")
            .field("now", &self.now.get())
            .field("pending", &self.pending())
            .finish()
    }
}

// ============================================================================
// Real time
// ============================================================================

/// Wall-clock timers running as tasks on a single-threaded `smol` executor.
///
/// Callbacks only run while the executor is being driven.
pub struct SmolTimers {
    executor: Rc<LocalExecutor<'static>>,
    tasks: Rc<RefCell<HashMap<TimerId, Task<()>>>>,
    next_id: Cell<u64>,
}

impl SmolTimers {
    pub fn new(executor: Rc<LocalExecutor<'static>>) -> Self {
        Self {
            executor,
            tasks: Rc::default(),
            next_id: Cell::new(0),
        }
    }

    pub fn executor(&self) -> &Rc<LocalExecutor<'static>> {
        &self.executor
    }

    /// Number of timers waiting to fire
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl TimerHost for SmolTimers {
    fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let tasks = Rc::clone(&self.tasks);
        let task = self.executor.spawn(async move {
            Timer::after(delay).await;
            if let Some(task) = tasks.borrow_mut().remove(&id) {
                task.detach();
            }
            callback();
        });

        self.tasks.borrow_mut().insert(id, task);
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        // Dropping the task cancels it.
        self.tasks.borrow_mut().remove(&id);
    }

    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for SmolTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmolTimers")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn push(log: &Rc<RefCell<Vec<u32>>>, value: u32) -> TimerCallback {
        let log = Rc::clone(log);
        Box::new(move || log.borrow_mut().push(value))
    }

    #[test]
    fn test_fires_in_due_order() {
        let timers = ManualTimers::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        timers.set_timeout(ms(30), push(&log, 3));
        timers.set_timeout(ms(10), push(&log, 1));
        timers.set_timeout(ms(20), push(&log, 2));

        assert_eq!(timers.advance(ms(15)), 1);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(timers.advance(ms(100)), 2);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(timers.now(), ms(115));
    }

    #[test]
    fn test_same_instant_keeps_registration_order() {
        let timers = ManualTimers::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for value in 0..5 {
            timers.set_timeout(ms(10), push(&log, value));
        }
        timers.advance(ms(10));
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_clear_timeout() {
        let timers = ManualTimers::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let id = timers.set_timeout(ms(10), push(&log, 1));
        timers.set_timeout(ms(10), push(&log, 2));
        timers.clear_timeout(id);
        timers.clear_timeout(TimerId(999));

        timers.advance(ms(10));
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn test_nested_timers_fire_within_window() {
        let timers = Rc::new(ManualTimers::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_timers = Rc::clone(&timers);
        let inner_log = Rc::clone(&log);
        timers.set_timeout(
            ms(10),
            Box::new(move || {
                inner_log.borrow_mut().push(inner_timers.now().as_millis() as u32);
                let log = Rc::clone(&inner_log);
                let clock = Rc::clone(&inner_timers);
                inner_timers.set_timeout(
                    ms(10),
                    Box::new(move || log.borrow_mut().push(clock.now().as_millis() as u32)),
                );
            }),
        );

        assert_eq!(timers.advance(ms(25)), 2);
        assert_eq!(*log.borrow(), vec![10, 20]);
    }

    #[test]
    fn test_defer_runs_next_turn() {
        let timers = ManualTimers::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        timers.defer(push(&log, 7));
        assert!(log.borrow().is_empty());
        assert_eq!(timers.run_until_idle(10), 1);
        assert_eq!(*log.borrow(), vec![7]);
        assert_eq!(timers.now(), NEXT_TURN);
    }

    #[test]
    fn test_run_until_idle_is_bounded() {
        fn reschedule(timers: Rc<ManualTimers>) {
            let again = Rc::clone(&timers);
            timers.set_timeout(ms(5), Box::new(move || reschedule(again)));
        }

        let timers = Rc::new(ManualTimers::new());
        reschedule(Rc::clone(&timers));
        assert_eq!(timers.run_until_idle(50), 50);
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn test_smol_timers_fire_and_cancel() {
        let executor = Rc::new(LocalExecutor::new());
        let timers = SmolTimers::new(Rc::clone(&executor));
        let log = Rc::new(RefCell::new(Vec::new()));

        timers.set_timeout(ms(5), push(&log, 1));
        let cancelled = timers.set_timeout(ms(5), push(&log, 2));
        timers.clear_timeout(cancelled);
        assert_eq!(timers.pending(), 1);

        smol::block_on(executor.run(Timer::after(ms(50))));

        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(timers.pending(), 0);
    }
}
