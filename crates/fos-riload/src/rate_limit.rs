//! Rate Limiting
//!
//! Throttle and debounce wrappers that coalesce bursts of calls into a
//! bounded number of invocations. Both are driven by a [`TimerHost`] and
//! know nothing about viewports, so they can wrap any callback.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::timer::{TimerHost, TimerId};

// ============================================================================
// Debounce
// ============================================================================

/// Runs the wrapped function once calls stop arriving for `wait`.
///
/// Every call restarts the timer. With `immediate`, the function runs on
/// the leading edge instead: on a call that arrives while no timer is
/// running, and never again until the quiet period has elapsed.
pub struct Debounce<A> {
    state: Rc<DebounceState<A>>,
}

struct DebounceState<A> {
    func: Box<dyn Fn(A)>,
    wait: Duration,
    immediate: bool,
    timers: Rc<dyn TimerHost>,
    timeout: Cell<Option<TimerId>>,
}

impl<A: Clone + 'static> Debounce<A> {
    /// Trailing-edge debounce
    pub fn new<F>(timers: Rc<dyn TimerHost>, wait: Duration, func: F) -> Self
    where
        F: Fn(A) + 'static,
    {
        Self::with_edge(timers, wait, false, func)
    }

    /// Leading-edge debounce
    pub fn immediate<F>(timers: Rc<dyn TimerHost>, wait: Duration, func: F) -> Self
    where
        F: Fn(A) + 'static,
    {
        Self::with_edge(timers, wait, true, func)
    }

    fn with_edge<F>(timers: Rc<dyn TimerHost>, wait: Duration, immediate: bool, func: F) -> Self
    where
        F: Fn(A) + 'static,
    {
        Self {
            state: Rc::new(DebounceState {
                func: Box::new(func),
                wait,
                immediate,
                timers,
                timeout: Cell::new(None),
            }),
        }
    }

    pub fn call(&self, args: A) {
        let state = &self.state;

        if state.immediate && state.timeout.get().is_none() {
            (state.func)(args.clone());
        }

        if let Some(id) = state.timeout.take() {
            state.timers.clear_timeout(id);
        }

        let later = Rc::clone(state);
        let id = state.timers.set_timeout(
            state.wait,
            Box::new(move || {
                later.timeout.set(None);
                if !later.immediate {
                    (later.func)(args);
                }
            }),
        );
        state.timeout.set(Some(id));
    }

    /// Whether a quiet-period timer is running
    pub fn is_pending(&self) -> bool {
        self.state.timeout.get().is_some()
    }

    pub fn wait(&self) -> Duration {
        self.state.wait
    }
}

impl<A> Clone for Debounce<A> {
    fn clone(&self) -> Self {
        Self { state: Rc::clone(&self.state) }
    }
}

impl<A> fmt::Debug for Debounce<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debounce")
            .field("wait", &self.state.wait)
            .field("immediate", &self.state.immediate)
            .field("pending", &self.state.timeout.get().is_some())
            .finish()
    }
}

// ============================================================================
// Throttle
// ============================================================================

/// Runs the wrapped function at most once per `wait` window.
///
/// The first call of a burst runs immediately. Further calls inside the
/// window are folded into one trailing call, made with the latest
/// arguments when the window closes. Each call returns the result of the
/// most recent leading-edge invocation.
pub struct Throttle<A, R> {
    state: Rc<ThrottleState<A, R>>,
}

struct ThrottleState<A, R> {
    func: Box<dyn Fn(A) -> R>,
    wait: Duration,
    timers: Rc<dyn TimerHost>,
    timeout: Cell<Option<TimerId>>,
    latest: RefCell<Option<A>>,
    result: RefCell<Option<R>>,
    flags: Rc<BurstFlags>,
    when_done: Debounce<()>,
}

/// Burst bookkeeping, reset once the stream of calls has gone quiet
#[derive(Default)]
struct BurstFlags {
    throttling: Cell<bool>,
    more: Cell<bool>,
}

impl<A, R> Throttle<A, R>
where
    A: Clone + 'static,
    R: Clone + 'static,
{
    pub fn new<F>(timers: Rc<dyn TimerHost>, wait: Duration, func: F) -> Self
    where
        F: Fn(A) -> R + 'static,
    {
        let flags = Rc::new(BurstFlags::default());
        let reset = Rc::clone(&flags);
        let when_done = Debounce::new(Rc::clone(&timers), wait, move |()| {
            reset.more.set(false);
            reset.throttling.set(false);
        });

        Self {
            state: Rc::new(ThrottleState {
                func: Box::new(func),
                wait,
                timers,
                timeout: Cell::new(None),
                latest: RefCell::new(None),
                result: RefCell::new(None),
                flags,
                when_done,
            }),
        }
    }

    pub fn call(&self, args: A) -> Option<R> {
        let state = &self.state;
        *state.latest.borrow_mut() = Some(args.clone());

        if state.timeout.get().is_none() {
            let later = Rc::clone(state);
            let id = state.timers.set_timeout(state.wait, Box::new(move || later.close_window()));
            state.timeout.set(Some(id));
        }

        if state.flags.throttling.get() {
            state.flags.more.set(true);
        } else {
            let result = (state.func)(args);
            *state.result.borrow_mut() = Some(result);
        }

        state.when_done.call(());
        state.flags.throttling.set(true);
        state.result.borrow().clone()
    }

    /// Whether a window is currently open
    pub fn is_throttling(&self) -> bool {
        self.state.flags.throttling.get()
    }

    pub fn wait(&self) -> Duration {
        self.state.wait
    }
}

impl<A: Clone + 'static, R> ThrottleState<A, R> {
    fn close_window(&self) {
        self.timeout.set(None);
        if self.flags.more.get() {
            let latest = self.latest.borrow().clone();
            if let Some(args) = latest {
                (self.func)(args);
            }
        }
        self.when_done.call(());
    }
}

impl<A, R> Clone for Throttle<A, R> {
    fn clone(&self) -> Self {
        Self { state: Rc::clone(&self.state) }
    }
}

impl<A, R> fmt::Debug for Throttle<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("wait", &self.state.wait)
            .field("throttling", &self.state.flags.throttling.get())
            .field("trailing", &self.state.flags.more.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimers;

    const WAIT: Duration = Duration::from_millis(250);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn setup() -> (Rc<ManualTimers>, Rc<dyn TimerHost>) {
        let timers = Rc::new(ManualTimers::new());
        let host: Rc<dyn TimerHost> = timers.clone();
        (timers, host)
    }

    /// Records (call time, argument) for every invocation
    fn log_calls(timers: &Rc<ManualTimers>) -> (Rc<RefCell<Vec<(u64, u32)>>>, impl Fn(u32) -> u32 + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let clock = Rc::clone(timers);
        let func = move |arg: u32| {
            sink.borrow_mut().push((clock.now().as_millis() as u64, arg));
            arg * 10
        };
        (log, func)
    }

    #[test]
    fn test_throttle_single_call_fires_once() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let throttle = Throttle::new(host, WAIT, func);

        assert_eq!(throttle.call(1), Some(10));
        timers.advance(ms(1000));

        assert_eq!(*log.borrow(), vec![(0, 1)]);
        assert!(!throttle.is_throttling());
    }

    #[test]
    fn test_throttle_burst_gives_leading_and_trailing() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let throttle = Throttle::new(host, WAIT, func);

        assert_eq!(throttle.call(1), Some(10));
        for arg in 2..=5 {
            timers.advance(ms(40));
            // Coalesced calls report the last leading-edge result.
            assert_eq!(throttle.call(arg), Some(10));
        }
        timers.advance(ms(1000));

        assert_eq!(*log.borrow(), vec![(0, 1), (250, 5)]);
    }

    #[test]
    fn test_throttle_bounds_rate_under_continuous_calls() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let throttle = Throttle::new(host, WAIT, func);

        // One call every 10ms for a full second.
        for arg in 0..100 {
            throttle.call(arg);
            timers.advance(ms(10));
        }
        timers.advance(ms(1000));

        let calls = log.borrow();
        assert!(calls.len() <= 6, "too many calls: {:?}", *calls);
        for pair in calls.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= 250, "window violated: {:?}", *calls);
        }
        // The final burst is flushed with the last argument.
        assert_eq!(calls.last().map(|c| c.1), Some(99));
    }

    #[test]
    fn test_throttle_new_burst_after_quiet_period_leads() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let throttle = Throttle::new(host, WAIT, func);

        throttle.call(1);
        throttle.call(2);
        timers.advance(ms(2000));
        throttle.call(3);
        timers.advance(ms(2000));

        assert_eq!(*log.borrow(), vec![(0, 1), (250, 2), (2000, 3)]);
    }

    #[test]
    fn test_debounce_burst_fires_once_after_last_call() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let debounce = Debounce::new(host, WAIT, move |arg| {
            func(arg);
        });

        for arg in 1..=5 {
            debounce.call(arg);
            timers.advance(ms(100));
        }
        // Last call at t=400; nothing has fired yet.
        assert!(log.borrow().is_empty());
        assert!(debounce.is_pending());

        timers.advance(ms(1000));
        assert_eq!(*log.borrow(), vec![(650, 5)]);
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_debounce_separate_bursts() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let debounce = Debounce::new(host, WAIT, move |arg| {
            func(arg);
        });

        debounce.call(1);
        timers.advance(ms(300));
        debounce.call(2);
        timers.advance(ms(300));

        assert_eq!(*log.borrow(), vec![(250, 1), (550, 2)]);
    }

    #[test]
    fn test_debounce_immediate_leading_edge_only() {
        let (timers, host) = setup();
        let (log, func) = log_calls(&timers);
        let debounce = Debounce::immediate(host, WAIT, move |arg| {
            func(arg);
        });

        debounce.call(1);
        timers.advance(ms(100));
        debounce.call(2);
        timers.advance(ms(1000));
        debounce.call(3);
        timers.advance(ms(1000));

        assert_eq!(*log.borrow(), vec![(0, 1), (1100, 3)]);
    }
}
