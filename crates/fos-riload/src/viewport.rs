//! Viewport
//!
//! Viewport measurement, the below-the-fold test, and the shared monitor
//! that turns raw scroll/resize/orientation signals into rate-limited bus
//! topics.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::host::Page;
use crate::rate_limit::{Debounce, Throttle};
use crate::timer::TimerHost;

/// Coalescing window applied to every raw viewport signal
pub const SIGNAL_WINDOW: Duration = Duration::from_millis(250);

/// Default lead margin of the below-the-fold test (pixels)
pub const DEFAULT_THRESHOLD: i32 = 100;

/// High-frequency host signal that can change what is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Scroll,
    Resize,
    OrientationChange,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Scroll, Signal::Resize, Signal::OrientationChange];

    /// Bus topic the coalesced signal is republished under
    pub fn topic(&self) -> &'static str {
        match self {
            Signal::Scroll => "scroll",
            Signal::Resize => "resize",
            Signal::OrientationChange => "orientationchange",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

// ============================================================================
// Measurement
// ============================================================================

/// Raw numbers the host reports for computing the CSS viewport width.
///
/// `None` marks a value the host cannot provide.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub device_pixel_ratio: Option<f64>,
    pub screen_width: u32,
    pub document_client_width: Option<f64>,
    pub document_offset_width: Option<f64>,
    pub body_client_width: Option<f64>,
}

impl ViewportMetrics {
    /// Viewport width in CSS pixels.
    ///
    /// High-density screens report the physical screen width divided by the
    /// pixel ratio. Otherwise the first available layout width is used,
    /// falling back to the screen width.
    pub fn css_width(&self) -> u32 {
        if let Some(ratio) = self.device_pixel_ratio.filter(|r| r.is_finite() && *r > 1.0) {
            return (f64::from(self.screen_width) / ratio).ceil() as u32;
        }

        [
            self.document_client_width,
            self.document_offset_width,
            self.body_client_width,
        ]
        .into_iter()
        .flatten()
        .find(|width| !width.is_nan())
        .map_or(self.screen_width, |width| width.ceil().max(0.0) as u32)
    }
}

/// Raw numbers the host reports for the below-the-fold test
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FoldMetrics {
    /// Document rendered in standards (not quirks) mode
    pub standards_mode: bool,
    pub document_client_height: Option<f64>,
    pub body_client_height: Option<f64>,
    pub document_client_top: Option<f64>,
    pub body_client_top: Option<f64>,
}

fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

impl FoldMetrics {
    /// Usable height of the viewport.
    ///
    /// Standards mode reports it on the document element; quirks mode on
    /// the body.
    pub fn client_height(&self) -> f64 {
        let standards = if self.standards_mode {
            non_zero(self.document_client_height)
        } else {
            None
        };

        standards
            .or_else(|| non_zero(self.body_client_height))
            .or(self.document_client_height)
            .unwrap_or(0.0)
    }

    /// Border offset of the root element
    pub fn client_top(&self) -> f64 {
        non_zero(self.document_client_top)
            .or_else(|| non_zero(self.body_client_top))
            .unwrap_or(0.0)
    }

    /// Whether an element whose top edge sits at `top` (relative to the
    /// viewport) is still further than `threshold` pixels below the fold.
    pub fn is_below_fold(&self, top: f64, threshold: i32) -> bool {
        self.client_height() <= top - self.client_top() - f64::from(threshold)
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Registry of raw signal listeners shared by every engine of a context.
///
/// At most one raw listener per signal is ever attached to the host; each
/// one republishes a coalesced topic on the bus.
#[derive(Default)]
pub struct ViewportMonitor {
    attached: RefCell<HashSet<Signal>>,
    last_orientation: Rc<Cell<Option<i32>>>,
}

impl ViewportMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self, signal: Signal) -> bool {
        self.attached.borrow().contains(&signal)
    }

    /// Orientation recorded at the last republished change
    pub fn last_orientation(&self) -> Option<i32> {
        self.last_orientation.get()
    }

    /// Attach the raw listener for `signal` unless one already exists.
    ///
    /// Scroll is throttled, resize and orientation changes are debounced.
    /// Orientation changes are only republished when the reported value
    /// actually differs from the last one seen. Returns `true` when a
    /// listener was attached by this call.
    pub fn attach<P>(
        &self,
        signal: Signal,
        page: &Rc<P>,
        timers: &Rc<dyn TimerHost>,
        bus: &Rc<EventBus>,
    ) -> bool
    where
        P: Page + 'static,
    {
        if !self.attached.borrow_mut().insert(signal) {
            return false;
        }

        let bus = Rc::clone(bus);
        let handler: Rc<dyn Fn()> = match signal {
            Signal::Scroll => {
                let throttle = Throttle::new(Rc::clone(timers), SIGNAL_WINDOW, move |()| {
                    republish(&bus, signal);
                });
                Rc::new(move || {
                    throttle.call(());
                })
            }
            Signal::Resize => {
                let debounce = Debounce::new(Rc::clone(timers), SIGNAL_WINDOW, move |()| {
                    republish(&bus, signal);
                });
                Rc::new(move || debounce.call(()))
            }
            Signal::OrientationChange => {
                self.last_orientation.set(page.orientation());
                let last = Rc::clone(&self.last_orientation);
                let page = Rc::downgrade(page);
                let debounce = Debounce::new(Rc::clone(timers), SIGNAL_WINDOW, move |()| {
                    let Some(page) = page.upgrade() else {
                        return;
                    };
                    let current = page.orientation();
                    if current == last.get() {
                        tracing::trace!("Orientation unchanged ({:?}), not republishing", current);
                        return;
                    }
                    last.set(current);
                    republish(&bus, signal);
                });
                Rc::new(move || debounce.call(()))
            }
        };

        page.listen(signal, handler);
        tracing::debug!("Attached raw '{}' listener", signal);
        true
    }
}

fn republish(bus: &EventBus, signal: Signal) {
    match bus.publish(signal.topic()) {
        Ok(delivered) => tracing::trace!("Republished '{}' to {} subscribers", signal, delivered),
        Err(err) => tracing::warn!("Republishing '{}' failed: {}", signal, err),
    }
}

impl fmt::Debug for ViewportMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached: Vec<Signal> = Signal::ALL
            .into_iter()
            .filter(|signal| self.is_attached(*signal))
            .collect();
        f.debug_struct("ViewportMonitor")
            .field("attached", &attached)
            .field("last_orientation", &self.last_orientation.get())
            .finish()
    }
}
