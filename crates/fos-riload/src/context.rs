//! Shared Context
//!
//! State shared by every engine on one page: the host, its timers, the
//! topic bus, the raw listener registry, the cached viewport width and the
//! set of images some engine has already taken over.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::bus::EventBus;
use crate::host::Page;
use crate::loader::RiloadedSet;
use crate::timer::TimerHost;
use crate::viewport::ViewportMonitor;

/// Cheaply cloneable handle to page-wide engine state
pub struct Context<P: Page> {
    page: Rc<P>,
    timers: Rc<dyn TimerHost>,
    bus: Rc<EventBus>,
    monitor: Rc<ViewportMonitor>,
    viewport_width: Rc<OnceCell<u32>>,
    riloaded: RiloadedSet<P::Image>,
}

impl<P: Page> Context<P> {
    pub fn new(page: Rc<P>, timers: Rc<dyn TimerHost>) -> Self {
        Self::with_bus(page, timers, EventBus::new())
    }

    pub fn with_bus(page: Rc<P>, timers: Rc<dyn TimerHost>, bus: EventBus) -> Self {
        Self {
            page,
            timers,
            bus: Rc::new(bus),
            monitor: Rc::new(ViewportMonitor::new()),
            viewport_width: Rc::new(OnceCell::new()),
            riloaded: Rc::default(),
        }
    }

    pub fn page(&self) -> &Rc<P> {
        &self.page
    }

    pub fn timers(&self) -> &Rc<dyn TimerHost> {
        &self.timers
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    pub fn monitor(&self) -> &Rc<ViewportMonitor> {
        &self.monitor
    }

    /// Images taken over by any engine of this context
    pub fn riloaded(&self) -> &RiloadedSet<P::Image> {
        &self.riloaded
    }

    /// Viewport width in CSS pixels.
    ///
    /// Measured on first use and cached for the lifetime of the context;
    /// later resizes do not change it.
    pub fn viewport_width(&self) -> u32 {
        *self.viewport_width.get_or_init(|| {
            let width = self.page.viewport_metrics().css_width();
            tracing::debug!("Measured viewport width: {}px", width);
            width
        })
    }

    pub fn is_viewport_measured(&self) -> bool {
        self.viewport_width.get().is_some()
    }
}

impl<P: Page> Clone for Context<P> {
    fn clone(&self) -> Self {
        Self {
            page: Rc::clone(&self.page),
            timers: Rc::clone(&self.timers),
            bus: Rc::clone(&self.bus),
            monitor: Rc::clone(&self.monitor),
            viewport_width: Rc::clone(&self.viewport_width),
            riloaded: Rc::clone(&self.riloaded),
        }
    }
}

impl<P: Page> fmt::Debug for Context<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("bus", &self.bus)
            .field("monitor", &self.monitor)
            .field("viewport_width", &self.viewport_width.get())
            .field("riloaded", &self.riloaded.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPage;
    use crate::timer::ManualTimers;

    #[test]
    fn test_viewport_width_measured_once() {
        let timers: Rc<dyn TimerHost> = Rc::new(ManualTimers::new());
        let page = Rc::new(SimulatedPage::new(Rc::clone(&timers)));
        page.set_viewport_width(320);

        let context = Context::new(Rc::clone(&page), timers);
        let shared = context.clone();
        assert!(!context.is_viewport_measured());
        assert_eq!(context.viewport_width(), 320);

        page.set_viewport_width(1280);
        assert_eq!(shared.viewport_width(), 320);
        assert!(shared.is_viewport_measured());
    }
}
