//! Riloadr - Engine entry point
//!
//! One engine owns one pending queue and one loader, configured at
//! construction. Engines built from the same [`Context`] share the raw
//! viewport listeners, the coalesced topics and the record of images
//! already taken over, so overlapping roots never fetch an image twice.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::breakpoint::{resolve, BreakpointTable};
use crate::config::{DeferMode, Options};
use crate::context::Context;
use crate::error::RiloadError;
use crate::host::{Capability, Page};
use crate::loader::{ImageLoadController, ImageRecord, LoadStatus};
use crate::scheduler::{Decision, VisibilityScheduler};
use crate::viewport::Signal;

/// Responsive image loader bound to one page
pub struct Riloadr<P: Page + 'static> {
    inner: Rc<EngineInner<P>>,
}

struct EngineInner<P: Page + 'static> {
    context: Context<P>,
    media: BreakpointTable,
    defer: DeferMode,
    /// Below-the-fold deferral is active (requested and measurable)
    belowfold: bool,
    threshold: i32,
    parent_node: Option<P::Node>,
    /// Resolved at boot
    size_key: RefCell<Option<String>>,
    scheduler: RefCell<VisibilityScheduler<P::Image>>,
    loader: Rc<ImageLoadController<P>>,
    tick_scheduled: Cell<bool>,
    rescan_requested: Cell<bool>,
}

impl<P: Page + 'static> Riloadr<P> {
    /// Create an engine. It starts working once the page reports the
    /// document ready.
    ///
    /// Fails immediately when the breakpoint table is missing or empty.
    pub fn new(
        context: &Context<P>,
        options: impl Into<Options<P::Image, P::Node>>,
    ) -> Result<Self, RiloadError> {
        let options = options.into();
        let config = options.config;
        let media = config.media()?.clone();

        let page = context.page();
        let belowfold = config.defer == DeferMode::BelowFold && page.supports(Capability::BoundingRect);
        if config.defer == DeferMode::BelowFold && !belowfold {
            tracing::debug!("Element geometry unavailable, below-the-fold images load immediately");
        }

        let loader = ImageLoadController::new(
            Rc::clone(page),
            Rc::clone(context.timers()),
            config.base_url,
            config.retries,
        )
        .with_callbacks(options.on_load, options.on_error)
        .with_riloaded(Rc::clone(context.riloaded()));

        let inner = Rc::new(EngineInner {
            context: context.clone(),
            media,
            defer: config.defer,
            belowfold,
            threshold: config.threshold,
            parent_node: options.parent_node,
            size_key: RefCell::new(None),
            scheduler: RefCell::new(VisibilityScheduler::new()),
            loader: Rc::new(loader),
            tick_scheduled: Cell::new(false),
            rescan_requested: Cell::new(false),
        });

        let boot = Rc::clone(&inner);
        page.on_dom_ready(Box::new(move || boot.boot()));

        Ok(Self { inner })
    }

    /// Schedule a loading pass on the next turn.
    ///
    /// Calls made before the pass runs share it. With `force_rescan` the
    /// pass asks the page for new candidates first.
    pub fn load_images(&self, force_rescan: bool) {
        self.inner.load_images(force_rescan);
    }

    /// Pick up images inserted after the engine started
    pub fn riload(&self) {
        self.inner.load_images(true);
    }

    /// Size key in use; `None` until the document is ready
    pub fn size_key(&self) -> Option<String> {
        self.inner.size_key.borrow().clone()
    }

    pub fn is_booted(&self) -> bool {
        self.inner.size_key.borrow().is_some()
    }

    pub fn defer_mode(&self) -> DeferMode {
        self.inner.defer
    }

    /// Whether images actually wait for the viewport
    pub fn is_belowfold(&self) -> bool {
        self.inner.belowfold
    }

    pub fn media(&self) -> &BreakpointTable {
        &self.inner.media
    }

    /// Images waiting in the queue, front to back
    pub fn pending(&self) -> Vec<P::Image> {
        self.inner.scheduler.borrow().pending().to_vec()
    }

    pub fn image_status(&self, image: &P::Image) -> Option<LoadStatus> {
        self.inner.loader.status(image)
    }

    pub fn image_record(&self, image: &P::Image) -> Option<ImageRecord> {
        self.inner.loader.record(image)
    }

    /// Number of taken-over images per status: (loading, loaded, failed)
    pub fn counts(&self) -> (usize, usize, usize) {
        self.inner.loader.counts()
    }
}

impl<P: Page + 'static> EngineInner<P> {
    fn boot(self: &Rc<Self>) {
        let width = self.context.viewport_width();
        let size_key = resolve(&self.media, width).to_string();
        tracing::info!(
            "Riloadr ready: viewport {}px, size '{}', defer {}",
            width,
            size_key,
            self.defer
        );
        *self.size_key.borrow_mut() = Some(size_key);

        match self.defer {
            DeferMode::BelowFold => {
                if self.belowfold {
                    self.watch(Signal::Scroll);
                    self.watch(Signal::Resize);
                    if self.context.page().supports(Capability::Orientation) {
                        self.watch(Signal::OrientationChange);
                    }
                }
                // Above-the-fold images, or everything without geometry.
                self.load_images(false);
            }
            DeferMode::Load => {
                let this = Rc::clone(self);
                self.context
                    .page()
                    .on_window_load(Box::new(move || this.load_images(false)));
            }
            DeferMode::Immediate => self.load_images(false),
        }
    }

    /// Re-run the queue whenever `signal` is republished
    fn watch(self: &Rc<Self>, signal: Signal) {
        let context = &self.context;
        context
            .monitor()
            .attach(signal, context.page(), context.timers(), context.bus());

        let this = Rc::clone(self);
        context.bus().subscribe(signal.topic(), move || {
            this.load_images(false);
            Ok(())
        });
    }

    fn load_images(self: &Rc<Self>, force_rescan: bool) {
        if force_rescan {
            self.rescan_requested.set(true);
        }
        if self.tick_scheduled.replace(true) {
            tracing::trace!("Loading pass already scheduled");
            return;
        }

        let this = Rc::clone(self);
        self.context.timers().defer(Box::new(move || {
            this.tick_scheduled.set(false);
            let rescan = this.rescan_requested.replace(false);
            this.tick(rescan);
        }));
    }

    fn tick(&self, force_rescan: bool) {
        let Some(size_key) = self.size_key.borrow().clone() else {
            // Boot schedules a pass of its own; keep the rescan for it.
            self.rescan_requested.set(self.rescan_requested.get() || force_rescan);
            tracing::trace!("Document not ready, skipping loading pass");
            return;
        };

        let page = self.context.page();

        if self.scheduler.borrow().needs_collection(force_rescan) {
            let candidates = page.candidates(self.parent_node.as_ref());
            let added = self
                .scheduler
                .borrow_mut()
                .merge(candidates, |image| self.loader.is_riloaded(image));
            tracing::debug!("Collected {} new candidates", added);
        }

        if self.scheduler.borrow().is_empty() {
            return;
        }

        let fold = self.belowfold.then(|| page.fold_metrics());
        let plan = self.scheduler.borrow().plan(|image| {
            if self.loader.is_riloaded(image) {
                return Decision::Drop;
            }
            match &fold {
                Some(fold) if fold.is_below_fold(page.bounding_top(image), self.threshold) => {
                    Decision::Wait
                }
                _ => Decision::Load,
            }
        });
        self.scheduler.borrow_mut().commit(&plan);

        tracing::debug!(
            "Loading pass: {} to load, {} waiting",
            plan.ready.len(),
            plan.pending.len()
        );

        for image in plan.ready {
            self.loader.load(image, &size_key);
        }
    }
}

impl<P: Page + 'static> Clone for Riloadr<P> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<P: Page + 'static> fmt::Debug for Riloadr<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Riloadr")
            .field("defer", &self.inner.defer)
            .field("belowfold", &self.inner.belowfold)
            .field("threshold", &self.inner.threshold)
            .field("size_key", &self.inner.size_key.borrow())
            .field("pending", &self.inner.scheduler.borrow().len())
            .field("loader", &self.inner.loader)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakpointRange;
    use crate::config::RiloadConfig;
    use crate::sim::{SimImage, SimulatedPage};
    use crate::timer::{ManualTimers, TimerHost};

    fn setup() -> (Rc<ManualTimers>, Rc<SimulatedPage>, Context<SimulatedPage>) {
        let timers = Rc::new(ManualTimers::new());
        let host: Rc<dyn TimerHost> = timers.clone();
        let page = Rc::new(SimulatedPage::new(Rc::clone(&host)));
        let context = Context::new(Rc::clone(&page), host);
        (timers, page, context)
    }

    fn media() -> BreakpointTable {
        BreakpointTable::new()
            .with("small", BreakpointRange::at_most(480))
            .with("large", BreakpointRange::at_least(481))
    }

    #[test]
    fn test_missing_media_fails_fast() {
        let (_timers, _page, context) = setup();
        let err = Riloadr::new(&context, RiloadConfig::default()).unwrap_err();
        assert!(matches!(err, RiloadError::MissingMedia));
    }

    #[test]
    fn test_waits_for_dom_ready() {
        let (timers, page, context) = setup();
        page.add_column(3, 100.0, &["small", "large"]);
        let engine = Riloadr::new(&context, RiloadConfig::new(media())).unwrap();

        timers.run_until_idle(100);
        assert!(!engine.is_booted());
        assert!(page.requests().is_empty());

        page.ready();
        timers.run_until_idle(100);
        assert_eq!(engine.size_key().as_deref(), Some("large"));
        assert_eq!(page.requests().len(), 3);
    }

    #[test]
    fn test_burst_collapses_into_one_pass() {
        let (timers, page, context) = setup();
        let engine = Riloadr::new(&context, RiloadConfig::new(media())).unwrap();
        page.ready();
        timers.run_until_idle(100);

        page.add_column(2, 100.0, &["large"]);
        for _ in 0..10 {
            engine.load_images(false);
        }
        engine.riload();
        assert_eq!(timers.pending(), 1);

        timers.run_until_idle(100);
        assert_eq!(page.requests().len(), 2);
    }

    #[test]
    fn test_riload_before_ready_is_kept() {
        let (timers, page, context) = setup();
        let engine = Riloadr::new(&context, RiloadConfig::new(media())).unwrap();
        page.add_image(SimImage::new().attr("data-large", "a.jpg"));

        engine.riload();
        timers.run_until_idle(100);
        assert!(page.requests().is_empty());

        page.ready();
        timers.run_until_idle(100);
        assert_eq!(page.requests().len(), 1);
    }
}
