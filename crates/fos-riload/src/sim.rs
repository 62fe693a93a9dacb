//! Simulated Page
//!
//! In-memory [`Page`] for headless runs: a column of images at fixed
//! offsets, a scrollable viewport, scripted fetch failures and manually
//! triggered boot signals. Fetches settle on the shared timer host after a
//! configurable latency.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::host::{Capability, FetchCallback, FetchOutcome, HostCallback, Page};
use crate::timer::TimerHost;
use crate::viewport::{FoldMetrics, Signal, ViewportMetrics};

/// Default time a simulated fetch takes to settle
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(20);

/// Image handle of a simulated page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

/// Section of a simulated page, usable as a collection root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(pub u32);

/// Description of an image to add to a [`SimulatedPage`]
#[derive(Debug, Clone)]
pub struct SimImage {
    attributes: HashMap<String, String>,
    top: f64,
    section: Option<SectionId>,
    responsive: bool,
    failures: usize,
}

impl Default for SimImage {
    fn default() -> Self {
        Self {
            attributes: HashMap::new(),
            top: 0.0,
            section: None,
            responsive: true,
            failures: 0,
        }
    }
}

impl SimImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Offset of the image's top edge from the top of the document
    pub fn top(mut self, top: f64) -> Self {
        self.top = top;
        self
    }

    pub fn section(mut self, section: SectionId) -> Self {
        self.section = Some(section);
        self
    }

    /// Not marked responsive, so never a candidate
    pub fn plain(mut self) -> Self {
        self.responsive = false;
        self
    }

    /// Fail the next `count` fetches
    pub fn failing(mut self, count: usize) -> Self {
        self.failures = count;
        self
    }
}

struct SimElement {
    desc: SimImage,
    source: Option<String>,
    processed: bool,
}

struct SimState {
    images: Vec<SimElement>,
    capabilities: HashSet<Capability>,
    orientation: Option<i32>,
    viewport: ViewportMetrics,
    viewport_height: f64,
    scroll_y: f64,
    latency: Duration,
    dom_ready: bool,
    dom_callbacks: Vec<HostCallback>,
    window_loaded: bool,
    load_callbacks: Vec<HostCallback>,
    listeners: HashMap<Signal, Vec<Rc<dyn Fn()>>>,
    requests: Vec<(ImageId, String)>,
}

/// In-memory page
pub struct SimulatedPage {
    timers: Rc<dyn TimerHost>,
    state: RefCell<SimState>,
}

impl SimulatedPage {
    /// 1024x768 standards-mode page with every capability, not yet ready
    pub fn new(timers: Rc<dyn TimerHost>) -> Self {
        Self {
            timers,
            state: RefCell::new(SimState {
                images: Vec::new(),
                capabilities: HashSet::from([Capability::BoundingRect, Capability::Orientation]),
                orientation: Some(0),
                viewport: ViewportMetrics {
                    device_pixel_ratio: Some(1.0),
                    screen_width: 1024,
                    document_client_width: Some(1024.0),
                    document_offset_width: Some(1024.0),
                    body_client_width: Some(1024.0),
                },
                viewport_height: 768.0,
                scroll_y: 0.0,
                latency: DEFAULT_LATENCY,
                dom_ready: false,
                dom_callbacks: Vec::new(),
                window_loaded: false,
                load_callbacks: Vec::new(),
                listeners: HashMap::new(),
                requests: Vec::new(),
            }),
        }
    }

    pub fn add_image(&self, image: SimImage) -> ImageId {
        let mut state = self.state.borrow_mut();
        let id = ImageId(state.images.len() as u32);
        state.images.push(SimElement {
            desc: image,
            source: None,
            processed: false,
        });
        id
    }

    /// Add `count` responsive images stacked `spacing` pixels apart, each
    /// with a `data-<key>` attribute per size key
    pub fn add_column(&self, count: usize, spacing: f64, size_keys: &[&str]) -> Vec<ImageId> {
        (0..count)
            .map(|index| {
                let mut image = SimImage::new().top(index as f64 * spacing);
                for key in size_keys {
                    image = image.attr(format!("data-{}", key), format!("{}/{}.jpg", key, index));
                }
                self.add_image(image)
            })
            .collect()
    }

    pub fn set_capability(&self, capability: Capability, supported: bool) {
        let mut state = self.state.borrow_mut();
        if supported {
            state.capabilities.insert(capability);
        } else {
            state.capabilities.remove(&capability);
        }
    }

    pub fn set_orientation(&self, orientation: Option<i32>) {
        self.state.borrow_mut().orientation = orientation;
    }

    pub fn set_viewport(&self, metrics: ViewportMetrics) {
        self.state.borrow_mut().viewport = metrics;
    }

    /// Plain (pixel ratio 1) viewport of `width` CSS pixels
    pub fn set_viewport_width(&self, width: u32) {
        self.set_viewport(ViewportMetrics {
            device_pixel_ratio: Some(1.0),
            screen_width: width,
            document_client_width: Some(f64::from(width)),
            document_offset_width: Some(f64::from(width)),
            body_client_width: Some(f64::from(width)),
        });
    }

    pub fn set_viewport_height(&self, height: f64) {
        self.state.borrow_mut().viewport_height = height;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.borrow_mut().latency = latency;
    }

    pub fn scroll_y(&self) -> f64 {
        self.state.borrow().scroll_y
    }

    /// Scroll to `y` and fire the raw scroll signal
    pub fn scroll_to(&self, y: f64) {
        self.state.borrow_mut().scroll_y = y;
        self.fire(Signal::Scroll);
    }

    /// Mark the document interactive, releasing queued ready callbacks
    pub fn ready(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.dom_ready = true;
            std::mem::take(&mut state.dom_callbacks)
        };
        for callback in callbacks {
            self.timers.defer(callback);
        }
    }

    /// Finish the window load, releasing queued load callbacks
    pub fn finish_loading(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.window_loaded = true;
            std::mem::take(&mut state.load_callbacks)
        };
        for callback in callbacks {
            self.timers.defer(callback);
        }
    }

    /// Invoke every listener attached for `signal`
    pub fn fire(&self, signal: Signal) {
        let listeners = self.state.borrow().listeners.get(&signal).cloned().unwrap_or_default();
        for listener in listeners {
            listener();
        }
    }

    pub fn listener_count(&self, signal: Signal) -> usize {
        self.state.borrow().listeners.get(&signal).map_or(0, Vec::len)
    }

    /// Every fetch issued, in order
    pub fn requests(&self) -> Vec<(ImageId, String)> {
        self.state.borrow().requests.clone()
    }

    pub fn requests_for(&self, image: ImageId) -> Vec<String> {
        self.state
            .borrow()
            .requests
            .iter()
            .filter(|(id, _)| *id == image)
            .map(|(_, url)| url.clone())
            .collect()
    }

    /// Source last assigned to `image`
    pub fn source(&self, image: ImageId) -> Option<String> {
        self.element(image, |element| element.source.clone()).flatten()
    }

    /// Whether the unprocessed marker was removed from `image`
    pub fn is_processed(&self, image: ImageId) -> bool {
        self.element(image, |element| element.processed).unwrap_or(false)
    }

    fn element<T>(&self, image: ImageId, read: impl FnOnce(&SimElement) -> T) -> Option<T> {
        self.state.borrow().images.get(image.0 as usize).map(read)
    }
}

impl Page for SimulatedPage {
    type Image = ImageId;
    type Node = SectionId;

    fn supports(&self, capability: Capability) -> bool {
        self.state.borrow().capabilities.contains(&capability)
    }

    fn on_dom_ready(&self, callback: HostCallback) {
        let mut state = self.state.borrow_mut();
        if state.dom_ready {
            drop(state);
            self.timers.defer(callback);
        } else {
            state.dom_callbacks.push(callback);
        }
    }

    fn on_window_load(&self, callback: HostCallback) {
        let mut state = self.state.borrow_mut();
        if state.window_loaded {
            drop(state);
            self.timers.defer(callback);
        } else {
            state.load_callbacks.push(callback);
        }
    }

    fn listen(&self, signal: Signal, handler: Rc<dyn Fn()>) {
        self.state.borrow_mut().listeners.entry(signal).or_default().push(handler);
    }

    fn orientation(&self) -> Option<i32> {
        let state = self.state.borrow();
        if state.capabilities.contains(&Capability::Orientation) {
            state.orientation
        } else {
            None
        }
    }

    fn viewport_metrics(&self) -> ViewportMetrics {
        self.state.borrow().viewport
    }

    fn fold_metrics(&self) -> FoldMetrics {
        FoldMetrics {
            standards_mode: true,
            document_client_height: Some(self.state.borrow().viewport_height),
            body_client_height: None,
            document_client_top: Some(0.0),
            body_client_top: None,
        }
    }

    fn candidates(&self, root: Option<&SectionId>) -> Vec<ImageId> {
        self.state
            .borrow()
            .images
            .iter()
            .enumerate()
            .filter(|(_, element)| element.desc.responsive && !element.processed)
            .filter(|(_, element)| root.is_none_or(|root| element.desc.section == Some(*root)))
            .map(|(index, _)| ImageId(index as u32))
            .collect()
    }

    fn attribute(&self, image: &ImageId, name: &str) -> Option<String> {
        self.element(*image, |element| element.desc.attributes.get(name).cloned())
            .flatten()
    }

    fn bounding_top(&self, image: &ImageId) -> f64 {
        let state = self.state.borrow();
        let top = state.images.get(image.0 as usize).map_or(0.0, |element| element.desc.top);
        top - state.scroll_y
    }

    fn fetch(&self, image: &ImageId, url: &str, done: FetchCallback) {
        let (outcome, latency) = {
            let mut state = self.state.borrow_mut();
            state.requests.push((*image, url.to_string()));
            let outcome = match state.images.get_mut(image.0 as usize) {
                Some(element) => {
                    element.source = Some(url.to_string());
                    if element.desc.failures > 0 {
                        element.desc.failures -= 1;
                        FetchOutcome::Failed
                    } else {
                        FetchOutcome::Loaded
                    }
                }
                None => FetchOutcome::Failed,
            };
            (outcome, state.latency)
        };

        self.timers.set_timeout(latency, Box::new(move || done(outcome)));
    }

    fn mark_processed(&self, image: &ImageId) {
        if let Some(element) = self.state.borrow_mut().images.get_mut(image.0 as usize) {
            element.processed = true;
        }
    }
}

impl fmt::Debug for SimulatedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SimulatedPage")
            .field("images", &state.images.len())
            .field("scroll_y", &state.scroll_y)
            .field("dom_ready", &state.dom_ready)
            .field("window_loaded", &state.window_loaded)
            .field("requests", &state.requests.len())
            .finish()
    }
}
