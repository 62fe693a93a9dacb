//! Host Interface
//!
//! Everything the engine needs from the document it runs in. The engine
//! never walks the tree itself: it asks the host for candidates, reads a
//! few attributes, and sends effects back through this trait.

use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use crate::viewport::{FoldMetrics, Signal, ViewportMetrics};

/// Optional host capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Element geometry can be measured (`getBoundingClientRect`)
    BoundingRect,
    /// The host reports device orientation and orientation-change signals
    Orientation,
}

/// Result of assigning a source to an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Loaded,
    Failed,
}

/// One-shot boot or fetch completion callback
pub type HostCallback = Box<dyn FnOnce()>;

/// Fetch completion callback
pub type FetchCallback = Box<dyn FnOnce(FetchOutcome)>;

/// Document the engine operates on
pub trait Page {
    /// Opaque image handle
    type Image: Clone + Eq + Hash + Debug + 'static;
    /// Root node candidates are collected under
    type Node: Clone + Debug + 'static;

    fn supports(&self, capability: Capability) -> bool;

    /// Run `callback` once the document is interactive. Must not run it
    /// synchronously, even when the document is already ready.
    fn on_dom_ready(&self, callback: HostCallback);

    /// Run `callback` once the window has finished loading
    fn on_window_load(&self, callback: HostCallback);

    /// Attach a raw signal listener
    fn listen(&self, signal: Signal, handler: Rc<dyn Fn()>);

    /// Current device orientation in degrees, if reported
    fn orientation(&self) -> Option<i32>;

    fn viewport_metrics(&self) -> ViewportMetrics;

    fn fold_metrics(&self) -> FoldMetrics;

    /// Unprocessed responsive images under `root` (the body when `None`),
    /// in document order
    fn candidates(&self, root: Option<&Self::Node>) -> Vec<Self::Image>;

    fn attribute(&self, image: &Self::Image, name: &str) -> Option<String>;

    /// Top edge of the image relative to the viewport
    fn bounding_top(&self, image: &Self::Image) -> f64;

    /// Point the image at `url`. `done` runs exactly once when the fetch
    /// settles.
    fn fetch(&self, image: &Self::Image, url: &str, done: FetchCallback);

    /// Drop the marker that flags the image as not yet processed
    fn mark_processed(&self, image: &Self::Image);
}
