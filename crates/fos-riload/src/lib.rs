//! fOS Riload
//!
//! Responsive, deferred image loading for fOS Engine.
//!
//! For each responsive image placeholder the engine picks the size variant
//! matching the viewport width and decides when to fetch it: right away,
//! after the window load, or once the image nears the viewport. High-rate
//! scroll, resize and orientation signals are coalesced into a bounded
//! number of loading passes, and failed fetches are retried with a
//! cache-busting query up to a configured limit.
//!
//! The engine never touches a document directly. The host implements
//! [`Page`] and [`TimerHost`]; [`SimulatedPage`] and [`ManualTimers`] are
//! in-memory versions for headless runs.
//!
//! # Example
//! ```rust
//! use std::rc::Rc;
//! use fos_riload::{
//!     BreakpointRange, BreakpointTable, Context, DeferMode, ManualTimers, Riloadr,
//!     RiloadConfig, SimImage, SimulatedPage, TimerHost,
//! };
//!
//! let timers = Rc::new(ManualTimers::new());
//! let host: Rc<dyn TimerHost> = timers.clone();
//! let page = Rc::new(SimulatedPage::new(Rc::clone(&host)));
//! page.add_image(SimImage::new().attr("data-small", "cat-320.jpg"));
//!
//! let media = BreakpointTable::new()
//!     .with("small", BreakpointRange::at_most(1024))
//!     .with("large", BreakpointRange::at_least(1025));
//! let config = RiloadConfig::new(media).base_url("/img/").defer(DeferMode::BelowFold);
//!
//! let context = Context::new(Rc::clone(&page), host);
//! let engine = Riloadr::new(&context, config).unwrap();
//!
//! page.ready();
//! timers.run_until_idle(100);
//! assert_eq!(engine.size_key().as_deref(), Some("small"));
//! assert_eq!(page.requests()[0].1, "/img/cat-320.jpg");
//! ```

pub mod breakpoint;
pub mod bus;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod loader;
pub mod rate_limit;
pub mod scheduler;
pub mod sim;
pub mod timer;
pub mod viewport;

pub use breakpoint::{resolve, BreakpointRange, BreakpointTable};
pub use bus::{ErrorPolicy, EventBus, Subscriber, SubscriberResult};
pub use config::{DeferMode, ImageCallback, Options, RiloadConfig};
pub use context::Context;
pub use engine::Riloadr;
pub use error::{BusError, RiloadError};
pub use host::{Capability, FetchCallback, FetchOutcome, HostCallback, Page};
pub use loader::{ImageLoadController, ImageRecord, LoadStatus, RiloadedSet};
pub use rate_limit::{Debounce, Throttle};
pub use scheduler::{Decision, TickPlan, VisibilityScheduler};
pub use sim::{ImageId, SectionId, SimImage, SimulatedPage};
pub use timer::{ManualTimers, SmolTimers, TimerHost, TimerId, NEXT_TURN};
pub use viewport::{FoldMetrics, Signal, ViewportMetrics, ViewportMonitor, SIGNAL_WINDOW};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
