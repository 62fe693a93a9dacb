//! Image Load Controller
//!
//! Per-image load state machine: build the sized URL, issue the fetch, and
//! handle completion with bounded cache-busting retries.
//!
//! Image state lives in a side table keyed by handle rather than on the
//! image itself. Handing an image over also records it in a [`RiloadedSet`]
//! that engines on the same page share, so no engine picks it up again.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::config::ImageCallback;
use crate::host::{FetchOutcome, Page};
use crate::timer::TimerHost;

/// Attribute overriding the engine base URL for one image
pub const BASE_ATTRIBUTE: &str = "data-base";

/// Attribute holding the URL fragment for `size_key`
pub fn size_attribute(size_key: &str) -> String {
    format!("data-{}", size_key)
}

/// Images already taken over by some engine of a page
pub type RiloadedSet<I> = Rc<RefCell<HashSet<I>>>;

/// Load status of an image the engine has taken over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// A fetch is in flight
    Loading,
    /// Fetched successfully
    Loaded,
    /// Every attempt failed; nothing more will happen
    Failed,
}

/// Side-table entry for one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub status: LoadStatus,
    /// Retries issued so far
    pub retry_count: u32,
    /// Size key the URL was built for
    pub size_key: String,
    /// Last URL assigned
    pub url: String,
    attempt: u32,
}

/// Drives fetches for the images one engine hands over
pub struct ImageLoadController<P: Page> {
    page: Rc<P>,
    timers: Rc<dyn TimerHost>,
    base_url: String,
    max_retries: u32,
    on_load: Option<ImageCallback<P::Image>>,
    on_error: Option<ImageCallback<P::Image>>,
    records: RefCell<HashMap<P::Image, ImageRecord>>,
    riloaded: RiloadedSet<P::Image>,
    last_cache_buster: Cell<u64>,
}

impl<P: Page + 'static> ImageLoadController<P> {
    pub fn new(
        page: Rc<P>,
        timers: Rc<dyn TimerHost>,
        base_url: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            page,
            timers,
            base_url: base_url.into(),
            max_retries,
            on_load: None,
            on_error: None,
            records: RefCell::default(),
            riloaded: Rc::default(),
            last_cache_buster: Cell::new(0),
        }
    }

    pub fn with_callbacks(
        mut self,
        on_load: Option<ImageCallback<P::Image>>,
        on_error: Option<ImageCallback<P::Image>>,
    ) -> Self {
        self.on_load = on_load;
        self.on_error = on_error;
        self
    }

    /// Share the taken-over set with other controllers of the same page
    pub fn with_riloaded(mut self, riloaded: RiloadedSet<P::Image>) -> Self {
        self.riloaded = riloaded;
        self
    }

    /// Whether the image was ever handed to this controller, or to any
    /// controller sharing its set
    pub fn is_riloaded(&self, image: &P::Image) -> bool {
        self.riloaded.borrow().contains(image)
    }

    pub fn record(&self, image: &P::Image) -> Option<ImageRecord> {
        self.records.borrow().get(image).cloned()
    }

    pub fn status(&self, image: &P::Image) -> Option<LoadStatus> {
        self.records.borrow().get(image).map(|record| record.status)
    }

    /// Number of images in each status: (loading, loaded, failed)
    pub fn counts(&self) -> (usize, usize, usize) {
        self.records.borrow().values().fold((0, 0, 0), |(loading, loaded, failed), record| {
            match record.status {
                LoadStatus::Loading => (loading + 1, loaded, failed),
                LoadStatus::Loaded => (loading, loaded + 1, failed),
                LoadStatus::Failed => (loading, loaded, failed + 1),
            }
        })
    }

    /// URL for `image` at `size_key`. Retries append a cache-busting query.
    pub fn image_url(&self, image: &P::Image, size_key: &str, cache_buster: Option<u64>) -> String {
        let base = self
            .page
            .attribute(image, BASE_ATTRIBUTE)
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| self.base_url.clone());
        let fragment = self
            .page
            .attribute(image, &size_attribute(size_key))
            .unwrap_or_default();

        match cache_buster {
            Some(stamp) => format!("{}{}?{}", base, fragment, stamp),
            None => format!("{}{}", base, fragment),
        }
    }

    /// Take over `image` and issue its first fetch.
    ///
    /// Does nothing when the image was already taken over.
    pub fn load(self: &Rc<Self>, image: P::Image, size_key: &str) {
        if !self.riloaded.borrow_mut().insert(image.clone()) {
            tracing::trace!("{:?} already riloaded", image);
            return;
        }

        let url = self.image_url(&image, size_key, None);
        self.records.borrow_mut().insert(
            image.clone(),
            ImageRecord {
                status: LoadStatus::Loading,
                retry_count: 0,
                size_key: size_key.to_string(),
                url: url.clone(),
                attempt: 0,
            },
        );

        tracing::debug!("Loading {:?} from {}", image, url);
        self.issue(image, url, 0);
    }

    fn issue(self: &Rc<Self>, image: P::Image, url: String, attempt: u32) {
        let this = Rc::clone(self);
        let target = image.clone();
        self.page.fetch(
            &image,
            &url,
            Box::new(move |outcome| this.settle(target, attempt, outcome)),
        );
    }

    fn settle(self: &Rc<Self>, image: P::Image, attempt: u32, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Loaded => self.handle_load(image, attempt),
            FetchOutcome::Failed => self.handle_error(image, attempt),
        }
    }

    /// Completions from superseded attempts or settled images are ignored.
    fn is_current(&self, image: &P::Image, attempt: u32) -> bool {
        self.records
            .borrow()
            .get(image)
            .is_some_and(|record| record.attempt == attempt && record.status == LoadStatus::Loading)
    }

    fn handle_load(&self, image: P::Image, attempt: u32) {
        if !self.is_current(&image, attempt) {
            return;
        }
        if let Some(record) = self.records.borrow_mut().get_mut(&image) {
            record.status = LoadStatus::Loaded;
        }

        self.page.mark_processed(&image);
        tracing::debug!("Loaded {:?}", image);

        if let Some(on_load) = &self.on_load {
            on_load(&image);
        }
    }

    fn handle_error(self: &Rc<Self>, image: P::Image, attempt: u32) {
        if !self.is_current(&image, attempt) {
            return;
        }

        let retry = {
            let mut records = self.records.borrow_mut();
            let Some(record) = records.get_mut(&image) else {
                return;
            };
            if record.retry_count < self.max_retries {
                record.retry_count += 1;
                record.attempt += 1;
                Some((record.size_key.clone(), record.retry_count, record.attempt))
            } else {
                record.status = LoadStatus::Failed;
                None
            }
        };

        if let Some(on_error) = &self.on_error {
            on_error(&image);
        }

        match retry {
            Some((size_key, retry_count, attempt)) => {
                let url = self.image_url(&image, &size_key, Some(self.next_cache_buster()));
                tracing::debug!(
                    "Retrying {:?} ({}/{}) from {}",
                    image,
                    retry_count,
                    self.max_retries,
                    url
                );
                if let Some(record) = self.records.borrow_mut().get_mut(&image) {
                    record.url = url.clone();
                }
                self.issue(image, url, attempt);
            }
            None => tracing::debug!("Giving up on {:?}", image),
        }
    }

    /// Millisecond timestamp, bumped when needed so no two retries share one
    fn next_cache_buster(&self) -> u64 {
        let now = self.timers.now().as_millis() as u64;
        let stamp = now.max(self.last_cache_buster.get() + 1);
        self.last_cache_buster.set(stamp);
        stamp
    }
}

impl<P: Page> fmt::Debug for ImageLoadController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoadController")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("records", &self.records.borrow().len())
            .finish()
    }
}
