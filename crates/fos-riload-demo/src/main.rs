//! fOS Riload Demo - Main Entry Point
//!
//! Drives a below-the-fold engine on a simulated page in real time and
//! logs which images get fetched while the page scrolls.

use std::rc::Rc;
use std::time::Duration;

use fos_riload::{
    BreakpointRange, BreakpointTable, Context, DeferMode, RiloadConfig, Riloadr, SimulatedPage,
    SmolTimers, TimerHost,
};
use smol::{LocalExecutor, Timer};
use tracing_subscriber::EnvFilter;

const IMAGE_COUNT: usize = 12;
const IMAGE_SPACING: f64 = 400.0;
const SCROLL_STEP: f64 = 120.0;
const SCROLL_INTERVAL: Duration = Duration::from_millis(40);

fn default_config() -> RiloadConfig {
    let media = BreakpointTable::new()
        .with("small", BreakpointRange::at_most(480))
        .with("medium", BreakpointRange::between(481, 1024))
        .with("large", BreakpointRange::at_least(1025));
    RiloadConfig::new(media)
        .base_url("https://img.example.com/")
        .defer(DeferMode::BelowFold)
        .retries(2)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Optional JSON config path
    let config = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!("Loading config from {}", path);
            RiloadConfig::from_json_file(&path)?
        }
        None => default_config(),
    };

    let executor = Rc::new(LocalExecutor::new());
    let timers: Rc<dyn TimerHost> = Rc::new(SmolTimers::new(Rc::clone(&executor)));
    let page = Rc::new(SimulatedPage::new(Rc::clone(&timers)));
    let keys: Vec<&str> = config.media()?.iter().map(|(key, _)| key).collect();
    let images = page.add_column(IMAGE_COUNT, IMAGE_SPACING, &keys);

    let context = Context::new(Rc::clone(&page), timers);
    let engine = Riloadr::new(&context, config.clone())?;

    tracing::info!("Starting fOS Riload demo with {} images", images.len());
    page.ready();

    smol::block_on(executor.run(async {
        // Let the initial pass settle.
        Timer::after(Duration::from_millis(300)).await;

        let bottom = IMAGE_COUNT as f64 * IMAGE_SPACING;
        let mut y = 0.0;
        while y < bottom {
            y += SCROLL_STEP;
            page.scroll_to(y);
            Timer::after(SCROLL_INTERVAL).await;
        }

        // Trailing scroll pass plus fetch latency.
        Timer::after(Duration::from_millis(600)).await;
    }));

    let (loading, loaded, failed) = engine.counts();
    tracing::info!(
        "Done: {} loaded, {} loading, {} failed, {} still waiting",
        loaded,
        loading,
        failed,
        engine.pending().len()
    );
    for (image, url) in page.requests() {
        tracing::debug!("{:?} <- {}", image, url);
    }

    Ok(())
}
