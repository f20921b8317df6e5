mod config;
mod logging;

use std::cell::RefCell;
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use cache::{CacheContext, ConfigError, RestoreError, RestoreOptions, TreeCache};
use storage::FileWindowStore;
use tabs::{BasicTabManager, WindowId};
use thiserror::Error;
use tokio::task::LocalSet;
use tracing::{debug, info, warn};
use ui::{sidebar, Document, DocumentError};
use util::TimelineMetrics;

use crate::config::AppConfig;

const APP_NAME: &str = "canopy";
const DEMO_URLS: [&str; 3] = [
    "https://www.rust-lang.org/",
    "https://docs.rs/tokio",
    "https://crates.io/",
];

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialise logging: {0}")]
    Logging(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to render sidebar: {0}")]
    Render(#[from] DocumentError),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{APP_NAME}: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => AppConfig::load(Path::new(&path))?,
        None => AppConfig::default(),
    };
    logging::init(&config.log)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;
    LocalSet::new().block_on(&runtime, session(config))
}

/// One sidebar instance bound to the persisted cache.
struct Sidebar {
    document: Rc<RefCell<Document>>,
    cache: TreeCache<FileWindowStore, BasicTabManager>,
}

impl Sidebar {
    fn open(config: &AppConfig, tabs: &Rc<BasicTabManager>, metrics: &Rc<TimelineMetrics>) -> Self {
        let document = Rc::new(RefCell::new(sidebar::create_sidebar()));
        let context = Rc::new(CacheContext::new(&config.cache));
        let cache = TreeCache::new(
            context,
            FileWindowStore::new(&config.storage_dir),
            Rc::clone(tabs),
            Rc::clone(&document),
            metrics.clone(),
        );
        Self { document, cache }
    }

    /// Restores the window from the cache, rebuilding it from live tabs on a
    /// miss.
    async fn build(&self, window: WindowId, tabs: &BasicTabManager) -> Result<bool, AppError> {
        let restored = match self
            .cache
            .restore_window_from_effective_window_cache(window, RestoreOptions::default())
            .await
        {
            Ok(restored) => restored,
            Err(err) => {
                report_restore_error(window, &err);
                false
            }
        };

        let mut document = self.document.borrow_mut();
        if restored {
            let refreshed = sidebar::refresh_dirty_tabs(&mut document, window)?;
            debug!(window_id = %window, refreshed, "refreshed restored tabs");
        } else {
            sidebar::render_window(&mut document, window, &tabs.tabs(window))?;
            debug!(window_id = %window, "rendered window from live tabs");
        }
        Ok(restored)
    }
}

fn report_restore_error(window: WindowId, err: &RestoreError) {
    warn!(window_id = %window, error = %err, "falling back to a full render");
}

async fn session(config: AppConfig) -> Result<(), AppError> {
    let window = WindowId::new(1);
    let tabs = Rc::new(BasicTabManager::new());
    for url in DEMO_URLS {
        tabs.create_tab(window, url);
    }
    if let Some(first) = tabs.tabs(window).first() {
        tabs.set_pinned(first.id, true);
    }
    let metrics = Rc::new(TimelineMetrics::new());
    let settle = config.cache.capture_delay() + Duration::from_millis(100);

    let first = Sidebar::open(&config, &tabs, &metrics);
    let restored = first.build(window, &tabs).await?;
    info!(window_id = %window, restored, "sidebar opened");
    first.cache.context().finish_initialization();
    first.cache.reserve_to_cache_tree(window).await;

    // A tab opened shortly after startup reschedules the pending capture.
    tabs.create_tab(window, "https://github.com/");
    sidebar::render_window(&mut first.document.borrow_mut(), window, &tabs.tabs(window))?;
    first.cache.reserve_to_cache_tree(window).await;
    tokio::time::sleep(settle).await;
    first.cache.cancel_pending_capture(window);
    drop(first);

    let reloaded = Sidebar::open(&config, &tabs, &metrics);
    let restored = reloaded.build(window, &tabs).await?;
    info!(
        window_id = %window,
        restored,
        tabs = ?sidebar::describe_tabs(&reloaded.document.borrow(), window),
        "sidebar reloaded"
    );

    for event in metrics.events() {
        debug!(elapsed_ms = event.elapsed.as_millis() as u64, name = %event.name, "metric");
    }
    Ok(())
}
