use std::sync::{
    atomic::{AtomicBool, Ordering},
    LazyLock, Mutex,
};

use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: AtomicBool = AtomicBool::new(false);

static CHROME_GUARD_HANDLE: LazyLock<Mutex<Option<tracing_chrome::FlushGuard>>> =
    LazyLock::new(|| Mutex::new(None));

/// Environment variable holding the `EnvFilter` directives, e.g. `strata_execution=debug`.
pub const LOG_FILTER_ENV_VAR: &str = "STRATA_LOG";

const DEFAULT_LOG_FILTER: &str = "info";

pub fn is_tracing_initialized() -> bool {
    TRACING_INIT.load(Ordering::Relaxed)
}

/// Installs the global subscriber. `log` records are bridged into it.
///
/// Panics if called more than once per process.
pub fn init_tracing(enable_chrome_trace: bool) {
    assert!(
        !TRACING_INIT.swap(true, Ordering::Relaxed),
        "Cannot init tracing, already initialized!"
    );

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let chrome_layer = if enable_chrome_trace {
        let mut mg = CHROME_GUARD_HANDLE
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(
            mg.is_none(),
            "Expected chrome flush guard to be None on init"
        );
        let (chrome_layer, guard) = ChromeLayerBuilder::new()
            // The initial writer to the chrome trace is a no-op sink, so we don't write anything
            // only on calls to start_chrome_trace() do we write traces.
            .writer(std::io::sink())
            .trace_style(tracing_chrome::TraceStyle::Threaded)
            .build();
        *mg = Some(guard);
        Some(chrome_layer)
    } else {
        None
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(chrome_layer)
        .try_init()
    {
        eprintln!("Failed to install global tracing subscriber: {e}");
    }
}

pub fn start_chrome_trace() -> bool {
    let mut mg = CHROME_GUARD_HANDLE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(fg) = mg.as_mut() {
        // start_new(None) will let tracing-chrome choose the file and file name.
        fg.start_new(None);
        true
    } else {
        false
    }
}

pub fn finish_chrome_trace() -> bool {
    let mut mg = CHROME_GUARD_HANDLE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(fg) = mg.as_mut() {
        // Flushes the current trace file and swaps in a dummy writer; the guard lives in a
        // static so it can't be dropped to close the file.
        fg.start_new(Some(Box::new(std::io::sink())));
        true
    } else {
        false
    }
}
