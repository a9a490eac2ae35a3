use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, LazyLock, OnceLock,
    },
};

use common_error::{StrataError, StrataResult};
use futures::FutureExt;
use tokio::runtime::Handle;

static NUM_CPUS: LazyLock<usize> =
    LazyLock::new(|| std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get));
static COMPUTE_RUNTIME_NUM_WORKER_THREADS: OnceLock<usize> = OnceLock::new();

pub fn get_or_init_compute_runtime_num_worker_threads() -> usize {
    *COMPUTE_RUNTIME_NUM_WORKER_THREADS.get_or_init(|| *NUM_CPUS)
}

pub fn set_compute_runtime_num_worker_threads(num_threads: usize) -> StrataResult<()> {
    if num_threads == 0 {
        return Err(StrataError::ValueError(
            "Compute runtime needs at least one worker thread".to_string(),
        ));
    }
    COMPUTE_RUNTIME_NUM_WORKER_THREADS
        .set(num_threads)
        .map_err(|_| {
            StrataError::InternalError("Compute runtime num worker threads already set".to_string())
        })
}

static COMPUTE_RUNTIME: OnceLock<RuntimeRef> = OnceLock::new();

pub type RuntimeRef = Arc<Runtime>;

#[derive(Clone, Debug)]
pub enum PoolType {
    Compute,
    Custom(String),
}

#[derive(Debug)]
pub struct Runtime {
    pub runtime: Arc<tokio::runtime::Runtime>,
    pool_type: PoolType,
}

impl Runtime {
    pub fn new(runtime: tokio::runtime::Runtime, pool_type: PoolType) -> RuntimeRef {
        Arc::new(Self {
            runtime: Arc::new(runtime),
            pool_type,
        })
    }

    pub fn pool_type(&self) -> &PoolType {
        &self.pool_type
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }
}

/// Runs `future` to completion, turning a panic inside it into a `ComputeError`.
pub async fn catch_panic<F>(future: F, pool_type: PoolType) -> StrataResult<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    AssertUnwindSafe(future).catch_unwind().await.map_err(|e| {
        let s = if let Some(s) = e.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = e.downcast_ref::<&str>() {
            (*s).to_string()
        } else {
            "unknown internal error".to_string()
        };
        StrataError::ComputeError(format!(
            "Caught panic when running task in the {pool_type:?} runtime: {s}"
        ))
    })
}

fn build_runtime(
    num_worker_threads: usize,
    thread_prefix: &'static str,
    pool_type: PoolType,
) -> StrataResult<RuntimeRef> {
    static THREAD_ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
    // Built on a fresh thread so that it can be called from inside another runtime.
    std::thread::spawn(move || {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .worker_threads(num_worker_threads)
            .enable_all()
            .thread_name_fn(move || {
                let id = THREAD_ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
                format!("{thread_prefix}-{id}")
            });
        builder
            .build()
            .map(|runtime| Runtime::new(runtime, pool_type))
            .map_err(StrataError::from)
    })
    .join()
    .map_err(|_| StrataError::InternalError("Runtime builder thread panicked".to_string()))?
}

/// Returns the process-wide compute pool every dispatcher schedules onto.
pub fn get_compute_runtime() -> RuntimeRef {
    COMPUTE_RUNTIME
        .get_or_init(|| {
            let num_threads = get_or_init_compute_runtime_num_worker_threads();
            log::debug!("Initializing compute runtime with {num_threads} worker threads");
            build_runtime(num_threads, "STRATACPU", PoolType::Compute)
                .unwrap_or_else(|e| panic!("Failed to build compute runtime: {e}"))
        })
        .clone()
}

/// Builds a standalone pool, e.g. to isolate a test from the shared compute runtime.
pub fn new_custom_runtime(name: &str, num_worker_threads: usize) -> StrataResult<RuntimeRef> {
    if num_worker_threads == 0 {
        return Err(StrataError::ValueError(format!(
            "Runtime {name} needs at least one worker thread"
        )));
    }
    build_runtime(
        num_worker_threads,
        "STRATACUSTOM",
        PoolType::Custom(name.to_string()),
    )
}
