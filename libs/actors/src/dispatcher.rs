//! Dispatchers
//!
//! Named, shared worker pools that execute mailbox drains. A dispatcher
//! is referenced by name from tree entries and counts the live actors
//! bound to it so it cannot be destroyed out from under them.

use crate::error::{ActorError, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

/// Unit of work submitted to a pool
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution strategy behind a dispatcher
pub trait DispatchExecutor: Send + Sync + 'static {
    /// Run `task` on some worker, without blocking the caller on it
    fn execute(&self, task: Task);

    /// Stop accepting work and release the workers
    fn shutdown(&self, _timeout: Duration) {}
}

thread_local! {
    /// Set on every thread of a runtime built by this crate
    static RUNTIME_WORKER: Cell<bool> = const { Cell::new(false) };

    /// Tasks queued by nested `InlineExecutor::execute` calls; `Some` while
    /// an outermost call is draining on this thread
    static INLINE_QUEUE: RefCell<Option<VecDeque<Task>>> = const { RefCell::new(None) };
}

/// True when the caller runs on a worker of one of this crate's pools or
/// inside an `InlineExecutor` task. Blocking there on actor progress could
/// wait on itself.
pub(crate) fn on_dispatcher_thread() -> bool {
    RUNTIME_WORKER.with(Cell::get) || INLINE_QUEUE.with(|queue| queue.borrow().is_some())
}

/// Owned tokio runtime that can be shut down from any thread
pub(crate) struct RuntimeSlot {
    runtime: Mutex<Option<Runtime>>,
}

impl RuntimeSlot {
    pub fn new(runtime: Option<Runtime>) -> Self {
        Self {
            runtime: Mutex::new(runtime),
        }
    }

    /// Blocking shutdown is only legal outside a runtime context; inside
    /// one the runtime is released in the background. Callers that need
    /// queued work to finish wait for it before getting here.
    pub fn shutdown(&self, timeout: Duration) {
        if let Some(runtime) = self.runtime.lock().take() {
            if on_dispatcher_thread() || Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(timeout);
            }
        }
    }
}

impl Drop for RuntimeSlot {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

pub(crate) fn build_runtime(name: &str, worker_threads: usize) -> Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name(name.to_string())
        .on_thread_start(|| RUNTIME_WORKER.with(|flag| flag.set(true)))
        .enable_time()
        .build()
        .map_err(|e| ActorError::io(format!("Failed to build runtime '{}'", name), e))
}

/// Worker pool backed by a multi-threaded tokio runtime
pub struct WorkerPool {
    handle: Handle,
    slot: RuntimeSlot,
}

impl WorkerPool {
    /// Build a pool with its own runtime of `worker_threads` threads
    pub fn new(name: &str, worker_threads: usize) -> Result<Self> {
        let runtime = build_runtime(&format!("{}-worker", name), worker_threads)?;
        debug!(pool = %name, worker_threads, "Created worker pool");
        Ok(Self {
            handle: runtime.handle().clone(),
            slot: RuntimeSlot::new(Some(runtime)),
        })
    }

    /// Borrow an existing runtime; shutdown leaves it running
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            slot: RuntimeSlot::new(None),
        }
    }
}

impl DispatchExecutor for WorkerPool {
    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }

    fn shutdown(&self, timeout: Duration) {
        self.slot.shutdown(timeout);
    }
}

/// Runs tasks on the submitting thread.
///
/// Deterministic, single-threaded execution for tests and tools. The
/// outermost `execute` on a thread runs its task and then every task
/// submitted meanwhile, in submission order; nested calls only queue, so
/// the stack stays flat however long an actor keeps messaging itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

/// Clears the inline queue even if a task unwinds
struct InlineDrain;

impl Drop for InlineDrain {
    fn drop(&mut self) {
        INLINE_QUEUE.with(|queue| queue.borrow_mut().take());
    }
}

impl DispatchExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        let first = INLINE_QUEUE.with(|queue| {
            let mut queue = queue.borrow_mut();
            match queue.as_mut() {
                Some(pending) => {
                    pending.push_back(task);
                    None
                }
                None => {
                    *queue = Some(VecDeque::new());
                    Some(task)
                }
            }
        });
        let Some(first) = first else {
            return;
        };

        let _drain = InlineDrain;
        first();
        while let Some(next) =
            INLINE_QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        {
            next();
        }
    }
}

/// Registered dispatcher
pub struct Dispatcher {
    name: String,
    executor: Arc<dyn DispatchExecutor>,
    bound_actors: AtomicUsize,
    idle: (Mutex<()>, Condvar),
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, executor: Arc<dyn DispatchExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
            bound_actors: AtomicUsize::new(0),
            idle: (Mutex::new(()), Condvar::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Actors bound to this dispatcher. An actor stays bound after it is
    /// removed from the tree until its destroy hook has run here.
    pub fn bound_actors(&self) -> usize {
        self.bound_actors.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self) {
        self.bound_actors.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unbind(&self) {
        let _ = self
            .bound_actors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        let (lock, signal) = &self.idle;
        let _guard = lock.lock();
        signal.notify_all();
    }

    /// Block until no actor is bound or `deadline` passed
    pub(crate) fn wait_idle(&self, deadline: Instant) -> bool {
        let (lock, signal) = &self.idle;
        let mut guard = lock.lock();
        while self.bound_actors() > 0 {
            if signal.wait_until(&mut guard, deadline).timed_out() {
                return self.bound_actors() == 0;
            }
        }
        true
    }

    pub(crate) fn execute(&self, task: Task) {
        self.executor.execute(task);
    }

    pub(crate) fn shutdown(&self, timeout: Duration) {
        self.executor.shutdown(timeout);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("bound_actors", &self.bound_actors())
            .finish()
    }
}

/// Name → dispatcher mapping
#[derive(Default)]
pub struct DispatcherRegistry {
    dispatchers: RwLock<HashMap<String, Arc<Dispatcher>>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new dispatcher
    pub fn register(
        &self,
        name: &str,
        executor: Arc<dyn DispatchExecutor>,
    ) -> Result<Arc<Dispatcher>> {
        let mut dispatchers = self.dispatchers.write();
        if dispatchers.contains_key(name) {
            return Err(ActorError::DispatcherAlreadyExists {
                name: name.to_string(),
            });
        }
        let dispatcher = Arc::new(Dispatcher::new(name, executor));
        dispatchers.insert(name.to_string(), Arc::clone(&dispatcher));
        info!(dispatcher = %name, "Registered dispatcher");
        Ok(dispatcher)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Dispatcher>> {
        self.dispatchers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dispatchers.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dispatchers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<Dispatcher>> {
        self.dispatchers.write().remove(name)
    }

    pub(crate) fn take_all(&self) -> Vec<Arc<Dispatcher>> {
        self.dispatchers.write().drain().map(|(_, d)| d).collect()
    }
}
