use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::panic::{TaskPanicked, join_error_message};

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("xeno-worker-global")
			.build()
			.expect("failed to build xeno-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Bounded pool for CPU-heavy blocking work.
///
/// Async coordination (dependency waits, cancellation selects) runs as plain
/// tasks on the runtime; only [`WorkerPool::run_blocking`] consumes one of the
/// `max_workers` permits, and the permit lives exactly as long as the blocking
/// closure does.
#[derive(Debug, Clone)]
pub struct WorkerPool {
	handle: tokio::runtime::Handle,
	permits: Arc<Semaphore>,
	max_workers: usize,
}

impl WorkerPool {
	/// Creates a pool on the current runtime, or the shared global runtime
	/// when called outside of one.
	pub fn new(max_workers: usize) -> Self {
		Self::with_handle(runtime_handle(), max_workers)
	}

	/// Creates a pool bound to an explicit runtime handle.
	pub fn with_handle(handle: tokio::runtime::Handle, max_workers: usize) -> Self {
		let max_workers = max_workers.max(1);
		Self {
			handle,
			permits: Arc::new(Semaphore::new(max_workers)),
			max_workers,
		}
	}

	pub fn max_workers(&self) -> usize {
		self.max_workers
	}

	/// Number of blocking slots currently free.
	pub fn available_permits(&self) -> usize {
		self.permits.available_permits()
	}

	/// Spawns an async coordination task on the pool's runtime.
	pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		tracing::trace!(available = self.permits.available_permits(), "worker.pool.spawn");
		self.handle.spawn(fut)
	}

	/// Runs `f` on a blocking thread once a permit is available.
	///
	/// Panics inside `f` are caught by the runtime and reported as [`TaskPanicked`].
	pub async fn run_blocking<F, R>(&self, f: F) -> Result<R, TaskPanicked>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		let permit = match Arc::clone(&self.permits).acquire_owned().await {
			Ok(permit) => permit,
			Err(_) => return Err(TaskPanicked("worker pool closed".to_string())),
		};
		tracing::trace!(available = self.permits.available_permits(), "worker.pool.run_blocking");
		let handle = self.handle.spawn_blocking(move || {
			let _permit = permit;
			f()
		});
		match handle.await {
			Ok(value) => Ok(value),
			Err(err) => Err(TaskPanicked(join_error_message(err).unwrap_or_else(|| "blocking task cancelled".to_string()))),
		}
	}
}

#[derive(Debug, Default)]
struct JobsInner {
	next_id: AtomicU64,
	jobs: Mutex<FxHashMap<u64, String>>,
	idle: Condvar,
}

/// Tracks named in-flight jobs so a caller can block until all of them end.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
	inner: Arc<JobsInner>,
}

impl JobTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers one job; it stays pending until the returned guard drops.
	pub fn enter(&self, name: impl Into<String>) -> JobGuard {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.jobs.lock().insert(id, name.into());
		JobGuard {
			tracker: self.clone(),
			id,
		}
	}

	pub fn pending(&self) -> usize {
		self.inner.jobs.lock().len()
	}

	/// Names of jobs still pending, sorted for stable diagnostics.
	pub fn pending_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.inner.jobs.lock().values().cloned().collect();
		names.sort();
		names
	}

	/// Blocks until no job is pending or `timeout` elapses.
	///
	/// Returns true if the tracker drained.
	pub fn wait_idle(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut jobs = self.inner.jobs.lock();
		while !jobs.is_empty() {
			if self.inner.idle.wait_until(&mut jobs, deadline).timed_out() {
				return jobs.is_empty();
			}
		}
		true
	}

	fn leave(&self, id: u64) {
		let mut jobs = self.inner.jobs.lock();
		jobs.remove(&id);
		if jobs.is_empty() {
			self.inner.idle.notify_all();
		}
	}
}

/// Keeps one [`JobTracker`] entry pending while alive.
#[derive(Debug)]
pub struct JobGuard {
	tracker: JobTracker,
	id: u64,
}

impl Drop for JobGuard {
	fn drop(&mut self) {
		self.tracker.leave(self.id);
	}
}
