//! Cancellable handle for one analysis run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use xeno_worker::GenerationToken;

use crate::error::Canceled;
use crate::types::EditorId;

#[derive(Debug)]
struct RunMeta {
	started_at: Instant,
	complete_essential: bool,
	editors: Mutex<Vec<EditorId>>,
	cancel_reason: Mutex<Option<String>>,
}

/// Progress token of one run, stamped with the run epoch.
///
/// Clones share state. Cancellation is one-way and idempotent; the running
/// flag is separate so that exactly one caller of [`Self::stop_if_running`]
/// performs end-of-run bookkeeping.
#[derive(Debug, Clone)]
pub struct ProgressToken {
	lifecycle: GenerationToken,
	meta: Arc<RunMeta>,
}

impl ProgressToken {
	pub(crate) fn new(epoch: u64, editors: Vec<EditorId>, complete_essential: bool) -> Self {
		Self {
			lifecycle: GenerationToken::new(epoch),
			meta: Arc::new(RunMeta {
				started_at: Instant::now(),
				complete_essential,
				editors: Mutex::new(editors),
				cancel_reason: Mutex::new(None),
			}),
		}
	}

	/// An already canceled token, held before the first run starts.
	pub(crate) fn dead() -> Self {
		let token = Self::new(0, Vec::new(), false);
		token.cancel_with_reason("initial");
		token
	}

	pub fn epoch(&self) -> u64 {
		self.lifecycle.generation()
	}

	pub fn started_at(&self) -> Instant {
		self.meta.started_at
	}

	pub fn attached_editors(&self) -> Vec<EditorId> {
		self.meta.editors.lock().clone()
	}

	pub(crate) fn take_attached_editors(&self) -> Vec<EditorId> {
		std::mem::take(&mut *self.meta.editors.lock())
	}

	pub fn is_complete_essential_requested(&self) -> bool {
		self.meta.complete_essential
	}

	pub fn cancel_reason(&self) -> Option<String> {
		self.meta.cancel_reason.lock().clone()
	}

	/// Cancels the run. Returns true if this call performed the cancellation.
	pub fn cancel(&self) -> bool {
		self.cancel_with_reason("canceled")
	}

	pub fn cancel_with_reason(&self, reason: &str) -> bool {
		let mut slot = self.meta.cancel_reason.lock();
		if !self.lifecycle.cancel() {
			return false;
		}
		*slot = Some(reason.to_string());
		true
	}

	pub fn is_canceled(&self) -> bool {
		self.lifecycle.is_cancelled()
	}

	/// Cooperative cancellation point for pass code.
	pub fn check_canceled(&self) -> Result<(), Canceled> {
		if self.is_canceled() { Err(Canceled) } else { Ok(()) }
	}

	pub fn start(&self) -> bool {
		self.lifecycle.start()
	}

	pub fn is_running(&self) -> bool {
		self.lifecycle.is_running()
	}

	/// Returns true only for the caller that flipped running → stopped.
	pub fn stop_if_running(&self) -> bool {
		self.lifecycle.stop_if_running()
	}

	/// Blocks until canceled or `timeout` elapses; true if canceled.
	pub fn wait_canceled(&self, timeout: Duration) -> bool {
		self.lifecycle.wait_cancelled(timeout)
	}

	pub async fn cancelled(&self) {
		self.lifecycle.cancelled().await;
	}

	pub(crate) fn signal(&self) -> CancellationToken {
		self.lifecycle.child_signal()
	}

	pub fn same_run(&self, other: &ProgressToken) -> bool {
		self.lifecycle.same_token(&other.lifecycle)
	}
}
