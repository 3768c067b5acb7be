//! One spawned task per pass instance: wait for dependencies, collect on the
//! blocking pool, report back to the interactive thread.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{mpsc, watch};
use xeno_worker::{JobGuard, WorkerPool, panic_message};

use crate::dirty::DirtyScope;
use crate::error::{Canceled, PassError};
use crate::pass::{Artifact, HighlightingPass, PassContext, PassState};
use crate::progress::ProgressToken;
use crate::types::{DocumentId, EditorId};

/// Completion signal a dependent waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Signal {
	Pending,
	Collected,
	Aborted,
}

/// Lock-free pass state shared between the task and the interactive thread.
#[derive(Debug)]
pub(super) struct StateCell(AtomicU8);

impl StateCell {
	pub(super) fn new(state: PassState) -> Self {
		Self(AtomicU8::new(Self::encode(state)))
	}

	pub(super) fn get(&self) -> PassState {
		match self.0.load(Ordering::Acquire) {
			0 => PassState::Pending,
			1 => PassState::Running,
			2 => PassState::Done,
			3 => PassState::Canceled,
			_ => PassState::Failed,
		}
	}

	pub(super) fn set(&self, state: PassState) {
		self.0.store(Self::encode(state), Ordering::Release);
	}

	fn encode(state: PassState) -> u8 {
		match state {
			PassState::Pending => 0,
			PassState::Running => 1,
			PassState::Done => 2,
			PassState::Canceled => 3,
			PassState::Failed => 4,
		}
	}
}

/// Result of one collect phase, waiting for its commit turn.
pub(super) struct Collected {
	pub(super) doc: usize,
	pub(super) slot: usize,
	/// `None` if the pass was lost to a panic in the pool itself.
	pub(super) pass: Option<Box<dyn HighlightingPass>>,
	pub(super) outcome: Result<Vec<Artifact>, PassError>,
}

pub(super) struct PassJob {
	pub(super) doc: usize,
	pub(super) slot: usize,
	pub(super) document: DocumentId,
	pub(super) editor: EditorId,
	pub(super) scope: DirtyScope,
	pub(super) stamp: u64,
	pub(super) pass: Box<dyn HighlightingPass>,
	pub(super) deps: Vec<watch::Receiver<Signal>>,
	pub(super) done: watch::Sender<Signal>,
	pub(super) state: Arc<StateCell>,
	pub(super) token: ProgressToken,
	pub(super) tx: mpsc::UnboundedSender<Collected>,
	pub(super) job: JobGuard,
}

impl PassJob {
	pub(super) async fn run(self, pool: WorkerPool) {
		let PassJob {
			doc,
			slot,
			document,
			editor,
			scope,
			stamp,
			pass,
			deps,
			done,
			state,
			token,
			tx,
			job,
		} = self;
		let _job = job;
		let signal = token.signal();

		let mut ready = !token.is_canceled();
		for mut dep in deps {
			if !ready {
				break;
			}
			ready = tokio::select! {
				biased;
				_ = signal.cancelled() => false,
				res = dep.wait_for(|s| *s != Signal::Pending) => matches!(res.as_deref(), Ok(Signal::Collected)),
			};
		}
		if !ready || token.is_canceled() {
			state.set(PassState::Canceled);
			let _ = done.send(Signal::Aborted);
			let _ = tx.send(Collected {
				doc,
				slot,
				pass: Some(pass),
				outcome: Err(PassError::Canceled(Canceled)),
			});
			return;
		}

		state.set(PassState::Running);
		let cx_token = token.clone();
		let joined = pool
			.run_blocking(move || {
				let mut pass = pass;
				let cx = PassContext {
					token: &cx_token,
					document,
					editor,
					scope,
					stamp,
				};
				let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| pass.collect(&cx))) {
					Ok(outcome) => outcome,
					Err(payload) => Err(PassError::Failed(anyhow::anyhow!("collect panicked: {}", panic_message(payload.as_ref())))),
				};
				(pass, outcome)
			})
			.await;

		let (pass, outcome) = match joined {
			Ok((pass, outcome)) => (Some(pass), outcome),
			Err(panicked) => (None, Err(PassError::Failed(anyhow::Error::new(panicked)))),
		};
		match &outcome {
			Ok(_) => {
				let _ = done.send(Signal::Collected);
			}
			Err(err) => {
				state.set(if err.is_canceled() { PassState::Canceled } else { PassState::Failed });
				if err.is_canceled() && token.cancel_with_reason(super::PASS_CANCELED) {
					tracing::debug!(doc = document.0, editor = editor.0, epoch = token.epoch(), "daemon.executor.collect_canceled_run");
				}
				let _ = done.send(Signal::Aborted);
			}
		}
		let _ = tx.send(Collected { doc, slot, pass, outcome });
	}
}
