use std::fmt;
use std::time::Duration;

use crate::types::{DocumentId, PassId};

/// The current run was canceled; the caller should unwind promptly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
#[error("analysis canceled")]
pub struct Canceled;

/// Error returned by pass code.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
	/// The pass observed cancellation and stopped.
	#[error(transparent)]
	Canceled(#[from] Canceled),
	/// The pass itself failed.
	#[error(transparent)]
	Failed(#[from] anyhow::Error),
}

impl PassError {
	pub fn failed(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
		Self::Failed(anyhow::Error::msg(message))
	}

	pub fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled(_))
	}
}

/// Errors surfaced by the scheduler core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DaemonError {
	/// The run was canceled before it completed.
	#[error("analysis canceled")]
	Canceled,
	/// A pass factory returned an error or panicked; the pass was skipped.
	#[error("pass {pass} ({name}) could not be created for document {}: {message}", document.0)]
	PassInstantiation {
		pass: PassId,
		name: String,
		document: DocumentId,
		message: String,
	},
	/// A pass failed while collecting or applying. Later failures of the same
	/// run are attached as `suppressed`.
	#[error("pass {pass} ({name}) failed on document {}: {message}{}", document.0, SuppressedSuffix(suppressed))]
	PassExecution {
		pass: PassId,
		name: String,
		document: DocumentId,
		message: String,
		suppressed: Vec<String>,
	},
	/// A synchronous run did not finish in time.
	#[error("analysis still running after {elapsed:?}; pending passes: [{}]", pending.join(", "))]
	Timeout { elapsed: Duration, pending: Vec<String> },
}

impl From<Canceled> for DaemonError {
	fn from(_: Canceled) -> Self {
		Self::Canceled
	}
}

struct SuppressedSuffix<'a>(&'a [String]);

impl fmt::Display for SuppressedSuffix<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return Ok(());
		}
		write!(f, " (+{} suppressed: {})", self.0.len(), self.0.join("; "))
	}
}

/// Aborts on API misuse that would otherwise corrupt scheduler state.
#[track_caller]
pub(crate) fn illegal_usage(message: impl fmt::Display) -> ! {
	panic!("illegal daemon usage: {message}")
}
