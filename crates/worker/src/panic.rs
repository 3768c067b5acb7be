use std::any::Any;

use tokio::task::JoinError;

/// A worker task ended by panicking instead of returning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker task panicked: {0}")]
pub struct TaskPanicked(pub String);

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&'static str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// Returns the panic message of a failed join, or `None` for cancellation.
pub fn join_error_message(err: JoinError) -> Option<String> {
	if err.is_cancelled() {
		return None;
	}
	err.try_into_panic().ok().map(|payload| panic_message(payload.as_ref()))
}
