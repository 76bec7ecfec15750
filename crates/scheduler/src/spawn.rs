use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use crate::TaskRole;
use crate::error::StartError;

/// The runtime the scheduler will spawn onto.
pub(crate) fn runtime_handle() -> Result<Handle, StartError> {
	Handle::try_current().map_err(|_| StartError::NoRuntime)
}

/// Spawns a scheduler task tagged with its role.
pub(crate) fn spawn<F>(runtime: &Handle, role: TaskRole, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task_role = role.as_str(), "chime.spawn");
	runtime.spawn(fut)
}

/// Panic payload text of a failed join, or `None` if the task was aborted.
pub(crate) fn panic_message(err: JoinError) -> Option<String> {
	let payload = err.try_into_panic().ok()?;
	let text = match payload.downcast::<String>() {
		Ok(text) => *text,
		Err(payload) => payload.downcast_ref::<&str>().map_or_else(|| "non-string panic payload".to_string(), |s| (*s).to_string()),
	};
	Some(text)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn panic_text_from_str_payload() {
		let handle: JoinHandle<()> = tokio::spawn(async { panic!("boom-str") });
		let err = handle.await.unwrap_err();
		assert_eq!(panic_message(err).as_deref(), Some("boom-str"));
	}

	#[tokio::test]
	async fn panic_text_from_formatted_payload() {
		let handle: JoinHandle<()> = tokio::spawn(async { panic!("{}-{}", "boom", 7) });
		let err = handle.await.unwrap_err();
		assert_eq!(panic_message(err).as_deref(), Some("boom-7"));
	}

	#[tokio::test]
	async fn aborted_task_has_no_panic_text() {
		let handle = tokio::spawn(async {
			tokio::time::sleep(std::time::Duration::from_secs(60)).await;
		});
		handle.abort();
		let err = handle.await.unwrap_err();
		assert!(panic_message(err).is_none());
	}

	#[tokio::test]
	async fn runtime_handle_inside_runtime() {
		assert!(runtime_handle().is_ok());
	}

	#[test]
	fn runtime_handle_outside_runtime() {
		assert_eq!(runtime_handle().err(), Some(StartError::NoRuntime));
	}
}
