use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// Error type carried by caller-supplied callbacks (submission, gates, resolvers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("callback panicked: {0}")]
pub struct CallbackPanicked(pub String);

/// Awaits a caller-supplied future, turning a panic inside it into an error.
pub(crate) async fn settle<T, F>(future: F) -> Result<T, BoxError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Box::new(CallbackPanicked(panic_message(payload.as_ref())))),
    }
}

/// Runs a synchronous caller-supplied callback, turning a panic inside it into an error.
pub(crate) fn settle_sync<T>(callback: impl FnOnce() -> T) -> Result<T, CallbackPanicked> {
    std::panic::catch_unwind(AssertUnwindSafe(callback))
        .map_err(|payload| CallbackPanicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
