//! Isolated execution of one handler invocation.
//!
//! The invocation runs on its own task so that a panic is contained and
//! reported as a [`FailureKind::HandlerPanicked`] failure instead of tearing
//! down the caller.

use courier_domain::{FailureKind, HandlerFailure};
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) async fn invoke_guarded<Fut>(
    invocation: Fut,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) -> Result<(), HandlerFailure>
where
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let bounded = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, invocation).await {
                    Ok(result) => result.map_err(|e| HandlerFailure::from_error(&e)),
                    Err(_) => Err(HandlerFailure::new(
                        FailureKind::TimedOut,
                        format!("handler did not finish within {limit:?}"),
                        String::new(),
                    )),
                },
                None => invocation.await.map_err(|e| HandlerFailure::from_error(&e)),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HandlerFailure::new(
                FailureKind::Cancelled,
                "handler execution was cancelled",
                String::new(),
            )),
            result = bounded => result,
        }
    });

    match task.await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            Err(HandlerFailure::new(
                FailureKind::HandlerPanicked,
                format!("handler panicked: {message}"),
                message,
            ))
        }
        Err(join_error) => Err(HandlerFailure::new(
            FailureKind::Cancelled,
            "handler task was aborted",
            join_error.to_string(),
        )),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
