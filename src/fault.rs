//! Fault boundary for user-supplied callbacks.
//!
//! Listeners, hooks, and proactive tasks run through [`run_guarded`], which turns both
//! returned errors and panics into [`BoticaError::HandlerFault`] so the caller can
//! report them and carry on with the next callback or delivery.

use crate::error::{BoticaError, BoticaResult};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Run `callback` and capture any error or panic as a handler fault
pub async fn run_guarded<F>(context: &str, callback: F) -> BoticaResult<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(BoticaError::handler_fault(context, format!("{error:#}"))),
        Err(panic) => Err(BoticaError::handler_fault(
            context,
            format!("panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_through() {
        assert!(run_guarded("noop", async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_becomes_handler_fault() {
        let result = run_guarded("order listener", async { Err(anyhow::anyhow!("boom")) }).await;
        match result {
            Err(BoticaError::HandlerFault { context, message }) => {
                assert_eq!(context, "order listener");
                assert_eq!(message, "boom");
            }
            other => panic!("expected handler fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_handler_fault() {
        async fn exploding_hook() -> anyhow::Result<()> {
            panic!("hook exploded")
        }

        let result = run_guarded("hook", exploding_hook()).await;
        match result {
            Err(BoticaError::HandlerFault { message, .. }) => {
                assert!(message.contains("hook exploded"));
            }
            other => panic!("expected handler fault, got {other:?}"),
        }
    }
}
