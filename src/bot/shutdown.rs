//! # Shutdown Negotiation
//!
//! Answers the director's shutdown queries. Every registered hook runs in order with
//! the request and a shared response; any hook may mark the response canceled. The
//! reply carries `ready = !canceled`.
//!
//! A forced request still runs every hook so bots can persist critical state, but a
//! cancellation is advisory: the director is free to stop the container anyway.

use crate::client::BoticaClient;
use crate::fault::run_guarded;
use crate::protocol::{ShutdownRequestPacket, ShutdownResponsePacket};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Immutable view of one shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    forced: bool,
}

impl ShutdownRequest {
    pub fn new(forced: bool) -> Self {
        Self { forced }
    }

    /// When forced, the container may be stopped imminently and cancellation is ignored
    pub fn is_forced(&self) -> bool {
        self.forced
    }
}

/// Response shared by every hook of one negotiation round
#[derive(Debug, Clone, Default)]
pub struct ShutdownResponse {
    canceled: Arc<AtomicBool>,
}

impl ShutdownResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Ask the director not to shut this bot down; has no effect on forced requests
    pub fn set_canceled(&self, canceled: bool) {
        self.canceled.store(canceled, Ordering::SeqCst);
    }
}

pub type ShutdownHook = Arc<
    dyn Fn(ShutdownRequest, ShutdownResponse) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Runs shutdown hooks when the director asks whether the bot may stop
#[derive(Clone, Default)]
pub struct ShutdownHandler {
    hooks: Arc<RwLock<Vec<ShutdownHook>>>,
}

impl fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandler")
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

impl ShutdownHandler {
    /// Create a handler answering the shutdown queries received by `client`
    pub fn new(client: &BoticaClient) -> Self {
        let handler = Self::default();
        let negotiator = handler.clone();
        client.register_query_listener(move |request: ShutdownRequestPacket| {
            let negotiator = negotiator.clone();
            async move { Ok::<_, anyhow::Error>(negotiator.negotiate(request).await) }
        });
        handler
    }

    /// Register a hook run on every shutdown request, after the previously registered ones
    pub fn on_shutdown_request<F, Fut>(&self, hook: F)
    where
        F: Fn(ShutdownRequest, ShutdownResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: ShutdownHook = Arc::new(move |request, response| hook(request, response).boxed());
        self.hooks.write().push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Run every hook for `packet` and build the reply; the caller copies the request id
    pub async fn negotiate(&self, packet: ShutdownRequestPacket) -> ShutdownResponsePacket {
        let request = ShutdownRequest::new(packet.forced);
        let response = ShutdownResponse::new();
        let hooks = self.hooks.read().clone();

        info!(
            forced = request.is_forced(),
            hooks = hooks.len(),
            "Shutdown requested by the director"
        );

        for hook in hooks {
            if let Err(fault) = run_guarded("shutdown hook", hook(request, response.clone())).await
            {
                error!(error = %fault, "An exception occurred while executing a shutdown hook");
            }
        }

        let ready = !response.is_canceled();
        if !ready && request.is_forced() {
            warn!("Shutdown canceled by a hook, but the request is forced");
        }
        ShutdownResponsePacket::new(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_hooks_means_ready() {
        let handler = ShutdownHandler::default();
        let response = handler.negotiate(ShutdownRequestPacket::new(false)).await;
        assert!(response.ready);
        assert_eq!(response.request_id, None);
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_despite_failures() {
        let handler = ShutdownHandler::default();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        handler.on_shutdown_request(move |_, response| {
            let l = Arc::clone(&l);
            async move {
                l.lock().push("cancel");
                response.set_canceled(true);
                Ok(())
            }
        });
        let l = Arc::clone(&log);
        handler.on_shutdown_request(move |_, _| {
            let l = Arc::clone(&l);
            async move {
                l.lock().push("throw");
                anyhow::bail!("disk full")
            }
        });
        let l = Arc::clone(&log);
        handler.on_shutdown_request(move |_, _| {
            let l = Arc::clone(&l);
            async move {
                l.lock().push("noop");
                Ok(())
            }
        });

        let response = handler.negotiate(ShutdownRequestPacket::new(false)).await;
        assert!(!response.ready);
        assert_eq!(*log.lock(), vec!["cancel", "throw", "noop"]);
    }

    #[tokio::test]
    async fn test_hook_sees_forced_flag_and_can_uncancel() {
        let handler = ShutdownHandler::default();
        let seen_forced = Arc::new(AtomicBool::new(false));

        handler.on_shutdown_request(|_, response| async move {
            response.set_canceled(true);
            Ok(())
        });
        let seen = Arc::clone(&seen_forced);
        handler.on_shutdown_request(move |request, response| {
            let seen = Arc::clone(&seen);
            async move {
                seen.store(request.is_forced(), Ordering::SeqCst);
                response.set_canceled(false);
                Ok(())
            }
        });

        let response = handler.negotiate(ShutdownRequestPacket::new(true)).await;
        assert!(response.ready);
        assert!(seen_forced.load(Ordering::SeqCst));
    }
}
