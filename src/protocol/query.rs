//! # Query Correlation
//!
//! Tracks in-flight request packets and matches their responses by `requestId`.
//!
//! Each registered query owns a one-shot timeout task. Whichever side removes the
//! pending entry first wins: a response cancels the timer, a fired timer makes any
//! later response a silent no-op. Exactly one of the two callbacks runs per query.

use super::packet::{Packet, RequestPacket};
use crate::error::{BoticaError, BoticaResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

type ResponseCallback = Box<dyn FnOnce(Packet) + Send + 'static>;

struct PendingQuery {
    on_response: Mutex<Option<ResponseCallback>>,
    timer: Option<AbortHandle>,
}

/// Pending-query table shared between the sender and the response listener
#[derive(Clone, Default)]
pub struct QueryHandler {
    pending: Arc<DashMap<String, PendingQuery>>,
}

impl std::fmt::Debug for QueryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandler")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl QueryHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a correlation id to `request` and wait up to `timeout` for its response
    ///
    /// Must be called from within a tokio runtime. Returns the assigned id.
    pub fn register_query<R, F, T>(
        &self,
        request: &mut R,
        on_response: F,
        on_timeout: T,
        timeout: Duration,
    ) -> String
    where
        R: RequestPacket,
        F: FnOnce(R::Response) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let callback: ResponseCallback =
            Box::new(move |packet| match R::Response::try_from(packet) {
                Ok(response) => on_response(response),
                Err(error) => warn!(error = %error, "Discarding response of unexpected type"),
            });
        let pending = PendingQuery {
            on_response: Mutex::new(Some(callback)),
            timer: None,
        };

        let request_id = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            match self.pending.entry(candidate.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(pending);
                    break candidate;
                }
                Entry::Occupied(_) => continue,
            }
        };

        let table = Arc::clone(&self.pending);
        let timer_id = request_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if table.remove(&timer_id).is_some() {
                debug!(request_id = %timer_id, "Query timed out");
                on_timeout();
            }
        });

        // The response may already have been accepted; the timer is then redundant.
        match self.pending.get_mut(&request_id) {
            Some(mut entry) => entry.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        request.set_request_id(request_id.clone());
        debug!(
            request_id = %request_id,
            packet_type = %R::PACKET_TYPE,
            timeout_ms = timeout.as_millis() as u64,
            "Query registered"
        );
        request_id
    }

    /// Complete the pending query matching the response's `requestId`
    ///
    /// Unknown ids (answered, timed out, or never registered) are ignored.
    pub fn accept_response(&self, response: Packet) -> BoticaResult<()> {
        let Some(request_id) = response.request_id().map(str::to_owned) else {
            return Err(BoticaError::missing_correlation_id(
                response.packet_type().tag(),
            ));
        };

        match self.pending.remove(&request_id) {
            Some((_, query)) => {
                if let Some(timer) = query.timer {
                    timer.abort();
                }
                if let Some(on_response) = query.on_response.into_inner() {
                    on_response(response);
                }
            }
            None => {
                debug!(request_id = %request_id, "Ignoring response with no pending query");
            }
        }
        Ok(())
    }

    /// Drop a pending query without invoking either callback
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.pending.remove(request_id) {
            Some((_, query)) => {
                if let Some(timer) = query.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HeartbeatPacket, ShutdownRequestPacket, ShutdownResponsePacket};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_handler_is_shareable_across_tasks() {
        assert_send_sync::<QueryHandler>();
    }

    fn response_for(request_id: &str, ready: bool) -> Packet {
        Packet::ShutdownResponse(ShutdownResponsePacket {
            request_id: Some(request_id.to_string()),
            ready,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_before_timeout() {
        let handler = QueryHandler::new();
        let responses = counter();
        let timeouts = counter();

        let mut request = ShutdownRequestPacket::new(false);
        let (r, t) = (responses.clone(), timeouts.clone());
        let id = handler.register_query(
            &mut request,
            move |response: ShutdownResponsePacket| {
                assert!(response.ready);
                r.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                t.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(3000),
        );
        assert_eq!(request.request_id.as_deref(), Some(id.as_str()));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        handler.accept_response(response_for(&id, true)).unwrap();
        tokio::time::sleep(Duration::from_millis(5000)).await;

        assert_eq!(responses.load(Ordering::SeqCst), 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
        assert_eq!(handler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_swallows_late_response() {
        let handler = QueryHandler::new();
        let responses = counter();
        let timeouts = counter();

        let mut request = ShutdownRequestPacket::new(true);
        let (r, t) = (responses.clone(), timeouts.clone());
        let id = handler.register_query(
            &mut request,
            move |_: ShutdownResponsePacket| {
                r.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                t.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(3000),
        );

        tokio::time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert!(!handler.is_pending(&id));

        handler.accept_response(response_for(&id, true)).unwrap();
        assert_eq!(responses.load(Ordering::SeqCst), 0);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_noop() {
        let handler = QueryHandler::new();
        assert!(handler.accept_response(response_for("deadbeef", false)).is_ok());
    }

    #[tokio::test]
    async fn test_missing_correlation_id() {
        let handler = QueryHandler::new();
        let result = handler.accept_response(Packet::ShutdownResponse(
            ShutdownResponsePacket::new(true),
        ));
        assert!(matches!(
            result,
            Err(BoticaError::MissingCorrelationId { packet_type }) if packet_type == "shutdownResponse"
        ));

        let result = handler.accept_response(Packet::Heartbeat(HeartbeatPacket {}));
        assert!(matches!(result, Err(BoticaError::MissingCorrelationId { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_both_callbacks() {
        let handler = QueryHandler::new();
        let fired = counter();

        let mut request = ShutdownRequestPacket::new(false);
        let (r, t) = (fired.clone(), fired.clone());
        let id = handler.register_query(
            &mut request,
            move |_: ShutdownResponsePacket| {
                r.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                t.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(100),
        );

        assert!(handler.cancel(&id));
        assert!(!handler.cancel(&id));
        tokio::time::sleep(Duration::from_millis(500)).await;
        handler.accept_response(response_for(&id, true)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ids_are_distinct() {
        let handler = QueryHandler::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..64 {
            let mut request = ShutdownRequestPacket::new(false);
            let id = handler.register_query(
                &mut request,
                |_: ShutdownResponsePacket| {},
                || {},
                Duration::from_secs(60),
            );
            assert!(ids.insert(id));
        }
        assert_eq!(handler.pending_count(), 64);
    }
}
