//! Fixed-interval retry for broker connection establishment.

use crate::constants::broker;
use crate::error::{BoticaError, BoticaResult};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// How many times to try connecting and how long to wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(broker::MAX_CONNECT_ATTEMPTS, broker::CONNECT_RETRY_INTERVAL)
    }
}

/// Run `attempt` until it succeeds or the policy's attempts are exhausted
///
/// `attempt` receives the 1-based attempt number. The final failure is reported as
/// [`BoticaError::BrokerUnreachable`] carrying the last error message.
pub async fn connect_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    mut attempt: F,
) -> BoticaResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = BoticaResult<T>>,
{
    let mut last_error = String::from("no connection attempt made");

    for attempt_number in 1..=policy.max_attempts {
        match attempt(attempt_number).await {
            Ok(connected) => {
                info!(
                    target_host = %target,
                    attempt = attempt_number,
                    "Connected to message broker"
                );
                return Ok(connected);
            }
            Err(error) => {
                warn!(
                    target_host = %target,
                    attempt = attempt_number,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "Couldn't connect to message broker"
                );
                last_error = error.to_string();
            }
        }

        if attempt_number < policy.max_attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    Err(BoticaError::broker_unreachable(policy.max_attempts, last_error))
}
