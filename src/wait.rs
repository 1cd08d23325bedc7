//! Polling a server until it reaches a lifecycle state.
//!
//! The poll loop runs on its own task and reports exactly once over a
//! oneshot channel. The caller races that channel against the timeout; when
//! the timeout wins the receiver is dropped, which the loop observes between
//! attempts and exits without issuing further queries.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::client::{Client, ClientError};

/// Delay between consecutive state queries.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Errors raised while waiting for a server state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// The server did not reach the state before the deadline.
    #[error("timeout while waiting for server to enter {state:?} state after {timeout:?}")]
    Timeout {
        /// Desired lifecycle state.
        state: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// A state query failed; polling stops at the first failure.
    #[error("failed to query server state: {0}")]
    Query(#[from] ClientError),
    /// The poll task ended without reporting a result.
    #[error("server state poller stopped unexpectedly")]
    Abandoned,
}

/// Waits for a server to report a given lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatePoller {
    interval: Duration,
    timeout: Duration,
}

impl StatePoller {
    /// Creates a poller with the default interval and the given timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout,
        }
    }

    /// Overrides the delay between state queries.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Timeout applied to each wait.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Polls `server_id` until its state equals `desired`.
    ///
    /// The first query is issued immediately. State comparison is exact and
    /// case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Query`] as soon as a query fails and
    /// [`WaitError::Timeout`] when the deadline passes first.
    pub async fn wait_for_state(
        &self,
        desired: &str,
        server_id: &str,
        client: Arc<dyn Client>,
    ) -> Result<(), WaitError> {
        let (result_tx, result_rx) = oneshot::channel();
        let interval = self.interval;
        let wanted = desired.to_owned();
        let id = server_id.to_owned();
        tokio::spawn(poll_state(client, id, wanted, interval, result_tx));

        match timeout(self.timeout, result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WaitError::Abandoned),
            Err(_) => {
                debug!(server_id, state = desired, "state wait timed out");
                Err(WaitError::Timeout {
                    state: desired.to_owned(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

async fn poll_state(
    client: Arc<dyn Client>,
    server_id: String,
    desired: String,
    interval: Duration,
    mut result_tx: oneshot::Sender<Result<(), WaitError>>,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match client.get_server(&server_id).await {
            Err(err) => {
                result_tx.send(Err(WaitError::Query(err))).ok();
                return;
            }
            Ok(server) if server.state == desired => {
                debug!(attempt, server_id, state = %server.state, "server reached state");
                result_tx.send(Ok(())).ok();
                return;
            }
            Ok(server) => {
                debug!(attempt, server_id, state = %server.state, desired, "server not ready");
            }
        }

        tokio::select! {
            () = result_tx.closed() => return,
            () = sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedClient;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn resolves_when_the_state_matches() {
        let client = ScriptedClient::new();
        client.push_states(["starting", "starting", "running"]);
        let poller = StatePoller::new(Duration::from_secs(60));

        let started = Instant::now();
        let result = poller
            .wait_for_state("running", "srv-1", Arc::new(client.clone()))
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(client.get_server_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn state_comparison_is_case_sensitive() {
        let client = ScriptedClient::new();
        client.push_states(["Running"]);
        let poller = StatePoller::new(Duration::from_secs(5));

        let result = poller
            .wait_for_state("running", "srv-1", Arc::new(client))
            .await;

        assert!(matches!(result, Err(WaitError::Timeout { .. })));
    }
}
