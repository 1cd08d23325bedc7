//! Graceful shutdown over the communicator.

use std::sync::Arc;

use tracing::{info, warn};

use super::{Step, StepFuture};
use crate::client::types::STATE_STOPPED;
use crate::state::{BuildState, StepAction};
use crate::wait::StatePoller;

/// Runs the configured shutdown command and waits for `stopped`.
///
/// Never halts: failures are reported and [`super::PowerOff`] forces the
/// server down afterwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shutdown;

impl Step for Shutdown {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let Some(communicator) = state.communicator().cloned() else {
                state
                    .ui()
                    .say("No communicator available, skipping graceful shutdown...");
                return StepAction::Continue;
            };
            let Ok(server_id) = state.server_id().map(str::to_owned) else {
                state
                    .ui()
                    .error("No server to shut down, skipping graceful shutdown");
                return StepAction::Continue;
            };

            state.ui().say("Gracefully shutting down server...");
            let command = state.config().shutdown_command.clone();
            if let Err(err) = communicator.run_command(&command).await {
                warn!(server_id, error = %err, "shutdown command failed");
                state
                    .ui()
                    .error(&format!("Error sending shutdown command: {err}"));
            }

            let poller = StatePoller::new(state.config().state_timeout);
            let client = Arc::clone(state.client());
            match poller
                .wait_for_state(STATE_STOPPED, &server_id, client)
                .await
            {
                Ok(()) => info!(server_id, "server shut down"),
                Err(err) => {
                    warn!(server_id, error = %err, "graceful shutdown did not complete");
                    state.ui().error(&format!(
                        "Error waiting for graceful shutdown, will force power off: {err}"
                    ));
                }
            }
            StepAction::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingCommunicator, harness};

    #[tokio::test(start_paused = true)]
    async fn runs_the_shutdown_command_and_waits() {
        let (client, _ui, mut state) = harness();
        client.set_state("running");
        state.set_server_id("srv-1");
        let communicator = RecordingCommunicator::stopping(client.clone());
        state.set_communicator(Arc::new(communicator.clone()));

        assert_eq!(Shutdown.run(&mut state).await, StepAction::Continue);
        assert_eq!(communicator.commands(), vec!["shutdown -h now"]);
        assert_eq!(client.state(), "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn command_failure_and_timeout_do_not_halt() {
        let (client, ui, mut state) = harness();
        client.set_state("running");
        state.set_server_id("srv-1");
        state.set_communicator(Arc::new(RecordingCommunicator::failing("connection reset")));

        assert_eq!(Shutdown.run(&mut state).await, StepAction::Continue);
        assert!(state.error().is_none());
        let errors = ui.errors();
        assert!(errors.iter().any(|line| line.contains("connection reset")));
        assert!(errors.iter().any(|line| line.contains("force power off")));
    }

    #[tokio::test]
    async fn skips_without_a_communicator() {
        let (client, ui, mut state) = harness();
        state.set_server_id("srv-1");

        assert_eq!(Shutdown.run(&mut state).await, StepAction::Continue);
        assert!(client.calls().is_empty());
        assert!(ui.messages().iter().any(|line| line.contains("skipping")));
    }
}
