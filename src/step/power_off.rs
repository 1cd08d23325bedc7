//! Forces the server down before its volume is snapshotted.

use std::sync::Arc;

use tracing::info;

use super::{Step, StepFuture};
use crate::client::types::STATE_STOPPED;
use crate::state::{BuildState, StepAction, StepError};
use crate::wait::StatePoller;

/// Powers the server off unless it already reports `stopped`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PowerOff;

impl Step for PowerOff {
    fn name(&self) -> &'static str {
        "power_off"
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let server_id = match state.server_id().map(str::to_owned) {
                Ok(id) => id,
                Err(err) => return state.halt(err),
            };
            let client = Arc::clone(state.client());

            let server = match client.get_server(&server_id).await {
                Ok(server) => server,
                Err(err) => {
                    return state.halt(StepError::remote(
                        format!("error checking server state for {server_id}"),
                        err,
                    ));
                }
            };
            if server.state == STATE_STOPPED {
                info!(server_id, "server already stopped");
                return StepAction::Continue;
            }

            state.ui().say("Forcefully shutting down server...");
            if let Err(err) = client.power_off_server(&server_id).await {
                return state.halt(StepError::remote(
                    format!("error powering off server {server_id}"),
                    err,
                ));
            }

            let poller = StatePoller::new(state.config().state_timeout);
            if let Err(err) = poller
                .wait_for_state(STATE_STOPPED, &server_id, client)
                .await
            {
                return state.halt(StepError::wait(&server_id, STATE_STOPPED, err));
            }
            info!(server_id, "server powered off");
            StepAction::Continue
        })
    }
}
