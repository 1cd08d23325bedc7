//! Waits for the server to run and records its public address.

use std::sync::Arc;

use tracing::info;

use super::{Step, StepFuture};
use crate::client::types::STATE_RUNNING;
use crate::state::{BuildState, StepAction, StepError};
use crate::wait::StatePoller;

/// Waits for `running`, then records `server_ip` from a fresh server view.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServerInfo;

impl Step for ServerInfo {
    fn name(&self) -> &'static str {
        "server_info"
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let server_id = match state.server_id().map(str::to_owned) {
                Ok(id) => id,
                Err(err) => return state.halt(err),
            };
            state.ui().say("Waiting for server to become active...");

            let client = Arc::clone(state.client());
            let poller = StatePoller::new(state.config().state_timeout);
            if let Err(err) = poller
                .wait_for_state(STATE_RUNNING, &server_id, Arc::clone(&client))
                .await
            {
                return state.halt(StepError::wait(&server_id, STATE_RUNNING, err));
            }

            let server = match client.get_server(&server_id).await {
                Ok(server) => server,
                Err(err) => {
                    return state.halt(StepError::remote(
                        format!("error retrieving server {server_id}"),
                        err,
                    ));
                }
            };

            let Some(public_ip) = server.public_ip else {
                return state.halt(StepError::MissingPublicIp { server_id });
            };
            info!(server_id, address = %public_ip.address, "server is running");
            state.set_server_ip(public_ip.address);
            StepAction::Continue
        })
    }
}
