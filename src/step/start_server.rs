//! Powers on the freshly created server.

use std::sync::Arc;

use tracing::info;

use super::{Step, StepFuture};
use crate::state::{BuildState, StepAction, StepError};

/// Sends the power-on action. Convergence is awaited by [`super::ServerInfo`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StartServer;

impl Step for StartServer {
    fn name(&self) -> &'static str {
        "start_server"
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let server_id = match state.server_id().map(str::to_owned) {
                Ok(id) => id,
                Err(err) => return state.halt(err),
            };
            state.ui().say("Starting server...");
            let client = Arc::clone(state.client());
            match client.power_on_server(&server_id).await {
                Ok(()) => {
                    info!(server_id, "power-on requested");
                    StepAction::Continue
                }
                Err(err) => state.halt(StepError::remote(
                    format!("error starting server {server_id}"),
                    err,
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::test_support::{ClientCall, Operation, harness};

    #[tokio::test]
    async fn requests_power_on() {
        let (client, _ui, mut state) = harness();
        state.set_server_id("srv-1");

        assert_eq!(StartServer.run(&mut state).await, StepAction::Continue);
        assert_eq!(
            client.calls(),
            vec![ClientCall::PowerOn(String::from("srv-1"))]
        );
    }

    #[tokio::test]
    async fn halts_without_a_server() {
        let (client, _ui, mut state) = harness();

        assert_eq!(StartServer.run(&mut state).await, StepAction::Halt);
        assert_eq!(
            state.error(),
            Some(&StepError::MissingState { key: "server_id" })
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn halts_when_power_on_fails() {
        let (client, ui, mut state) = harness();
        state.set_server_id("srv-1");
        client.fail(
            Operation::PowerOn,
            ClientError::status("server poweron failed", "409", "busy"),
        );

        assert_eq!(StartServer.run(&mut state).await, StepAction::Halt);
        assert!(ui.errors().iter().any(|line| line.contains("srv-1")));
    }
}
