//! Creates the build server from the configured template.

use std::sync::Arc;

use tracing::{info, warn};

use super::{Step, StepFuture};
use crate::state::{BuildState, StepAction, StepError};

/// Creates the build server and records `server_id`.
///
/// Cleanup destroys the server. A failed destroy is reported but never
/// fails the build.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateServer;

impl Step for CreateServer {
    fn name(&self) -> &'static str {
        "create_server"
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            state.ui().say("Creating server...");
            let template = state.config().server_template();
            let client = Arc::clone(state.client());
            match client.create_server(&template).await {
                Ok(server) => {
                    info!(server_id = %server.id, name = %template.name, "server created");
                    state.set_server_id(server.id);
                    StepAction::Continue
                }
                Err(err) => state.halt(StepError::remote("error creating server", err)),
            }
        })
    }

    fn cleanup<'a>(&'a self, state: &'a BuildState) -> StepFuture<'a, ()> {
        Box::pin(async move {
            let Some(server_id) = state.try_server_id() else {
                return;
            };
            state.ui().say("Destroying server...");
            match state.client().destroy_server(server_id).await {
                Ok(()) => info!(server_id, "server destroyed"),
                Err(err) => {
                    warn!(server_id, error = %err, "server destroy failed");
                    state.ui().error(&format!(
                        "Error destroying server {server_id}. Please destroy it manually: {err}"
                    ));
                }
            }
        })
    }
}
