//! Snapshots the root volume of the stopped server.

use std::sync::Arc;

use tracing::info;

use super::{Step, StepFuture};
use crate::client::SnapshotRequest;
use crate::state::{BuildState, StepAction, StepError};

/// Snapshots the volume in slot `0` and records `snapshot_id`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateSnapshot;

impl Step for CreateSnapshot {
    fn name(&self) -> &'static str {
        "create_snapshot"
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
                        format!("error retrieving server {server_id}"),
                        err,
                    ));
                }
            };
            let Some(volume_id) = server.root_volume().map(|volume| volume.id.clone()) else {
                return state.halt(StepError::MissingRootVolume { server_id });
            };

            let request = SnapshotRequest {
                organization: state.config().organization_id.clone(),
                name: state.config().snapshot_name.clone(),
                volume_id,
            };
            state
                .ui()
                .say(&format!("Creating snapshot: {}", request.name));
            match client.create_snapshot(&request).await {
                Ok(snapshot) => {
                    info!(snapshot_id = %snapshot.id, volume_id = %request.volume_id, "snapshot created");
                    state.set_snapshot_id(snapshot.id);
                    StepAction::Continue
                }
                Err(err) => state.halt(StepError::remote("error creating snapshot", err)),
            }
        })
    }
}
