//! Registers the image artifact from the snapshot.

use std::sync::Arc;

use tracing::info;

use super::{Step, StepFuture};
use crate::client::ImageRequest;
use crate::state::{BuildState, StepAction, StepError};

/// Creates the image and records `image_id` and `image_name`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateImage;

impl Step for CreateImage {
    fn name(&self) -> &'static str {
        "create_image"
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let ids = state
                .server_id()
                .map(str::to_owned)
                .and_then(|server| Ok((server, state.snapshot_id()?.to_owned())));
            let (server_id, snapshot_id) = match ids {
                Ok(ids) => ids,
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

            let request = ImageRequest {
                organization: state.config().organization_id.clone(),
                name: state.config().image_artifact_name.clone(),
                arch: server.arch,
                root_volume: snapshot_id,
            };
            state.ui().say(&format!("Creating image: {}", request.name));
            match client.create_image(&request).await {
                Ok(image) if image.id.trim().is_empty() => {
                    state.halt(StepError::IncompleteImage { field: "id" })
                }
                Ok(image) if image.name.trim().is_empty() => {
                    state.halt(StepError::IncompleteImage { field: "name" })
                }
                Ok(image) => {
                    info!(image_id = %image.id, name = %image.name, "image created");
                    state.set_image(image.id, image.name);
                    StepAction::Continue
                }
                Err(err) => state.halt(StepError::remote("error creating image", err)),
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
    async fn registers_the_image_from_the_snapshot() {
        let (client, _ui, mut state) = harness();
        client.set_arch("arm");
        client.set_image_id("img-42");
        state.set_server_id("srv-1");
        state.set_snapshot_id("snap-1");

        assert_eq!(CreateImage.run(&mut state).await, StepAction::Continue);
        assert_eq!(state.image_id(), Ok("img-42"));
        assert_eq!(
            state.image_name().map(str::to_owned),
            Ok(state.config().image_artifact_name.clone())
        );
        let request = client.calls().into_iter().find_map(|call| match call {
            ClientCall::CreateImage(request) => Some(request),
            _ => None,
        });
        assert_eq!(
            request.map(|sent| (sent.arch, sent.root_volume)),
            Some((String::from("arm"), String::from("snap-1")))
        );
    }

    #[tokio::test]
    async fn halts_without_a_snapshot() {
        let (client, _ui, mut state) = harness();
        state.set_server_id("srv-1");

        assert_eq!(CreateImage.run(&mut state).await, StepAction::Halt);
        assert_eq!(
            state.error(),
            Some(&StepError::MissingState { key: "snapshot_id" })
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn halts_when_registration_fails() {
        let (client, _ui, mut state) = harness();
        client.fail(
            Operation::CreateImage,
            ClientError::status("image creation failed", "400", "quota"),
        );
        state.set_server_id("srv-1");
        state.set_snapshot_id("snap-1");

        assert_eq!(CreateImage.run(&mut state).await, StepAction::Halt);
        assert!(state.image_id().is_err());
    }

    #[tokio::test]
    async fn halts_when_the_image_comes_back_without_an_id() {
        let (client, ui, mut state) = harness();
        client.set_image_id("");
        state.set_server_id("srv-1");
        state.set_snapshot_id("snap-1");

        assert_eq!(CreateImage.run(&mut state).await, StepAction::Halt);
        assert_eq!(
            state.error(),
            Some(&StepError::IncompleteImage { field: "id" })
        );
        assert!(state.image_id().is_err());
        assert_eq!(ui.errors(), vec!["image registration returned an empty id"]);
    }
}
