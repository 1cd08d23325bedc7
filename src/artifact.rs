//! The image produced by a successful build.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::client::{Client, ClientError};

/// Identifier of this builder, attached to every artifact it produces.
pub const BUILDER_ID: &str = "kiln.onlinelabs";

/// Image registered by a build.
#[derive(Clone)]
pub struct Artifact {
    id: String,
    name: String,
    client: Arc<dyn Client>,
}

impl Artifact {
    /// Wraps a registered image.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, client: Arc<dyn Client>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            client,
        }
    }

    /// Identifier of the builder that produced the artifact.
    #[must_use]
    pub const fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    /// Image identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Image name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local files produced by the build. Images live remotely, so this is
    /// always empty.
    #[must_use]
    pub const fn files(&self) -> &[String] {
        &[]
    }

    /// Deletes the image.
    ///
    /// # Errors
    ///
    /// Returns the client error when the provider rejects the deletion.
    pub async fn destroy(&self) -> Result<(), ClientError> {
        info!(image_id = %self.id, name = %self.name, "destroying image");
        self.client.destroy_image(&self.id).await
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "An image was created: '{}' (ID: {})", self.name, self.id)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ClientCall, ScriptedClient};

    #[tokio::test]
    async fn describes_and_destroys_the_image() {
        let client = ScriptedClient::new();
        let artifact = Artifact::new("img-1", "packer-image-1", Arc::new(client.clone()));

        assert_eq!(artifact.builder_id(), "kiln.onlinelabs");
        assert_eq!(
            artifact.to_string(),
            "An image was created: 'packer-image-1' (ID: img-1)"
        );
        assert!(artifact.files().is_empty());

        artifact
            .destroy()
            .await
            .unwrap_or_else(|err| panic!("destroy image: {err}"));
        assert_eq!(
            client.calls(),
            vec![ClientCall::DestroyImage(String::from("img-1"))]
        );
    }
}
