//! Shared state threaded through the build steps.
//!
//! Each step reads what earlier steps produced and records its own outputs.
//! Reads of keys that have not been written yet fail with
//! [`StepError::MissingState`] instead of panicking.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use crate::client::{Client, ClientError};
use crate::config::Settings;
use crate::ui::Ui;
use crate::wait::WaitError;

/// Future returned by [`Communicator`] operations.
pub type CommunicatorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), CommunicatorError>> + Send + 'a>>;

/// Remote command channel to the build server, usually SSH.
///
/// Host-supplied connect and provision steps install one into the state;
/// the shutdown step uses it to stop the server gracefully.
pub trait Communicator: Send + Sync {
    /// Runs `command` on the build server and waits for it to exit.
    fn run_command<'a>(&'a self, command: &'a str) -> CommunicatorFuture<'a>;
}

/// Failure reported by a [`Communicator`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct CommunicatorError {
    /// Description of the failure.
    pub message: String,
}

impl CommunicatorError {
    /// Wraps a failure message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors that halt the pipeline.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StepError {
    /// A provider call failed.
    #[error("{context}: {source}")]
    Remote {
        /// What the step was doing.
        context: String,
        /// Underlying client error.
        source: ClientError,
    },
    /// Waiting for a server state failed.
    #[error("error waiting for server {server_id} to become {state}: {source}")]
    Wait {
        /// Server being watched.
        server_id: String,
        /// Desired lifecycle state.
        state: String,
        /// Underlying wait error.
        source: Box<WaitError>,
    },
    /// The running server has no public address.
    #[error("server {server_id} has no public IP address")]
    MissingPublicIp {
        /// Server without an address.
        server_id: String,
    },
    /// The stopped server reports no volume in the root slot.
    #[error("server {server_id} has no root volume to snapshot")]
    MissingRootVolume {
        /// Server without a root volume.
        server_id: String,
    },
    /// The provider registered an image but left `field` blank.
    #[error("image registration returned an empty {field}")]
    IncompleteImage {
        /// Name of the blank field.
        field: &'static str,
    },
    /// A step read a key no earlier step has written.
    #[error("build state has no {key}")]
    MissingState {
        /// Name of the missing key.
        key: &'static str,
    },
    /// The build was cancelled.
    #[error("build cancelled")]
    Cancelled,
    /// A host-supplied step failed.
    #[error("{step}: {message}")]
    Host {
        /// Name of the failing step.
        step: String,
        /// Description of the failure.
        message: String,
    },
}

impl StepError {
    /// Wraps a client error with the operation being attempted.
    #[must_use]
    pub fn remote(context: impl Into<String>, source: ClientError) -> Self {
        Self::Remote {
            context: context.into(),
            source,
        }
    }

    /// Wraps a wait error with the server and target state.
    #[must_use]
    pub fn wait(server_id: &str, state: &str, source: WaitError) -> Self {
        Self::Wait {
            server_id: server_id.to_owned(),
            state: state.to_owned(),
            source: Box::new(source),
        }
    }
}

/// Whether the runner proceeds after a step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepAction {
    /// Proceed to the next step.
    Continue,
    /// Stop the forward pass and unwind.
    Halt,
}

/// Typed state shared by all steps of one build.
pub struct BuildState {
    config: Arc<Settings>,
    client: Arc<dyn Client>,
    ui: Arc<dyn Ui>,
    communicator: Option<Arc<dyn Communicator>>,
    error: Option<StepError>,
    server_id: Option<String>,
    server_ip: Option<String>,
    snapshot_id: Option<String>,
    image_id: Option<String>,
    image_name: Option<String>,
}

impl BuildState {
    /// Creates the state with its three always-present entries.
    #[must_use]
    pub fn new(config: Arc<Settings>, client: Arc<dyn Client>, ui: Arc<dyn Ui>) -> Self {
        Self {
            config,
            client,
            ui,
            communicator: None,
            error: None,
            server_id: None,
            server_ip: None,
            snapshot_id: None,
            image_id: None,
            image_name: None,
        }
    }

    /// Validated build settings.
    #[must_use]
    pub fn config(&self) -> &Settings {
        &self.config
    }

    /// Compute API client.
    #[must_use]
    pub const fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// Progress sink.
    #[must_use]
    pub fn ui(&self) -> &dyn Ui {
        self.ui.as_ref()
    }

    /// Remote command channel, once a connect step has installed one.
    #[must_use]
    pub const fn communicator(&self) -> Option<&Arc<dyn Communicator>> {
        self.communicator.as_ref()
    }

    /// Installs the remote command channel.
    pub fn set_communicator(&mut self, communicator: Arc<dyn Communicator>) {
        self.communicator = Some(communicator);
    }

    /// Error that halted the pipeline, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    /// Records the halting error.
    pub fn set_error(&mut self, error: StepError) {
        self.error = Some(error);
    }

    /// Removes and returns the halting error.
    pub fn take_error(&mut self) -> Option<StepError> {
        self.error.take()
    }

    /// Records `error`, reports it, and asks the runner to halt.
    pub fn halt(&mut self, error: StepError) -> StepAction {
        let message = error.to_string();
        error!(error = %message, "build step failed");
        self.ui.error(&message);
        self.error = Some(error);
        StepAction::Halt
    }

    /// Identifier of the created server.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingState`] before the server exists.
    pub fn server_id(&self) -> Result<&str, StepError> {
        require(self.server_id.as_deref(), "server_id")
    }

    /// Identifier of the created server, if one was created.
    #[must_use]
    pub fn try_server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    /// Records the created server.
    pub fn set_server_id(&mut self, id: impl Into<String>) {
        self.server_id = Some(id.into());
    }

    /// Public address of the running server.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingState`] before the address is known.
    pub fn server_ip(&self) -> Result<&str, StepError> {
        require(self.server_ip.as_deref(), "server_ip")
    }

    /// Records the public address.
    pub fn set_server_ip(&mut self, address: impl Into<String>) {
        self.server_ip = Some(address.into());
    }

    /// Identifier of the root volume snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingState`] before the snapshot exists.
    pub fn snapshot_id(&self) -> Result<&str, StepError> {
        require(self.snapshot_id.as_deref(), "snapshot_id")
    }

    /// Records the snapshot.
    pub fn set_snapshot_id(&mut self, id: impl Into<String>) {
        self.snapshot_id = Some(id.into());
    }

    /// Identifier of the registered image.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingState`] before the image exists.
    pub fn image_id(&self) -> Result<&str, StepError> {
        require(self.image_id.as_deref(), "image_id")
    }

    /// Name of the registered image.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingState`] before the image exists.
    pub fn image_name(&self) -> Result<&str, StepError> {
        require(self.image_name.as_deref(), "image_name")
    }

    /// Records the registered image.
    pub fn set_image(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.image_id = Some(id.into());
        self.image_name = Some(name.into());
    }
}

impl fmt::Debug for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildState")
            .field("config", &self.config)
            .field("communicator", &self.communicator.is_some())
            .field("error", &self.error)
            .field("server_id", &self.server_id)
            .field("server_ip", &self.server_ip)
            .field("snapshot_id", &self.snapshot_id)
            .field("image_id", &self.image_id)
            .field("image_name", &self.image_name)
            .finish_non_exhaustive()
    }
}

fn require<'a>(value: Option<&'a str>, key: &'static str) -> Result<&'a str, StepError> {
    value.ok_or(StepError::MissingState { key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingUi, ScriptedClient, sample_settings};

    fn state(ui: &RecordingUi) -> BuildState {
        BuildState::new(
            Arc::new(sample_settings()),
            Arc::new(ScriptedClient::new()),
            Arc::new(ui.clone()),
        )
    }

    #[test]
    fn unset_keys_are_reported_by_name() {
        let ui = RecordingUi::default();
        let build = state(&ui);
        assert_eq!(
            build.server_id(),
            Err(StepError::MissingState { key: "server_id" })
        );
        assert_eq!(
            build.image_name(),
            Err(StepError::MissingState { key: "image_name" })
        );
        assert!(build.communicator().is_none());
    }

    #[test]
    fn halt_records_and_reports_the_error() {
        let ui = RecordingUi::default();
        let mut build = state(&ui);
        let action = build.halt(StepError::MissingPublicIp {
            server_id: String::from("srv-1"),
        });

        assert_eq!(action, StepAction::Halt);
        assert!(matches!(
            build.error(),
            Some(StepError::MissingPublicIp { .. })
        ));
        assert_eq!(ui.errors(), vec!["server srv-1 has no public IP address"]);
    }

    #[test]
    fn debug_output_hides_the_token() {
        let ui = RecordingUi::default();
        let mut build = state(&ui);
        build.set_server_id("srv-1");
        let rendered = format!("{build:?}");
        assert!(rendered.contains("srv-1"));
        assert!(!rendered.contains(&sample_settings().api_token), "{rendered}");
    }
}
