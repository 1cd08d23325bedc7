//! Core library for the kiln image builder.
//!
//! A build provisions a temporary server on the Online Labs compute API,
//! lets host-supplied steps connect to and provision it, then stops it,
//! snapshots its root volume and registers the snapshot as a bootable image
//! (create → start → wait → provision → shutdown → snapshot → image). The
//! server is destroyed on every exit path.

pub mod artifact;
pub mod builder;
pub mod client;
pub mod config;
pub mod runner;
pub mod ssh;
pub mod state;
pub mod step;
pub mod test_support;
pub mod ui;
pub mod wait;

pub use artifact::{Artifact, BUILDER_ID};
pub use builder::{BuildError, Builder};
pub use client::{Client, ClientError, OnlineLabsClient};
pub use config::{BuilderConfig, ConfigError, Settings};
pub use runner::{DebugPause, PausePoint, RunOutcome, Runner};
pub use ssh::{SshError, SshSettings, ssh_address, ssh_settings};
pub use state::{BuildState, Communicator, CommunicatorError, StepAction, StepError};
pub use step::Step;
pub use ui::{ConsoleUi, StdinPause, Ui};
pub use wait::{StatePoller, WaitError};
