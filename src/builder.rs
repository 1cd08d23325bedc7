//! Entry point tying configuration, steps and the runner together.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::artifact::Artifact;
use crate::client::Client;
use crate::config::{BuilderConfig, ConfigError, Settings};
use crate::runner::{DebugPause, RunOutcome, Runner};
use crate::state::{BuildState, StepError};
use crate::step::{
    CreateImage, CreateServer, CreateSnapshot, PowerOff, ServerInfo, Shutdown, StartServer, Step,
};
use crate::ui::Ui;

/// Errors returned by [`Builder::run`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A step halted the build.
    #[error("build halted in {step}: {source}")]
    Halted {
        /// Name of the halting step.
        step: &'static str,
        /// Error recorded by the step.
        source: StepError,
    },
    /// The build was cancelled.
    #[error("build cancelled")]
    Cancelled,
    /// A step halted without recording why.
    #[error("build halted in {step} without an error")]
    HaltedWithoutError {
        /// Name of the halting step.
        step: &'static str,
    },
    /// The pipeline completed but did not record its outputs.
    #[error("build finished without recording {key}")]
    MissingOutput {
        /// Name of the missing key.
        key: &'static str,
    },
}

/// Builds an image from a fresh server.
#[derive(Debug)]
pub struct Builder {
    settings: Arc<Settings>,
    cancel: CancellationToken,
}

impl Builder {
    /// Validates `config` and prepares a builder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn prepare(config: &BuilderConfig) -> Result<Self, ConfigError> {
        let settings = config.settings()?;
        debug!(?settings, "builder prepared");
        Ok(Self::from_settings(settings))
    }

    /// Wraps already validated settings.
    #[must_use]
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
        }
    }

    /// Validated settings the build runs with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Token that stops the build when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the running build. Cleanup still runs.
    pub fn cancel(&self) {
        info!("cancelling the step runner");
        self.cancel.cancel();
    }

    /// The pipeline in execution order, with `host_steps` (typically
    /// connect and provision) between server discovery and shutdown.
    #[must_use]
    pub fn steps(host_steps: Vec<Box<dyn Step>>) -> Vec<Box<dyn Step>> {
        let mut steps: Vec<Box<dyn Step>> =
            vec![Box::new(CreateServer), Box::new(StartServer), Box::new(ServerInfo)];
        steps.extend(host_steps);
        steps.extend([
            Box::new(Shutdown) as Box<dyn Step>,
            Box::new(PowerOff),
            Box::new(CreateSnapshot),
            Box::new(CreateImage),
        ]);
        steps
    }

    /// Runs the build and returns the registered image.
    ///
    /// `pause` is only used when the settings enable debug mode. The created
    /// server is destroyed before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when a step halts, the build is cancelled, or
    /// the pipeline finishes without recording the image.
    pub async fn run(
        &self,
        client: Arc<dyn Client>,
        ui: Arc<dyn Ui>,
        host_steps: Vec<Box<dyn Step>>,
        pause: Option<Arc<dyn DebugPause>>,
    ) -> Result<Artifact, BuildError> {
        let mut state = BuildState::new(Arc::clone(&self.settings), Arc::clone(&client), ui);
        let runner = Runner::new(Self::steps(host_steps))
            .with_pause(pause.filter(|_| self.settings.debug))
            .with_cancellation(self.cancel.clone());
        info!(steps = ?runner.step_names(), "starting build");

        let outcome = runner.run(&mut state).await;
        let recorded = state.take_error();
        match (outcome, recorded) {
            (RunOutcome::Cancelled { .. }, _) => return Err(BuildError::Cancelled),
            (RunOutcome::Halted { step }, Some(source)) => {
                return Err(BuildError::Halted { step, source });
            }
            (RunOutcome::Halted { step }, None) => {
                return Err(BuildError::HaltedWithoutError { step });
            }
            (RunOutcome::Completed, Some(source)) => {
                return Err(BuildError::Halted {
                    step: "pipeline",
                    source,
                });
            }
            (RunOutcome::Completed, None) => {}
        }

        let id = required_output(state.image_id(), "image_id")?;
        let name = required_output(state.image_name(), "image_name")?;
        info!(image_id = id, name, "build finished");
        Ok(Artifact::new(id, name, client))
    }
}

fn required_output<'a>(
    value: Result<&'a str, StepError>,
    key: &'static str,
) -> Result<&'a str, BuildError> {
    match value {
        Ok(found) if !found.trim().is_empty() => Ok(found),
        _ => {
            error!(key, "output missing from build state after a completed run; this is a bug");
            Err(BuildError::MissingOutput { key })
        }
    }
}
