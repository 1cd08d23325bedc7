//! Drives an ordered list of steps and unwinds them in reverse.
//!
//! The forward pass stops at the first step that halts or when the build is
//! cancelled. Every step whose `run` was entered then gets its `cleanup`
//! called, last step first, regardless of how the forward pass ended.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::{BuildState, StepAction, StepError};
use crate::step::{Step, StepFuture};

/// Where a debug pause happens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PausePoint {
    /// After a step's forward action completed.
    AfterRun(&'static str),
    /// Before a step's cleanup runs.
    BeforeCleanup(&'static str),
}

impl fmt::Display for PausePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterRun(step) => write!(f, "Pausing after run of step '{step}'"),
            Self::BeforeCleanup(step) => write!(f, "Pausing before cleanup of step '{step}'"),
        }
    }
}

/// Hook awaited at every [`PausePoint`] when debugging is enabled.
pub trait DebugPause: Send + Sync {
    /// Resolves once the operator allows the build to continue.
    fn pause<'a>(&'a self, point: PausePoint) -> StepFuture<'a, ()>;
}

/// How the forward pass ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// Every step returned [`StepAction::Continue`].
    Completed,
    /// A step returned [`StepAction::Halt`].
    Halted {
        /// Name of the halting step.
        step: &'static str,
    },
    /// The cancellation token fired.
    Cancelled {
        /// Step that was running or about to run.
        step: &'static str,
    },
}

/// Sequential step runner with reverse-order cleanup.
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
    pause: Option<Arc<dyn DebugPause>>,
    cancel: CancellationToken,
}

impl Runner {
    /// Creates a runner over `steps` in execution order.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            pause: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Enables debug pauses.
    #[must_use]
    pub fn with_pause(mut self, pause: Option<Arc<dyn DebugPause>>) -> Self {
        self.pause = pause;
        self
    }

    /// Uses `token` to stop the forward pass.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Names of the steps in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs the steps, then cleans up every entered step in reverse.
    ///
    /// On cancellation [`StepError::Cancelled`] is recorded in the state
    /// unless a step already recorded an error.
    pub async fn run(&self, state: &mut BuildState) -> RunOutcome {
        let mut entered = 0_usize;
        let mut outcome = RunOutcome::Completed;

        for step in &self.steps {
            let name = step.name();
            if self.cancel.is_cancelled() {
                outcome = RunOutcome::Cancelled { step: name };
                break;
            }

            entered = entered.saturating_add(1);
            debug!(step = name, "running step");
            let action = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                action = step.run(state) => Some(action),
            };

            match action {
                None => {
                    outcome = RunOutcome::Cancelled { step: name };
                    break;
                }
                Some(StepAction::Halt) => {
                    info!(step = name, "step halted the build");
                    outcome = RunOutcome::Halted { step: name };
                    break;
                }
                Some(StepAction::Continue) => debug!(step = name, "step completed"),
            }

            if !self.pause_unless_cancelled(PausePoint::AfterRun(name)).await {
                outcome = RunOutcome::Cancelled { step: name };
                break;
            }
        }

        if matches!(outcome, RunOutcome::Cancelled { .. }) {
            warn!("build cancelled, cleaning up");
            state.ui().error("Build cancelled, cleaning up...");
            if state.error().is_none() {
                state.set_error(StepError::Cancelled);
            }
        }

        for step in self.steps.iter().take(entered).rev() {
            if !self.cancel.is_cancelled() {
                self.pause_unless_cancelled(PausePoint::BeforeCleanup(step.name()))
                    .await;
            }
            debug!(step = step.name(), "cleaning up step");
            step.cleanup(state).await;
        }

        outcome
    }

    /// Returns `false` when the build was cancelled during the pause.
    async fn pause_unless_cancelled(&self, point: PausePoint) -> bool {
        let Some(pause) = &self.pause else {
            return true;
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = pause.pause(point) => true,
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("steps", &self.step_names())
            .field("pause", &self.pause.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingPause, RecordingStep, StepLog, harness};

    fn steps(log: &StepLog, halt_at: Option<&'static str>) -> Vec<Box<dyn Step>> {
        ["first", "second", "third"]
            .into_iter()
            .map(|name| {
                let recorder = RecordingStep::new(name, log.clone());
                let step = if halt_at == Some(name) {
                    recorder.halting()
                } else {
                    recorder
                };
                Box::new(step) as Box<dyn Step>
            })
            .collect()
    }

    #[tokio::test]
    async fn completed_runs_still_unwind_in_reverse() {
        let (_client, _ui, mut state) = harness();
        let log = StepLog::default();

        let outcome = Runner::new(steps(&log, None)).run(&mut state).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            log.entries(),
            vec![
                "run:first",
                "run:second",
                "run:third",
                "cleanup:third",
                "cleanup:second",
                "cleanup:first",
            ]
        );
    }

    #[tokio::test]
    async fn halt_skips_later_steps_and_cleans_up_the_halting_one() {
        let (_client, _ui, mut state) = harness();
        let log = StepLog::default();

        let outcome = Runner::new(steps(&log, Some("second")))
            .run(&mut state)
            .await;

        assert_eq!(outcome, RunOutcome::Halted { step: "second" });
        assert_eq!(
            log.entries(),
            vec!["run:first", "run:second", "cleanup:second", "cleanup:first"]
        );
        assert!(state.error().is_some());
    }

    #[tokio::test]
    async fn cancellation_before_start_runs_nothing() {
        let (_client, ui, mut state) = harness();
        let log = StepLog::default();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Runner::new(steps(&log, None))
            .with_cancellation(token)
            .run(&mut state)
            .await;

        assert_eq!(outcome, RunOutcome::Cancelled { step: "first" });
        assert!(log.entries().is_empty());
        assert_eq!(state.error(), Some(&StepError::Cancelled));
        assert_eq!(ui.errors(), vec!["Build cancelled, cleaning up..."]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_running_step() {
        let (_client, ui, mut state) = harness();
        let log = StepLog::default();
        let token = CancellationToken::new();
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(RecordingStep::new("first", log.clone())),
            Box::new(RecordingStep::new("slow", log.clone()).blocking()),
            Box::new(RecordingStep::new("never", log.clone())),
        ];
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let outcome = Runner::new(steps)
            .with_cancellation(token)
            .run(&mut state)
            .await;

        assert_eq!(outcome, RunOutcome::Cancelled { step: "slow" });
        assert_eq!(
            log.entries(),
            vec!["run:first", "run:slow", "cleanup:slow", "cleanup:first"]
        );
        assert_eq!(ui.errors(), vec!["Build cancelled, cleaning up..."]);
    }

    #[tokio::test]
    async fn debug_pauses_follow_runs_and_precede_cleanups() {
        let (_client, _ui, mut state) = harness();
        let log = StepLog::default();
        let pause = RecordingPause::default();
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(RecordingStep::new("first", log.clone())),
            Box::new(RecordingStep::new("second", log.clone()).halting()),
        ];

        Runner::new(steps)
            .with_pause(Some(Arc::new(pause.clone())))
            .run(&mut state)
            .await;

        assert_eq!(
            pause.points(),
            vec![
                PausePoint::AfterRun("first"),
                PausePoint::BeforeCleanup("second"),
                PausePoint::BeforeCleanup("first"),
            ]
        );
    }
}
