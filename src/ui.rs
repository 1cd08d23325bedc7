//! User-facing progress output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::runner::{DebugPause, PausePoint};
use crate::step::StepFuture;

/// Sink for human-readable build progress.
///
/// Implementations must tolerate calls from any task; steps report through
/// a shared `Arc<dyn Ui>`.
pub trait Ui: Send + Sync {
    /// Reports normal progress.
    fn say(&self, message: &str);

    /// Reports a failure or a problem the operator must act on.
    fn error(&self, message: &str);
}

/// Writes progress to stdout and problems to stderr.
#[derive(Debug, Default)]
pub struct ConsoleUi {
    prefix: String,
    lock: Mutex<()>,
}

impl ConsoleUi {
    /// Creates a console UI that prefixes every line with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            lock: Mutex::new(()),
        }
    }

    fn write_line(&self, mut sink: impl Write, message: &str) {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.prefix.is_empty() {
            writeln!(sink, "==> {message}").ok();
        } else {
            writeln!(sink, "==> {}: {message}", self.prefix).ok();
        }
    }
}

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        info!(target: "kiln::ui", "{message}");
        self.write_line(io::stdout().lock(), message);
    }

    fn error(&self, message: &str) {
        warn!(target: "kiln::ui", "{message}");
        self.write_line(io::stderr().lock(), message);
    }
}

/// Debug pause that waits for the operator to press enter.
pub struct StdinPause {
    ui: Arc<dyn Ui>,
}

impl StdinPause {
    /// Announces each pause through `ui`.
    #[must_use]
    pub const fn new(ui: Arc<dyn Ui>) -> Self {
        Self { ui }
    }
}

impl DebugPause for StdinPause {
    fn pause<'a>(&'a self, point: PausePoint) -> StepFuture<'a, ()> {
        Box::pin(async move {
            self.ui.say(&format!("{point}. Press enter to continue."));
            let mut line = String::new();
            if let Err(err) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
                warn!(error = %err, "failed to read from stdin, continuing");
            }
        })
    }
}
