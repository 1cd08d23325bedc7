//! Build steps and the trait the runner drives them through.
//!
//! Every step is a unit struct; all data flows through [`BuildState`].

mod create_image;
mod create_server;
mod create_snapshot;
mod power_off;
mod server_info;
mod shutdown;
mod start_server;

use std::future::Future;
use std::pin::Pin;

use crate::state::{BuildState, StepAction};

pub use create_image::CreateImage;
pub use create_server::CreateServer;
pub use create_snapshot::CreateSnapshot;
pub use power_off::PowerOff;
pub use server_info::ServerInfo;
pub use shutdown::Shutdown;
pub use start_server::StartServer;

/// Future returned by [`Step`] operations.
pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of the build pipeline.
///
/// `run` performs the forward action and decides whether the pipeline
/// continues. `cleanup` undoes whatever `run` created; the runner calls it
/// in reverse order for every step whose `run` was entered, including the
/// step that halted. Cleanups must therefore tolerate partial progress.
pub trait Step: Send + Sync {
    /// Short identifier used in logs and halt reports.
    fn name(&self) -> &'static str;

    /// Performs the forward action.
    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction>;

    /// Releases what `run` created. Does nothing by default.
    fn cleanup<'a>(&'a self, _state: &'a BuildState) -> StepFuture<'a, ()> {
        Box::pin(async {})
    }
}
