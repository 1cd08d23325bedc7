//! Capability interface over the Online Labs compute API.
//!
//! The build pipeline only talks to the provider through [`Client`]. The
//! production implementation lives in [`OnlineLabsClient`]; tests substitute
//! scripted doubles from [`crate::test_support`].

mod error;
mod http;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::ClientError;
pub use http::{DEFAULT_ACCOUNT_URL, DEFAULT_API_URL, OnlineLabsClient, USER_AGENT};
pub use types::{
    Image, ImageRequest, IpAddress, NullString, Server, ServerTemplate, Snapshot,
    SnapshotRequest, Volume,
};

/// Future returned by client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Operations the pipeline needs from the compute provider.
///
/// Every call is a single round trip without retries; convergence waits are
/// the poller's job.
pub trait Client: Send + Sync {
    /// Creates a server from the template.
    fn create_server<'a>(&'a self, template: &'a ServerTemplate) -> ClientFuture<'a, Server>;

    /// Fetches the current view of a server.
    fn get_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, Server>;

    /// Requests the server to power on.
    fn power_on_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()>;

    /// Requests the server to power off.
    fn power_off_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()>;

    /// Deletes the server.
    fn destroy_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()>;

    /// Snapshots a volume.
    fn create_snapshot<'a>(&'a self, request: &'a SnapshotRequest)
    -> ClientFuture<'a, Snapshot>;

    /// Registers an image backed by a snapshot.
    fn create_image<'a>(&'a self, request: &'a ImageRequest) -> ClientFuture<'a, Image>;

    /// Deletes an image.
    fn destroy_image<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()>;
}
