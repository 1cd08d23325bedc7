//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here stand in for the compute API, the UI, the communicator
//! and host-supplied steps so the pipeline can run without a network.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::client::types::{STATE_RUNNING, STATE_STOPPED};
use crate::client::{
    Client, ClientError, ClientFuture, Image, ImageRequest, IpAddress, Server, ServerTemplate,
    Snapshot, SnapshotRequest, Volume,
};
use crate::config::{BuilderConfig, Settings, TemplateContext};
use crate::runner::{DebugPause, PausePoint};
use crate::state::{
    BuildState, Communicator, CommunicatorError, CommunicatorFuture, StepAction, StepError,
};
use crate::step::{Step, StepFuture};
use crate::ui::Ui;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settings with every required field filled in and a 30 second state
/// timeout.
///
/// # Panics
///
/// Panics if the built-in sample configuration stops validating.
#[must_use]
pub fn sample_settings() -> Settings {
    let config = BuilderConfig {
        api_token: Some(String::from("test-token-0000")),
        image_id: Some(String::from("img-base")),
        organization_id: Some(String::from("org-test")),
        server_name: Some(String::from("packer-test")),
        state_timeout: String::from("30s"),
        ..BuilderConfig::default()
    };
    config
        .settings_with(&TemplateContext::new(1_700_000_000, "test-uuid"))
        .unwrap_or_else(|err| panic!("sample settings must validate: {err}"))
}

/// Returns a scripted client, a recording UI and a build state wired to both.
#[must_use]
pub fn harness() -> (ScriptedClient, RecordingUi, BuildState) {
    let client = ScriptedClient::new();
    let ui = RecordingUi::default();
    let state = BuildState::new(
        Arc::new(sample_settings()),
        Arc::new(client.clone()),
        Arc::new(ui.clone()),
    );
    (client, ui, state)
}

/// Client operations that can be made to fail.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    /// `create_server`.
    CreateServer,
    /// `get_server`.
    GetServer,
    /// `power_on_server`.
    PowerOn,
    /// `power_off_server`.
    PowerOff,
    /// `destroy_server`.
    DestroyServer,
    /// `create_snapshot`.
    CreateSnapshot,
    /// `create_image`.
    CreateImage,
    /// `destroy_image`.
    DestroyImage,
}

/// A call received by [`ScriptedClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientCall {
    /// `create_server` with its template.
    CreateServer(ServerTemplate),
    /// `get_server` for an id.
    GetServer(String),
    /// `power_on_server` for an id.
    PowerOn(String),
    /// `power_off_server` for an id.
    PowerOff(String),
    /// `destroy_server` for an id.
    DestroyServer(String),
    /// `create_snapshot` with its request.
    CreateSnapshot(SnapshotRequest),
    /// `create_image` with its request.
    CreateImage(ImageRequest),
    /// `destroy_image` for an id.
    DestroyImage(String),
}

#[derive(Debug)]
struct ClientState {
    server_id: String,
    state: String,
    queued_states: VecDeque<String>,
    public_ip: Option<String>,
    root_volume: Option<String>,
    arch: String,
    snapshot_id: String,
    image_id: String,
    hold_on_power_off: bool,
    failures: BTreeMap<Operation, ClientError>,
    calls: Vec<ClientCall>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            server_id: String::from("srv-1"),
            state: String::from(STATE_STOPPED),
            queued_states: VecDeque::new(),
            public_ip: Some(String::from("203.0.113.5")),
            root_volume: Some(String::from("vol-root")),
            arch: String::from("x86_64"),
            snapshot_id: String::from("snap-1"),
            image_id: String::from("img-1"),
            hold_on_power_off: false,
            failures: BTreeMap::new(),
            calls: Vec::new(),
        }
    }
}

impl ClientState {
    fn record(&mut self, call: ClientCall, operation: Operation) -> Result<(), ClientError> {
        self.calls.push(call);
        self.failures.get(&operation).cloned().map_or(Ok(()), Err)
    }

    fn server_view(&mut self, id: &str) -> Server {
        let state = self
            .queued_states
            .pop_front()
            .unwrap_or_else(|| self.state.clone());
        let volumes = self
            .root_volume
            .iter()
            .map(|volume_id| {
                (
                    String::from("0"),
                    Volume {
                        id: volume_id.clone(),
                        name: String::from("root"),
                        size: 50_000_000_000,
                        volume_type: String::from("l_ssd"),
                        ..Volume::default()
                    },
                )
            })
            .collect();
        Server {
            id: id.to_owned(),
            name: String::from("packer-test"),
            state,
            public_ip: self.public_ip.as_ref().map(|address| IpAddress {
                dynamic: true,
                id: String::from("ip-1"),
                address: address.clone(),
            }),
            arch: self.arch.clone(),
            volumes,
            ..Server::default()
        }
    }
}

/// In-memory compute API.
///
/// A created server starts `stopped`; power-on moves it to `running` and
/// power-off back to `stopped`. States queued with
/// [`ScriptedClient::push_states`] are reported first, one per
/// `get_server` call. Every call is recorded.
#[derive(Clone, Debug, Default)]
pub struct ScriptedClient {
    inner: Arc<Mutex<ClientState>>,
}

impl ScriptedClient {
    /// Creates a client with default responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues states reported by the next `get_server` calls.
    pub fn push_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.inner)
            .queued_states
            .extend(states.into_iter().map(Into::into));
    }

    /// Sets the settled server state.
    pub fn set_state(&self, state: &str) {
        lock(&self.inner).state = state.to_owned();
    }

    /// Current settled server state.
    #[must_use]
    pub fn state(&self) -> String {
        lock(&self.inner).state.clone()
    }

    /// Sets the id returned for created servers.
    pub fn set_server_id(&self, id: &str) {
        lock(&self.inner).server_id = id.to_owned();
    }

    /// Sets the reported public address; `None` reports no address.
    pub fn set_public_ip(&self, address: Option<&str>) {
        lock(&self.inner).public_ip = address.map(str::to_owned);
    }

    /// Sets the volume reported in the root slot; `None` reports no volumes.
    pub fn set_root_volume(&self, volume_id: Option<&str>) {
        lock(&self.inner).root_volume = volume_id.map(str::to_owned);
    }

    /// Sets the reported architecture.
    pub fn set_arch(&self, arch: &str) {
        lock(&self.inner).arch = arch.to_owned();
    }

    /// Sets the id returned for created snapshots.
    pub fn set_snapshot_id(&self, id: &str) {
        lock(&self.inner).snapshot_id = id.to_owned();
    }

    /// Sets the id returned for created images.
    pub fn set_image_id(&self, id: &str) {
        lock(&self.inner).image_id = id.to_owned();
    }

    /// Keeps the current state when power-off is requested.
    pub fn hold_state_on_power_off(&self) {
        lock(&self.inner).hold_on_power_off = true;
    }

    /// Makes every call to `operation` fail with `error`.
    pub fn fail(&self, operation: Operation, error: ClientError) {
        lock(&self.inner).failures.insert(operation, error);
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.inner).calls.clone()
    }

    /// Number of `get_server` calls received so far.
    #[must_use]
    pub fn get_server_calls(&self) -> usize {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|call| matches!(call, ClientCall::GetServer(_)))
            .count()
    }
}

impl Client for ScriptedClient {
    fn create_server<'a>(&'a self, template: &'a ServerTemplate) -> ClientFuture<'a, Server> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.record(ClientCall::CreateServer(template.clone()), Operation::CreateServer)?;
            inner.state = String::from(STATE_STOPPED);
            let id = inner.server_id.clone();
            Ok(Server {
                name: template.name.clone(),
                organization: template.organization.clone(),
                ..inner.server_view(&id)
            })
        })
    }

    fn get_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, Server> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.record(ClientCall::GetServer(id.to_owned()), Operation::GetServer)?;
            Ok(inner.server_view(id))
        })
    }

    fn power_on_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.record(ClientCall::PowerOn(id.to_owned()), Operation::PowerOn)?;
            inner.state = String::from(STATE_RUNNING);
            Ok(())
        })
    }

    fn power_off_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.record(ClientCall::PowerOff(id.to_owned()), Operation::PowerOff)?;
            if !inner.hold_on_power_off {
                inner.state = String::from(STATE_STOPPED);
            }
            Ok(())
        })
    }

    fn destroy_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.inner).record(ClientCall::DestroyServer(id.to_owned()), Operation::DestroyServer)
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> ClientFuture<'a, Snapshot> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.record(
                ClientCall::CreateSnapshot(request.clone()),
                Operation::CreateSnapshot,
            )?;
            Ok(Snapshot {
                id: inner.snapshot_id.clone(),
                name: request.name.clone(),
                organization: request.organization.clone(),
                ..Snapshot::default()
            })
        })
    }

    fn create_image<'a>(&'a self, request: &'a ImageRequest) -> ClientFuture<'a, Image> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.record(ClientCall::CreateImage(request.clone()), Operation::CreateImage)?;
            Ok(Image {
                id: inner.image_id.clone(),
                name: request.name.clone(),
                arch: request.arch.clone(),
                organization: request.organization.clone(),
                ..Image::default()
            })
        })
    }

    fn destroy_image<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.inner).record(ClientCall::DestroyImage(id.to_owned()), Operation::DestroyImage)
        })
    }
}

/// UI that records every line.
#[derive(Clone, Debug, Default)]
pub struct RecordingUi {
    messages: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingUi {
    /// Lines passed to [`Ui::say`].
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    /// Lines passed to [`Ui::error`].
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        lock(&self.messages).push(message.to_owned());
    }

    fn error(&self, message: &str) {
        lock(&self.errors).push(message.to_owned());
    }
}

/// Communicator that records commands.
#[derive(Clone, Debug, Default)]
pub struct RecordingCommunicator {
    commands: Arc<Mutex<Vec<String>>>,
    failure: Option<String>,
    stops: Option<ScriptedClient>,
}

impl RecordingCommunicator {
    /// Communicator whose commands stop `client`'s server, like a real
    /// shutdown command would.
    #[must_use]
    pub fn stopping(client: ScriptedClient) -> Self {
        Self {
            stops: Some(client),
            ..Self::default()
        }
    }

    /// Communicator whose commands all fail with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_owned()),
            ..Self::default()
        }
    }

    /// Commands received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

impl Communicator for RecordingCommunicator {
    fn run_command<'a>(&'a self, command: &'a str) -> CommunicatorFuture<'a> {
        Box::pin(async move {
            lock(&self.commands).push(command.to_owned());
            if let Some(message) = &self.failure {
                return Err(CommunicatorError::new(message.clone()));
            }
            if let Some(client) = &self.stops {
                client.set_state(STATE_STOPPED);
            }
            Ok(())
        })
    }
}

/// Shared, ordered log of step activity.
#[derive(Clone, Debug, Default)]
pub struct StepLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl StepLog {
    /// Entries such as `run:name` and `cleanup:name`, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    fn push(&self, entry: String) {
        lock(&self.entries).push(entry);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Behaviour {
    Continue,
    Halt,
    Block,
}

/// Step that logs its run and cleanup.
#[derive(Clone, Debug)]
pub struct RecordingStep {
    name: &'static str,
    log: StepLog,
    behaviour: Behaviour,
    communicator: Option<RecordingCommunicator>,
}

impl RecordingStep {
    /// Creates a step that continues.
    #[must_use]
    pub const fn new(name: &'static str, log: StepLog) -> Self {
        Self {
            name,
            log,
            behaviour: Behaviour::Continue,
            communicator: None,
        }
    }

    /// Halts with a [`StepError::Host`] instead of continuing.
    #[must_use]
    pub fn halting(mut self) -> Self {
        self.behaviour = Behaviour::Halt;
        self
    }

    /// Never finishes; only cancellation ends the step.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.behaviour = Behaviour::Block;
        self
    }

    /// Installs `communicator` into the state when run, like a connect step.
    #[must_use]
    pub fn installing(mut self, communicator: RecordingCommunicator) -> Self {
        self.communicator = Some(communicator);
        self
    }
}

impl Step for RecordingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run<'a>(&'a self, state: &'a mut BuildState) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            self.log.push(format!("run:{}", self.name));
            if let Some(communicator) = &self.communicator {
                state.set_communicator(Arc::new(communicator.clone()));
            }
            match self.behaviour {
                Behaviour::Continue => StepAction::Continue,
                Behaviour::Halt => state.halt(StepError::Host {
                    step: self.name.to_owned(),
                    message: String::from("scripted halt"),
                }),
                Behaviour::Block => std::future::pending().await,
            }
        })
    }

    fn cleanup<'a>(&'a self, _state: &'a BuildState) -> StepFuture<'a, ()> {
        Box::pin(async move {
            self.log.push(format!("cleanup:{}", self.name));
        })
    }
}

/// Debug pause that returns immediately and records where it was called.
#[derive(Clone, Debug, Default)]
pub struct RecordingPause {
    points: Arc<Mutex<Vec<PausePoint>>>,
}

impl RecordingPause {
    /// Pause points reached so far.
    #[must_use]
    pub fn points(&self) -> Vec<PausePoint> {
        lock(&self.points).clone()
    }
}

impl DebugPause for RecordingPause {
    fn pause<'a>(&'a self, point: PausePoint) -> StepFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.points).push(point);
        })
    }
}

static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that serialises environment mutation and restores previous values
/// on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::scoped(pairs, &[]).await
    }

    /// Sets `pairs` and removes `unset` while holding a global mutex.
    pub async fn scoped(pairs: &[(&str, &str)], unset: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(unset.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len().saturating_add(unset.len()));
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in unset {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
