//! Wire types for the Online Labs compute API.
//!
//! Only the fields the build pipeline reads are modelled; unknown fields in
//! responses are ignored.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Lifecycle state reported while a server boots.
pub const STATE_STARTING: &str = "starting";
/// Lifecycle state of a booted server.
pub const STATE_RUNNING: &str = "running";
/// Lifecycle state reported while a server powers down.
pub const STATE_STOPPING: &str = "stopping";
/// Lifecycle state of a powered-off server.
pub const STATE_STOPPED: &str = "stopped";

/// Volume slot holding the boot disk.
pub const ROOT_VOLUME_SLOT: &str = "0";

/// A compute server as returned by `GET /servers/{id}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Server {
    /// Provider identifier.
    pub id: String,
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Lifecycle state label (for example `running`).
    #[serde(default)]
    pub state: String,
    /// Public address, absent when none is attached.
    #[serde(default)]
    pub public_ip: Option<IpAddress>,
    /// Private address as raw JSON.
    #[serde(default)]
    pub private_ip: Option<NullString>,
    /// Owning organisation.
    #[serde(default)]
    pub organization: String,
    /// CPU architecture.
    #[serde(default)]
    pub arch: String,
    /// Attached volumes keyed by slot index.
    #[serde(default)]
    pub volumes: BTreeMap<String, Volume>,
}

impl Server {
    /// Returns the boot volume, if the provider reported one.
    #[must_use]
    pub fn root_volume(&self) -> Option<&Volume> {
        self.volumes.get(ROOT_VOLUME_SLOT)
    }
}

/// Public IP address attached to a server.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IpAddress {
    /// Whether the address was allocated dynamically.
    #[serde(default)]
    pub dynamic: bool,
    /// Provider identifier of the address.
    #[serde(default)]
    pub id: String,
    /// Dotted address.
    pub address: String,
}

/// Block volume, either attached to a server or used as a template.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Provider identifier; empty for templates.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Storage class (for example `l_ssd`).
    #[serde(default)]
    pub volume_type: String,
    /// Owning organisation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
}

/// Snapshot derived from a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Snapshot {
    /// Provider identifier.
    pub id: String,
    /// Snapshot name.
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Lifecycle state label.
    #[serde(default)]
    pub state: String,
    /// Owning organisation.
    #[serde(default)]
    pub organization: String,
    /// Storage class inherited from the base volume.
    #[serde(default)]
    pub volume_type: String,
    /// Volume the snapshot was taken from.
    #[serde(default)]
    pub base_volume: Option<Volume>,
}

/// Bootable image derived from a snapshot.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Image {
    /// Provider identifier.
    pub id: String,
    /// Image name.
    pub name: String,
    /// CPU architecture.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    /// Whether the image is listed publicly.
    #[serde(default)]
    pub public: bool,
    /// Owning organisation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    /// Root volume backing the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<Volume>,
    /// Image this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_image: Option<NullString>,
    /// Server this one was captured from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_server: Option<NullString>,
    /// Marketplace listing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_key: Option<NullString>,
}

/// Parameters for `POST /servers`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ServerTemplate {
    /// Organisation that owns the server.
    pub organization: String,
    /// Server name.
    pub name: String,
    /// Image identifier to boot from.
    pub image: String,
    /// Tags attached to the server.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Extra volumes keyed by slot index.
    pub volumes: BTreeMap<String, Volume>,
    /// Requests a dynamic public address on boot.
    pub dynamic_ip_required: bool,
}

impl ServerTemplate {
    /// Builds a template, keying volumes by their position from slot `0`.
    ///
    /// A volume in slot `0` replaces the image's own root volume.
    #[must_use]
    pub fn new(
        organization: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
        volumes: &[Volume],
    ) -> Self {
        let slots = volumes
            .iter()
            .enumerate()
            .map(|(index, volume)| (index.to_string(), volume.clone()))
            .collect();
        Self {
            organization: organization.into(),
            name: name.into(),
            image: image.into(),
            tags: Vec::new(),
            volumes: slots,
            dynamic_ip_required: true,
        }
    }

    /// Sets the server tags.
    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets whether a dynamic public address is requested.
    #[must_use]
    pub const fn dynamic_ip_required(mut self, value: bool) -> Self {
        self.dynamic_ip_required = value;
        self
    }
}

/// Parameters for `POST /snapshots`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SnapshotRequest {
    /// Owning organisation.
    pub organization: String,
    /// Snapshot name.
    pub name: String,
    /// Volume to snapshot.
    pub volume_id: String,
}

/// Parameters for `POST /images`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ImageRequest {
    /// Owning organisation.
    pub organization: String,
    /// Image name.
    pub name: String,
    /// CPU architecture.
    pub arch: String,
    /// Snapshot used as the root volume.
    pub root_volume: String,
}

/// Nullable JSON scalar kept in its encoded form.
///
/// The wrapped text is raw JSON: decoding `"abc"` stores the five characters
/// `"abc"` including the quotes, and encoding writes the text back verbatim.
/// An empty value encodes as `null` and `null` decodes to an empty value.
/// Assigning plain text such as `abc` produces invalid JSON, which fails to
/// encode.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NullString {
    /// Raw JSON text, empty for `null`.
    pub value: String,
}

impl NullString {
    /// Wraps already-encoded JSON text.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self { value: raw.into() }
    }

    /// Returns `true` when the value encodes as `null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns the value with JSON string quoting removed.
    ///
    /// Non-string scalars are returned as their JSON text.
    #[must_use]
    pub fn as_text(&self) -> String {
        serde_json::from_str::<String>(&self.value).unwrap_or_else(|_| self.value.clone())
    }
}

impl fmt::Display for NullString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl Serialize for NullString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.value.is_empty() {
            return serializer.serialize_none();
        }
        let raw = RawValue::from_string(self.value.clone()).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NullString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Box<RawValue>>::deserialize(deserializer)?;
        Ok(Self {
            value: raw.map(|json| json.get().to_owned()).unwrap_or_default(),
        })
    }
}
