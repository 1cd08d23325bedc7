//! Configuration loading via `ortho-config`.
//!
//! [`BuilderConfig`] is the raw, layered configuration (defaults, `kiln.toml`,
//! `ONLINELABS_*` environment variables). [`BuilderConfig::settings`] turns it
//! into validated, immutable [`Settings`] before any pipeline step runs.

mod duration;
mod template;

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::client::{
    ClientError, DEFAULT_ACCOUNT_URL, DEFAULT_API_URL, OnlineLabsClient, ServerTemplate, Volume,
};

pub use duration::parse_duration;
pub use template::{TemplateContext, render_template};

/// Default snapshot name template.
pub const DEFAULT_SNAPSHOT_NAME: &str = "packer-snapshot-{{ timestamp }}";
/// Default image artifact name template.
pub const DEFAULT_IMAGE_ARTIFACT_NAME: &str = "packer-image-{{ timestamp }}";
/// Default state polling timeout.
pub const DEFAULT_STATE_TIMEOUT: &str = "6m";
/// Default SSH login.
pub const DEFAULT_SSH_USERNAME: &str = "root";
/// Default command used to stop the server gracefully.
pub const DEFAULT_SHUTDOWN_COMMAND: &str = "shutdown -h now";

const DEFAULT_VOLUME_TYPE: &str = "l_ssd";

/// Builder configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ONLINELABS",
    discovery(
        app_name = "kiln",
        env_var = "KILN_CONFIG_PATH",
        config_file_name = "kiln.toml",
        dotfile_name = ".kiln.toml",
        project_file_name = "kiln.toml"
    )
)]
pub struct BuilderConfig {
    /// Account endpoint.
    #[ortho_config(default = DEFAULT_ACCOUNT_URL.to_owned())]
    pub account_url: String,
    /// Compute API endpoint.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
    /// API token used for authentication. This value is required.
    pub api_token: Option<String>,
    /// Image the build server boots from. This value is required.
    pub image_id: Option<String>,
    /// Organisation owning the server, snapshot and image. This value is
    /// required.
    pub organization_id: Option<String>,
    /// Name of the build server. Defaults to `packer-<uuid>`.
    pub server_name: Option<String>,
    /// Comma-separated tags attached to the build server.
    pub server_tags: Option<String>,
    /// Comma-separated volume templates, each `name:size_bytes[:type]`.
    pub volumes: Option<String>,
    /// Requests a dynamic public IP so the server can be reached over SSH.
    /// Unset means `true`.
    pub dynamic_public_ip: Option<bool>,
    /// Snapshot name template.
    #[ortho_config(default = DEFAULT_SNAPSHOT_NAME.to_owned())]
    pub snapshot_name: String,
    /// Image artifact name template.
    #[ortho_config(default = DEFAULT_IMAGE_ARTIFACT_NAME.to_owned())]
    pub image_artifact_name: String,
    /// SSH login used by the connect step.
    #[ortho_config(default = DEFAULT_SSH_USERNAME.to_owned())]
    pub ssh_username: String,
    /// SSH port used by the connect step.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Private key file used by the connect step.
    pub ssh_private_key_file: Option<String>,
    /// Command run over the communicator to stop the server gracefully.
    #[ortho_config(default = DEFAULT_SHUTDOWN_COMMAND.to_owned())]
    pub shutdown_command: String,
    /// How long to wait for a server state change, for example `6m` or
    /// `1m30s`.
    #[ortho_config(default = DEFAULT_STATE_TIMEOUT.to_owned())]
    pub state_timeout: String,
    /// Pauses between steps and before each cleanup.
    #[ortho_config(default = false)]
    pub debug: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl BuilderConfig {
    fn require_field<'a>(
        value: Option<&'a String>,
        metadata: &FieldMetadata,
    ) -> Result<&'a str, ConfigError> {
        match value.map(|raw| raw.trim()) {
            Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to kiln.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            ))),
        }
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("kiln")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds an API client from the credentials alone, for operations such
    /// as image deletion that do not need a full build configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the token is missing, an endpoint is
    /// not a valid URL, or the HTTP client cannot be built.
    pub fn api_client(&self) -> Result<OnlineLabsClient, ConfigError> {
        let api_token = Self::require_field(
            self.api_token.as_ref(),
            &FieldMetadata::new("API token", "ONLINELABS_API_TOKEN", "api_token"),
        )?;
        Ok(OnlineLabsClient::new(
            api_token,
            parse_url("api_url", &self.api_url)?,
            parse_url("account_url", &self.account_url)?,
        )?)
    }

    /// Validates the configuration and renders name templates using the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is missing or a value
    /// cannot be parsed.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        self.settings_with(&TemplateContext::now())
    }

    /// Validates the configuration and renders name templates with an
    /// explicit template context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is missing or a value
    /// cannot be parsed.
    pub fn settings_with(&self, context: &TemplateContext) -> Result<Settings, ConfigError> {
        let api_token = Self::require_field(
            self.api_token.as_ref(),
            &FieldMetadata::new("API token", "ONLINELABS_API_TOKEN", "api_token"),
        )?;
        let image_id = Self::require_field(
            self.image_id.as_ref(),
            &FieldMetadata::new("source image ID", "ONLINELABS_IMAGE_ID", "image_id"),
        )?;
        let organization_id = Self::require_field(
            self.organization_id.as_ref(),
            &FieldMetadata::new(
                "organization ID",
                "ONLINELABS_ORGANIZATION_ID",
                "organization_id",
            ),
        )?;

        let state_timeout = parse_duration(&self.state_timeout).map_err(|message| {
            ConfigError::InvalidDuration {
                value: self.state_timeout.clone(),
                message,
            }
        })?;
        if state_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration {
                value: self.state_timeout.clone(),
                message: String::from("state_timeout must be greater than zero"),
            });
        }

        let server_name = self
            .server_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("packer-{}", Uuid::new_v4()), str::to_owned);

        Ok(Settings {
            account_url: parse_url("account_url", &self.account_url)?,
            api_url: parse_url("api_url", &self.api_url)?,
            api_token: api_token.to_owned(),
            organization_id: organization_id.to_owned(),
            image_id: image_id.to_owned(),
            server_name,
            server_tags: parse_tags(self.server_tags.as_deref()),
            server_volumes: parse_volumes(self.volumes.as_deref())?,
            dynamic_public_ip: self.dynamic_public_ip.unwrap_or(true),
            snapshot_name: render_field("snapshot_name", &self.snapshot_name, context)?,
            image_artifact_name: render_field(
                "image_artifact_name",
                &self.image_artifact_name,
                context,
            )?,
            ssh_username: non_empty_or(&self.ssh_username, DEFAULT_SSH_USERNAME),
            ssh_port: self.ssh_port,
            ssh_private_key_file: self
                .ssh_private_key_file
                .as_deref()
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(Utf8PathBuf::from),
            shutdown_command: non_empty_or(&self.shutdown_command, DEFAULT_SHUTDOWN_COMMAND),
            state_timeout,
            debug: self.debug,
        })
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            account_url: DEFAULT_ACCOUNT_URL.to_owned(),
            api_url: DEFAULT_API_URL.to_owned(),
            api_token: None,
            image_id: None,
            organization_id: None,
            server_name: None,
            server_tags: None,
            volumes: None,
            dynamic_public_ip: None,
            snapshot_name: DEFAULT_SNAPSHOT_NAME.to_owned(),
            image_artifact_name: DEFAULT_IMAGE_ARTIFACT_NAME.to_owned(),
            ssh_username: DEFAULT_SSH_USERNAME.to_owned(),
            ssh_port: 22,
            ssh_private_key_file: None,
            shutdown_command: DEFAULT_SHUTDOWN_COMMAND.to_owned(),
            state_timeout: DEFAULT_STATE_TIMEOUT.to_owned(),
            debug: false,
        }
    }
}

/// Validated builder settings, read-only once the pipeline starts.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Account endpoint.
    pub account_url: Url,
    /// Compute API endpoint.
    pub api_url: Url,
    /// API token used for authentication.
    pub api_token: String,
    /// Organisation owning the created resources.
    pub organization_id: String,
    /// Image the build server boots from.
    pub image_id: String,
    /// Build server name.
    pub server_name: String,
    /// Tags attached to the build server.
    pub server_tags: Vec<String>,
    /// Volume templates attached to the build server.
    pub server_volumes: Vec<Volume>,
    /// Whether a dynamic public IP is requested.
    pub dynamic_public_ip: bool,
    /// Rendered snapshot name.
    pub snapshot_name: String,
    /// Rendered image artifact name.
    pub image_artifact_name: String,
    /// SSH login used by the connect step.
    pub ssh_username: String,
    /// SSH port used by the connect step.
    pub ssh_port: u16,
    /// Private key file used by the connect step.
    pub ssh_private_key_file: Option<Utf8PathBuf>,
    /// Command used to stop the server gracefully.
    pub shutdown_command: String,
    /// Timeout applied to every state poll.
    pub state_timeout: Duration,
    /// Pauses between steps when set.
    pub debug: bool,
}

impl Settings {
    /// Builds the production API client for these settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn client(&self) -> Result<OnlineLabsClient, ClientError> {
        OnlineLabsClient::new(
            self.api_token.clone(),
            self.api_url.clone(),
            self.account_url.clone(),
        )
    }

    /// Builds the server creation request from the settings.
    #[must_use]
    pub fn server_template(&self) -> ServerTemplate {
        ServerTemplate::new(
            &self.organization_id,
            &self.server_name,
            &self.image_id,
            &self.server_volumes,
        )
        .tags(self.server_tags.clone())
        .dynamic_ip_required(self.dynamic_public_ip)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("account_url", &self.account_url.as_str())
            .field("api_url", &self.api_url.as_str())
            .field("api_token", &"<redacted>")
            .field("organization_id", &self.organization_id)
            .field("image_id", &self.image_id)
            .field("server_name", &self.server_name)
            .field("server_tags", &self.server_tags)
            .field("server_volumes", &self.server_volumes)
            .field("dynamic_public_ip", &self.dynamic_public_ip)
            .field("snapshot_name", &self.snapshot_name)
            .field("image_artifact_name", &self.image_artifact_name)
            .field("ssh_username", &self.ssh_username)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_private_key_file", &self.ssh_private_key_file)
            .field("shutdown_command", &self.shutdown_command)
            .field("state_timeout", &self.state_timeout)
            .field("debug", &self.debug)
            .finish()
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidUrl {
        field,
        value: raw.to_owned(),
        message: err.to_string(),
    })
}

fn parse_tags(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_volumes(raw: Option<&str>) -> Result<Vec<Volume>, ConfigError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|spec| !spec.is_empty())
        .map(parse_volume)
        .collect()
}

fn parse_volume(spec: &str) -> Result<Volume, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidVolume {
        spec: spec.to_owned(),
        message: message.to_owned(),
    };

    let mut parts = spec.split(':').map(str::trim);
    let name = parts
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("volume name is empty"))?;
    let size = parts
        .next()
        .ok_or_else(|| invalid("volume size is missing"))?
        .parse::<u64>()
        .map_err(|_| invalid("volume size must be a whole number of bytes"))?;
    let volume_type = parts
        .next()
        .filter(|kind| !kind.is_empty())
        .unwrap_or(DEFAULT_VOLUME_TYPE);
    if parts.next().is_some() {
        return Err(invalid("expected name:size_bytes[:type]"));
    }

    Ok(Volume {
        name: name.to_owned(),
        size,
        volume_type: volume_type.to_owned(),
        ..Volume::default()
    })
}

fn render_field(
    field: &'static str,
    raw: &str,
    context: &TemplateContext,
) -> Result<String, ConfigError> {
    let rendered = render_template(raw, context)
        .map_err(|message| ConfigError::InvalidTemplate { field, message })?;
    if rendered.trim().is_empty() {
        return Err(ConfigError::InvalidTemplate {
            field,
            message: String::from("rendered name is empty"),
        });
    }
    Ok(rendered)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when `state_timeout` is not a valid duration.
    #[error("failed parsing state_timeout {value:?}: {message}")]
    InvalidDuration {
        /// Raw value supplied by the user.
        value: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when an endpoint is not a valid URL.
    #[error("invalid {field} {value:?}: {message}")]
    InvalidUrl {
        /// Configuration key holding the URL.
        field: &'static str,
        /// Raw value supplied by the user.
        value: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a name template cannot be rendered.
    #[error("invalid {field} template: {message}")]
    InvalidTemplate {
        /// Configuration key holding the template.
        field: &'static str,
        /// Rendering error message.
        message: String,
    },
    /// Raised when the API client cannot be constructed.
    #[error("failed to build API client: {0}")]
    Client(#[from] ClientError),
    /// Raised when a volume template is malformed.
    #[error("invalid volume {spec:?}: {message}")]
    InvalidVolume {
        /// Raw volume template.
        spec: String,
        /// Description of the problem.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn valid_config() -> BuilderConfig {
        BuilderConfig {
            api_token: Some(String::from("scw-secret-token")),
            image_id: Some(String::from("img-ubuntu")),
            organization_id: Some(String::from("org-1")),
            ..BuilderConfig::default()
        }
    }

    fn context() -> TemplateContext {
        TemplateContext::new(1_700_000_000, "0f0e")
    }

    #[rstest]
    fn defaults_render_snapshot_and_image_names(valid_config: BuilderConfig) {
        let settings = valid_config
            .settings_with(&context())
            .unwrap_or_else(|err| panic!("valid config: {err}"));

        assert_eq!(settings.snapshot_name, "packer-snapshot-1700000000");
        assert_eq!(settings.image_artifact_name, "packer-image-1700000000");
        assert_eq!(settings.state_timeout, Duration::from_secs(360));
        assert_eq!(settings.ssh_username, "root");
        assert_eq!(settings.api_url.as_str(), "https://api.cloud.online.net/");
        assert!(settings.server_name.starts_with("packer-"));
        assert!(settings.dynamic_public_ip);
        assert!(settings.server_template().dynamic_ip_required);
    }

    #[rstest]
    #[case::token(|cfg: &mut BuilderConfig| cfg.api_token = None, "ONLINELABS_API_TOKEN")]
    #[case::blank_token(|cfg: &mut BuilderConfig| cfg.api_token = Some(String::from("  ")), "api_token")]
    #[case::image(|cfg: &mut BuilderConfig| cfg.image_id = None, "ONLINELABS_IMAGE_ID")]
    #[case::org(|cfg: &mut BuilderConfig| cfg.organization_id = None, "ONLINELABS_ORGANIZATION_ID")]
    fn missing_required_fields_produce_actionable_errors(
        valid_config: BuilderConfig,
        #[case] mutate: fn(&mut BuilderConfig),
        #[case] expected: &str,
    ) {
        let mut cfg = valid_config;
        mutate(&mut cfg);
        let err = cfg
            .settings_with(&context())
            .expect_err("validation should fail");
        let message = err.to_string();
        assert!(matches!(err, ConfigError::MissingField(_)), "{message}");
        assert!(message.contains(expected), "{message}");
        assert!(message.contains("kiln.toml"), "{message}");
    }

    #[rstest]
    fn unparseable_timeout_is_rejected(valid_config: BuilderConfig) {
        let cfg = BuilderConfig {
            state_timeout: String::from("soon"),
            ..valid_config
        };
        let err = cfg
            .settings_with(&context())
            .expect_err("timeout should fail");
        assert!(matches!(err, ConfigError::InvalidDuration { .. }), "{err}");
        assert!(err.to_string().contains("state_timeout"));
    }

    #[rstest]
    fn zero_timeout_is_rejected(valid_config: BuilderConfig) {
        let cfg = BuilderConfig {
            state_timeout: String::from("0s"),
            ..valid_config
        };
        assert!(matches!(
            cfg.settings_with(&context()),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[rstest]
    fn bad_endpoint_is_rejected(valid_config: BuilderConfig) {
        let cfg = BuilderConfig {
            api_url: String::from("not a url"),
            ..valid_config
        };
        assert!(matches!(
            cfg.settings_with(&context()),
            Err(ConfigError::InvalidUrl { field: "api_url", .. })
        ));
    }

    #[rstest]
    fn unknown_template_variable_is_rejected(valid_config: BuilderConfig) {
        let cfg = BuilderConfig {
            image_artifact_name: String::from("image-{{ build_name }}"),
            ..valid_config
        };
        let err = cfg
            .settings_with(&context())
            .expect_err("template should fail");
        assert!(
            matches!(err, ConfigError::InvalidTemplate { field: "image_artifact_name", .. }),
            "{err}"
        );
    }

    #[rstest]
    fn tags_and_volumes_are_parsed(valid_config: BuilderConfig) {
        let cfg = BuilderConfig {
            server_tags: Some(String::from("packer, build ,,ci")),
            volumes: Some(String::from("data:50000000000, scratch:1000:l_hdd")),
            dynamic_public_ip: Some(false),
            ..valid_config
        };
        let settings = cfg
            .settings_with(&context())
            .unwrap_or_else(|err| panic!("valid config: {err}"));

        assert_eq!(settings.server_tags, vec!["packer", "build", "ci"]);
        assert_eq!(settings.server_volumes.len(), 2);
        assert_eq!(
            settings.server_volumes.get(1).map(|v| v.volume_type.as_str()),
            Some("l_hdd")
        );

        let template = settings.server_template();
        assert_eq!(template.organization, "org-1");
        assert_eq!(template.image, "img-ubuntu");
        assert_eq!(template.tags, settings.server_tags);
        assert!(!template.dynamic_ip_required);
        assert_eq!(
            template.volumes.get("0").map(|v| v.volume_type.as_str()),
            Some("l_ssd")
        );
    }

    #[rstest]
    #[case("data")]
    #[case("data:big")]
    #[case(":10")]
    #[case("data:10:l_ssd:extra")]
    fn malformed_volumes_are_rejected(valid_config: BuilderConfig, #[case] spec: &str) {
        let cfg = BuilderConfig {
            volumes: Some(spec.to_owned()),
            ..valid_config
        };
        assert!(matches!(
            cfg.settings_with(&context()),
            Err(ConfigError::InvalidVolume { .. })
        ));
    }

    #[rstest]
    fn api_client_needs_only_the_token() {
        let cfg = BuilderConfig {
            api_token: Some(String::from("scw-secret-token")),
            api_url: String::from("http://127.0.0.1:9/"),
            ..BuilderConfig::default()
        };
        let client = cfg
            .api_client()
            .unwrap_or_else(|err| panic!("client should build: {err}"));
        assert_eq!(client.api_url().as_str(), "http://127.0.0.1:9/");

        let missing = BuilderConfig::default().api_client();
        assert!(matches!(missing, Err(ConfigError::MissingField(_))));
    }

    #[rstest]
    fn debug_output_redacts_token(valid_config: BuilderConfig) {
        let settings = valid_config
            .settings_with(&context())
            .unwrap_or_else(|err| panic!("valid config: {err}"));
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("scw-secret-token"), "{rendered}");
        assert!(rendered.contains("<redacted>"));
    }
}
