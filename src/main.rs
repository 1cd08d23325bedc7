//! Binary entry point for the kiln CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kiln::{
    BuildError, Builder, BuilderConfig, Client, ClientError, ConfigError, ConsoleUi, DebugPause,
    StdinPause, Ui,
};

mod cli;

use cli::{BuildCommand, Cli, DestroyImageCommand};

const DEFAULT_LOG_FILTER: &str = "warn,kiln::ui=off";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("build failed: {0}")]
    Build(#[from] BuildError),
    #[error("compute API error: {0}")]
    Api(#[from] ClientError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Build(command) => build(command).await,
        Cli::DestroyImage(command) => destroy_image(command).await,
    }
}

async fn build(args: BuildCommand) -> Result<(), CliError> {
    let mut config = BuilderConfig::load_without_cli_args()?;
    if args.debug {
        config.debug = true;
    }
    let builder = Builder::prepare(&config)?;
    let client: Arc<dyn Client> = Arc::new(builder.settings().client()?);
    let ui: Arc<dyn Ui> = Arc::new(ConsoleUi::new("onlinelabs"));
    let pause: Arc<dyn DebugPause> = Arc::new(StdinPause::new(Arc::clone(&ui)));

    let token = builder.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            token.cancel();
        }
    });

    let result = builder.run(client, ui, Vec::new(), Some(pause)).await;
    interrupt.abort();
    let artifact = result?;

    info!(builder_id = artifact.builder_id(), image_id = artifact.id(), "artifact ready");
    writeln!(io::stdout(), "{artifact}").ok();
    Ok(())
}

async fn destroy_image(args: DestroyImageCommand) -> Result<(), CliError> {
    let config = BuilderConfig::load_without_cli_args()?;
    let client = config.api_client()?;
    client.destroy_image(&args.image_id).await?;
    writeln!(io::stdout(), "Destroyed image {}", args.image_id).ok();
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln::state::StepError;

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Build(BuildError::Halted {
            step: "server_info",
            source: StepError::MissingPublicIp {
                server_id: String::from("srv-1"),
            },
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(
            rendered,
            "build failed: build halted in server_info: server srv-1 has no public IP address\n"
        );
    }

    #[test]
    fn config_errors_keep_their_guidance() {
        let err = CliError::from(ConfigError::MissingField(String::from(
            "missing API token: set ONLINELABS_API_TOKEN or add api_token to kiln.toml",
        )));
        assert!(err.to_string().starts_with("configuration error: "));
        assert!(err.to_string().contains("ONLINELABS_API_TOKEN"));
    }
}
