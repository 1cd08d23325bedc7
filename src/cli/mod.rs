//! Command-line interface definitions for the `kiln` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `kiln` binary.
#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Build Online Labs server images from a temporary server",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a server, snapshot it and register the snapshot as an image.
    #[command(
        name = "build",
        about = "Create a server, snapshot it and register the snapshot as an image"
    )]
    Build(BuildCommand),
    /// Delete an image produced by an earlier build.
    #[command(name = "destroy-image", about = "Delete an image produced by an earlier build")]
    DestroyImage(DestroyImageCommand),
}

/// Arguments for the `kiln build` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BuildCommand {
    /// Pause after every step and before every cleanup until enter is pressed.
    ///
    /// Overrides the `debug` configuration value.
    #[arg(long)]
    pub(crate) debug: bool,
}

/// Arguments for the `kiln destroy-image` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyImageCommand {
    /// Identifier of the image to delete.
    #[arg(value_name = "IMAGE_ID")]
    pub(crate) image_id: String,
}
