//! Binary entry point for the `clpmount` command-line tool.
//!
//! Parses connection parameters and a mount-variant subcommand, sets up
//! logging, and hands off to the matching library entry point. Each
//! invocation blocks until the filesystem is unmounted (e.g. via
//! `fusermount -u <mount-dir>`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use remote_fuse::config::DEFAULT_MAX_FILE_SIZE;
use remote_fuse::{
    mount_clp_sequential_read, mount_ir_sequential_write, mount_mostly_sequential_write,
    mount_sequential_read_with_options, ReadMountOptions, S3MountConfig,
};

#[derive(Parser)]
#[command(name = "clpmount", version, about = "FUSE mounts over S3 for CLP archive pipelines")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: MountCommand,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Object-store access key id.
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    access_key_id: String,

    /// Object-store secret access key.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: String,

    /// Optional session token for temporary credentials.
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    session_token: Option<String>,

    /// Endpoint URL of the S3-compatible store.
    #[arg(long, env = "S3_ENDPOINT_URL")]
    endpoint_url: String,

    /// Absolute path prefix to mount: /<bucket>/<key-prefix>.
    #[arg(long)]
    s3_path_prefix: String,

    /// Prefix of --s3-path-prefix to omit from mount-relative paths.
    #[arg(long)]
    strip_prefix: Option<String>,
}

#[derive(Subcommand)]
enum MountCommand {
    /// Read-only mount over a listed prefix, optimized for opening
    /// objects in listing order.
    Read {
        mount_dir: PathBuf,
        /// Scratch directory; defaults to a hidden sibling of MOUNT_DIR.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Serve opens in any order instead of strict listing order.
        #[arg(long)]
        unordered: bool,
    },
    /// Read-only mount over CLP archives with merged-metadata prefetch.
    ClpRead {
        mount_dir: PathBuf,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Synthetic size reported for files of unknown length.
        #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
        max_file_size: u64,
    },
    /// Write mount for compression output; metadata files merge into a
    /// single object per archive.
    Write {
        mount_dir: PathBuf,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Write mount streaming every created file as its own object.
    StreamWrite { mount_dir: PathBuf },
}

/// Hidden sibling of the mount directory, e.g. `/run/x` → `/run/.x-cache`.
fn default_cache_dir(mount_dir: &Path) -> anyhow::Result<PathBuf> {
    let Some(name) = mount_dir.file_name().and_then(|n| n.to_str()) else {
        bail!(
            "cannot derive a cache directory from '{}'; pass --cache-dir",
            mount_dir.display()
        );
    };
    let parent = mount_dir.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{name}-cache")))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let connection = cli.connection;
    let config = S3MountConfig::new(
        connection.access_key_id,
        connection.secret_access_key,
        connection.session_token,
        connection.endpoint_url,
        &connection.s3_path_prefix,
        connection.strip_prefix.as_deref(),
    )
    .context("invalid mount configuration")?;

    match cli.command {
        MountCommand::Read {
            mount_dir,
            cache_dir,
            unordered,
        } => {
            let cache_dir = match cache_dir {
                Some(dir) => dir,
                None => default_cache_dir(&mount_dir)?,
            };
            let options = ReadMountOptions {
                ordered_reads: !unordered,
                ..ReadMountOptions::default()
            };
            mount_sequential_read_with_options(&config, &mount_dir, &cache_dir, options)
                .context("sequential-read mount failed")?;
        }
        MountCommand::ClpRead {
            mount_dir,
            cache_dir,
            max_file_size,
        } => {
            let cache_dir = match cache_dir {
                Some(dir) => dir,
                None => default_cache_dir(&mount_dir)?,
            };
            mount_clp_sequential_read(&config, &mount_dir, &cache_dir, max_file_size)
                .context("CLP read mount failed")?;
        }
        MountCommand::Write {
            mount_dir,
            cache_dir,
        } => {
            let cache_dir = match cache_dir {
                Some(dir) => dir,
                None => default_cache_dir(&mount_dir)?,
            };
            mount_mostly_sequential_write(&config, &mount_dir, &cache_dir)
                .context("write mount failed")?;
        }
        MountCommand::StreamWrite { mount_dir } => {
            mount_ir_sequential_write(&config, &mount_dir).context("stream-write mount failed")?;
        }
    }
    Ok(())
}
