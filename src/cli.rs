//! Shared CLI scaffolding for the per-node binaries (§8): the
//! `--clean`/`--run`/`--test` flags and log-filter setup every binary
//! parses the same way.

use std::path::PathBuf;

use clap::Args;

use crate::config::OperationMode;

/// The lifecycle/mode flags every node binary shares. `--clean` and `--run`
/// are mutually exclusive and one of them is required; clap's
/// `conflicts_with` only covers the first half, so [`CommonArgs::validate`]
/// covers the rest.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Tear down this node's queue and bindings, then exit.
    #[arg(long, conflicts_with = "run")]
    pub clean: bool,

    /// Enter the node's lifecycle loop.
    #[arg(long = "run", visible_alias = "subscribe", conflicts_with = "clean")]
    pub run: bool,

    /// Select test mode: exchange `mrcs.test`, `*_test.sqlite3` files.
    #[arg(short = 't', long = "test")]
    pub test: bool,

    #[arg(long, default_value = "amqp://127.0.0.1:5672/%2f")]
    pub amqp_uri: String,

    /// Directory the per-store `.sqlite3` files live under.
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Host identity the Clock/model-time tables are keyed by.
    #[arg(long, default_value = "local")]
    pub host: String,
}

impl CommonArgs {
    pub fn mode(&self) -> OperationMode {
        if self.test {
            OperationMode::Test
        } else {
            OperationMode::Live
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.clean == self.run {
            anyhow::bail!("exactly one of --clean or --run must be given");
        }
        Ok(())
    }
}

/// `tracing-subscriber` with `EnvFilter`, defaulting to `info` per §6.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
