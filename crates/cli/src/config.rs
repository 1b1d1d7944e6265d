//! Command-line and environment configuration.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use membership::{Introducer, Member, MemberConfig};
use std::path::PathBuf;
use std::time::Duration;
use streaming::{Transport, TransportConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::logging;
use crate::shell;

#[derive(Debug, Parser)]
#[command(name = "ring-cluster", version, about = "Self-managing cluster with a replicated file store")]
pub struct CliConfig {
    /// Log filter, e.g. `info` or `membership=debug,info`. `RUST_LOG` wins if set.
    #[arg(long, env = "CLUSTER_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "CLUSTER_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Run a member with an interactive command shell.
    Member(MemberArgs),
    /// Run the introducer joining members contact first.
    Introducer(IntroducerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct MemberArgs {
    /// Host to bind and advertise.
    #[arg(long, env = "CLUSTER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// TCP and UDP port.
    #[arg(long, env = "CLUSTER_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Introducer `host:port`. Without it the member founds its own group.
    #[arg(long, env = "CLUSTER_INTRODUCER", value_parser = parse_address)]
    pub introducer: Option<String>,

    /// Root directory for stored files.
    #[arg(long, env = "CLUSTER_STORAGE_DIR", default_value = "storage")]
    pub storage_dir: PathBuf,

    #[arg(long, env = "CLUSTER_PROTOCOL_PERIOD_MS", default_value_t = 1500)]
    pub protocol_period_ms: u64,

    #[arg(long, env = "CLUSTER_PING_TIMEOUT_MS", default_value_t = 500)]
    pub ping_timeout_ms: u64,

    /// Successors pinged per protocol period.
    #[arg(long, env = "CLUSTER_MONITORS", default_value_t = 1)]
    pub monitors: usize,

    #[arg(long, env = "CLUSTER_REPAIR_PERIOD_MS", default_value_t = 10_000)]
    pub repair_period_ms: u64,

    #[arg(long, env = "CLUSTER_REPLICATION_FACTOR", default_value_t = 4)]
    pub replication_factor: usize,

    #[arg(long, env = "CLUSTER_CONNECT_TIMEOUT_MS", default_value_t = 2000)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "CLUSTER_IO_TIMEOUT_MS", default_value_t = 10_000)]
    pub io_timeout_ms: u64,

    #[arg(long, env = "CLUSTER_TRANSFER_TIMEOUT_MS", default_value_t = 60_000)]
    pub transfer_timeout_ms: u64,
}

fn parse_address(value: &str) -> Result<String, String> {
    corelib::node::parse_endpoint(value)
        .map(|_| value.to_string())
        .map_err(|e| e.to_string())
}

impl MemberArgs {
    pub fn member_config(&self) -> MemberConfig {
        MemberConfig {
            host: self.host.clone(),
            port: self.port,
            introducer: self.introducer.clone(),
            storage_root: self.storage_dir.clone(),
            protocol_period: Duration::from_millis(self.protocol_period_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            monitors: self.monitors,
            repair_period: Duration::from_millis(self.repair_period_ms),
            replication_factor: self.replication_factor,
            transport: TransportConfig {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                io_timeout: Duration::from_millis(self.io_timeout_ms),
                transfer_timeout: Duration::from_millis(self.transfer_timeout_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct IntroducerArgs {
    #[arg(long, env = "CLUSTER_INTRODUCER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "CLUSTER_INTRODUCER_PORT", default_value_t = 4999)]
    pub port: u16,
}

impl CliConfig {
    /// Install logging, start the runtime and run the selected mode.
    pub fn run(self) -> anyhow::Result<()> {
        logging::init(&self.log_level, self.log_file.as_deref())?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the async runtime")?;

        runtime.block_on(async move {
            match self.mode {
                Mode::Member(args) => {
                    let member = Member::new(args.member_config());
                    shell::run(&member).await
                }
                Mode::Introducer(args) => run_introducer(&args).await,
            }
        })
    }
}

async fn run_introducer(args: &IntroducerArgs) -> anyhow::Result<()> {
    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind introducer on {}:{}", args.host, args.port))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    Introducer::new(Transport::default())
        .serve(listener, shutdown)
        .await?;
    Ok(())
}
