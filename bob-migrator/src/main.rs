//! Bob Migrator
//!
//! Moves replica data between nodes so a running bob cluster matches a new
//! cluster configuration.

use anyhow::Context;
use bob_migrator::{
    ClusterStateAlterer, FileConfigurationSource, HttpNodeApi, MigratorConfig, NodeApi,
    RemoteFileClient, RootDirOverrides, SimulatedNodeApi, SimulatedRemoteFileClient, SshRemoteFileClient,
    SshSettings,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bob-migrator")]
#[command(about = "Migrate bob cluster data to a new topology")]
#[command(version)]
struct Cli {
    /// Configuration the cluster currently runs with (defaults to --cluster-config)
    #[arg(long, env = "BOB_OLD_CONFIG")]
    old_config: Option<PathBuf>,

    /// Target cluster configuration
    #[arg(long, env = "BOB_CLUSTER_CONFIG", default_value = "cluster.toml")]
    cluster_config: PathBuf,

    /// Plan and log only, change nothing
    #[arg(long)]
    dry_run: bool,

    /// Remove replicas that are not in the target configuration
    #[arg(long)]
    remove_unused_replicas: bool,

    /// Also remove unused replicas that were not copied anywhere
    #[arg(long)]
    force_remove_unused_replicas_without_copies: bool,

    /// Maximum number of concurrent copy and remove operations
    #[arg(long, default_value = "1")]
    copy_parallel_degree: usize,

    /// Root dir name overrides: `node1:dir1,node2:dir2` or `*:dir`
    #[arg(long)]
    bob_root_dir: Option<String>,

    /// Keep going after failed copies or restarts
    #[arg(long)]
    continue_on_error: bool,

    /// Do not check that alien directories are empty
    #[arg(long)]
    skip_alien_check: bool,

    /// Node HTTP API port
    #[arg(long, env = "BOB_API_PORT", default_value_t = bob_core::DEFAULT_API_PORT)]
    api_port: u16,

    /// Node HTTP API request timeout in seconds
    #[arg(long, default_value = "30")]
    api_timeout: u64,

    /// Remote user for ssh and rsync
    #[arg(long, env = "BOB_SSH_USER")]
    ssh_user: Option<String>,

    /// Remote ssh port
    #[arg(long, default_value = "22")]
    ssh_port: u16,

    /// Private key for ssh
    #[arg(long, env = "BOB_SSH_KEY")]
    ssh_key: Option<PathBuf>,

    /// Log remote commands and API calls instead of performing them
    #[arg(long)]
    test_mode: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<MigratorConfig> {
        let root_dir_overrides = match &self.bob_root_dir {
            Some(value) => RootDirOverrides::parse(value).context("Invalid --bob-root-dir")?,
            None => RootDirOverrides::default(),
        };

        let config = MigratorConfig {
            old_config_path: self.old_config.unwrap_or_else(|| self.cluster_config.clone()),
            cluster_config_path: self.cluster_config,
            dry_run: self.dry_run,
            remove_unused_replicas: self.remove_unused_replicas,
            force_remove_without_copies: self.force_remove_unused_replicas_without_copies,
            copy_parallel_degree: self.copy_parallel_degree,
            root_dir_overrides,
            continue_on_error: self.continue_on_error,
            skip_alien_check: self.skip_alien_check,
            api_port: self.api_port,
            api_timeout: Duration::from_secs(self.api_timeout),
            ssh: SshSettings {
                user: self.ssh_user,
                port: self.ssh_port,
                key_path: self.ssh_key,
                ..Default::default()
            },
            test_mode: self.test_mode,
        };

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(true)
        .init();

    let config = cli.into_config()?;

    info!(
        old_config = %config.old_config_path.display(),
        cluster_config = %config.cluster_config_path.display(),
        dry_run = config.dry_run,
        remove_unused_replicas = config.remove_unused_replicas,
        copy_parallel_degree = config.copy_parallel_degree,
        test_mode = config.test_mode,
        "Starting bob migrator"
    );

    let (node_api, remote): (Arc<dyn NodeApi>, Arc<dyn RemoteFileClient>) = if config.test_mode {
        warn!("Test mode: remote commands and API calls are only logged");
        (
            Arc::new(SimulatedNodeApi::default()),
            Arc::new(SimulatedRemoteFileClient),
        )
    } else {
        (
            Arc::new(HttpNodeApi::new(config.api_port, config.api_timeout)?),
            Arc::new(SshRemoteFileClient::new(config.ssh.clone())),
        )
    };

    let source = Arc::new(FileConfigurationSource::new(
        config.old_config_path.clone(),
        config.cluster_config_path.clone(),
    ));
    let alterer = ClusterStateAlterer::new(&config, source, node_api, remote);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight operations");
            shutdown.cancel();
        }
    });

    let report = match alterer.alter(&cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Migration aborted");
            return Err(e.into());
        }
    };

    for line in report.summary().lines() {
        info!("{}", line);
    }

    if !report.is_success() {
        anyhow::bail!("Migration finished with failures");
    }

    Ok(())
}
