//! Process entry point: parse the CLI, wire the concrete LVM/mount/module
//! collaborators, and serve the three CSI gRPC services until terminated.

use std::sync::Arc;

use clap::Parser;
use csi_lvm::config::{Cli, Config};
use csi_lvm::lvm::cli::CliLvmDriver;
use csi_lvm::lvm::LvmDriver;
use csi_lvm::metrics::{LoggingMetricsSink, MetricsSink};
use csi_lvm::modules::{ModuleInventory, ProcModulesInventory};
use csi_lvm::mount::{MountAdapter, SysMountAdapter};
use csi_lvm::server::PluginServer;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    color_backtrace::install();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    log::info!(
        "starting csi-lvm-plugin: volume_group={} devices={:?} remove_mode={}",
        config.volume_group_name,
        config.device_paths,
        config.remove_mode
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);
    let lvm: Arc<dyn LvmDriver> = Arc::new(CliLvmDriver::new());
    let mounts: Arc<dyn MountAdapter> = Arc::new(SysMountAdapter::new());
    let modules: Arc<dyn ModuleInventory> = Arc::new(ProcModulesInventory::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(LoggingMetricsSink);

    let server = PluginServer::new(config, lvm, mounts, modules, metrics);
    server.serve().await?;
    Ok(())
}
