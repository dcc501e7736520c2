use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vab_sync::{
    start_request_runtime, start_update_queue_runtime, RequestConfig, StoreUpdatedCallback,
    UdpNotifier, UpdateQueueConfig,
};
use vab_vars::VariableStore;

#[derive(Debug, Parser)]
#[command(
    name = "vab",
    about = "File-mediated variable bridge between a voice automation peer and per-process variable stores"
)]
struct Cli {
    #[arg(
        long,
        env = "VAB_DATA_DIR",
        default_value = ".vab/processes",
        help = "Directory holding one variable store folder per tracked process"
    )]
    data_dir: PathBuf,

    #[arg(
        long,
        env = "VAB_UPDATE_QUEUE_FILE",
        default_value = ".vab/inbox/update-vars.txt",
        help = "Inbox file the peer appends key=value updates to"
    )]
    update_queue_file: PathBuf,

    #[arg(
        long,
        env = "VAB_REQUEST_FILE",
        default_value = ".vab/inbox/request-vars.txt",
        help = "Inbox file the peer appends Name? queries to"
    )]
    request_file: PathBuf,

    #[arg(
        long,
        env = "VAB_STATE_DIR",
        default_value = ".vab/sync",
        help = "Directory for runtime status snapshots"
    )]
    state_dir: PathBuf,

    #[arg(
        long,
        env = "VAB_UPDATE_POLL_MS",
        default_value_t = 200,
        help = "Update queue poll interval in milliseconds"
    )]
    update_poll_ms: u64,

    #[arg(
        long,
        env = "VAB_REQUEST_POLL_MS",
        default_value_t = 100,
        help = "Request file poll interval in milliseconds"
    )]
    request_poll_ms: u64,

    #[arg(
        long,
        env = "VAB_RETAIN_QUEUE",
        help = "Keep consumed update lines in the queue file instead of deleting them"
    )]
    retain_queue: bool,

    #[arg(
        long,
        env = "VAB_UDP_HOST",
        default_value = "127.0.0.1",
        help = "Destination host for variable-request responses"
    )]
    udp_host: String,

    #[arg(
        long,
        env = "VAB_UDP_PORT",
        default_value_t = 4242,
        help = "Destination port for variable-request responses"
    )]
    udp_port: u16,

    #[arg(
        long,
        env = "VAB_ACTIVE_PROCESS",
        help = "Process that receives unaddressed updates and queries at startup"
    )]
    active_process: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = Arc::new(VariableStore::new(cli.data_dir.clone()));
    if let Some(active) = cli.active_process.as_deref() {
        store.set_active_process(Some(active));
    }
    let notifier = Arc::new(UdpNotifier::new(cli.udp_host.clone(), cli.udp_port));

    let on_store_updated: StoreUpdatedCallback = Arc::new(|process: &str| {
        tracing::info!(process, "process variables updated from queue");
    });

    let update_config = UpdateQueueConfig {
        queue_path: cli.update_queue_file.clone(),
        poll_interval: Duration::from_millis(cli.update_poll_ms),
        drain_mode: !cli.retain_queue,
        state_path: Some(cli.state_dir.join("update-queue-state.json")),
    };
    let request_config = RequestConfig {
        request_path: cli.request_file.clone(),
        poll_interval: Duration::from_millis(cli.request_poll_ms),
        state_path: Some(cli.state_dir.join("request-state.json")),
    };

    let mut update_handle =
        start_update_queue_runtime(update_config, store.clone(), Some(on_store_updated))?;
    let mut request_handle = start_request_runtime(request_config, store.clone(), notifier.clone())?;

    tracing::info!(
        data_dir = %cli.data_dir.display(),
        "vab bridge running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    update_handle.shutdown().await;
    request_handle.shutdown().await;
    notifier.close();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
