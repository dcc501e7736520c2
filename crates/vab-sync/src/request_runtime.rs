use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use vab_core::{current_unix_timestamp_ms, write_text_atomic};
use vab_vars::{parse_address, VariableStore};

use crate::inbox::InboxFile;
use crate::transport::UdpNotifier;

const REQUEST_SNAPSHOT_SCHEMA_VERSION: u32 = 1;
const RUN_STATE_RUNNING: &str = "running";
const RUN_STATE_STOPPED: &str = "stopped";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn request_snapshot_schema_version() -> u32 {
    REQUEST_SNAPSHOT_SCHEMA_VERSION
}

#[derive(Debug, Clone)]
/// Configuration for the variable-request runtime.
pub struct RequestConfig {
    pub request_path: PathBuf,
    pub poll_interval: Duration,
    pub state_path: Option<PathBuf>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            request_path: PathBuf::from(".vab/inbox/request-vars.txt"),
            poll_interval: Duration::from_millis(100),
            state_path: Some(PathBuf::from(".vab/sync/request-state.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Persisted status counters for the request runtime.
pub struct RequestSnapshot {
    #[serde(default = "request_snapshot_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub updated_unix_ms: u64,
    #[serde(default)]
    pub run_state: String,
    #[serde(default)]
    pub batches_drained: u64,
    #[serde(default)]
    pub queries_answered: u64,
    #[serde(default)]
    pub segments_rejected: u64,
    #[serde(default)]
    pub last_query: String,
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            schema_version: REQUEST_SNAPSHOT_SCHEMA_VERSION,
            updated_unix_ms: 0,
            run_state: RUN_STATE_RUNNING.to_string(),
            batches_drained: 0,
            queries_answered: 0,
            segments_rejected: 0,
            last_query: String::new(),
        }
    }
}

/// Reads a persisted snapshot; missing or unreadable files yield defaults.
pub fn load_request_snapshot(path: &Path) -> RequestSnapshot {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return RequestSnapshot::default();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

#[derive(Debug)]
/// Running request runtime; shut down with a bounded grace timeout.
pub struct RequestHandle {
    request_path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RequestHandle {
    pub fn request_path(&self) -> &Path {
        self.request_path.as_path()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Signals the loop to stop and waits for the in-flight cycle to finish,
    /// up to a fixed grace period.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(
                    requests = %self.request_path.display(),
                    "request runtime did not stop within the grace period"
                );
            }
        }
    }
}

/// Spawns the variable-request poll loop on the current tokio runtime.
///
/// Every well-formed `Name?` query is answered over the notifier with the
/// exact line `SetVar <Name> = <Value>`; an absent variable answers with an
/// empty value rather than staying silent, so the peer never hangs waiting.
pub fn start_request_runtime(
    config: RequestConfig,
    store: Arc<VariableStore>,
    notifier: Arc<UdpNotifier>,
) -> Result<RequestHandle> {
    if config.poll_interval.is_zero() {
        anyhow::bail!("request poll interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("request runtime requires an active tokio runtime")?;

    let inbox = InboxFile::new(config.request_path.clone());
    if let Err(error) = inbox.ensure_exists() {
        tracing::warn!(%error, "could not prepare request file");
    }

    tracing::info!(
        requests = %config.request_path.display(),
        poll_ms = config.poll_interval.as_millis() as u64,
        "request runtime starting"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let request_path = config.request_path.clone();
    let task = handle.spawn(async move {
        run_request_loop(config, inbox, store, notifier, shutdown_rx).await;
    });
    Ok(RequestHandle {
        request_path,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_request_loop(
    config: RequestConfig,
    inbox: InboxFile,
    store: Arc<VariableStore>,
    notifier: Arc<UdpNotifier>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut totals = RequestSnapshot::default();
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let batch = inbox.drain();
                if batch.is_empty() {
                    continue;
                }
                process_request_batch(&batch, &store, &notifier, &mut totals);
                persist_snapshot(config.state_path.as_deref(), &totals, RUN_STATE_RUNNING);
            }
            _ = &mut shutdown_rx => {
                persist_snapshot(config.state_path.as_deref(), &totals, RUN_STATE_STOPPED);
                tracing::info!(requests = %inbox.path().display(), "request runtime stopped");
                break;
            }
        }
    }
}

fn process_request_batch(
    batch: &str,
    store: &VariableStore,
    notifier: &UdpNotifier,
    totals: &mut RequestSnapshot,
) {
    totals.batches_drained = totals.batches_drained.saturating_add(1);

    // Queries arrive one per line or packed into one line with ';'.
    for line in batch.lines() {
        for segment in line.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let Some(token) = segment.strip_suffix('?') else {
                totals.segments_rejected = totals.segments_rejected.saturating_add(1);
                tracing::warn!(segment, "query without trailing '?', dropping");
                continue;
            };
            let token = token.trim();
            if token.is_empty() {
                totals.segments_rejected = totals.segments_rejected.saturating_add(1);
                tracing::warn!(segment, "query carries no variable name, dropping");
                continue;
            }

            let (override_name, variable) = parse_address(token);
            if variable.is_empty() {
                totals.segments_rejected = totals.segments_rejected.saturating_add(1);
                tracing::warn!(segment, "no variable name after address prefix, dropping");
                continue;
            }

            let process = store.resolve_process(override_name.as_deref());
            let value = store.get(&process, &variable, "");
            let response = format!("SetVar {variable} = {value}");
            tracing::debug!(process = %process, query = %variable, "answering variable request");
            notifier.send(&response);
            totals.queries_answered = totals.queries_answered.saturating_add(1);
            totals.last_query = variable;
        }
    }
}

fn persist_snapshot(state_path: Option<&Path>, totals: &RequestSnapshot, run_state: &str) {
    let Some(state_path) = state_path else {
        return;
    };
    let snapshot = RequestSnapshot {
        updated_unix_ms: current_unix_timestamp_ms(),
        run_state: run_state.to_string(),
        ..totals.clone()
    };
    let Ok(payload) = serde_json::to_string_pretty(&snapshot) else {
        return;
    };
    if let Err(error) = write_text_atomic(state_path, &payload) {
        tracing::warn!(path = %state_path.display(), %error, "failed to persist request snapshot");
    }
}
