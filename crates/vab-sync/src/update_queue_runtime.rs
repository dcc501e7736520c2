use std::collections::HashMap;
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
use crate::pairs::split_pairs;

const UPDATE_QUEUE_SNAPSHOT_SCHEMA_VERSION: u32 = 1;
const RUN_STATE_RUNNING: &str = "running";
const RUN_STATE_STOPPED: &str = "stopped";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn update_queue_snapshot_schema_version() -> u32 {
    UPDATE_QUEUE_SNAPSHOT_SCHEMA_VERSION
}

/// Subscriber notified after a process store file changed on disk. Runs on
/// the runtime task; a UI subscriber marshals onto its own thread itself.
pub type StoreUpdatedCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
/// Configuration for the update-queue runtime.
pub struct UpdateQueueConfig {
    pub queue_path: PathBuf,
    pub poll_interval: Duration,
    /// Consumed lines are deleted when set; retained for audit otherwise.
    pub drain_mode: bool,
    pub state_path: Option<PathBuf>,
}

impl Default for UpdateQueueConfig {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from(".vab/inbox/update-vars.txt"),
            poll_interval: Duration::from_millis(200),
            drain_mode: true,
            state_path: Some(PathBuf::from(".vab/sync/update-queue-state.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Persisted status counters for the update-queue runtime.
pub struct UpdateQueueSnapshot {
    #[serde(default = "update_queue_snapshot_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub updated_unix_ms: u64,
    #[serde(default)]
    pub run_state: String,
    #[serde(default)]
    pub batches_drained: u64,
    #[serde(default)]
    pub lines_seen: u64,
    #[serde(default)]
    pub pairs_applied: u64,
    #[serde(default)]
    pub segments_dropped: u64,
    #[serde(default)]
    pub callback_dispatches: u64,
    #[serde(default)]
    pub last_process: String,
}

impl Default for UpdateQueueSnapshot {
    fn default() -> Self {
        Self {
            schema_version: UPDATE_QUEUE_SNAPSHOT_SCHEMA_VERSION,
            updated_unix_ms: 0,
            run_state: RUN_STATE_RUNNING.to_string(),
            batches_drained: 0,
            lines_seen: 0,
            pairs_applied: 0,
            segments_dropped: 0,
            callback_dispatches: 0,
            last_process: String::new(),
        }
    }
}

/// Reads a persisted snapshot; missing or unreadable files yield defaults.
pub fn load_update_queue_snapshot(path: &Path) -> UpdateQueueSnapshot {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return UpdateQueueSnapshot::default();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

#[derive(Debug)]
/// Running update-queue runtime; shut down with a bounded grace timeout.
pub struct UpdateQueueHandle {
    queue_path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl UpdateQueueHandle {
    pub fn queue_path(&self) -> &Path {
        self.queue_path.as_path()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Signals the loop to stop and waits for the in-flight cycle to finish,
    /// up to a fixed grace period. The task is never aborted mid-write.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(
                    queue = %self.queue_path.display(),
                    "update-queue runtime did not stop within the grace period"
                );
            }
        }
    }
}

/// Spawns the update-queue poll loop on the current tokio runtime.
pub fn start_update_queue_runtime(
    config: UpdateQueueConfig,
    store: Arc<VariableStore>,
    on_store_updated: Option<StoreUpdatedCallback>,
) -> Result<UpdateQueueHandle> {
    if config.poll_interval.is_zero() {
        anyhow::bail!("update-queue poll interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("update-queue runtime requires an active tokio runtime")?;

    let inbox = InboxFile::new(config.queue_path.clone());
    if let Err(error) = inbox.ensure_exists() {
        tracing::warn!(%error, "could not prepare update queue file");
    }

    tracing::info!(
        queue = %config.queue_path.display(),
        poll_ms = config.poll_interval.as_millis() as u64,
        drain = config.drain_mode,
        "update-queue runtime starting"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let queue_path = config.queue_path.clone();
    let task = handle.spawn(async move {
        run_update_queue_loop(config, inbox, store, on_store_updated, shutdown_rx).await;
    });
    Ok(UpdateQueueHandle {
        queue_path,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_update_queue_loop(
    config: UpdateQueueConfig,
    inbox: InboxFile,
    store: Arc<VariableStore>,
    on_store_updated: Option<StoreUpdatedCallback>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut totals = UpdateQueueSnapshot::default();
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let batch = if config.drain_mode { inbox.drain() } else { inbox.peek() };
                if batch.is_empty() {
                    continue;
                }
                process_update_batch(&batch, &store, &on_store_updated, &mut totals);
                persist_snapshot(config.state_path.as_deref(), &totals, RUN_STATE_RUNNING);
            }
            _ = &mut shutdown_rx => {
                persist_snapshot(config.state_path.as_deref(), &totals, RUN_STATE_STOPPED);
                tracing::info!(queue = %inbox.path().display(), "update-queue runtime stopped");
                break;
            }
        }
    }
}

fn process_update_batch(
    batch: &str,
    store: &VariableStore,
    on_store_updated: &Option<StoreUpdatedCallback>,
    totals: &mut UpdateQueueSnapshot,
) {
    totals.batches_drained = totals.batches_drained.saturating_add(1);

    // Decode each line into a target process and its recovered pairs, then
    // group per process so one changed file means one write and one callback.
    let mut grouped: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for raw_line in batch.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        totals.lines_seen = totals.lines_seen.saturating_add(1);

        let (override_name, payload) = if line.starts_with('@') {
            parse_address(line)
        } else {
            (None, line.to_string())
        };
        let pairs = split_pairs(&payload);
        if pairs.is_empty() {
            totals.segments_dropped = totals.segments_dropped.saturating_add(1);
            tracing::warn!(line, "no valid key=value pair in update line, dropping");
            continue;
        }

        let process = store.resolve_process(override_name.as_deref());
        match grouped.iter_mut().find(|(existing, _)| *existing == process) {
            Some((_, existing_pairs)) => existing_pairs.extend(pairs),
            None => grouped.push((process, pairs)),
        }
    }

    for (process, pairs) in grouped {
        let path = store.store_file_path(&process);
        match apply_pairs_linewise(&path, &pairs) {
            Ok(true) => {
                totals.pairs_applied = totals.pairs_applied.saturating_add(pairs.len() as u64);
                totals.last_process = process.clone();
                store.invalidate_cache(Some(&process));
                dispatch_store_updated(on_store_updated, &process);
                totals.callback_dispatches = totals.callback_dispatches.saturating_add(1);
            }
            Ok(false) => {
                totals.pairs_applied = totals.pairs_applied.saturating_add(pairs.len() as u64);
                tracing::debug!(process = %process, "update batch matched existing values, nothing written");
            }
            Err(error) => {
                tracing::error!(process = %process, %error, "failed to apply update batch");
            }
        }
    }
}

/// Applies pairs to a store file by rewriting individual lines.
///
/// Existing names match case-insensitively; the line keeps its original
/// casing and only the value is replaced, and only when the rendered line
/// actually differs. New names append. Returns whether anything changed; an
/// unchanged file is not rewritten, so its mtime survives no-op batches.
fn apply_pairs_linewise(path: &Path, pairs: &[(String, String)]) -> Result<bool> {
    let mut lines: Vec<String> = match std::fs::read_to_string(path) {
        Ok(raw) => raw.lines().map(str::to_string).collect(),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    // Case-insensitive index of existing names; first occurrence wins.
    let mut index: HashMap<String, usize> = HashMap::new();
    for (line_index, line) in lines.iter().enumerate() {
        let Some((name, _)) = line.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        index.entry(name.to_lowercase()).or_insert(line_index);
    }

    let mut changed = false;
    for (name, value) in pairs {
        let lowered = name.to_lowercase();
        match index.get(&lowered) {
            Some(&line_index) => {
                let original_name = lines[line_index]
                    .split_once('=')
                    .map(|(existing, _)| existing.trim().to_string())
                    .unwrap_or_else(|| name.clone());
                let new_line = format!("{original_name}={value}");
                if lines[line_index] != new_line {
                    tracing::debug!(old = %lines[line_index], new = %new_line, "rewriting store line");
                    lines[line_index] = new_line;
                    changed = true;
                }
            }
            None => {
                lines.push(format!("{name}={value}"));
                index.insert(lowered, lines.len() - 1);
                changed = true;
            }
        }
    }

    if !changed {
        return Ok(false);
    }

    let mut content = String::new();
    for line in &lines {
        content.push_str(line);
        content.push('\n');
    }
    write_text_atomic(path, &content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

/// Single dispatch point for the store-updated callback: a panicking
/// subscriber is logged and never unwinds into the poll loop.
fn dispatch_store_updated(callback: &Option<StoreUpdatedCallback>, process: &str) {
    let Some(callback) = callback else {
        return;
    };
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(process)));
    if outcome.is_err() {
        tracing::warn!(process, "store-updated callback panicked");
    }
}

fn persist_snapshot(state_path: Option<&Path>, totals: &UpdateQueueSnapshot, run_state: &str) {
    let Some(state_path) = state_path else {
        return;
    };
    let snapshot = UpdateQueueSnapshot {
        updated_unix_ms: current_unix_timestamp_ms(),
        run_state: run_state.to_string(),
        ..totals.clone()
    };
    let Ok(payload) = serde_json::to_string_pretty(&snapshot) else {
        return;
    };
    if let Err(error) = write_text_atomic(state_path, &payload) {
        tracing::warn!(path = %state_path.display(), %error, "failed to persist update-queue snapshot");
    }
}
