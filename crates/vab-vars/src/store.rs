use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use vab_core::write_text_atomic;

/// Process whose store receives unaddressed updates and queries when no
/// process has been activated.
pub const DEFAULT_PROCESS: &str = "EliteDangerous64";

#[derive(Debug, Default)]
struct StoreState {
    /// Safe process name -> ordered variable table. Insertion order mirrors
    /// the line order of the store file.
    cache: HashMap<String, Vec<(String, String)>>,
    active_process: Option<String>,
}

/// File-backed variable table per process, with an explicit-invalidation
/// cache and the active-process pointer both loops resolve against.
///
/// One mutex guards the whole state; shared as `Arc<VariableStore>` between
/// the two sync runtimes and any UI-side caller.
#[derive(Debug)]
pub struct VariableStore {
    base_dir: PathBuf,
    state: Mutex<StoreState>,
}

impl VariableStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.base_dir.as_path()
    }

    /// Strips every character that is not alphanumeric, `_`, `-`, `.`, or a
    /// space; an empty result falls back to the default process name.
    pub fn sanitize_process_name(raw: Option<&str>) -> String {
        let name = raw.map(str::trim).filter(|value| !value.is_empty());
        let name = name.unwrap_or(DEFAULT_PROCESS);
        let safe: String = name
            .chars()
            .filter(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.' | ' '))
            .collect();
        if safe.trim().is_empty() {
            DEFAULT_PROCESS.to_string()
        } else {
            safe
        }
    }

    /// Path of the store file for `process`: `<base>/<Safe>/<Safe>.txt`.
    pub fn store_file_path(&self, process: &str) -> PathBuf {
        let safe = Self::sanitize_process_name(Some(process));
        self.base_dir.join(&safe).join(format!("{safe}.txt"))
    }

    pub fn set_active_process(&self, process: Option<&str>) {
        let normalized = process
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let mut state = self.locked_state();
        tracing::info!(
            active = normalized.as_deref().unwrap_or(DEFAULT_PROCESS),
            "active process changed"
        );
        state.active_process = normalized;
    }

    pub fn active_process(&self) -> Option<String> {
        let state = self.locked_state();
        state.active_process.clone()
    }

    /// Target process for one update or query: explicit override, else the
    /// active process, else the default. Always sanitized.
    pub fn resolve_process(&self, override_name: Option<&str>) -> String {
        if let Some(name) = override_name.map(str::trim).filter(|value| !value.is_empty()) {
            return Self::sanitize_process_name(Some(name));
        }
        Self::sanitize_process_name(self.active_process().as_deref())
    }

    /// Ordered snapshot of the variables for `process`. Reads the store file
    /// on a cache miss or when `force_reload` is set.
    pub fn list(&self, process: &str, force_reload: bool) -> Vec<(String, String)> {
        let safe = Self::sanitize_process_name(Some(process));
        let mut state = self.locked_state();
        self.load_locked(&mut state, &safe, force_reload);
        state.cache.get(&safe).cloned().unwrap_or_default()
    }

    /// Value of `name` for `process`, or `default` when absent.
    pub fn get(&self, process: &str, name: &str, default: &str) -> String {
        let safe = Self::sanitize_process_name(Some(process));
        let mut state = self.locked_state();
        self.load_locked(&mut state, &safe, false);
        state
            .cache
            .get(&safe)
            .and_then(|table| {
                table
                    .iter()
                    .find(|(existing, _)| existing == name)
                    .map(|(_, value)| value.clone())
            })
            .unwrap_or_else(|| default.to_string())
    }

    /// Inserts or overwrites `name` in place, then persists the whole table
    /// atomically. The cache is only updated after the write succeeded; an
    /// empty name is a no-op.
    pub fn set(&self, process: &str, name: &str, value: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        let safe = Self::sanitize_process_name(Some(process));
        let mut state = self.locked_state();
        self.load_locked(&mut state, &safe, false);

        let mut table = state.cache.get(&safe).cloned().unwrap_or_default();
        upsert(&mut table, name, value);
        self.persist_locked(&safe, &table)?;
        state.cache.insert(safe, table);
        Ok(())
    }

    /// Removes `name` and persists. No-op when the variable is absent.
    pub fn delete(&self, process: &str, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        let safe = Self::sanitize_process_name(Some(process));
        let mut state = self.locked_state();
        self.load_locked(&mut state, &safe, false);

        let mut table = state.cache.get(&safe).cloned().unwrap_or_default();
        let before = table.len();
        table.retain(|(existing, _)| existing != name);
        if table.len() == before {
            return Ok(());
        }
        self.persist_locked(&safe, &table)?;
        state.cache.insert(safe, table);
        Ok(())
    }

    /// Moves the value of `old` under `new`. No-op when the names match,
    /// either is empty, or `old` is absent. The renamed variable is
    /// re-appended, so its position is not preserved.
    pub fn rename(&self, process: &str, old: &str, new: &str) -> Result<()> {
        if old.is_empty() || new.is_empty() || old == new {
            return Ok(());
        }
        let safe = Self::sanitize_process_name(Some(process));
        let mut state = self.locked_state();
        self.load_locked(&mut state, &safe, false);

        let mut table = state.cache.get(&safe).cloned().unwrap_or_default();
        let Some(position) = table.iter().position(|(existing, _)| existing == old) else {
            return Ok(());
        };
        let (_, value) = table.remove(position);
        upsert(&mut table, new, &value);
        self.persist_locked(&safe, &table)?;
        state.cache.insert(safe, table);
        Ok(())
    }

    /// Drops the cached table for `process`, or every cached table when
    /// `None`. The next access re-reads the store file. Used after the
    /// update-queue runtime rewrites a store file directly.
    pub fn invalidate_cache(&self, process: Option<&str>) {
        let mut state = self.locked_state();
        match process {
            None => {
                state.cache.clear();
                tracing::debug!("variable cache cleared for all processes");
            }
            Some(name) => {
                let safe = Self::sanitize_process_name(Some(name));
                if state.cache.remove(&safe).is_some() {
                    tracing::debug!(process = %safe, "variable cache invalidated");
                }
            }
        }
    }

    fn locked_state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // Mutations are staged on a clone and installed only after a
        // successful persist, so a poisoned guard still holds consistent
        // state.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_locked(&self, state: &mut StoreState, safe: &str, force_reload: bool) {
        if force_reload {
            state.cache.remove(safe);
        }
        if state.cache.contains_key(safe) {
            return;
        }

        let path = self.store_file_path(safe);
        let mut table: Vec<(String, String)> = Vec::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                for line in raw.lines() {
                    if line.is_empty() {
                        continue;
                    }
                    let Some((name, value)) = line.split_once('=') else {
                        continue;
                    };
                    upsert(&mut table, name, value);
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "store file does not exist yet");
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read store file, treating as empty");
            }
        }
        tracing::debug!(process = %safe, variables = table.len(), "loaded variable table");
        state.cache.insert(safe.to_string(), table);
    }

    fn persist_locked(&self, safe: &str, table: &[(String, String)]) -> Result<()> {
        let path = self.store_file_path(safe);
        let mut content = String::new();
        for (name, value) in table {
            content.push_str(name);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }
        write_text_atomic(&path, &content)
            .with_context(|| format!("failed to persist variables for process '{safe}'"))
    }
}

/// Updates the value in place when the name is present, appends otherwise.
fn upsert(table: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some((_, existing)) = table.iter_mut().find(|(existing, _)| existing == name) {
        *existing = value.to_string();
    } else {
        table.push((name.to_string(), value.to_string()));
    }
}
