use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

/// A peer-appended inbox file consumed by one poll loop.
///
/// The peer appends whole lines; the owning loop takes everything with
/// [`InboxFile::drain`], which reads the full content and truncates the file
/// back to empty as one critical section. A line appended by the peer lands
/// either entirely before the read or entirely after the clear, so nothing is
/// lost or consumed twice.
#[derive(Debug)]
pub struct InboxFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InboxFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Creates the parent directory and an empty inbox file if missing, so
    /// the peer has something to append to from the start.
    pub fn ensure_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to create inbox file {}", self.path.display()))?;
        Ok(())
    }

    /// Reads the whole inbox and truncates it to empty in one step. An empty
    /// inbox is left untouched (no mtime churn). I/O errors degrade to an
    /// empty result and are retried on the next poll; if the truncate itself
    /// fails the content is left on disk and reported as empty so it is
    /// re-drained later rather than applied twice here and again next cycle.
    pub fn drain(&self) -> String {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return String::new(),
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to read inbox");
                return String::new();
            }
        };
        if content.is_empty() {
            return content;
        }
        if let Err(error) = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            tracing::warn!(path = %self.path.display(), %error, "failed to clear inbox, retrying next poll");
            return String::new();
        }
        tracing::debug!(path = %self.path.display(), bytes = content.len(), "inbox drained");
        content
    }

    /// Retain-mode read: returns the content without clearing the file.
    pub fn peek(&self) -> String {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to read inbox");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::InboxFile;

    #[test]
    fn unit_drain_returns_content_and_leaves_the_file_empty() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("update-vars.txt");
        std::fs::write(&path, "X=1\nY=2\n").expect("seed");

        let inbox = InboxFile::new(&path);
        assert_eq!(inbox.drain(), "X=1\nY=2\n");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn unit_drain_of_missing_file_is_empty() {
        let temp = tempdir().expect("tempdir");
        let inbox = InboxFile::new(temp.path().join("missing.txt"));
        assert_eq!(inbox.drain(), "");
    }

    #[test]
    fn unit_drain_twice_never_returns_the_same_line_twice() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("update-vars.txt");
        std::fs::write(&path, "X=1\n").expect("seed");

        let inbox = InboxFile::new(&path);
        assert_eq!(inbox.drain(), "X=1\n");
        assert_eq!(inbox.drain(), "");
    }

    #[test]
    fn unit_peek_leaves_content_in_place() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("update-vars.txt");
        std::fs::write(&path, "X=1\n").expect("seed");

        let inbox = InboxFile::new(&path);
        assert_eq!(inbox.peek(), "X=1\n");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "X=1\n");
    }

    #[test]
    fn unit_ensure_exists_creates_parent_and_empty_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("inbox/update-vars.txt");
        let inbox = InboxFile::new(&path);
        inbox.ensure_exists().expect("ensure");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "");

        // Idempotent, and must not truncate pending content.
        std::fs::write(&path, "X=1\n").expect("append");
        inbox.ensure_exists().expect("ensure again");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "X=1\n");
    }
}
