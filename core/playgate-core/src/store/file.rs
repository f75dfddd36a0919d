//! File-backed store shared between the daemon and front-ends.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "values": {
//!     "unlocked_until": 1767225600000,
//!     "current_task": "finish chapter 3"
//!   }
//! }
//! ```
//!
//! # Writes
//!
//! A write takes an exclusive `flock` on `<file>.lock`, re-reads the file,
//! merges the update, and persists through temp file + rename. Two processes
//! writing different keys therefore never clobber each other.
//!
//! # Change Notification
//!
//! Writes made through this handle notify listeners immediately. Writes made
//! by other processes are picked up by [`FileStore::poll_changes`], which the
//! watcher thread calls on a fixed interval. Each handle diffs against the
//! last snapshot it reported, so a change is reported at least once.
//!
//! Polls and local writes on one handle are serialized, so a poll never
//! records a snapshot older than one a local write already reported. A poll
//! racing a write from another process can still see either side of it;
//! listeners re-read the store rather than trusting the reported values.
//!
//! # Defensive Reads
//!
//! Empty files, corrupt JSON and unknown versions read as an empty store
//! with a warning.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{diff_snapshots, merge_changes, select, ChangeListener, Listeners, StorageChanges};
use super::{Store, StoreValues};
use crate::error::{GateError, Result};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    values: StoreValues,
}

pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    write_guard: Mutex<()>,
    last_seen: Mutex<StoreValues>,
    listeners: Listeners,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        let initial = match read_values(&path) {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to read store; starting empty");
                StoreValues::new()
            }
        };
        Self {
            path,
            lock_path,
            write_guard: Mutex::new(()),
            last_seen: Mutex::new(initial),
            listeners: Listeners::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file and notifies listeners of anything that changed
    /// since the last report from this handle.
    pub fn poll_changes(&self) -> Result<StorageChanges> {
        let changes = {
            let _guard = self.lock_write_guard()?;
            let current = read_values(&self.path)?;
            self.record_snapshot(current)
        };
        if !changes.is_empty() {
            debug!(keys = ?changes.keys().collect::<Vec<_>>(), "Store changed on disk");
        }
        self.listeners.notify(&changes);
        Ok(changes)
    }

    /// Starts a thread that calls [`FileStore::poll_changes`] every
    /// `interval` until the returned handle is dropped.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> Result<WatchHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let store = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("playgate-store-watch".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = store.poll_changes() {
                            warn!(error = %err, "Store poll failed; retrying next interval");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| GateError::io("spawn store watcher", err))?;

        Ok(WatchHandle {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn lock_write_guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_guard.lock().map_err(|_| {
            GateError::io("store write guard", std::io::Error::other("mutex poisoned"))
        })
    }

    fn record_snapshot(&self, current: StoreValues) -> StorageChanges {
        match self.last_seen.lock() {
            Ok(mut seen) => {
                let changes = diff_snapshots(&seen, &current);
                *seen = current;
                changes
            }
            Err(_) => StorageChanges::new(),
        }
    }

    fn persist(&self, values: &StoreValues) -> Result<()> {
        let parent = parent_dir(&self.path)?;
        let store_file = StoreFile {
            version: STORE_VERSION,
            values: values.clone(),
        };
        let content = serde_json::to_vec_pretty(&store_file)
            .map_err(|err| GateError::json("serialize store", err))?;

        let mut temp_file = NamedTempFile::new_in(parent)
            .map_err(|err| GateError::io("create temp store file", err))?;
        temp_file
            .write_all(&content)
            .map_err(|err| GateError::io("write temp store file", err))?;
        temp_file
            .flush()
            .map_err(|err| GateError::io("flush temp store file", err))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| GateError::io("commit store file", err.error))?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get(&self, keys: &[&str]) -> Result<StoreValues> {
        let values = read_values(&self.path)?;
        Ok(select(&values, keys))
    }

    fn set(&self, updates: StoreValues) -> Result<()> {
        let changes = {
            let _guard = self.lock_write_guard()?;
            let _lock = FileLock::acquire(&self.lock_path)?;

            let mut current = read_values(&self.path)?;
            let written = merge_changes(&mut current, updates);
            if !written.is_empty() {
                self.persist(&current)?;
            }
            self.record_snapshot(current)
        };
        self.listeners.notify(&changes);
        Ok(())
    }

    fn on_change(&self, listener: ChangeListener) {
        self.listeners.add(listener);
    }
}

/// Stops the watcher thread when dropped.
pub struct WatchHandle {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Exclusive advisory lock held for the duration of one write.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        let lock_err = |source| GateError::StoreLock {
            path: path.to_path_buf(),
            source,
        };
        fs_err::create_dir_all(parent_dir(path)?).map_err(lock_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(lock_err)?;
        let fd = file.as_raw_fd();
        // SAFETY: flock is a standard POSIX call. fd is a valid file descriptor
        // owned by `file`, which stays open until drop. LOCK_EX blocks until
        // the exclusive lock is granted.
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(lock_err(std::io::Error::last_os_error()));
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // SAFETY: flock is a standard POSIX call. fd is still owned by
        // `self.file`. LOCK_UN releases the lock taken in `acquire`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent().ok_or_else(|| {
        GateError::io(
            format!("resolve parent of {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })
}

fn read_values(path: &Path) -> Result<StoreValues> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StoreValues::new()),
        Err(err) => return Err(GateError::io("read store file", err)),
    };

    if content.trim().is_empty() {
        return Ok(StoreValues::new());
    }

    match serde_json::from_str::<StoreFile>(&content) {
        Ok(file) if file.version == STORE_VERSION => Ok(file.values),
        Ok(file) => {
            warn!(
                version = file.version,
                expected = STORE_VERSION,
                "Unsupported store version; treating as empty"
            );
            Ok(StoreValues::new())
        }
        Err(err) => {
            warn!(error = %err, "Failed to parse store file; treating as empty");
            Ok(StoreValues::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{get_value, set_value};
    use serde_json::{json, Value};
    use std::time::Instant;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_empty() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path().join("store.json"));
        assert!(store.get(&["unlocked_until"]).unwrap().is_empty());
    }

    #[test]
    fn set_persists_versioned_document() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("store.json");
        let store = FileStore::open(&path);

        set_value(&store, "unlocked_until", json!(1_800_000)).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], json!(1));
        assert_eq!(raw["values"]["unlocked_until"], json!(1_800_000));
    }

    #[test]
    fn corrupt_file_reads_empty_and_is_overwritten() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStore::open(&path);
        assert!(store.get(&["current_task"]).unwrap().is_empty());

        set_value(&store, "current_task", json!("read paper")).unwrap();
        assert_eq!(
            get_value(&store, "current_task").unwrap(),
            Some(json!("read paper"))
        );
    }

    #[test]
    fn wrong_version_reads_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        std::fs::write(&path, r#"{"version": 9, "values": {"current_task": "x"}}"#).unwrap();

        let store = FileStore::open(&path);
        assert!(store.get(&["current_task"]).unwrap().is_empty());
    }

    #[test]
    fn writers_on_separate_handles_keep_each_others_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        let daemon = FileStore::open(&path);
        let front_end = FileStore::open(&path);

        set_value(&daemon, "unlocked_until", json!(42)).unwrap();
        set_value(&front_end, "current_task", json!("taxes")).unwrap();

        let values = daemon.get(&["unlocked_until", "current_task"]).unwrap();
        assert_eq!(values["unlocked_until"], json!(42));
        assert_eq!(values["current_task"], json!("taxes"));
    }

    #[test]
    fn poll_reports_external_writes_once() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        let observer = FileStore::open(&path);
        let writer = FileStore::open(&path);

        let seen: Arc<Mutex<Vec<StorageChanges>>> = Arc::default();
        let sink = Arc::clone(&seen);
        observer.on_change(Arc::new(move |changes| {
            sink.lock().unwrap().push(changes.clone());
        }));

        set_value(&writer, "unlocked_until", json!(99)).unwrap();
        let first = observer.poll_changes().unwrap();
        let second = observer.poll_changes().unwrap();

        assert_eq!(first["unlocked_until"].new_value, Some(json!(99)));
        assert!(second.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn watcher_delivers_external_writes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store.json");
        let observer = Arc::new(FileStore::open(&path));
        let writer = FileStore::open(&path);

        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        observer.on_change(Arc::new(move |changes| {
            if let Some(change) = changes.get("current_task") {
                *sink.lock().unwrap() = change.new_value.clone();
            }
        }));
        let watch = observer.spawn_watcher(Duration::from_millis(10)).unwrap();

        set_value(&writer, "current_task", json!("laundry")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        watch.shutdown();
        assert_eq!(*seen.lock().unwrap(), Some(json!("laundry")));
    }

    #[test]
    fn poll_never_reports_a_local_write_going_backwards() {
        let temp = tempdir().unwrap();
        let store = Arc::new(FileStore::open(temp.path().join("store.json")));

        let seen: Arc<Mutex<Vec<i64>>> = Arc::default();
        let sink = Arc::clone(&seen);
        store.on_change(Arc::new(move |changes| {
            if let Some(n) = changes
                .get("n")
                .and_then(|change| change.new_value.as_ref())
                .and_then(Value::as_i64)
            {
                sink.lock().unwrap().push(n);
            }
        }));

        let writer = Arc::clone(&store);
        let writes = thread::spawn(move || {
            for n in 1..=100 {
                set_value(writer.as_ref(), "n", json!(n)).unwrap();
            }
        });
        while !writes.is_finished() {
            store.poll_changes().unwrap();
        }
        writes.join().unwrap();

        assert!(store.poll_changes().unwrap().is_empty());
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (1..=100).collect::<Vec<i64>>());
    }
}
