//! Durable tracking of in-flight operations
//!
//! [`OperationStore`] keeps download and update records as JSON arrays in a
//! [`KeyValueStore`], so a restarted process can see what was running when
//! it stopped. Every mutation reads the whole array, changes it, and writes
//! it back under a per-key mutex.

use chrono::Utc;
use fs4::fs_std::FileExt;
use otaflow_core::types::InstallType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Key of the download record array
pub const KEY_ACTIVE_DOWNLOADS: &str = "active_downloads";

/// Key of the update record array
pub const KEY_ACTIVE_UPDATES: &str = "active_updates";

/// Key of the overall progress snapshot
pub const KEY_UPDATE_PROGRESS: &str = "update_progress";

/// Key of the config most recently handed to preparation
pub const KEY_LAST_UPDATE_CONFIG: &str = "last_update_config";

const ALL_KEYS: [&str; 4] = [
    KEY_ACTIVE_DOWNLOADS,
    KEY_ACTIVE_UPDATES,
    KEY_UPDATE_PROGRESS,
    KEY_LAST_UPDATE_CONFIG,
];

/// Callback for [`KeyValueStore::update`]: current value in, new value out
pub type UpdateFn<'a> = dyn FnMut(Option<String>) -> Result<Option<String>, StoreError> + 'a;

/// Durable string key-value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Replace the value of `key` with what `f` returns (`None` removes it).
    ///
    /// Backends shared between processes override this to make the
    /// read-modify-write atomic.
    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        match f(self.get(key)?)? {
            Some(value) => self.put(key, &value),
            None => self.remove(key),
        }
    }
}

/// In-memory store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        let mut entries = self.entries();
        match f(entries.get(key).cloned())? {
            Some(value) => entries.insert(key.to_string(), value),
            None => entries.remove(key),
        };
        Ok(())
    }
}

/// Store backed by a single JSON object file
///
/// Each access holds an exclusive lock on a sibling `.lock` file, so several
/// processes can share the same state file. Writes go to a temporary file in
/// the same directory which is then renamed over the original.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn locked<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        // Released when `lock` is dropped
        lock.lock_exclusive()?;

        let mut entries = self.read_entries()?;
        let (value, dirty) = f(&mut entries)?;
        if dirty {
            self.write_entries(&entries)?;
        }
        Ok(value)
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    "State file {} is corrupted, starting empty: {}",
                    self.path.display(),
                    e
                );
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, entries)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.locked(|entries| Ok((entries.get(key).cloned(), false)))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.locked(|entries| {
            entries.insert(key.to_string(), value.to_string());
            Ok(((), true))
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.locked(|entries| Ok(((), entries.remove(key).is_some())))
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        self.locked(|entries| {
            let current = entries.get(key).cloned();
            let next = f(current.clone())?;
            let dirty = next != current;
            match next {
                Some(value) => entries.insert(key.to_string(), value),
                None => entries.remove(key),
            };
            Ok(((), dirty))
        })
    }
}

/// Status vocabulary shared by download and update records
pub trait OperationStatus: Copy + PartialEq + fmt::Display {
    /// Position in the forward-only lifecycle
    fn rank(self) -> u8;

    fn is_terminal(self) -> bool;

    fn is_completed(self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    Error,
}

impl OperationStatus for DownloadStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Downloading => 0,
            Self::Completed | Self::Error => 1,
        }
    }

    fn is_terminal(self) -> bool {
        self.rank() == 1
    }

    fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Preparing,
    Applying,
    Completed,
    Error,
}

impl OperationStatus for UpdateStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Preparing => 0,
            Self::Applying => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preparing => "preparing",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::Error => "error",
        })
    }
}

/// A config download in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDownload {
    pub download_id: String,

    #[serde(default)]
    pub config_url: String,

    /// Epoch milliseconds
    #[serde(default)]
    pub start_time: i64,

    #[serde(default)]
    pub progress: u8,

    pub status: DownloadStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActiveDownload {
    pub fn new(download_id: impl Into<String>, config_url: impl Into<String>) -> Self {
        Self {
            download_id: download_id.into(),
            config_url: config_url.into(),
            start_time: now_millis(),
            progress: 0,
            status: DownloadStatus::Downloading,
            error_message: None,
        }
    }
}

/// A payload preparation or application in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUpdate {
    pub update_id: String,

    #[serde(default)]
    pub config_name: String,

    /// Epoch milliseconds
    #[serde(default)]
    pub start_time: i64,

    #[serde(default)]
    pub progress: u8,

    pub status: UpdateStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActiveUpdate {
    pub fn new(update_id: impl Into<String>, config_name: impl Into<String>) -> Self {
        Self {
            update_id: update_id.into(),
            config_name: config_name.into(),
            start_time: now_millis(),
            progress: 0,
            status: UpdateStatus::Preparing,
            error_message: None,
        }
    }
}

trait OperationRecord: Clone + Serialize + DeserializeOwned {
    type Status: OperationStatus;

    fn id(&self) -> &str;
    fn status(&self) -> Self::Status;
    fn start_time(&self) -> i64;
    fn progress_mut(&mut self) -> &mut u8;
    fn set_status(&mut self, status: Self::Status, error: Option<String>);
}

impl OperationRecord for ActiveDownload {
    type Status = DownloadStatus;

    fn id(&self) -> &str {
        &self.download_id
    }
    fn status(&self) -> DownloadStatus {
        self.status
    }
    fn start_time(&self) -> i64 {
        self.start_time
    }
    fn progress_mut(&mut self) -> &mut u8 {
        &mut self.progress
    }
    fn set_status(&mut self, status: DownloadStatus, error: Option<String>) {
        self.status = status;
        self.error_message = error;
    }
}

impl OperationRecord for ActiveUpdate {
    type Status = UpdateStatus;

    fn id(&self) -> &str {
        &self.update_id
    }
    fn status(&self) -> UpdateStatus {
        self.status
    }
    fn start_time(&self) -> i64 {
        self.start_time
    }
    fn progress_mut(&mut self) -> &mut u8 {
        &mut self.progress
    }
    fn set_status(&mut self, status: UpdateStatus, error: Option<String>) {
        self.status = status;
        self.error_message = error;
    }
}

/// Overall progress snapshot for observers that attach late
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgress {
    pub current_operation: String,
    pub overall_progress: u8,
    pub current_step: String,
    /// Epoch milliseconds
    pub last_update_time: i64,
}

impl UpdateProgress {
    pub fn new(
        current_operation: impl Into<String>,
        overall_progress: u8,
        current_step: impl Into<String>,
    ) -> Self {
        Self {
            current_operation: current_operation.into(),
            overall_progress: overall_progress.min(100),
            current_step: current_step.into(),
            last_update_time: now_millis(),
        }
    }
}

/// The config most recently handed to preparation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdateConfig {
    pub name: String,
    pub url: String,
    pub install_type: InstallType,
}

/// Durable registry of download and update records
pub struct OperationStore {
    backend: Arc<dyn KeyValueStore>,
    downloads_lock: Mutex<()>,
    updates_lock: Mutex<()>,
    last_id_ms: AtomicI64,
}

impl OperationStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            downloads_lock: Mutex::new(()),
            updates_lock: Mutex::new(()),
            last_id_ms: AtomicI64::new(0),
        }
    }

    /// Store kept in memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Store persisted to the JSON file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileStore::new(path)))
    }

    /// `download_<millis>`, strictly increasing
    pub fn generate_download_id(&self) -> String {
        format!("download_{}", self.next_id_millis())
    }

    /// `update_<millis>`, strictly increasing
    pub fn generate_update_id(&self) -> String {
        format!("update_{}", self.next_id_millis())
    }

    fn next_id_millis(&self) -> i64 {
        let now = now_millis();
        let previous = self
            .last_id_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    // Downloads

    pub fn add_download(&self, record: ActiveDownload) -> Result<(), StoreError> {
        debug!("Tracking download {}", record.download_id);
        self.add(KEY_ACTIVE_DOWNLOADS, &self.downloads_lock, record)
    }

    /// Raise a download's progress. Unknown ids and finished records are
    /// ignored; progress never decreases.
    pub fn update_download_progress(&self, id: &str, progress: u8) -> Result<(), StoreError> {
        self.set_progress::<ActiveDownload>(KEY_ACTIVE_DOWNLOADS, &self.downloads_lock, id, progress)
    }

    pub fn update_download_status(
        &self,
        id: &str,
        status: DownloadStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.set_status::<ActiveDownload>(
            KEY_ACTIVE_DOWNLOADS,
            &self.downloads_lock,
            id,
            status,
            error,
        )
    }

    pub fn list_downloads(&self) -> Result<Vec<ActiveDownload>, StoreError> {
        let _guard = lock(&self.downloads_lock);
        self.load(KEY_ACTIVE_DOWNLOADS)
    }

    pub fn remove_download(&self, id: &str) -> Result<bool, StoreError> {
        self.remove_where::<ActiveDownload>(KEY_ACTIVE_DOWNLOADS, &self.downloads_lock, |r| {
            r.download_id == id
        })
        .map(|removed| removed > 0)
    }

    pub fn remove_all_downloads(&self) -> Result<(), StoreError> {
        let _guard = lock(&self.downloads_lock);
        self.backend.remove(KEY_ACTIVE_DOWNLOADS)
    }

    // Updates

    pub fn add_update(&self, record: ActiveUpdate) -> Result<(), StoreError> {
        debug!("Tracking update {}", record.update_id);
        self.add(KEY_ACTIVE_UPDATES, &self.updates_lock, record)
    }

    /// Raise an update's progress. Unknown ids and finished records are
    /// ignored; progress never decreases.
    pub fn update_update_progress(&self, id: &str, progress: u8) -> Result<(), StoreError> {
        self.set_progress::<ActiveUpdate>(KEY_ACTIVE_UPDATES, &self.updates_lock, id, progress)
    }

    pub fn update_update_status(
        &self,
        id: &str,
        status: UpdateStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.set_status::<ActiveUpdate>(KEY_ACTIVE_UPDATES, &self.updates_lock, id, status, error)
    }

    pub fn list_updates(&self) -> Result<Vec<ActiveUpdate>, StoreError> {
        let _guard = lock(&self.updates_lock);
        self.load(KEY_ACTIVE_UPDATES)
    }

    pub fn remove_update(&self, id: &str) -> Result<bool, StoreError> {
        self.remove_where::<ActiveUpdate>(KEY_ACTIVE_UPDATES, &self.updates_lock, |r| {
            r.update_id == id
        })
        .map(|removed| removed > 0)
    }

    pub fn remove_all_updates(&self) -> Result<(), StoreError> {
        let _guard = lock(&self.updates_lock);
        self.backend.remove(KEY_ACTIVE_UPDATES)
    }

    // Housekeeping

    /// Whether any download is downloading or any update is preparing or
    /// applying
    pub fn has_active_operations(&self) -> Result<bool, StoreError> {
        let downloading = self
            .list_downloads()?
            .iter()
            .any(|d| d.status == DownloadStatus::Downloading);
        let updating = self
            .list_updates()?
            .iter()
            .any(|u| matches!(u.status, UpdateStatus::Preparing | UpdateStatus::Applying));
        Ok(downloading || updating)
    }

    /// Remove completed and failed records started more than `max_age` ago.
    /// Returns how many records were removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = now_millis() - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let stale = |status_terminal: bool, start: i64| status_terminal && start < cutoff;

        let downloads =
            self.remove_where::<ActiveDownload>(KEY_ACTIVE_DOWNLOADS, &self.downloads_lock, |r| {
                stale(r.status.is_terminal(), r.start_time)
            })?;
        let updates =
            self.remove_where::<ActiveUpdate>(KEY_ACTIVE_UPDATES, &self.updates_lock, |r| {
                stale(r.status.is_terminal(), r.start_time)
            })?;

        let removed = downloads + updates;
        if removed > 0 {
            info!("Removed {} stale operation record(s)", removed);
        }
        Ok(removed)
    }

    /// Forget every record and snapshot
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let _downloads = lock(&self.downloads_lock);
        let _updates = lock(&self.updates_lock);
        for key in ALL_KEYS {
            self.backend.remove(key)?;
        }
        info!("Cleared all operation state");
        Ok(())
    }

    pub fn set_update_progress(&self, progress: &UpdateProgress) -> Result<(), StoreError> {
        self.backend
            .put(KEY_UPDATE_PROGRESS, &serde_json::to_string(progress)?)
    }

    pub fn update_progress(&self) -> Result<Option<UpdateProgress>, StoreError> {
        self.load_value(KEY_UPDATE_PROGRESS)
    }

    pub fn set_last_update_config(&self, config: &LastUpdateConfig) -> Result<(), StoreError> {
        self.backend
            .put(KEY_LAST_UPDATE_CONFIG, &serde_json::to_string(config)?)
    }

    pub fn last_update_config(&self) -> Result<Option<LastUpdateConfig>, StoreError> {
        self.load_value(KEY_LAST_UPDATE_CONFIG)
    }

    // Generic record plumbing

    fn load<R: OperationRecord>(&self, key: &str) -> Result<Vec<R>, StoreError> {
        Ok(parse_records(key, self.backend.get(key)?.as_deref()))
    }

    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Stored {} is corrupted, ignoring: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Read-modify-write the record array under `key`. `f` returns its
    /// result and whether it changed the records.
    fn mutate<R, T>(
        &self,
        key: &str,
        mutex: &Mutex<()>,
        f: impl FnOnce(&mut Vec<R>) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError>
    where
        R: OperationRecord,
    {
        let _guard = lock(mutex);
        let mut f = Some(f);
        let mut output = None;

        self.backend.update(key, &mut |raw: Option<String>| {
            let f = f
                .take()
                .ok_or_else(|| StoreError::backend("update callback invoked twice"))?;
            let mut records: Vec<R> = parse_records(key, raw.as_deref());
            let (value, dirty) = f(&mut records)?;
            output = Some(value);
            if dirty {
                Ok(Some(serde_json::to_string(&records)?))
            } else {
                Ok(raw)
            }
        })?;

        output.ok_or_else(|| StoreError::backend("update callback not invoked"))
    }

    fn add<R: OperationRecord>(
        &self,
        key: &str,
        mutex: &Mutex<()>,
        record: R,
    ) -> Result<(), StoreError> {
        self.mutate(key, mutex, |records: &mut Vec<R>| {
            records.retain(|r| r.id() != record.id());
            records.push(record);
            Ok(((), true))
        })
    }

    fn set_progress<R: OperationRecord>(
        &self,
        key: &str,
        mutex: &Mutex<()>,
        id: &str,
        progress: u8,
    ) -> Result<(), StoreError> {
        self.mutate(key, mutex, |records: &mut Vec<R>| {
            let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
                debug!("Ignoring progress for unknown operation {}", id);
                return Ok(((), false));
            };
            if record.status().is_terminal() {
                return Ok(((), false));
            }

            let progress = progress.min(100);
            let current = record.progress_mut();
            if progress <= *current {
                return Ok(((), false));
            }
            *current = progress;
            Ok(((), true))
        })
    }

    fn set_status<R: OperationRecord>(
        &self,
        key: &str,
        mutex: &Mutex<()>,
        id: &str,
        status: R::Status,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.mutate(key, mutex, |records: &mut Vec<R>| {
            let record = records
                .iter_mut()
                .find(|r| r.id() == id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

            let current = record.status();
            if current == status {
                return Ok(((), false));
            }
            if current.is_terminal() || status.rank() < current.rank() {
                return Err(StoreError::StatusRegression {
                    id: id.to_string(),
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }

            record.set_status(status, error);
            if status.is_completed() {
                *record.progress_mut() = 100;
            }
            Ok(((), true))
        })
    }

    fn remove_where<R: OperationRecord>(
        &self,
        key: &str,
        mutex: &Mutex<()>,
        predicate: impl Fn(&R) -> bool,
    ) -> Result<usize, StoreError> {
        self.mutate(key, mutex, |records: &mut Vec<R>| {
            let before = records.len();
            records.retain(|r| !predicate(r));
            let removed = before - records.len();
            Ok((removed, removed > 0))
        })
    }
}

/// Decode a stored record array; corruption reads as empty
fn parse_records<R: OperationRecord>(key: &str, raw: Option<&str>) -> Vec<R> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(records) => records,
        Err(e) => {
            warn!("Stored {} is corrupted, treating as empty: {}", key, e);
            Vec::new()
        }
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_and_list_download() {
        let store = OperationStore::in_memory();
        let id = store.generate_download_id();
        store
            .add_download(ActiveDownload::new(&id, "https://ota.example.com/update/a.json"))
            .unwrap();

        let downloads = store.list_downloads().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].download_id, id);
        assert_eq!(downloads[0].status, DownloadStatus::Downloading);
        assert!(store.has_active_operations().unwrap());

        store
            .update_download_status(&id, DownloadStatus::Completed, None)
            .unwrap();
        assert!(!store.has_active_operations().unwrap());
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let store = OperationStore::in_memory();
        let ids: Vec<i64> = (0..50)
            .map(|_| {
                store
                    .generate_download_id()
                    .trim_start_matches("download_")
                    .parse()
                    .unwrap()
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[1] > w[0]));
        assert!(store.generate_update_id().starts_with("update_"));
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let store = OperationStore::in_memory();
        store.add_download(ActiveDownload::new("d1", "u")).unwrap();

        store.update_download_progress("d1", 40).unwrap();
        store.update_download_progress("d1", 20).unwrap();
        assert_eq!(store.list_downloads().unwrap()[0].progress, 40);

        store.update_download_progress("d1", 250).unwrap();
        assert_eq!(store.list_downloads().unwrap()[0].progress, 100);

        // unknown ids are ignored
        store.update_download_progress("nope", 10).unwrap();
    }

    #[test]
    fn test_progress_ignored_after_terminal_status() {
        let store = OperationStore::in_memory();
        store.add_update(ActiveUpdate::new("u1", "Foo_Ver2.0.0")).unwrap();
        store.update_update_progress("u1", 30).unwrap();
        store
            .update_update_status("u1", UpdateStatus::Error, Some("boom".into()))
            .unwrap();
        store.update_update_progress("u1", 90).unwrap();

        let update = &store.list_updates().unwrap()[0];
        assert_eq!(update.progress, 30);
        assert_eq!(update.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_status_cannot_regress() {
        let store = OperationStore::in_memory();
        store.add_update(ActiveUpdate::new("u1", "cfg")).unwrap();
        store
            .update_update_status("u1", UpdateStatus::Applying, None)
            .unwrap();

        let err = store
            .update_update_status("u1", UpdateStatus::Preparing, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusRegression { .. }));

        store
            .update_update_status("u1", UpdateStatus::Completed, None)
            .unwrap();
        assert!(store
            .update_update_status("u1", UpdateStatus::Error, None)
            .is_err());
        // same status again is a no-op
        store
            .update_update_status("u1", UpdateStatus::Completed, None)
            .unwrap();
    }

    #[test]
    fn test_status_of_unknown_record() {
        let store = OperationStore::in_memory();
        let err = store
            .update_download_status("missing", DownloadStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_cleanup_removes_only_old_terminal_records() {
        let store = OperationStore::in_memory();
        let mut old_done = ActiveDownload::new("old_done", "u");
        old_done.start_time -= 2 * 60 * 60 * 1000;
        old_done.status = DownloadStatus::Completed;
        let mut old_running = ActiveDownload::new("old_running", "u");
        old_running.start_time -= 2 * 60 * 60 * 1000;
        let mut fresh_done = ActiveDownload::new("fresh_done", "u");
        fresh_done.status = DownloadStatus::Error;

        for record in [old_done, old_running, fresh_done] {
            store.add_download(record).unwrap();
        }

        let removed = store.cleanup_stale(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 1);
        let ids: Vec<String> = store
            .list_downloads()
            .unwrap()
            .into_iter()
            .map(|d| d.download_id)
            .collect();
        assert_eq!(ids, vec!["old_running", "fresh_done"]);
    }

    #[test]
    fn test_corrupted_array_reads_as_empty() {
        let backend = Arc::new(MemoryStore::new());
        backend.put(KEY_ACTIVE_DOWNLOADS, "{not json").unwrap();
        let store = OperationStore::new(backend);
        assert!(store.list_downloads().unwrap().is_empty());
        assert!(!store.has_active_operations().unwrap());
    }

    #[test]
    fn test_persisted_field_names() {
        let backend = Arc::new(MemoryStore::new());
        let store = OperationStore::new(backend.clone());
        store
            .add_download(ActiveDownload::new("download_1", "https://h/update/c.json"))
            .unwrap();

        let raw = backend.get(KEY_ACTIVE_DOWNLOADS).unwrap().unwrap();
        assert!(raw.contains(r#""downloadId":"download_1""#));
        assert!(raw.contains(r#""configUrl""#));
        assert!(raw.contains(r#""startTime""#));
        assert!(raw.contains(r#""status":"downloading""#));
        assert!(!raw.contains("errorMessage"));
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("state.json");

        {
            let store = OperationStore::open(&path);
            store.add_update(ActiveUpdate::new("u1", "Foo_Ver2.0.0")).unwrap();
            store
                .set_last_update_config(&LastUpdateConfig {
                    name: "Foo_Ver2.0.0".into(),
                    url: "https://h/a.zip".into(),
                    install_type: InstallType::Streaming,
                })
                .unwrap();
        }

        let store = OperationStore::open(&path);
        assert!(store.has_active_operations().unwrap());
        assert_eq!(
            store.last_update_config().unwrap().unwrap().name,
            "Foo_Ver2.0.0"
        );

        store.clear_all().unwrap();
        assert!(store.list_updates().unwrap().is_empty());
        assert!(store.last_update_config().unwrap().is_none());
    }

    #[test]
    fn test_concurrent_progress_and_status_do_not_lose_updates() {
        let store = Arc::new(OperationStore::in_memory());
        for n in 0..8 {
            store
                .add_download(ActiveDownload::new(format!("d{}", n), "u"))
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = format!("d{}", n);
                    for pct in (0..=100).step_by(10) {
                        store.update_download_progress(&id, pct).unwrap();
                    }
                    store
                        .update_download_status(&id, DownloadStatus::Completed, None)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let downloads = store.list_downloads().unwrap();
        assert_eq!(downloads.len(), 8);
        assert!(downloads
            .iter()
            .all(|d| d.status == DownloadStatus::Completed && d.progress == 100));
    }
}
