//! A resource source fed from a directory of manifest files.
//!
//! Every `*.yaml`, `*.yml`, or `*.json` file holds one object. A scan applies
//! new and changed files to an in-memory source, which assigns versions and
//! emits watch events; files that disappear delete their object. After the
//! first scan, [`ManifestDirSource::watch_dir`] rescans on every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use eddy_core::{DynamicObject, Error, ResourceKey, Result};
use eddy_informer::{
    ListOptions, MemorySource, ObjectList, ResourceSource, WatchOptions, WatchStream, pause,
    stopped,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Quiet period after a file event before rescanning.
const RESCAN_DEBOUNCE: Duration = Duration::from_millis(200);

/// What one scan changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Objects created or updated.
    pub applied: usize,
    /// Files whose object was already current.
    pub unchanged: usize,
    /// Objects removed because their file is gone.
    pub deleted: usize,
    /// Files that could not be read or parsed.
    pub skipped: usize,
}

/// A [`ResourceSource`] mirroring a manifest directory.
pub struct ManifestDirSource {
    dir: PathBuf,
    memory: Arc<MemorySource>,
    files: Mutex<HashMap<PathBuf, ResourceKey>>,
}

impl ManifestDirSource {
    /// Create a source for `dir`. Nothing is read until [`Self::scan`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memory: Arc::new(MemorySource::new()),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// The watched directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The in-memory source holding the current objects.
    #[must_use]
    pub fn memory(&self) -> Arc<MemorySource> {
        self.memory.clone()
    }

    /// Bring the in-memory source in line with the directory.
    ///
    /// Unreadable or unparsable files are logged and skipped; an object
    /// previously loaded from such a file is kept.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be listed.
    pub fn scan(&self) -> Result<ScanReport> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seen: HashMap<PathBuf, ResourceKey> = HashMap::new();
        let mut report = ScanReport::default();

        for path in manifest_paths(&self.dir)? {
            let parsed = std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|text| DynamicObject::from_yaml_str(&path, &text))
                .and_then(|obj| ResourceKey::from_object(&obj).map(|key| (key, obj)));

            let (key, obj) = match parsed {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "MANIFEST: Skipping file");
                    report.skipped += 1;
                    if let Some(previous) = files.get(&path) {
                        seen.insert(path, previous.clone());
                    }
                    continue;
                }
            };

            if let Some((other, _)) = seen.iter().find(|(_, claimed)| **claimed == key) {
                warn!(
                    path = %path.display(),
                    other = %other.display(),
                    resource = %key,
                    "MANIFEST: Duplicate resource, skipping file"
                );
                report.skipped += 1;
                continue;
            }

            let current = self.memory.get(&key);
            if current.is_some_and(|stored| same_content(&stored, &obj)) {
                report.unchanged += 1;
            } else {
                self.memory.apply(obj)?;
                debug!(path = %path.display(), resource = %key, "MANIFEST: Applied");
                report.applied += 1;
            }
            seen.insert(path, key);
        }

        for key in self.memory.keys() {
            if !seen.values().any(|live| *live == key) && self.memory.delete(&key).is_some() {
                debug!(resource = %key, "MANIFEST: Deleted");
                report.deleted += 1;
            }
        }

        *files = seen;
        Ok(report)
    }

    /// Rescan whenever the directory changes, until `stop` fires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Source` if the directory cannot be watched.
    pub fn watch_dir(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if res.is_ok() {
                    let _ = tx.send(());
                }
            })
            .map_err(|e| Error::source(format!("failed to create file watcher: {e}")))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                Error::source(format!("failed to watch {}: {e}", self.dir.display()))
            })?;

        info!(dir = %self.dir.display(), "MANIFEST: Watching directory");

        Ok(tokio::spawn(async move {
            let _watcher = watcher;

            loop {
                tokio::select! {
                    biased;
                    () = stopped(&mut stop) => break,
                    event = rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                    }
                }

                if !pause(RESCAN_DEBOUNCE, &mut stop).await {
                    break;
                }
                while rx.try_recv().is_ok() {}

                let source = self.clone();
                match tokio::task::spawn_blocking(move || source.scan()).await {
                    Ok(Ok(report)) => info!(
                        applied = report.applied,
                        deleted = report.deleted,
                        skipped = report.skipped,
                        "MANIFEST: Rescanned directory"
                    ),
                    Ok(Err(e)) => warn!(error = %e, "MANIFEST: Rescan failed"),
                    Err(e) => error!(error = %e, "MANIFEST: Rescan task failed"),
                }
            }

            debug!("MANIFEST: Watch stopped");
        }))
    }
}

#[async_trait]
impl ResourceSource for ManifestDirSource {
    async fn list(&self, options: &ListOptions) -> Result<ObjectList> {
        self.memory.list(options).await
    }

    async fn watch(&self, options: &WatchOptions) -> Result<WatchStream> {
        ResourceSource::watch(self.memory.as_ref(), options).await
    }
}

/// Manifest files directly inside `dir`, sorted.
fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_manifest = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        if is_manifest && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Equal apart from the fields the source assigns.
fn same_content(stored: &DynamicObject, parsed: &DynamicObject) -> bool {
    let mut stored = stored.clone();
    stored.metadata.resource_version = parsed.metadata.resource_version;
    stored.metadata.uid.clone_from(&parsed.metadata.uid);
    stored == *parsed
}
