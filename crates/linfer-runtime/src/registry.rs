//! Model registry with hot reload
//!
//! Each registered model owns one directory of snapshot files. At launch
//! the lexicographically greatest file of every directory is loaded and
//! published, then the directory is watched: a new file is loaded in the
//! background and, if its embedded model name matches the registration,
//! swapped in atomically. Requests read the current snapshot without
//! locking and keep whatever version they picked up for their whole
//! computation.

use crate::column::Features;
use crate::config::RegistryConfig;
use crate::model::Model;
use crate::watcher::{DirectoryWatcher, WatchEvent, WatchEventKind};
use arc_swap::{ArcSwap, ArcSwapOption};
use linfer_core::error::{Error, Result};
use linfer_core::{Snapshot, Tensor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

/// Registration of one model
#[derive(Clone)]
pub struct ModelConfig {
    /// Must equal the model name embedded in every snapshot file
    pub name: String,
    /// Directory holding the snapshot files
    pub path: PathBuf,
    pub model: Arc<dyn Model>,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, model: Arc<dyn Model>) -> Self {
        Self { name: name.into(), path: path.into(), model }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("model name is required".into()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(format!("{}: model path is required", self.name)));
        }
        Ok(())
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("model", &self.model.name())
            .finish()
    }
}

/// A registered model and its currently published snapshot
pub struct ServingModel {
    config: ModelConfig,
    snapshot: ArcSwapOption<Snapshot>,
    loaded_at: Mutex<Option<SystemTime>>,
}

impl ServingModel {
    fn new(config: ModelConfig) -> Self {
        Self { config, snapshot: ArcSwapOption::empty(), loaded_at: Mutex::new(None) }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.config.model
    }

    /// Current snapshot. The returned handle stays valid after a reload.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.snapshot.load_full().ok_or_else(|| Error::NotLoaded(self.config.name.clone()))
    }

    pub fn version(&self) -> Option<u64> {
        self.snapshot.load().as_ref().map(|s| s.version())
    }

    /// When the current snapshot was published
    pub fn loaded_at(&self) -> Option<SystemTime> {
        *self.loaded_at.lock()
    }

    pub fn predict(&self, features: &Features) -> Result<Tensor> {
        let snapshot = self.snapshot()?;
        self.config.model.predict(&snapshot, features)
    }

    /// Make `snapshot` the current one if it belongs to this model
    fn publish(&self, snapshot: Snapshot) -> Result<Arc<Snapshot>> {
        if snapshot.model_name() != self.config.name {
            return Err(Error::NotMatch {
                expected: self.config.name.clone(),
                provided: snapshot.model_name().to_string(),
            });
        }
        let snapshot = Arc::new(snapshot);
        let mut loaded_at = self.loaded_at.lock();
        self.snapshot.store(Some(Arc::clone(&snapshot)));
        *loaded_at = Some(SystemTime::now());
        Ok(snapshot)
    }
}

#[derive(Default, Clone)]
struct ModelTable {
    paths: HashMap<PathBuf, Arc<ServingModel>>,
    names: HashMap<String, Arc<ServingModel>>,
}

impl ModelTable {
    fn insert(&mut self, config: ModelConfig) -> Result<()> {
        if self.paths.contains_key(&config.path) {
            return Err(Error::Duplicated(config.path.display().to_string()));
        }
        if self.names.contains_key(&config.name) {
            return Err(Error::Duplicated(config.name));
        }
        let model = Arc::new(ServingModel::new(config));
        self.paths.insert(model.config.path.clone(), Arc::clone(&model));
        self.names.insert(model.config.name.clone(), model);
        Ok(())
    }

    fn by_path(&self, path: &Path) -> Option<Arc<ServingModel>> {
        self.paths.get(path).cloned()
    }

    fn by_name(&self, name: &str) -> Option<Arc<ServingModel>> {
        self.names.get(name).cloned()
    }

    fn models(&self) -> Vec<Arc<ServingModel>> {
        let mut models: Vec<_> = self.names.values().cloned().collect();
        models.sort_by(|a, b| a.name().cmp(b.name()));
        models
    }
}

struct RegistryInner {
    config: RegistryConfig,
    /// Replaced wholesale on registration, read without locking
    table: ArcSwap<ModelTable>,
    /// Serializes registration against launch
    registration: Mutex<()>,
    launched: AtomicBool,
    launch: OnceCell<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RegistryInner {
    async fn update_snapshot(&self, file: &Path) -> Result<Arc<Snapshot>> {
        let dir = file.parent().unwrap_or_else(|| Path::new(""));
        let model = self.table.load().by_path(dir).ok_or_else(|| Error::Unregistered {
            field: "paths",
            name: dir.display().to_string(),
        })?;

        let path = file.to_path_buf();
        let snapshot = tokio::task::spawn_blocking(move || Snapshot::load(path))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        model.publish(snapshot)
    }

    async fn watch(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            if event.kind != WatchEventKind::Create {
                log::debug!("Ignore {:?} {}", event.kind, event.path.display());
                continue;
            }
            // let the writer finish before reading
            tokio::time::sleep(self.config.settle_delay()).await;
            match self.update_snapshot(&event.path).await {
                Ok(snapshot) => log::info!(
                    "Updated {} to v{} from {}",
                    snapshot.model_name(),
                    snapshot.version(),
                    event.path.display()
                ),
                Err(e @ Error::NotMatch { .. }) => {
                    log::warn!("Rejected {}: {}", event.path.display(), e)
                }
                Err(e) => log::error!("Updated Failed: {} ({})", e, event.path.display()),
            }
        }
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Registry of served models.
///
/// Register every model, then [`launch`](Self::launch) once inside a
/// tokio runtime. Dropping the registry stops its watchers.
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl ModelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                table: ArcSwap::from_pointee(ModelTable::default()),
                registration: Mutex::new(()),
                launched: AtomicBool::new(false),
                launch: OnceCell::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Register a model. Only allowed before launch.
    pub fn register(&self, config: ModelConfig) -> Result<()> {
        let _registration = self.inner.registration.lock();
        if self.inner.launched.load(Ordering::Acquire) {
            return Err(Error::RegisterAfterLaunch);
        }
        config.validate()?;
        log::debug!("Register {} at {}", config.name, config.path.display());
        let mut table = ModelTable::clone(&self.inner.table.load());
        table.insert(config)?;
        self.inner.table.store(Arc::new(table));
        Ok(())
    }

    pub fn is_launched(&self) -> bool {
        self.inner.launched.load(Ordering::Acquire) && self.inner.launch.initialized()
    }

    /// Load the newest snapshot of every model and start watching their
    /// directories. Calling it again after a successful launch is a no-op.
    pub async fn launch(&self) -> Result<()> {
        self.inner.launch.get_or_try_init(|| self.launch_once()).await?;
        Ok(())
    }

    async fn launch_once(&self) -> Result<()> {
        self.inner.config.validate()?;
        let models = {
            let _registration = self.inner.registration.lock();
            self.inner.launched.store(true, Ordering::Release);
            self.inner.table.load().models()
        };

        let result = self.start(&models).await;
        if let Err(e) = &result {
            log::error!("Launch failed: {}", e);
            self.inner.abort_tasks();
            self.inner.launched.store(false, Ordering::Release);
        }
        result
    }

    async fn start(&self, models: &[Arc<ServingModel>]) -> Result<()> {
        // watch before the initial load so files written meanwhile are seen
        let mut receivers = Vec::with_capacity(models.len());
        for model in models {
            let watcher = DirectoryWatcher::new(model.path(), self.inner.config.poll_interval());
            let (handle, events) = watcher.spawn()?;
            self.inner.tasks.lock().push(handle);
            receivers.push(events);
        }

        for model in models {
            let file = latest_snapshot_file(model.path())?;
            self.inner.update_snapshot(&file).await?;
        }

        for events in receivers {
            let task = tokio::spawn(Arc::clone(&self.inner).watch(events));
            self.inner.tasks.lock().push(task);
        }
        log::info!("🚀 Serving launched with {} models", models.len());
        Ok(())
    }

    /// Load `file` and publish it for the model registered on its
    /// directory. The previous snapshot stays current on any failure.
    pub async fn update_snapshot(&self, file: impl AsRef<Path>) -> Result<Arc<Snapshot>> {
        self.inner.update_snapshot(file.as_ref()).await
    }

    pub fn get_model(&self, name: &str) -> Result<Arc<ServingModel>> {
        self.inner
            .table
            .load()
            .by_name(name)
            .ok_or_else(|| Error::NotFound { field: "models", name: name.to_string() })
    }

    /// Predict with the current snapshot of model `name`
    pub fn request(&self, name: &str, features: &Features) -> Result<Tensor> {
        self.get_model(name)?.predict(features)
    }

    pub fn snapshot(&self, name: &str) -> Result<Arc<Snapshot>> {
        self.get_model(name)?.snapshot()
    }

    pub fn version(&self, name: &str) -> Result<u64> {
        let model = self.get_model(name)?;
        model.version().ok_or_else(|| Error::NotLoaded(name.to_string()))
    }

    pub fn loaded_at(&self, name: &str) -> Result<Option<SystemTime>> {
        Ok(self.get_model(name)?.loaded_at())
    }

    pub fn model_names(&self) -> Vec<String> {
        self.inner.table.load().models().iter().map(|m| m.name().to_string()).collect()
    }

    /// Stop watching. Published snapshots keep serving.
    pub fn shutdown(&self) {
        self.inner.abort_tasks();
    }
}

impl Drop for ModelRegistry {
    fn drop(&mut self) {
        self.inner.abort_tasks();
    }
}

/// The lexicographically greatest regular, non-hidden file in `dir`
pub fn latest_snapshot_file(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let mut latest: Option<PathBuf> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') || !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if latest.as_ref().map_or(true, |l| path.file_name() > l.file_name()) {
            latest = Some(path);
        }
    }
    latest.ok_or_else(|| Error::EmptyDir(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{CategoricalColumn, Combiner, EmbeddingColumn, IdentityColumn};
    use crate::model::LogisticRegression;
    use linfer_core::SnapshotWriter;
    use std::time::Duration;

    fn model() -> Arc<dyn Model> {
        let base: Arc<CategoricalColumn> =
            Arc::new(IdentityColumn::new("F1", "a", 2).unwrap().into());
        let emb = EmbeddingColumn::new(base, None, 1, Combiner::Sum).unwrap();
        Arc::new(LogisticRegression::new("lr", 1, vec![emb]).unwrap())
    }

    fn write(dir: &Path, name: &str, version: u64, weight: f32) -> PathBuf {
        let weights = Tensor::from_f32(&[2, 1], vec![0.0, weight]).unwrap();
        SnapshotWriter::new(name, version)
            .add_tensor("F1", &weights)
            .add_field_index("F1", 1, [("a", 0), ("b", 1)])
            .write_to(dir)
            .unwrap()
    }

    #[test]
    fn test_latest_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(latest_snapshot_file(dir.path()), Err(Error::EmptyDir(_))));

        std::fs::write(dir.path().join("1649145600.pb"), b"").unwrap();
        std::fs::write(dir.path().join("1649232000.pb"), b"").unwrap();
        std::fs::write(dir.path().join(".1649318400.pb.tmp"), b"").unwrap();
        std::fs::create_dir(dir.path().join("zzz")).unwrap();
        let latest = latest_snapshot_file(dir.path()).unwrap();
        assert_eq!(latest, dir.path().join("1649232000.pb"));
    }

    #[test]
    fn test_duplicated_registration() {
        let registry = ModelRegistry::new(RegistryConfig::default());
        registry.register(ModelConfig::new("lr", "/models/lr", model())).unwrap();
        assert!(matches!(
            registry.register(ModelConfig::new("lr", "/models/other", model())),
            Err(Error::Duplicated(_))
        ));
        assert!(matches!(
            registry.register(ModelConfig::new("other", "/models/lr", model())),
            Err(Error::Duplicated(_))
        ));
        assert!(registry.register(ModelConfig::new("", "/models/x", model())).is_err());
        assert_eq!(registry.model_names(), vec!["lr"]);
    }

    #[test]
    fn test_request_before_launch() {
        let registry = ModelRegistry::new(RegistryConfig::default());
        registry.register(ModelConfig::new("lr", "/models/lr", model())).unwrap();
        let features = Features::new();
        assert!(matches!(registry.request("lr", &features), Err(Error::NotLoaded(_))));
        assert!(matches!(
            registry.request("nope", &features),
            Err(Error::NotFound { field: "models", .. })
        ));
    }

    #[test]
    fn test_lookup_while_registration_is_held() {
        let registry = Arc::new(ModelRegistry::new(RegistryConfig::default()));
        registry.register(ModelConfig::new("lr", "/models/lr", model())).unwrap();

        let _registration = registry.inner.registration.lock();
        let (tx, rx) = std::sync::mpsc::channel();
        let reader = Arc::clone(&registry);
        std::thread::spawn(move || {
            let found = reader.get_model("lr").map(|m| m.name().to_string());
            let _ = tx.send((found.ok(), reader.model_names()));
        });
        let (found, names) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(found.as_deref(), Some("lr"));
        assert_eq!(names, vec!["lr"]);
    }

    #[tokio::test]
    async fn test_publish_checks_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let v1 = write(dir.path(), "lr", 1, 1.0);
        let registry = ModelRegistry::new(RegistryConfig::default());
        registry.register(ModelConfig::new("lr", dir.path(), model())).unwrap();

        registry.update_snapshot(&v1).await.unwrap();
        assert_eq!(registry.version("lr").unwrap(), 1);
        let first_loaded = registry.loaded_at("lr").unwrap();
        assert!(first_loaded.is_some());

        let other = write(dir.path(), "ctr", 2, 1.0);
        match registry.update_snapshot(&other).await {
            Err(Error::NotMatch { expected, provided }) => {
                assert_eq!(expected, "lr");
                assert_eq!(provided, "ctr");
            }
            r => panic!("mismatched model name accepted: {:?}", r.map(|s| s.version())),
        }
        assert_eq!(registry.version("lr").unwrap(), 1);
        assert_eq!(registry.loaded_at("lr").unwrap(), first_loaded);
    }

    #[tokio::test]
    async fn test_update_from_unregistered_dir() {
        let registered = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let file = write(elsewhere.path(), "lr", 1, 1.0);
        let registry = ModelRegistry::new(RegistryConfig::default());
        registry.register(ModelConfig::new("lr", registered.path(), model())).unwrap();
        assert!(matches!(
            registry.update_snapshot(&file).await,
            Err(Error::Unregistered { field: "paths", .. })
        ));
    }

    #[tokio::test]
    async fn test_launch_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(RegistryConfig::default());
        registry.register(ModelConfig::new("lr", dir.path(), model())).unwrap();
        assert!(matches!(registry.launch().await, Err(Error::EmptyDir(_))));
        assert!(!registry.is_launched());

        // a failed launch can be retried once the directory is filled
        write(dir.path(), "lr", 3, 1.0);
        registry.launch().await.unwrap();
        assert!(registry.is_launched());
        assert_eq!(registry.version("lr").unwrap(), 3);
    }
}
