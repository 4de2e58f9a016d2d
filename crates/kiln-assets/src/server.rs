use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::{panic_message, TaskManager};
use tracing::{error, info};

use crate::config::AssetConfig;
use crate::error::AssetError;
use crate::handle::AssetHandle;
use crate::loader;
use crate::mesh::ModelRecord;
use crate::parser::{GltfParser, SceneParser};
use crate::path::canonical_key;
use crate::store::{AssetStore, Claim, LoadResult};
use crate::texture::TextureRecord;

struct ServerInner {
    base_path: PathBuf,
    config: AssetConfig,
    parser: Arc<dyn SceneParser>,
    models: AssetStore<ModelRecord>,
    textures: AssetStore<TextureRecord>,
}

fn model_store(inner: &ServerInner) -> &AssetStore<ModelRecord> {
    &inner.models
}

fn texture_store(inner: &ServerInner) -> &AssetStore<TextureRecord> {
    &inner.textures
}

/// Central asset registry. Loads assets on a worker pool, caches them by
/// canonical path, and hands out handles.
///
/// Construct one at startup and pass it (or clones of it) to whatever needs
/// assets. Clones share the same stores and pool.
#[derive(Clone)]
pub struct AssetServer {
    inner: Arc<ServerInner>,
    pool: Arc<TaskManager>,
}

impl AssetServer {
    /// Create a server with its own worker pool and the glTF parser.
    pub fn new(config: AssetConfig) -> Result<Self, AssetError> {
        let pool = TaskManager::new(config.effective_worker_count())
            .map_err(|e| AssetError::PoolStart(e.to_string()))?;
        Self::with_parts(config, Arc::new(pool), Arc::new(GltfParser))
    }

    /// Create a server on an existing pool with a custom parser.
    pub fn with_parts(
        config: AssetConfig,
        pool: Arc<TaskManager>,
        parser: Arc<dyn SceneParser>,
    ) -> Result<Self, AssetError> {
        let base_path = match &config.asset_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(|e| AssetError::io(".", e))?,
        };
        info!("AssetServer created with base path: {}", base_path.display());

        Ok(Self {
            inner: Arc::new(ServerInner {
                base_path,
                config,
                parser,
                models: AssetStore::new(),
                textures: AssetStore::new(),
            }),
            pool,
        })
    }

    /// Canonical key `path` is cached under.
    pub fn canonical_path(&self, path: &Path) -> PathBuf {
        canonical_key(path, &self.inner.base_path)
    }

    /// Request a model. Returns immediately.
    ///
    /// `on_ready` runs exactly once: right away on this thread if the model is
    /// already loaded, otherwise on a worker thread when the load finishes.
    /// Concurrent requests for the same path share a single load.
    pub fn request_model<F>(&self, path: impl AsRef<Path>, on_ready: F)
    where
        F: FnOnce(LoadResult<ModelRecord>) + Send + 'static,
    {
        let key = self.canonical_path(path.as_ref());
        if self.inner.models.request(&key, Box::new(on_ready)) == Claim::Start {
            self.schedule(key, "model", model_store, |inner, key| {
                loader::load_model(key, inner.parser.as_ref(), &inner.config)
            });
        }
    }

    /// Request a texture. Same delivery rules as [`request_model`].
    ///
    /// [`request_model`]: AssetServer::request_model
    pub fn request_texture<F>(&self, path: impl AsRef<Path>, on_ready: F)
    where
        F: FnOnce(LoadResult<TextureRecord>) + Send + 'static,
    {
        let key = self.canonical_path(path.as_ref());
        if self.inner.textures.request(&key, Box::new(on_ready)) == Claim::Start {
            self.schedule(key, "texture", texture_store, |inner, key| {
                loader::load_texture(key, &inner.config)
            });
        }
    }

    /// Queue the loader for `key`. Every outcome, including a panic inside the
    /// loader or a stopped pool, is delivered through the store.
    fn schedule<T, L>(
        &self,
        key: PathBuf,
        kind: &'static str,
        store: fn(&ServerInner) -> &AssetStore<T>,
        load: L,
    ) where
        T: Send + Sync + 'static,
        L: FnOnce(&ServerInner, &Path) -> Result<T, AssetError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        let queued = self.pool.enqueue(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| load(&inner, &task_key)))
                .unwrap_or_else(|payload| {
                    Err(AssetError::TaskPanicked(
                        task_key.clone(),
                        panic_message(payload.as_ref()),
                    ))
                });
            if let Err(e) = &result {
                error!("Failed to load {} '{}': {}", kind, task_key.display(), e);
            }
            store(&inner).complete(&task_key, result);
        });

        if queued.is_err() {
            error!("Cannot load {} '{}': task pool stopped", kind, key.display());
            store(&self.inner).complete(&key, Err(AssetError::PoolStopped(key.clone())));
        }
    }

    /// Handle to a loaded model, if `path` has finished loading.
    pub fn get_model(&self, path: impl AsRef<Path>) -> Option<AssetHandle<ModelRecord>> {
        self.inner.models.get(&self.canonical_path(path.as_ref()))
    }

    /// Handle to a loaded texture, if `path` has finished loading.
    pub fn get_texture(&self, path: impl AsRef<Path>) -> Option<AssetHandle<TextureRecord>> {
        self.inner.textures.get(&self.canonical_path(path.as_ref()))
    }

    /// Resolve a model handle. `None` if the model has been evicted.
    pub fn model(&self, handle: AssetHandle<ModelRecord>) -> Option<Arc<ModelRecord>> {
        self.inner.models.resolve(handle)
    }

    /// Resolve a texture handle. `None` if the texture has been evicted.
    pub fn texture(&self, handle: AssetHandle<TextureRecord>) -> Option<Arc<TextureRecord>> {
        self.inner.textures.resolve(handle)
    }

    /// Loaded model by path, or `NotLoaded` if never requested, still
    /// loading, or failed.
    pub fn model_by_path(&self, path: impl AsRef<Path>) -> Result<Arc<ModelRecord>, AssetError> {
        let key = self.canonical_path(path.as_ref());
        self.inner
            .models
            .get_record(&key)
            .ok_or(AssetError::NotLoaded(key))
    }

    /// Loaded texture by path, or `NotLoaded`.
    pub fn texture_by_path(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<TextureRecord>, AssetError> {
        let key = self.canonical_path(path.as_ref());
        self.inner
            .textures
            .get_record(&key)
            .ok_or(AssetError::NotLoaded(key))
    }

    /// Whether a model load for `path` is in flight.
    pub fn is_model_pending(&self, path: impl AsRef<Path>) -> bool {
        self.inner.models.is_pending(&self.canonical_path(path.as_ref()))
    }

    /// Forget a loaded model; its handles stop resolving.
    pub fn evict_model(&self, path: impl AsRef<Path>) -> bool {
        self.inner.models.evict(&self.canonical_path(path.as_ref()))
    }

    /// Forget a loaded texture; its handles stop resolving.
    pub fn evict_texture(&self, path: impl AsRef<Path>) -> bool {
        self.inner.textures.evict(&self.canonical_path(path.as_ref()))
    }

    /// The model store, for listing what is loaded.
    pub fn models(&self) -> &AssetStore<ModelRecord> {
        &self.inner.models
    }

    /// The texture store, for listing what is loaded.
    pub fn textures(&self) -> &AssetStore<TextureRecord> {
        &self.inner.textures
    }

    /// Block until no load is queued or running. Do not call from a callback.
    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }

    /// Finish queued loads and stop the pool. Later requests fail with
    /// `PoolStopped`.
    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn pool(&self) -> &Arc<TaskManager> {
        &self.pool
    }

    pub fn config(&self) -> &AssetConfig {
        &self.inner.config
    }

    /// The base path relative asset paths resolve against.
    pub fn base_path(&self) -> &Path {
        &self.inner.base_path
    }
}
