//! Kiln Assets - Asynchronous asset cache and binary mesh store
//!
//! Loads models and textures on a background [`TaskManager`](kiln_core::TaskManager),
//! caches them by canonical path so each asset is loaded at most once, and
//! persists parsed meshes to a binary side file so later runs can skip
//! parsing the source format.
//!
//! Entry point is [`AssetServer`]:
//!
//! ```no_run
//! use kiln_assets::{AssetConfig, AssetServer};
//!
//! let server = AssetServer::new(AssetConfig::default()).unwrap();
//! server.request_model("models/sphere.glb", |result| match result {
//!     Ok(loaded) => println!("{} meshes", loaded.record.mesh_count()),
//!     Err(e) => eprintln!("load failed: {e}"),
//! });
//! server.wait_idle();
//! ```

pub mod cache;
pub mod codec;
mod config;
mod error;
mod handle;
mod loader;
mod mesh;
mod parser;
mod path;
mod server;
mod store;
mod texture;

pub use cache::{CacheLookup, CacheManifest, CachePaths, SourceStamp};
pub use codec::CodecError;
pub use config::AssetConfig;
pub use error::AssetError;
pub use handle::AssetHandle;
pub use loader::{load_model, load_texture};
pub use mesh::{LoadSource, MeshRecord, ModelRecord, TextureRef};
pub use parser::{GltfParser, SceneParser};
pub use path::{canonical_key, normalize};
pub use server::AssetServer;
pub use store::{AssetStore, Callback, Claim, LoadResult, Loaded};
pub use texture::TextureRecord;
