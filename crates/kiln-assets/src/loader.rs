//! Loader tasks: resolve one request into a finished record
//!
//! A model load tries the binary mesh cache first. On a miss (no cache,
//! stale cache, or a cache that fails to decode) it parses the source asset
//! and rewrites the cache so the next load is a hit. Loaders never touch the
//! graphics API; GPU uploads happen later on the render thread.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::{self, CacheLookup, CachePaths};
use crate::config::AssetConfig;
use crate::error::AssetError;
use crate::mesh::{LoadSource, MeshRecord, ModelRecord};
use crate::parser::SceneParser;
use crate::texture::{self, TextureRecord};

/// Load the model at canonical path `source`.
pub fn load_model(
    source: &Path,
    parser: &dyn SceneParser,
    config: &AssetConfig,
) -> Result<ModelRecord, AssetError> {
    let start = Instant::now();
    let paths = CachePaths::for_source(source, config.cache_root.as_deref());
    let mut record = ModelRecord::new(source);

    match cache::lookup(&paths, source, config.check_staleness) {
        CacheLookup::Hit(meshes) => {
            record.populate(meshes, LoadSource::Cache);
            info!(
                "Loaded model '{}' from cache ({} meshes) in {:?}",
                source.display(),
                record.mesh_count(),
                start.elapsed()
            );
            return Ok(record);
        }
        CacheLookup::Missing => debug!("No mesh cache for '{}'", source.display()),
        CacheLookup::Stale => info!("Mesh cache for '{}' is stale", source.display()),
        CacheLookup::Corrupt(e) => warn!(
            "Mesh cache {:?} is unusable ({}), re-parsing source",
            paths.bin, e
        ),
    }

    if !source.exists() {
        return Err(AssetError::NotFound(source.to_path_buf()));
    }

    let meshes = usable_meshes(source, parser.parse(source)?)?;

    if config.write_cache {
        if let Err(e) = cache::store(&paths, source, &meshes) {
            warn!("Failed to write mesh cache for '{}': {}", source.display(), e);
        }
    }

    record.populate(meshes, LoadSource::Parsed);
    info!(
        "Parsed model '{}' ({} meshes) in {:?}",
        source.display(),
        record.mesh_count(),
        start.elapsed()
    );
    Ok(record)
}

/// Drop empty meshes and reject broken ones. A model needs at least one mesh.
fn usable_meshes(source: &Path, meshes: Vec<MeshRecord>) -> Result<Vec<MeshRecord>, AssetError> {
    let parsed = meshes.len();
    let meshes: Vec<MeshRecord> = meshes.into_iter().filter(MeshRecord::is_usable).collect();
    if meshes.len() < parsed {
        warn!(
            "Dropped {} empty meshes from '{}'",
            parsed - meshes.len(),
            source.display()
        );
    }

    if meshes.is_empty() {
        return Err(AssetError::ParseFailed(
            source.to_path_buf(),
            "no usable meshes".to_string(),
        ));
    }

    for (i, mesh) in meshes.iter().enumerate() {
        if let Some(index) = mesh.out_of_range_index() {
            return Err(AssetError::ParseFailed(
                source.to_path_buf(),
                format!(
                    "mesh {i} index {index} exceeds {} vertices",
                    mesh.vertices.len()
                ),
            ));
        }
    }

    Ok(meshes)
}

/// Load the texture at canonical path `source`.
pub fn load_texture(source: &Path, config: &AssetConfig) -> Result<TextureRecord, AssetError> {
    let start = Instant::now();
    let record = texture::load_texture(source, config.flip_textures)?;
    info!(
        "Loaded texture '{}' ({}x{}) in {:?}",
        source.display(),
        record.width(),
        record.height(),
        start.elapsed()
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Vertex;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedParser {
        meshes: Vec<MeshRecord>,
        calls: AtomicUsize,
    }

    impl FixedParser {
        fn new(meshes: Vec<MeshRecord>) -> Self {
            Self {
                meshes,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SceneParser for FixedParser {
        fn parse(&self, _path: &Path) -> Result<Vec<MeshRecord>, AssetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.meshes.clone())
        }
    }

    fn triangle() -> MeshRecord {
        MeshRecord::new(
            vec![
                Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
                Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
                Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.asset");
        fs::write(&source, b"source").unwrap();
        let parser = FixedParser::new(vec![triangle(), triangle()]);
        let config = AssetConfig::default();

        let first = load_model(&source, &parser, &config).unwrap();
        assert_eq!(first.source(), LoadSource::Parsed);
        assert!(first.is_loaded());
        assert!(dir.path().join("tri").join("tri.bin").exists());

        let second = load_model(&source, &parser, &config).unwrap();
        assert_eq!(second.source(), LoadSource::Cache);
        assert_eq!(second.meshes(), first.meshes());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_disabled_always_parses() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.asset");
        fs::write(&source, b"source").unwrap();
        let parser = FixedParser::new(vec![triangle()]);
        let config = AssetConfig {
            write_cache: false,
            ..Default::default()
        };

        load_model(&source, &parser, &config).unwrap();
        load_model(&source, &parser, &config).unwrap();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert!(!dir.path().join("tri").exists());
    }

    #[test]
    fn cache_root_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.asset");
        fs::write(&source, b"source").unwrap();
        let cache_root = dir.path().join("cache");
        let config = AssetConfig {
            cache_root: Some(cache_root.clone()),
            ..Default::default()
        };

        load_model(&source, &FixedParser::new(vec![triangle()]), &config).unwrap();
        assert!(cache_root.join("tri").join("tri.bin").exists());
    }

    #[test]
    fn empty_meshes_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.asset");
        fs::write(&source, b"source").unwrap();
        let parser = FixedParser::new(vec![MeshRecord::default(), triangle()]);

        let model = load_model(&source, &parser, &AssetConfig::default()).unwrap();
        assert_eq!(model.mesh_count(), 1);
    }

    #[test]
    fn all_empty_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.asset");
        fs::write(&source, b"source").unwrap();
        let parser = FixedParser::new(vec![MeshRecord::default()]);

        assert!(matches!(
            load_model(&source, &parser, &AssetConfig::default()),
            Err(AssetError::ParseFailed(..))
        ));
    }

    #[test]
    fn bad_index_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.asset");
        fs::write(&source, b"source").unwrap();
        let mut mesh = triangle();
        mesh.indices.push(10);

        assert!(matches!(
            load_model(&source, &FixedParser::new(vec![mesh]), &AssetConfig::default()),
            Err(AssetError::ParseFailed(..))
        ));
    }

    #[test]
    fn missing_source_without_cache_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let parser = FixedParser::new(vec![triangle()]);
        let result = load_model(
            &dir.path().join("ghost.asset"),
            &parser,
            &AssetConfig::default(),
        );
        assert!(matches!(result, Err(AssetError::NotFound(_))));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
    }
}
