//! On-disk mesh cache: file layout, freshness manifest, read and write
//!
//! For a source `models/sphere.glb` the cache lives in `models/sphere/`:
//! `sphere.bin` holds the encoded meshes and `sphere.meta.toml` records the
//! canonical source path, its modification time, and each mesh's texture
//! paths, none of which the binary format carries.
//!
//! The directory name comes from the file stem alone, so `sphere.glb` and
//! `sphere.gltf` share a cache directory. The manifest's source path tells
//! them apart: a cache written for another source is stale.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{self, CodecError};
use crate::error::AssetError;
use crate::mesh::{MeshRecord, TextureRef};

/// Held while a `.bin` and its manifest are read or swapped into place, so a
/// reader never pairs one source's meshes with another source's manifest.
static PUBLISH: Mutex<()> = Mutex::new(());

/// File locations of one model's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub dir: PathBuf,
    pub bin: PathBuf,
    pub manifest: PathBuf,
}

impl CachePaths {
    /// `<root>/<name>/<name>.bin`, where `root` defaults to the source's
    /// directory and `name` is the source's file stem.
    pub fn for_source(source: &Path, cache_root: Option<&Path>) -> Self {
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let root = cache_root
            .or_else(|| source.parent())
            .unwrap_or_else(|| Path::new("."));
        let dir = root.join(&name);

        Self {
            bin: dir.join(format!("{name}.bin")),
            manifest: dir.join(format!("{name}.meta.toml")),
            dir,
        }
    }
}

/// Source modification time, split for TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub secs: u64,
    pub nanos: u32,
}

impl SourceStamp {
    /// Modification time of `path`, if it exists and the platform reports one.
    pub fn of(path: &Path) -> Option<Self> {
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(Self {
            secs: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshTextures {
    #[serde(default)]
    pub textures: Vec<PathBuf>,
}

/// Sidecar written next to the `.bin` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<SourceStamp>,
    #[serde(default)]
    pub meshes: Vec<MeshTextures>,
}

impl CacheManifest {
    pub fn new(
        source: &Path,
        source_modified: Option<SourceStamp>,
        meshes: &[MeshRecord],
    ) -> Self {
        Self {
            source: Some(source.to_path_buf()),
            source_modified,
            meshes: meshes
                .iter()
                .map(|m| MeshTextures {
                    textures: m
                        .textures
                        .iter()
                        .filter_map(|t| t.path().map(Path::to_path_buf))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Read a manifest; `None` if missing or unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Ignoring unreadable cache manifest {:?}: {}", path, e);
                None
            }
        }
    }

    /// Whether this cache was written for `source`. A manifest without a
    /// recorded source is accepted.
    pub fn belongs_to(&self, source: &Path) -> bool {
        self.source.as_deref().map_or(true, |recorded| recorded == source)
    }

    /// Whether a cache written for `source_modified` still matches `current`.
    ///
    /// Unknown on either side counts as fresh: a cache without a stamp predates
    /// the manifest, and a missing source cannot be re-parsed anyway.
    pub fn is_fresh(&self, current: Option<SourceStamp>) -> bool {
        match (self.source_modified, current) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        }
    }

    /// Attach recorded texture paths to decoded meshes.
    fn apply_textures(&self, meshes: &mut [MeshRecord]) {
        if self.meshes.len() != meshes.len() {
            return;
        }
        for (mesh, entry) in meshes.iter_mut().zip(&self.meshes) {
            mesh.textures = entry
                .textures
                .iter()
                .cloned()
                .map(TextureRef::Path)
                .collect();
        }
    }
}

/// Outcome of looking for a usable cache.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(Vec<MeshRecord>),
    Missing,
    Stale,
    Corrupt(CodecError),
}

/// Look up the cache for `source`.
///
/// A cache written for a different source is `Stale` whatever
/// `check_staleness` says. A cache that decodes to zero meshes is `Corrupt`.
pub fn lookup(paths: &CachePaths, source: &Path, check_staleness: bool) -> CacheLookup {
    let (bytes, manifest) = {
        let _publish = PUBLISH.lock();
        let bytes = match fs::read(&paths.bin) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheLookup::Missing,
            Err(e) => return CacheLookup::Corrupt(e.into()),
        };
        (bytes, CacheManifest::load(&paths.manifest))
    };

    if let Some(manifest) = &manifest {
        if !manifest.belongs_to(source) {
            debug!(
                "Mesh cache {:?} was written for {:?}",
                paths.bin, manifest.source
            );
            return CacheLookup::Stale;
        }
        if check_staleness && !manifest.is_fresh(SourceStamp::of(source)) {
            return CacheLookup::Stale;
        }
    }

    match codec::decode(&bytes) {
        Ok(meshes) if meshes.is_empty() => CacheLookup::Corrupt(CodecError::NoMeshes),
        Ok(mut meshes) => {
            if let Some(manifest) = &manifest {
                manifest.apply_textures(&mut meshes);
            }
            CacheLookup::Hit(meshes)
        }
        Err(e) => CacheLookup::Corrupt(e),
    }
}

/// Temporary name next to `path`, unique per source.
fn temp_path(path: &Path, source: &Path) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_extension(format!("{extension}.{:016x}.tmp", hasher.finish()))
}

/// Write the cache for `source`, replacing any previous one.
///
/// Both files are written under temporary names and renamed into place
/// together, so a reader never sees a half-written cache.
pub fn store(paths: &CachePaths, source: &Path, meshes: &[MeshRecord]) -> Result<(), AssetError> {
    fs::create_dir_all(&paths.dir).map_err(|e| AssetError::io(&paths.dir, e))?;

    let bin_tmp = temp_path(&paths.bin, source);
    let manifest_tmp = temp_path(&paths.manifest, source);
    let written = write_bin(&bin_tmp, meshes).and_then(|()| {
        let manifest = CacheManifest::new(source, SourceStamp::of(source), meshes);
        let content = toml::to_string_pretty(&manifest)
            .map_err(|e| AssetError::Config(paths.manifest.clone(), e.to_string()))?;
        fs::write(&manifest_tmp, content).map_err(|e| AssetError::io(&manifest_tmp, e))
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&bin_tmp);
        let _ = fs::remove_file(&manifest_tmp);
        return Err(e);
    }

    {
        let _publish = PUBLISH.lock();
        fs::rename(&bin_tmp, &paths.bin).map_err(|e| AssetError::io(&paths.bin, e))?;
        if let Err(e) = fs::rename(&manifest_tmp, &paths.manifest) {
            // The old manifest may name another source; drop the bin it no
            // longer describes.
            let _ = fs::remove_file(&paths.bin);
            let _ = fs::remove_file(&manifest_tmp);
            return Err(AssetError::io(&paths.manifest, e));
        }
    }

    debug!(
        "Wrote mesh cache {:?} ({} meshes)",
        paths.bin,
        meshes.len()
    );
    Ok(())
}

fn write_bin(path: &Path, meshes: &[MeshRecord]) -> Result<(), AssetError> {
    let file = File::create(path).map_err(|e| AssetError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    codec::encode(meshes, &mut writer)
        .map_err(|e| AssetError::CacheWrite(path.to_path_buf(), e))?;
    writer.flush().map_err(|e| AssetError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Vertex;

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
    fn paths_next_to_source() {
        let paths = CachePaths::for_source(Path::new("/game/models/sphere.asset"), None);
        assert_eq!(paths.bin, PathBuf::from("/game/models/sphere/sphere.bin"));
        assert_eq!(
            paths.manifest,
            PathBuf::from("/game/models/sphere/sphere.meta.toml")
        );
    }

    #[test]
    fn paths_under_cache_root() {
        let paths = CachePaths::for_source(
            Path::new("/game/models/sphere.asset"),
            Some(Path::new("/cache")),
        );
        assert_eq!(paths.bin, PathBuf::from("/cache/sphere/sphere.bin"));
    }

    #[test]
    fn store_then_lookup_hits() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.glb");
        fs::write(&source, b"source").unwrap();
        let paths = CachePaths::for_source(&source, None);

        let mesh = triangle().with_textures(vec![
            TextureRef::Path(dir.path().join("albedo.png")),
            TextureRef::Embedded {
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            },
        ]);
        store(&paths, &source, &[mesh]).unwrap();
        assert!(paths.bin.exists());
        assert_eq!(fs::read_dir(&paths.dir).unwrap().count(), 2);

        match lookup(&paths, &source, true) {
            CacheLookup::Hit(meshes) => {
                assert_eq!(meshes.len(), 1);
                assert_eq!(meshes[0].vertices, triangle().vertices);
                // Only path references survive the cache.
                assert_eq!(
                    meshes[0].textures,
                    vec![TextureRef::Path(dir.path().join("albedo.png"))]
                );
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn missing_cache() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("none.glb");
        let paths = CachePaths::for_source(&source, None);
        assert!(matches!(lookup(&paths, &source, true), CacheLookup::Missing));
    }

    #[test]
    fn changed_source_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.glb");
        fs::write(&source, b"source").unwrap();
        let paths = CachePaths::for_source(&source, None);
        store(&paths, &source, &[triangle()]).unwrap();

        let mut manifest = CacheManifest::load(&paths.manifest).unwrap();
        manifest.source_modified = Some(SourceStamp { secs: 1, nanos: 0 });
        fs::write(&paths.manifest, toml::to_string(&manifest).unwrap()).unwrap();

        assert!(matches!(lookup(&paths, &source, true), CacheLookup::Stale));
        assert!(matches!(lookup(&paths, &source, false), CacheLookup::Hit(_)));
    }

    #[test]
    fn truncated_cache_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.glb");
        fs::write(&source, b"source").unwrap();
        let paths = CachePaths::for_source(&source, None);
        store(&paths, &source, &[triangle()]).unwrap();

        let bytes = fs::read(&paths.bin).unwrap();
        fs::write(&paths.bin, &bytes[..4]).unwrap();

        assert!(matches!(
            lookup(&paths, &source, true),
            CacheLookup::Corrupt(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn freshness_rules() {
        let stamp = SourceStamp { secs: 10, nanos: 5 };
        let manifest = CacheManifest {
            source: None,
            source_modified: Some(stamp),
            meshes: Vec::new(),
        };
        assert!(manifest.is_fresh(Some(stamp)));
        assert!(!manifest.is_fresh(Some(SourceStamp { secs: 11, nanos: 5 })));
        assert!(manifest.is_fresh(None));
        assert!(CacheManifest::default().is_fresh(Some(stamp)));
    }

    #[test]
    fn same_stem_sources_do_not_share_a_cache() {
        let dir = tempfile::tempdir().unwrap();
        let glb = dir.path().join("sphere.glb");
        let gltf = dir.path().join("sphere.gltf");
        fs::write(&glb, b"binary").unwrap();
        fs::write(&gltf, b"json").unwrap();
        let paths = CachePaths::for_source(&glb, None);
        assert_eq!(paths, CachePaths::for_source(&gltf, None));

        store(&paths, &glb, &[triangle()]).unwrap();
        assert!(matches!(lookup(&paths, &gltf, true), CacheLookup::Stale));
        assert!(matches!(lookup(&paths, &gltf, false), CacheLookup::Stale));
        assert!(matches!(lookup(&paths, &glb, true), CacheLookup::Hit(_)));

        store(&paths, &gltf, &[triangle(), triangle()]).unwrap();
        assert!(matches!(lookup(&paths, &glb, true), CacheLookup::Stale));
        match lookup(&paths, &gltf, true) {
            CacheLookup::Hit(meshes) => assert_eq!(meshes.len(), 2),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn temp_names_differ_per_source() {
        let bin = Path::new("/cache/sphere/sphere.bin");
        let a = temp_path(bin, Path::new("/models/sphere.glb"));
        let b = temp_path(bin, Path::new("/models/sphere.gltf"));
        assert_ne!(a, b);
        assert_eq!(a.parent(), bin.parent());
        assert!(a.to_string_lossy().ends_with(".tmp"));
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("sphere.bin."));
    }

    #[test]
    fn zero_mesh_cache_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.glb");
        fs::write(&source, b"source").unwrap();
        let paths = CachePaths::for_source(&source, None);
        fs::create_dir_all(&paths.dir).unwrap();
        fs::write(&paths.bin, 0u64.to_ne_bytes()).unwrap();

        assert!(matches!(
            lookup(&paths, &source, true),
            CacheLookup::Corrupt(CodecError::NoMeshes)
        ));
    }

    #[test]
    fn write_failure_is_not_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tri.glb");
        let paths = CachePaths::for_source(&source, None);

        let err = store(&paths, &source, &[MeshRecord::default()]).unwrap_err();
        assert!(matches!(err, AssetError::CacheWrite(_, CodecError::EmptyMesh(0))));
        assert!(!paths.bin.exists());
        assert_eq!(fs::read_dir(&paths.dir).unwrap().count(), 0);
    }
}
