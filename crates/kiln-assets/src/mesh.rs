use std::path::{Path, PathBuf};

use kiln_core::Vertex;

/// A texture referenced by a mesh's material.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureRef {
    /// Image file on disk, already resolved against the model's directory.
    Path(PathBuf),
    /// Image data embedded in the source asset, decoded to RGBA8.
    Embedded {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

impl TextureRef {
    /// The on-disk path, if this reference points at a file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            TextureRef::Path(path) => Some(path),
            TextureRef::Embedded { .. } => None,
        }
    }
}

/// Vertex, index, and texture data for one drawable mesh.
///
/// A mesh with no vertices or no indices is never handed to the renderer;
/// loaders drop such meshes before building a [`ModelRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshRecord {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<TextureRef>,
}

impl MeshRecord {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            textures: Vec::new(),
        }
    }

    pub fn with_textures(mut self, textures: Vec<TextureRef>) -> Self {
        self.textures = textures;
        self
    }

    /// Both the vertex and the index arrays are non-empty.
    pub fn is_usable(&self) -> bool {
        !self.vertices.is_empty() && !self.indices.is_empty()
    }

    /// First index that points past the end of the vertex array, if any.
    pub fn out_of_range_index(&self) -> Option<u32> {
        let len = self.vertices.len();
        self.indices.iter().copied().find(|&i| i as usize >= len)
    }

    /// Number of triangles, assuming a triangle list.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Where a model's mesh data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Decoded from the binary mesh cache.
    Cache,
    /// Parsed from the source asset.
    Parsed,
}

/// A loaded model: its meshes plus the canonical path they were loaded from.
///
/// Built empty, filled once on a loader thread, then shared read-only through
/// the [`AssetStore`](crate::AssetStore). There is no way to mutate a record
/// once it has been handed out.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    path: PathBuf,
    meshes: Vec<MeshRecord>,
    loaded: bool,
    source: LoadSource,
}

impl ModelRecord {
    /// An empty, not-yet-loaded record for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            meshes: Vec::new(),
            loaded: false,
            source: LoadSource::Parsed,
        }
    }

    /// The single mutation point: install the meshes and mark loaded.
    pub(crate) fn populate(&mut self, meshes: Vec<MeshRecord>, source: LoadSource) {
        self.meshes = meshes;
        self.source = source;
        self.loaded = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem of the source path.
    pub fn name(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed")
    }

    pub fn meshes(&self) -> &[MeshRecord] {
        &self.meshes
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn source(&self) -> LoadSource {
        self.source
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Total vertices across all meshes.
    pub fn vertex_count(&self) -> usize {
        self.meshes.iter().map(|m| m.vertices.len()).sum()
    }

    /// Total indices across all meshes.
    pub fn index_count(&self) -> usize {
        self.meshes.iter().map(|m| m.indices.len()).sum()
    }
}
