use std::path::Path;

use kiln_core::Vertex;
use tracing::debug;

use crate::error::AssetError;
use crate::mesh::{MeshRecord, TextureRef};

/// Turns a source asset file into mesh records.
///
/// Called on loader threads, so implementations must be thread-safe. The
/// loader only calls this on a cache miss.
pub trait SceneParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<MeshRecord>, AssetError>;
}

/// glTF 2.0 (.gltf / .glb) parser. Each primitive becomes one mesh.
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfParser;

impl SceneParser for GltfParser {
    fn parse(&self, path: &Path) -> Result<Vec<MeshRecord>, AssetError> {
        if !path.exists() {
            return Err(AssetError::NotFound(path.to_path_buf()));
        }

        let (document, buffers, images) = gltf::import(path)
            .map_err(|e| AssetError::ParseFailed(path.to_path_buf(), e.to_string()))?;
        let model_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut meshes = Vec::new();

        for mesh in document.meshes() {
            let name = mesh.name().unwrap_or("unnamed");

            for primitive in mesh.primitives() {
                let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

                let Some(positions) = reader.read_positions() else {
                    debug!("Skipping primitive without positions in mesh '{}'", name);
                    continue;
                };
                let positions: Vec<[f32; 3]> = positions.collect();

                let normals: Vec<[f32; 3]> = reader
                    .read_normals()
                    .map(|iter| iter.collect())
                    .unwrap_or_default();

                let tex_coords: Vec<[f32; 2]> = reader
                    .read_tex_coords(0)
                    .map(|tc| tc.into_f32().collect())
                    .unwrap_or_default();

                let vertices = positions
                    .iter()
                    .enumerate()
                    .map(|(i, &position)| {
                        Vertex::new(
                            position,
                            normals.get(i).copied().unwrap_or([0.0; 3]),
                            tex_coords.get(i).copied().unwrap_or([0.0; 2]),
                        )
                    })
                    .collect::<Vec<_>>();

                let indices: Vec<u32> = match reader.read_indices() {
                    Some(idx) => idx.into_u32().collect(),
                    None => (0..vertices.len() as u32).collect(),
                };

                let textures = base_color_texture(&primitive, &images, model_dir)
                    .into_iter()
                    .collect();

                meshes.push(MeshRecord::new(vertices, indices).with_textures(textures));
            }
        }

        debug!("glTF '{}': {} meshes", path.display(), meshes.len());
        Ok(meshes)
    }
}

/// Base color texture of a primitive's material, if any.
fn base_color_texture(
    primitive: &gltf::Primitive<'_>,
    images: &[gltf::image::Data],
    model_dir: &Path,
) -> Option<TextureRef> {
    let info = primitive
        .material()
        .pbr_metallic_roughness()
        .base_color_texture()?;
    let image = info.texture().source();

    match image.source() {
        gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => {
            Some(TextureRef::Path(model_dir.join(uri)))
        }
        _ => images.get(image.index()).and_then(embedded_rgba),
    }
}

/// Convert decoded glTF image data to an RGBA8 embedded texture.
fn embedded_rgba(data: &gltf::image::Data) -> Option<TextureRef> {
    let (width, height) = (data.width, data.height);
    let pixels = match data.format {
        gltf::image::Format::R8G8B8A8 => data.pixels.clone(),
        gltf::image::Format::R8G8B8 => {
            let mut rgba = Vec::with_capacity(data.pixels.len() / 3 * 4);
            for chunk in data.pixels.chunks(3) {
                rgba.extend_from_slice(chunk);
                rgba.push(255);
            }
            rgba
        }
        _ => {
            debug!("Skipping embedded texture with unsupported format {:?}", data.format);
            return None;
        }
    };

    Some(TextureRef::Embedded {
        width,
        height,
        pixels,
    })
}
