//! Binary mesh cache encoding
//!
//! Layout, with every count a native-endian `u64`:
//!
//! ```text
//! [mesh_count]
//! repeated mesh_count times:
//!     [vertex_count][vertex_count * size_of::<Vertex>() bytes]
//!     [index_count][index_count * 4 bytes]
//! ```
//!
//! No magic number, version, or checksum. Texture references are not part of
//! the format. Decoding checks every count against the bytes that remain, so
//! a truncated or garbled file is reported as a [`CodecError`] instead of
//! producing a bogus mesh.

use std::io::Write;
use std::sync::Arc;

use kiln_core::Vertex;

use crate::mesh::MeshRecord;

const COUNT_SIZE: usize = std::mem::size_of::<u64>();
const INDEX_SIZE: usize = std::mem::size_of::<u32>();

/// Smallest possible encoded mesh: two counts, one vertex, one index.
const MIN_MESH_SIZE: usize = 2 * COUNT_SIZE + Vertex::SIZE + INDEX_SIZE;

/// Errors produced while encoding or decoding the mesh cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("truncated at byte {offset}: needed {needed} bytes, {remaining} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("mesh {0} has no vertices or no indices")]
    EmptyMesh(usize),

    #[error("mesh {mesh} index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        mesh: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("cache holds no meshes")]
    NoMeshes,

    #[error("{0} unexpected bytes after the last mesh")]
    TrailingBytes(usize),

    #[error("count {0} does not fit in memory")]
    Overflow(u64),

    #[error("write failed: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Io(Arc::new(err))
    }
}

/// Write `meshes` to `sink`. Every mesh must be usable.
pub fn encode<W: Write>(meshes: &[MeshRecord], sink: &mut W) -> Result<(), CodecError> {
    for (i, mesh) in meshes.iter().enumerate() {
        validate(i, mesh)?;
    }

    write_count(sink, meshes.len())?;
    for mesh in meshes {
        write_count(sink, mesh.vertices.len())?;
        sink.write_all(bytemuck::cast_slice(&mesh.vertices))?;
        write_count(sink, mesh.indices.len())?;
        sink.write_all(bytemuck::cast_slice(&mesh.indices))?;
    }
    Ok(())
}

/// Encode into a fresh buffer.
pub fn encode_to_vec(meshes: &[MeshRecord]) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::with_capacity(encoded_len(meshes));
    encode(meshes, &mut bytes)?;
    Ok(bytes)
}

/// Exact number of bytes `encode` writes for `meshes`.
pub fn encoded_len(meshes: &[MeshRecord]) -> usize {
    COUNT_SIZE
        + meshes
            .iter()
            .map(|m| {
                2 * COUNT_SIZE + m.vertices.len() * Vertex::SIZE + m.indices.len() * INDEX_SIZE
            })
            .sum::<usize>()
}

/// Decode a complete cache buffer. Texture lists come back empty.
pub fn decode(bytes: &[u8]) -> Result<Vec<MeshRecord>, CodecError> {
    let mut reader = Reader::new(bytes);

    let mesh_count = reader.read_count()?;
    // A garbage count must not turn into a giant allocation.
    let mut meshes = Vec::with_capacity(mesh_count.min(reader.remaining() / MIN_MESH_SIZE));

    for i in 0..mesh_count {
        let vertex_count = reader.read_count()?;
        let vertex_bytes = reader.take_array(vertex_count, Vertex::SIZE)?;
        let mut vertices = vec![Vertex::default(); vertex_count];
        bytemuck::cast_slice_mut::<Vertex, u8>(&mut vertices).copy_from_slice(vertex_bytes);

        let index_count = reader.read_count()?;
        let index_bytes = reader.take_array(index_count, INDEX_SIZE)?;
        let mut indices = vec![0u32; index_count];
        bytemuck::cast_slice_mut::<u32, u8>(&mut indices).copy_from_slice(index_bytes);

        let mesh = MeshRecord::new(vertices, indices);
        validate(i, &mesh)?;
        meshes.push(mesh);
    }

    if reader.remaining() > 0 {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }

    Ok(meshes)
}

fn validate(i: usize, mesh: &MeshRecord) -> Result<(), CodecError> {
    if !mesh.is_usable() {
        return Err(CodecError::EmptyMesh(i));
    }
    if let Some(index) = mesh.out_of_range_index() {
        return Err(CodecError::IndexOutOfRange {
            mesh: i,
            index,
            vertex_count: mesh.vertices.len(),
        });
    }
    Ok(())
}

fn write_count<W: Write>(sink: &mut W, count: usize) -> Result<(), CodecError> {
    sink.write_all(&(count as u64).to_ne_bytes())?;
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_count(&mut self) -> Result<usize, CodecError> {
        let mut raw = [0u8; COUNT_SIZE];
        raw.copy_from_slice(self.take(COUNT_SIZE)?);
        let count = u64::from_ne_bytes(raw);
        usize::try_from(count).map_err(|_| CodecError::Overflow(count))
    }

    /// Take `count` elements of `size` bytes each.
    fn take_array(&mut self, count: usize, size: usize) -> Result<&'a [u8], CodecError> {
        let len = count
            .checked_mul(size)
            .ok_or(CodecError::Overflow(count as u64))?;
        self.take(len)
    }
}
