use bytemuck::{Pod, Zeroable};

use crate::backend::{Backend, BufferId, Geometry, ResourceScope};
use crate::error::SimResult;

/// Interleaved mesh vertex matching the ambient stage's stream layout.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Indexed triangle mesh resident in backend buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mesh {
    vertices: BufferId,
    indices: BufferId,
    index_count: u32,
}

impl Mesh {
    pub fn upload<B: Backend + ?Sized>(
        backend: &mut B,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> SimResult<Self> {
        let mut scope = ResourceScope::new(backend);
        let vertex_buffer = scope.create_vertex_buffer(bytemuck::cast_slice(vertices))?;
        let index_buffer = scope.create_index_buffer(indices)?;
        scope.commit();
        Ok(Self {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::Mesh {
            vertices: self.vertices,
            indices: self.indices,
            index_count: self.index_count,
        }
    }

    pub fn release<B: Backend + ?Sized>(self, backend: &mut B) {
        backend.delete_buffer(self.vertices);
        backend.delete_buffer(self.indices);
    }
}

/// Square floor at `y = 0` spanning `[-half_extent, half_extent]` in x and z,
/// facing up.
pub fn ground_plane(half_extent: f32) -> (Vec<MeshVertex>, Vec<u32>) {
    let h = half_extent;
    let corner = |x: f32, z: f32, u: f32, v: f32| MeshVertex {
        position: [x, 0.0, z],
        normal: [0.0, 1.0, 0.0],
        uv: [u, v],
    };
    let vertices = vec![
        corner(-h, -h, 0.0, 0.0),
        corner(h, -h, 1.0, 0.0),
        corner(h, h, 1.0, 1.0),
        corner(-h, h, 0.0, 1.0),
    ];
    (vertices, vec![0, 2, 1, 0, 3, 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::stages::MESH_LAYOUT;

    #[test]
    fn vertex_matches_stream_stride() {
        assert_eq!(std::mem::size_of::<MeshVertex>() as u32, MESH_LAYOUT.stride);
    }

    #[test]
    fn ground_plane_faces_up() {
        let (vertices, indices) = ground_plane(1.0);
        assert_eq!(vertices.len(), 4);
        assert_eq!(indices.len(), 6);
        assert!(vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0] && v.position[1] == 0.0));
    }

    #[test]
    fn upload_and_release() {
        let mut gpu = SoftwareBackend::new();
        let (vertices, indices) = ground_plane(1.0);
        let mesh = Mesh::upload(&mut gpu, &vertices, &indices).unwrap();
        assert_eq!(mesh.index_count(), 6);
        assert_eq!(gpu.live_resources(), 2);
        mesh.release(&mut gpu);
        assert_eq!(gpu.live_resources(), 0);
    }
}
