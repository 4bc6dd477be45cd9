use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Vector3};

/// Sphere as the kernel reads it: 14 tightly packed floats.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Sphere {
    pub position: [f32; 3],
    pub radius: f32,
    pub albedo: [f32; 3],
    pub specular: [f32; 3],
    pub smoothness: f32,
    pub emission: [f32; 3],
}

impl Sphere {
    pub const STRIDE: usize = size_of::<Self>();

    pub fn center(&self) -> Vector3<f32> {
        Vector3::from(self.position)
    }

    pub fn overlaps(&self, other: &Sphere) -> bool {
        let min_distance = self.radius + other.radius;
        (self.center() - other.center()).magnitude_squared() < min_distance * min_distance
    }

    pub fn is_emissive(&self) -> bool {
        self.emission.iter().any(|channel| *channel > 0.0)
    }
}

/// Per-object entry of the mesh instance buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshInstance {
    /// Column-major local-to-world transform.
    pub local_to_world: [[f32; 4]; 4],
    /// First slot of this instance in the global index buffer.
    pub indices_offset: u32,
    pub indices_count: u32,
}

impl MeshInstance {
    pub const STRIDE: usize = size_of::<Self>();
}

pub type Vertex = [f32; 3];
pub const VERTEX_STRIDE: usize = size_of::<Vertex>();
pub const INDEX_STRIDE: usize = size_of::<u32>();

/// Triangle mesh in object space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vector3<f32>>,
    /// Triangle list, three indices per triangle, local to `vertices`.
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vector3<f32>>, indices: Vec<u32>) -> Self {
        debug_assert_eq!(indices.len() % 3, 0);
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis aligned cube centered on the origin, 8 shared corners, outward winding.
    pub fn cube(half_extent: f32) -> Self {
        let h = half_extent;
        let vertices = vec![
            Vector3::new(-h, -h, -h),
            Vector3::new(h, -h, -h),
            Vector3::new(h, h, -h),
            Vector3::new(-h, h, -h),
            Vector3::new(-h, -h, h),
            Vector3::new(h, -h, h),
            Vector3::new(h, h, h),
            Vector3::new(-h, h, h),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 0, 3, 2, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 1, 5, 0, 5, 4, // -y
            3, 7, 6, 3, 6, 2, // +y
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
        ];
        Self::new(vertices, indices)
    }
}

/// Anything that contributes triangles to the traced scene.
pub trait Traceable {
    fn mesh(&self) -> &Mesh;
    fn local_to_world(&self) -> Matrix4<f32>;
}

/// A mesh placed in the world with a fixed transform.
pub struct TracedMesh {
    pub mesh: Mesh,
    pub transform: Matrix4<f32>,
}

impl TracedMesh {
    pub fn new(mesh: Mesh, transform: Matrix4<f32>) -> Self {
        Self { mesh, transform }
    }
}

impl Traceable for TracedMesh {
    fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn local_to_world(&self) -> Matrix4<f32> {
        self.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_strides() {
        assert_eq!(Sphere::STRIDE, 56);
        assert_eq!(MeshInstance::STRIDE, 72);
        assert_eq!(VERTEX_STRIDE, 12);
        assert_eq!(INDEX_STRIDE, 4);
    }

    #[test]
    fn touching_spheres_do_not_overlap() {
        let a = Sphere {
            position: [0.0, 1.0, 0.0],
            radius: 1.0,
            ..Zeroable::zeroed()
        };
        let b = Sphere {
            position: [2.0, 1.0, 0.0],
            ..a
        };
        let c = Sphere {
            position: [1.5, 1.0, 0.0],
            ..a
        };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn cube_indices_are_local() {
        let cube = Mesh::cube(0.5);
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
    }
}
