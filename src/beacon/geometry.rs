use log::debug;

use crate::beacon::buffer::{self, DeviceBuffer};
use crate::beacon::device::ComputeDevice;
use crate::beacon::registry::SceneRegistry;
use crate::beacon::scene::{MeshInstance, Vertex, INDEX_STRIDE, VERTEX_STRIDE};
use crate::error::Result;

/// Device side copies of the consolidated mesh data.
pub struct GeometryBuffers<B> {
    pub mesh_instances: Option<DeviceBuffer<B>>,
    pub vertices: Option<DeviceBuffer<B>>,
    pub indices: Option<DeviceBuffer<B>>,
}

impl<B> Default for GeometryBuffers<B> {
    fn default() -> Self {
        Self {
            mesh_instances: None,
            vertices: None,
            indices: None,
        }
    }
}

impl<B> GeometryBuffers<B> {
    pub fn mesh_count(&self) -> u32 {
        self.mesh_instances
            .as_ref()
            .map_or(0, |buffer| buffer.count() as u32)
    }

    pub fn release<D: ComputeDevice<Buffer = B>>(&mut self, device: &mut D) {
        buffer::release(device, &mut self.mesh_instances);
        buffer::release(device, &mut self.vertices);
        buffer::release(device, &mut self.indices);
    }
}

/// Flattens every registered mesh into one instance list, one vertex list and one index list.
#[derive(Default)]
pub struct GeometryBuilder {
    instances: Vec<MeshInstance>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds and uploads everything if the registry changed. Returns whether a rebuild ran.
    ///
    /// A failed upload re-arms the registry so the next frame tries again.
    pub fn rebuild<D: ComputeDevice>(
        &mut self,
        registry: &mut SceneRegistry,
        device: &mut D,
        buffers: &mut GeometryBuffers<D::Buffer>,
    ) -> Result<bool> {
        if !registry.take_dirty() {
            return Ok(false);
        }

        self.flatten(registry);

        if let Err(error) = self.upload(device, buffers) {
            registry.mark_dirty();
            return Err(error);
        }

        debug!(
            "rebuilt geometry: {} objects, {} vertices, {} indices",
            self.instances.len(),
            self.vertices.len(),
            self.indices.len()
        );
        Ok(true)
    }

    fn flatten(&mut self, registry: &SceneRegistry) {
        self.instances.clear();
        self.vertices.clear();
        self.indices.clear();

        for object in registry.iter() {
            let mesh = object.mesh();

            // Local indices become global once shifted past the vertices already appended
            let first_vertex = self.vertices.len() as u32;
            self.vertices
                .extend(mesh.vertices.iter().map(|vertex| [vertex.x, vertex.y, vertex.z]));

            let first_index = self.indices.len() as u32;
            self.indices
                .extend(mesh.indices.iter().map(|index| first_vertex + index));

            self.instances.push(MeshInstance {
                local_to_world: object.local_to_world().into(),
                indices_offset: first_index,
                indices_count: mesh.indices.len() as u32,
            });
        }
    }

    fn upload<D: ComputeDevice>(
        &self,
        device: &mut D,
        buffers: &mut GeometryBuffers<D::Buffer>,
    ) -> Result<()> {
        buffer::sync(
            device,
            &mut buffers.mesh_instances,
            &self.instances,
            MeshInstance::STRIDE,
            "mesh instances",
        )?;
        buffer::sync(device, &mut buffers.vertices, &self.vertices, VERTEX_STRIDE, "vertices")?;
        buffer::sync(device, &mut buffers.indices, &self.indices, INDEX_STRIDE, "indices")
    }

    pub fn instances(&self) -> &[MeshInstance] {
        &self.instances
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use bytemuck::cast_slice;
    use nalgebra::{Matrix4, Vector3};

    use super::*;
    use crate::beacon::host::{HostBuffer, HostDevice, HostStats};
    use crate::beacon::registry::TraceableHandle;
    use crate::beacon::scene::{Mesh, TracedMesh};

    fn quad() -> Mesh {
        Mesh::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn triangle() -> Mesh {
        Mesh::new(
            vec![
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(1.0, 0.0, 1.0),
                Vector3::new(0.0, 1.0, 1.0),
            ],
            vec![0, 1, 2],
        )
    }

    fn traced(mesh: Mesh, x: f32) -> TraceableHandle {
        Rc::new(TracedMesh::new(
            mesh,
            Matrix4::new_translation(&Vector3::new(x, 0.0, 0.0)),
        ))
    }

    fn build(
        registry: &mut SceneRegistry,
        device: &mut HostDevice,
    ) -> (GeometryBuilder, GeometryBuffers<HostBuffer>) {
        let mut builder = GeometryBuilder::new();
        let mut buffers = GeometryBuffers::default();
        assert!(builder.rebuild(registry, device, &mut buffers).unwrap());
        (builder, buffers)
    }

    #[test]
    fn clean_registry_is_a_no_op() {
        let mut registry = SceneRegistry::new();
        let mut device = HostDevice::new();
        let mut builder = GeometryBuilder::new();
        let mut buffers = GeometryBuffers::default();

        assert!(!builder.rebuild(&mut registry, &mut device, &mut buffers).unwrap());
        assert_eq!(device.stats(), HostStats::default());
    }

    #[test]
    fn second_mesh_indices_are_offset() {
        let mut registry = SceneRegistry::new();
        registry.register(traced(quad(), 0.0));
        registry.register(traced(triangle(), 5.0));
        let mut device = HostDevice::new();
        let (builder, buffers) = build(&mut registry, &mut device);

        assert_eq!(builder.vertices().len(), 7);
        assert_eq!(builder.indices(), &[0, 1, 2, 0, 2, 3, 4, 5, 6]);

        let instances = builder.instances();
        assert_eq!((instances[0].indices_offset, instances[0].indices_count), (0, 6));
        assert_eq!((instances[1].indices_offset, instances[1].indices_count), (6, 3));
        assert_eq!(instances[1].local_to_world[3][0], 5.0);

        let uploaded = device.buffer_contents(buffers.indices.as_ref().unwrap().raw());
        assert_eq!(uploaded, cast_slice::<u32, u8>(builder.indices()));
        assert_eq!(buffers.mesh_count(), 2);
    }

    #[test]
    fn every_index_resolves_and_ranges_tile_the_buffer() {
        let mut registry = SceneRegistry::new();
        for i in 0..4 {
            let mesh = if i % 2 == 0 { Mesh::cube(1.0) } else { triangle() };
            registry.register(traced(mesh, i as f32));
        }
        let mut device = HostDevice::new();
        let (builder, _) = build(&mut registry, &mut device);

        let vertex_count = builder.vertices().len() as u32;
        assert!(builder.indices().iter().all(|&index| index < vertex_count));

        let mut expected_offset = 0;
        for instance in builder.instances() {
            assert_eq!(instance.indices_offset, expected_offset);
            expected_offset += instance.indices_count;
        }
        assert_eq!(expected_offset as usize, builder.indices().len());
    }

    #[test]
    fn empty_mesh_contributes_zero_length_range() {
        let mut registry = SceneRegistry::new();
        registry.register(traced(Mesh::default(), 0.0));
        registry.register(traced(triangle(), 1.0));
        let mut device = HostDevice::new();
        let (builder, _) = build(&mut registry, &mut device);

        assert_eq!(builder.instances()[0].indices_count, 0);
        assert_eq!(builder.instances()[1].indices_offset, 0);
        assert_eq!(builder.indices(), &[0, 1, 2]);
    }

    #[test]
    fn unchanged_rebuild_reuses_allocations() {
        let mut registry = SceneRegistry::new();
        let object = traced(quad(), 0.0);
        registry.register(object.clone());
        let mut device = HostDevice::new();
        let (mut builder, mut buffers) = build(&mut registry, &mut device);

        let contents = |device: &HostDevice, buffers: &GeometryBuffers<HostBuffer>| {
            [&buffers.mesh_instances, &buffers.vertices, &buffers.indices]
                .map(|slot| device.buffer_contents(slot.as_ref().unwrap().raw()).to_vec())
        };
        let first = contents(&device, &buffers);
        let created = device.stats().buffers_created;

        // Same membership, forced through the dirty path
        registry.register(object);
        assert!(builder.rebuild(&mut registry, &mut device, &mut buffers).unwrap());

        assert_eq!(device.stats().buffers_created, created);
        assert_eq!(device.stats().buffers_released, 0);
        assert_eq!(contents(&device, &buffers), first);
    }

    #[test]
    fn emptied_registry_releases_buffers() {
        let mut registry = SceneRegistry::new();
        let object = traced(quad(), 0.0);
        registry.register(object.clone());
        let mut device = HostDevice::new();
        let (mut builder, mut buffers) = build(&mut registry, &mut device);

        registry.unregister(&object);
        assert!(builder.rebuild(&mut registry, &mut device, &mut buffers).unwrap());

        assert!(buffers.mesh_instances.is_none());
        assert!(buffers.vertices.is_none());
        assert!(buffers.indices.is_none());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn failed_upload_keeps_registry_dirty() {
        let mut registry = SceneRegistry::new();
        registry.register(traced(Mesh::cube(1.0), 0.0));
        let mut device = HostDevice::new().with_memory_limit(16);
        let mut builder = GeometryBuilder::new();
        let mut buffers = GeometryBuffers::default();

        assert!(builder.rebuild(&mut registry, &mut device, &mut buffers).is_err());
        assert!(registry.is_dirty());
    }
}
