//! Compute device seam.
//!
//! The render loop only talks to the device through [`ComputeDevice`], so the same loop drives
//! the wgpu backend in the application and the CPU backend in tests.

use bytemuck::{Pod, Zeroable};
use winit::dpi::PhysicalSize;

use crate::error::Result;

/// Edge length of the square thread tile the kernel runs per workgroup.
pub const TILE_SIZE: u32 = 8;

/// Uniform block handed to the kernel every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub camera_to_world: [[f32; 4]; 4],
    pub camera_inverse_projection: [[f32; 4]; 4],
    /// xyz = light forward, w = intensity.
    pub directional_light: [f32; 4],
    /// Sub-pixel jitter in [0, 1).
    pub pixel_offset: [f32; 2],
    pub seed: f32,
    pub sphere_count: u32,
    pub mesh_count: u32,
    pub _padding: [u32; 3],
}

/// Scene buffers bound for a dispatch. `None` means the buffer is absent.
pub struct KernelInputs<'a, B> {
    pub spheres: Option<&'a B>,
    pub mesh_instances: Option<&'a B>,
    pub vertices: Option<&'a B>,
    pub indices: Option<&'a B>,
}

/// Number of workgroups needed to cover `size` with [`TILE_SIZE`] tiles.
pub fn workgroups(size: PhysicalSize<u32>) -> (u32, u32) {
    (
        (size.width + TILE_SIZE - 1) / TILE_SIZE,
        (size.height + TILE_SIZE - 1) / TILE_SIZE,
    )
}

pub trait ComputeDevice {
    type Buffer;
    type Image;
    /// Where [`ComputeDevice::present`] writes the final image.
    type Target;

    fn create_buffer(&mut self, label: &str, size: u64) -> Result<Self::Buffer>;
    fn write_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]);
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Float RGBA image usable as kernel output, blend source and blend destination.
    fn create_image(&mut self, label: &str, size: PhysicalSize<u32>) -> Result<Self::Image>;
    fn release_image(&mut self, image: Self::Image);
    fn image_size(&self, image: &Self::Image) -> PhysicalSize<u32>;

    fn dispatch(
        &mut self,
        params: &KernelParams,
        inputs: KernelInputs<'_, Self::Buffer>,
        output: &Self::Image,
        groups: (u32, u32),
    ) -> Result<()>;

    /// `accumulation = lerp(accumulation, source, weight)`
    fn blend(&mut self, source: &Self::Image, accumulation: &Self::Image, weight: f32) -> Result<()>;

    fn present(&mut self, image: &Self::Image, target: &mut Self::Target) -> Result<()>;

    /// Hands everything recorded since the last call to the device, in recording order.
    fn submit(&mut self);
}
