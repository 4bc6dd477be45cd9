//! CPU implementation of [`ComputeDevice`].
//!
//! Runs a caller supplied per-pixel kernel with rayon and keeps counters of every device
//! operation, which makes it the backend for headless runs and tests.

use rayon::prelude::*;
use winit::dpi::PhysicalSize;

use crate::beacon::device::{ComputeDevice, KernelInputs, KernelParams, TILE_SIZE};
use crate::error::{Error, Result};

pub type HostKernel = Box<dyn Fn(&KernelParams, u32, u32) -> [f32; 4] + Send + Sync>;

pub struct HostBuffer(usize);

pub struct HostImage(usize);

/// Final image received by [`ComputeDevice::present`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostFrame {
    pub size: PhysicalSize<u32>,
    pub pixels: Vec<[f32; 4]>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub buffers_created: usize,
    pub buffers_released: usize,
    pub buffer_writes: usize,
    pub images_created: usize,
    pub images_released: usize,
    pub dispatches: usize,
    pub blends: usize,
    pub presents: usize,
    pub submits: usize,
}

/// What the last dispatch saw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchRecord {
    pub params: KernelParams,
    pub groups: (u32, u32),
    /// Presence of spheres, mesh instances, vertices, indices.
    pub bound: [bool; 4],
}

struct ImageData {
    size: PhysicalSize<u32>,
    pixels: Vec<[f32; 4]>,
}

pub struct HostDevice {
    buffers: Vec<Option<Vec<u8>>>,
    images: Vec<Option<ImageData>>,
    kernel: HostKernel,
    memory_limit: Option<u64>,
    allocated: u64,
    stats: HostStats,
    last_dispatch: Option<DispatchRecord>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            buffers: vec![],
            images: vec![],
            kernel: Box::new(|_, _, _| [0.0, 0.0, 0.0, 1.0]),
            memory_limit: None,
            allocated: 0,
            stats: HostStats::default(),
            last_dispatch: None,
        }
    }

    pub fn with_kernel<F>(mut self, kernel: F) -> Self
    where
        F: Fn(&KernelParams, u32, u32) -> [f32; 4] + Send + Sync + 'static,
    {
        self.kernel = Box::new(kernel);
        self
    }

    /// Fails allocations once `bytes` are live.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    pub fn live_images(&self) -> usize {
        self.images.iter().flatten().count()
    }

    pub fn buffer_contents(&self, buffer: &HostBuffer) -> &[u8] {
        self.buffers[buffer.0].as_deref().unwrap_or_default()
    }

    pub fn image_pixels(&self, image: &HostImage) -> &[[f32; 4]] {
        self.images[image.0]
            .as_ref()
            .map(|image| image.pixels.as_slice())
            .unwrap_or_default()
    }

    fn reserve(&mut self, label: &str, size: u64) -> Result<()> {
        if let Some(limit) = self.memory_limit {
            if self.allocated + size > limit {
                return Err(Error::Allocation {
                    label: label.to_owned(),
                    size,
                    reason: format!("{} of {} bytes already in use", self.allocated, limit),
                });
            }
        }
        self.allocated += size;
        Ok(())
    }

    fn image(&self, image: &HostImage) -> Result<&ImageData> {
        self.images
            .get(image.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Dispatch(format!("image #{} was released", image.0)))
    }
}

impl ComputeDevice for HostDevice {
    type Buffer = HostBuffer;
    type Image = HostImage;
    type Target = HostFrame;

    fn create_buffer(&mut self, label: &str, size: u64) -> Result<HostBuffer> {
        self.reserve(label, size)?;
        self.buffers.push(Some(vec![0; size as usize]));
        self.stats.buffers_created += 1;
        Ok(HostBuffer(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buffer: &HostBuffer, bytes: &[u8]) {
        if let Some(Some(data)) = self.buffers.get_mut(buffer.0) {
            data[..bytes.len()].copy_from_slice(bytes);
            self.stats.buffer_writes += 1;
        }
    }

    fn release_buffer(&mut self, buffer: HostBuffer) {
        if let Some(data) = self.buffers[buffer.0].take() {
            self.allocated -= data.len() as u64;
            self.stats.buffers_released += 1;
        }
    }

    fn create_image(&mut self, label: &str, size: PhysicalSize<u32>) -> Result<HostImage> {
        let pixel_count = size.width as usize * size.height as usize;
        self.reserve(label, (pixel_count * std::mem::size_of::<[f32; 4]>()) as u64)?;
        self.images.push(Some(ImageData {
            size,
            pixels: vec![[0.0; 4]; pixel_count],
        }));
        self.stats.images_created += 1;
        Ok(HostImage(self.images.len() - 1))
    }

    fn release_image(&mut self, image: HostImage) {
        if let Some(data) = self.images[image.0].take() {
            self.allocated -= (data.pixels.len() * std::mem::size_of::<[f32; 4]>()) as u64;
            self.stats.images_released += 1;
        }
    }

    fn image_size(&self, image: &HostImage) -> PhysicalSize<u32> {
        self.image(image).map(|image| image.size).unwrap_or_default()
    }

    fn dispatch(
        &mut self,
        params: &KernelParams,
        inputs: KernelInputs<'_, HostBuffer>,
        output: &HostImage,
        groups: (u32, u32),
    ) -> Result<()> {
        let size = self.image(output)?.size;
        if groups.0 * TILE_SIZE < size.width || groups.1 * TILE_SIZE < size.height {
            return Err(Error::Dispatch(format!(
                "{:?} workgroups do not cover {}x{}",
                groups, size.width, size.height
            )));
        }

        let kernel = &self.kernel;
        if let Some(Some(image)) = self.images.get_mut(output.0) {
            let width = image.size.width as usize;
            image
                .pixels
                .par_chunks_mut(width.max(1))
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, pixel) in row.iter_mut().enumerate() {
                        *pixel = kernel(params, x as u32, y as u32);
                    }
                });
        }

        self.last_dispatch = Some(DispatchRecord {
            params: *params,
            groups,
            bound: [
                inputs.spheres.is_some(),
                inputs.mesh_instances.is_some(),
                inputs.vertices.is_some(),
                inputs.indices.is_some(),
            ],
        });
        self.stats.dispatches += 1;
        Ok(())
    }

    fn blend(&mut self, source: &HostImage, accumulation: &HostImage, weight: f32) -> Result<()> {
        let mut target = self.images[accumulation.0]
            .take()
            .ok_or_else(|| Error::Dispatch("accumulation image was released".to_owned()))?;

        let result = self.image(source).and_then(|source| {
            if source.size != target.size {
                return Err(Error::Dispatch(format!(
                    "cannot blend {:?} into {:?}",
                    source.size, target.size
                )));
            }

            target
                .pixels
                .par_iter_mut()
                .zip(source.pixels.par_iter())
                .for_each(|(accumulated, sample)| {
                    for channel in 0..4 {
                        accumulated[channel] += (sample[channel] - accumulated[channel]) * weight;
                    }
                });
            Ok(())
        });

        self.images[accumulation.0] = Some(target);
        self.stats.blends += 1;
        result
    }

    fn present(&mut self, image: &HostImage, target: &mut HostFrame) -> Result<()> {
        let image = self.image(image)?;
        target.size = image.size;
        target.pixels.clone_from(&image.pixels);
        self.stats.presents += 1;
        Ok(())
    }

    fn submit(&mut self) {
        self.stats.submits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    fn inputs() -> KernelInputs<'static, HostBuffer> {
        KernelInputs {
            spheres: None,
            mesh_instances: None,
            vertices: None,
            indices: None,
        }
    }

    #[test]
    fn dispatch_evaluates_every_pixel() {
        let mut device = HostDevice::new().with_kernel(|_, x, y| [x as f32, y as f32, 0.0, 1.0]);
        let image = device.create_image("scratch", PhysicalSize::new(3, 2)).unwrap();
        device
            .dispatch(&KernelParams::zeroed(), inputs(), &image, (1, 1))
            .unwrap();

        let pixels = device.image_pixels(&image);
        assert_eq!(pixels[0], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(pixels[5], [2.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn dispatch_rejects_short_grid() {
        let mut device = HostDevice::new();
        let image = device.create_image("scratch", PhysicalSize::new(9, 8)).unwrap();
        let result = device.dispatch(&KernelParams::zeroed(), inputs(), &image, (1, 1));
        assert!(matches!(result, Err(Error::Dispatch(_))));
    }

    #[test]
    fn blend_lerps_toward_source() {
        let mut device = HostDevice::new().with_kernel(|_, _, _| [1.0, 1.0, 1.0, 1.0]);
        let size = PhysicalSize::new(2, 2);
        let scratch = device.create_image("scratch", size).unwrap();
        let accumulation = device.create_image("accumulation", size).unwrap();
        device
            .dispatch(&KernelParams::zeroed(), inputs(), &scratch, (1, 1))
            .unwrap();

        device.blend(&scratch, &accumulation, 0.25).unwrap();
        assert_eq!(device.image_pixels(&accumulation)[0], [0.25; 4]);
    }

    #[test]
    fn released_memory_is_reusable() {
        let mut device = HostDevice::new().with_memory_limit(16);
        let buffer = device.create_buffer("a", 16).unwrap();
        assert!(device.create_buffer("b", 4).is_err());
        device.release_buffer(buffer);
        assert!(device.create_buffer("b", 16).is_ok());
    }
}
