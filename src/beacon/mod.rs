use log::debug;
use nalgebra::{Matrix4, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use winit::dpi::PhysicalSize;

use crate::beacon::buffer::DeviceBuffer;
use crate::beacon::device::{workgroups, ComputeDevice, KernelInputs, KernelParams};
use crate::beacon::geometry::{GeometryBuffers, GeometryBuilder};
use crate::beacon::registry::{SceneManager, SceneRegistry, TraceableHandle};
use crate::beacon::scene::Sphere;
use crate::config::{SceneConfig, Settings};
use crate::error::{Error, Result};

pub mod buffer;
pub mod device;
pub mod geometry;
pub mod gpu;
pub mod host;
pub mod procedural;
pub mod registry;
pub mod scene;
pub mod texture;

/// Camera matrices handed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub camera_to_world: Matrix4<f32>,
    pub inverse_projection: Matrix4<f32>,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            camera_to_world: Matrix4::identity(),
            inverse_projection: Matrix4::identity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub forward: Vector3<f32>,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            forward: Vector3::new(-1.0, -1.0, 1.0).normalize(),
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    pub fn packed(&self) -> [f32; 4] {
        [self.forward.x, self.forward.y, self.forward.z, self.intensity]
    }
}

/// Everything outside the tracer that decides what a frame looks like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    pub camera: CameraPose,
    pub light: DirectionalLight,
    pub resolution: PhysicalSize<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// The next dispatched frame starts a fresh average.
    Reset,
    Accumulating,
}

/// Why the running average was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    Enabled,
    Disabled,
    Geometry,
    Camera,
    Light,
    Resolution,
    AccumulationDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Index of the sample blended this frame, `None` if nothing was dispatched.
    pub sample: Option<u32>,
    pub rebuilt: bool,
    pub reset: Option<ResetCause>,
}

/// Progressive renderer. Keeps the scene buffers in sync and averages one kernel sample per frame.
pub struct Tracer<D: ComputeDevice> {
    registry: SceneRegistry,
    geometry: GeometryBuilder,
    geometry_buffers: GeometryBuffers<D::Buffer>,
    spheres: Option<DeviceBuffer<D::Buffer>>,
    sphere_count: u32,

    scratch: Option<D::Image>,
    converged: Option<D::Image>,

    sample: u32,
    accumulation: Accumulation,
    pending_reset: Option<ResetCause>,
    previous: Option<FrameInputs>,
    frame_rng: StdRng,

    pub settings: Settings,
}

impl<D: ComputeDevice> Tracer<D> {
    pub fn new(registry: SceneRegistry) -> Self {
        Self {
            registry,
            geometry: GeometryBuilder::new(),
            geometry_buffers: GeometryBuffers::default(),
            spheres: None,
            sphere_count: 0,
            scratch: None,
            converged: None,
            sample: 0,
            accumulation: Accumulation::Reset,
            pending_reset: Some(ResetCause::Enabled),
            previous: None,
            frame_rng: StdRng::seed_from_u64(0),
            settings: Default::default(),
        }
    }

    /// Generates the sphere scene and uploads it. Configuration errors surface before any allocation.
    pub fn enable(&mut self, device: &mut D, config: &SceneConfig) -> Result<()> {
        let spheres: Vec<Sphere> = procedural::generate(config)?;
        let uploaded = buffer::sync(device, &mut self.spheres, &spheres, Sphere::STRIDE, "spheres");

        // A failed upload has already released the previous buffer
        self.sphere_count = self.spheres.as_ref().map_or(0, |spheres| spheres.count() as u32);
        self.reset(ResetCause::Enabled);
        uploaded?;

        self.frame_rng = StdRng::seed_from_u64(config.seed);
        Ok(())
    }

    /// Releases every device resource. The registry is kept and rebuilt on the next frame.
    pub fn disable(&mut self, device: &mut D) {
        buffer::release(device, &mut self.spheres);
        self.geometry_buffers.release(device);
        if let Some(image) = self.scratch.take() {
            device.release_image(image);
        }
        if let Some(image) = self.converged.take() {
            device.release_image(image);
        }

        self.sphere_count = 0;
        self.previous = None;
        self.registry.mark_dirty();
        self.reset(ResetCause::Disabled);
    }

    /// Releases everything and forgets all registered objects.
    pub fn teardown(mut self, device: &mut D) {
        self.disable(device);
        self.registry.clear();
    }

    pub fn registry(&self) -> &SceneRegistry {
        &self.registry
    }

    pub fn sample_count(&self) -> u32 {
        self.sample
    }

    pub fn sphere_count(&self) -> u32 {
        self.sphere_count
    }

    pub fn accumulation(&self) -> Accumulation {
        self.accumulation
    }

    pub fn geometry(&self) -> &GeometryBuilder {
        &self.geometry
    }

    pub fn converged(&self) -> Option<&D::Image> {
        self.converged.as_ref()
    }

    pub fn reset(&mut self, cause: ResetCause) {
        self.accumulation = Accumulation::Reset;
        // First cause wins, it is the one worth logging
        self.pending_reset.get_or_insert(cause);
    }

    /// Renders one progressive frame into `target`.
    pub fn render(
        &mut self,
        device: &mut D,
        inputs: &FrameInputs,
        target: &mut D::Target,
    ) -> Result<FrameReport> {
        let rebuilt = self
            .geometry
            .rebuild(&mut self.registry, device, &mut self.geometry_buffers)?;
        if rebuilt {
            self.reset(ResetCause::Geometry);
        }
        self.detect_motion(inputs);

        if inputs.resolution.width == 0 || inputs.resolution.height == 0 {
            debug!("skipping frame at zero resolution");
            return Ok(FrameReport {
                sample: None,
                rebuilt,
                reset: None,
            });
        }

        let params = self.kernel_params(inputs);
        self.ensure_targets(device, inputs.resolution)?;
        if !self.settings.should_accumulate {
            self.reset(ResetCause::AccumulationDisabled);
        }

        let reset = self.pending_reset.take();
        if self.accumulation == Accumulation::Reset {
            if let Some(cause) = reset {
                debug!("accumulation reset: {:?}", cause);
            }
            self.sample = 0;
            self.accumulation = Accumulation::Accumulating;
        }

        let (Some(scratch), Some(converged)) = (self.scratch.as_ref(), self.converged.as_ref()) else {
            return Err(Error::Dispatch("render targets are missing".to_owned()));
        };

        let kernel_inputs = KernelInputs {
            spheres: self.spheres.as_ref().map(DeviceBuffer::raw),
            mesh_instances: self.geometry_buffers.mesh_instances.as_ref().map(DeviceBuffer::raw),
            vertices: self.geometry_buffers.vertices.as_ref().map(DeviceBuffer::raw),
            indices: self.geometry_buffers.indices.as_ref().map(DeviceBuffer::raw),
        };
        device.dispatch(&params, kernel_inputs, scratch, workgroups(inputs.resolution))?;
        device.blend(scratch, converged, 1.0 / (self.sample as f32 + 1.0))?;
        device.present(converged, target)?;
        device.submit();

        let sample = self.sample;
        self.sample += 1;

        Ok(FrameReport {
            sample: Some(sample),
            rebuilt,
            reset,
        })
    }

    fn detect_motion(&mut self, inputs: &FrameInputs) {
        if let Some(previous) = self.previous {
            if previous.camera != inputs.camera {
                self.reset(ResetCause::Camera);
            }
            if previous.light != inputs.light {
                self.reset(ResetCause::Light);
            }
        }
        self.previous = Some(*inputs);
    }

    fn kernel_params(&mut self, inputs: &FrameInputs) -> KernelParams {
        KernelParams {
            camera_to_world: inputs.camera.camera_to_world.into(),
            camera_inverse_projection: inputs.camera.inverse_projection.into(),
            directional_light: inputs.light.packed(),
            pixel_offset: [self.frame_rng.gen(), self.frame_rng.gen()],
            seed: self.frame_rng.gen(),
            sphere_count: self.sphere_count,
            mesh_count: self.geometry_buffers.mesh_count(),
            _padding: [0; 3],
        }
    }

    fn ensure_targets(&mut self, device: &mut D, resolution: PhysicalSize<u32>) -> Result<()> {
        for (slot, label) in [
            (&mut self.scratch, "scratch target"),
            (&mut self.converged, "accumulation target"),
        ] {
            if let Some(image) = slot.as_ref() {
                if device.image_size(image) == resolution {
                    continue;
                }
            }
            if let Some(image) = slot.take() {
                device.release_image(image);
            }

            *slot = Some(device.create_image(label, resolution)?);
            self.accumulation = Accumulation::Reset;
            self.pending_reset.get_or_insert(ResetCause::Resolution);
        }
        Ok(())
    }
}

impl<D: ComputeDevice> SceneManager for Tracer<D> {
    fn attach(&mut self, object: TraceableHandle) {
        self.registry.register(object);
    }

    fn detach(&mut self, object: &TraceableHandle) {
        self.registry.unregister(object);
    }
}
