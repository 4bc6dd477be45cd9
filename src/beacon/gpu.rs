//! wgpu implementation of [`ComputeDevice`].
//!
//! Dispatch, blend and present are recorded into one command encoder and handed to the queue on
//! [`ComputeDevice::submit`], so their ordering is enforced on the device without host waits.

use std::iter;

use bytemuck::{bytes_of, cast_slice};
use log::debug;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendState, Buffer, BufferBindingType,
    BufferDescriptor, BufferUsages, Color, ColorTargetState, ColorWrites, CommandEncoder,
    CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline, ComputePipelineDescriptor,
    Device, ErrorFilter, Extent3d, FragmentState, ImageCopyTexture, LoadOp, MultisampleState,
    Operations, Origin3d, PipelineLayoutDescriptor, PrimitiveState, Queue,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    SamplerBindingType, ShaderModuleDescriptor, ShaderSource, ShaderStages, StorageTextureAccess,
    Texture, TextureAspect, TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType,
    TextureUsages, TextureView, TextureViewDescriptor, TextureViewDimension, VertexState,
};
use winit::dpi::PhysicalSize;

use crate::beacon::device::{workgroups, ComputeDevice, KernelInputs, KernelParams};
use crate::beacon::texture::Image;
use crate::error::{Error, Result};

const TRACE_WGSL: &str = include_str!("trace.wgsl");
const ACCUMULATE_WGSL: &str = include_str!("accumulate.wgsl");
const PRESENT_WGSL: &str = include_str!("present.wgsl");

/// Full precision float format shared by the scratch and accumulation targets.
const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
const TEXEL_BYTES: u64 = 16;

pub struct GpuImage {
    texture: Texture,
    view: TextureView,
}

pub struct WgpuDevice {
    device: Device,
    queue: Queue,

    trace_pipeline: ComputePipeline,
    trace_layout: BindGroupLayout,
    params: Buffer,
    // Bound in place of absent scene buffers, the kernel never reads it
    placeholder: Buffer,
    environment: Image,

    blend_pipeline: ComputePipeline,
    blend_layout: BindGroupLayout,
    blend_weight: Buffer,
    // Blend output, copied back over the accumulation target
    blended: Option<GpuImage>,

    present_layout: BindGroupLayout,
    present_pipeline: RenderPipeline,

    encoder: Option<CommandEncoder>,
}

fn storage_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// Float32 textures are only readable unfiltered
fn unfiltered_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn output_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format: TARGET_FORMAT,
            view_dimension: TextureViewDimension::D2,
        },
        count: None,
    }
}

fn copy_target(texture: &Texture) -> ImageCopyTexture<'_> {
    ImageCopyTexture {
        texture,
        mip_level: 0,
        origin: Origin3d::ZERO,
        aspect: TextureAspect::All,
    }
}

/// Command encoder for the current frame, created on first use.
fn frame_encoder<'a>(
    encoder: &'a mut Option<CommandEncoder>,
    device: &Device,
) -> &'a mut CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Tracer Encoder"),
        })
    })
}

impl WgpuDevice {
    pub fn new(
        device: Device,
        queue: Queue,
        surface_format: TextureFormat,
        environment: Image,
    ) -> Self {
        let trace_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Trace Kernel"),
            source: ShaderSource::Wgsl(TRACE_WGSL.into()),
        });

        let trace_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Trace Bindings"),
            entries: &[
                uniform_entry(0),
                storage_entry(1), // spheres
                storage_entry(2), // mesh instances
                storage_entry(3), // vertices
                storage_entry(4), // indices
                BindGroupLayoutEntry {
                    binding: 5,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 6,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                output_entry(7),
            ],
        });

        let trace_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Trace Pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("Trace Pipeline Layout"),
                bind_group_layouts: &[&trace_layout],
                push_constant_ranges: &[],
            })),
            module: &trace_shader,
            entry_point: "main",
        });

        let params = device.create_buffer(&BufferDescriptor {
            label: Some("Kernel Params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let placeholder = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Absent Buffer"),
            contents: &[0u8; 16],
            usage: BufferUsages::STORAGE,
        });

        let blend_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Accumulate Kernel"),
            source: ShaderSource::Wgsl(ACCUMULATE_WGSL.into()),
        });

        let blend_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Blend Bindings"),
            entries: &[
                uniform_entry(0),
                unfiltered_entry(1, ShaderStages::COMPUTE), // latest sample
                unfiltered_entry(2, ShaderStages::COMPUTE), // accumulation
                output_entry(3),
            ],
        });

        let blend_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Blend Pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("Blend Pipeline Layout"),
                bind_group_layouts: &[&blend_layout],
                push_constant_ranges: &[],
            })),
            module: &blend_shader,
            entry_point: "main",
        });

        let blend_weight = device.create_buffer(&BufferDescriptor {
            label: Some("Blend Weight"),
            size: 16,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let present_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: ShaderSource::Wgsl(PRESENT_WGSL.into()),
        });

        let present_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Present Bindings"),
            entries: &[unfiltered_entry(0, ShaderStages::FRAGMENT)],
        });

        let present_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("Present Pipeline Layout"),
                bind_group_layouts: &[&present_layout],
                push_constant_ranges: &[],
            })),
            vertex: VertexState {
                module: &present_shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &present_shader,
                entry_point: "fs_main",
                targets: &[Some(ColorTargetState {
                    format: surface_format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        Self {
            device,
            queue,
            trace_pipeline,
            trace_layout,
            params,
            placeholder,
            environment,
            blend_pipeline,
            blend_layout,
            blend_weight,
            blended: None,
            present_layout,
            present_pipeline,
            encoder: None,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Runs `allocate` inside an out-of-memory error scope.
    fn guarded<T>(&self, label: &str, size: u64, allocate: impl FnOnce(&Device) -> T) -> Result<T> {
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        let value = allocate(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(value),
            Some(error) => Err(Error::Allocation {
                label: label.to_owned(),
                size,
                reason: error.to_string(),
            }),
        }
    }

    fn allocate_image(&self, label: &str, size: PhysicalSize<u32>) -> Result<GpuImage> {
        let bytes = size.width as u64 * size.height as u64 * TEXEL_BYTES;
        let max = self.device.limits().max_texture_dimension_2d;
        if size.width > max || size.height > max {
            return Err(Error::Allocation {
                label: label.to_owned(),
                size: bytes,
                reason: format!("{}x{} exceeds the {} texel limit", size.width, size.height, max),
            });
        }

        debug!("creating `{}` at {}x{}", label, size.width, size.height);
        let texture = self.guarded(label, bytes, |device| {
            device.create_texture(&TextureDescriptor {
                label: Some(label),
                size: Extent3d {
                    width: size.width,
                    height: size.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: TextureUsages::STORAGE_BINDING
                    | TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_SRC
                    | TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&TextureViewDescriptor::default());
        Ok(GpuImage { texture, view })
    }

    /// Makes the blend output match `size`.
    fn ensure_blended(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        if let Some(image) = self.blended.as_ref() {
            if self.image_size(image) == size {
                return Ok(());
            }
        }
        if let Some(image) = self.blended.take() {
            image.texture.destroy();
        }
        self.blended = Some(self.allocate_image("blend output", size)?);
        Ok(())
    }
}

impl ComputeDevice for WgpuDevice {
    type Buffer = Buffer;
    type Image = GpuImage;
    type Target = TextureView;

    fn create_buffer(&mut self, label: &str, size: u64) -> Result<Buffer> {
        let limits = self.device.limits();
        let limit = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);
        if size > limit {
            return Err(Error::Allocation {
                label: label.to_owned(),
                size,
                reason: format!("exceeds the device limit of {} bytes", limit),
            });
        }

        // copies must be 4 byte aligned
        let aligned = (size + wgpu::COPY_BUFFER_ALIGNMENT - 1) & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        self.guarded(label, size, |device| {
            device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: aligned,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })
    }

    fn write_buffer(&mut self, buffer: &Buffer, bytes: &[u8]) {
        self.queue.write_buffer(buffer, 0, bytes);
    }

    fn release_buffer(&mut self, buffer: Buffer) {
        buffer.destroy();
    }

    fn create_image(&mut self, label: &str, size: PhysicalSize<u32>) -> Result<GpuImage> {
        self.allocate_image(label, size)
    }

    fn release_image(&mut self, image: GpuImage) {
        image.texture.destroy();
    }

    fn image_size(&self, image: &GpuImage) -> PhysicalSize<u32> {
        PhysicalSize::new(image.texture.width(), image.texture.height())
    }

    fn dispatch(
        &mut self,
        params: &KernelParams,
        inputs: KernelInputs<'_, Buffer>,
        output: &GpuImage,
        groups: (u32, u32),
    ) -> Result<()> {
        self.queue.write_buffer(&self.params, 0, bytes_of(params));

        self.device.push_error_scope(ErrorFilter::Validation);
        let placeholder = &self.placeholder;
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Trace Inputs"),
            layout: &self.trace_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: inputs.spheres.unwrap_or(placeholder).as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: inputs.mesh_instances.unwrap_or(placeholder).as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: inputs.vertices.unwrap_or(placeholder).as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: inputs.indices.unwrap_or(placeholder).as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 5,
                    resource: BindingResource::TextureView(&self.environment.view),
                },
                BindGroupEntry {
                    binding: 6,
                    resource: BindingResource::Sampler(&self.environment.sampler),
                },
                BindGroupEntry {
                    binding: 7,
                    resource: BindingResource::TextureView(&output.view),
                },
            ],
        });

        {
            let encoder = frame_encoder(&mut self.encoder, &self.device);
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("Trace Pass"),
            });
            pass.set_pipeline(&self.trace_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }

        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(()),
            Some(error) => Err(Error::Dispatch(error.to_string())),
        }
    }

    fn blend(&mut self, source: &GpuImage, accumulation: &GpuImage, weight: f32) -> Result<()> {
        let size = self.image_size(accumulation);
        if self.image_size(source) != size {
            return Err(Error::Dispatch(format!(
                "blend source is {:?} but the accumulation target is {:?}",
                self.image_size(source),
                size
            )));
        }
        self.ensure_blended(size)?;
        self.queue
            .write_buffer(&self.blend_weight, 0, cast_slice(&[weight, 0.0, 0.0, 0.0]));

        let blended = self
            .blended
            .as_ref()
            .ok_or_else(|| Error::Dispatch("blend output is missing".to_owned()))?;
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Blend Inputs"),
            layout: &self.blend_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.blend_weight.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&source.view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&accumulation.view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(&blended.view),
                },
            ],
        });

        let encoder = frame_encoder(&mut self.encoder, &self.device);
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("Blend Pass"),
            });
            pass.set_pipeline(&self.blend_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups = workgroups(size);
            pass.dispatch_workgroups(groups.0, groups.1, 1);
        }
        encoder.copy_texture_to_texture(
            copy_target(&blended.texture),
            copy_target(&accumulation.texture),
            Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn present(&mut self, image: &GpuImage, target: &mut TextureView) -> Result<()> {
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Present Source"),
            layout: &self.present_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&image.view),
            }],
        });

        let encoder = frame_encoder(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Present Pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(Color::BLACK),
                    store: true,
                },
            })],
            depth_stencil_attachment: None,
        });
        pass.set_pipeline(&self.present_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(iter::once(encoder.finish()));
        }
    }
}
