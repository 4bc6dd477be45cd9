use std::iter;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use eframe::egui::{ClippedPrimitive, DragValue, SidePanel, TextureId};
use log::{error, info};
use nalgebra::{Matrix4, Unit, UnitQuaternion, Vector3};
use wgpu::{
    Backends, CommandEncoder, CommandEncoderDescriptor, CompositeAlphaMode, DeviceDescriptor,
    Dx12Compiler, Features, Instance, InstanceDescriptor, Limits, LoadOp, Operations,
    PowerPreference, PresentMode, RenderPassColorAttachment, RenderPassDescriptor,
    RequestAdapterOptions, Surface, SurfaceConfiguration, TextureUsages, TextureViewDescriptor,
};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::Window;

use crate::beacon::gpu::WgpuDevice;
use crate::beacon::registry::{SceneManager, SceneRegistry, TraceableHandle};
use crate::beacon::scene::{Mesh, TracedMesh};
use crate::beacon::texture::load_environment;
use crate::beacon::{DirectionalLight, FrameInputs, Tracer};
use crate::camera::Camera;
use crate::config::SceneConfig;
use crate::error::{Error, Result};

const LIGHT_STEP: f32 = 0.05;

pub struct Application {
    surface: Surface,
    config: SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    // Must outlive `surface`
    pub window: Window,

    device: WgpuDevice,
    tracer: Tracer<WgpuDevice>,
    camera: Camera,
    light: DirectionalLight,
    scene_config: SceneConfig,
    cube: TraceableHandle,
    cube_attached: bool,
    last_frame: Instant,

    egui_state: egui_winit::State,
    egui_context: eframe::egui::Context,
    egui_renderer: egui_wgpu::Renderer,
    egui_screen: egui_wgpu::renderer::ScreenDescriptor,
}

impl Application {
    pub async fn new(
        window: Window,
        event_loop: &EventLoop<()>,
        environment: Option<&Path>,
    ) -> Result<Self> {
        let size = window.inner_size();

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            dx12_shader_compiler: Dx12Compiler::default(),
        });

        // The window is owned by the application and outlives the surface
        let surface = unsafe { instance.create_surface(&window) }
            .map_err(|error| Error::Device(error.to_string()))?;

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await
            .ok_or_else(|| Error::Device("no compatible adapter".to_owned()))?;
        info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    features: Features::empty(),
                    limits: Limits::default(),
                    label: Some("Beacon GPU"),
                },
                None,
            )
            .await
            .map_err(|error| Error::Device(error.to_string()))?;

        let capabilities = surface.get_capabilities(&adapter);
        let surface_format = capabilities
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| capabilities.formats.first())
            .copied()
            .ok_or_else(|| Error::Device("surface has no supported formats".to_owned()))?;
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: PresentMode::AutoVsync,
            alpha_mode: CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        if size.width > 0 && size.height > 0 {
            surface.configure(&device, &config);
        }

        let environment = load_environment(environment, &device, &queue);

        let egui_state = egui_winit::State::new(event_loop);
        let egui_context = eframe::egui::Context::default();
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1);
        let egui_screen = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [config.width, config.height],
            pixels_per_point: egui_context.pixels_per_point(),
        };

        let mut device = WgpuDevice::new(device, queue, surface_format, environment);
        let scene_config = SceneConfig::default();
        let mut tracer = Tracer::new(SceneRegistry::new());
        tracer.enable(&mut device, &scene_config)?;

        let camera = Camera::new(std::f32::consts::FRAC_PI_3, 0.1, 10000.0, size);
        let cube: TraceableHandle = Rc::new(TracedMesh::new(
            Mesh::cube(15.0),
            Matrix4::new_translation(&Vector3::new(0.0, 15.0, 0.0)),
        ));

        Ok(Self {
            surface,
            config,
            size,
            window,
            device,
            tracer,
            camera,
            light: DirectionalLight::default(),
            scene_config,
            cube,
            cube_attached: false,
            last_frame: Instant::now(),
            egui_state,
            egui_context,
            egui_renderer,
            egui_screen,
        })
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(self.device.device(), &self.config);
        self.camera.resize(new_size);

        self.egui_screen.pixels_per_point = self.egui_context.pixels_per_point();
        self.egui_screen.size_in_pixels = [self.config.width, self.config.height];
    }

    pub fn update(&mut self) {
        let now = Instant::now();
        self.camera.update(now - self.last_frame);
        self.last_frame = now;
    }

    pub fn render(&mut self) -> Result<()> {
        if self.size.width == 0 || self.size.height == 0 {
            return Ok(());
        }

        let output = self.surface.get_current_texture()?;
        let mut view = output.texture.create_view(&TextureViewDescriptor::default());

        let inputs = FrameInputs {
            camera: self.camera.pose(),
            light: self.light,
            resolution: self.size,
        };
        self.tracer.render(&mut self.device, &inputs, &mut view)?;

        // The overlay loads the traced image instead of clearing it
        let mut encoder = self
            .device
            .device()
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Overlay Encoder"),
            });
        let freed = {
            let (primitives, freed) = self.update_egui(&mut encoder);
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Overlay Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });

            self.egui_renderer
                .render(&mut render_pass, &primitives, &self.egui_screen);
            freed
        };

        self.device.queue().submit(iter::once(encoder.finish()));
        output.present();
        freed.iter().for_each(|id| self.egui_renderer.free_texture(id));

        Ok(())
    }

    // true: consumed here, false: left for the event loop
    pub fn input(&mut self, event: &WindowEvent) -> bool {
        let egui_response = self.egui_state.on_event(&self.egui_context, event);
        if egui_response.consumed {
            return true;
        }

        let grabbed = self.camera.grab_mouse;
        if self
            .camera
            .input(event, self.egui_context.is_pointer_over_area())
        {
            if grabbed != self.camera.grab_mouse {
                self.window.set_cursor_visible(!self.camera.grab_mouse);
            }
            return true;
        }

        match event {
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state: ElementState::Pressed,
                        virtual_keycode: Some(key),
                        ..
                    },
                ..
            } => match key {
                VirtualKeyCode::Left => self.rotate_light(Vector3::y_axis(), LIGHT_STEP),
                VirtualKeyCode::Right => self.rotate_light(Vector3::y_axis(), -LIGHT_STEP),
                VirtualKeyCode::Up | VirtualKeyCode::Down => {
                    let sign = if *key == VirtualKeyCode::Up { 1.0 } else { -1.0 };
                    match Unit::try_new(self.light.forward.cross(&Vector3::y()), 1e-3) {
                        Some(axis) => self.rotate_light(axis, sign * LIGHT_STEP),
                        None => false,
                    }
                }
                VirtualKeyCode::M => {
                    self.toggle_cube();
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn rotate_light(&mut self, axis: Unit<Vector3<f32>>, angle: f32) -> bool {
        let forward = UnitQuaternion::from_axis_angle(&axis, angle) * self.light.forward;
        // Keep the sun above the horizon
        if forward.y > -0.05 {
            return false;
        }
        self.light.forward = forward.normalize();
        true
    }

    fn toggle_cube(&mut self) {
        if self.cube_attached {
            self.tracer.detach(&self.cube);
        } else {
            self.tracer.attach(Rc::clone(&self.cube));
        }
        self.cube_attached = !self.cube_attached;
        info!("demo cube {}", if self.cube_attached { "attached" } else { "detached" });
    }

    fn regenerate(&mut self) {
        match self.tracer.enable(&mut self.device, &self.scene_config) {
            Ok(()) => info!("regenerated scene with seed {}", self.scene_config.seed),
            Err(error) => error!("scene regeneration failed: {}", error),
        }
    }

    fn update_egui(
        &mut self,
        encoder: &mut CommandEncoder,
    ) -> (Vec<ClippedPrimitive>, Vec<TextureId>) {
        let egui_input = self.egui_state.take_egui_input(&self.window);

        let samples = self.tracer.sample_count();
        let spheres = self.tracer.sphere_count();
        let cube_attached = self.cube_attached;
        let scene = &mut self.scene_config;
        let settings = &mut self.tracer.settings;
        let mut regenerate = false;

        let egui_output = self.egui_context.run(egui_input, |ctx| {
            SidePanel::right("Side Menu")
                .resizable(true)
                .width_range(0.0..=512.0)
                .default_width(180.0)
                .show(ctx, |ui| {
                    ui.heading("Scene");
                    ui.horizontal(|ui| {
                        ui.label("Seed");
                        ui.add(DragValue::new(&mut scene.seed));
                    });
                    ui.horizontal(|ui| {
                        ui.label("Radius");
                        ui.add(DragValue::new(&mut scene.radius_min).speed(0.5));
                        ui.add(DragValue::new(&mut scene.radius_max).speed(0.5));
                    });
                    ui.horizontal(|ui| {
                        ui.label("Attempts");
                        ui.add(DragValue::new(&mut scene.max_spheres).clamp_range(0..=100_000));
                    });
                    ui.horizontal(|ui| {
                        ui.label("Placement");
                        ui.add(DragValue::new(&mut scene.placement_radius).speed(5.0));
                    });
                    if ui.button("Regenerate").clicked() {
                        regenerate = true;
                    }

                    ui.separator();
                    ui.checkbox(&mut settings.should_accumulate, "Accumulate");
                    ui.label(format!("Samples: {}", samples));
                    ui.label(format!("Spheres: {}", spheres));
                    ui.label(format!(
                        "Cube: {} (M)",
                        if cube_attached { "on" } else { "off" }
                    ));
                    ui.label("Mouse look: C");
                });
        });

        self.egui_state.handle_platform_output(
            &self.window,
            &self.egui_context,
            egui_output.platform_output,
        );
        let primitives = self.egui_context.tessellate(egui_output.shapes);
        egui_output.textures_delta.set.iter().for_each(|(id, delta)| {
            self.egui_renderer
                .update_texture(self.device.device(), self.device.queue(), *id, delta);
        });

        self.egui_renderer.update_buffers(
            self.device.device(),
            self.device.queue(),
            encoder,
            &primitives,
            &self.egui_screen,
        );

        if regenerate {
            self.regenerate();
        }

        (primitives, egui_output.textures_delta.free)
    }
}
