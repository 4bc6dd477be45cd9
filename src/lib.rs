use std::path::PathBuf;

use log::{error, info, warn};
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use crate::app::Application;
use crate::error::Error;

pub mod app;
pub mod beacon;
pub mod camera;
pub mod config;
pub mod error;
pub mod util;

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional environment map, falls back to a flat sky
    let environment = std::env::args_os().nth(1).map(PathBuf::from);

    let event_loop = EventLoop::new();
    let window = match WindowBuilder::new()
        .with_title("Beacon: Progressive Ray Tracer")
        .build(&event_loop)
    {
        Ok(window) => window,
        Err(error) => {
            error!("failed to create window: {}", error);
            return;
        }
    };

    let mut app = match pollster::block_on(Application::new(
        window,
        &event_loop,
        environment.as_deref(),
    )) {
        Ok(app) => app,
        Err(error) => {
            error!("failed to start: {}", error);
            return;
        }
    };
    info!("started");

    event_loop.run(move |event, _, control_flow| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == app.window.id() => {
            if app.input(event) {
                return;
            }

            match event {
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state: ElementState::Pressed,
                            virtual_keycode: Some(VirtualKeyCode::Escape),
                            ..
                        },
                    ..
                } => *control_flow = ControlFlow::ExitWithCode(0),
                WindowEvent::Resized(physical_size) => app.resize(*physical_size),
                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    app.resize(**new_inner_size)
                }
                _ => {}
            }
        }
        Event::RedrawRequested(window_id) if window_id == app.window.id() => {
            app.update();
            match app.render() {
                Ok(()) => {}
                // Reconfigure the surface and try again next frame
                Err(Error::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                    app.resize(app.size)
                }
                Err(error) if error.is_fatal() => {
                    error!("{}", error);
                    *control_flow = ControlFlow::ExitWithCode(1);
                }
                Err(error) => warn!("frame dropped: {}", error),
            }
        }
        Event::MainEventsCleared => app.window.request_redraw(),
        _ => {}
    });
}
