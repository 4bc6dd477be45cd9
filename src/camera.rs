use std::time::Duration;

use nalgebra::{Isometry3, Perspective3, Point3, Unit, UnitQuaternion, Vector2, Vector3};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, KeyboardInput, VirtualKeyCode, WindowEvent};

use crate::beacon::CameraPose;

/// Free flying camera. Produces the matrices the trace kernel builds primary rays from.
pub struct Camera {
    vertical_fov: f32,
    near: f32,
    far: f32,

    pub position: Point3<f32>,
    forward: Unit<Vector3<f32>>,

    pub last_mouse: PhysicalPosition<f64>,
    viewport_size: PhysicalSize<u32>,

    inputs: [bool; 6],
    // WASD SPACE SHIFT
    pub grab_mouse: bool,

    pose: CameraPose,
}

impl Camera {
    pub fn new(vertical_fov: f32, near: f32, far: f32, viewport_size: PhysicalSize<u32>) -> Self {
        let mut to_return = Self {
            vertical_fov,
            near,
            far,
            position: Point3::new(0.0, 40.0, -160.0),
            forward: Unit::new_normalize(Vector3::new(0.0, -0.2, 1.0)),
            last_mouse: Default::default(),
            viewport_size,
            inputs: [false; 6],
            grab_mouse: false,
            pose: CameraPose::default(),
        };

        to_return.reevaluate_projection();
        to_return.reevaluate_view();
        to_return
    }

    pub fn pose(&self) -> CameraPose {
        self.pose
    }

    pub fn input(&mut self, event: &WindowEvent, is_hovering: bool) -> bool {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                let delta = Vector2::new(
                    (position.x - self.last_mouse.x) as f32,
                    (position.y - self.last_mouse.y) as f32,
                ) * 0.002;
                self.last_mouse = *position;

                if !self.grab_mouse || is_hovering {
                    return false;
                }
                self.look(delta);
                true
            }
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state,
                        virtual_keycode: Some(key),
                        ..
                    },
                ..
            } => {
                let is_press = matches!(state, ElementState::Pressed);
                match key {
                    VirtualKeyCode::W => self.inputs[0] = is_press,
                    VirtualKeyCode::A => self.inputs[1] = is_press,
                    VirtualKeyCode::S => self.inputs[2] = is_press,
                    VirtualKeyCode::D => self.inputs[3] = is_press,
                    VirtualKeyCode::Space => self.inputs[4] = is_press,
                    VirtualKeyCode::LShift => self.inputs[5] = is_press,
                    VirtualKeyCode::C if is_press => {
                        self.grab_mouse = !self.grab_mouse;
                    }
                    _ => {
                        return false;
                    }
                };

                true
            }
            _ => false,
        }
    }

    /// Moves by the held keys. Returns whether the pose changed.
    pub fn update(&mut self, frame_time: Duration) -> bool {
        let time_step = frame_time.as_secs_f32().min(0.1);
        let distance = self.movement_speed() * time_step;

        let up = Vector3::y();
        let right = self.forward.cross(&up).normalize();
        let directions = [
            self.forward.into_inner(),
            -right,
            -self.forward.into_inner(),
            right,
            up,
            -up,
        ];

        let mut step = Vector3::zeros();
        for (held, direction) in self.inputs.iter().zip(directions.iter()) {
            if *held {
                step += direction;
            }
        }

        if step == Vector3::zeros() {
            return false;
        }
        self.position += step * distance;
        self.reevaluate_view();
        true
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.viewport_size = new_size;
        self.reevaluate_projection();
    }

    pub fn rotation_speed(&self) -> f32 {
        0.7
    }

    pub fn movement_speed(&self) -> f32 {
        40.0
    }

    fn look(&mut self, delta: Vector2<f32>) {
        let up: Unit<Vector3<f32>> = Vector3::y_axis();
        let right = Unit::new_normalize(self.forward.cross(&Vector3::y()));

        let pitch = UnitQuaternion::from_axis_angle(&right, -delta.y * self.rotation_speed());
        let yaw = UnitQuaternion::from_axis_angle(&up, -delta.x * self.rotation_speed());

        let pitched = pitch * self.forward;
        // Stop short of the poles, look_at degenerates there
        let forward = if pitched.y.abs() < 0.99 {
            yaw * pitched
        } else {
            yaw * self.forward
        };

        self.forward = forward;
        self.forward.renormalize_fast();
        self.reevaluate_view();
    }

    fn reevaluate_projection(&mut self) {
        let aspect = self.viewport_size.width.max(1) as f32 / self.viewport_size.height.max(1) as f32;
        let projection = Perspective3::new(aspect, self.vertical_fov, self.near, self.far);
        self.pose.inverse_projection = projection.inverse();
    }

    fn reevaluate_view(&mut self) {
        let target = self.position + self.forward.into_inner();
        let view = Isometry3::look_at_rh(&self.position, &target, &Vector3::y_axis());
        self.pose.camera_to_world = view.inverse().to_homogeneous();
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{Matrix4, Vector4};

    use super::*;

    // Direction of the primary ray through normalized device coordinates `(x, y)`
    fn primary_direction(pose: &CameraPose, x: f32, y: f32) -> Vector3<f32> {
        let local = pose.inverse_projection * Vector4::new(x, y, 0.0, 1.0);
        pose.camera_to_world.transform_vector(&local.xyz()).normalize()
    }

    fn camera() -> Camera {
        Camera::new(std::f32::consts::FRAC_PI_3, 0.1, 1000.0, PhysicalSize::new(1280, 720))
    }

    #[test]
    fn center_ray_follows_forward() {
        let camera = camera();
        let direction = primary_direction(&camera.pose(), 0.0, 0.0);
        assert!((direction - camera.forward.into_inner()).norm() < 1e-4);
    }

    #[test]
    fn positive_ndc_x_points_right() {
        let camera = camera();
        let left = primary_direction(&camera.pose(), -1.0, 0.0);
        let right = primary_direction(&camera.pose(), 1.0, 0.0);
        let axis = camera.forward.cross(&Vector3::y());
        assert!(right.dot(&axis) > 0.0);
        assert!(left.dot(&axis) < 0.0);
    }

    #[test]
    fn origin_is_camera_position() {
        let camera = camera();
        let origin = camera.pose().camera_to_world.transform_point(&Point3::origin());
        assert!((origin - camera.position).norm() < 1e-3);
    }

    #[test]
    fn idle_update_keeps_pose() {
        let mut camera = camera();
        let before = camera.pose();
        assert!(!camera.update(Duration::from_millis(16)));
        assert_eq!(camera.pose(), before);
    }

    #[test]
    fn held_key_moves_forward() {
        let mut camera = camera();
        let before = camera.position;
        camera.inputs[0] = true;
        assert!(camera.update(Duration::from_millis(50)));
        let moved = camera.position - before;
        assert!(moved.dot(&camera.forward.into_inner()) > 0.0);
        assert_ne!(camera.pose().camera_to_world, Matrix4::identity());
    }

    #[test]
    fn resize_changes_projection_only() {
        let mut camera = camera();
        let before = camera.pose();
        camera.resize(PhysicalSize::new(720, 720));
        assert_eq!(camera.pose().camera_to_world, before.camera_to_world);
        assert_ne!(camera.pose().inverse_projection, before.inverse_projection);

        camera.resize(PhysicalSize::new(0, 720));
        assert_eq!(camera.viewport_size, PhysicalSize::new(720, 720));
    }
}
