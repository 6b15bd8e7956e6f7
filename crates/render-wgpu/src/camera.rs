use glam::{Mat4, Vec3};

/// Orbit camera around a fixed target, Z up.
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub sensitivity: f32,
    pub zoom_speed: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            // Centre of the 3x3 grid, which spans [-1, 2] on X and Y.
            target: Vec3::new(0.5, 0.5, 0.0),
            distance: 4.5,
            yaw: -90.0_f32.to_radians(),
            pitch: 50.0_f32.to_radians(),
            fov: 50.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.05,
            far: 100.0,
            sensitivity: 0.005,
            zoom_speed: 0.1,
        }
    }
}

impl OrbitCamera {
    pub const MIN_DISTANCE: f32 = 0.5;
    pub const MAX_DISTANCE: f32 = 50.0;

    pub fn position(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + Vec3::new(cy * cp, sy * cp, sp) * self.distance
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * self.sensitivity;
        self.pitch += dy * self.sensitivity;
        self.pitch = self.pitch.clamp(5.0_f32.to_radians(), 89.0_f32.to_radians());
    }

    /// Positive `steps` move closer.
    pub fn zoom(&mut self, steps: f32) {
        let factor = (1.0 - self.zoom_speed).powf(steps);
        self.distance = (self.distance * factor).clamp(Self::MIN_DISTANCE, Self::MAX_DISTANCE);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Z)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_at_grid() {
        let cam = OrbitCamera::default();
        assert!(cam.position().z > 0.0);
        let vp = cam.view_projection();
        assert!(!vp.col(0).x.is_nan());

        let clip = vp * cam.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
    }

    #[test]
    fn rotate_keeps_distance_and_clamps_pitch() {
        let mut cam = OrbitCamera::default();
        cam.rotate(100.0, 10_000.0);
        assert!(cam.pitch <= 89.0_f32.to_radians());
        assert!((cam.position().distance(cam.target) - cam.distance).abs() < 1e-4);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut cam = OrbitCamera::default();
        cam.zoom(1000.0);
        assert_eq!(cam.distance, OrbitCamera::MIN_DISTANCE);
        cam.zoom(-1000.0);
        assert_eq!(cam.distance, OrbitCamera::MAX_DISTANCE);
    }
}
