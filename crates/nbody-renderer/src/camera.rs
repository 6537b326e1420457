//! Fixed viewpoint on the spawn cube

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

/// Camera uniform for GPU
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub _padding: f32,
}

/// Perspective camera looking at the origin from a fixed orbit
pub struct Camera {
    pub distance: f32,
    pub rotation: Quat,
    pub target: Vec3,
    pub aspect: f32,
    pub fovy: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        let rotation = Quat::from_rotation_y(0.6) * Quat::from_rotation_x(-0.4);

        Self {
            distance: 3.0,
            rotation,
            target: Vec3::ZERO,
            aspect: aspect_ratio(width, height),
            fovy: 45.0_f32.to_radians(),
            znear: 0.01,
            zfar: 100.0,
        }
    }

    pub fn position(&self) -> Vec3 {
        let offset = self.rotation * Vec3::new(0.0, 0.0, self.distance);
        self.target + offset
    }

    pub fn build_view_projection_matrix(&self) -> Mat4 {
        let position = self.position();
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-position);
        let view = rotation_matrix * translation_matrix;
        let proj = Mat4::perspective_rh(self.fovy, self.aspect, self.znear, self.zfar);
        proj * view
    }

    pub fn to_uniform(&self) -> CameraUniform {
        CameraUniform {
            view_proj: self.build_view_projection_matrix().to_cols_array_2d(),
            position: self.position().to_array(),
            _padding: 0.0,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = aspect_ratio(width, height);
    }
}

fn aspect_ratio(width: u32, height: u32) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 80);
    }

    #[test]
    fn test_spawn_cube_is_visible() {
        let camera = Camera::new(1280, 720);
        let view_proj = camera.build_view_projection_matrix();

        for corner in [
            Vec4::new(-0.5, -0.5, -0.5, 1.0),
            Vec4::new(0.5, 0.5, 0.5, 1.0),
            Vec4::new(0.5, -0.5, 0.5, 1.0),
            Vec4::new(0.0, 0.0, 0.0, 1.0),
        ] {
            let clip = view_proj * corner;
            assert!(clip.w > 0.0);
            let ndc = clip / clip.w;
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{:?}", ndc);
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn test_resize_updates_aspect() {
        let mut camera = Camera::new(800, 800);
        assert_eq!(camera.aspect, 1.0);

        camera.resize(1600, 800);
        assert_eq!(camera.aspect, 2.0);

        camera.resize(0, 0);
        assert!(camera.aspect.is_finite());
    }
}
