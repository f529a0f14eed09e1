//! 2D orthographic camera

use glam::{Mat4, Vec2, Vec3};

/// Inverse transforms the kernels use to map pixels to world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransforms {
    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,
}

impl Default for CameraTransforms {
    fn default() -> Self {
        Self {
            inverse_projection: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        }
    }
}

impl CameraTransforms {
    /// Combined clip-to-world matrix
    pub fn clip_to_world(&self) -> Mat4 {
        self.inverse_view * self.inverse_projection
    }

    /// World-space length of one pixel step along x at the given render width
    pub fn pixel_size(&self, width: u32) -> f32 {
        let step = Vec3::new(2.0 / width.max(1) as f32, 0.0, 0.0);
        self.clip_to_world().transform_vector3(step).truncate().length()
    }
}

/// Orthographic camera looking at the XY plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera2d {
    pub center: Vec2,
    /// Visible world height
    pub view_height: f32,
}

impl Default for Camera2d {
    fn default() -> Self {
        Self {
            center: Vec2::ZERO,
            view_height: 20.0,
        }
    }
}

impl Camera2d {
    pub fn new(center: Vec2, view_height: f32) -> Self {
        Self { center, view_height }
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let half_h = self.view_height * 0.5;
        let half_w = half_h * aspect;
        Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -1.0, 1.0)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_translation(-self.center.extend(0.0))
    }

    /// Transforms for a render target of `width` x `height` pixels
    pub fn transforms(&self, width: u32, height: u32) -> CameraTransforms {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        CameraTransforms {
            inverse_projection: self.projection_matrix(aspect).inverse(),
            inverse_view: self.view_matrix().inverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_clip_corners_map_to_view_bounds() {
        let camera = Camera2d::new(Vec2::new(3.0, -1.0), 10.0);
        let transforms = camera.transforms(200, 100);
        let top_right = transforms.clip_to_world() * Vec4::new(1.0, 1.0, 0.0, 1.0);
        assert!((top_right.truncate().truncate() - Vec2::new(13.0, 4.0)).length() < 1e-4);
    }

    #[test]
    fn test_pixel_size() {
        let camera = Camera2d::new(Vec2::ZERO, 21.0);
        let transforms = camera.transforms(21, 21);
        assert!((transforms.pixel_size(21) - 1.0).abs() < 1e-5);
        assert!((transforms.pixel_size(42) - 0.5).abs() < 1e-5);
    }
}
