use bytemuck::{Pod, Zeroable};
use glam::{vec2, Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::LUSTRE_EPSILON;

/// Per-frame camera uniform, shared read-only by every denoiser instance.
#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable, Debug)]
pub struct Camera {
    pub view_proj: Mat4,
    pub prev_view_proj: Mat4,
    pub ndc_to_world: Mat4,

    /// xyz = camera position
    pub origin: Vec4,

    /// xyz = normalized viewing direction
    pub forward: Vec4,

    /// xy = native resolution, zw = sub-pixel jitter applied this frame
    pub screen: Vec4,
}

impl Camera {
    pub fn new(
        view: Mat4,
        projection: Mat4,
        prev_view_proj: Mat4,
        screen: Vec2,
        jitter: Vec2,
    ) -> Self {
        let world = view.inverse();
        let view_proj = projection * view;

        Self {
            view_proj,
            prev_view_proj,
            ndc_to_world: view_proj.inverse(),
            origin: world.w_axis.xyz().extend(1.0),
            forward: (-world.z_axis.xyz()).normalize().extend(0.0),
            screen: screen.extend(jitter.x).extend(jitter.y),
        }
    }

    pub fn screen_size(&self) -> Vec2 {
        self.screen.xy()
    }

    pub fn jitter(&self) -> Vec2 {
        self.screen.zw()
    }

    /// Returns the normalized direction of a primary ray going through given
    /// UV coordinates (0..1, top-left origin).
    pub fn ray_direction(&self, uv: Vec2) -> Vec3 {
        let ndc = uv * 2.0 - Vec2::ONE;
        let ndc = vec2(ndc.x, -ndc.y);

        let near = self.ndc_to_world.project_point3(ndc.extend(0.0));
        let far = self.ndc_to_world.project_point3(ndc.extend(1.0));
        let dir = (far - near).normalize_or_zero();

        // Reversed-z projections swap the planes
        if dir.dot(self.forward.xyz()) < 0.0 {
            -dir
        } else {
            dir
        }
    }

    /// Reconstructs world-space position from UV coordinates and linear
    /// (view-space) depth.
    pub fn world_position(&self, uv: Vec2, depth: f32) -> Vec3 {
        let dir = self.ray_direction(uv);
        let cos = dir.dot(self.forward.xyz()).max(LUSTRE_EPSILON);

        self.origin.xyz() + dir * (depth / cos)
    }

    /// Projects a world-space point through the previous frame's camera,
    /// returning its UV coordinates; `None` if it lands behind the camera.
    pub fn world_to_prev_uv(&self, pos: Vec3) -> Option<Vec2> {
        let clip = self.prev_view_proj * pos.extend(1.0);

        if clip.w <= LUSTRE_EPSILON {
            return None;
        }

        let ndc = clip.xy() / clip.w;

        Some(vec2(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5))
    }
}
