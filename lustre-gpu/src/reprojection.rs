use glam::{ivec2, vec2, IVec2, UVec2, Vec2};

use crate::{bilinear_weights, Camera, GBufferEntry, ImageRead, LUSTRE_EPSILON};

/// Offsets of the four history taps surrounding a reprojected position, in
/// the same order as [`Reprojection::validity`]'s bits.
pub const REPROJECTION_TAPS: [IVec2; 4] =
    [ivec2(0, 0), ivec2(1, 0), ivec2(0, 1), ivec2(1, 1)];

/// Where a pixel was in the previous frame and which of the surrounding
/// history texels can be trusted.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct Reprojection {
    /// Position in the previous frame, in texels (texel centers sit on
    /// integer coordinates)
    pub prev_x: f32,
    pub prev_y: f32,

    /// Sum of bilinear weights of the valid taps; zero means a miss
    pub confidence: f32,

    /// Bitmask of taps (see [`REPROJECTION_TAPS`]) that passed the
    /// geometric test
    pub validity: u32,
}

impl Reprojection {
    /// Reprojects pixel through its motion vector (expressed in UV units,
    /// pointing from the current frame into the previous one).
    pub fn find(
        pos: UVec2,
        motion: Vec2,
        curr: GBufferEntry,
        prev_gbuffer: &impl ImageRead,
    ) -> Self {
        let uv = Self::uv(pos, prev_gbuffer.size());

        Self::find_at(uv + motion, curr, prev_gbuffer)
    }

    /// Reprojects pixel through the virtual position of its reflection, i.e.
    /// the point lying `hit_distance` behind the surface along the primary
    /// ray; used for mirror-like signals, for which motion vectors of the
    /// surface itself produce smearing.
    pub fn find_virtual(
        camera: &Camera,
        pos: UVec2,
        hit_distance: f32,
        curr: GBufferEntry,
        prev_gbuffer: &impl ImageRead,
    ) -> Self {
        if hit_distance <= 0.0 {
            return Default::default();
        }

        let uv = Self::uv(pos, prev_gbuffer.size());
        let surface = camera.world_position(uv, curr.depth);
        let point = surface + camera.ray_direction(uv) * hit_distance;

        match camera.world_to_prev_uv(point) {
            Some(prev_uv) => Self::find_at(prev_uv, curr, prev_gbuffer),
            None => Default::default(),
        }
    }

    pub fn find_at(
        prev_uv: Vec2,
        curr: GBufferEntry,
        prev_gbuffer: &impl ImageRead,
    ) -> Self {
        let prev_pos = prev_uv * prev_gbuffer.size().as_vec2() - 0.5;
        let weights = bilinear_weights(prev_pos - prev_pos.floor());
        let p00 = prev_pos.floor().as_ivec2();

        let mut confidence = 0.0;
        let mut validity = 0;

        for (tap_idx, offset) in REPROJECTION_TAPS.into_iter().enumerate() {
            let Some(prev) = prev_gbuffer.try_load(p00 + offset) else {
                continue;
            };

            if curr.matches(&GBufferEntry::unpack(prev)) {
                validity |= 1 << tap_idx;
                confidence += weights[tap_idx];
            }
        }

        Self {
            prev_x: prev_pos.x,
            prev_y: prev_pos.y,
            confidence,
            validity,
        }
    }

    fn uv(pos: UVec2, size: UVec2) -> Vec2 {
        (pos.as_vec2() + 0.5) / size.as_vec2()
    }

    pub fn is_some(&self) -> bool {
        self.confidence > LUSTRE_EPSILON
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }

    pub fn prev_pos(&self) -> Vec2 {
        vec2(self.prev_x, self.prev_y)
    }

    pub fn prev_pos_floor(&self) -> IVec2 {
        self.prev_pos().floor().as_ivec2()
    }

    pub fn prev_pos_fract(&self) -> Vec2 {
        self.prev_pos() - self.prev_pos().floor()
    }

    pub fn is_tap_valid(&self, tap_idx: usize) -> bool {
        self.validity & (1 << tap_idx) > 0
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_relative_eq;
    use glam::{uvec2, vec3, Mat4, Vec3, Vec4};

    use super::*;
    use crate::ImageView;

    fn gbuffer(size: UVec2, depth: f32) -> Vec<Vec4> {
        vec![GBufferEntry::new(Vec3::Z, depth).pack(); (size.x * size.y) as usize]
    }

    /// Returns camera sitting at the origin and looking down -Z, with 90°
    /// field of view (so that NDC equals x / -z); `prev_offset` shifts world
    /// as seen by the previous frame.
    fn camera(prev_offset: Vec3) -> Camera {
        let view = Mat4::look_at_rh(Vec3::ZERO, -Vec3::Z, Vec3::Y);
        let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, 0.1, 100.0);

        Camera::new(
            view,
            projection,
            projection * view * Mat4::from_translation(prev_offset),
            vec2(8.0, 8.0),
            Vec2::ZERO,
        )
    }

    #[test]
    fn static_pixel() {
        let texels = gbuffer(uvec2(8, 8), 5.0);
        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        let target = Reprojection::find(uvec2(3, 4), Vec2::ZERO, curr, &prev);

        assert!(target.is_some());
        assert_eq!(3.0, target.prev_x);
        assert_eq!(4.0, target.prev_y);
        assert_eq!(1.0, target.confidence);
        assert_eq!(0b1111, target.validity);
    }

    #[test]
    fn off_screen() {
        let texels = gbuffer(uvec2(8, 8), 5.0);
        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        // Moved in from beyond the left edge
        let target =
            Reprojection::find(uvec2(0, 4), vec2(-0.5, 0.0), curr, &prev);

        assert!(target.is_none());
        assert_eq!(0, target.validity);
    }

    #[test]
    fn disocclusion() {
        let mut texels = gbuffer(uvec2(8, 8), 5.0);

        // Previously, there was something much closer in front of the pixel
        texels[4 * 8 + 3] = GBufferEntry::new(Vec3::Z, 1.0).pack();

        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        let target = Reprojection::find(uvec2(3, 4), Vec2::ZERO, curr, &prev);

        assert!(target.is_none());
        assert_eq!(0b1110, target.validity);
    }

    #[test]
    fn partial_validity() {
        let mut texels = gbuffer(uvec2(8, 8), 5.0);

        texels[4 * 8 + 4] = GBufferEntry::sky().pack();

        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        // Half a texel to the right, straddling (3, 4) and (4, 4)
        let target = Reprojection::find(
            uvec2(3, 4),
            vec2(0.5 / 8.0, 0.0),
            curr,
            &prev,
        );

        assert!(target.is_some());
        assert_eq!(0b1101, target.validity);
        assert!((target.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn virtual_static_camera() {
        let texels = gbuffer(uvec2(8, 8), 5.0);
        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        let target = Reprojection::find_virtual(
            &camera(Vec3::ZERO),
            uvec2(3, 4),
            3.0,
            curr,
            &prev,
        );

        assert!(target.is_some());
        assert_relative_eq!(target.prev_x, 3.0, epsilon = 1e-3);
        assert_relative_eq!(target.prev_y, 4.0, epsilon = 1e-3);
        assert_relative_eq!(target.confidence, 1.0, epsilon = 1e-4);
        assert_eq!(0b1111, target.validity);
    }

    #[test]
    fn virtual_moving_camera() {
        let texels = gbuffer(uvec2(8, 8), 5.0);
        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        // Pixel (4, 4) goes through NDC (0.125, -0.125); its surface lies at
        // z = -5 and the reflected point at z = -8, i.e. at (1, -1, -8).
        //
        // Shifting that point by 2 units along +X moves it by 0.25 in NDC,
        // which is exactly one texel.
        let target = Reprojection::find_virtual(
            &camera(vec3(2.0, 0.0, 0.0)),
            uvec2(4, 4),
            3.0,
            curr,
            &prev,
        );

        assert!(target.is_some());
        assert_relative_eq!(target.prev_x, 5.0, epsilon = 1e-3);
        assert_relative_eq!(target.prev_y, 4.0, epsilon = 1e-3);
        assert_relative_eq!(target.confidence, 1.0, epsilon = 1e-4);
        assert_eq!(0b1111, target.validity);

        // Motion vectors of the surface itself would've kept the pixel in
        // place
        let target = Reprojection::find(uvec2(4, 4), Vec2::ZERO, curr, &prev);

        assert_eq!(4.0, target.prev_x);
    }

    #[test]
    fn virtual_without_hit() {
        let texels = gbuffer(uvec2(8, 8), 5.0);
        let prev = ImageView::new(uvec2(8, 8), &texels);
        let curr = GBufferEntry::new(Vec3::Z, 5.0);

        let target = Reprojection::find_virtual(
            &camera(Vec3::ZERO),
            uvec2(3, 4),
            0.0,
            curr,
            &prev,
        );

        assert!(target.is_none());
    }
}
