use glam::{ivec2, vec2, IVec2, UVec2, Vec2, Vec4, Vec4Swizzles};

use crate::{
    ATrousPassParams, F32Ext, GBufferEntry, ImageRead, Vec3Ext, LUSTRE_EPSILON,
};

/// Per-axis weights of the filter's kernel, indexed by tap distance (in
/// steps) from the center.
pub const ATROUS_KERNEL: [f32; 3] = [1.0, 2.0 / 3.0, 1.0 / 6.0];

pub const ATROUS_MAX_RADIUS: u32 = 2;

/// Depth difference (relative to the center's depth) tolerated regardless
/// of the surface's slope.
const DEPTH_LEEWAY: f32 = 1e-3;

/// Single iteration of the edge-stopping à-trous wavelet filter.
///
/// Input's alpha channel carries per-pixel variance, which drives the
/// luminance edge-stopping function and gets filtered alongside the color.
pub struct ATrousFilter<'a, I> {
    pub params: &'a ATrousPassParams,
    pub input: &'a I,
    pub gbuffer: &'a I,
}

impl<'a, I> ATrousFilter<'a, I>
where
    I: ImageRead,
{
    pub fn run(self, pos: UVec2) -> Vec4 {
        let center = self.input.load(pos);
        let radius = self.params.radius.min(ATROUS_MAX_RADIUS) as i32;

        if radius == 0 {
            return center;
        }

        let center_gbuffer = GBufferEntry::load(self.gbuffer, pos);

        if center_gbuffer.is_sky() {
            return center;
        }

        let center_luma = center.xyz().luma();

        let luma_sigma = self.params.phi_color
            * self.blurred_variance(pos).sqrt()
            + LUSTRE_EPSILON;

        let depth_gradient = self.depth_gradient(pos, center_gbuffer.depth);
        let depth_leeway = center_gbuffer.depth * DEPTH_LEEWAY + LUSTRE_EPSILON;
        let step = self.params.step_size.max(1) as i32;

        let mut color_sum = center.xyz();
        let mut variance_sum = center.w;
        let mut weight_sum = 1.0;

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx == 0 && dy == 0 {
                    continue;
                }

                let offset = ivec2(dx, dy) * step;
                let tap_pos = pos.as_ivec2() + offset;

                let Some(tap) = self.input.try_load(tap_pos) else {
                    continue;
                };

                let tap_gbuffer =
                    GBufferEntry::load(self.gbuffer, tap_pos.as_uvec2());

                if tap_gbuffer.is_sky() {
                    continue;
                }

                let kernel_weight = ATROUS_KERNEL[dx.unsigned_abs() as usize]
                    * ATROUS_KERNEL[dy.unsigned_abs() as usize];

                let color_weight = {
                    let diff = (tap.xyz().luma() - center_luma).abs();

                    (-diff / luma_sigma).exp()
                };

                let normal_weight = center_gbuffer
                    .normal_weight(&tap_gbuffer, self.params.phi_normal);

                let depth_weight = {
                    let diff = (tap_gbuffer.depth - center_gbuffer.depth).abs();

                    let expected = self.params.sigma_depth
                        * depth_gradient.dot(offset.as_vec2()).abs();

                    (-diff / (expected + depth_leeway)).exp()
                };

                let weight =
                    kernel_weight * color_weight * normal_weight * depth_weight;

                color_sum += tap.xyz() * weight;
                variance_sum += tap.w * weight.sqr();
                weight_sum += weight;
            }
        }

        (color_sum / weight_sum).extend(variance_sum / weight_sum.sqr())
    }

    /// Returns variance blurred with a 3x3 gaussian; raw per-pixel variance
    /// is too noisy to drive the edge-stopping function directly.
    fn blurred_variance(&self, pos: UVec2) -> f32 {
        const KERNEL: [f32; 2] = [0.25, 0.125];

        let mut sum = 0.0;
        let mut weight_sum = 0.0;

        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let Some(tap) = self.input.try_load(pos.as_ivec2() + ivec2(dx, dy))
                else {
                    continue;
                };

                let weight = KERNEL[dx.unsigned_abs() as usize]
                    * KERNEL[dy.unsigned_abs() as usize];

                sum += tap.w * weight;
                weight_sum += weight;
            }
        }

        (sum / weight_sum).max(0.0)
    }

    /// Returns screen-space depth derivatives at given pixel, picking the
    /// one-sided difference of smaller magnitude so that silhouettes don't
    /// inflate the gradient.
    fn depth_gradient(&self, pos: UVec2, depth: f32) -> Vec2 {
        let depth_at = |pos: IVec2| {
            self.gbuffer
                .try_load(pos)
                .map(GBufferEntry::unpack)
                .filter(|entry| !entry.is_sky())
                .map(|entry| entry.depth)
        };

        let along = |dir: IVec2| {
            let fwd = depth_at(pos.as_ivec2() + dir).map(|d| d - depth);
            let bwd = depth_at(pos.as_ivec2() - dir).map(|d| depth - d);

            match (fwd, bwd) {
                (Some(fwd), Some(bwd)) => {
                    if fwd.abs() < bwd.abs() {
                        fwd
                    } else {
                        bwd
                    }
                }
                (Some(fwd), None) => fwd,
                (None, Some(bwd)) => bwd,
                (None, None) => 0.0,
            }
        };

        vec2(along(IVec2::X), along(IVec2::Y))
    }
}
