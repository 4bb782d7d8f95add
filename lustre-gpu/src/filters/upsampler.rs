use glam::{IVec2, UVec2, Vec4};

use crate::{
    bilinear_weights, GBufferEntry, ImageRead, LUSTRE_EPSILON,
    REPROJECTION_TAPS,
};

/// Below this total weight the bilateral taps are considered unusable and
/// the nearest low-resolution texel is returned instead.
pub const UPSAMPLE_MIN_WEIGHT: f32 = 1e-4;

const UPSAMPLE_DEPTH_SIGMA: f32 = 0.1;
const UPSAMPLE_NORMAL_PHI: f32 = 32.0;

/// Reconstructs a full-resolution pixel out of a reduced-resolution image,
/// weighting the four closest texels by their geometric similarity.
pub struct Upsampler<'a, I> {
    pub input: &'a I,
    pub low_gbuffer: &'a I,
    pub full_gbuffer: &'a I,
}

impl<'a, I> Upsampler<'a, I>
where
    I: ImageRead,
{
    pub fn run(self, pos: UVec2) -> Vec4 {
        let full_size = self.full_gbuffer.size().as_vec2();
        let low_size = self.input.size();
        let max = low_size.as_ivec2() - 1;

        let low_pos =
            (pos.as_vec2() + 0.5) / full_size * low_size.as_vec2() - 0.5;

        let p00 = low_pos.floor().as_ivec2();
        let weights = bilinear_weights(low_pos - low_pos.floor());
        let center = GBufferEntry::load(self.full_gbuffer, pos);

        let mut sum = Vec4::ZERO;
        let mut weight_sum = 0.0;

        for (offset, weight) in REPROJECTION_TAPS.into_iter().zip(weights) {
            if weight == 0.0 {
                continue;
            }

            let tap_pos = (p00 + offset).clamp(IVec2::ZERO, max).as_uvec2();
            let mut weight = weight;

            if !center.is_sky() {
                let tap = GBufferEntry::load(self.low_gbuffer, tap_pos);

                if tap.is_sky() {
                    continue;
                }

                let depth_diff = (tap.depth - center.depth).abs();

                weight *= (-depth_diff
                    / (center.depth * UPSAMPLE_DEPTH_SIGMA + LUSTRE_EPSILON))
                    .exp();

                weight *= center.normal_weight(&tap, UPSAMPLE_NORMAL_PHI);
            }

            sum += self.input.load(tap_pos) * weight;
            weight_sum += weight;
        }

        if weight_sum < UPSAMPLE_MIN_WEIGHT {
            let nearest = low_pos.round().as_ivec2().clamp(IVec2::ZERO, max);

            self.input.load(nearest.as_uvec2())
        } else {
            sum / weight_sum
        }
    }
}
