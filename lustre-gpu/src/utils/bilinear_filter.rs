use glam::{vec4, UVec2, Vec2, Vec4};

use crate::{Reprojection, REPROJECTION_TAPS};

/// Returns bilinear weights of the four taps surrounding a point with given
/// fractional position, ordered like [`REPROJECTION_TAPS`].
pub fn bilinear_weights(uv: Vec2) -> [f32; 4] {
    [
        (1.0 - uv.x) * (1.0 - uv.y),
        uv.x * (1.0 - uv.y),
        (1.0 - uv.x) * uv.y,
        uv.x * uv.y,
    ]
}

#[derive(Clone, Copy, Debug)]
pub struct BilinearFilter {
    /// Sample at `f(x=0, y=0)`
    pub s00: Vec4,

    /// Sample at `f(x=1, y=0)`
    pub s10: Vec4,

    /// Sample at `f(x=0, y=1)`
    pub s01: Vec4,

    /// Sample at `f(x=1, y=1)`
    pub s11: Vec4,

    /// Weights for each sample; zero for taps that failed reprojection
    pub weights: Vec4,
}

impl BilinearFilter {
    pub fn reproject(
        reprojection: Reprojection,
        sample: impl Fn(UVec2) -> Vec4,
    ) -> Vec4 {
        Self::from_reprojection(reprojection, sample)
            .eval(reprojection.prev_pos_fract())
    }

    pub fn from_reprojection(
        reprojection: Reprojection,
        sample: impl Fn(UVec2) -> Vec4,
    ) -> Self {
        let p00 = reprojection.prev_pos_floor();
        let mut samples = [Vec4::ZERO; 4];
        let mut weights = [0.0; 4];

        for (tap_idx, offset) in REPROJECTION_TAPS.into_iter().enumerate() {
            if reprojection.is_tap_valid(tap_idx) {
                samples[tap_idx] = sample((p00 + offset).as_uvec2());
                weights[tap_idx] = 1.0;
            }
        }

        let [s00, s10, s01, s11] = samples;

        Self {
            s00,
            s10,
            s01,
            s11,
            weights: Vec4::from_array(weights),
        }
    }

    pub fn eval(&self, uv: Vec2) -> Vec4 {
        let [w00, w10, w01, w11] = bilinear_weights(uv);
        let weights = self.weights * vec4(w00, w10, w01, w11);
        let w_sum = weights.dot(Vec4::ONE);

        if w_sum == 0.0 {
            Default::default()
        } else {
            (self.s00 * weights.x
                + self.s10 * weights.y
                + self.s01 * weights.z
                + self.s11 * weights.w)
                / w_sum
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;

    use super::*;

    #[test]
    fn renormalizes_over_valid_taps() {
        let target = BilinearFilter {
            s00: Vec4::splat(1.0),
            s10: Vec4::splat(100.0),
            s01: Vec4::splat(3.0),
            s11: Vec4::splat(100.0),
            weights: vec4(1.0, 0.0, 1.0, 0.0),
        };

        assert_eq!(Vec4::splat(2.0), target.eval(vec2(0.5, 0.5)));
    }

    #[test]
    fn no_valid_taps() {
        let target = BilinearFilter {
            s00: Vec4::ONE,
            s10: Vec4::ONE,
            s01: Vec4::ONE,
            s11: Vec4::ONE,
            weights: Vec4::ZERO,
        };

        assert_eq!(Vec4::ZERO, target.eval(vec2(0.25, 0.75)));
    }
}
