use glam::{ivec2, UVec2, Vec3, Vec4, Vec4Swizzles};

use crate::{
    lerp, rgb_to_ycocg, ycocg_to_rgb, F32Ext, ImageRead, TaaPassParams,
    Vec3Ext,
};

/// Temporal anti-aliasing resolve: blends the jittered current frame with
/// its reprojected, neighborhood-clipped history.
pub struct TaaResolver<'a, I> {
    pub params: &'a TaaPassParams,
    pub current: &'a I,
    pub history: &'a I,
    pub motion: &'a I,
}

impl<'a, I> TaaResolver<'a, I>
where
    I: ImageRead,
{
    pub fn run(self, pos: UVec2) -> Vec4 {
        let current = self.current.load(pos).xyz();

        if !self.params.is_history_valid() {
            return current.extend(1.0);
        }

        let size = self.current.size().as_vec2();
        let uv = (pos.as_vec2() + 0.5) / size + self.motion.load(pos).xy();

        if uv.x < 0.0 || uv.y < 0.0 || uv.x > 1.0 || uv.y > 1.0 {
            return current.extend(1.0);
        }

        let mut aabb_min = Vec3::splat(f32::MAX);
        let mut aabb_max = Vec3::splat(f32::MIN);
        let mut cross_sum = Vec3::ZERO;

        for dy in -1..=1 {
            for dx in -1..=1 {
                let sample =
                    self.current.load_clamped(pos.as_ivec2() + ivec2(dx, dy));

                let sample = sample.xyz();
                let ycocg = rgb_to_ycocg(sample);

                aabb_min = aabb_min.min(ycocg);
                aabb_max = aabb_max.max(ycocg);

                if (dx == 0) != (dy == 0) {
                    cross_sum += sample;
                }
            }
        }

        let history = self.history.sample_bilinear(uv).xyz();
        let history = ycocg_to_rgb(rgb_to_ycocg(history).clip(aabb_min, aabb_max));

        let feedback = {
            let curr_luma = current.luma();
            let hist_luma = history.luma();
            let diff = (curr_luma - hist_luma).abs()
                / curr_luma.max(hist_luma).max(0.2);

            lerp(
                self.params.feedback_min,
                self.params.feedback_max,
                (1.0 - diff).saturate().sqr(),
            )
        };

        let resolved = lerp(current, history, feedback);
        let sharpened = resolved + (current - cross_sum / 4.0) * self.params.sharpen;

        sharpened.max(Vec3::ZERO).extend(1.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{uvec2, vec4};

    use super::*;
    use crate::ImageView;

    const SIZE: UVec2 = UVec2::new(4, 4);

    fn params() -> TaaPassParams {
        TaaPassParams {
            feedback_min: 0.88,
            feedback_max: 0.97,
            sharpen: 0.0,
            history_valid: 1,
        }
    }

    fn resolve(
        params: &TaaPassParams,
        current: &[Vec4],
        history: &[Vec4],
        pos: UVec2,
    ) -> Vec4 {
        let motion = [Vec4::ZERO; 16];

        TaaResolver {
            params,
            current: &ImageView::new(SIZE, current),
            history: &ImageView::new(SIZE, history),
            motion: &ImageView::new(SIZE, &motion),
        }
        .run(pos)
    }

    #[test]
    fn reset_takes_current_frame() {
        let params = TaaPassParams {
            history_valid: 0,
            ..params()
        };

        let current = [vec4(0.2, 0.3, 0.4, 0.0); 16];
        let history = [Vec4::splat(9.0); 16];

        assert_eq!(
            vec4(0.2, 0.3, 0.4, 1.0),
            resolve(&params, &current, &history, uvec2(1, 1))
        );
    }

    #[test]
    fn outlier_history_is_clipped() {
        let current = [Vec4::splat(0.5); 16];
        let history = [Vec4::splat(5.0); 16];
        let target = resolve(&params(), &current, &history, uvec2(2, 2));

        assert_relative_eq!(target.x, 0.5, epsilon = 1e-4);
        assert_relative_eq!(target.y, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn converged_history_is_kept() {
        let mut current = [Vec4::splat(0.4); 16];

        current[5] = Vec4::splat(0.6);

        let history = [Vec4::splat(0.45); 16];
        let target = resolve(&params(), &current, &history, uvec2(2, 2));

        // History lies inside the neighborhood, so it dominates the output
        assert!((target.x - 0.45).abs() < (target.x - 0.4).abs());
    }
}
