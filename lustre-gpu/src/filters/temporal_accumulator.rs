use glam::{ivec2, vec2, vec4, UVec2, Vec3, Vec4, Vec4Swizzles};

use crate::{
    lerp, BilinearFilter, Camera, F32Ext, GBufferEntry, ImageRead,
    ReprojectPassParams, Reprojection, Vec3Ext, MAX_HISTORY_LENGTH,
};

/// Blends this frame's noisy signal with its reprojected history, tracking
/// luminance moments for variance estimation.
pub struct TemporalAccumulator<'a, I> {
    pub camera: &'a Camera,
    pub params: &'a ReprojectPassParams,
    pub signal: &'a I,
    pub history_color: &'a I,
    pub history_moments: &'a I,
    pub curr_gbuffer: &'a I,
    pub prev_gbuffer: &'a I,
    pub motion: &'a I,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Accumulated {
    /// rgb = accumulated color, a = variance
    pub color: Vec4,

    /// x = first moment, y = second moment, z = history length
    pub moments: Vec4,

    /// Blend factor the current sample was taken with
    pub alpha: f32,

    /// Whether this pixel wants its tile to go through the spatial filter
    pub needs_filtering: bool,
}

impl<'a, I> TemporalAccumulator<'a, I>
where
    I: ImageRead,
{
    pub fn run(self, pos: UVec2) -> Accumulated {
        let signal = self.signal.load(pos);
        let curr = GBufferEntry::load(self.curr_gbuffer, pos);
        let luma = signal.xyz().luma();

        // Sky doesn't need denoising, but it still has to land in the output
        // so that the filters can read it
        if curr.is_sky() {
            return Accumulated {
                color: signal.xyz().extend(0.0),
                moments: vec4(luma, luma.sqr(), 1.0, 0.0),
                alpha: 1.0,
                needs_filtering: false,
            };
        }

        let reprojection = if self.params.is_history_valid() {
            self.reproject(pos, signal, curr)
        } else {
            Default::default()
        };

        let (mut history, history_moments) = if reprojection.is_some() {
            let color = BilinearFilter::reproject(reprojection, |pos| {
                self.history_color.load(pos)
            });

            let moments = BilinearFilter::reproject(reprojection, |pos| {
                self.history_moments.load(pos)
            });

            (color.xyz(), moments)
        } else {
            (signal.xyz(), Vec4::ZERO)
        };

        let mut history_len = history_moments.z;
        let neighborhood = Neighborhood::new(self.signal, self.curr_gbuffer, pos);

        if reprojection.is_some() && self.params.is_neighborhood_clamping_enabled()
        {
            let extent = neighborhood.std * self.params.neighborhood_std_scale;
            let clamped = history.clamp(
                neighborhood.mean - extent,
                neighborhood.mean + extent,
            );

            let dist = (history - clamped).length();

            // The further history had to be moved, the less we trust it
            if dist > 0.0 {
                let extent = extent.length();

                history_len *= extent / (extent + dist);
            }

            history = clamped;
        }

        let history_len = (history_len + 1.0).min(MAX_HISTORY_LENGTH);
        let alpha = self.params.alpha.max(1.0 / history_len);
        let moments_alpha = self.params.moments_alpha.max(1.0 / history_len);

        let color = lerp(history, signal.xyz(), alpha);

        let moments = lerp(
            history_moments.xy(),
            vec2(luma, luma.sqr()),
            moments_alpha,
        );

        let variance = if history_len < self.params.history_threshold {
            neighborhood.luma_variance
        } else {
            (moments.y - moments.x.sqr()).max(0.0)
        };

        Accumulated {
            color: color.extend(variance),
            moments: vec4(moments.x, moments.y, history_len, 0.0),
            alpha,
            needs_filtering: history_len < self.params.history_threshold
                || variance > self.params.variance_threshold,
        }
    }

    fn reproject(
        &self,
        pos: UVec2,
        signal: Vec4,
        curr: GBufferEntry,
    ) -> Reprojection {
        if self.params.uses_hit_distance() {
            let reprojection = Reprojection::find_virtual(
                self.camera,
                pos,
                signal.w,
                curr,
                self.prev_gbuffer,
            );

            if reprojection.is_some() {
                return reprojection;
            }
        }

        Reprojection::find(
            pos,
            self.motion.load(pos).xy(),
            curr,
            self.prev_gbuffer,
        )
    }
}

/// Statistics of the current signal over a 3x3 window, ignoring sky.
struct Neighborhood {
    mean: Vec3,
    std: Vec3,
    luma_variance: f32,
}

impl Neighborhood {
    fn new(
        signal: &impl ImageRead,
        gbuffer: &impl ImageRead,
        center: UVec2,
    ) -> Self {
        let mut m1 = Vec3::ZERO;
        let mut m2 = Vec3::ZERO;
        let mut luma_m1 = 0.0;
        let mut luma_m2 = 0.0;
        let mut count = 0.0;

        for dy in -1..=1 {
            for dx in -1..=1 {
                let pos = center.as_ivec2() + ivec2(dx, dy);

                let Some(sample) = signal.try_load(pos) else {
                    continue;
                };

                if GBufferEntry::load(gbuffer, pos.as_uvec2()).is_sky() {
                    continue;
                }

                let sample = sample.xyz();
                let luma = sample.luma();

                m1 += sample;
                m2 += sample * sample;
                luma_m1 += luma;
                luma_m2 += luma.sqr();
                count += 1.0;
            }
        }

        // The center pixel is never sky here, so there's at least one sample
        let mean = m1 / count;
        let std = (m2 / count - mean * mean).max(Vec3::ZERO);

        Self {
            mean,
            std: Vec3::new(std.x.sqrt(), std.y.sqrt(), std.z.sqrt()),
            luma_variance: (luma_m2 / count - (luma_m1 / count).sqr()).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::uvec2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::ImageView;

    const SIZE: UVec2 = UVec2::new(8, 8);

    struct Scene {
        camera: Camera,
        params: ReprojectPassParams,
        signal: Vec<Vec4>,
        history_color: Vec<Vec4>,
        history_moments: Vec<Vec4>,
        gbuffer: Vec<Vec4>,
        motion: Vec<Vec4>,
    }

    impl Scene {
        fn new(signal: Vec4) -> Self {
            let len = (SIZE.x * SIZE.y) as usize;

            Self {
                camera: Default::default(),
                params: ReprojectPassParams {
                    alpha: 0.1,
                    moments_alpha: 0.2,
                    history_threshold: 4.0,
                    variance_threshold: 1e-3,
                    neighborhood_std_scale: 1.0,
                    history_valid: 1,
                    ..Default::default()
                },
                signal: vec![signal; len],
                history_color: vec![Vec4::ZERO; len],
                history_moments: vec![Vec4::ZERO; len],
                gbuffer: vec![GBufferEntry::new(Vec3::Z, 4.0).pack(); len],
                motion: vec![Vec4::ZERO; len],
            }
        }

        fn run(&self, pos: UVec2) -> Accumulated {
            let signal = ImageView::new(SIZE, &self.signal);
            let history_color = ImageView::new(SIZE, &self.history_color);
            let history_moments = ImageView::new(SIZE, &self.history_moments);
            let gbuffer = ImageView::new(SIZE, &self.gbuffer);
            let motion = ImageView::new(SIZE, &self.motion);

            TemporalAccumulator {
                camera: &self.camera,
                params: &self.params,
                signal: &signal,
                history_color: &history_color,
                history_moments: &history_moments,
                curr_gbuffer: &gbuffer,
                prev_gbuffer: &gbuffer,
                motion: &motion,
            }
            .run(pos)
        }

        /// Runs accumulation over the entire image and feeds the result back
        /// as history, like two consecutive frames would.
        fn step(&mut self) -> Vec<Accumulated> {
            let out: Vec<_> = (0..SIZE.y)
                .flat_map(|y| (0..SIZE.x).map(move |x| uvec2(x, y)))
                .map(|pos| self.run(pos))
                .collect();

            self.history_color = out.iter().map(|acc| acc.color).collect();
            self.history_moments = out.iter().map(|acc| acc.moments).collect();

            out
        }
    }

    #[test]
    fn invalid_history_takes_current_sample() {
        let mut scene = Scene::new(vec4(0.3, 0.6, 0.9, 0.0));

        scene.params.history_valid = 0;
        scene.history_color = vec![Vec4::splat(1234.0); 64];
        scene.history_moments = vec![vec4(5.0, 6.0, 20.0, 0.0); 64];

        let target = scene.run(uvec2(3, 3));

        assert_eq!(1.0, target.alpha);
        assert_eq!(Vec3::new(0.3, 0.6, 0.9), target.color.xyz());
        assert!(target.color.w < 1e-6);
        assert_eq!(1.0, target.moments.z);
        assert!(target.needs_filtering);
    }

    #[test]
    fn zeroed_history_takes_current_sample() {
        let scene = Scene::new(Vec4::splat(0.5));
        let target = scene.run(uvec2(3, 3));

        assert_eq!(1.0, target.alpha);
        assert_eq!(Vec3::splat(0.5), target.color.xyz());
    }

    #[test]
    fn disocclusion_takes_current_sample() {
        let mut scene = Scene::new(Vec4::splat(0.5));

        scene.history_color = vec![Vec4::splat(0.1); 64];
        scene.history_moments = vec![vec4(0.1, 0.01, 10.0, 0.0); 64];

        // Everything moved in from off-screen
        scene.motion = vec![vec4(2.0, 0.0, 0.0, 0.0); 64];

        let target = scene.run(uvec2(3, 3));

        assert_eq!(1.0, target.alpha);
        assert_eq!(Vec3::splat(0.5), target.color.xyz());
    }

    #[test]
    fn converges_monotonically() {
        let mut scene = Scene::new(Vec4::ONE);

        scene.history_moments = vec![vec4(0.0, 0.0, 1.0, 0.0); 64];

        let mut prev = 0.0;
        let mut prev_variance = f32::MAX;

        for frame in 0..60 {
            let target = scene.step()[27];
            let color = target.color.x;
            let variance = target.color.w;

            assert!(color > prev, "frame {frame}: {color} <= {prev}");
            assert!(color <= 1.0);

            if frame > 4 && frame < 30 {
                assert!(variance <= prev_variance + 1e-6, "frame {frame}");
            }

            prev = color;
            prev_variance = variance;
        }

        // ~6/alpha frames
        assert!((1.0 - prev) < 1e-3, "{prev}");
        assert!(prev_variance < 1e-4, "{prev_variance}");
    }

    #[test]
    fn neighborhood_clamping_rejects_stale_history() {
        let mut scene = Scene::new(Vec4::ONE);

        scene.params.neighborhood_clamping = 1;
        scene.history_color = vec![Vec4::ZERO; 64];
        scene.history_moments = vec![vec4(0.0, 0.0, 12.0, 0.0); 64];

        let target = scene.run(uvec2(3, 3));

        assert_eq!(Vec3::ONE, target.color.xyz());
        assert_eq!(1.0, target.moments.z);
        assert_eq!(0.0, target.color.w);
    }

    #[test]
    fn variance_is_estimated_spatially_for_young_history() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut scene = Scene::new(Vec4::ZERO);

        scene.params.history_valid = 0;
        scene.signal = (0..64)
            .map(|_| Vec4::splat(rng.gen_range(0.0..1.0)))
            .collect();

        let target = scene.run(uvec2(3, 3));

        assert!(target.color.w > 0.0);
        assert!(target.color.w.is_finite());
        assert!(target.needs_filtering);
    }

    #[test]
    fn sky_is_passed_through() {
        let mut scene = Scene::new(vec4(0.2, 0.4, 0.8, 0.0));

        scene.gbuffer[3 * 8 + 3] = GBufferEntry::sky().pack();

        let target = scene.run(uvec2(3, 3));

        assert_eq!(vec4(0.2, 0.4, 0.8, 0.0), target.color);
        assert!(!target.needs_filtering);
    }

    #[test]
    fn hit_distance_falls_back_to_motion_vectors() {
        let mut scene = Scene::new(Vec4::new(1.0, 1.0, 1.0, -1.0));

        scene.params.reprojection_mode = crate::REPROJECTION_MODE_HIT_DISTANCE;
        scene.history_color = vec![Vec4::splat(0.5); 64];
        scene.history_moments = vec![vec4(0.5, 0.25, 8.0, 0.0); 64];

        let target = scene.run(uvec2(3, 3));

        // Negative hit distance means a miss, so reprojection must have
        // gone through the (zero) motion vectors
        assert_eq!(9.0, target.moments.z);
        assert!(target.alpha < 1.0);
    }
}
