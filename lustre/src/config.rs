use glam::UVec2;
use lustre_gpu as gpu;

/// Resolution, relative to the native one, at which a signal is traced and
/// denoised.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RayTraceScale {
    #[default]
    Full,
    Half,
    Quarter,
}

impl RayTraceScale {
    /// Returns the G-buffer mip level matching this scale.
    pub fn mip(self) -> u32 {
        match self {
            RayTraceScale::Full => 0,
            RayTraceScale::Half => 1,
            RayTraceScale::Quarter => 2,
        }
    }

    pub fn working_size(self, native_size: UVec2) -> UVec2 {
        gpu::mip_size(native_size, self.mip())
    }

    pub fn is_full(self) -> bool {
        self == RayTraceScale::Full
    }
}

/// Stage whose result [`crate::Denoiser::output()`] exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputStage {
    RayTrace,
    TemporalAccumulation,
    ATrous,

    /// Final output; at full scale this is the same as [`Self::ATrous`]
    #[default]
    Upsample,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReprojectionMode {
    /// Follow the G-buffer's motion vectors
    #[default]
    MotionVectors,

    /// Follow the virtual image of the reflected point (signal's alpha
    /// channel carries hit distance), falling back to motion vectors
    HitDistance,
}

impl ReprojectionMode {
    fn serialize(self) -> u32 {
        match self {
            ReprojectionMode::MotionVectors => {
                gpu::REPROJECTION_MODE_MOTION_VECTORS
            }
            ReprojectionMode::HitDistance => gpu::REPROJECTION_MODE_HIT_DISTANCE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DenoiserKind {
    Shadows,
    AmbientOcclusion,
    Reflections,
    GlobalIllumination,
}

impl DenoiserKind {
    pub fn name(self) -> &'static str {
        match self {
            DenoiserKind::Shadows => "shadows",
            DenoiserKind::AmbientOcclusion => "ao",
            DenoiserKind::Reflections => "reflections",
            DenoiserKind::GlobalIllumination => "gi",
        }
    }
}

/// Runtime-tweakable parameters of a denoiser instance.
///
/// Changing any of them never reallocates resources; see
/// [`DenoiserConfig::sanitized()`] for the accepted ranges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DenoiserConfig {
    /// Weight of the current sample once history is long enough
    pub alpha: f32,

    /// Same as `alpha`, but for the moments used to estimate variance
    pub moments_alpha: f32,

    /// Whether temporal history is fed from an à-trous iteration (see
    /// `feedback_iteration`) instead of the raw accumulated signal
    pub blur_as_input: bool,

    pub atrous_radius: u32,
    pub filter_iterations: u32,
    pub feedback_iteration: u32,
    pub phi_color: f32,
    pub phi_normal: f32,
    pub sigma_depth: f32,

    /// Pixels with history shorter than this many frames always get
    /// spatially filtered
    pub history_threshold: u32,

    /// Pixels with variance above this always get spatially filtered
    pub variance_threshold: f32,

    pub neighborhood_clamping: bool,
    pub neighborhood_std_scale: f32,
    pub reprojection_mode: ReprojectionMode,

    /// When disabled, the raw signal is passed through and no work is
    /// recorded
    pub denoise: bool,

    pub output_stage: OutputStage,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            moments_alpha: 0.2,
            blur_as_input: false,
            atrous_radius: 1,
            filter_iterations: 4,
            feedback_iteration: 1,
            phi_color: 10.0,
            phi_normal: 32.0,
            sigma_depth: 1.0,
            history_threshold: 4,
            variance_threshold: 1e-3,
            neighborhood_clamping: true,
            neighborhood_std_scale: 1.0,
            reprojection_mode: ReprojectionMode::MotionVectors,
            denoise: true,
            output_stage: OutputStage::Upsample,
        }
    }
}

impl DenoiserConfig {
    pub const MAX_RADIUS: u32 = gpu::ATROUS_MAX_RADIUS;
    pub const MAX_FILTER_ITERATIONS: u32 = 5;
    pub const MAX_FEEDBACK_ITERATION: u32 = 4;

    pub fn for_kind(kind: DenoiserKind) -> Self {
        match kind {
            DenoiserKind::Shadows => Self::default(),

            DenoiserKind::AmbientOcclusion => Self {
                filter_iterations: 3,
                ..Self::default()
            },

            DenoiserKind::Reflections => Self {
                alpha: 0.05,
                atrous_radius: 2,
                filter_iterations: 3,
                phi_color: 4.0,
                neighborhood_std_scale: 2.0,
                reprojection_mode: ReprojectionMode::HitDistance,
                ..Self::default()
            },

            DenoiserKind::GlobalIllumination => Self {
                alpha: 0.02,
                blur_as_input: true,
                filter_iterations: 5,
                feedback_iteration: 0,
                neighborhood_std_scale: 1.5,
                ..Self::default()
            },
        }
    }

    /// Returns a copy of this config with every parameter clamped into its
    /// valid range; NaNs fall back to defaults.
    pub fn sanitized(self) -> Self {
        let default = Self::default();

        let clamp = |value: f32, min: f32, max: f32, default: f32| {
            if value.is_nan() {
                default
            } else {
                value.clamp(min, max)
            }
        };

        Self {
            alpha: clamp(self.alpha, 0.0, 1.0, default.alpha),
            moments_alpha: clamp(
                self.moments_alpha,
                0.0,
                1.0,
                default.moments_alpha,
            ),
            atrous_radius: self.atrous_radius.min(Self::MAX_RADIUS),
            filter_iterations: self
                .filter_iterations
                .min(Self::MAX_FILTER_ITERATIONS),
            feedback_iteration: self
                .feedback_iteration
                .min(Self::MAX_FEEDBACK_ITERATION),
            phi_color: clamp(self.phi_color, 0.0, f32::MAX, default.phi_color),
            phi_normal: clamp(
                self.phi_normal,
                0.0,
                f32::MAX,
                default.phi_normal,
            ),
            sigma_depth: clamp(
                self.sigma_depth,
                0.0,
                f32::MAX,
                default.sigma_depth,
            ),
            history_threshold: self
                .history_threshold
                .min(gpu::MAX_HISTORY_LENGTH as u32),
            variance_threshold: clamp(
                self.variance_threshold,
                0.0,
                f32::MAX,
                default.variance_threshold,
            ),
            neighborhood_std_scale: clamp(
                self.neighborhood_std_scale,
                0.0,
                f32::MAX,
                default.neighborhood_std_scale,
            ),
            ..self
        }
    }

    /// Returns the iteration whose output feeds the temporal history, if
    /// any; otherwise history comes straight out of temporal accumulation.
    pub fn feedback_tap(&self) -> Option<u32> {
        (self.blur_as_input && self.feedback_iteration < self.filter_iterations)
            .then_some(self.feedback_iteration)
    }

    pub(crate) fn reproject_params(
        &self,
        history_valid: bool,
        gbuffer_mip: u32,
    ) -> gpu::ReprojectPassParams {
        gpu::ReprojectPassParams {
            alpha: self.alpha,
            moments_alpha: self.moments_alpha,
            history_threshold: self.history_threshold as f32,
            variance_threshold: self.variance_threshold,
            neighborhood_std_scale: self.neighborhood_std_scale,
            history_valid: history_valid as u32,
            neighborhood_clamping: self.neighborhood_clamping as u32,
            reprojection_mode: self.reprojection_mode.serialize(),
            gbuffer_mip,
        }
    }

    pub(crate) fn atrous_params(
        &self,
        iteration: u32,
        gbuffer_mip: u32,
    ) -> gpu::ATrousPassParams {
        gpu::ATrousPassParams {
            radius: self.atrous_radius,
            step_size: 1 << iteration,
            phi_color: self.phi_color,
            phi_normal: self.phi_normal,
            sigma_depth: self.sigma_depth,
            gbuffer_mip,
        }
    }
}
