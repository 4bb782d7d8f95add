use bytemuck::{Pod, Zeroable};

pub const REPROJECTION_MODE_MOTION_VECTORS: u32 = 0;
pub const REPROJECTION_MODE_HIT_DISTANCE: u32 = 1;

#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Pod, Zeroable, Debug)]
pub struct ReprojectPassParams {
    pub alpha: f32,
    pub moments_alpha: f32,
    pub history_threshold: f32,
    pub variance_threshold: f32,
    pub neighborhood_std_scale: f32,

    /// Zero when the history contains no usable data (first frame after the
    /// denoiser got created or reset); forces `alpha = 1`
    pub history_valid: u32,

    pub neighborhood_clamping: u32,
    pub reprojection_mode: u32,
    pub gbuffer_mip: u32,
}

impl ReprojectPassParams {
    pub fn is_history_valid(&self) -> bool {
        self.history_valid != 0
    }

    pub fn is_neighborhood_clamping_enabled(&self) -> bool {
        self.neighborhood_clamping != 0
    }

    pub fn uses_hit_distance(&self) -> bool {
        self.reprojection_mode == REPROJECTION_MODE_HIT_DISTANCE
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Pod, Zeroable, Debug)]
pub struct ATrousPassParams {
    pub radius: u32,
    pub step_size: u32,
    pub phi_color: f32,
    pub phi_normal: f32,
    pub sigma_depth: f32,
    pub gbuffer_mip: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Pod, Zeroable, Debug)]
pub struct UpsamplePassParams {
    pub gbuffer_mip: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Pod, Zeroable, Debug)]
pub struct TaaPassParams {
    pub feedback_min: f32,
    pub feedback_max: f32,
    pub sharpen: f32,
    pub history_valid: u32,
}

impl TaaPassParams {
    pub fn is_history_valid(&self) -> bool {
        self.history_valid != 0
    }
}
