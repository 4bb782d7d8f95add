//! Common structs and per-pixel algorithms shared by Lustre's denoiser
//! passes: the CPU device runs them directly, the WGSL shaders mirror them.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::too_many_arguments)]

mod camera;
mod filters;
mod frame_parity;
mod gbuffer;
mod image;
mod passes;
mod reprojection;
mod tiles;
mod utils;

pub use self::camera::*;
pub use self::filters::*;
pub use self::frame_parity::*;
pub use self::gbuffer::*;
pub use self::image::*;
pub use self::passes::*;
pub use self::reprojection::*;
pub use self::tiles::*;
pub use self::utils::*;

pub mod prelude {
    pub use glam::*;

    pub use crate::*;
}

/// Guards every division whose denominator can legitimately reach zero
/// (variance, bilateral weight sums, depth gradients).
pub const LUSTRE_EPSILON: f32 = 1e-6;

/// Upper bound for the per-pixel history length; past this point the
/// temporal filter degrades into a fixed-rate exponential moving average.
pub const MAX_HISTORY_LENGTH: f32 = 32.0;
