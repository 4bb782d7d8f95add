//! Lustre: multi-stage denoiser (temporal accumulation, tile
//! classification, à-trous filtering, upsampling) for hybrid renderers.
//!
//! Everything is recorded into a [`CommandList`] and executed by a
//! [`Device`] - either [`WgpuDevice`] (real GPU) or [`CpuDevice`] (reference
//! implementation running the very same per-pixel algorithms on the host).

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::too_many_arguments)]

mod command;
mod config;
mod denoiser;
mod device;
mod devices;
mod double_buffered;
mod engine;
mod recorder;
mod state_tracker;
mod taa;

#[cfg(test)]
mod testing;

pub use lustre_gpu as gpu;

pub use self::command::*;
pub use self::config::*;
pub use self::denoiser::*;
pub use self::device::*;
pub use self::devices::*;
pub use self::double_buffered::*;
pub use self::engine::*;
pub use self::recorder::*;
pub use self::state_tracker::*;
pub use self::taa::*;
