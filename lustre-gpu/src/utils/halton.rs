use glam::{vec2, Vec2};

/// Number of distinct sub-pixel offsets before the jitter pattern repeats.
pub const JITTER_PERIOD: u32 = 16;

/// Returns `index`-th element of the Halton low-discrepancy sequence in given
/// base, in range `0..1`.
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut f = 1.0;
    let mut r = 0.0;

    while index > 0 {
        f /= base as f32;
        r += f * (index % base) as f32;
        index /= base;
    }

    r
}

/// Returns camera jitter for given frame, in pixels (`-0.5..0.5` on each
/// axis); consumed by temporal anti-aliasing.
pub fn jitter(frame: u32) -> Vec2 {
    let index = frame % JITTER_PERIOD + 1;

    vec2(halton(index, 2), halton(index, 3)) - Vec2::splat(0.5)
}
