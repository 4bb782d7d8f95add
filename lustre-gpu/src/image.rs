use glam::{IVec2, UVec2, Vec2, Vec4};

use crate::{bilinear_weights, REPROJECTION_TAPS};

/// Read-only access to a 2D image of RGBA32F texels.
///
/// This is the seam between the per-pixel algorithms and whatever stores the
/// texels - host memory on the CPU device, textures in the WGSL mirrors.
pub trait ImageRead {
    fn size(&self) -> UVec2;

    /// Returns texel at given position; the position must be inside the
    /// image.
    fn load(&self, pos: UVec2) -> Vec4;

    fn contains(&self, pos: IVec2) -> bool {
        let size = self.size().as_ivec2();

        pos.x >= 0 && pos.y >= 0 && pos.x < size.x && pos.y < size.y
    }

    /// Returns texel at given position, or `None` if it falls outside the
    /// image.
    fn try_load(&self, pos: IVec2) -> Option<Vec4> {
        if self.contains(pos) {
            Some(self.load(pos.as_uvec2()))
        } else {
            None
        }
    }

    fn load_clamped(&self, pos: IVec2) -> Vec4 {
        let max = self.size().as_ivec2() - IVec2::ONE;

        self.load(pos.clamp(IVec2::ZERO, max).as_uvec2())
    }

    /// Bilinearly samples the image at given UV coordinates, clamping to
    /// edges.
    fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let pos = uv * self.size().as_vec2() - 0.5;
        let p00 = pos.floor().as_ivec2();
        let weights = bilinear_weights(pos - pos.floor());

        REPROJECTION_TAPS
            .into_iter()
            .zip(weights)
            .map(|(offset, weight)| self.load_clamped(p00 + offset) * weight)
            .sum()
    }
}

/// Row-major view into a slice of texels.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    size: UVec2,
    texels: &'a [Vec4],
}

impl<'a> ImageView<'a> {
    pub fn new(size: UVec2, texels: &'a [Vec4]) -> Self {
        assert_eq!((size.x * size.y) as usize, texels.len());

        Self { size, texels }
    }

    pub fn texels(&self) -> &'a [Vec4] {
        self.texels
    }
}

impl ImageRead for ImageView<'_> {
    fn size(&self) -> UVec2 {
        self.size
    }

    fn load(&self, pos: UVec2) -> Vec4 {
        self.texels[(pos.y * self.size.x + pos.x) as usize]
    }
}

/// Returns the size of given mip level of an image, following the usual
/// graphics-API rounding (halving, rounding down, never below one texel).
pub fn mip_size(size: UVec2, mip: u32) -> UVec2 {
    (size >> mip).max(UVec2::ONE)
}
