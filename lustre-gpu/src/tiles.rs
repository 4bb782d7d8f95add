use bytemuck::{Pod, Zeroable};
use glam::{uvec2, UVec2};

/// Width and height of a classification tile; each tile is processed by
/// exactly one workgroup.
pub const TILE_SIZE: u32 = 8;

/// Arguments of an indirect compute dispatch, laid out the way GPUs expect
/// them (x, y, z workgroup counts).
#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable, Debug)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchArgs {
    /// Arguments written by the reset pass: no tiles yet, but a valid shape
    /// so that appending tiles only has to bump `x`.
    pub fn reset() -> Self {
        Self { x: 0, y: 1, z: 1 }
    }

    pub fn workgroups(&self) -> u32 {
        self.x * self.y * self.z
    }
}

/// Returns number of tiles covering an image of given size.
pub fn tile_count(size: UVec2) -> UVec2 {
    (size + UVec2::splat(TILE_SIZE - 1)) / TILE_SIZE
}

/// Returns the capacity needed by a tile list covering an image of given
/// size, in entries.
pub fn tile_capacity(size: UVec2) -> u32 {
    let count = tile_count(size);

    count.x * count.y
}

pub fn pack_tile(tile: UVec2) -> u32 {
    (tile.y << 16) | (tile.x & 0xffff)
}

pub fn unpack_tile(packed: u32) -> UVec2 {
    uvec2(packed & 0xffff, packed >> 16)
}

/// Returns pixels covered by given tile, skipping the ones that fall outside
/// an image of given size.
pub fn tile_pixels(tile: UVec2, size: UVec2) -> impl Iterator<Item = UVec2> {
    let min = tile * TILE_SIZE;
    let max = (min + UVec2::splat(TILE_SIZE)).min(size);

    (min.y..max.y).flat_map(move |y| (min.x..max.x).map(move |x| uvec2(x, y)))
}
