use bytemuck::{Pod, Zeroable};

/// Selects which of the two double-buffered slots is written this frame.
///
/// Parity is handed to every pass that touches a double-buffered resource;
/// nothing reads it from shared state.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Debug)]
pub struct FrameParity(u32);

impl FrameParity {
    pub const EVEN: Self = Self(0);
    pub const ODD: Self = Self(1);

    pub fn new(frame: u32) -> Self {
        Self(frame & 1)
    }

    pub fn flip(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Index of the slot written during this frame.
    pub fn curr(self) -> usize {
        self.0 as usize
    }

    /// Index of the slot holding last frame's data.
    pub fn prev(self) -> usize {
        self.flip().curr()
    }

    pub fn is_odd(self) -> bool {
        self.0 == 1
    }
}
