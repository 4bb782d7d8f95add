use std::fmt;

use anyhow::Result;
use glam::{UVec2, Vec4};

use crate::CommandList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Anything a barrier can be placed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Image(ImageId),
    Buffer(BufferId),
}

impl From<ImageId> for ResourceId {
    fn from(id: ImageId) -> Self {
        Self::Image(id)
    }
}

impl From<BufferId> for ResourceId {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Image(id) => write!(f, "image#{}", id.0),
            ResourceId::Buffer(id) => write!(f, "buffer#{}", id.0),
        }
    }
}

/// Describes a 2D image of RGBA32F texels.
#[derive(Clone, Debug)]
pub struct ImageDesc {
    pub label: String,
    pub size: UVec2,
    pub mip_levels: u32,
}

impl ImageDesc {
    pub fn new(label: impl ToString, size: UVec2) -> Self {
        Self {
            label: label.to_string(),
            size,
            mip_levels: 1,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Read-write storage buffer
    Storage,

    /// Storage buffer that can also act as the source of indirect-dispatch
    /// arguments
    IndirectArgs,

    Uniform,
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub label: String,
    pub size: usize,
    pub kind: BufferKind,
}

impl BufferDesc {
    pub fn new(label: impl ToString, size: usize, kind: BufferKind) -> Self {
        Self {
            label: label.to_string(),
            size,
            kind,
        }
    }
}

/// Context through which all GPU resources are created and all work gets
/// executed.
///
/// Passed explicitly into every component that needs it; nothing in this
/// crate holds on to a device.
pub trait Device {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId>;

    fn destroy_image(&mut self, image: ImageId);

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Uploads texels of given mip level, in row-major order.
    fn write_image(
        &mut self,
        image: ImageId,
        mip: u32,
        texels: &[Vec4],
    ) -> Result<()>;

    /// Reads back texels of given mip level, in row-major order; meant for
    /// debugging and tests, since it stalls until the device is idle.
    fn read_image(&mut self, image: ImageId, mip: u32) -> Result<Vec<Vec4>>;

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u32>>;

    fn submit(&mut self, commands: &CommandList) -> Result<()>;

    /// Blocks until all submitted work has finished.
    fn wait_idle(&mut self);
}
