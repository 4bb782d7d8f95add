use anyhow::Result;
use lustre_gpu::FrameParity;

use crate::{Device, ImageDesc, ImageId};

/// Two copies of a resource: one written during this frame, the other one
/// holding what got written during the previous frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoubleBuffered<T> {
    a: T,
    b: T,
}

impl DoubleBuffered<ImageId> {
    /// Creates a double-buffered image, suffixing labels with `_a` / `_b`.
    pub fn new(device: &mut dyn Device, desc: &ImageDesc) -> Result<Self> {
        let a = device.create_image(&ImageDesc {
            label: format!("{}_a", desc.label),
            ..desc.clone()
        })?;

        let b = device
            .create_image(&ImageDesc {
                label: format!("{}_b", desc.label),
                ..desc.clone()
            })
            .map_err(|err| {
                device.destroy_image(a);
                err
            })?;

        Ok(Self { a, b })
    }
}

impl<T> From<[T; 2]> for DoubleBuffered<T> {
    fn from([a, b]: [T; 2]) -> Self {
        Self { a, b }
    }
}

impl<T> DoubleBuffered<T> {
    pub fn get(&self, idx: usize) -> &T {
        if idx == 0 {
            &self.a
        } else {
            &self.b
        }
    }

    /// Returns the copy written during this frame.
    pub fn curr(&self, parity: FrameParity) -> &T {
        self.get(parity.curr())
    }

    /// Returns the copy written during the previous frame.
    pub fn prev(&self, parity: FrameParity) -> &T {
        self.get(parity.prev())
    }

    pub fn both(&self) -> [&T; 2] {
        [&self.a, &self.b]
    }
}
