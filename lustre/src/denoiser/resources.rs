use std::mem;

use anyhow::{Context, Result};
use glam::UVec2;
use log::debug;
use lustre_gpu as gpu;

use crate::{
    BufferDesc, BufferId, BufferKind, Device, DoubleBuffered, ImageDesc,
    ImageId, RayTraceScale, StateTracker, TileList,
};

/// Images and buffers owned by a single denoiser instance.
#[derive(Debug)]
pub struct DenoiserResources {
    pub camera: BufferId,

    /// Output of temporal accumulation (rgb + variance), double-buffered by
    /// frame parity; last frame's copy acts as the temporal history
    pub color: DoubleBuffered<ImageId>,

    /// Moments matching `color`: first moment, second moment, history length
    pub moments: DoubleBuffered<ImageId>,

    /// Temporal history used when it's being fed from an à-trous iteration
    pub history: ImageId,

    /// Ping-pong targets of the à-trous iterations (reused every frame)
    pub atrous: DoubleBuffered<ImageId>,

    /// Full-resolution output; present only for reduced scales
    pub upsample: Option<ImageId>,

    pub denoise_tiles: TileList,
    pub copy_tiles: TileList,
}

impl DenoiserResources {
    pub fn new(
        device: &mut dyn Device,
        label: &str,
        native_size: UVec2,
        scale: RayTraceScale,
    ) -> Result<Self> {
        let mut created = Created::default();

        match Self::create(device, &mut created, label, native_size, scale) {
            Ok(this) => Ok(this),
            Err(err) => {
                debug!(
                    "Releasing {} partially-created resources of `{label}`",
                    created.images.len() + created.buffers.len()
                );

                created.release(device);

                Err(err)
            }
        }
    }

    fn create(
        device: &mut dyn Device,
        created: &mut Created,
        label: &str,
        native_size: UVec2,
        scale: RayTraceScale,
    ) -> Result<Self> {
        let size = scale.working_size(native_size);
        let tiles = gpu::tile_capacity(size) as usize;

        let mut image = |name: &str, size: UVec2| {
            let id = device
                .create_image(&ImageDesc::new(format!("{label}_{name}"), size))
                .with_context(|| format!("couldn't create `{label}_{name}`"))?;

            created.images.push(id);

            anyhow::Ok(id)
        };

        let color = DoubleBuffered::from([
            image("color_a", size)?,
            image("color_b", size)?,
        ]);

        let moments = DoubleBuffered::from([
            image("moments_a", size)?,
            image("moments_b", size)?,
        ]);

        let history = image("history", size)?;

        let atrous = DoubleBuffered::from([
            image("atrous_a", size)?,
            image("atrous_b", size)?,
        ]);

        let upsample = if scale.is_full() {
            None
        } else {
            Some(image("upsample", native_size)?)
        };

        let mut buffer = |name: &str, size: usize, kind: BufferKind| {
            let id = device
                .create_buffer(&BufferDesc::new(
                    format!("{label}_{name}"),
                    size,
                    kind,
                ))
                .with_context(|| format!("couldn't create `{label}_{name}`"))?;

            created.buffers.push(id);

            anyhow::Ok(id)
        };

        let camera = buffer(
            "camera",
            mem::size_of::<gpu::Camera>(),
            BufferKind::Uniform,
        )?;

        let mut tile_list = |name: &str| {
            anyhow::Ok(TileList {
                tiles: buffer(
                    &format!("{name}_tiles"),
                    tiles * mem::size_of::<u32>(),
                    BufferKind::Storage,
                )?,
                args: buffer(
                    &format!("{name}_args"),
                    mem::size_of::<gpu::DispatchArgs>(),
                    BufferKind::IndirectArgs,
                )?,
            })
        };

        let denoise_tiles = tile_list("denoise")?;
        let copy_tiles = tile_list("copy")?;

        Ok(Self {
            camera,
            color,
            moments,
            history,
            atrous,
            upsample,
            denoise_tiles,
            copy_tiles,
        })
    }

    pub fn images(&self) -> Vec<ImageId> {
        let mut images = vec![self.history];

        images.extend(self.color.both());
        images.extend(self.moments.both());
        images.extend(self.atrous.both());
        images.extend(self.upsample);
        images
    }

    pub fn buffers(&self) -> Vec<BufferId> {
        vec![
            self.camera,
            self.denoise_tiles.tiles,
            self.denoise_tiles.args,
            self.copy_tiles.tiles,
            self.copy_tiles.args,
        ]
    }

    pub fn destroy(self, device: &mut dyn Device, tracker: &mut StateTracker) {
        for image in self.images() {
            tracker.forget(image);
            device.destroy_image(image);
        }

        for buffer in self.buffers() {
            tracker.forget(buffer);
            device.destroy_buffer(buffer);
        }
    }
}

#[derive(Default)]
struct Created {
    images: Vec<ImageId>,
    buffers: Vec<BufferId>,
}

impl Created {
    fn release(self, device: &mut dyn Device) {
        for image in self.images {
            device.destroy_image(image);
        }

        for buffer in self.buffers {
            device.destroy_buffer(buffer);
        }
    }
}
