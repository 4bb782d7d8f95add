mod bind_group;
mod bindable;
mod buffer;
mod pass;
mod shaders;
mod texture;

use std::sync::mpsc;

use anyhow::{anyhow, bail, ensure, Context, Result};
use bytemuck::Pod;
use fxhash::FxHashMap;
use glam::{UVec2, Vec4};
use log::{debug, info, trace};
use lustre_gpu as gpu;
use wgpu::util::DeviceExt;

use self::bind_group::*;
use self::bindable::*;
use self::buffer::*;
use self::pass::*;
use self::texture::*;
use crate::{
    BufferDesc, BufferId, BufferKind, Command, CommandList, Device, ImageDesc,
    ImageId, ReprojectCommand,
};

/// Device backed by a real GPU, executing commands through compute shaders.
///
/// Barriers recorded by the denoiser are skipped - wgpu tracks resource
/// usage on its own and inserts them automatically.
#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    resources: Resources,
    passes: FxHashMap<&'static str, ComputePass>,
    submissions: u64,
}

#[derive(Debug, Default)]
struct Resources {
    images: FxHashMap<ImageId, Texture>,
    buffers: FxHashMap<BufferId, Buffer>,
    next_id: u32,
}

impl Resources {
    fn image(&self, id: ImageId) -> Result<&Texture> {
        self.images
            .get(&id)
            .ok_or_else(|| anyhow!("unknown image: {}", id.0))
    }

    fn buffer(&self, id: BufferId) -> Result<&Buffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| anyhow!("unknown buffer: {}", id.0))
    }

    fn readable(&self, id: ImageId, mip: u32) -> Result<ReadableTexture> {
        let image = self.image(id)?;

        image.readable(mip).with_context(|| {
            format!(
                "image `{}` has {} mip level(s), but mip {mip} was requested",
                image.label(),
                image.mip_levels()
            )
        })
    }

    fn mip_size(&self, id: ImageId, mip: u32) -> Result<UVec2> {
        let image = self.image(id)?;

        image.mip_size(mip).with_context(|| {
            format!("image `{}` has no mip {mip}", image.label())
        })
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;

        self.next_id += 1;
        id
    }
}

impl WgpuDevice {
    /// Creates a device on the first suitable adapter, without any surface
    /// attached.
    pub fn headless() -> Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    force_fallback_adapter: false,
                    compatible_surface: None,
                })
                .await
                .context("couldn't find a suitable adapter")?;

            info!("Using adapter: {:?}", adapter.get_info());

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("lustre"),
                        required_features: Self::required_features(),
                        required_limits: Self::required_limits(),
                        ..Default::default()
                    },
                    None,
                )
                .await
                .context("couldn't create device")?;

            Ok(Self::new(device, queue))
        })
    }

    /// Wraps an already created device; it must have been created with
    /// [`Self::required_features()`] and [`Self::required_limits()`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            resources: Default::default(),
            passes: Default::default(),
            submissions: 0,
        }
    }

    pub fn required_features() -> wgpu::Features {
        wgpu::Features::PUSH_CONSTANTS | wgpu::Features::CLEAR_TEXTURE
    }

    pub fn required_limits() -> wgpu::Limits {
        wgpu::Limits {
            max_push_constant_size: 128,
            ..Default::default()
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Returns texture backing given image, e.g. so that the denoiser's
    /// output can be copied into a swapchain.
    pub fn texture(&self, image: ImageId) -> Option<&wgpu::Texture> {
        self.resources.images.get(&image).map(|image| image.tex())
    }

    /// Returns number of command lists submitted so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn encode(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        command: &Command,
    ) -> Result<()> {
        let resources = &self.resources;

        match command {
            Command::WriteBuffer { buffer, data } => {
                let buffer = resources.buffer(*buffer)?;
                let bytes: &[u8] = bytemuck::cast_slice(data);

                ensure!(
                    bytes.len() as u64 <= buffer.size(),
                    "write of {} bytes overflows `{}`",
                    bytes.len(),
                    buffer.label()
                );

                if bytes.is_empty() {
                    return Ok(());
                }

                let staging = self.device.create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some("lustre_staging"),
                        contents: bytes,
                        usage: wgpu::BufferUsages::COPY_SRC,
                    },
                );

                encoder.copy_buffer_to_buffer(
                    &staging,
                    0,
                    buffer.buffer(),
                    0,
                    bytes.len() as u64,
                );
            }

            Command::ClearImage { image } => {
                encoder.clear_texture(
                    resources.image(*image)?.tex(),
                    &Default::default(),
                );
            }

            Command::ResetArgs { args } => {
                for args in args {
                    let buffer = resources.buffer(*args)?;

                    ensure!(
                        buffer.kind() == BufferKind::IndirectArgs,
                        "`{}` doesn't hold indirect arguments",
                        buffer.label()
                    );
                }

                let bind_group = BindGroupBuilder::new("reset_args")
                    .add(resources.buffer(args[0])?.writable())
                    .add(resources.buffer(args[1])?.writable());

                Self::run(
                    &self.device,
                    &mut self.passes,
                    encoder,
                    shaders::RESET_ARGS,
                    command.name(),
                    bind_group,
                    (),
                    Dispatch::Direct([1, 1, 1]),
                );
            }

            Command::Reproject(cmd) => {
                let size = Self::check_reproject(resources, cmd)?;
                let mip = cmd.params.gbuffer_mip;
                let count = gpu::tile_count(size);

                let bind_group = BindGroupBuilder::new("reproject")
                    .add(resources.buffer(cmd.camera)?.uniform())
                    .add(resources.readable(cmd.signal, 0)?)
                    .add(resources.readable(cmd.history_color, 0)?)
                    .add(resources.readable(cmd.history_moments, 0)?)
                    .add(resources.readable(cmd.gbuffer.curr, mip)?)
                    .add(resources.readable(cmd.gbuffer.prev, mip)?)
                    .add(resources.readable(cmd.gbuffer.motion, mip)?)
                    .add(resources.image(cmd.color)?.writable())
                    .add(resources.image(cmd.moments)?.writable())
                    .add(resources.buffer(cmd.denoise_tiles.tiles)?.writable())
                    .add(resources.buffer(cmd.denoise_tiles.args)?.writable())
                    .add(resources.buffer(cmd.copy_tiles.tiles)?.writable())
                    .add(resources.buffer(cmd.copy_tiles.args)?.writable());

                Self::run(
                    &self.device,
                    &mut self.passes,
                    encoder,
                    shaders::REPROJECT,
                    command.name(),
                    bind_group,
                    cmd.params,
                    Dispatch::Direct([count.x, count.y, 1]),
                );
            }

            Command::CopyTiles {
                tiles,
                input,
                output,
            } => {
                let bind_group = BindGroupBuilder::new("copy_tiles")
                    .add(resources.buffer(tiles.tiles)?.readable())
                    .add(resources.readable(*input, 0)?)
                    .add(resources.image(*output)?.writable());

                Self::run(
                    &self.device,
                    &mut self.passes,
                    encoder,
                    shaders::COPY_TILES,
                    command.name(),
                    bind_group,
                    (),
                    Dispatch::Indirect(resources.buffer(tiles.args)?),
                );
            }

            Command::ATrous {
                tiles,
                input,
                gbuffer,
                output,
                params,
            } => {
                let input_size = resources.mip_size(*input, 0)?;
                let gbuffer_size =
                    resources.mip_size(*gbuffer, params.gbuffer_mip)?;

                ensure!(
                    input_size == gbuffer_size,
                    "input is {input_size}, but the g-buffer's mip {} is \
                     {gbuffer_size}",
                    params.gbuffer_mip,
                );

                let bind_group = BindGroupBuilder::new("atrous")
                    .add(resources.buffer(tiles.tiles)?.readable())
                    .add(resources.readable(*input, 0)?)
                    .add(resources.readable(*gbuffer, params.gbuffer_mip)?)
                    .add(resources.image(*output)?.writable());

                Self::run(
                    &self.device,
                    &mut self.passes,
                    encoder,
                    shaders::ATROUS,
                    command.name(),
                    bind_group,
                    *params,
                    Dispatch::Indirect(resources.buffer(tiles.args)?),
                );
            }

            Command::CopyImage { src, dst } => {
                let src = resources.image(*src)?;
                let dst = resources.image(*dst)?;

                ensure!(
                    src.mip_levels() == dst.mip_levels()
                        && src.size() == dst.size(),
                    "can't copy into `{}`: layouts don't match",
                    dst.label()
                );

                for mip in 0..src.mip_levels() {
                    let size = src.mip_size(mip).context("missing mip")?;

                    encoder.copy_texture_to_texture(
                        wgpu::ImageCopyTexture {
                            texture: src.tex(),
                            mip_level: mip,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::ImageCopyTexture {
                            texture: dst.tex(),
                            mip_level: mip,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        extent(size),
                    );
                }
            }

            Command::Upsample {
                input,
                gbuffer,
                output,
                params,
            } => {
                let input_size = resources.mip_size(*input, 0)?;
                let low_size = resources.mip_size(*gbuffer, params.gbuffer_mip)?;
                let full_size = resources.mip_size(*gbuffer, 0)?;
                let output_size = resources.mip_size(*output, 0)?;

                ensure!(
                    input_size == low_size,
                    "upsample input is {input_size}, but the g-buffer's mip \
                     {} is {low_size}",
                    params.gbuffer_mip,
                );

                ensure!(
                    output_size == full_size,
                    "upsample output is {output_size}, but the g-buffer is \
                     {full_size}",
                );

                let count = gpu::tile_count(full_size);

                let bind_group = BindGroupBuilder::new("upsample")
                    .add(resources.readable(*input, 0)?)
                    .add(resources.readable(*gbuffer, params.gbuffer_mip)?)
                    .add(resources.readable(*gbuffer, 0)?)
                    .add(resources.image(*output)?.writable());

                Self::run(
                    &self.device,
                    &mut self.passes,
                    encoder,
                    shaders::UPSAMPLE,
                    command.name(),
                    bind_group,
                    *params,
                    Dispatch::Direct([count.x, count.y, 1]),
                );
            }

            Command::Taa {
                current,
                history,
                motion,
                output,
                next_history,
                params,
            } => {
                let size = resources.mip_size(*current, 0)?;

                for (name, image) in [
                    ("history", history),
                    ("motion vectors", motion),
                    ("output", output),
                    ("next history", next_history),
                ] {
                    let image_size = resources.mip_size(*image, 0)?;

                    ensure!(
                        image_size == size,
                        "current frame is {size}, but {name} is {image_size}"
                    );
                }

                let count = gpu::tile_count(size);

                let bind_group = BindGroupBuilder::new("taa")
                    .add(resources.readable(*current, 0)?)
                    .add(resources.readable(*history, 0)?)
                    .add(resources.readable(*motion, 0)?)
                    .add(resources.image(*output)?.writable())
                    .add(resources.image(*next_history)?.writable());

                Self::run(
                    &self.device,
                    &mut self.passes,
                    encoder,
                    shaders::TAA,
                    command.name(),
                    bind_group,
                    *params,
                    Dispatch::Direct([count.x, count.y, 1]),
                );
            }

            Command::Barrier(_) => {
                //
            }
        }

        Ok(())
    }

    fn check_reproject(
        resources: &Resources,
        cmd: &ReprojectCommand,
    ) -> Result<UVec2> {
        let mip = cmd.params.gbuffer_mip;
        let size = resources.mip_size(cmd.signal, 0)?;

        for (name, image, mip) in [
            ("history color", cmd.history_color, 0),
            ("history moments", cmd.history_moments, 0),
            ("current g-buffer", cmd.gbuffer.curr, mip),
            ("previous g-buffer", cmd.gbuffer.prev, mip),
            ("motion vectors", cmd.gbuffer.motion, mip),
            ("color output", cmd.color, 0),
            ("moments output", cmd.moments, 0),
        ] {
            let image_size = resources.mip_size(image, mip)?;

            ensure!(
                image_size == size,
                "signal is {size}, but {name} (at mip {mip}) is {image_size}"
            );
        }

        let capacity = gpu::tile_capacity(size) as u64 * 4;

        for tiles in [cmd.denoise_tiles.tiles, cmd.copy_tiles.tiles] {
            let buffer = resources.buffer(tiles)?;

            ensure!(
                buffer.size() >= capacity,
                "`{}` can't fit {} tiles",
                buffer.label(),
                gpu::tile_capacity(size)
            );
        }

        Ok(size)
    }

    fn run<P>(
        device: &wgpu::Device,
        passes: &mut FxHashMap<&'static str, ComputePass>,
        encoder: &mut wgpu::CommandEncoder,
        source: &str,
        label: &'static str,
        bind_group: BindGroupBuilder,
        params: P,
        dispatch: Dispatch,
    ) where
        P: Pod,
    {
        let pass = passes.entry(label).or_insert_with(|| {
            ComputePass::new::<P>(device, label, source, &bind_group)
        });

        pass.run(device, encoder, bind_group, params, dispatch);
    }

    /// Copies given buffer into host memory, blocking until the device
    /// finishes all the work submitted so far.
    fn download(&self, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();

        slice.map_async(wgpu::MapMode::Read, move |result| {
            _ = tx.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .context("device got lost during readback")?
            .context("couldn't map staging buffer")?;

        let bytes = slice.get_mapped_range().to_vec();

        staging.unmap();

        Ok(bytes)
    }

    fn create_staging(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lustre_readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }
}

impl Device for WgpuDevice {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        let max_dim = self.device.limits().max_texture_dimension_2d;

        ensure!(
            desc.size.x > 0 && desc.size.y > 0,
            "image `{}` has zero size",
            desc.label
        );

        ensure!(
            desc.size.x <= max_dim && desc.size.y <= max_dim,
            "image `{}` is {}, which exceeds the device's limit of {max_dim}",
            desc.label,
            desc.size
        );

        let max_mips = 32 - desc.size.max_element().leading_zeros();

        ensure!(
            desc.mip_levels > 0 && desc.mip_levels <= max_mips,
            "image `{}` can't have {} mip level(s)",
            desc.label,
            desc.mip_levels
        );

        let id = ImageId(self.resources.alloc_id());

        let texture =
            Texture::new(&self.device, &desc.label, desc.size, desc.mip_levels);

        self.resources.images.insert(id, texture);

        Ok(id)
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(image) = self.resources.images.remove(&image) {
            debug!("Releasing texture `{}`", image.label());

            image.tex().destroy();
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        let max_size = self.device.limits().max_buffer_size;

        ensure!(desc.size > 0, "buffer `{}` has zero size", desc.label);

        ensure!(
            desc.size as u64 <= max_size,
            "buffer `{}` has {} bytes, which exceeds the device's limit of \
             {max_size}",
            desc.label,
            desc.size
        );

        if desc.kind == BufferKind::IndirectArgs {
            ensure!(
                desc.size >= 12,
                "buffer `{}` is too small to hold dispatch arguments",
                desc.label
            );
        }

        let id = BufferId(self.resources.alloc_id());

        let buffer =
            Buffer::new(&self.device, &desc.label, desc.size, desc.kind);

        self.resources.buffers.insert(id, buffer);

        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.resources.buffers.remove(&buffer) {
            debug!("Releasing buffer `{}`", buffer.label());

            buffer.buffer().destroy();
        }
    }

    fn write_image(
        &mut self,
        image: ImageId,
        mip: u32,
        texels: &[Vec4],
    ) -> Result<()> {
        let size = self.resources.mip_size(image, mip)?;
        let image = self.resources.image(image)?;

        ensure!(
            texels.len() == (size.x * size.y) as usize,
            "mip {mip} of `{}` is {size}, but got {} texel(s)",
            image.label(),
            texels.len()
        );

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: image.tex(),
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size.x * TEXEL_SIZE),
                rows_per_image: Some(size.y),
            },
            extent(size),
        );

        Ok(())
    }

    fn read_image(&mut self, image: ImageId, mip: u32) -> Result<Vec<Vec4>> {
        let size = self.resources.mip_size(image, mip)?;
        let row_len = size.x * TEXEL_SIZE;
        let padded_row_len =
            row_len.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = self.create_staging((padded_row_len * size.y) as u64);

        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("lustre_read_image"),
                });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: self.resources.image(image)?.tex(),
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_len),
                    rows_per_image: Some(size.y),
                },
            },
            extent(size),
        );

        self.queue.submit([encoder.finish()]);

        let bytes = self.download(&staging)?;

        let texels = bytes
            .chunks_exact(padded_row_len as usize)
            .flat_map(|row| {
                row[..row_len as usize]
                    .chunks_exact(TEXEL_SIZE as usize)
                    .map(|texel| {
                        Vec4::from_array(bytemuck::pod_read_unaligned(texel))
                    })
            })
            .collect();

        Ok(texels)
    }

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u32>> {
        let buffer = self.resources.buffer(buffer)?;
        let staging = self.create_staging(buffer.size());

        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("lustre_read_buffer"),
                });

        encoder.copy_buffer_to_buffer(
            buffer.buffer(),
            0,
            &staging,
            0,
            buffer.size(),
        );

        self.queue.submit([encoder.finish()]);

        let bytes = self.download(&staging)?;

        Ok(bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    fn submit(&mut self, commands: &CommandList) -> Result<()> {
        self.submissions += 1;

        trace!(
            "Submission #{}: {} command(s)",
            self.submissions,
            commands.len()
        );

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder =
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("lustre_frame"),
                });

        let encoded =
            commands.iter().enumerate().try_for_each(|(idx, command)| {
                self.encode(&mut encoder, command).with_context(|| {
                    format!("command #{idx} ({}) failed", command.name())
                })
            });

        if let Err(err) = encoded {
            _ = pollster::block_on(self.device.pop_error_scope());

            return Err(err);
        }

        self.queue.submit([encoder.finish()]);

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            bail!("submission #{} got rejected: {err}", self.submissions);
        }

        Ok(())
    }

    fn wait_idle(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl Drop for WgpuDevice {
    fn drop(&mut self) {
        if !self.resources.images.is_empty()
            || !self.resources.buffers.is_empty()
        {
            info!(
                "Dropping GPU device with {} image(s) and {} buffer(s) alive",
                self.resources.images.len(),
                self.resources.buffers.len()
            );
        }
    }
}

fn extent(size: UVec2) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}
