use std::mem;
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use fxhash::{FxHashMap, FxHashSet};
use glam::{UVec2, Vec3, Vec4, Vec4Swizzles};
use log::{debug, info, trace};
use lustre_gpu::{self as gpu, ImageRead, ImageView};

use crate::{
    BufferDesc, BufferId, BufferKind, Command, CommandList, Device, ImageDesc,
    ImageId, ReprojectCommand, ResourceId, TileList,
};

/// Largest width / height of an image, matching the common GPU limit.
pub const CPU_MAX_IMAGE_DIMENSION: u32 = 8192;

/// Largest size of a buffer, in bytes.
pub const CPU_MAX_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Reference device: keeps resources in host memory and executes commands
/// one by one using the per-pixel algorithms from `lustre-gpu`.
///
/// It's slow, but deterministic and strict - every submitted command list is
/// checked for missing barriers, so it doubles as a validator of what the
/// denoiser records.
#[derive(Debug, Default)]
pub struct CpuDevice {
    images: FxHashMap<ImageId, CpuImage>,
    buffers: FxHashMap<BufferId, CpuBuffer>,
    next_id: u32,
    submissions: u64,
}

#[derive(Debug)]
struct CpuImage {
    label: String,
    mips: Vec<(UVec2, Vec<Vec4>)>,
}

impl CpuImage {
    fn size(&self) -> UVec2 {
        self.mips[0].0
    }

    fn view(&self, mip: u32) -> Result<ImageView<'_>> {
        let (size, texels) = self.mips.get(mip as usize).with_context(|| {
            format!(
                "image `{}` has {} mip level(s), but mip {mip} was requested",
                self.label,
                self.mips.len()
            )
        })?;

        Ok(ImageView::new(*size, texels))
    }
}

#[derive(Debug)]
struct CpuBuffer {
    label: String,
    kind: BufferKind,
    data: Vec<u32>,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns number of command lists submitted so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_size(&self, image: ImageId) -> Result<UVec2> {
        Ok(self.image(image)?.size())
    }

    /// Dumps mip 0 of given image into a PNG file (rgb only, clamped into
    /// `0..=1`).
    pub fn save_png(&self, image: ImageId, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let image = self.image(image)?;
        let (size, texels) = &image.mips[0];

        debug!("Saving `{}` into {}", image.label, path.display());

        let png = ::image::RgbaImage::from_fn(size.x, size.y, |x, y| {
            let texel = texels[(y * size.x + x) as usize].xyz();
            let texel = (texel.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();

            ::image::Rgba([texel.x as u8, texel.y as u8, texel.z as u8, 255])
        });

        png.save(path)
            .with_context(|| format!("couldn't save {}", path.display()))
    }

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn image(&self, image: ImageId) -> Result<&CpuImage> {
        self.images
            .get(&image)
            .ok_or_else(|| anyhow!("image#{} doesn't exist", image.0))
    }

    fn image_mut(&mut self, image: ImageId) -> Result<&mut CpuImage> {
        self.images
            .get_mut(&image)
            .ok_or_else(|| anyhow!("image#{} doesn't exist", image.0))
    }

    fn buffer(&self, buffer: BufferId) -> Result<&CpuBuffer> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| anyhow!("buffer#{} doesn't exist", buffer.0))
    }

    fn buffer_mut(&mut self, buffer: BufferId) -> Result<&mut CpuBuffer> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| anyhow!("buffer#{} doesn't exist", buffer.0))
    }

    fn execute(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::WriteBuffer { buffer, data } => {
                let buffer = self.buffer_mut(*buffer)?;

                ensure!(
                    data.len() <= buffer.data.len(),
                    "write of {} words overflows `{}`",
                    data.len(),
                    buffer.label
                );

                buffer.data[..data.len()].copy_from_slice(data);
            }

            Command::ClearImage { image } => {
                for (_, texels) in &mut self.image_mut(*image)?.mips {
                    texels.fill(Vec4::ZERO);
                }
            }

            Command::ResetArgs { args } => {
                for args in args {
                    let buffer = self.buffer_mut(*args)?;

                    ensure!(
                        buffer.kind == BufferKind::IndirectArgs,
                        "`{}` doesn't hold indirect arguments",
                        buffer.label
                    );

                    buffer.data[..3].copy_from_slice(bytemuck::cast_slice(&[
                        gpu::DispatchArgs::reset(),
                    ]));
                }
            }

            Command::Reproject(cmd) => {
                self.reproject(cmd)?;
            }

            Command::CopyTiles {
                tiles,
                input,
                output,
            } => {
                self.for_each_tile(*tiles, *input, *output, |input, pos| {
                    input.load(pos)
                })?;
            }

            Command::ATrous {
                tiles,
                input,
                gbuffer,
                output,
                params,
            } => {
                let (gbuffer_size, gbuffer) = {
                    let gbuffer = self.image(*gbuffer)?.view(params.gbuffer_mip)?;

                    (gbuffer.size(), gbuffer.texels().to_vec())
                };

                let input_size = self.image(*input)?.size();

                ensure!(
                    input_size == gbuffer_size,
                    "input is {input_size}, but the g-buffer's mip {} is \
                     {gbuffer_size}",
                    params.gbuffer_mip,
                );

                let gbuffer = ImageView::new(gbuffer_size, &gbuffer);

                self.for_each_tile(*tiles, *input, *output, |input, pos| {
                    gpu::ATrousFilter {
                        params,
                        input,
                        gbuffer: &gbuffer,
                    }
                    .run(pos)
                })?;
            }

            Command::CopyImage { src, dst } => {
                let mips = self.image(*src)?.mips.clone();
                let dst = self.image_mut(*dst)?;

                ensure!(
                    mips.len() == dst.mips.len() && mips[0].0 == dst.size(),
                    "can't copy into `{}`: layouts don't match",
                    dst.label
                );

                dst.mips = mips;
            }

            Command::Upsample {
                input,
                gbuffer,
                output,
                params,
            } => {
                let input = self.image(*input)?.view(0)?;
                let gbuffer = self.image(*gbuffer)?;
                let low_gbuffer = gbuffer.view(params.gbuffer_mip)?;
                let full_gbuffer = gbuffer.view(0)?;

                ensure!(
                    input.size() == low_gbuffer.size(),
                    "upsample input is {}, but the g-buffer's mip {} is {}",
                    input.size(),
                    params.gbuffer_mip,
                    low_gbuffer.size()
                );

                let texels = Self::run_all(full_gbuffer.size(), |pos| {
                    gpu::Upsampler {
                        input: &input,
                        low_gbuffer: &low_gbuffer,
                        full_gbuffer: &full_gbuffer,
                    }
                    .run(pos)
                });

                self.store(*output, full_gbuffer.size(), texels)?;
            }

            Command::Taa {
                current,
                history,
                motion,
                output,
                next_history,
                params,
            } => {
                let current = self.image(*current)?.view(0)?;
                let history = self.image(*history)?.view(0)?;
                let motion = self.image(*motion)?.view(0)?;
                let size = current.size();

                let texels = Self::run_all(size, |pos| {
                    gpu::TaaResolver {
                        params,
                        current: &current,
                        history: &history,
                        motion: &motion,
                    }
                    .run(pos)
                });

                self.store(*output, size, texels.clone())?;
                self.store(*next_history, size, texels)?;
            }

            Command::Barrier(_) => {
                //
            }
        }

        Ok(())
    }

    fn reproject(&mut self, cmd: &ReprojectCommand) -> Result<()> {
        let camera: gpu::Camera = {
            let words = &self.buffer(cmd.camera)?.data;
            let bytes: &[u8] = bytemuck::cast_slice(words);

            ensure!(
                bytes.len() >= mem::size_of::<gpu::Camera>(),
                "camera buffer is too small"
            );

            bytemuck::pod_read_unaligned(
                &bytes[..mem::size_of::<gpu::Camera>()],
            )
        };

        let mip = cmd.params.gbuffer_mip;
        let signal = self.image(cmd.signal)?.view(0)?;
        let history_color = self.image(cmd.history_color)?.view(0)?;
        let history_moments = self.image(cmd.history_moments)?.view(0)?;
        let curr_gbuffer = self.image(cmd.gbuffer.curr)?.view(mip)?;
        let prev_gbuffer = self.image(cmd.gbuffer.prev)?.view(mip)?;
        let motion = self.image(cmd.gbuffer.motion)?.view(mip)?;
        let size = signal.size();

        for (name, image) in [
            ("history color", &history_color),
            ("history moments", &history_moments),
            ("current g-buffer", &curr_gbuffer),
            ("previous g-buffer", &prev_gbuffer),
            ("motion vectors", &motion),
        ] {
            ensure!(
                image.size() == size,
                "signal is {size}, but {name} (at mip {mip}) is {}",
                image.size()
            );
        }

        let mut color = vec![Vec4::ZERO; (size.x * size.y) as usize];
        let mut moments = color.clone();
        let mut denoise_tiles = Vec::new();
        let mut copy_tiles = Vec::new();
        let tile_count = gpu::tile_count(size);

        for tile_y in 0..tile_count.y {
            for tile_x in 0..tile_count.x {
                let tile = UVec2::new(tile_x, tile_y);
                let mut needs_filtering = false;

                for pos in gpu::tile_pixels(tile, size) {
                    let out = gpu::TemporalAccumulator {
                        camera: &camera,
                        params: &cmd.params,
                        signal: &signal,
                        history_color: &history_color,
                        history_moments: &history_moments,
                        curr_gbuffer: &curr_gbuffer,
                        prev_gbuffer: &prev_gbuffer,
                        motion: &motion,
                    }
                    .run(pos);

                    let idx = (pos.y * size.x + pos.x) as usize;

                    color[idx] = out.color;
                    moments[idx] = out.moments;
                    needs_filtering |= out.needs_filtering;
                }

                if needs_filtering {
                    denoise_tiles.push(gpu::pack_tile(tile));
                } else {
                    copy_tiles.push(gpu::pack_tile(tile));
                }
            }
        }

        trace!(
            "Reprojected {size}: {} tile(s) to denoise, {} tile(s) to copy",
            denoise_tiles.len(),
            copy_tiles.len()
        );

        self.store(cmd.color, size, color)?;
        self.store(cmd.moments, size, moments)?;
        self.append_tiles(cmd.denoise_tiles, &denoise_tiles)?;
        self.append_tiles(cmd.copy_tiles, &copy_tiles)?;

        Ok(())
    }

    /// Appends tiles the same way the reprojection shader does, i.e. bumping
    /// `args.x` and writing at the previous value.
    fn append_tiles(&mut self, list: TileList, tiles: &[u32]) -> Result<()> {
        let offset = self.buffer(list.args)?.data[0] as usize;
        let buffer = self.buffer_mut(list.tiles)?;

        ensure!(
            offset + tiles.len() <= buffer.data.len(),
            "`{}` overflowed ({} + {} tiles, capacity {})",
            buffer.label,
            offset,
            tiles.len(),
            buffer.data.len()
        );

        buffer.data[offset..][..tiles.len()].copy_from_slice(tiles);
        self.buffer_mut(list.args)?.data[0] += tiles.len() as u32;

        Ok(())
    }

    /// Returns tiles stored in given list, as limited by its dispatch args.
    pub fn read_tiles(&self, list: TileList) -> Result<Vec<UVec2>> {
        let args = self.buffer(list.args)?;

        let args: gpu::DispatchArgs = bytemuck::pod_read_unaligned(
            bytemuck::cast_slice(args.data.get(..3).with_context(|| {
                format!("`{}` can't hold dispatch arguments", args.label)
            })?),
        );

        let tiles = &self.buffer(list.tiles)?.data;

        ensure!(
            args.workgroups() as usize <= tiles.len(),
            "dispatch args point past the tile buffer ({} > {})",
            args.workgroups(),
            tiles.len()
        );

        Ok(tiles[..args.workgroups() as usize]
            .iter()
            .map(|&tile| gpu::unpack_tile(tile))
            .collect())
    }

    /// Emulates an indirect dispatch over a tile list: runs `f` for every
    /// pixel of every listed tile, writing into `output` and leaving all the
    /// other pixels untouched.
    fn for_each_tile(
        &mut self,
        tiles: TileList,
        input: ImageId,
        output: ImageId,
        f: impl Fn(&ImageView, UVec2) -> Vec4,
    ) -> Result<()> {
        let tiles = self.read_tiles(tiles)?;
        let input = self.image(input)?;
        let input_view = input.view(0)?;
        let size = input_view.size();
        let mut texels = self.image(output)?.view(0)?.texels().to_vec();

        ensure!(
            texels.len() == input_view.texels().len(),
            "`{}` doesn't match its output in size",
            input.label
        );

        for tile in tiles {
            for pos in gpu::tile_pixels(tile, size) {
                texels[(pos.y * size.x + pos.x) as usize] = f(&input_view, pos);
            }
        }

        self.store(output, size, texels)
    }

    fn run_all(size: UVec2, f: impl Fn(UVec2) -> Vec4) -> Vec<Vec4> {
        (0..size.y)
            .flat_map(|y| (0..size.x).map(move |x| UVec2::new(x, y)))
            .map(f)
            .collect()
    }

    fn store(
        &mut self,
        image: ImageId,
        size: UVec2,
        texels: Vec<Vec4>,
    ) -> Result<()> {
        let image = self.image_mut(image)?;

        ensure!(
            image.size() == size,
            "`{}` is {}, but got {size} worth of texels",
            image.label,
            image.size()
        );

        image.mips[0].1 = texels;

        Ok(())
    }
}

impl Device for CpuDevice {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        debug!(
            "Allocating image `{}`; size={:?}, mips={}",
            desc.label, desc.size, desc.mip_levels
        );

        ensure!(
            desc.size.x > 0 && desc.size.y > 0,
            "image `{}` has zero size",
            desc.label
        );

        ensure!(
            desc.size.max_element() <= CPU_MAX_IMAGE_DIMENSION,
            "image `{}` is too large ({}, max is {CPU_MAX_IMAGE_DIMENSION})",
            desc.label,
            desc.size
        );

        let max_mip_levels = 32 - desc.size.max_element().leading_zeros();

        ensure!(
            desc.mip_levels >= 1 && desc.mip_levels <= max_mip_levels,
            "image `{}` can't have {} mip level(s)",
            desc.label,
            desc.mip_levels
        );

        let mips = (0..desc.mip_levels)
            .map(|mip| {
                let size = gpu::mip_size(desc.size, mip);

                (size, vec![Vec4::ZERO; (size.x * size.y) as usize])
            })
            .collect();

        let id = ImageId(self.alloc_id());

        self.images.insert(
            id,
            CpuImage {
                label: desc.label.clone(),
                mips,
            },
        );

        Ok(id)
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(image) = self.images.remove(&image) {
            debug!("Releasing image `{}`", image.label);
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        debug!(
            "Allocating buffer `{}`; kind={:?}, size={}",
            desc.label, desc.kind, desc.size
        );

        ensure!(desc.size > 0, "buffer `{}` has zero size", desc.label);

        ensure!(
            desc.size <= CPU_MAX_BUFFER_SIZE,
            "buffer `{}` is too large ({} bytes, max is {CPU_MAX_BUFFER_SIZE})",
            desc.label,
            desc.size
        );

        if desc.kind == BufferKind::IndirectArgs {
            ensure!(
                desc.size >= mem::size_of::<gpu::DispatchArgs>(),
                "buffer `{}` is too small to hold dispatch arguments",
                desc.label
            );
        }

        let id = BufferId(self.alloc_id());

        self.buffers.insert(
            id,
            CpuBuffer {
                label: desc.label.clone(),
                kind: desc.kind,
                data: vec![0; desc.size.div_ceil(4)],
            },
        );

        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            debug!("Releasing buffer `{}`", buffer.label);
        }
    }

    fn write_image(
        &mut self,
        image: ImageId,
        mip: u32,
        texels: &[Vec4],
    ) -> Result<()> {
        let image = self.image_mut(image)?;
        let label = &image.label;

        let (size, dst) =
            image.mips.get_mut(mip as usize).with_context(|| {
                format!("image `{label}` doesn't have mip {mip}")
            })?;

        ensure!(
            dst.len() == texels.len(),
            "mip {mip} of `{label}` is {size}, but got {} texel(s)",
            texels.len()
        );

        dst.copy_from_slice(texels);

        Ok(())
    }

    fn read_image(&mut self, image: ImageId, mip: u32) -> Result<Vec<Vec4>> {
        Ok(self.image(image)?.view(mip)?.texels().to_vec())
    }

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u32>> {
        Ok(self.buffer(buffer)?.data.clone())
    }

    fn submit(&mut self, commands: &CommandList) -> Result<()> {
        self.submissions += 1;

        trace!(
            "Submission #{}: {} command(s)",
            self.submissions,
            commands.len()
        );

        let mut hazards = HazardTracker::default();

        for (idx, command) in commands.iter().enumerate() {
            hazards.check(command).with_context(|| {
                format!("command #{idx} ({}) is unsafe", command.name())
            })?;

            self.execute(command).with_context(|| {
                format!("command #{idx} ({}) failed", command.name())
            })?;
        }

        Ok(())
    }

    fn wait_idle(&mut self) {
        //
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        if !self.images.is_empty() || !self.buffers.is_empty() {
            info!(
                "Dropping CPU device with {} image(s) and {} buffer(s) alive",
                self.images.len(),
                self.buffers.len()
            );
        }
    }
}

/// Finds accesses that aren't separated by a barrier from a previous
/// conflicting access.
#[derive(Default)]
struct HazardTracker {
    written: FxHashSet<ResourceId>,
    read: FxHashSet<ResourceId>,
}

impl HazardTracker {
    fn check(&mut self, command: &Command) -> Result<()> {
        if let Command::Barrier(barrier) = command {
            self.written.remove(&barrier.resource);
            self.read.remove(&barrier.resource);

            return Ok(());
        }

        let reads = command.reads();
        let writes = command.writes();

        for resource in &reads {
            if self.written.contains(resource) {
                bail!("{resource} is read after a write without a barrier");
            }
        }

        for resource in &writes {
            if self.written.contains(resource) {
                bail!("{resource} is written twice without a barrier");
            }

            if self.read.contains(resource) {
                bail!("{resource} is written after a read without a barrier");
            }
        }

        self.read.extend(reads);
        self.written.extend(writes);

        Ok(())
    }
}
