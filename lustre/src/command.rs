use lustre_gpu as gpu;

use crate::{BufferId, GBuffer, ImageId, ResourceId, ResourceState};

/// Pair of buffers produced by tile classification: packed tile coordinates
/// and the indirect-dispatch arguments telling how many of them are valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileList {
    pub tiles: BufferId,
    pub args: BufferId,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReprojectCommand {
    pub camera: BufferId,
    pub signal: ImageId,
    pub history_color: ImageId,
    pub history_moments: ImageId,
    pub gbuffer: GBuffer,
    pub color: ImageId,
    pub moments: ImageId,
    pub denoise_tiles: TileList,
    pub copy_tiles: TileList,
    pub params: gpu::ReprojectPassParams,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// A single unit of GPU work, recorded by the denoiser and executed by a
/// [`crate::Device`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    WriteBuffer {
        buffer: BufferId,
        data: Vec<u32>,
    },

    ClearImage {
        image: ImageId,
    },

    /// Writes `(0, 1, 1)` into both argument buffers, emptying the tile
    /// lists before classification appends to them.
    ResetArgs {
        args: [BufferId; 2],
    },

    /// Temporal accumulation + tile classification.
    Reproject(ReprojectCommand),

    /// Forwards `input` into `output` for every tile on the list.
    CopyTiles {
        tiles: TileList,
        input: ImageId,
        output: ImageId,
    },

    /// One à-trous iteration over every tile on the list.
    ATrous {
        tiles: TileList,
        input: ImageId,
        gbuffer: ImageId,
        output: ImageId,
        params: gpu::ATrousPassParams,
    },

    CopyImage {
        src: ImageId,
        dst: ImageId,
    },

    Upsample {
        input: ImageId,
        gbuffer: ImageId,
        output: ImageId,
        params: gpu::UpsamplePassParams,
    },

    Taa {
        current: ImageId,
        history: ImageId,
        motion: ImageId,
        output: ImageId,
        next_history: ImageId,
        params: gpu::TaaPassParams,
    },

    Barrier(Barrier),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::WriteBuffer { .. } => "write_buffer",
            Command::ClearImage { .. } => "clear_image",
            Command::ResetArgs { .. } => "reset_args",
            Command::Reproject(_) => "reproject",
            Command::CopyTiles { .. } => "copy_tiles",
            Command::ATrous { .. } => "atrous",
            Command::CopyImage { .. } => "copy_image",
            Command::Upsample { .. } => "upsample",
            Command::Taa { .. } => "taa",
            Command::Barrier(_) => "barrier",
        }
    }

    /// Returns resources this command reads from.
    pub fn reads(&self) -> Vec<ResourceId> {
        match self {
            Command::WriteBuffer { .. }
            | Command::ClearImage { .. }
            | Command::ResetArgs { .. }
            | Command::Barrier(_) => vec![],

            Command::Reproject(cmd) => vec![
                cmd.camera.into(),
                cmd.signal.into(),
                cmd.history_color.into(),
                cmd.history_moments.into(),
                cmd.gbuffer.curr.into(),
                cmd.gbuffer.prev.into(),
                cmd.gbuffer.motion.into(),
            ],

            Command::CopyTiles { tiles, input, .. } => {
                vec![tiles.tiles.into(), tiles.args.into(), (*input).into()]
            }

            Command::ATrous {
                tiles,
                input,
                gbuffer,
                ..
            } => vec![
                tiles.tiles.into(),
                tiles.args.into(),
                (*input).into(),
                (*gbuffer).into(),
            ],

            Command::CopyImage { src, .. } => vec![(*src).into()],

            Command::Upsample { input, gbuffer, .. } => {
                vec![(*input).into(), (*gbuffer).into()]
            }

            Command::Taa {
                current,
                history,
                motion,
                ..
            } => vec![(*current).into(), (*history).into(), (*motion).into()],
        }
    }

    /// Returns resources this command writes into.
    pub fn writes(&self) -> Vec<ResourceId> {
        match self {
            Command::WriteBuffer { buffer, .. } => vec![(*buffer).into()],
            Command::ClearImage { image } => vec![(*image).into()],
            Command::ResetArgs { args } => {
                args.iter().map(|&args| args.into()).collect()
            }

            Command::Reproject(cmd) => vec![
                cmd.color.into(),
                cmd.moments.into(),
                cmd.denoise_tiles.tiles.into(),
                cmd.denoise_tiles.args.into(),
                cmd.copy_tiles.tiles.into(),
                cmd.copy_tiles.args.into(),
            ],

            Command::CopyTiles { output, .. }
            | Command::ATrous { output, .. }
            | Command::Upsample { output, .. } => vec![(*output).into()],

            Command::CopyImage { dst, .. } => vec![(*dst).into()],

            Command::Taa {
                output,
                next_history,
                ..
            } => vec![(*output).into(), (*next_history).into()],

            Command::Barrier(_) => vec![],
        }
    }
}

/// Ordered sequence of commands making up (a part of) a frame.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> + '_ {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Returns number of commands with given name.
    pub fn count(&self, name: &str) -> usize {
        self.commands
            .iter()
            .filter(|cmd| cmd.name() == name)
            .count()
    }
}
