mod resources;

use anyhow::Result;
use derivative::Derivative;
use glam::UVec2;
use log::{debug, info, trace};
use lustre_gpu as gpu;

pub use self::resources::*;
use crate::{
    Command, DenoiserConfig, DenoiserKind, Device, ImageId, OutputStage,
    RayTraceScale, Recorder, ReprojectCommand, ResourceState, StateTracker,
};

/// G-buffer images consumed by the denoiser; each of them must have mip
/// levels down to the denoiser's scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GBuffer {
    /// This frame's normals (xyz) and linear depth (w)
    pub curr: ImageId,

    /// Previous frame's normals and linear depth
    pub prev: ImageId,

    /// Motion vectors (xy), in UV units, pointing into the previous frame
    pub motion: ImageId,
}

#[derive(Clone, Copy, Debug)]
pub struct DenoiserInputs {
    /// Noisy signal at the denoiser's working resolution; alpha carries the
    /// hit distance for signals reprojected through it
    pub signal: ImageId,

    pub gbuffer: GBuffer,
    pub camera: gpu::Camera,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Just created (or reset): history holds garbage and has to be cleared
    /// before it's read
    Constructed,

    /// History contains valid data from the previous frame
    Steady,
}

/// What got recorded during the latest frame.
#[derive(Clone, Copy, Debug)]
struct RecordedFrame {
    parity: gpu::FrameParity,
    signal: ImageId,
    atrous_output: ImageId,
}

/// Single denoiser instance: temporal accumulation, tile classification,
/// à-trous filtering and (optionally) upsampling of one ray-traced signal.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Denoiser {
    kind: DenoiserKind,
    label: String,
    config: DenoiserConfig,
    native_size: UVec2,
    scale: RayTraceScale,
    lifecycle: Lifecycle,
    #[derivative(Debug = "ignore")]
    resources: DenoiserResources,
    last_frame: Option<RecordedFrame>,
    pending_steady: bool,
}

impl Denoiser {
    pub fn new(
        device: &mut dyn Device,
        kind: DenoiserKind,
        config: DenoiserConfig,
        native_size: UVec2,
        scale: RayTraceScale,
    ) -> Result<Self> {
        let label = format!("lustre_{}", kind.name());

        info!(
            "Creating denoiser: {}",
            Self::describe(&label, native_size, scale)
        );

        anyhow::ensure!(
            native_size.x > 0 && native_size.y > 0,
            "denoiser `{label}` has zero-sized viewport"
        );

        let resources =
            DenoiserResources::new(device, &label, native_size, scale)?;

        debug!("Denoiser created");

        Ok(Self {
            kind,
            label,
            config: config.sanitized(),
            native_size,
            scale,
            lifecycle: Lifecycle::Constructed,
            resources,
            last_frame: None,
            pending_steady: false,
        })
    }

    fn describe(label: &str, native_size: UVec2, scale: RayTraceScale) -> String {
        format!(
            "{label} (native={}x{}, scale={scale:?})",
            native_size.x, native_size.y
        )
    }

    pub fn kind(&self) -> DenoiserKind {
        self.kind
    }

    pub fn config(&self) -> &DenoiserConfig {
        &self.config
    }

    /// Updates configuration; never reallocates anything, but switching the
    /// history source (`blur_as_input`) or re-enabling the denoiser resets
    /// the temporal history.
    pub fn set_config(&mut self, config: DenoiserConfig) {
        let config = config.sanitized();

        if config.blur_as_input != self.config.blur_as_input
            || (config.denoise && !self.config.denoise)
        {
            self.reset();
        }

        self.config = config;
    }

    pub fn native_size(&self) -> UVec2 {
        self.native_size
    }

    /// Returns resolution at which the signal is accumulated and filtered.
    pub fn size(&self) -> UVec2 {
        self.scale.working_size(self.native_size)
    }

    pub fn scale(&self) -> RayTraceScale {
        self.scale
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn resources(&self) -> &DenoiserResources {
        &self.resources
    }

    /// Forgets the temporal history; the next frame starts from scratch.
    pub fn reset(&mut self) {
        debug!("Resetting denoiser: {}", self.label);

        self.lifecycle = Lifecycle::Constructed;
        self.pending_steady = false;
    }

    /// Records all the passes for this frame.
    pub fn record(
        &mut self,
        rec: &mut Recorder,
        parity: gpu::FrameParity,
        inputs: &DenoiserInputs,
    ) {
        trace!(
            "Recording denoiser: {} (parity={}, lifecycle={:?})",
            self.label,
            parity.curr(),
            self.lifecycle
        );

        let res = &self.resources;

        if !self.config.denoise {
            self.last_frame = Some(RecordedFrame {
                parity,
                signal: inputs.signal,
                atrous_output: inputs.signal,
            });

            rec.reads([inputs.signal.into()]);

            // History doesn't get updated, so it's stale from now on
            self.lifecycle = Lifecycle::Constructed;
            self.pending_steady = false;

            return;
        }

        rec.transition(res.camera, ResourceState::TransferDst);

        rec.push(Command::WriteBuffer {
            buffer: res.camera,
            data: bytemuck::cast_slice(&[inputs.camera]).to_vec(),
        });

        let history_valid = self.lifecycle == Lifecycle::Steady;

        if !history_valid {
            self.record_clear(rec, parity);
        }

        self.record_reset_args(rec);
        self.record_reproject(rec, parity, inputs, history_valid);

        let atrous_output = self.record_atrous(rec, parity, inputs);

        self.record_upsample(rec, inputs, atrous_output);

        self.last_frame = Some(RecordedFrame {
            parity,
            signal: inputs.signal,
            atrous_output,
        });

        if let Some(output) = self.output() {
            rec.transition(output, ResourceState::ShaderRead);
        }

        self.pending_steady = true;
    }

    /// Zeroes everything that's going to be read as history, so that the
    /// very first frame doesn't blend against garbage.
    fn record_clear(&self, rec: &mut Recorder, parity: gpu::FrameParity) {
        let res = &self.resources;

        for image in [
            res.history,
            *res.color.prev(parity),
            *res.moments.prev(parity),
        ] {
            rec.transition(image, ResourceState::TransferDst);
            rec.push(Command::ClearImage { image });
        }
    }

    fn record_reset_args(&self, rec: &mut Recorder) {
        let res = &self.resources;
        let args = [res.denoise_tiles.args, res.copy_tiles.args];

        rec.writes(args.map(Into::into));
        rec.push(Command::ResetArgs { args });
    }

    fn record_reproject(
        &self,
        rec: &mut Recorder,
        parity: gpu::FrameParity,
        inputs: &DenoiserInputs,
        history_valid: bool,
    ) {
        let res = &self.resources;

        let history_color = if self.config.blur_as_input {
            res.history
        } else {
            *res.color.prev(parity)
        };

        let cmd = ReprojectCommand {
            camera: res.camera,
            signal: inputs.signal,
            history_color,
            history_moments: *res.moments.prev(parity),
            gbuffer: inputs.gbuffer,
            color: *res.color.curr(parity),
            moments: *res.moments.curr(parity),
            denoise_tiles: res.denoise_tiles,
            copy_tiles: res.copy_tiles,
            params: self
                .config
                .reproject_params(history_valid, self.scale.mip()),
        };

        rec.reads([
            cmd.camera.into(),
            cmd.signal.into(),
            cmd.history_color.into(),
            cmd.history_moments.into(),
            cmd.gbuffer.curr.into(),
            cmd.gbuffer.prev.into(),
            cmd.gbuffer.motion.into(),
        ]);

        rec.writes([
            cmd.color.into(),
            cmd.moments.into(),
            cmd.denoise_tiles.tiles.into(),
            cmd.denoise_tiles.args.into(),
            cmd.copy_tiles.tiles.into(),
            cmd.copy_tiles.args.into(),
        ]);

        rec.push(Command::Reproject(cmd));
    }

    /// Records the à-trous iterations (and the history feedback, if any);
    /// returns image holding the final result.
    fn record_atrous(
        &self,
        rec: &mut Recorder,
        parity: gpu::FrameParity,
        inputs: &DenoiserInputs,
    ) -> ImageId {
        let res = &self.resources;
        let accumulated = *res.color.curr(parity);
        let feedback_tap = self.config.feedback_tap();

        for tiles in [res.denoise_tiles, res.copy_tiles] {
            rec.transition(tiles.tiles, ResourceState::ShaderRead);
            rec.transition(tiles.args, ResourceState::IndirectArgs);
        }

        let mut output = accumulated;
        let mut read_idx = 0;

        for iteration in 0..self.config.filter_iterations {
            let write_idx = 1 - read_idx;

            let input = if iteration == 0 {
                accumulated
            } else {
                *res.atrous.get(read_idx)
            };

            output = *res.atrous.get(write_idx);

            rec.reads([input.into(), inputs.gbuffer.curr.into()]);
            rec.writes([output.into()]);

            rec.push(Command::CopyTiles {
                tiles: res.copy_tiles,
                input,
                output,
            });

            rec.writes([output.into()]);

            rec.push(Command::ATrous {
                tiles: res.denoise_tiles,
                input,
                gbuffer: inputs.gbuffer.curr,
                output,
                params: self.config.atrous_params(iteration, self.scale.mip()),
            });

            if feedback_tap == Some(iteration) {
                self.record_feedback(rec, output);
            }

            read_idx = write_idx;
        }

        if self.config.blur_as_input && feedback_tap.is_none() {
            self.record_feedback(rec, accumulated);
        }

        output
    }

    fn record_feedback(&self, rec: &mut Recorder, src: ImageId) {
        let dst = self.resources.history;

        rec.transition(src, ResourceState::TransferSrc);
        rec.transition(dst, ResourceState::TransferDst);
        rec.push(Command::CopyImage { src, dst });
    }

    fn record_upsample(
        &self,
        rec: &mut Recorder,
        inputs: &DenoiserInputs,
        input: ImageId,
    ) {
        let Some(output) = self.resources.upsample else {
            return;
        };

        rec.reads([input.into(), inputs.gbuffer.curr.into()]);
        rec.writes([output.into()]);

        rec.push(Command::Upsample {
            input,
            gbuffer: inputs.gbuffer.curr,
            output,
            params: gpu::UpsamplePassParams {
                gbuffer_mip: self.scale.mip(),
            },
        });
    }

    /// Called once the frame's commands got submitted; the first completed
    /// frame turns the instance steady.
    pub fn finish_frame(&mut self) {
        if self.pending_steady {
            if self.lifecycle == Lifecycle::Constructed {
                debug!("Denoiser is now steady: {}", self.label);
            }

            self.lifecycle = Lifecycle::Steady;
            self.pending_steady = false;
        }
    }

    /// Called when the frame's commands got rejected; none of them ran, so
    /// the instance stays where it was.
    pub fn abort_frame(&mut self) {
        self.pending_steady = false;
    }

    /// Returns image holding the result of the configured output stage of
    /// the latest recorded frame; `None` if nothing got recorded yet.
    pub fn output(&self) -> Option<ImageId> {
        self.stage_output(self.config.output_stage)
    }

    pub fn stage_output(&self, stage: OutputStage) -> Option<ImageId> {
        let frame = self.last_frame?;

        if !self.config.denoise {
            return Some(frame.signal);
        }

        let image = match stage {
            OutputStage::RayTrace => frame.signal,
            OutputStage::TemporalAccumulation => {
                *self.resources.color.curr(frame.parity)
            }
            OutputStage::ATrous => frame.atrous_output,
            OutputStage::Upsample => {
                self.resources.upsample.unwrap_or(frame.atrous_output)
            }
        };

        Some(image)
    }

    /// Returns image the next frame is going to read as its color history.
    pub fn history(&self) -> Option<ImageId> {
        let frame = self.last_frame?;

        if self.config.blur_as_input {
            Some(self.resources.history)
        } else {
            Some(*self.resources.color.curr(frame.parity))
        }
    }

    pub fn destroy(self, device: &mut dyn Device, tracker: &mut StateTracker) {
        info!(
            "Deleting denoiser: {}",
            Self::describe(&self.label, self.native_size, self.scale)
        );

        self.resources.destroy(device, tracker);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{uvec2, vec2, vec4, Vec3, Vec4};
    use lustre_gpu::GBufferEntry;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::testing::{Scene, DEPTH};
    use crate::{CommandList, CpuDevice};

    struct Fixture {
        scene: Scene,
        tracker: StateTracker,
        target: Denoiser,
        parity: gpu::FrameParity,
        commands: CommandList,
    }

    impl Fixture {
        fn new(
            native_size: UVec2,
            scale: RayTraceScale,
            config: DenoiserConfig,
        ) -> Self {
            let mut scene = Scene::new(native_size, scale);

            let target = Denoiser::new(
                &mut scene.device,
                DenoiserKind::Shadows,
                config,
                native_size,
                scale,
            )
            .unwrap();

            Self {
                scene,
                tracker: StateTracker::new(),
                target,
                parity: gpu::FrameParity::EVEN,
                commands: CommandList::new(),
            }
        }

        fn frame(&mut self) {
            let inputs = self.scene.inputs();

            for image in [
                inputs.signal,
                inputs.gbuffer.curr,
                inputs.gbuffer.prev,
                inputs.gbuffer.motion,
            ] {
                self.tracker.assume(image, ResourceState::ShaderWrite);
            }

            self.commands.clear();

            self.target.record(
                &mut Recorder::new(&mut self.tracker, &mut self.commands),
                self.parity,
                &inputs,
            );

            self.scene.device.submit(&self.commands).unwrap();
            self.target.finish_frame();
            self.parity = self.parity.flip();
        }

        fn read_stage(&mut self, stage: OutputStage) -> Vec<Vec4> {
            let image = self.target.stage_output(stage).unwrap();

            self.scene.read(image)
        }

        /// Returns names of recorded passes, skipping barriers.
        fn passes(&self) -> Vec<&'static str> {
            self.commands
                .iter()
                .map(|cmd| cmd.name())
                .filter(|name| *name != "barrier")
                .collect()
        }

        fn device(&self) -> &CpuDevice {
            &self.scene.device
        }
    }

    fn noise(seed: u64) -> impl FnMut(UVec2) -> Vec4 {
        let mut rng = StdRng::seed_from_u64(seed);

        move |_| {
            vec4(
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                1.0,
            )
        }
    }

    #[test]
    fn converges_on_static_scene() {
        let mut target = Fixture::new(
            uvec2(64, 64),
            RayTraceScale::Full,
            DenoiserConfig::default(),
        );

        target.scene.fill_signal(Vec4::ZERO);
        target.frame();

        assert!(target
            .read_stage(OutputStage::Upsample)
            .iter()
            .all(|texel| texel.x == 0.0));

        target.scene.fill_signal(Vec4::ONE);

        for _ in 1..=10 {
            target.frame();
        }

        for texel in target.read_stage(OutputStage::Upsample) {
            assert_relative_eq!(texel.x, 1.0, epsilon = 1e-3);
            assert_relative_eq!(texel.y, 1.0, epsilon = 1e-3);
            assert_relative_eq!(texel.z, 1.0, epsilon = 1e-3);
            assert!(texel.w < 1e-4);
        }

        // History keeps growing as long as nothing changes
        let moments = target.scene.read(
            *target.target.resources().moments.prev(target.parity),
        );

        assert!(moments.iter().all(|texel| texel.z == 10.0));
    }

    #[test]
    fn first_frame_ignores_history() {
        let mut target = Fixture::new(
            uvec2(24, 24),
            RayTraceScale::Full,
            DenoiserConfig::default(),
        );

        // Garbage left in the history has to be ignored
        for image in [
            *target.target.resources().color.get(0),
            *target.target.resources().color.get(1),
            *target.target.resources().moments.get(0),
            *target.target.resources().moments.get(1),
        ] {
            target
                .scene
                .device
                .write_image(image, 0, &[Vec4::splat(123.0); 576])
                .unwrap();
        }

        target.scene.fill_signal_with(noise(1));
        target.frame();

        let signal = target.read_stage(OutputStage::RayTrace);
        let color = target.read_stage(OutputStage::TemporalAccumulation);

        for (signal, color) in signal.iter().zip(&color) {
            assert_eq!(signal.truncate(), color.truncate());
        }

        let moments = target.scene.read(
            *target.target.resources().moments.prev(target.parity),
        );

        assert!(moments.iter().all(|texel| texel.z == 1.0));

        assert_eq!(
            vec![
                "write_buffer",
                "clear_image",
                "clear_image",
                "clear_image",
                "reset_args",
                "reproject",
                "copy_tiles",
                "atrous",
                "copy_tiles",
                "atrous",
                "copy_tiles",
                "atrous",
                "copy_tiles",
                "atrous",
            ],
            target.passes()
        );

        // Steady frames don't clear anything
        target.frame();

        assert_eq!(0, target.commands.count("clear_image"));
        assert_eq!(Lifecycle::Steady, target.target.lifecycle());
    }

    #[test]
    fn disocclusion_resets_history() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Full,
            DenoiserConfig::default(),
        );

        target.scene.fill_signal(Vec4::ONE);

        for _ in 0..5 {
            target.frame();
        }

        // Something moved right in front of the camera
        target.scene.fill_gbuffer(target.scene.gbuffer.curr, |_| {
            GBufferEntry::new(Vec3::Z, DEPTH * 0.25)
        });

        target.scene.fill_signal(Vec4::splat(0.5));
        target.frame();

        let moments = target.scene.read(
            *target.target.resources().moments.prev(target.parity),
        );

        assert!(moments.iter().all(|texel| texel.z == 1.0));

        assert!(target
            .read_stage(OutputStage::TemporalAccumulation)
            .iter()
            .all(|texel| texel.x == 0.5));
    }

    #[test]
    fn history_is_fed_from_atrous() {
        let config = DenoiserConfig {
            blur_as_input: true,
            feedback_iteration: 3,
            filter_iterations: 4,
            ..Default::default()
        };

        let mut target =
            Fixture::new(uvec2(32, 32), RayTraceScale::Full, config);

        for frame in 0..2 {
            target.scene.fill_signal_with(noise(frame));
            target.frame();

            let history = target.scene.read(target.target.resources().history);
            let atrous = target.read_stage(OutputStage::ATrous);
            let accumulated = target.read_stage(OutputStage::TemporalAccumulation);

            assert_eq!(history, atrous);
            assert_ne!(history, accumulated);
            assert_eq!(1, target.commands.count("copy_image"));
        }
    }

    #[test]
    fn history_falls_back_to_accumulation() {
        let config = DenoiserConfig {
            blur_as_input: true,
            feedback_iteration: 2,
            filter_iterations: 2,
            ..Default::default()
        };

        let mut target =
            Fixture::new(uvec2(16, 16), RayTraceScale::Full, config);

        target.scene.fill_signal_with(noise(3));
        target.frame();

        let history = target.scene.read(target.target.resources().history);
        let accumulated = target.read_stage(OutputStage::TemporalAccumulation);

        assert_eq!(history, accumulated);
    }

    #[test]
    fn tiles_are_classified() {
        let mut target = Fixture::new(
            uvec2(24, 16),
            RayTraceScale::Full,
            DenoiserConfig::default(),
        );

        let all_tiles: Vec<_> = (0..2)
            .flat_map(|y| (0..3).map(move |x| uvec2(x, y)))
            .collect();

        let tiles = |target: &Fixture| {
            let res = target.target.resources();

            let mut denoise =
                target.device().read_tiles(res.denoise_tiles).unwrap();

            let mut copy = target.device().read_tiles(res.copy_tiles).unwrap();

            denoise.sort_by_key(|tile| (tile.y, tile.x));
            copy.sort_by_key(|tile| (tile.y, tile.x));

            (denoise, copy)
        };

        // Case 1: fresh history, so everything gets denoised
        target.scene.fill_signal(Vec4::ONE);
        target.frame();

        let (denoise, copy) = tiles(&target);

        assert_eq!(all_tiles, denoise);
        assert!(copy.is_empty());

        let args = target
            .scene
            .device
            .read_buffer(target.target.resources().denoise_tiles.args)
            .unwrap();

        assert_eq!(vec![6, 1, 1], args);

        // Case 2: converged history, so everything gets copied
        for _ in 0..5 {
            target.frame();
        }

        let (denoise, copy) = tiles(&target);

        assert!(denoise.is_empty());
        assert_eq!(all_tiles, copy);

        // Case 3: a single tile changes
        target.scene.fill_signal_with(|pos| {
            if pos.x >= 8 && pos.x < 16 && pos.y >= 8 {
                Vec4::ZERO
            } else {
                Vec4::ONE
            }
        });

        target.frame();

        let (denoise, mut copy) = tiles(&target);

        assert_eq!(vec![uvec2(1, 1)], denoise);
        assert_eq!(5, copy.len());

        copy.extend(denoise);
        copy.sort_by_key(|tile| (tile.y, tile.x));

        assert_eq!(all_tiles, copy);
    }

    #[test]
    fn zero_iterations() {
        let config = DenoiserConfig {
            filter_iterations: 0,
            ..Default::default()
        };

        let mut target =
            Fixture::new(uvec2(16, 16), RayTraceScale::Full, config);

        target.scene.fill_signal_with(noise(4));
        target.frame();

        assert_eq!(0, target.commands.count("atrous"));
        assert_eq!(0, target.commands.count("copy_tiles"));

        assert_eq!(
            target.target.stage_output(OutputStage::TemporalAccumulation),
            target.target.stage_output(OutputStage::ATrous)
        );

        assert_eq!(
            target.target.stage_output(OutputStage::ATrous),
            target.target.output()
        );
    }

    #[test]
    fn zero_radius() {
        let config = DenoiserConfig {
            atrous_radius: 0,
            ..Default::default()
        };

        let mut target =
            Fixture::new(uvec2(16, 16), RayTraceScale::Full, config);

        target.scene.fill_signal_with(noise(5));
        target.frame();

        assert_eq!(
            target.read_stage(OutputStage::TemporalAccumulation),
            target.read_stage(OutputStage::ATrous)
        );
    }

    #[test]
    fn upsamples_constant_signal() {
        for scale in [RayTraceScale::Half, RayTraceScale::Quarter] {
            let mut target =
                Fixture::new(uvec2(32, 24), scale, DenoiserConfig::default());

            target.scene.fill_signal(vec4(0.3, 0.6, 0.9, 1.0));
            target.frame();

            assert_eq!(1, target.commands.count("upsample"));

            let output = target.read_stage(OutputStage::Upsample);

            assert_eq!(32 * 24, output.len());

            for texel in output {
                assert_relative_eq!(texel.x, 0.3, epsilon = 1e-5);
                assert_relative_eq!(texel.y, 0.6, epsilon = 1e-5);
                assert_relative_eq!(texel.z, 0.9, epsilon = 1e-5);
            }

            assert_eq!(
                scale.working_size(uvec2(32, 24)).x as usize
                    * scale.working_size(uvec2(32, 24)).y as usize,
                target.read_stage(OutputStage::ATrous).len()
            );
        }
    }

    #[test]
    fn output_stages() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Full,
            DenoiserConfig::default(),
        );

        assert_eq!(None, target.target.output());

        target.scene.fill_signal(Vec4::ONE);
        target.frame();

        let res = target.target.resources();
        let parity = target.parity.flip();

        assert_eq!(
            Some(target.scene.signal),
            target.target.stage_output(OutputStage::RayTrace)
        );

        assert_eq!(
            Some(*res.color.curr(parity)),
            target.target.stage_output(OutputStage::TemporalAccumulation)
        );

        // Four iterations: b, a, b, a
        assert_eq!(
            Some(*res.atrous.get(0)),
            target.target.stage_output(OutputStage::ATrous)
        );

        // Full scale: nothing to upsample
        assert_eq!(
            Some(*res.atrous.get(0)),
            target.target.stage_output(OutputStage::Upsample)
        );
    }

    #[test]
    fn denoising_can_be_disabled() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Half,
            DenoiserConfig::default(),
        );

        target.scene.fill_signal(Vec4::ONE);
        target.frame();
        target.frame();

        assert_eq!(Lifecycle::Steady, target.target.lifecycle());

        target.target.set_config(DenoiserConfig {
            denoise: false,
            ..*target.target.config()
        });

        target.frame();

        assert_eq!(Vec::<&str>::new(), target.passes());
        assert_eq!(Some(target.scene.signal), target.target.output());

        assert_eq!(
            Some(target.scene.signal),
            target.target.stage_output(OutputStage::TemporalAccumulation)
        );

        // History went stale in the meantime
        assert_eq!(Lifecycle::Constructed, target.target.lifecycle());

        target.target.set_config(DenoiserConfig {
            denoise: true,
            ..*target.target.config()
        });

        target.frame();

        assert_eq!(3, target.commands.count("clear_image"));
    }

    #[test]
    fn switching_history_source_resets() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Full,
            DenoiserConfig::default(),
        );

        target.scene.fill_signal(Vec4::ONE);
        target.frame();

        assert_eq!(Lifecycle::Steady, target.target.lifecycle());

        // Tweaking parameters keeps the history
        target.target.set_config(DenoiserConfig {
            phi_color: 5.0,
            ..*target.target.config()
        });

        assert_eq!(Lifecycle::Steady, target.target.lifecycle());

        target.target.set_config(DenoiserConfig {
            blur_as_input: true,
            ..*target.target.config()
        });

        assert_eq!(Lifecycle::Constructed, target.target.lifecycle());
    }

    #[test]
    fn reflections_converge() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Full,
            DenoiserConfig::for_kind(DenoiserKind::Reflections),
        );

        target.scene.fill_signal(vec4(0.2, 0.4, 0.6, 3.0));

        for _ in 0..6 {
            target.frame();
        }

        for texel in target.read_stage(OutputStage::Upsample) {
            assert_relative_eq!(texel.x, 0.2, epsilon = 1e-4);
            assert_relative_eq!(texel.z, 0.6, epsilon = 1e-4);
            assert!(texel.w.is_finite());
        }
    }

    #[test]
    fn reflections_follow_hit_distance() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Full,
            DenoiserConfig {
                neighborhood_clamping: false,
                ..DenoiserConfig::for_kind(DenoiserKind::Reflections)
            },
        );

        target.scene.fill_signal(vec4(0.25, 0.5, 0.75, 3.0));

        // Motion vectors pointing off-screen, so history can only survive
        // through the reflected point
        target.scene.fill_motion(vec2(1.0, 0.0));

        for _ in 0..6 {
            target.frame();
        }

        let moments = target.scene.read(
            *target.target.resources().moments.prev(target.parity),
        );

        for texel in moments {
            assert_relative_eq!(texel.z, 6.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn motion_vectors_ignore_hit_distance() {
        let mut target = Fixture::new(
            uvec2(16, 16),
            RayTraceScale::Full,
            DenoiserConfig {
                neighborhood_clamping: false,
                ..DenoiserConfig::default()
            },
        );

        target.scene.fill_signal(vec4(0.25, 0.5, 0.75, 3.0));
        target.scene.fill_motion(vec2(1.0, 0.0));

        for _ in 0..3 {
            target.frame();
        }

        let moments = target.scene.read(
            *target.target.resources().moments.prev(target.parity),
        );

        assert!(moments.iter().all(|texel| texel.z == 1.0));
    }
}
