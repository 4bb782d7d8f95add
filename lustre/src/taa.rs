use anyhow::Result;
use glam::UVec2;
use log::{debug, info};
use lustre_gpu as gpu;

use crate::{
    Command, Device, DoubleBuffered, ImageDesc, ImageId, Recorder,
    ResourceState, StateTracker,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TaaConfig {
    /// Weight of the history when the current frame disagrees with it
    pub feedback_min: f32,

    /// Weight of the history when the current frame agrees with it
    pub feedback_max: f32,

    pub sharpen: f32,
}

impl Default for TaaConfig {
    fn default() -> Self {
        Self {
            feedback_min: 0.88,
            feedback_max: 0.97,
            sharpen: 0.0,
        }
    }
}

impl TaaConfig {
    pub fn sanitized(self) -> Self {
        let feedback_min = self.feedback_min.clamp(0.0, 1.0);

        Self {
            feedback_min,
            feedback_max: self.feedback_max.clamp(feedback_min, 1.0),
            sharpen: self.sharpen.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TaaInputs {
    /// Full-resolution color rendered with this frame's jitter
    pub current: ImageId,

    /// Motion vectors (xy), in UV units, pointing into the previous frame
    pub motion: ImageId,
}

/// Temporal anti-aliasing resolve, run at native resolution on top of the
/// composed frame.
#[derive(Debug)]
pub struct Taa {
    config: TaaConfig,
    size: UVec2,
    history: DoubleBuffered<ImageId>,
    output: ImageId,
    first_frame: bool,
    pending_steady: bool,
    recorded: bool,
}

impl Taa {
    pub fn new(
        device: &mut dyn Device,
        config: TaaConfig,
        size: UVec2,
    ) -> Result<Self> {
        info!("Creating TAA (size={}x{})", size.x, size.y);

        let history = DoubleBuffered::new(
            device,
            &ImageDesc::new("lustre_taa_history", size),
        )?;

        let output = device
            .create_image(&ImageDesc::new("lustre_taa_output", size))
            .map_err(|err| {
                for image in history.both() {
                    device.destroy_image(*image);
                }

                err
            })?;

        Ok(Self {
            config: config.sanitized(),
            size,
            history,
            output,
            first_frame: true,
            pending_steady: false,
            recorded: false,
        })
    }

    pub fn config(&self) -> &TaaConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TaaConfig) {
        self.config = config.sanitized();
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn is_first_frame(&self) -> bool {
        self.first_frame
    }

    pub fn reset(&mut self) {
        debug!("Resetting TAA");

        self.first_frame = true;
        self.pending_steady = false;
    }

    pub fn record(
        &mut self,
        rec: &mut Recorder,
        parity: gpu::FrameParity,
        inputs: &TaaInputs,
    ) {
        let history = *self.history.prev(parity);
        let next_history = *self.history.curr(parity);

        rec.reads([
            inputs.current.into(),
            history.into(),
            inputs.motion.into(),
        ]);

        rec.writes([self.output.into(), next_history.into()]);

        rec.push(Command::Taa {
            current: inputs.current,
            history,
            motion: inputs.motion,
            output: self.output,
            next_history,
            params: gpu::TaaPassParams {
                feedback_min: self.config.feedback_min,
                feedback_max: self.config.feedback_max,
                sharpen: self.config.sharpen,
                history_valid: (!self.first_frame) as u32,
            },
        });

        rec.transition(self.output, ResourceState::ShaderRead);

        self.pending_steady = true;
        self.recorded = true;
    }

    pub fn finish_frame(&mut self) {
        if self.pending_steady {
            self.first_frame = false;
            self.pending_steady = false;
        }
    }

    pub fn abort_frame(&mut self) {
        self.pending_steady = false;
    }

    /// Returns the anti-aliased image; `None` until the first frame gets
    /// recorded.
    pub fn output(&self) -> Option<ImageId> {
        self.recorded.then_some(self.output)
    }

    pub fn destroy(self, device: &mut dyn Device, tracker: &mut StateTracker) {
        info!("Deleting TAA");

        for image in self.history.both().into_iter().chain([&self.output]) {
            tracker.forget(*image);
            device.destroy_image(*image);
        }
    }
}
