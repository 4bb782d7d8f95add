#[cfg(feature = "metrics")]
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use glam::{UVec2, Vec2};
use log::{debug, info, trace, warn};
use lustre_gpu as gpu;

use crate::{
    Command, CommandList, Denoiser, DenoiserConfig, DenoiserInputs,
    DenoiserKind, Device, RayTraceScale, Recorder, ResourceState,
    StateTracker, Taa, TaaConfig, TaaInputs,
};

/// Identifies a denoiser owned by the [`Engine`].
///
/// Handles of destroyed denoisers stay stale forever, even if their slot gets
/// reused later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DenoiserHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    denoiser: Option<Denoiser>,
}

/// Owns all the denoisers (and the optional TAA stage) and drives the frame
/// loop: passes are recorded into a single command list that gets submitted
/// at the end of the frame.
#[derive(Debug, Default)]
pub struct Engine {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    tracker: StateTracker,
    commands: CommandList,
    parity: gpu::FrameParity,
    frame: u32,
    taa: Option<Taa>,

    #[cfg(feature = "metrics")]
    frame_started_at: Option<Instant>,
}

impl Engine {
    pub fn new() -> Self {
        info!("Initializing");

        Self::default()
    }

    /// Returns parity of the frame that's currently being recorded.
    pub fn parity(&self) -> gpu::FrameParity {
        self.parity
    }

    /// Returns number of frames ended so far.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Returns sub-pixel camera jitter the producer should apply to the
    /// current frame, in pixels.
    pub fn jitter(&self) -> Vec2 {
        gpu::jitter(self.frame)
    }

    /// Returns commands recorded so far in this frame.
    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub fn create_denoiser(
        &mut self,
        device: &mut dyn Device,
        kind: DenoiserKind,
        native_size: UVec2,
        scale: RayTraceScale,
    ) -> Result<DenoiserHandle> {
        let denoiser = Denoiser::new(
            device,
            kind,
            DenoiserConfig::for_kind(kind),
            native_size,
            scale,
        )?;

        let index = if let Some(index) = self.free_slots.pop() {
            index
        } else {
            self.slots.push(Slot::default());
            self.slots.len() as u32 - 1
        };

        let slot = &mut self.slots[index as usize];

        slot.denoiser = Some(denoiser);

        Ok(DenoiserHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Destroys given denoiser; returns `false` if the handle was stale.
    pub fn destroy_denoiser(
        &mut self,
        device: &mut dyn Device,
        handle: DenoiserHandle,
    ) -> bool {
        let Some(denoiser) = self.take(handle) else {
            return false;
        };

        device.wait_idle();
        denoiser.destroy(device, &mut self.tracker);

        true
    }

    pub fn denoiser(&self, handle: DenoiserHandle) -> Option<&Denoiser> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .denoiser
            .as_ref()
    }

    pub fn denoiser_mut(
        &mut self,
        handle: DenoiserHandle,
    ) -> Option<&mut Denoiser> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .denoiser
            .as_mut()
    }

    /// Returns all alive denoisers.
    pub fn denoisers(
        &self,
    ) -> impl Iterator<Item = (DenoiserHandle, &Denoiser)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let handle = DenoiserHandle {
                index: index as u32,
                generation: slot.generation,
            };

            slot.denoiser.as_ref().map(|denoiser| (handle, denoiser))
        })
    }

    /// Changes resolution at which given denoiser works.
    ///
    /// This recreates the denoiser from scratch (keeping its configuration),
    /// so its temporal history is lost.
    pub fn set_scale(
        &mut self,
        device: &mut dyn Device,
        handle: DenoiserHandle,
        scale: RayTraceScale,
    ) -> Result<()> {
        let native_size = self.get(handle)?.native_size();

        self.rebuild(device, handle, native_size, scale)
    }

    /// Changes the native (viewport) resolution of given denoiser; the same
    /// remarks as for [`Self::set_scale()`] apply.
    pub fn resize(
        &mut self,
        device: &mut dyn Device,
        handle: DenoiserHandle,
        native_size: UVec2,
    ) -> Result<()> {
        let scale = self.get(handle)?.scale();

        self.rebuild(device, handle, native_size, scale)
    }

    fn rebuild(
        &mut self,
        device: &mut dyn Device,
        handle: DenoiserHandle,
        native_size: UVec2,
        scale: RayTraceScale,
    ) -> Result<()> {
        let curr = self.get(handle)?;

        if curr.native_size() == native_size && curr.scale() == scale {
            return Ok(());
        }

        debug!(
            "Rebuilding denoiser {:?}: {:?} -> {:?}, {} -> {}",
            handle,
            curr.scale(),
            scale,
            curr.native_size(),
            native_size
        );

        let kind = curr.kind();
        let config = *curr.config();

        device.wait_idle();

        let slot = &mut self.slots[handle.index as usize];

        if let Some(denoiser) = slot.denoiser.take() {
            denoiser.destroy(device, &mut self.tracker);
        }

        match Denoiser::new(device, kind, config, native_size, scale) {
            Ok(denoiser) => {
                slot.denoiser = Some(denoiser);

                Ok(())
            }

            Err(err) => {
                // The old denoiser is gone already, so the handle can't be
                // kept alive
                slot.generation += 1;
                self.free_slots.push(handle.index);

                Err(err.context("couldn't rebuild denoiser"))
            }
        }
    }

    /// Records all the passes of given denoiser for the current frame.
    pub fn render(
        &mut self,
        handle: DenoiserHandle,
        inputs: &DenoiserInputs,
    ) -> Result<()> {
        #[cfg(feature = "metrics")]
        self.frame_started_at.get_or_insert_with(Instant::now);

        let denoiser = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.denoiser.as_mut())
            .ok_or_else(|| anyhow!("denoiser {handle:?} doesn't exist"))?;

        // Inputs are written by passes we don't record, so let's assume the
        // worst
        for image in [
            inputs.signal,
            inputs.gbuffer.curr,
            inputs.gbuffer.prev,
            inputs.gbuffer.motion,
        ] {
            self.tracker.assume(image, ResourceState::ShaderWrite);
        }

        denoiser.record(
            &mut Recorder::new(&mut self.tracker, &mut self.commands),
            self.parity,
            inputs,
        );

        Ok(())
    }

    /// Enables temporal anti-aliasing at given (native) resolution,
    /// replacing the previous TAA stage, if any.
    pub fn enable_taa(
        &mut self,
        device: &mut dyn Device,
        size: UVec2,
        config: TaaConfig,
    ) -> Result<()> {
        self.disable_taa(device);
        self.taa = Some(Taa::new(device, config, size)?);

        Ok(())
    }

    pub fn disable_taa(&mut self, device: &mut dyn Device) {
        if let Some(taa) = self.taa.take() {
            device.wait_idle();
            taa.destroy(device, &mut self.tracker);
        }
    }

    pub fn taa(&self) -> Option<&Taa> {
        self.taa.as_ref()
    }

    pub fn taa_mut(&mut self) -> Option<&mut Taa> {
        self.taa.as_mut()
    }

    /// Records the TAA resolve for the current frame.
    pub fn render_taa(&mut self, inputs: &TaaInputs) -> Result<()> {
        let Some(taa) = &mut self.taa else {
            bail!("TAA is not enabled");
        };

        for image in [inputs.current, inputs.motion] {
            self.tracker.assume(image, ResourceState::ShaderWrite);
        }

        taa.record(
            &mut Recorder::new(&mut self.tracker, &mut self.commands),
            self.parity,
            inputs,
        );

        Ok(())
    }

    /// Submits everything recorded during this frame and moves onto the next
    /// one.
    pub fn end_frame(&mut self, device: &mut dyn Device) -> Result<()> {
        trace!(
            "Ending frame #{} ({} command(s), {} barrier(s))",
            self.frame,
            self.commands.len(),
            self.commands.count("barrier")
        );

        let result = device
            .submit(&self.commands)
            .with_context(|| format!("couldn't submit frame #{}", self.frame));

        if result.is_err() {
            self.abort_frame();
        }

        self.commands.clear();
        result?;

        for slot in &mut self.slots {
            if let Some(denoiser) = &mut slot.denoiser {
                denoiser.finish_frame();
            }
        }

        if let Some(taa) = &mut self.taa {
            taa.finish_frame();
        }

        #[cfg(feature = "metrics")]
        if let Some(started_at) = self.frame_started_at.take() {
            trace!(
                "Frame #{} took {}",
                self.frame,
                humantime::format_duration(started_at.elapsed())
            );
        }

        self.parity = self.parity.flip();
        self.frame = self.frame.wrapping_add(1);

        Ok(())
    }

    /// Forgets what the rejected command list was about to do: the states
    /// of everything it touched are unknown now, and nobody got closer to
    /// becoming steady.
    fn abort_frame(&mut self) {
        warn!("Aborting frame #{}", self.frame);

        for command in self.commands.iter() {
            let resources = match command {
                Command::Barrier(barrier) => vec![barrier.resource],
                command => {
                    let mut resources = command.reads();

                    resources.extend(command.writes());
                    resources
                }
            };

            for resource in resources {
                self.tracker.assume(resource, ResourceState::Undefined);
            }
        }

        for slot in &mut self.slots {
            if let Some(denoiser) = &mut slot.denoiser {
                denoiser.abort_frame();
            }
        }

        if let Some(taa) = &mut self.taa {
            taa.abort_frame();
        }
    }

    pub fn destroy(mut self, device: &mut dyn Device) {
        info!("Shutting down");

        device.wait_idle();

        for slot in &mut self.slots {
            if let Some(denoiser) = slot.denoiser.take() {
                denoiser.destroy(device, &mut self.tracker);
            }
        }

        if let Some(taa) = self.taa.take() {
            taa.destroy(device, &mut self.tracker);
        }
    }

    fn get(&self, handle: DenoiserHandle) -> Result<&Denoiser> {
        self.denoiser(handle)
            .ok_or_else(|| anyhow!("denoiser {handle:?} doesn't exist"))
    }

    fn take(&mut self, handle: DenoiserHandle) -> Option<Denoiser> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;

        let denoiser = slot.denoiser.take()?;

        slot.generation += 1;
        self.free_slots.push(handle.index);

        Some(denoiser)
    }
}
