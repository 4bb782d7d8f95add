//! Synthetic scene shared by the end-to-end tests.

use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};
use lustre_gpu::{self as gpu, GBufferEntry};

use crate::{
    CpuDevice, DenoiserInputs, Device, GBuffer, ImageDesc, ImageId,
    RayTraceScale,
};

pub const DEPTH: f32 = 5.0;

/// Static camera placed at the origin and looking down -Z at a flat wall
/// (normal = +Z, constant depth), with a signal image sized for given scale.
pub struct Scene {
    pub device: CpuDevice,
    pub native_size: UVec2,
    pub scale: RayTraceScale,
    pub signal: ImageId,
    pub gbuffer: GBuffer,
    pub camera: gpu::Camera,
}

impl Scene {
    pub fn new(native_size: UVec2, scale: RayTraceScale) -> Self {
        let mut device = CpuDevice::new();
        let mip_levels = scale.mip() + 1;

        let mut gbuffer_image = |name: &str| {
            device
                .create_image(
                    &ImageDesc::new(name, native_size)
                        .with_mip_levels(mip_levels),
                )
                .unwrap()
        };

        let gbuffer = GBuffer {
            curr: gbuffer_image("gbuffer_curr"),
            prev: gbuffer_image("gbuffer_prev"),
            motion: gbuffer_image("motion"),
        };

        let signal = device
            .create_image(&ImageDesc::new(
                "signal",
                scale.working_size(native_size),
            ))
            .unwrap();

        let camera = {
            let view = Mat4::look_at_rh(Vec3::ZERO, -Vec3::Z, Vec3::Y);
            let aspect = native_size.x as f32 / native_size.y as f32;
            let projection = Mat4::perspective_rh(FRAC_PI_2, aspect, 0.1, 100.0);

            gpu::Camera::new(
                view,
                projection,
                projection * view,
                native_size.as_vec2(),
                Vec2::ZERO,
            )
        };

        let mut this = Self {
            device,
            native_size,
            scale,
            signal,
            gbuffer,
            camera,
        };

        this.fill_gbuffer(this.gbuffer.curr, |_| {
            GBufferEntry::new(Vec3::Z, DEPTH)
        });

        this.fill_gbuffer(this.gbuffer.prev, |_| {
            GBufferEntry::new(Vec3::Z, DEPTH)
        });

        this
    }

    pub fn working_size(&self) -> UVec2 {
        self.scale.working_size(self.native_size)
    }

    pub fn fill_signal(&mut self, value: Vec4) {
        self.fill_signal_with(|_| value);
    }

    pub fn fill_signal_with(&mut self, f: impl FnMut(UVec2) -> Vec4) {
        let texels = Self::texels(self.working_size(), f);

        self.device.write_image(self.signal, 0, &texels).unwrap();
    }

    /// Writes given G-buffer image at every mip level; `f` receives pixel
    /// position normalized into `0..1`.
    pub fn fill_gbuffer(
        &mut self,
        image: ImageId,
        mut f: impl FnMut(Vec2) -> GBufferEntry,
    ) {
        for mip in 0..=self.scale.mip() {
            let size = gpu::mip_size(self.native_size, mip);

            let texels = Self::texels(size, |pos| {
                f((pos.as_vec2() + 0.5) / size.as_vec2()).pack()
            });

            self.device.write_image(image, mip, &texels).unwrap();
        }
    }

    /// Writes the same motion vector (in UV units) at every pixel.
    pub fn fill_motion(&mut self, motion: Vec2) {
        for mip in 0..=self.scale.mip() {
            let size = gpu::mip_size(self.native_size, mip);
            let texels = Self::texels(size, |_| motion.extend(0.0).extend(0.0));

            self.device
                .write_image(self.gbuffer.motion, mip, &texels)
                .unwrap();
        }
    }

    pub fn inputs(&self) -> DenoiserInputs {
        DenoiserInputs {
            signal: self.signal,
            gbuffer: self.gbuffer,
            camera: self.camera,
        }
    }

    pub fn read(&mut self, image: ImageId) -> Vec<Vec4> {
        self.device.read_image(image, 0).unwrap()
    }

    fn texels(size: UVec2, f: impl FnMut(UVec2) -> Vec4) -> Vec<Vec4> {
        (0..size.y)
            .flat_map(|y| (0..size.x).map(move |x| UVec2::new(x, y)))
            .map(f)
            .collect()
    }
}
