use std::borrow::Cow;

const COMMON: &str = include_str!("../../../shaders/common.wgsl");

pub const RESET_ARGS: &str = include_str!("../../../shaders/reset_args.wgsl");
pub const REPROJECT: &str = include_str!("../../../shaders/reproject.wgsl");
pub const COPY_TILES: &str = include_str!("../../../shaders/copy_tiles.wgsl");
pub const ATROUS: &str = include_str!("../../../shaders/atrous.wgsl");
pub const UPSAMPLE: &str = include_str!("../../../shaders/upsample.wgsl");
pub const TAA: &str = include_str!("../../../shaders/taa.wgsl");

/// Compiles given shader, prefixed with the definitions shared by all passes.
pub fn load(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> wgpu::ShaderModule {
    log::debug!("Compiling shader: {label}");

    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("lustre_{label}_shader")),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(combine(source))),
    })
}

fn combine(source: &str) -> String {
    format!("{COMMON}\n{source}")
}

#[cfg(test)]
mod tests {
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    use super::*;

    #[test]
    fn every_shader_validates() {
        let shaders = [
            ("reset_args", RESET_ARGS),
            ("reproject", REPROJECT),
            ("copy_tiles", COPY_TILES),
            ("atrous", ATROUS),
            ("upsample", UPSAMPLE),
            ("taa", TAA),
        ];

        for (label, source) in shaders {
            let module = naga::front::wgsl::parse_str(&combine(source))
                .unwrap_or_else(|err| {
                    panic!("{label}: couldn't parse shader: {err}")
                });

            Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
                .validate(&module)
                .unwrap_or_else(|err| {
                    panic!("{label}: shader is invalid: {err:?}")
                });
        }
    }
}
