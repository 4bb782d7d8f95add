use glam::UVec2;

use super::Bindable;

pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Size of a single texel, in bytes.
pub const TEXEL_SIZE: u32 = 16;

#[derive(Debug)]
pub struct Texture {
    label: String,
    tex: wgpu::Texture,
    mips: Vec<(UVec2, wgpu::TextureView)>,
}

impl Texture {
    pub fn new(
        device: &wgpu::Device,
        label: impl AsRef<str>,
        size: UVec2,
        mip_levels: u32,
    ) -> Self {
        let label = label.as_ref();

        log::debug!(
            "Allocating texture `{label}`; size={size}, mip_levels={mip_levels}"
        );

        let tex = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label}_tex")),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let mips = (0..mip_levels)
            .map(|mip| {
                let view = tex.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("{label}_mip{mip}")),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    ..Default::default()
                });

                (lustre_gpu::mip_size(size, mip), view)
            })
            .collect();

        Self {
            label: label.to_string(),
            tex,
            mips,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tex(&self) -> &wgpu::Texture {
        &self.tex
    }

    pub fn size(&self) -> UVec2 {
        self.mips[0].0
    }

    pub fn mip_levels(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn mip_size(&self, mip: u32) -> Option<UVec2> {
        self.mips.get(mip as usize).map(|(size, _)| *size)
    }

    /// Returns a sampled (`texture_2d<f32>`) binding of given mip level.
    pub fn readable(&self, mip: u32) -> Option<ReadableTexture> {
        self.mips
            .get(mip as usize)
            .map(|(_, view)| ReadableTexture { view })
    }

    /// Returns a write-only storage binding of the top mip level.
    pub fn writable(&self) -> WritableTexture {
        WritableTexture {
            view: &self.mips[0].1,
        }
    }
}

pub struct ReadableTexture<'a> {
    view: &'a wgpu::TextureView,
}

impl<'a> Bindable<'a> for ReadableTexture<'a> {
    fn bind(
        &self,
        binding: u32,
    ) -> Vec<(wgpu::BindGroupLayoutEntry, wgpu::BindingResource<'a>)> {
        let layout = wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: false,
                },
            },
            count: None,
        };

        vec![(layout, wgpu::BindingResource::TextureView(self.view))]
    }
}

pub struct WritableTexture<'a> {
    view: &'a wgpu::TextureView,
}

impl<'a> Bindable<'a> for WritableTexture<'a> {
    fn bind(
        &self,
        binding: u32,
    ) -> Vec<(wgpu::BindGroupLayoutEntry, wgpu::BindingResource<'a>)> {
        let layout = wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: FORMAT,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        };

        vec![(layout, wgpu::BindingResource::TextureView(self.view))]
    }
}
