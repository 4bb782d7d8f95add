use super::Bindable;
use crate::BufferKind;

#[derive(Debug)]
pub struct Buffer {
    label: String,
    kind: BufferKind,
    buffer: wgpu::Buffer,
}

impl Buffer {
    pub fn new(
        device: &wgpu::Device,
        label: impl AsRef<str>,
        size: usize,
        kind: BufferKind,
    ) -> Self {
        let label = label.as_ref();

        log::debug!("Allocating buffer `{label}`; kind={kind:?}, size={size}");

        let usage = match kind {
            BufferKind::Storage => wgpu::BufferUsages::STORAGE,
            BufferKind::IndirectArgs => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT
            }
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        };

        // Copies operate on whole words
        let size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            usage: usage
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            size: size as _,
            mapped_at_creation: false,
        });

        Self {
            label: label.to_string(),
            kind,
            buffer,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    /// Returns a `var<storage, read>` binding.
    pub fn readable(&self) -> BoundBuffer {
        BoundBuffer {
            buffer: &self.buffer,
            ty: wgpu::BufferBindingType::Storage { read_only: true },
        }
    }

    /// Returns a `var<storage, read_write>` binding.
    pub fn writable(&self) -> BoundBuffer {
        BoundBuffer {
            buffer: &self.buffer,
            ty: wgpu::BufferBindingType::Storage { read_only: false },
        }
    }

    pub fn uniform(&self) -> BoundBuffer {
        BoundBuffer {
            buffer: &self.buffer,
            ty: wgpu::BufferBindingType::Uniform,
        }
    }
}

pub struct BoundBuffer<'a> {
    buffer: &'a wgpu::Buffer,
    ty: wgpu::BufferBindingType,
}

impl<'a> Bindable<'a> for BoundBuffer<'a> {
    fn bind(
        &self,
        binding: u32,
    ) -> Vec<(wgpu::BindGroupLayoutEntry, wgpu::BindingResource<'a>)> {
        let layout = wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: self.ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        vec![(layout, self.buffer.as_entire_binding())]
    }
}
