use std::mem;
use std::ops::Range;

use bytemuck::Pod;
use log::debug;

use super::{shaders, BindGroupBuilder, Buffer};

pub enum Dispatch<'a> {
    Direct([u32; 3]),

    /// Workgroup counts are read from given buffer, as written by the tile
    /// classification
    Indirect(&'a Buffer),
}

/// Compute pipeline of a single command kind.
///
/// Bind groups are rebuilt on every run, since each run can bind different
/// resources; the layout is fixed when the pass gets built.
#[derive(Debug)]
pub struct ComputePass {
    label: &'static str,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    params_size: usize,
}

impl ComputePass {
    pub fn new<P>(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        bind_group: &BindGroupBuilder,
    ) -> Self
    where
        P: Pod,
    {
        debug!("Initializing pass: {label}");

        let module = shaders::load(device, label, source);
        let layout = bind_group.build_layout(device);
        let params_size = mem::size_of::<P>();

        let push_constant_ranges = if params_size > 0 {
            vec![wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: Range {
                    start: 0,
                    end: params_size as u32,
                },
            }]
        } else {
            vec![]
        };

        let pipeline_layout_label = format!("lustre_{label}_pipeline_layout");

        let pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&pipeline_layout_label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &push_constant_ranges,
            });

        let pipeline_label = format!("lustre_{label}_pipeline");

        let pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&pipeline_label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        Self {
            label,
            layout,
            pipeline,
            params_size,
        }
    }

    pub fn run<P>(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: BindGroupBuilder,
        params: P,
        dispatch: Dispatch,
    ) where
        P: Pod,
    {
        debug_assert_eq!(self.params_size, mem::size_of::<P>());

        let bind_group = bind_group.build(device, &self.layout);
        let label = format!("lustre_{}_pass", self.label);

        let mut pass =
            encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&label),
                timestamp_writes: None,
            });

        pass.set_pipeline(&self.pipeline);

        if self.params_size > 0 {
            pass.set_push_constants(0, bytemuck::bytes_of(&params));
        }

        pass.set_bind_group(0, &bind_group, &[]);

        match dispatch {
            Dispatch::Direct([x, y, z]) => {
                pass.dispatch_workgroups(x, y, z);
            }

            Dispatch::Indirect(args) => {
                pass.dispatch_workgroups_indirect(args.buffer(), 0);
            }
        }
    }
}
