use super::Bindable;

/// Bindings of a single dispatch; turned into a layout once per pass and
/// into a bind group on every run.
pub struct BindGroupBuilder<'a> {
    label: String,
    layouts: Vec<wgpu::BindGroupLayoutEntry>,
    resources: Vec<wgpu::BindingResource<'a>>,
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new(label: impl ToString) -> Self {
        Self {
            label: label.to_string(),
            layouts: Default::default(),
            resources: Default::default(),
        }
    }

    pub fn add(mut self, item: impl Bindable<'a>) -> Self {
        for (layout, resource) in item.bind(self.resources.len() as u32) {
            self.layouts.push(layout);
            self.resources.push(resource);
        }

        self
    }

    pub fn build_layout(&self, device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("lustre_{}_layout", self.label)),
            entries: &self.layouts,
        })
    }

    pub fn build(
        self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> wgpu::BindGroup {
        let entries: Vec<_> = self
            .resources
            .into_iter()
            .enumerate()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: binding as _,
                resource,
            })
            .collect();

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("lustre_{}", self.label)),
            layout,
            entries: &entries,
        })
    }
}
