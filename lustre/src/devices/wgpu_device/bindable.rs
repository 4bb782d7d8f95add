/// Object that can be attached to a pipeline, e.g. a buffer or a texture
pub trait Bindable<'a> {
    fn bind(
        &self,
        binding: u32,
    ) -> Vec<(wgpu::BindGroupLayoutEntry, wgpu::BindingResource<'a>)>;
}
