use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    Api, BindGroup, BindGroupDescriptor, BindGroupError, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutError, DescriptorAllocator, DescriptorError,
    DescriptorHeapType,
};

/// Initial number of descriptors of the per-device heaps.
///
/// Heaps grow on demand, these only decide how early the first growth happens.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DescriptorHeapConfig {
    /// Constant buffer, shader resource and unordered access views.
    pub views: u32,
    pub samplers: u32,
    pub render_targets: u32,
    pub depth_stencils: u32,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        Self {
            views: 16384,
            samplers: 1024,
            render_targets: 1024,
            depth_stencils: 1024,
        }
    }
}

/// A native device together with the descriptor heaps bind groups are written to.
pub struct BindingDevice<A: Api> {
    raw: Arc<A::Device>,
    views: Arc<DescriptorAllocator<A>>,
    samplers: Arc<DescriptorAllocator<A>>,
    render_targets: Arc<DescriptorAllocator<A>>,
    depth_stencils: Arc<DescriptorAllocator<A>>,
}

impl<A: Api> BindingDevice<A> {
    pub fn new(raw: Arc<A::Device>, config: &DescriptorHeapConfig) -> Result<Self, DescriptorError> {
        let allocator = |ty, capacity, shader_visible| {
            DescriptorAllocator::new(Arc::clone(&raw), ty, capacity, shader_visible).map(Arc::new)
        };
        let views = allocator(DescriptorHeapType::CbvSrvUav, config.views, true)?;
        let samplers = allocator(DescriptorHeapType::Sampler, config.samplers, true)?;
        let render_targets =
            allocator(DescriptorHeapType::RenderTarget, config.render_targets, false)?;
        let depth_stencils =
            allocator(DescriptorHeapType::DepthStencil, config.depth_stencils, false)?;
        log::info!("Created descriptor heaps with {:?}", config);

        Ok(Self {
            raw,
            views,
            samplers,
            render_targets,
            depth_stencils,
        })
    }

    pub fn raw(&self) -> &Arc<A::Device> {
        &self.raw
    }

    pub fn view_heap(&self) -> &Arc<DescriptorAllocator<A>> {
        &self.views
    }

    pub fn sampler_heap(&self) -> &Arc<DescriptorAllocator<A>> {
        &self.samplers
    }

    pub fn render_target_heap(&self) -> &Arc<DescriptorAllocator<A>> {
        &self.render_targets
    }

    pub fn depth_stencil_heap(&self) -> &Arc<DescriptorAllocator<A>> {
        &self.depth_stencils
    }

    pub fn create_bind_group_layout(
        &self,
        desc: &BindGroupLayoutDescriptor,
    ) -> Result<Arc<BindGroupLayout>, BindGroupLayoutError> {
        BindGroupLayout::new(desc).map(Arc::new)
    }

    pub fn create_bind_group(
        &self,
        desc: &BindGroupDescriptor<A>,
    ) -> Result<BindGroup<A>, BindGroupError> {
        BindGroup::new(&self.views, &self.samplers, desc)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BindingDevice, DescriptorHeapConfig};
    use crate::{soft, DescriptorError, DescriptorHeapType};

    #[test]
    fn heaps_follow_the_config() {
        let raw = Arc::new(soft::Device::default());
        let config = DescriptorHeapConfig {
            views: 64,
            samplers: 16,
            render_targets: 8,
            depth_stencils: 0,
        };
        let device = BindingDevice::<soft::Api>::new(Arc::clone(&raw), &config).unwrap();
        assert_eq!(device.view_heap().capacity(), 64);
        assert_eq!(device.sampler_heap().capacity(), 16);
        assert_eq!(device.render_target_heap().capacity(), 8);
        assert_eq!(device.depth_stencil_heap().capacity(), 1);
        assert!(device.view_heap().is_shader_visible());
        assert!(device.sampler_heap().is_shader_visible());
        assert!(!device.render_target_heap().is_shader_visible());
        assert_eq!(
            device.depth_stencil_heap().ty(),
            DescriptorHeapType::DepthStencil
        );
        // Two heaps for each shader-visible allocator, one for the others.
        assert_eq!(raw.live_heap_count(), 6);
        drop(device);
        assert_eq!(raw.live_heap_count(), 0);
    }

    #[test]
    fn oversized_sampler_heap_fails() {
        let raw = Arc::new(soft::Device::default());
        let config = DescriptorHeapConfig {
            samplers: 4096,
            ..Default::default()
        };
        assert!(matches!(
            BindingDevice::<soft::Api>::new(raw, &config),
            Err(DescriptorError::ResourceExhausted {
                ty: DescriptorHeapType::Sampler,
                ..
            })
        ));
    }
}
