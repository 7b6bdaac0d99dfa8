//! This module contains common test-only code that needs to be shared between the test modules.

use std::sync::Arc;

use descriptor_hal::{soft, BindingDevice, DescriptorHeapConfig};

pub struct TestParameters {
    pub heap_config: DescriptorHeapConfig,
    pub device_desc: soft::DeviceDescriptor,
}

impl Default for TestParameters {
    fn default() -> Self {
        Self {
            heap_config: DescriptorHeapConfig {
                views: 64,
                samplers: 16,
                render_targets: 4,
                depth_stencils: 4,
            },
            device_desc: soft::DeviceDescriptor::default(),
        }
    }
}

// Builder pattern to make it easier
impl TestParameters {
    pub fn view_heap_size(mut self, views: u32) -> Self {
        self.heap_config.views = views;
        self
    }

    pub fn sampler_heap_size(mut self, samplers: u32) -> Self {
        self.heap_config.samplers = samplers;
        self
    }

    /// Makes the device refuse heaps bigger than `max`.
    pub fn max_descriptors_per_heap(mut self, max: u32) -> Self {
        self.device_desc.max_descriptors_per_heap = max;
        self
    }
}

pub struct TestingContext {
    pub raw: Arc<soft::Device>,
    pub device: BindingDevice<soft::Api>,
}

impl TestingContext {
    /// Reads a slot of the shader-visible view heap.
    pub fn visible_view(&self, index: u32) -> Option<soft::Descriptor> {
        let handle = self.device.view_heap().shader_visible_cpu_handle(index)?;
        self.raw.read_descriptor(handle)
    }

    pub fn visible_sampler(&self, index: u32) -> Option<soft::Descriptor> {
        let handle = self
            .device
            .sampler_heap()
            .shader_visible_cpu_handle(index)?;
        self.raw.read_descriptor(handle)
    }
}

pub fn initialize_test(parameters: TestParameters, test_function: impl FnOnce(TestingContext)) {
    let _ = env_logger::builder().is_test(true).try_init();

    let raw = Arc::new(soft::Device::new(parameters.device_desc));
    let device = BindingDevice::new(Arc::clone(&raw), &parameters.heap_config)
        .expect("descriptor heaps could not be created");

    test_function(TestingContext { raw, device });
}
