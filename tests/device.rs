use descriptor_hal::{util, DescriptorHeapConfig, DescriptorHeapType};

use crate::common::{initialize_test, TestParameters};

#[test]
fn default_heap_sizes() {
    let config = DescriptorHeapConfig::default();
    assert_eq!(config.views, 16384);
    assert_eq!(config.samplers, 1024);
    assert_eq!(config.render_targets, 1024);
    assert_eq!(config.depth_stencils, 1024);
}

#[test]
fn environment_overrides() {
    std::env::set_var("DESCRIPTOR_HAL_VIEW_HEAP_SIZE", "0x800");
    std::env::set_var("DESCRIPTOR_HAL_SAMPLER_HEAP_SIZE", "128");
    let config = util::heap_config_from_env();
    assert_eq!(config.views, 2048);
    assert_eq!(config.samplers, 128);
}

#[test]
fn cpu_only_heaps() {
    initialize_test(TestParameters::default(), |ctx| {
        for heap in [
            ctx.device.render_target_heap(),
            ctx.device.depth_stencil_heap(),
        ] {
            assert!(!heap.is_shader_visible());
            let base = heap.allocate(2).unwrap();
            assert_eq!(heap.gpu_handle(base), None);
            assert!(ctx.raw.read_descriptor(heap.cpu_handle(base)).is_some());
            heap.release(base, 2).unwrap();
        }
        assert_eq!(
            ctx.device.depth_stencil_heap().ty(),
            DescriptorHeapType::DepthStencil
        );
    });
}
