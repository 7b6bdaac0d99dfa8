//! Environment overrides.

use crate::DescriptorHeapConfig;

/// Parses a heap size such as `4096` or `0x1000`.
pub fn parse_heap_size(string: &str) -> Option<u32> {
    let string = string.trim();
    match string
        .strip_prefix("0x")
        .or_else(|| string.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => string.parse().ok(),
    }
}

fn heap_size_from_env(name: &str) -> Option<u32> {
    let value = std::env::var(name).ok()?;
    let size = parse_heap_size(&value);
    if size.is_none() {
        log::warn!("Ignoring {}={:?}, not a descriptor count", name, value);
    }
    size
}

/// Get the descriptor heap sizes, with the defaults overridden by the environment
/// variables `DESCRIPTOR_HAL_VIEW_HEAP_SIZE`, `DESCRIPTOR_HAL_SAMPLER_HEAP_SIZE`,
/// `DESCRIPTOR_HAL_RTV_HEAP_SIZE` and `DESCRIPTOR_HAL_DSV_HEAP_SIZE`.
pub fn heap_config_from_env() -> DescriptorHeapConfig {
    let default = DescriptorHeapConfig::default();
    DescriptorHeapConfig {
        views: heap_size_from_env("DESCRIPTOR_HAL_VIEW_HEAP_SIZE").unwrap_or(default.views),
        samplers: heap_size_from_env("DESCRIPTOR_HAL_SAMPLER_HEAP_SIZE")
            .unwrap_or(default.samplers),
        render_targets: heap_size_from_env("DESCRIPTOR_HAL_RTV_HEAP_SIZE")
            .unwrap_or(default.render_targets),
        depth_stencils: heap_size_from_env("DESCRIPTOR_HAL_DSV_HEAP_SIZE")
            .unwrap_or(default.depth_stencils),
    }
}

#[test]
fn heap_sizes() {
    assert_eq!(parse_heap_size("4096"), Some(4096));
    assert_eq!(parse_heap_size(" 0x100 "), Some(256));
    assert_eq!(parse_heap_size("lots"), None);
    assert_eq!(parse_heap_size("-1"), None);
}

#[test]
fn env_overrides_defaults() {
    std::env::set_var("DESCRIPTOR_HAL_RTV_HEAP_SIZE", "32");
    std::env::set_var("DESCRIPTOR_HAL_DSV_HEAP_SIZE", "many");
    let config = heap_config_from_env();
    assert_eq!(config.render_targets, 32);
    assert_eq!(
        config.depth_stencils,
        DescriptorHeapConfig::default().depth_stencils
    );
}
