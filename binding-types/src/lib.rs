/*! This library describes the binding model that is agnostic of the backend.
 *  It is shared by every backend of `descriptor-hal` and by the code that
 *  declares bind group layouts on top of it.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs, unsafe_op_in_unsafe_fn)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod math;

/// Integral type used for buffer offsets.
pub type BufferAddress = u64;
/// Integral type used for buffer slice sizes.
pub type BufferSize = std::num::NonZeroU64;

/// Required alignment of the GPU address and size of a constant buffer view.
///
/// Matches `D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT`.
pub const CONSTANT_BUFFER_ALIGNMENT: BufferAddress = 256;

/// Largest constant buffer view, in bytes.
///
/// `D3D12_REQ_CONSTANT_BUFFER_ELEMENT_COUNT` elements of 16 bytes.
pub const MAX_CONSTANT_BUFFER_SIZE: BufferAddress = 4096 * 16;

/// Element size of raw (byte address) buffer views.
pub const RAW_BUFFER_ELEMENT_SIZE: BufferAddress = 4;

bitflags::bitflags! {
    /// Describes the shader stages that a binding will be visible from.
    ///
    /// These can be combined so something that is visible from both vertex and fragment shaders can be defined as:
    ///
    /// `ShaderStages::VERTEX | ShaderStages::FRAGMENT`
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct ShaderStages: u32 {
        /// Binding is not visible from any shader stage.
        const NONE = 0;
        /// Binding is visible from the vertex shader of a render pipeline.
        const VERTEX = 1 << 0;
        /// Binding is visible from the fragment shader of a render pipeline.
        const FRAGMENT = 1 << 1;
        /// Binding is visible from the compute shader of a compute pipeline.
        const COMPUTE = 1 << 2;
        /// Binding is visible from the vertex and fragment shaders of a render pipeline.
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Dimensions of a particular texture view.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureViewDimension {
    /// A one dimensional texture.
    #[cfg_attr(feature = "serde", serde(rename = "1d"))]
    D1,
    /// A two dimensional texture.
    #[cfg_attr(feature = "serde", serde(rename = "2d"))]
    #[default]
    D2,
    /// A two dimensional array texture.
    #[cfg_attr(feature = "serde", serde(rename = "2d-array"))]
    D2Array,
    /// A cubemap texture.
    #[cfg_attr(feature = "serde", serde(rename = "cube"))]
    Cube,
    /// A cubemap array texture.
    #[cfg_attr(feature = "serde", serde(rename = "cube-array"))]
    CubeArray,
    /// A three dimensional texture.
    #[cfg_attr(feature = "serde", serde(rename = "3d"))]
    D3,
}

/// Specific type of a buffer binding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferBindingType {
    /// A buffer for uniform values. Bound through a constant buffer view.
    #[default]
    Uniform,
    /// A storage buffer. Bound through a raw shader resource view when
    /// `read_only`, through a raw unordered access view otherwise.
    Storage {
        /// If `true`, the buffer can only be read in the shader.
        read_only: bool,
    },
}

/// Specific type of a sample in a texture binding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureSampleType {
    /// Sampling returns floats.
    Float {
        /// If this is `false`, the texture can't be sampled with
        /// a filtering sampler.
        filterable: bool,
    },
    /// Sampling does the depth reference comparison.
    Depth,
    /// Sampling returns signed integers.
    Sint,
    /// Sampling returns unsigned integers.
    Uint,
}

impl Default for TextureSampleType {
    fn default() -> Self {
        Self::Float { filterable: true }
    }
}

/// Allowed access of a storage texture binding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum StorageTextureAccess {
    /// The texture can only be written in the shader.
    #[default]
    WriteOnly,
    /// The texture can only be read in the shader.
    ReadOnly,
    /// The texture can be both read and written in the shader.
    ReadWrite,
}

/// Specific type of a sampler binding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SamplerBindingType {
    /// The sampling result is produced based on more than a single color sample from a texture,
    /// e.g. when bilinear interpolation is enabled.
    #[default]
    Filtering,
    /// The sampling result is produced based on a single color sample from a texture.
    NonFiltering,
    /// Use as a comparison sampler instead of a normal sampler.
    Comparison,
}

/// Specific type of a binding.
///
/// For use in [`BindGroupLayoutEntry`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BindingType {
    /// A buffer binding.
    Buffer {
        /// Sub-type of the buffer binding.
        ty: BufferBindingType,
        /// Minimum size of the corresponding buffer binding required to match this entry.
        #[cfg_attr(feature = "serde", serde(default))]
        min_binding_size: Option<BufferSize>,
    },
    /// A sampler that can be used to sample a texture.
    Sampler(SamplerBindingType),
    /// A sampled texture binding.
    Texture {
        /// Sample type of the texture binding.
        sample_type: TextureSampleType,
        /// Dimension of the texture view that is going to be sampled.
        view_dimension: TextureViewDimension,
        /// True if the texture has a sample count greater than 1.
        multisampled: bool,
    },
    /// A storage texture.
    StorageTexture {
        /// Allowed access to this texture.
        access: StorageTextureAccess,
        /// Dimension of the texture view that is going to be accessed.
        view_dimension: TextureViewDimension,
    },
}

impl BindingType {
    /// Shorthand for a uniform buffer binding without a minimum size.
    pub const fn uniform_buffer() -> Self {
        Self::Buffer {
            ty: BufferBindingType::Uniform,
            min_binding_size: None,
        }
    }

    /// Shorthand for a storage buffer binding without a minimum size.
    pub const fn storage_buffer(read_only: bool) -> Self {
        Self::Buffer {
            ty: BufferBindingType::Storage { read_only },
            min_binding_size: None,
        }
    }

    /// Shorthand for a filterable 2D float texture binding.
    pub const fn texture_2d() -> Self {
        Self::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        }
    }

    /// Returns true for sampler bindings.
    pub fn is_sampler(&self) -> bool {
        match *self {
            Self::Sampler(_) => true,
            _ => false,
        }
    }
}

/// Describes a single binding inside a bind group layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BindGroupLayoutEntry {
    /// Binding index. Must match the shader register and be unique inside a layout.
    pub binding: u32,
    /// Which shader stages can see this binding.
    pub visibility: ShaderStages,
    /// The type of the binding.
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    /// Creates an entry visible from every shader stage.
    pub const fn new(binding: u32, ty: BindingType) -> Self {
        Self {
            binding,
            visibility: ShaderStages::all(),
            ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_detection() {
        assert!(BindingType::Sampler(SamplerBindingType::Comparison).is_sampler());
        assert!(!BindingType::uniform_buffer().is_sampler());
        assert!(!BindingType::texture_2d().is_sampler());
    }

    #[test]
    fn entries_default_to_all_stages() {
        let entry = BindGroupLayoutEntry::new(3, BindingType::storage_buffer(true));
        assert_eq!(entry.binding, 3);
        assert!(entry.visibility.contains(ShaderStages::VERTEX_FRAGMENT));
        assert!(entry.visibility.contains(ShaderStages::COMPUTE));
    }
}
