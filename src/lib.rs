/*! This library owns the descriptor heaps of an explicit graphics API backend.
 *  It allocates descriptor ranges, builds descriptor tables out of bind group
 *  layouts and materializes bind groups into them, with the following rules:
 *  - Compile-time backend selection via traits.
 *  - Heaps grow by doubling; descriptors are addressed by index, never by a
 *    cached pointer, so growth never invalidates a handle.
 *  - Every slot of a bind group's descriptor table is initialized, either with
 *    the bound resource or with a null view.
 *  - Native objects are released by ownership, not by finalization.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod descriptor;
pub mod device;
#[cfg(all(feature = "dx12", windows))]
pub mod dx12;
pub mod group;
pub mod layout;
pub mod soft;
pub mod util;

use std::fmt;

use thiserror::Error;

pub use bt;
pub use descriptor::{DescriptorAllocator, DescriptorTable, TableWriter};
pub use device::{BindingDevice, DescriptorHeapConfig};
pub use group::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupError, BindingResource,
    BufferBinding,
};
pub use layout::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutError, DescriptorRange, RangeKind,
};

pub type Label<'a> = Option<&'a str>;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
    #[error("unexpected error variant (driver implementation is at fault)")]
    Unexpected,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DescriptorError {
    #[error("unable to grow the {ty:?} descriptor heap to {requested} descriptors")]
    ResourceExhausted {
        ty: DescriptorHeapType,
        requested: u64,
        #[source]
        source: DeviceError,
    },
    #[error("descriptors {base}..{} of the {ty:?} heap are not allocated", *base as u64 + *count as u64)]
    InvalidState {
        ty: DescriptorHeapType,
        base: u32,
        count: u32,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub trait Api: Clone + Sized + 'static {
    type Device: Device<Self>;

    type DescriptorHeap: fmt::Debug + Send + Sync;
    type Buffer: Buffer + fmt::Debug + Send + Sync + 'static;
    type TextureView: fmt::Debug + Send + Sync;
    type Sampler: fmt::Debug + Send + Sync;
}

/// The native capabilities the descriptor subsystem is built on.
///
/// Everything here is a thin call into the graphics API: no validation,
/// no bookkeeping. Heaps are released when the returned object is dropped.
pub trait Device<A: Api>: Send + Sync {
    /// Creates a descriptor heap with `desc.capacity` slots.
    ///
    /// Shader-visible heaps also expose a GPU start handle.
    unsafe fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDescriptor,
    ) -> Result<A::DescriptorHeap, DeviceError>;

    unsafe fn descriptor_heap_start(&self, heap: &A::DescriptorHeap) -> HeapStart;

    /// Distance in bytes between two consecutive slots of a heap of type `ty`.
    fn descriptor_handle_size(&self, ty: DescriptorHeapType) -> u32;

    /// Writes a constant buffer view, or a null one if `view` is `None`.
    unsafe fn write_constant_buffer_view(
        &self,
        view: Option<&ConstantBufferView>,
        dst: CpuDescriptorHandle,
    );

    unsafe fn write_shader_resource_view(
        &self,
        source: ViewSource<'_, A>,
        dst: CpuDescriptorHandle,
    );

    unsafe fn write_unordered_access_view(
        &self,
        source: ViewSource<'_, A>,
        dst: CpuDescriptorHandle,
    );

    /// Writes a sampler, or the default sampler if `sampler` is `None`.
    unsafe fn write_sampler(&self, sampler: Option<&A::Sampler>, dst: CpuDescriptorHandle);

    /// Copies `count` consecutive descriptors from `src` to `dst`.
    ///
    /// The source must be a CPU-only heap.
    unsafe fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    );
}

pub trait Buffer {
    fn gpu_address(&self) -> bt::BufferAddress;
    fn size(&self) -> bt::BufferAddress;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    Sampler,
    RenderTarget,
    DepthStencil,
}

impl DescriptorHeapType {
    /// Whether heaps of this type can be made visible to shaders.
    pub fn supports_shader_visibility(self) -> bool {
        match self {
            Self::CbvSrvUav | Self::Sampler => true,
            Self::RenderTarget | Self::DepthStencil => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self {
            ptr: self.ptr + index as usize * stride as usize,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self {
            ptr: self.ptr + index as u64 * stride as u64,
        }
    }
}

/// First slot of a native heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapStart {
    pub cpu: CpuDescriptorHandle,
    /// Only present for shader-visible heaps.
    pub gpu: Option<GpuDescriptorHandle>,
}

#[derive(Clone, Debug)]
pub struct DescriptorHeapDescriptor<'a> {
    pub label: Label<'a>,
    pub ty: DescriptorHeapType,
    pub capacity: u32,
    pub shader_visible: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstantBufferView {
    pub buffer_location: bt::BufferAddress,
    pub size_in_bytes: u32,
}

/// What a shader resource or unordered access view points at.
#[derive(Debug)]
pub enum ViewSource<'a, A: Api> {
    /// Null view: buffer dimension, `R32_UINT`. Reads return zeros, writes are dropped.
    Null,
    /// Raw view over `offset..offset + size` of a buffer.
    Buffer {
        buffer: &'a A::Buffer,
        offset: bt::BufferAddress,
        size: bt::BufferAddress,
    },
    TextureView(&'a A::TextureView),
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for ViewSource<'_, A> {
    fn clone(&self) -> Self {
        match *self {
            Self::Null => Self::Null,
            Self::Buffer {
                buffer,
                offset,
                size,
            } => Self::Buffer {
                buffer,
                offset,
                size,
            },
            Self::TextureView(view) => Self::TextureView(view),
        }
    }
}

#[test]
fn handle_arithmetic() {
    let cpu = CpuDescriptorHandle { ptr: 0x1000 };
    assert_eq!(cpu.offset(3, 32).ptr, 0x1000 + 96);
    let gpu = GpuDescriptorHandle { ptr: 1 << 40 };
    assert_eq!(gpu.offset(2, 16).ptr, (1 << 40) + 32);
}
