/*!
# Direct3D12 backend

Thin layer over `ID3D12Device`. Descriptor heaps are COM objects released
when the last reference goes away, so dropping a [`DescriptorHeap`] is all
it takes to free it.

Null descriptors are created with a null `pResource`, which gives D3D11-like
behavior: reads return zeros and writes are discarded.
!*/

mod device;

use windows::Win32::{
    Foundation,
    Graphics::{Direct3D12, Dxgi},
};

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Device = Device;

    type DescriptorHeap = DescriptorHeap;
    type Buffer = Buffer;
    type TextureView = TextureView;
    type Sampler = Sampler;
}

trait HResult<O> {
    fn into_device_result(self, description: &str) -> Result<O, crate::DeviceError>;
}

impl<T> HResult<T> for windows::core::Result<T> {
    fn into_device_result(self, description: &str) -> Result<T, crate::DeviceError> {
        self.map_err(|err| {
            log::error!("{} failed: {}", description, err);
            match err.code() {
                Foundation::E_OUTOFMEMORY => crate::DeviceError::OutOfMemory,
                Dxgi::DXGI_ERROR_DEVICE_REMOVED
                | Dxgi::DXGI_ERROR_DEVICE_HUNG
                | Dxgi::DXGI_ERROR_DEVICE_RESET => crate::DeviceError::Lost,
                _ => crate::DeviceError::Unexpected,
            }
        })
    }
}

pub struct Device {
    raw: Direct3D12::ID3D12Device,
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}

impl Device {
    /// # Safety
    ///
    /// `raw` must be a valid device, it's used from any thread.
    pub unsafe fn from_raw(raw: Direct3D12::ID3D12Device) -> Self {
        Self { raw }
    }

    pub fn raw_device(&self) -> &Direct3D12::ID3D12Device {
        &self.raw
    }
}

pub struct DescriptorHeap {
    raw: Direct3D12::ID3D12DescriptorHeap,
    shader_visible: bool,
}

unsafe impl Send for DescriptorHeap {}
unsafe impl Sync for DescriptorHeap {}

impl DescriptorHeap {
    /// The heap to pass to `SetDescriptorHeaps`.
    pub fn raw_heap(&self) -> &Direct3D12::ID3D12DescriptorHeap {
        &self.raw
    }
}

impl std::fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("shader_visible", &self.shader_visible)
            .finish_non_exhaustive()
    }
}

pub struct Buffer {
    resource: Direct3D12::ID3D12Resource,
    gpu_address: bt::BufferAddress,
    size: bt::BufferAddress,
}

unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// # Safety
    ///
    /// `resource` must be a buffer of at least `size` bytes.
    pub unsafe fn from_raw(resource: Direct3D12::ID3D12Resource, size: bt::BufferAddress) -> Self {
        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };
        Self {
            resource,
            gpu_address,
            size,
        }
    }
}

impl crate::Buffer for Buffer {
    fn gpu_address(&self) -> bt::BufferAddress {
        self.gpu_address
    }
    fn size(&self) -> bt::BufferAddress {
        self.size
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("gpu_address", &self.gpu_address)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// A texture together with the view descriptions used to bind it.
pub struct TextureView {
    resource: Direct3D12::ID3D12Resource,
    srv_desc: Option<Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC>,
    uav_desc: Option<Direct3D12::D3D12_UNORDERED_ACCESS_VIEW_DESC>,
}

unsafe impl Send for TextureView {}
unsafe impl Sync for TextureView {}

impl TextureView {
    /// # Safety
    ///
    /// The descriptions must be valid for `resource`. A missing description
    /// falls back to the default view of the resource.
    pub unsafe fn from_raw(
        resource: Direct3D12::ID3D12Resource,
        srv_desc: Option<Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC>,
        uav_desc: Option<Direct3D12::D3D12_UNORDERED_ACCESS_VIEW_DESC>,
    ) -> Self {
        Self {
            resource,
            srv_desc,
            uav_desc,
        }
    }
}

impl std::fmt::Debug for TextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureView")
            .field("has_srv_desc", &self.srv_desc.is_some())
            .field("has_uav_desc", &self.uav_desc.is_some())
            .finish_non_exhaustive()
    }
}

pub struct Sampler {
    desc: Direct3D12::D3D12_SAMPLER_DESC,
}

unsafe impl Send for Sampler {}
unsafe impl Sync for Sampler {}

impl Sampler {
    pub fn new(desc: Direct3D12::D3D12_SAMPLER_DESC) -> Self {
        Self { desc }
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("filter", &self.desc.Filter)
            .finish_non_exhaustive()
    }
}
