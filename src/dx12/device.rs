use windows::Win32::Graphics::{Direct3D12, Dxgi};

use super::{Api, HResult as _};
use crate::{
    CpuDescriptorHandle, DescriptorHeapType, DeviceError, GpuDescriptorHandle, HeapStart,
    ViewSource,
};

fn map_heap_type(ty: DescriptorHeapType) -> Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::CbvSrvUav => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::RenderTarget => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::DepthStencil => Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

fn map_cpu_handle(handle: CpuDescriptorHandle) -> Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE {
    Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

fn raw_buffer_srv(
    offset: bt::BufferAddress,
    size: bt::BufferAddress,
    format: Dxgi::Common::DXGI_FORMAT,
    flags: Direct3D12::D3D12_BUFFER_SRV_FLAGS,
) -> Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC {
    Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: format,
        Shader4ComponentMapping: Direct3D12::D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
        ViewDimension: Direct3D12::D3D12_SRV_DIMENSION_BUFFER,
        Anonymous: Direct3D12::D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
            Buffer: Direct3D12::D3D12_BUFFER_SRV {
                FirstElement: offset / bt::RAW_BUFFER_ELEMENT_SIZE,
                NumElements: (size / bt::RAW_BUFFER_ELEMENT_SIZE) as u32,
                StructureByteStride: 0,
                Flags: flags,
            },
        },
    }
}

fn raw_buffer_uav(
    offset: bt::BufferAddress,
    size: bt::BufferAddress,
    format: Dxgi::Common::DXGI_FORMAT,
    flags: Direct3D12::D3D12_BUFFER_UAV_FLAGS,
) -> Direct3D12::D3D12_UNORDERED_ACCESS_VIEW_DESC {
    Direct3D12::D3D12_UNORDERED_ACCESS_VIEW_DESC {
        Format: format,
        ViewDimension: Direct3D12::D3D12_UAV_DIMENSION_BUFFER,
        Anonymous: Direct3D12::D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
            Buffer: Direct3D12::D3D12_BUFFER_UAV {
                FirstElement: offset / bt::RAW_BUFFER_ELEMENT_SIZE,
                NumElements: (size / bt::RAW_BUFFER_ELEMENT_SIZE) as u32,
                StructureByteStride: 0,
                CounterOffsetInBytes: 0,
                Flags: flags,
            },
        },
    }
}

/// Point sampling, wrapping on every axis. Stands in for unbound samplers.
fn default_sampler_desc() -> Direct3D12::D3D12_SAMPLER_DESC {
    Direct3D12::D3D12_SAMPLER_DESC {
        Filter: Direct3D12::D3D12_FILTER_MIN_MAG_MIP_POINT,
        AddressU: Direct3D12::D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressV: Direct3D12::D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressW: Direct3D12::D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        MipLODBias: 0f32,
        MaxAnisotropy: 1,
        ComparisonFunc: Direct3D12::D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: [0f32; 4],
        MinLOD: 0f32,
        MaxLOD: f32::MAX,
    }
}

impl crate::Device<Api> for super::Device {
    unsafe fn create_descriptor_heap(
        &self,
        desc: &crate::DescriptorHeapDescriptor,
    ) -> Result<super::DescriptorHeap, DeviceError> {
        profiling::scope!("ID3D12Device::CreateDescriptorHeap");
        let raw_desc = Direct3D12::D3D12_DESCRIPTOR_HEAP_DESC {
            Type: map_heap_type(desc.ty),
            NumDescriptors: desc.capacity,
            Flags: if desc.shader_visible {
                Direct3D12::D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                Direct3D12::D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let raw = unsafe {
            self.raw
                .CreateDescriptorHeap::<Direct3D12::ID3D12DescriptorHeap>(&raw_desc)
        }
        .into_device_result("Descriptor heap creation")?;

        if let Some(label) = desc.label {
            let name = label
                .encode_utf16()
                .chain(std::iter::once(0))
                .collect::<Vec<u16>>();
            unsafe { raw.SetName(windows::core::PCWSTR(name.as_ptr())) }
                .into_device_result("SetName")?;
        }

        Ok(super::DescriptorHeap {
            raw,
            shader_visible: desc.shader_visible,
        })
    }

    unsafe fn descriptor_heap_start(&self, heap: &super::DescriptorHeap) -> HeapStart {
        let cpu = unsafe { heap.raw.GetCPUDescriptorHandleForHeapStart() };
        let gpu = if heap.shader_visible {
            let gpu = unsafe { heap.raw.GetGPUDescriptorHandleForHeapStart() };
            Some(GpuDescriptorHandle { ptr: gpu.ptr })
        } else {
            None
        };
        HeapStart {
            cpu: CpuDescriptorHandle { ptr: cpu.ptr },
            gpu,
        }
    }

    fn descriptor_handle_size(&self, ty: DescriptorHeapType) -> u32 {
        unsafe { self.raw.GetDescriptorHandleIncrementSize(map_heap_type(ty)) }
    }

    unsafe fn write_constant_buffer_view(
        &self,
        view: Option<&crate::ConstantBufferView>,
        dst: CpuDescriptorHandle,
    ) {
        let raw_desc = view.map(|view| Direct3D12::D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: view.buffer_location,
            SizeInBytes: view.size_in_bytes,
        });
        unsafe {
            self.raw.CreateConstantBufferView(
                raw_desc.as_ref().map(|desc| desc as *const _),
                map_cpu_handle(dst),
            )
        };
    }

    unsafe fn write_shader_resource_view(
        &self,
        source: ViewSource<'_, Api>,
        dst: CpuDescriptorHandle,
    ) {
        let dst = map_cpu_handle(dst);
        match source {
            ViewSource::Null => {
                let raw_desc = raw_buffer_srv(
                    0,
                    0,
                    Dxgi::Common::DXGI_FORMAT_R32_UINT,
                    Direct3D12::D3D12_BUFFER_SRV_FLAG_NONE,
                );
                unsafe { self.raw.CreateShaderResourceView(None, Some(&raw_desc), dst) };
            }
            ViewSource::Buffer {
                buffer,
                offset,
                size,
            } => {
                let raw_desc = raw_buffer_srv(
                    offset,
                    size,
                    Dxgi::Common::DXGI_FORMAT_R32_TYPELESS,
                    Direct3D12::D3D12_BUFFER_SRV_FLAG_RAW,
                );
                unsafe {
                    self.raw
                        .CreateShaderResourceView(&buffer.resource, Some(&raw_desc), dst)
                };
            }
            ViewSource::TextureView(view) => unsafe {
                self.raw.CreateShaderResourceView(
                    &view.resource,
                    view.srv_desc.as_ref().map(|desc| desc as *const _),
                    dst,
                )
            },
        }
    }

    unsafe fn write_unordered_access_view(
        &self,
        source: ViewSource<'_, Api>,
        dst: CpuDescriptorHandle,
    ) {
        let dst = map_cpu_handle(dst);
        match source {
            ViewSource::Null => {
                let raw_desc = raw_buffer_uav(
                    0,
                    0,
                    Dxgi::Common::DXGI_FORMAT_R32_UINT,
                    Direct3D12::D3D12_BUFFER_UAV_FLAG_NONE,
                );
                unsafe {
                    self.raw
                        .CreateUnorderedAccessView(None, None, Some(&raw_desc), dst)
                };
            }
            ViewSource::Buffer {
                buffer,
                offset,
                size,
            } => {
                let raw_desc = raw_buffer_uav(
                    offset,
                    size,
                    Dxgi::Common::DXGI_FORMAT_R32_TYPELESS,
                    Direct3D12::D3D12_BUFFER_UAV_FLAG_RAW,
                );
                unsafe {
                    self.raw.CreateUnorderedAccessView(
                        &buffer.resource,
                        None,
                        Some(&raw_desc),
                        dst,
                    )
                };
            }
            ViewSource::TextureView(view) => unsafe {
                self.raw.CreateUnorderedAccessView(
                    &view.resource,
                    None,
                    view.uav_desc.as_ref().map(|desc| desc as *const _),
                    dst,
                )
            },
        }
    }

    unsafe fn write_sampler(&self, sampler: Option<&super::Sampler>, dst: CpuDescriptorHandle) {
        let desc = match sampler {
            Some(sampler) => sampler.desc,
            None => default_sampler_desc(),
        };
        unsafe { self.raw.CreateSampler(&desc, map_cpu_handle(dst)) };
    }

    unsafe fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    ) {
        if count == 0 {
            return;
        }
        profiling::scope!("ID3D12Device::CopyDescriptorsSimple");
        unsafe {
            self.raw.CopyDescriptorsSimple(
                count,
                map_cpu_handle(dst),
                map_cpu_handle(src),
                map_heap_type(ty),
            )
        };
    }
}
