use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use super::{
    Api, Buffer, DescriptorHeap, Descriptor, DeviceDescriptor, HeapStorage, ResourceId, Sampler,
    TextureView, ViewTarget,
};
use crate::{
    CpuDescriptorHandle, DescriptorHeapType, Device as _, DeviceError, GpuDescriptorHandle,
    HeapStart, ViewSource,
};

type DeviceResult<T> = Result<T, DeviceError>;

const HEAP_ADDRESS_BASE: usize = 0x10_0000;
const HEAP_ADDRESS_ALIGNMENT: usize = 0x1_0000;
const GPU_HEAP_ADDRESS_BIT: u64 = 1 << 40;
const BUFFER_PLACEMENT_ALIGNMENT: u64 = 0x1_0000;

impl Default for super::Device {
    fn default() -> Self {
        Self::new(DeviceDescriptor::default())
    }
}

impl super::Device {
    pub fn new(desc: DeviceDescriptor) -> Self {
        Self {
            desc,
            heaps: Mutex::new(Default::default()),
            next_heap_address: AtomicUsize::new(HEAP_ADDRESS_BASE),
            next_resource_id: AtomicU64::new(1),
            next_gpu_address: AtomicU64::new(BUFFER_PLACEMENT_ALIGNMENT),
        }
    }

    fn next_id(&self) -> ResourceId {
        ResourceId(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn create_buffer(&self, size: bt::BufferAddress) -> Buffer {
        let placement = bt::math::align_to(size.max(1), BUFFER_PLACEMENT_ALIGNMENT);
        Buffer {
            id: self.next_id(),
            gpu_address: self
                .next_gpu_address
                .fetch_add(placement, Ordering::Relaxed),
            size,
        }
    }

    pub fn create_texture_view(&self, dimension: bt::TextureViewDimension) -> TextureView {
        TextureView {
            id: self.next_id(),
            dimension,
        }
    }

    pub fn create_sampler(&self) -> Sampler {
        Sampler { id: self.next_id() }
    }

    /// Number of descriptor heaps that haven't been dropped yet.
    pub fn live_heap_count(&self) -> usize {
        self.heaps
            .lock()
            .values()
            .filter(|storage| storage.strong_count() != 0)
            .count()
    }

    /// Returns the content of the slot at `handle`, or `None` if the handle
    /// doesn't point into a live heap.
    pub fn read_descriptor(&self, handle: CpuDescriptorHandle) -> Option<Descriptor> {
        let (storage, index) = self.locate(handle)?;
        let descriptor = storage.lock().slots[index];
        Some(descriptor)
    }

    fn locate(&self, handle: CpuDescriptorHandle) -> Option<(Arc<Mutex<HeapStorage>>, usize)> {
        let (base, storage) = {
            let heaps = self.heaps.lock();
            let (&base, storage) = heaps.range(..=handle.ptr).next_back()?;
            (base, storage.upgrade()?)
        };
        let (stride, len) = {
            let guard = storage.lock();
            (
                self.descriptor_handle_size(guard.ty) as usize,
                guard.slots.len(),
            )
        };
        let distance = handle.ptr - base;
        if distance % stride != 0 || distance / stride >= len {
            return None;
        }
        Some((storage, distance / stride))
    }

    fn write(&self, dst: CpuDescriptorHandle, descriptor: Descriptor) {
        match self.locate(dst) {
            Some((storage, index)) => {
                storage.lock().slots[index] = descriptor;
            }
            None => log::error!("Writing {:?} to an invalid handle {:?}", descriptor, dst),
        }
    }
}

impl crate::Device<Api> for super::Device {
    unsafe fn create_descriptor_heap(
        &self,
        desc: &crate::DescriptorHeapDescriptor,
    ) -> DeviceResult<DescriptorHeap> {
        let limit = match desc.ty {
            DescriptorHeapType::Sampler if desc.shader_visible => {
                self.desc.max_shader_visible_samplers
            }
            _ => self.desc.max_descriptors_per_heap,
        };
        if desc.capacity > limit {
            return Err(DeviceError::OutOfMemory);
        }

        let stride = self.descriptor_handle_size(desc.ty) as usize;
        let footprint = bt::math::align_to(
            desc.capacity as usize * stride + HEAP_ADDRESS_ALIGNMENT,
            HEAP_ADDRESS_ALIGNMENT,
        );
        let base = self
            .next_heap_address
            .fetch_add(footprint, Ordering::Relaxed);

        let storage = Arc::new(Mutex::new(HeapStorage {
            ty: desc.ty,
            shader_visible: desc.shader_visible,
            slots: vec![Descriptor::Uninitialized; desc.capacity as usize],
        }));
        {
            let mut heaps = self.heaps.lock();
            heaps.retain(|_, storage| storage.strong_count() != 0);
            heaps.insert(base, Arc::downgrade(&storage));
        }
        log::trace!("Created {:?} heap at {:#x}", desc.label, base);

        Ok(DescriptorHeap {
            storage,
            start: HeapStart {
                cpu: CpuDescriptorHandle { ptr: base },
                gpu: desc.shader_visible.then(|| GpuDescriptorHandle {
                    ptr: GPU_HEAP_ADDRESS_BIT | base as u64,
                }),
            },
        })
    }

    unsafe fn descriptor_heap_start(&self, heap: &DescriptorHeap) -> HeapStart {
        heap.start
    }

    fn descriptor_handle_size(&self, ty: DescriptorHeapType) -> u32 {
        match ty {
            DescriptorHeapType::CbvSrvUav => 32,
            DescriptorHeapType::Sampler => 16,
            DescriptorHeapType::RenderTarget => 32,
            DescriptorHeapType::DepthStencil => 8,
        }
    }

    unsafe fn write_constant_buffer_view(
        &self,
        view: Option<&crate::ConstantBufferView>,
        dst: CpuDescriptorHandle,
    ) {
        self.write(
            dst,
            match view {
                Some(view) => Descriptor::ConstantBuffer(*view),
                None => Descriptor::NullConstantBuffer,
            },
        );
    }

    unsafe fn write_shader_resource_view(
        &self,
        source: ViewSource<'_, Api>,
        dst: CpuDescriptorHandle,
    ) {
        self.write(
            dst,
            match map_view_source(source) {
                Some(target) => Descriptor::ShaderResource(target),
                None => Descriptor::NullShaderResource,
            },
        );
    }

    unsafe fn write_unordered_access_view(
        &self,
        source: ViewSource<'_, Api>,
        dst: CpuDescriptorHandle,
    ) {
        self.write(
            dst,
            match map_view_source(source) {
                Some(target) => Descriptor::UnorderedAccess(target),
                None => Descriptor::NullUnorderedAccess,
            },
        );
    }

    unsafe fn write_sampler(&self, sampler: Option<&Sampler>, dst: CpuDescriptorHandle) {
        self.write(
            dst,
            match sampler {
                Some(sampler) => Descriptor::Sampler(sampler.id),
                None => Descriptor::DefaultSampler,
            },
        );
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
        let count = count as usize;

        // The source is read out before the destination is locked, they may be the same heap.
        let descriptors = match self.locate(src) {
            Some((storage, index)) => {
                let storage = storage.lock();
                debug_assert_eq!(storage.ty, ty);
                debug_assert!(!storage.shader_visible, "copying out of a shader-visible heap");
                match storage.slots.get(index..index + count) {
                    Some(slots) => slots.to_vec(),
                    None => {
                        log::error!("Copy source {:?} overruns its heap", src);
                        return;
                    }
                }
            }
            None => {
                log::error!("Invalid copy source {:?}", src);
                return;
            }
        };

        match self.locate(dst) {
            Some((storage, index)) => {
                let mut storage = storage.lock();
                debug_assert_eq!(storage.ty, ty);
                match storage.slots.get_mut(index..index + count) {
                    Some(slots) => slots.copy_from_slice(&descriptors),
                    None => log::error!("Copy destination {:?} overruns its heap", dst),
                }
            }
            None => log::error!("Invalid copy destination {:?}", dst),
        }
    }
}

fn map_view_source(source: ViewSource<'_, Api>) -> Option<ViewTarget> {
    match source {
        ViewSource::Null => None,
        ViewSource::Buffer {
            buffer,
            offset,
            size,
        } => Some(ViewTarget::Buffer {
            buffer: buffer.id,
            offset,
            size,
        }),
        ViewSource::TextureView(view) => Some(ViewTarget::Texture(view.id)),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        soft::{DescriptorHeap, Descriptor, Device},
        CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorHeapType, Device as _,
        HeapStart, ViewSource,
    };

    fn create_heap(
        device: &Device,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<(DescriptorHeap, HeapStart), crate::DeviceError> {
        let heap = unsafe {
            device.create_descriptor_heap(&DescriptorHeapDescriptor {
                label: None,
                ty,
                capacity,
                shader_visible,
            })
        }?;
        let start = unsafe { device.descriptor_heap_start(&heap) };
        Ok((heap, start))
    }

    #[test]
    fn heaps_do_not_overlap() {
        let device = Device::default();
        let (_a, a_start) = create_heap(&device, DescriptorHeapType::CbvSrvUav, 4, false).unwrap();
        let (_b, b_start) = create_heap(&device, DescriptorHeapType::CbvSrvUav, 4, false).unwrap();
        let (a_start, b_start) = (a_start.cpu, b_start.cpu);
        assert!(b_start.ptr >= a_start.ptr + 4 * 32);

        unsafe { device.write_constant_buffer_view(None, a_start.offset(3, 32)) };
        assert_eq!(
            device.read_descriptor(a_start.offset(3, 32)),
            Some(Descriptor::NullConstantBuffer)
        );
        assert_eq!(
            device.read_descriptor(b_start),
            Some(Descriptor::Uninitialized)
        );
        // Past the end, and not on a slot boundary.
        assert_eq!(device.read_descriptor(a_start.offset(4, 32)), None);
        assert_eq!(
            device.read_descriptor(CpuDescriptorHandle {
                ptr: a_start.ptr + 1
            }),
            None
        );
    }

    #[test]
    fn dropped_heaps_are_unregistered() {
        let device = Device::default();
        let (heap, start) = create_heap(&device, DescriptorHeapType::Sampler, 2, true).unwrap();
        assert!(start.gpu.is_some());
        assert_eq!(device.live_heap_count(), 1);
        drop(heap);
        assert_eq!(device.live_heap_count(), 0);
        assert_eq!(device.read_descriptor(start.cpu), None);
    }

    #[test]
    fn copy_between_heaps() {
        let device = Device::default();
        let ty = DescriptorHeapType::CbvSrvUav;
        let (_src, src_start) = create_heap(&device, ty, 4, false).unwrap();
        let (_dst, dst_start) = create_heap(&device, ty, 4, true).unwrap();
        let (src_start, dst_start) = (src_start.cpu, dst_start.cpu);
        let view = device.create_texture_view(bt::TextureViewDimension::D2);
        unsafe {
            device.write_shader_resource_view(ViewSource::TextureView(&view), src_start);
            device.write_unordered_access_view(ViewSource::Null, src_start.offset(1, 32));
            device.copy_descriptors(2, dst_start.offset(2, 32), src_start, ty);
        }
        assert_eq!(
            device.read_descriptor(dst_start.offset(2, 32)),
            device.read_descriptor(src_start)
        );
        assert_eq!(
            device.read_descriptor(dst_start.offset(3, 32)),
            Some(Descriptor::NullUnorderedAccess)
        );
        assert_eq!(
            device.read_descriptor(dst_start),
            Some(Descriptor::Uninitialized)
        );
    }

    #[test]
    fn heap_limits() {
        let device = Device::default();
        assert!(create_heap(&device, DescriptorHeapType::Sampler, 4096, true).is_err());
        let staging = create_heap(&device, DescriptorHeapType::Sampler, 4096, false);
        assert!(staging.is_ok());
        assert_eq!(device.live_heap_count(), 1);
    }
}
