/*! Descriptor heap allocation.

A [`DescriptorAllocator`] owns one CPU-only heap where descriptors are
written, and optionally a shader-visible heap of the same size that mirrors
it. Ranges are handed out first-fit from a cursor, and the heaps are
replaced by larger ones (next power of two) when no free run is left.

Growth moves every descriptor to a new native heap, so callers only ever
keep indices. Anything that needs an address derives it again from the
index, after the allocation is done.
!*/

use std::{fmt, sync::Arc};

use bit_set::BitSet;
use parking_lot::Mutex;

use crate::{
    Api, CpuDescriptorHandle, DescriptorError, DescriptorHeapDescriptor, DescriptorHeapType,
    Device as _, GpuDescriptorHandle, HeapStart,
};

/// Contiguous range of descriptors returned by [`DescriptorAllocator::allocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorTable {
    pub base: u32,
    pub count: u32,
}

impl DescriptorTable {
    pub fn end(&self) -> u32 {
        self.base + self.count
    }
}

struct HeapPair<A: Api> {
    /// Owns the slots `start` points at.
    _raw: A::DescriptorHeap,
    start: CpuDescriptorHandle,
    shader_visible: Option<(A::DescriptorHeap, HeapStart)>,
}

struct HeapState<A: Api> {
    heaps: HeapPair<A>,
    capacity: u32,
    /// Set bits are allocated slots.
    occupied: BitSet,
    allocated: u32,
    search_start: u32,
    generation: u64,
}

impl<A: Api> HeapState<A> {
    fn find_free_run(&self, count: u32) -> Option<u32> {
        let mut free_count = 0;
        for index in self.search_start..self.capacity {
            if self.occupied.contains(index as usize) {
                free_count = 0;
            } else {
                free_count += 1;
            }
            if free_count >= count {
                return Some(index + 1 - count);
            }
        }
        None
    }

    fn check_range(&self, base: u32, count: u32) -> Result<(), DescriptorError> {
        match base.checked_add(count) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(DescriptorError::InvalidArgument(
                "descriptor range lies outside of the heap",
            )),
        }
    }
}

pub struct DescriptorAllocator<A: Api> {
    device: Arc<A::Device>,
    ty: DescriptorHeapType,
    handle_size: u32,
    shader_visible: bool,
    state: Mutex<HeapState<A>>,
}

impl<A: Api> DescriptorAllocator<A> {
    /// Creates an allocator with room for `capacity` descriptors.
    ///
    /// `shader_visible` is ignored for heap types that can't be bound to shaders.
    pub fn new(
        device: Arc<A::Device>,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Self, DescriptorError> {
        let shader_visible = shader_visible && ty.supports_shader_visibility();
        let capacity = capacity.max(1);
        let heaps = Self::create_heaps(&device, ty, capacity, shader_visible)?;
        Ok(Self {
            handle_size: device.descriptor_handle_size(ty),
            device,
            ty,
            shader_visible,
            state: Mutex::new(HeapState {
                heaps,
                capacity,
                occupied: BitSet::with_capacity(capacity as usize),
                allocated: 0,
                search_start: 0,
                generation: 0,
            }),
        })
    }

    fn create_heaps(
        device: &A::Device,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<HeapPair<A>, DescriptorError> {
        profiling::scope!("DescriptorAllocator::create_heaps");
        let map_err = |source| {
            log::error!(
                "Unable to create a {:?} descriptor heap of {} descriptors: {}",
                ty,
                capacity,
                source
            );
            DescriptorError::ResourceExhausted {
                ty,
                requested: capacity as u64,
                source,
            }
        };

        let raw = unsafe {
            device.create_descriptor_heap(&DescriptorHeapDescriptor {
                label: Some("staging descriptors"),
                ty,
                capacity,
                shader_visible: false,
            })
        }
        .map_err(map_err)?;
        let start = unsafe { device.descriptor_heap_start(&raw) }.cpu;

        let shader_visible = if shader_visible {
            // `raw` is dropped on failure, which releases it.
            let heap = unsafe {
                device.create_descriptor_heap(&DescriptorHeapDescriptor {
                    label: Some("shader-visible descriptors"),
                    ty,
                    capacity,
                    shader_visible: true,
                })
            }
            .map_err(map_err)?;
            let start = unsafe { device.descriptor_heap_start(&heap) };
            Some((heap, start))
        } else {
            None
        };

        Ok(HeapPair {
            _raw: raw,
            start,
            shader_visible,
        })
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn handle_size(&self) -> u32 {
        self.handle_size
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    pub fn capacity(&self) -> u32 {
        self.state.lock().capacity
    }

    /// Number of descriptors currently handed out.
    pub fn allocated_count(&self) -> u32 {
        self.state.lock().allocated
    }

    /// Incremented every time the heaps are replaced by larger ones.
    ///
    /// Command recording has to bind the shader-visible heap again when this changes.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Allocates `count` contiguous descriptors and returns the index of the first one.
    pub fn allocate(&self, count: u32) -> Result<u32, DescriptorError> {
        if count == 0 {
            return Err(DescriptorError::InvalidArgument(
                "descriptor allocations must not be empty",
            ));
        }

        let mut state = self.state.lock();
        let base = match state.find_free_run(count) {
            Some(base) => base,
            None => {
                let base = state.capacity;
                let required = base.checked_add(count).ok_or(DescriptorError::InvalidArgument(
                    "descriptor heap size overflow",
                ))?;
                self.grow(&mut state, required)?;
                base
            }
        };

        for index in base..base + count {
            state.occupied.insert(index as usize);
        }
        state.allocated += count;
        state.search_start = base + count;
        Ok(base)
    }

    /// Allocates a range and returns it as a [`DescriptorTable`].
    pub fn allocate_table(&self, count: u32) -> Result<DescriptorTable, DescriptorError> {
        let base = self.allocate(count)?;
        Ok(DescriptorTable { base, count })
    }

    /// Returns `base..base + count` to the allocator.
    ///
    /// Every descriptor of the range has to be allocated, otherwise nothing is
    /// released and [`DescriptorError::InvalidState`] is returned.
    pub fn release(&self, base: u32, count: u32) -> Result<(), DescriptorError> {
        if count == 0 {
            return Ok(());
        }

        let mut state = self.state.lock();
        state.check_range(base, count)?;
        if (base..base + count).any(|index| !state.occupied.contains(index as usize)) {
            log::error!(
                "Releasing descriptors {}..{} of the {:?} heap that are not allocated",
                base,
                base + count,
                self.ty
            );
            return Err(DescriptorError::InvalidState {
                ty: self.ty,
                base,
                count,
            });
        }

        for index in base..base + count {
            state.occupied.remove(index as usize);
        }
        state.allocated -= count;
        if base < state.search_start {
            state.search_start = base;
        }
        Ok(())
    }

    pub fn release_table(&self, table: DescriptorTable) -> Result<(), DescriptorError> {
        self.release(table.base, table.count)
    }

    fn grow(&self, state: &mut HeapState<A>, min_required: u32) -> Result<(), DescriptorError> {
        profiling::scope!("DescriptorAllocator::grow");
        let old_capacity = state.capacity;
        let new_capacity =
            min_required
                .checked_next_power_of_two()
                .ok_or(DescriptorError::ResourceExhausted {
                    ty: self.ty,
                    requested: min_required as u64,
                    source: crate::DeviceError::OutOfMemory,
                })?;

        let heaps = Self::create_heaps(&self.device, self.ty, new_capacity, self.shader_visible)?;
        unsafe {
            self.device
                .copy_descriptors(old_capacity, heaps.start, state.heaps.start, self.ty);
            if let Some((_, visible_start)) = heaps.shader_visible {
                // Shader-visible heaps can't be read from, so mirror the new staging heap.
                self.device
                    .copy_descriptors(old_capacity, visible_start.cpu, heaps.start, self.ty);
            }
        }

        state.heaps = heaps;
        state.capacity = new_capacity;
        state.occupied.reserve_len(new_capacity as usize);
        state.generation += 1;
        log::debug!(
            "Grew {:?} descriptor heap from {} to {} descriptors",
            self.ty,
            old_capacity,
            new_capacity
        );
        Ok(())
    }

    /// Copies `index..index + count` from the staging heap into the shader-visible heap.
    ///
    /// Does nothing for allocators without a shader-visible heap.
    pub fn copy_to_shader_visible(&self, index: u32, count: u32) -> Result<(), DescriptorError> {
        let state = self.state.lock();
        state.check_range(index, count)?;
        self.copy_to_shader_visible_locked(&state, index, count);
        Ok(())
    }

    fn copy_to_shader_visible_locked(&self, state: &HeapState<A>, index: u32, count: u32) {
        if count == 0 {
            return;
        }
        if let Some((_, visible_start)) = state.heaps.shader_visible {
            unsafe {
                self.device.copy_descriptors(
                    count,
                    visible_start.cpu.offset(index, self.handle_size),
                    state.heaps.start.offset(index, self.handle_size),
                    self.ty,
                )
            };
        }
    }

    /// Staging heap handle of the descriptor at `index`.
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        let state = self.state.lock();
        debug_assert!(index < state.capacity);
        state.heaps.start.offset(index, self.handle_size)
    }

    /// Shader-visible heap handle of the descriptor at `index`, as seen by the GPU.
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
        let state = self.state.lock();
        debug_assert!(index < state.capacity);
        state
            .heaps
            .shader_visible
            .as_ref()
            .and_then(|&(_, start)| start.gpu)
            .map(|start| start.offset(index, self.handle_size))
    }

    /// Shader-visible heap handle of the descriptor at `index`, as seen by the CPU.
    pub fn shader_visible_cpu_handle(&self, index: u32) -> Option<CpuDescriptorHandle> {
        let state = self.state.lock();
        debug_assert!(index < state.capacity);
        state
            .heaps
            .shader_visible
            .as_ref()
            .map(|&(_, start)| start.cpu.offset(index, self.handle_size))
    }

    /// Runs `fun` with the current shader-visible heap, if there is one.
    pub fn with_shader_visible_heap<R>(
        &self,
        fun: impl FnOnce(&A::DescriptorHeap) -> R,
    ) -> Option<R> {
        let state = self.state.lock();
        state.heaps.shader_visible.as_ref().map(|(heap, _)| fun(heap))
    }

    /// Lets `fun` write the descriptors of `table`, then publishes them to the
    /// shader-visible heap in one copy.
    ///
    /// The allocator stays locked for the duration, so the heaps can't be
    /// replaced while descriptors are being written.
    pub fn write_table<R>(
        &self,
        table: DescriptorTable,
        fun: impl FnOnce(&TableWriter<'_, A>) -> R,
    ) -> Result<R, DescriptorError> {
        let state = self.state.lock();
        state.check_range(table.base, table.count)?;
        let writer = TableWriter {
            device: &*self.device,
            start: state.heaps.start.offset(table.base, self.handle_size),
            handle_size: self.handle_size,
            count: table.count,
        };
        let result = fun(&writer);
        self.copy_to_shader_visible_locked(&state, table.base, table.count);
        Ok(result)
    }
}

impl<A: Api> fmt::Debug for DescriptorAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DescriptorAllocator")
            .field("ty", &self.ty)
            .field("capacity", &state.capacity)
            .field("allocated", &state.allocated)
            .field("search_start", &state.search_start)
            .field("generation", &state.generation)
            .field("shader_visible", &self.shader_visible)
            .finish()
    }
}

/// Access to the staging slots of one descriptor table, handed out by
/// [`DescriptorAllocator::write_table`].
pub struct TableWriter<'a, A: Api> {
    device: &'a A::Device,
    start: CpuDescriptorHandle,
    handle_size: u32,
    count: u32,
}

impl<'a, A: Api> TableWriter<'a, A> {
    pub fn device(&self) -> &'a A::Device {
        self.device
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Staging handle of slot `offset` of the table.
    pub fn handle(&self, offset: u32) -> CpuDescriptorHandle {
        assert!(offset < self.count);
        self.start.offset(offset, self.handle_size)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::DescriptorAllocator;
    use crate::{
        soft::{self, Descriptor},
        DescriptorError, DescriptorHeapType, Device as _, ViewSource,
    };

    fn allocator(capacity: u32) -> (Arc<soft::Device>, DescriptorAllocator<soft::Api>) {
        let device = Arc::new(soft::Device::default());
        let allocator = DescriptorAllocator::new(
            Arc::clone(&device),
            DescriptorHeapType::CbvSrvUav,
            capacity,
            true,
        )
        .unwrap();
        (device, allocator)
    }

    #[test]
    fn allocations_are_contiguous() {
        let (_, alloc) = allocator(16);
        assert_eq!(alloc.allocate(3).unwrap(), 0);
        assert_eq!(alloc.allocate(5).unwrap(), 3);
        assert_eq!(alloc.allocate(1).unwrap(), 8);
        assert_eq!(alloc.allocated_count(), 9);
        assert_eq!(alloc.capacity(), 16);
    }

    #[test]
    fn zero_sized_allocation_is_rejected() {
        let (_, alloc) = allocator(4);
        assert!(matches!(
            alloc.allocate(0),
            Err(DescriptorError::InvalidArgument(_))
        ));
        assert_eq!(alloc.allocated_count(), 0);
    }

    #[test]
    fn exact_fill_does_not_grow() {
        let (_, alloc) = allocator(8);
        assert_eq!(alloc.allocate(5).unwrap(), 0);
        assert_eq!(alloc.allocate(3).unwrap(), 5);
        assert_eq!(alloc.capacity(), 8);
        assert_eq!(alloc.generation(), 0);
    }

    #[test]
    fn first_fit_reuses_released_slot() {
        let (_, alloc) = allocator(4);
        for expected in 0..4 {
            assert_eq!(alloc.allocate(1).unwrap(), expected);
        }
        alloc.release(1, 1).unwrap();
        assert_eq!(alloc.allocate(1).unwrap(), 1);
        assert_eq!(alloc.capacity(), 4);
        assert_eq!(alloc.generation(), 0);
    }

    #[test]
    fn release_rewinds_search_start() {
        let (_, alloc) = allocator(16);
        let a = alloc.allocate(4).unwrap();
        let _b = alloc.allocate(4).unwrap();
        alloc.release(a, 4).unwrap();
        // A smaller request lands in the freed hole, not after `b`.
        assert_eq!(alloc.allocate(2).unwrap(), a);
        assert_eq!(alloc.allocate(2).unwrap(), a + 2);
        assert_eq!(alloc.allocate(1).unwrap(), 8);
    }

    #[test]
    fn release_straddling_the_cursor() {
        let (_, alloc) = allocator(16);
        assert_eq!(alloc.allocate(6).unwrap(), 0);
        // cursor is at 6, the released range covers 4..8 once 6..8 is allocated
        assert_eq!(alloc.allocate(2).unwrap(), 6);
        alloc.release(4, 4).unwrap();
        assert_eq!(alloc.allocate(4).unwrap(), 4);
        assert_eq!(alloc.allocated_count(), 8);
    }

    #[test]
    fn release_of_nothing_is_a_no_op() {
        let (_, alloc) = allocator(4);
        alloc.allocate(2).unwrap();
        alloc.release(3, 0).unwrap();
        alloc.release(100, 0).unwrap();
        assert_eq!(alloc.allocated_count(), 2);
    }

    #[test]
    fn double_release_is_reported() {
        let (_, alloc) = allocator(8);
        let base = alloc.allocate(4).unwrap();
        alloc.release(base, 4).unwrap();
        assert_eq!(
            alloc.release(base, 4),
            Err(DescriptorError::InvalidState {
                ty: DescriptorHeapType::CbvSrvUav,
                base,
                count: 4,
            })
        );
        assert_eq!(alloc.allocated_count(), 0);
    }

    #[test]
    fn partial_double_release_leaves_bitmap_untouched() {
        let (_, alloc) = allocator(8);
        alloc.allocate(2).unwrap();
        alloc.allocate(2).unwrap();
        alloc.release(2, 2).unwrap();
        // 0..2 is held, 2..4 is not: nothing must be released.
        assert!(alloc.release(0, 4).is_err());
        assert_eq!(alloc.allocated_count(), 2);
        alloc.release(0, 2).unwrap();
        assert_eq!(alloc.allocated_count(), 0);
    }

    #[test]
    fn release_outside_of_heap_is_rejected() {
        let (_, alloc) = allocator(4);
        assert!(matches!(
            alloc.release(3, 2),
            Err(DescriptorError::InvalidArgument(_))
        ));
        assert!(matches!(
            alloc.release(u32::MAX, 2),
            Err(DescriptorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn growth_doubles_and_allocates_at_the_end() {
        let (_, alloc) = allocator(4);
        assert_eq!(alloc.allocate(3).unwrap(), 0);
        // One free slot remains, but a run of two needs the heap to grow.
        assert_eq!(alloc.allocate(2).unwrap(), 4);
        assert_eq!(alloc.capacity(), 8);
        assert_eq!(alloc.generation(), 1);
        assert_eq!(alloc.allocated_count(), 5);
    }

    #[test]
    fn oversized_request_grows_to_next_power_of_two() {
        let (_, alloc) = allocator(4);
        assert_eq!(alloc.allocate(13).unwrap(), 4);
        assert_eq!(alloc.capacity(), 32);
    }

    #[test]
    fn growth_preserves_descriptors() {
        let (device, alloc) = allocator(2);
        let base = alloc.allocate(2).unwrap();
        let table = super::DescriptorTable { base, count: 2 };
        alloc
            .write_table(table, |writer| unsafe {
                writer
                    .device()
                    .write_constant_buffer_view(None, writer.handle(0));
                writer
                    .device()
                    .write_shader_resource_view(ViewSource::Null, writer.handle(1));
            })
            .unwrap();

        let before = [
            device.read_descriptor(alloc.cpu_handle(0)),
            device.read_descriptor(alloc.cpu_handle(1)),
        ];
        alloc.allocate(5).unwrap();
        assert_eq!(alloc.capacity(), 8);

        for (index, descriptor) in before.iter().enumerate() {
            let index = index as u32;
            assert_eq!(&device.read_descriptor(alloc.cpu_handle(index)), descriptor);
            let visible = alloc.shader_visible_cpu_handle(index).unwrap();
            assert_eq!(&device.read_descriptor(visible), descriptor);
        }
        assert_eq!(before[0], Some(Descriptor::NullConstantBuffer));
    }

    #[test]
    fn failed_growth_keeps_the_old_heap() {
        let device = Arc::new(soft::Device::new(soft::DeviceDescriptor {
            max_descriptors_per_heap: 8,
            ..Default::default()
        }));
        let alloc = DescriptorAllocator::<soft::Api>::new(
            Arc::clone(&device),
            DescriptorHeapType::CbvSrvUav,
            8,
            true,
        )
        .unwrap();
        assert_eq!(alloc.allocate(6).unwrap(), 0);
        let handle = alloc.cpu_handle(0);

        match alloc.allocate(4) {
            Err(DescriptorError::ResourceExhausted { requested, .. }) => {
                assert_eq!(requested, 16)
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(alloc.capacity(), 8);
        assert_eq!(alloc.cpu_handle(0), handle);
        assert_eq!(alloc.allocated_count(), 6);
        // Still usable for requests that fit.
        assert_eq!(alloc.allocate(2).unwrap(), 6);
    }

    #[test]
    fn shader_visible_sampler_heap_limit() {
        let device = Arc::new(soft::Device::default());
        let alloc = DescriptorAllocator::<soft::Api>::new(
            Arc::clone(&device),
            DescriptorHeapType::Sampler,
            2048,
            true,
        )
        .unwrap();
        alloc.allocate(2048).unwrap();
        assert!(matches!(
            alloc.allocate(1),
            Err(DescriptorError::ResourceExhausted { .. })
        ));
        assert_eq!(alloc.capacity(), 2048);
    }

    #[test]
    fn handles_follow_the_stride() {
        let (device, alloc) = allocator(8);
        let stride = device.descriptor_handle_size(DescriptorHeapType::CbvSrvUav);
        assert_eq!(alloc.handle_size(), stride);
        let h0 = alloc.cpu_handle(0);
        let h5 = alloc.cpu_handle(5);
        assert_eq!(h5.ptr - h0.ptr, 5 * stride as usize);
        let g0 = alloc.gpu_handle(0).unwrap();
        let g5 = alloc.gpu_handle(5).unwrap();
        assert_eq!(g5.ptr - g0.ptr, 5 * stride as u64);
    }

    #[test]
    fn cpu_only_heaps_have_no_gpu_handles() {
        let device = Arc::new(soft::Device::default());
        let alloc = DescriptorAllocator::<soft::Api>::new(
            device,
            DescriptorHeapType::RenderTarget,
            4,
            true,
        )
        .unwrap();
        assert!(!alloc.is_shader_visible());
        assert_eq!(alloc.gpu_handle(0), None);
        assert!(alloc.with_shader_visible_heap(|_| ()).is_none());
        // Copying is a no-op without a mirror.
        alloc.copy_to_shader_visible(0, 4).unwrap();
    }

    #[test]
    fn copy_to_shader_visible_mirrors_the_range() {
        let (device, alloc) = allocator(4);
        let base = alloc.allocate(2).unwrap();
        unsafe {
            device.write_shader_resource_view(ViewSource::Null, alloc.cpu_handle(base));
            device.write_constant_buffer_view(None, alloc.cpu_handle(base + 1));
        }
        let visible = alloc.shader_visible_cpu_handle(base).unwrap();
        assert_eq!(device.read_descriptor(visible), Some(Descriptor::Uninitialized));

        alloc.copy_to_shader_visible(base, 2).unwrap();
        assert_eq!(
            device.read_descriptor(visible),
            Some(Descriptor::NullShaderResource)
        );
        assert!(alloc.copy_to_shader_visible(3, 2).is_err());
    }

    #[test]
    fn growth_replaces_native_heaps() {
        let (device, alloc) = allocator(1);
        assert_eq!(device.live_heap_count(), 2);
        alloc.allocate(1).unwrap();
        alloc.allocate(1).unwrap();
        assert_eq!(alloc.generation(), 1);
        // The old pair has been released.
        assert_eq!(device.live_heap_count(), 2);
        drop(alloc);
        assert_eq!(device.live_heap_count(), 0);
    }
}
