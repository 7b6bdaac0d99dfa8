/*!
# In-memory backend

Heaps are plain vectors of [`Descriptor`] values living at fake addresses, so
every descriptor write and copy can be inspected afterwards with
[`Device::read_descriptor`]. Used for testing, and as a reference for what a
native backend is expected to do.

Heap creation limits can be lowered through [`DeviceDescriptor`] to simulate
a device running out of descriptor memory.
!*/

mod device;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Device = Device;

    type DescriptorHeap = DescriptorHeap;
    type Buffer = Buffer;
    type TextureView = TextureView;
    type Sampler = Sampler;
}

/// Identity of a resource created by a [`Device`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

/// What a shader resource or unordered access descriptor points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewTarget {
    Buffer {
        buffer: ResourceId,
        offset: bt::BufferAddress,
        size: bt::BufferAddress,
    },
    Texture(ResourceId),
}

/// Content of one heap slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Descriptor {
    /// Never written.
    Uninitialized,
    ConstantBuffer(crate::ConstantBufferView),
    NullConstantBuffer,
    ShaderResource(ViewTarget),
    NullShaderResource,
    UnorderedAccess(ViewTarget),
    NullUnorderedAccess,
    Sampler(ResourceId),
    DefaultSampler,
}

impl Descriptor {
    pub fn is_null(&self) -> bool {
        match *self {
            Self::NullConstantBuffer
            | Self::NullShaderResource
            | Self::NullUnorderedAccess
            | Self::DefaultSampler => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    /// Heap creation fails above this number of descriptors.
    pub max_descriptors_per_heap: u32,
    /// Same, for shader-visible sampler heaps.
    pub max_shader_visible_samplers: u32,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            max_descriptors_per_heap: 1_000_000,
            max_shader_visible_samplers: 2048,
        }
    }
}

#[derive(Debug)]
struct HeapStorage {
    ty: crate::DescriptorHeapType,
    shader_visible: bool,
    slots: Vec<Descriptor>,
}

/// Live heaps, keyed by the CPU address of their first slot.
type HeapRegistry = BTreeMap<usize, Weak<Mutex<HeapStorage>>>;

pub struct Device {
    desc: DeviceDescriptor,
    heaps: Mutex<HeapRegistry>,
    next_heap_address: AtomicUsize,
    next_resource_id: AtomicU64,
    next_gpu_address: AtomicU64,
}

#[derive(Debug)]
pub struct DescriptorHeap {
    storage: Arc<Mutex<HeapStorage>>,
    start: crate::HeapStart,
}

impl DescriptorHeap {
    pub fn len(&self) -> usize {
        self.storage.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    gpu_address: bt::BufferAddress,
    size: bt::BufferAddress,
}

impl Buffer {
    pub fn id(&self) -> ResourceId {
        self.id
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

#[derive(Debug)]
pub struct TextureView {
    id: ResourceId,
    dimension: bt::TextureViewDimension,
}

impl TextureView {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn dimension(&self) -> bt::TextureViewDimension {
        self.dimension
    }
}

#[derive(Debug)]
pub struct Sampler {
    id: ResourceId,
}

impl Sampler {
    pub fn id(&self) -> ResourceId {
        self.id
    }
}
