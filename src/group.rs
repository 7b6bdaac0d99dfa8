use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{
    layout::{BindGroupLayout, RangeKind},
    Api, Buffer as _, ConstantBufferView, DescriptorAllocator, DescriptorError, DescriptorTable,
    Device as _, GpuDescriptorHandle, Label, TableWriter, ViewSource,
};

#[derive(Debug)]
pub struct BufferBinding<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub offset: bt::BufferAddress,
    /// Binds the rest of the buffer after `offset` if `None`.
    pub size: Option<bt::BufferSize>,
}

impl<A: Api> BufferBinding<'_, A> {
    /// Size of the bound range, in bytes.
    pub fn resolve_size(&self) -> bt::BufferAddress {
        match self.size {
            Some(size) => size.get(),
            None => self.buffer.size().saturating_sub(self.offset),
        }
    }

    fn resolve_address(&self) -> bt::BufferAddress {
        self.buffer.gpu_address() + self.offset
    }
}

#[derive(Debug)]
pub enum BindingResource<'a, A: Api> {
    Buffer(BufferBinding<'a, A>),
    TextureView(&'a A::TextureView),
    Sampler(&'a A::Sampler),
}

impl<A: Api> BindingResource<'_, A> {
    fn class_name(&self) -> &'static str {
        match *self {
            Self::Buffer(_) => "buffer",
            Self::TextureView(_) => "texture view",
            Self::Sampler(_) => "sampler",
        }
    }
}

#[derive(Debug)]
pub struct BindGroupEntry<'a, A: Api> {
    pub binding: u32,
    pub resource: BindingResource<'a, A>,
}

#[derive(Debug)]
pub struct BindGroupDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub layout: &'a Arc<BindGroupLayout>,
    /// Bindings of the layout that have no entry here get a null descriptor.
    pub entries: &'a [BindGroupEntry<'a, A>],
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum BindGroupError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("binding {0} is not declared in the bind group layout")]
    MissingBindingDeclaration(u32),
    #[error("binding {binding} is declared as {expected:?}, but a {actual} was provided")]
    BindingTypeMismatch {
        binding: u32,
        expected: bt::BindingType,
        actual: &'static str,
    },
    #[error("a {0} range can't be filled with this kind of null descriptor")]
    InvalidArgument(RangeKind),
    #[error("buffer offset {offset} of binding {binding} does not respect the {alignment} bytes alignment")]
    UnalignedBufferOffset {
        binding: u32,
        offset: bt::BufferAddress,
        alignment: bt::BufferAddress,
    },
    #[error("buffer size {size} of binding {binding} is not a multiple of {alignment} bytes")]
    UnalignedBufferSize {
        binding: u32,
        size: bt::BufferAddress,
        alignment: bt::BufferAddress,
    },
    #[error("binding {binding} is {size} bytes long, more than the limit of {limit}")]
    BufferRangeTooLarge {
        binding: u32,
        size: bt::BufferAddress,
        limit: bt::BufferAddress,
    },
    #[error("binding {binding} range of {size} bytes at offset {offset} is out of bounds of a buffer of size {buffer_size}")]
    BufferRangeOutOfBounds {
        binding: u32,
        offset: bt::BufferAddress,
        size: bt::BufferAddress,
        buffer_size: bt::BufferAddress,
    },
    #[error("binding {binding} is {actual} bytes long, the layout requires at least {min}")]
    BindingSizeTooSmall {
        binding: u32,
        actual: bt::BufferAddress,
        min: bt::BufferAddress,
    },
}

/// Resources bound to a [`BindGroupLayout`], written into descriptor tables.
///
/// The tables go back to their allocators when the group is dropped.
pub struct BindGroup<A: Api> {
    label: Option<String>,
    layout: Arc<BindGroupLayout>,
    views: Arc<DescriptorAllocator<A>>,
    samplers: Arc<DescriptorAllocator<A>>,
    view_table: Option<DescriptorTable>,
    sampler_table: Option<DescriptorTable>,
}

impl<A: Api> BindGroup<A> {
    /// Allocates the descriptor tables of `desc.layout` and fills every slot.
    ///
    /// All entries are validated before anything is allocated.
    pub fn new(
        views: &Arc<DescriptorAllocator<A>>,
        samplers: &Arc<DescriptorAllocator<A>>,
        desc: &BindGroupDescriptor<A>,
    ) -> Result<Self, BindGroupError> {
        debug_assert_eq!(views.ty(), crate::DescriptorHeapType::CbvSrvUav);
        debug_assert_eq!(samplers.ty(), crate::DescriptorHeapType::Sampler);
        validate_entries(desc.layout, desc.entries)?;

        let mut group = Self {
            label: desc.label.map(str::to_string),
            layout: Arc::clone(desc.layout),
            views: Arc::clone(views),
            samplers: Arc::clone(samplers),
            view_table: None,
            sampler_table: None,
        };
        group.materialize(desc.entries)?;
        Ok(group)
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn layout(&self) -> &Arc<BindGroupLayout> {
        &self.layout
    }

    pub fn view_table(&self) -> Option<DescriptorTable> {
        self.view_table
    }

    pub fn sampler_table(&self) -> Option<DescriptorTable> {
        self.sampler_table
    }

    /// Start of the view table in the shader-visible heap.
    ///
    /// Has to be queried again after the view heap grows.
    pub fn view_gpu_handle(&self) -> Option<GpuDescriptorHandle> {
        self.view_table
            .and_then(|table| self.views.gpu_handle(table.base))
    }

    pub fn sampler_gpu_handle(&self) -> Option<GpuDescriptorHandle> {
        self.sampler_table
            .and_then(|table| self.samplers.gpu_handle(table.base))
    }

    /// Rebinds the whole group to `entries`.
    ///
    /// Bindings missing from `entries` are reset to null descriptors. The
    /// previous tables are released before the new ones are allocated, so on
    /// an allocation failure the group is left without tables.
    pub fn update(&mut self, entries: &[BindGroupEntry<A>]) -> Result<(), BindGroupError> {
        validate_entries(&self.layout, entries)?;
        self.release_tables()?;
        self.materialize(entries)
    }

    /// Releases the descriptor tables, reporting errors that `Drop` can only log.
    pub fn destroy(mut self) -> Result<(), DescriptorError> {
        self.release_tables()
    }

    fn release_tables(&mut self) -> Result<(), DescriptorError> {
        let view_result = match self.view_table.take() {
            Some(table) => self.views.release_table(table),
            None => Ok(()),
        };
        let sampler_result = match self.sampler_table.take() {
            Some(table) => self.samplers.release_table(table),
            None => Ok(()),
        };
        view_result.and(sampler_result)
    }

    fn materialize(&mut self, entries: &[BindGroupEntry<A>]) -> Result<(), BindGroupError> {
        profiling::scope!("BindGroup::materialize");
        let layout = Arc::clone(&self.layout);

        let view_table = match layout.view_table_size() {
            0 => None,
            size => Some(fill_table(&self.views, size, |writer| {
                write_views(writer, &layout, entries)
            })?),
        };

        let sampler_table = match layout.sampler_table_size() {
            0 => None,
            size => match fill_table(&self.samplers, size, |writer| {
                write_samplers(writer, &layout, entries)
            }) {
                Ok(table) => Some(table),
                Err(err) => {
                    if let Some(table) = view_table {
                        if let Err(release_err) = self.views.release_table(table) {
                            log::error!("Unable to roll back the view table: {}", release_err);
                        }
                    }
                    return Err(err);
                }
            },
        };

        log::trace!(
            "Bind group {:?}: view table {:?}, sampler table {:?}",
            self.label,
            view_table,
            sampler_table
        );
        self.view_table = view_table;
        self.sampler_table = sampler_table;
        Ok(())
    }
}

impl<A: Api> Drop for BindGroup<A> {
    fn drop(&mut self) {
        if let Err(err) = self.release_tables() {
            log::error!(
                "Bind group {:?} failed to release its descriptors: {}",
                self.label,
                err
            );
        }
    }
}

impl<A: Api> fmt::Debug for BindGroup<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindGroup")
            .field("label", &self.label)
            .field("view_table", &self.view_table)
            .field("sampler_table", &self.sampler_table)
            .finish()
    }
}

fn validate_entries<A: Api>(
    layout: &BindGroupLayout,
    entries: &[BindGroupEntry<A>],
) -> Result<(), BindGroupError> {
    for entry in entries {
        let decl = match layout.entry(entry.binding) {
            Some(decl) => decl,
            None => {
                log::error!(
                    "Binding {} is not part of layout {:?}",
                    entry.binding,
                    layout.label()
                );
                return Err(BindGroupError::MissingBindingDeclaration(entry.binding));
            }
        };
        let mismatch = || BindGroupError::BindingTypeMismatch {
            binding: entry.binding,
            expected: decl.ty,
            actual: entry.resource.class_name(),
        };

        match entry.resource {
            BindingResource::Buffer(ref binding) => match decl.ty {
                bt::BindingType::Buffer {
                    ty,
                    min_binding_size,
                } => validate_buffer(entry.binding, binding, ty, min_binding_size)?,
                _ => return Err(mismatch()),
            },
            BindingResource::TextureView(_) => match decl.ty {
                bt::BindingType::Texture { .. } | bt::BindingType::StorageTexture { .. } => {}
                _ => return Err(mismatch()),
            },
            BindingResource::Sampler(_) => {
                if !decl.ty.is_sampler() {
                    return Err(mismatch());
                }
            }
        }
    }
    Ok(())
}

fn validate_buffer<A: Api>(
    binding: u32,
    buffer_binding: &BufferBinding<A>,
    ty: bt::BufferBindingType,
    min_binding_size: Option<bt::BufferSize>,
) -> Result<(), BindGroupError> {
    let alignment = match ty {
        bt::BufferBindingType::Uniform => bt::CONSTANT_BUFFER_ALIGNMENT,
        bt::BufferBindingType::Storage { .. } => bt::RAW_BUFFER_ELEMENT_SIZE,
    };
    let offset = buffer_binding.offset;
    if !bt::math::is_aligned(offset, alignment) {
        return Err(BindGroupError::UnalignedBufferOffset {
            binding,
            offset,
            alignment,
        });
    }

    let buffer_size = buffer_binding.buffer.size();
    let size = buffer_binding.resolve_size();
    let in_bounds = size != 0
        && offset
            .checked_add(size)
            .map_or(false, |end| end <= buffer_size);
    if !in_bounds {
        return Err(BindGroupError::BufferRangeOutOfBounds {
            binding,
            offset,
            size,
            buffer_size,
        });
    }

    if let Some(min) = min_binding_size {
        if size < min.get() {
            return Err(BindGroupError::BindingSizeTooSmall {
                binding,
                actual: size,
                min: min.get(),
            });
        }
    }

    match ty {
        bt::BufferBindingType::Uniform => {
            let view_size = bt::math::align_to(size, bt::CONSTANT_BUFFER_ALIGNMENT);
            if view_size > bt::MAX_CONSTANT_BUFFER_SIZE {
                return Err(BindGroupError::BufferRangeTooLarge {
                    binding,
                    size,
                    limit: bt::MAX_CONSTANT_BUFFER_SIZE,
                });
            }
        }
        // Raw views address whole elements.
        bt::BufferBindingType::Storage { .. } => {
            if !bt::math::is_aligned(size, bt::RAW_BUFFER_ELEMENT_SIZE) {
                return Err(BindGroupError::UnalignedBufferSize {
                    binding,
                    size,
                    alignment: bt::RAW_BUFFER_ELEMENT_SIZE,
                });
            }
        }
    }
    Ok(())
}

/// Allocates a table of `size` slots and fills it, releasing it again if `fill` fails.
fn fill_table<A: Api>(
    allocator: &DescriptorAllocator<A>,
    size: u32,
    fill: impl FnOnce(&TableWriter<'_, A>) -> Result<(), BindGroupError>,
) -> Result<DescriptorTable, BindGroupError> {
    let table = allocator.allocate_table(size)?;
    let result = match allocator.write_table(table, fill) {
        Ok(inner) => inner,
        Err(err) => Err(err.into()),
    };
    match result {
        Ok(()) => Ok(table),
        Err(err) => {
            if let Err(release_err) = allocator.release_table(table) {
                log::error!("Unable to release table {:?}: {}", table, release_err);
            }
            Err(err)
        }
    }
}

fn find_resource<'e, 'a, A: Api>(
    entries: &'e [BindGroupEntry<'a, A>],
    binding: u32,
) -> Option<&'e BindingResource<'a, A>> {
    entries
        .iter()
        .find(|entry| entry.binding == binding)
        .map(|entry| &entry.resource)
}

fn write_views<A: Api>(
    writer: &TableWriter<'_, A>,
    layout: &BindGroupLayout,
    entries: &[BindGroupEntry<A>],
) -> Result<(), BindGroupError> {
    let device = writer.device();
    for range in layout.view_ranges() {
        for (slot, binding) in (range.table_offset..).zip(range.bindings()) {
            let handle = writer.handle(slot);
            let resource = find_resource(entries, binding);
            match (range.kind, resource) {
                (RangeKind::Cbv, Some(&BindingResource::Buffer(ref buffer_binding))) => {
                    let size = bt::math::align_to(
                        buffer_binding.resolve_size(),
                        bt::CONSTANT_BUFFER_ALIGNMENT,
                    );
                    let view = ConstantBufferView {
                        buffer_location: buffer_binding.resolve_address(),
                        size_in_bytes: u32::try_from(size).map_err(|_| {
                            BindGroupError::BufferRangeOutOfBounds {
                                binding,
                                offset: buffer_binding.offset,
                                size,
                                buffer_size: buffer_binding.buffer.size(),
                            }
                        })?,
                    };
                    unsafe { device.write_constant_buffer_view(Some(&view), handle) };
                }
                (RangeKind::Cbv, None) => unsafe {
                    device.write_constant_buffer_view(None, handle)
                },
                (RangeKind::Srv, Some(resource)) => {
                    let source = view_source(binding, resource)?;
                    unsafe { device.write_shader_resource_view(source, handle) };
                }
                (RangeKind::Srv, None) => unsafe {
                    device.write_shader_resource_view(ViewSource::Null, handle)
                },
                (RangeKind::Uav, Some(resource)) => {
                    let source = view_source(binding, resource)?;
                    unsafe { device.write_unordered_access_view(source, handle) };
                }
                (RangeKind::Uav, None) => unsafe {
                    device.write_unordered_access_view(ViewSource::Null, handle)
                },
                (RangeKind::Sampler, _) => {
                    return Err(BindGroupError::InvalidArgument(RangeKind::Sampler))
                }
                (RangeKind::Cbv, Some(resource)) => {
                    return Err(type_mismatch(layout, binding, resource))
                }
            }
        }
    }
    Ok(())
}

fn write_samplers<A: Api>(
    writer: &TableWriter<'_, A>,
    layout: &BindGroupLayout,
    entries: &[BindGroupEntry<A>],
) -> Result<(), BindGroupError> {
    let device = writer.device();
    for range in layout.sampler_ranges() {
        if range.kind != RangeKind::Sampler {
            return Err(BindGroupError::InvalidArgument(range.kind));
        }
        for (slot, binding) in (range.table_offset..).zip(range.bindings()) {
            let sampler = match find_resource(entries, binding) {
                Some(&BindingResource::Sampler(sampler)) => Some(sampler),
                Some(resource) => return Err(type_mismatch(layout, binding, resource)),
                None => None,
            };
            unsafe { device.write_sampler(sampler, writer.handle(slot)) };
        }
    }
    Ok(())
}

fn view_source<'a, A: Api>(
    binding: u32,
    resource: &BindingResource<'a, A>,
) -> Result<ViewSource<'a, A>, BindGroupError> {
    match *resource {
        BindingResource::Buffer(ref buffer_binding) => Ok(ViewSource::Buffer {
            buffer: buffer_binding.buffer,
            offset: buffer_binding.offset,
            size: buffer_binding.resolve_size(),
        }),
        BindingResource::TextureView(view) => Ok(ViewSource::TextureView(view)),
        BindingResource::Sampler(_) => {
            log::error!("Binding {} got a sampler in a view table", binding);
            Err(BindGroupError::InvalidArgument(RangeKind::Sampler))
        }
    }
}

fn type_mismatch<A: Api>(
    layout: &BindGroupLayout,
    binding: u32,
    resource: &BindingResource<A>,
) -> BindGroupError {
    match layout.entry(binding) {
        Some(decl) => BindGroupError::BindingTypeMismatch {
            binding,
            expected: decl.ty,
            actual: resource.class_name(),
        },
        None => BindGroupError::MissingBindingDeclaration(binding),
    }
}
