use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::Label;

/// Kind of descriptors a [`DescriptorRange`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RangeKind {
    Cbv,
    Srv,
    Uav,
    Sampler,
}

impl RangeKind {
    pub fn from_binding_type(ty: &bt::BindingType) -> Self {
        use bt::BindingType as Bt;
        match *ty {
            Bt::Sampler(_) => Self::Sampler,
            Bt::Buffer {
                ty: bt::BufferBindingType::Uniform,
                ..
            } => Self::Cbv,
            Bt::Buffer {
                ty: bt::BufferBindingType::Storage { read_only: true },
                ..
            }
            | Bt::Texture { .. } => Self::Srv,
            Bt::Buffer {
                ty: bt::BufferBindingType::Storage { read_only: false },
                ..
            }
            | Bt::StorageTexture { .. } => Self::Uav,
        }
    }

    pub fn is_sampler(self) -> bool {
        self == Self::Sampler
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Cbv => "constant buffer view",
            Self::Srv => "shader resource view",
            Self::Uav => "unordered access view",
            Self::Sampler => "sampler",
        })
    }
}

/// Run of consecutive bindings of one kind, laid out contiguously in a descriptor table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub kind: RangeKind,
    pub start_binding: u32,
    pub count: u32,
    /// Slot of `start_binding` inside the view or sampler table.
    pub table_offset: u32,
}

impl DescriptorRange {
    pub fn contains(&self, binding: u32) -> bool {
        binding >= self.start_binding && binding - self.start_binding < self.count
    }

    pub fn bindings(&self) -> std::ops::Range<u32> {
        self.start_binding..self.start_binding + self.count
    }
}

#[derive(Clone, Debug)]
pub struct BindGroupLayoutDescriptor<'a> {
    pub label: Label<'a>,
    pub entries: &'a [bt::BindGroupLayoutEntry],
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BindGroupLayoutError {
    #[error("binding {0} is declared more than once")]
    ConflictBinding(u32),
}

type RangeList = SmallVec<[DescriptorRange; 4]>;

/// Shape of the descriptor tables of a bind group.
///
/// Views (CBV, SRV, UAV) and samplers live in separate tables, since they
/// are allocated from different heaps.
#[derive(Debug)]
pub struct BindGroupLayout {
    label: Option<String>,
    entries: Vec<bt::BindGroupLayoutEntry>,
    view_ranges: RangeList,
    sampler_ranges: RangeList,
    view_table_size: u32,
    sampler_table_size: u32,
}

impl BindGroupLayout {
    /// Groups the entries into descriptor ranges.
    ///
    /// Entries are taken in the order they are declared. An entry continues the
    /// open range only if it has the same kind and the next binding number.
    pub fn new(desc: &BindGroupLayoutDescriptor) -> Result<Self, BindGroupLayoutError> {
        let mut view_ranges = RangeList::new();
        let mut sampler_ranges = RangeList::new();
        let mut view_table_size = 0;
        let mut sampler_table_size = 0;
        let mut current: Option<(RangeKind, u32)> = None;

        for (index, entry) in desc.entries.iter().enumerate() {
            if desc.entries[..index]
                .iter()
                .any(|other| other.binding == entry.binding)
            {
                log::error!(
                    "Bind group layout {:?} declares binding {} twice",
                    desc.label,
                    entry.binding
                );
                return Err(BindGroupLayoutError::ConflictBinding(entry.binding));
            }

            let kind = RangeKind::from_binding_type(&entry.ty);
            let (ranges, table_size) = if kind.is_sampler() {
                (&mut sampler_ranges, &mut sampler_table_size)
            } else {
                (&mut view_ranges, &mut view_table_size)
            };

            let continues = match current {
                Some((cur_kind, cur_binding)) => {
                    cur_kind == kind && cur_binding.checked_add(1) == Some(entry.binding)
                }
                None => false,
            };
            match ranges.last_mut().filter(|_| continues) {
                Some(range) => range.count += 1,
                None => ranges.push(DescriptorRange {
                    kind,
                    start_binding: entry.binding,
                    count: 1,
                    table_offset: *table_size,
                }),
            }
            *table_size += 1;
            current = Some((kind, entry.binding));
        }

        Ok(Self {
            label: desc.label.map(str::to_string),
            entries: desc.entries.to_vec(),
            view_ranges,
            sampler_ranges,
            view_table_size,
            sampler_table_size,
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Declared entries, in declaration order.
    pub fn entries(&self) -> &[bt::BindGroupLayoutEntry] {
        &self.entries
    }

    pub fn entry(&self, binding: u32) -> Option<&bt::BindGroupLayoutEntry> {
        self.entries.iter().find(|entry| entry.binding == binding)
    }

    pub fn view_ranges(&self) -> &[DescriptorRange] {
        &self.view_ranges
    }

    pub fn sampler_ranges(&self) -> &[DescriptorRange] {
        &self.sampler_ranges
    }

    /// Number of CBV, SRV and UAV slots of a bind group.
    pub fn view_table_size(&self) -> u32 {
        self.view_table_size
    }

    pub fn sampler_table_size(&self) -> u32 {
        self.sampler_table_size
    }

    /// Range holding `binding`, together with its slot inside the table.
    pub fn locate(&self, binding: u32) -> Option<(&DescriptorRange, u32)> {
        self.view_ranges
            .iter()
            .chain(self.sampler_ranges.iter())
            .find(|range| range.contains(binding))
            .map(|range| (range, range.table_offset + binding - range.start_binding))
    }
}
