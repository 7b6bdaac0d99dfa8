use descriptor_hal::{BindGroupLayoutDescriptor, BindGroupLayoutError, RangeKind};

use crate::common::{initialize_test, TestParameters};

use bt::{BindGroupLayoutEntry as Entry, BindingType, ShaderStages, StorageTextureAccess};

#[test]
fn ranges_follow_declaration_order() {
    initialize_test(TestParameters::default(), |ctx| {
        let layout = ctx
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("grouping"),
                entries: &[
                    Entry::new(0, BindingType::uniform_buffer()),
                    Entry::new(1, BindingType::uniform_buffer()),
                    Entry::new(2, BindingType::texture_2d()),
                    Entry::new(5, BindingType::texture_2d()),
                ],
            })
            .unwrap();

        let ranges = layout
            .view_ranges()
            .iter()
            .map(|range| (range.kind, range.start_binding, range.count, range.table_offset))
            .collect::<Vec<_>>();
        assert_eq!(
            ranges,
            [
                (RangeKind::Cbv, 0, 2, 0),
                (RangeKind::Srv, 2, 1, 2),
                (RangeKind::Srv, 5, 1, 3),
            ]
        );
        assert_eq!(layout.view_table_size(), 4);
        assert!(layout.sampler_ranges().is_empty());
        assert_eq!(layout.label(), Some("grouping"));
    });
}

#[test]
fn storage_textures_are_unordered_access() {
    initialize_test(TestParameters::default(), |ctx| {
        let storage = BindingType::StorageTexture {
            access: StorageTextureAccess::ReadWrite,
            view_dimension: bt::TextureViewDimension::D3,
        };
        let layout = ctx
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: None,
                entries: &[
                    Entry {
                        binding: 7,
                        visibility: ShaderStages::COMPUTE,
                        ty: storage,
                    },
                    Entry::new(8, BindingType::storage_buffer(false)),
                ],
            })
            .unwrap();
        assert_eq!(layout.view_ranges().len(), 1);
        assert_eq!(layout.view_ranges()[0].kind, RangeKind::Uav);
        assert_eq!(layout.view_ranges()[0].count, 2);
        assert_eq!(
            layout.entry(7).map(|entry| entry.visibility),
            Some(ShaderStages::COMPUTE)
        );
    });
}

#[test]
fn conflicting_bindings() {
    initialize_test(TestParameters::default(), |ctx| {
        let err = ctx
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: None,
                entries: &[
                    Entry::new(4, BindingType::texture_2d()),
                    Entry::new(5, BindingType::texture_2d()),
                    Entry::new(4, BindingType::uniform_buffer()),
                ],
            })
            .unwrap_err();
        assert_eq!(err, BindGroupLayoutError::ConflictBinding(4));
    });
}
