//! Descriptor-write replay across the in-flight frame slots.

use kryne_graphics::descriptor_set_manager::{
    DescriptorData, DescriptorSetWriteInfo, PackedIndex,
};
use kryne_graphics::descs::SamplerDesc;
use kryne_graphics::enums::TextureLayout;
use kryne_graphics::handles::DescriptorSetHandle;
use kryne_graphics::headless::{HeadlessBackend, HeadlessConfig};
use kryne_graphics::shader_pipeline::{
    DescriptorBindingDesc, DescriptorSetDesc, DescriptorType, ShaderVisibility,
};
use kryne_graphics::GraphicsContext;

struct Fixture {
    context: GraphicsContext<HeadlessBackend>,
    set: DescriptorSetHandle,
    binding_indices: Vec<u32>,
}

fn fixture(frame_count: u8) -> Fixture {
    let context = GraphicsContext::new(HeadlessBackend::new(HeadlessConfig {
        frame_context_count: frame_count,
        ..HeadlessConfig::default()
    }));

    let layout_desc = DescriptorSetDesc {
        bindings: vec![
            DescriptorBindingDesc::new(DescriptorType::Sampler, ShaderVisibility::FRAGMENT),
            DescriptorBindingDesc::new(DescriptorType::SampledTexture, ShaderVisibility::FRAGMENT),
        ],
    };
    let mut binding_indices = vec![0u32; layout_desc.bindings.len()];
    let layout = context.create_descriptor_set_layout(&layout_desc, &mut binding_indices);
    assert!(layout.is_valid());
    let set = context.create_descriptor_set(layout);
    assert!(set.is_valid());

    Fixture {
        context,
        set,
        binding_indices,
    }
}

#[test]
fn writes_converge_across_all_frame_slots() {
    let fixture = fixture(3);
    let context = &fixture.context;
    let backend = context.backend();
    let frame_count = u64::from(context.frame_context_count());

    let sampler = context.create_sampler(&SamplerDesc::default());
    let write = DescriptorSetWriteInfo::new(
        PackedIndex::from_raw(fixture.binding_indices[0]),
        DescriptorData::Sampler(sampler),
    );

    // Issue the write on frame 1: the current slot's copy observes it
    // immediately.
    assert_eq!(context.frame_id(), 1);
    context.update_descriptor_set(fixture.set, std::slice::from_ref(&write));

    let key = (fixture.binding_indices[0], 0u32);
    let current_slot = (context.frame_id() % frame_count) as u8;
    let contents = backend
        .descriptor_set_contents(fixture.set, current_slot)
        .unwrap();
    assert_eq!(contents.get(&key), Some(&DescriptorData::Sampler(sampler)));

    // Across the next frames every slot's copy converges, and stays
    // converged once the rotation wraps.
    for _ in 0..6 {
        context.end_frame();
        let slot = (context.frame_id() % frame_count) as u8;
        let contents = backend.descriptor_set_contents(fixture.set, slot).unwrap();
        assert_eq!(
            contents.get(&key),
            Some(&DescriptorData::Sampler(sampler)),
            "slot {} diverged on frame {}",
            slot,
            context.frame_id()
        );
    }
}

#[test]
fn later_writes_overwrite_earlier_ones_everywhere() {
    let fixture = fixture(2);
    let context = &fixture.context;
    let backend = context.backend();

    let first = context.create_sampler(&SamplerDesc::default());
    let second = context.create_sampler(&SamplerDesc::default());
    let index = PackedIndex::from_raw(fixture.binding_indices[0]);
    let key = (index.to_raw(), 0u32);

    context.update_descriptor_set(
        fixture.set,
        &[DescriptorSetWriteInfo::new(index, DescriptorData::Sampler(first))],
    );
    context.update_descriptor_set(
        fixture.set,
        &[DescriptorSetWriteInfo::new(index, DescriptorData::Sampler(second))],
    );

    for _ in 0..4 {
        context.end_frame();
        let slot = (context.frame_id() % 2) as u8;
        let contents = backend.descriptor_set_contents(fixture.set, slot).unwrap();
        assert_eq!(contents.get(&key), Some(&DescriptorData::Sampler(second)));
    }
}

#[test]
fn single_frame_writes_touch_only_the_current_slot() {
    let fixture = fixture(3);
    let context = &fixture.context;
    let backend = context.backend();

    let view_write = DescriptorSetWriteInfo {
        single_frame: true,
        ..DescriptorSetWriteInfo::new(
            PackedIndex::from_raw(fixture.binding_indices[1]),
            DescriptorData::TextureView {
                view: kryne_graphics::handles::TextureViewHandle::INVALID,
                layout: TextureLayout::ShaderResource,
            },
        )
    };
    let key = (fixture.binding_indices[1], 0u32);

    let issue_slot = (context.frame_id() % 3) as u8;
    context.update_descriptor_set(fixture.set, std::slice::from_ref(&view_write));
    assert!(backend
        .descriptor_set_contents(fixture.set, issue_slot)
        .unwrap()
        .contains_key(&key));

    context.end_frame();
    let next_slot = (context.frame_id() % 3) as u8;
    assert!(!backend
        .descriptor_set_contents(fixture.set, next_slot)
        .unwrap()
        .contains_key(&key));
}
