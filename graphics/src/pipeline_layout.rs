//! Backend-independent pipeline-layout model.
//!
//! Descriptor-set layouts bind in declaration order; push-constant ranges
//! follow. Backends without first-class push constants receive synthesised
//! per-stage constant-buffer slots instead, using the binding-index rule of
//! SPIR-V cross compilation: slot = last descriptor-set index + 1, per stage.

use crate::handles::DescriptorSetLayoutHandle;
use crate::shader_pipeline::{PipelineLayoutDesc, PushConstantDesc, ShaderVisibility};
use smallvec::SmallVec;

/// One synthesised binding standing in for a push-constant range on a
/// backend without native push constants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImplicitConstantSlot {
    pub stage: ShaderVisibility,
    pub binding_index: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PushConstantModel {
    pub desc: PushConstantDesc,
    /// Empty on backends with native push constants.
    pub implicit_slots: SmallVec<[ImplicitConstantSlot; 3]>,
}

/// The resolved layout a backend stores behind a pipeline-layout handle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineLayoutModel {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constants: Vec<PushConstantModel>,
}

impl PipelineLayoutModel {
    pub fn build(desc: &PipelineLayoutDesc, native_push_constants: bool) -> Self {
        let set_count = desc.descriptor_sets.len() as u32;
        let push_constants = desc
            .push_constants
            .iter()
            .enumerate()
            .map(|(range_index, range)| {
                let mut implicit_slots = SmallVec::new();
                if !native_push_constants {
                    let binding_index = set_count + range_index as u32;
                    for stage in [
                        ShaderVisibility::VERTEX,
                        ShaderVisibility::FRAGMENT,
                        ShaderVisibility::COMPUTE,
                    ]
                    .iter()
                    {
                        if range.visibility.contains(*stage) {
                            implicit_slots.push(ImplicitConstantSlot {
                                stage: *stage,
                                binding_index,
                            });
                        }
                    }
                }
                PushConstantModel {
                    desc: *range,
                    implicit_slots,
                }
            })
            .collect();

        PipelineLayoutModel {
            set_layouts: desc.descriptor_sets.clone(),
            push_constants,
        }
    }
}
