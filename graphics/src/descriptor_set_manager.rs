//! Backend-independent descriptor-set model and multi-frame write replay.
//!
//! A descriptor set is replicated once per in-flight frame slot. When the
//! client writes a set, the write applies to the current slot's copy
//! immediately and is queued for each other slot, to be replayed when that
//! slot's frame comes around. Each copy therefore converges to the same
//! state without client retries.

use crate::enums::TextureLayout;
use crate::handles::{BufferViewHandle, DescriptorSetHandle, SamplerHandle, TextureViewHandle};
use crate::shader_pipeline::{DescriptorBindingDesc, DescriptorSetDesc, DescriptorType};
use kryne_core::common::MultiFrameDataTracker;
use smallvec::SmallVec;

/// Packed per-binding id handed back by layout creation: the low bits carry
/// the descriptor type, the high bits the binding index. Writes reference
/// bindings through this id so they never re-look the layout up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PackedIndex(u32);

impl PackedIndex {
    pub const TYPE_BITS: u32 = 10;
    const TYPE_MASK: u32 = (1 << Self::TYPE_BITS) - 1;

    #[inline]
    pub fn pack(descriptor_type: DescriptorType, binding: u32) -> Self {
        PackedIndex(descriptor_type.to_index() | (binding << Self::TYPE_BITS))
    }

    #[inline]
    pub fn descriptor_type(self) -> Option<DescriptorType> {
        DescriptorType::from_index(self.0 & Self::TYPE_MASK)
    }

    #[inline]
    pub fn binding(self) -> u32 {
        self.0 >> Self::TYPE_BITS
    }

    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        PackedIndex(raw)
    }
}

/// Resolves the effective binding index of each layout entry (explicit or
/// dense-from-zero) and writes the corresponding packed ids into
/// `binding_indices`. Returns false when the output slice is too small.
pub fn pack_binding_indices(desc: &DescriptorSetDesc, binding_indices: &mut [u32]) -> bool {
    if binding_indices.len() < desc.bindings.len() {
        return false;
    }
    for (i, binding) in desc.bindings.iter().enumerate() {
        let index = effective_binding_index(binding, i);
        binding_indices[i] = PackedIndex::pack(binding.descriptor_type, index).to_raw();
    }
    true
}

#[inline]
pub fn effective_binding_index(binding: &DescriptorBindingDesc, declaration_index: usize) -> u32 {
    if binding.binding_index == DescriptorBindingDesc::IMPLICIT_BINDING_INDEX {
        declaration_index as u32
    } else {
        binding.binding_index
    }
}

/// One descriptor worth of data; a union over the handle kinds a binding can
/// reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DescriptorData {
    Sampler(SamplerHandle),
    TextureView {
        view: TextureViewHandle,
        layout: TextureLayout,
    },
    BufferView(BufferViewHandle),
}

/// A client-issued descriptor write.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorSetWriteInfo {
    pub index: PackedIndex,
    pub array_offset: u32,
    pub data: SmallVec<[DescriptorData; 1]>,
    /// When set, the write only applies to the current frame slot's copy and
    /// is not replayed (for ring-style data rewritten every frame anyway).
    pub single_frame: bool,
}

impl DescriptorSetWriteInfo {
    pub fn new(index: PackedIndex, data: DescriptorData) -> Self {
        DescriptorSetWriteInfo {
            index,
            array_offset: 0,
            data: smallvec::smallvec![data],
            single_frame: false,
        }
    }
}

/// A write bound to its target set, as queued for replay.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOp {
    pub set: DescriptorSetHandle,
    pub index: PackedIndex,
    pub array_offset: u32,
    pub data: SmallVec<[DescriptorData; 1]>,
}

/// The replay queue: wraps a [`MultiFrameDataTracker`] of [`WriteOp`]s.
///
/// The owner applies writes to the current slot itself (it knows how to
/// reach its set copies), then feeds them here; on frame advance it drains
/// the newly-current slot's backlog in order.
pub struct DescriptorSetUpdateTracker {
    tracker: MultiFrameDataTracker<WriteOp>,
}

impl DescriptorSetUpdateTracker {
    pub fn new(frame_count: usize, frame_index: usize) -> Self {
        DescriptorSetUpdateTracker {
            tracker: MultiFrameDataTracker::new(frame_count, frame_index),
        }
    }

    /// Queues `writes` for replay on every other frame slot. Single-frame
    /// writes are skipped.
    pub fn track(&mut self, set: DescriptorSetHandle, writes: &[DescriptorSetWriteInfo]) {
        for write in writes {
            if write.single_frame {
                continue;
            }
            self.tracker.track_for_other_frames(WriteOp {
                set,
                index: write.index,
                array_offset: write.array_offset,
                data: write.data.clone(),
            });
        }
    }

    /// Advances to the next frame slot and hands its backlog to `apply`, in
    /// issue order, then clears it.
    pub fn next_frame(&mut self, mut apply: impl FnMut(&WriteOp)) {
        self.tracker.advance_to_next_frame();
        for op in self.tracker.get_data() {
            apply(op);
        }
        self.tracker.clear_data();
    }

    pub fn frame_count(&self) -> usize {
        self.tracker.frame_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader_pipeline::ShaderVisibility;
    use kryne_core::memory::GenPoolHandle;

    #[test]
    fn packed_index_round_trip() {
        let packed = PackedIndex::pack(DescriptorType::ConstantBuffer, 5);
        assert_eq!(packed.descriptor_type(), Some(DescriptorType::ConstantBuffer));
        assert_eq!(packed.binding(), 5);
        assert_eq!(PackedIndex::from_raw(packed.to_raw()), packed);
    }

    #[test]
    fn implicit_and_explicit_binding_indices() {
        let desc = DescriptorSetDesc {
            bindings: vec![
                DescriptorBindingDesc::new(DescriptorType::ConstantBuffer, ShaderVisibility::VERTEX),
                DescriptorBindingDesc {
                    binding_index: 7,
                    ..DescriptorBindingDesc::new(
                        DescriptorType::SampledTexture,
                        ShaderVisibility::FRAGMENT,
                    )
                },
                DescriptorBindingDesc::new(DescriptorType::Sampler, ShaderVisibility::FRAGMENT),
            ],
        };
        let mut indices = [0u32; 3];
        assert!(pack_binding_indices(&desc, &mut indices));

        assert_eq!(PackedIndex::from_raw(indices[0]).binding(), 0);
        assert_eq!(PackedIndex::from_raw(indices[1]).binding(), 7);
        assert_eq!(PackedIndex::from_raw(indices[2]).binding(), 2);
        assert_eq!(
            PackedIndex::from_raw(indices[1]).descriptor_type(),
            Some(DescriptorType::SampledTexture)
        );

        let mut too_small = [0u32; 2];
        assert!(!pack_binding_indices(&desc, &mut too_small));
    }

    #[test]
    fn replay_converges_over_other_frames() {
        let mut tracker = DescriptorSetUpdateTracker::new(3, 1);
        let set = DescriptorSetHandle(GenPoolHandle::new(0, 0));
        let write = DescriptorSetWriteInfo::new(
            PackedIndex::pack(DescriptorType::Sampler, 0),
            DescriptorData::Sampler(SamplerHandle(GenPoolHandle::new(1, 0))),
        );
        tracker.track(set, std::slice::from_ref(&write));

        let mut replayed = 0;
        tracker.next_frame(|op| {
            assert_eq!(op.set, set);
            replayed += 1;
        });
        tracker.next_frame(|_| replayed += 1);
        // Back at the issuing slot: nothing left to replay.
        tracker.next_frame(|_| replayed += 100);
        assert_eq!(replayed, 2);
    }

    #[test]
    fn single_frame_writes_are_not_replayed() {
        let mut tracker = DescriptorSetUpdateTracker::new(2, 0);
        let set = DescriptorSetHandle(GenPoolHandle::new(0, 0));
        let write = DescriptorSetWriteInfo {
            single_frame: true,
            ..DescriptorSetWriteInfo::new(
                PackedIndex::pack(DescriptorType::ConstantBuffer, 1),
                DescriptorData::BufferView(BufferViewHandle(GenPoolHandle::new(2, 0))),
            )
        };
        tracker.track(set, std::slice::from_ref(&write));
        tracker.next_frame(|_| panic!("single-frame write must not replay"));
    }
}
