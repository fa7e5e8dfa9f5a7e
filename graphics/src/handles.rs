//! Typed handles to GPU objects.
//!
//! Every handle wraps the same 32-bit index + generation value; the typed
//! wrappers exist so a buffer handle cannot be passed where a texture handle
//! is expected. Equality is bit equality.

use kryne_core::memory::GenPoolHandle;

macro_rules! declare_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub struct $name(pub GenPoolHandle);

        impl $name {
            pub const INVALID: $name = $name(GenPoolHandle::INVALID);
            pub const UNDEFINED: $name = $name(GenPoolHandle::UNDEFINED);

            #[inline]
            pub fn is_valid(self) -> bool {
                self.0.is_some()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl From<GenPoolHandle> for $name {
            fn from(handle: GenPoolHandle) -> Self {
                $name(handle)
            }
        }
    };
}

declare_handle!(BufferHandle);
declare_handle!(TextureHandle);
declare_handle!(
    /// A shader-visible view over a texture (SRV/UAV).
    TextureViewHandle
);
declare_handle!(
    /// A typed range over a buffer, as bound to descriptor sets.
    BufferViewHandle
);
declare_handle!(RenderTargetViewHandle);
declare_handle!(SamplerHandle);
declare_handle!(RenderPassHandle);
declare_handle!(PipelineLayoutHandle);
declare_handle!(DescriptorSetHandle);
declare_handle!(DescriptorSetLayoutHandle);
declare_handle!(GraphicsPipelineHandle);
declare_handle!(ComputePipelineHandle);
declare_handle!(ShaderModuleHandle);

/// Opaque value identifying an open command list within the current frame.
///
/// Returned by `begin_graphics_command_list`; invalidated by the matching
/// end call or by the frame rolling over. Zero is the invalid value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommandListHandle(pub usize);

impl CommandListHandle {
    pub const INVALID: CommandListHandle = CommandListHandle(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for CommandListHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        assert!(!BufferHandle::INVALID.is_valid());
        assert!(!TextureHandle::UNDEFINED.is_valid());
        assert!(BufferHandle::from(GenPoolHandle::new(3, 1)).is_valid());
        assert_eq!(BufferHandle::default(), BufferHandle::INVALID);
        assert!(!CommandListHandle::default().is_valid());
    }

    #[test]
    fn bit_equality() {
        let a = BufferHandle(GenPoolHandle::new(5, 2));
        let b = BufferHandle(GenPoolHandle::new(5, 2));
        let c = BufferHandle(GenPoolHandle::new(5, 3));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
