//! pass 对资源的使用声明

use ash::vk;

use crate::{
    error::ResourceError,
    graph::{
        handle::{ResourceHandle, display_name},
        state::{RgBufferState, RgImageState},
    },
};

/// 访问类型
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
}

impl AccessKind {
    #[inline]
    pub fn reads(&self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::ReadWrite)
    }

    #[inline]
    pub fn writes(&self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::ReadWrite)
    }

    fn union(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            AccessKind::ReadWrite
        }
    }
}

/// 单条使用记录：{句柄, 访问类型, stage/access mask, layout 要求}
#[derive(Clone, Copy, Debug)]
pub struct ResourceUsage {
    pub handle: ResourceHandle,
    pub access: AccessKind,
    pub stage: vk::PipelineStageFlags2,
    pub access_mask: vk::AccessFlags2,
    /// 仅图像有意义
    pub layout: vk::ImageLayout,
}

impl ResourceUsage {
    pub fn image(handle: ResourceHandle, access: AccessKind, state: RgImageState) -> Self {
        Self {
            handle,
            access,
            stage: state.stage,
            access_mask: state.access,
            layout: state.layout,
        }
    }

    pub fn buffer(handle: ResourceHandle, access: AccessKind, state: RgBufferState) -> Self {
        Self {
            handle,
            access,
            stage: state.stage,
            access_mask: state.access,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }

    #[inline]
    pub fn image_state(&self) -> RgImageState {
        RgImageState::new(self.stage, self.access_mask, self.layout)
    }
}

/// 合并一个 pass 内对同一句柄的多条使用记录
///
/// 访问类型与 stage/access mask 取并集；图像的 layout 要求必须一致，
/// 否则 → `ResourceError::UsageMismatch`。结果保持首次出现的顺序。
pub fn merge_usages(pass_name: &str, usages: &[ResourceUsage]) -> Result<Vec<ResourceUsage>, ResourceError> {
    let mut merged: Vec<ResourceUsage> = Vec::with_capacity(usages.len());

    for usage in usages {
        match merged.iter_mut().find(|m| m.handle == usage.handle) {
            None => merged.push(*usage),
            Some(existing) => {
                if existing.layout != usage.layout {
                    return Err(ResourceError::UsageMismatch {
                        pass: pass_name.to_string(),
                        resource: display_name(usage.handle),
                        reason: format!(
                            "layout requirement conflict: {:?} vs {:?}",
                            existing.layout, usage.layout
                        ),
                    });
                }
                existing.access = existing.access.union(usage.access);
                existing.stage |= usage.stage;
                existing.access_mask |= usage.access_mask;
            }
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::handle::produce_image_handle;

    #[test]
    fn test_merge_unions_access_and_stages() {
        let handle = produce_image_handle("usage-merge-target");
        let read = ResourceUsage::image(handle, AccessKind::Read, RgImageState::STORAGE_READ_WRITE_COMPUTE);
        let write = ResourceUsage::image(handle, AccessKind::Write, RgImageState::STORAGE_WRITE_COMPUTE);

        let merged = merge_usages("merge-pass", &[read, write]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].access, AccessKind::ReadWrite);
        assert!(merged[0].access_mask.contains(vk::AccessFlags2::SHADER_STORAGE_READ));
        assert!(merged[0].access_mask.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
    }

    #[test]
    fn test_merge_rejects_layout_conflict() {
        let handle = produce_image_handle("usage-layout-conflict");
        let sampled = ResourceUsage::image(handle, AccessKind::Read, RgImageState::SHADER_READ_FRAGMENT);
        let storage = ResourceUsage::image(handle, AccessKind::Write, RgImageState::STORAGE_WRITE_COMPUTE);

        let result = merge_usages("conflict-pass", &[sampled, storage]);
        assert!(matches!(result, Err(ResourceError::UsageMismatch { .. })));
    }

    #[test]
    fn test_merge_keeps_distinct_handles() {
        let a = produce_image_handle("usage-distinct-a");
        let b = produce_image_handle("usage-distinct-b");
        let usages = [
            ResourceUsage::image(a, AccessKind::Write, RgImageState::COLOR_ATTACHMENT_WRITE),
            ResourceUsage::image(b, AccessKind::Read, RgImageState::SHADER_READ_FRAGMENT),
        ];

        let merged = merge_usages("two-resources", &usages).unwrap();
        assert_eq!(merged.len(), 2);
    }
}
