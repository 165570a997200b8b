//! descriptor set layout 缓存
//!
//! 以规范化 binding 列表的内容哈希为 key。value 除了 `vk::DescriptorSetLayout`
//! 还带一个 update template：参数更新先 memcpy 进扁平的 `DescriptorData`
//! 数组，再对整个 set 应用一次 template。

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use parking_lot::RwLock;

use crate::{
    gfx::Gfx,
    pipelines::binding::{DescriptorData, ShaderBindingInfo},
};

/// 规范化 binding 列表的内容哈希
///
/// 输入必须已经按 packed word 排序（`merge_binding_infos` 的输出）。
pub fn layout_hash(bindings: &[ShaderBindingInfo]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for info in bindings {
        for word in [info.packed(), info.name_hash] {
            hash ^= word;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

pub struct DescriptorSetLayout {
    /// (set, binding) 升序的 binding 列表
    pub bindings: Vec<ShaderBindingInfo>,
    pub vk_layout: vk::DescriptorSetLayout,
    /// 加速结构 binding 不进 template，需要单独的 descriptor write
    pub update_template: Option<vk::DescriptorUpdateTemplate>,
}

/// 内容哈希 → layout 的 interning 表
///
/// 读多写少：读走 `RwLock::read`，首次创建才拿写锁。
#[derive(Default)]
pub struct DescriptorSetLayoutCache {
    table: RwLock<HashMap<u64, Arc<DescriptorSetLayout>>>,
}

impl DescriptorSetLayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（或创建）规范化 binding 列表对应的 layout
    ///
    /// # Return
    /// (内容哈希, layout)；哈希是 pipeline key 的组成部分
    pub fn get_or_create(&self, bindings: &[ShaderBindingInfo]) -> (u64, Arc<DescriptorSetLayout>) {
        let hash = layout_hash(bindings);

        if let Some(layout) = self.table.read().get(&hash) {
            return (hash, layout.clone());
        }

        let mut table = self.table.write();
        // 双重检查：写锁等待期间可能已被其他线程创建
        if let Some(layout) = table.get(&hash) {
            return (hash, layout.clone());
        }

        let layout = Arc::new(Self::create_layout(bindings));
        table.insert(hash, layout.clone());
        (hash, layout)
    }

    fn create_layout(bindings: &[ShaderBindingInfo]) -> DescriptorSetLayout {
        let device = Gfx::get().device();

        let vk_bindings = bindings
            .iter()
            .map(|info| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(info.binding())
                    .descriptor_type(info.descriptor_type())
                    .descriptor_count(info.count())
                    .stage_flags(info.stages())
            })
            .collect_vec();

        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let vk_layout = unsafe { device.create_descriptor_set_layout(&layout_ci, None).unwrap() };

        let update_template = Self::create_update_template(bindings, vk_layout);

        DescriptorSetLayout {
            bindings: bindings.to_vec(),
            vk_layout,
            update_template,
        }
    }

    /// template 将第 i 个 binding 的数据定位在 `DescriptorData[i]` 内
    fn create_update_template(
        bindings: &[ShaderBindingInfo],
        vk_layout: vk::DescriptorSetLayout,
    ) -> Option<vk::DescriptorUpdateTemplate> {
        let stride = std::mem::size_of::<DescriptorData>();
        let entries = bindings
            .iter()
            .enumerate()
            .filter(|(_, info)| info.descriptor_type() != vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .map(|(i, info)| {
                let field_offset = match info.descriptor_type() {
                    vk::DescriptorType::SAMPLER
                    | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                    | vk::DescriptorType::SAMPLED_IMAGE
                    | vk::DescriptorType::STORAGE_IMAGE
                    | vk::DescriptorType::INPUT_ATTACHMENT => std::mem::offset_of!(DescriptorData, sampler),
                    _ => std::mem::offset_of!(DescriptorData, buffer),
                };
                vk::DescriptorUpdateTemplateEntry {
                    dst_binding: info.binding(),
                    dst_array_element: 0,
                    descriptor_count: info.count(),
                    descriptor_type: info.descriptor_type(),
                    offset: i * stride + field_offset,
                    stride,
                }
            })
            .collect_vec();

        if entries.is_empty() {
            return None;
        }

        let template_ci = vk::DescriptorUpdateTemplateCreateInfo::default()
            .descriptor_update_entries(&entries)
            .template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET)
            .descriptor_set_layout(vk_layout);

        let template =
            unsafe { Gfx::get().device().create_descriptor_update_template(&template_ci, None).unwrap() };
        Some(template)
    }

    /// device teardown 时调用
    pub fn destroy(self) {
        let device = Gfx::get().device();
        for (_, layout) in self.table.into_inner() {
            unsafe {
                if let Some(template) = layout.update_template {
                    device.destroy_descriptor_update_template(template, None);
                }
                device.destroy_descriptor_set_layout(layout.vk_layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::binding::{merge_binding_infos, shader_arg_hash};

    fn binding(set: u32, binding_idx: u32, ty: vk::DescriptorType, name: &str) -> ShaderBindingInfo {
        ShaderBindingInfo::new(set, binding_idx, 1, ty, 0, vk::ShaderStageFlags::FRAGMENT, shader_arg_hash(name))
    }

    #[test]
    fn test_insertion_order_does_not_change_hash() {
        // 只在插入顺序上不同的 binding 集合，规范化后哈希一致
        let a = binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, "u_frame");
        let b = binding(0, 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, "t_albedo");
        let c = binding(1, 0, vk::DescriptorType::STORAGE_BUFFER, "b_lights");

        let m1 = merge_binding_infos(&[&[a, b, c]]).unwrap();
        let m2 = merge_binding_infos(&[&[c, a, b]]).unwrap();
        let m3 = merge_binding_infos(&[&[b], &[c], &[a]]).unwrap();

        assert_eq!(layout_hash(&m1), layout_hash(&m2));
        assert_eq!(layout_hash(&m1), layout_hash(&m3));
    }

    #[test]
    fn test_different_bindings_hash_differently() {
        let a = binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, "u_frame");
        let b = binding(0, 0, vk::DescriptorType::STORAGE_BUFFER, "u_frame");
        assert_ne!(layout_hash(&[a]), layout_hash(&[b]));
    }

    #[test]
    fn test_empty_layout_hash_is_stable() {
        assert_eq!(layout_hash(&[]), layout_hash(&[]));
    }
}
