//! shader 反射出的 binding 信息
//!
//! `ShaderBindingInfo` 打包进一个 u64，(set, binding) 位于最高位，
//! 因此直接按 u64 排序就能得到 descriptor set layout 需要的
//! (set, binding) 升序。字段通过显式移位访问，不依赖编译器的位域布局。

use ash::vk;

use crate::error::PipelineError;

/// 打包布局（高位到低位）：
///
/// ```text
/// | set_index:3 | binding:8 | count:8 | type:4 | range:27 | stage_bits:6 | dynamic_offset_idx:8 |
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderBindingInfo {
    packed: u64,
    /// shader 中参数名的 fnv-1a 哈希
    pub name_hash: u64,
}

const SET_SHIFT: u32 = 61;
const BINDING_SHIFT: u32 = 53;
const COUNT_SHIFT: u32 = 45;
const TYPE_SHIFT: u32 = 41;
const RANGE_SHIFT: u32 = 14;
const STAGE_SHIFT: u32 = 8;

const SET_MASK: u64 = 0x7;
const BINDING_MASK: u64 = 0xff;
const COUNT_MASK: u64 = 0xff;
const TYPE_MASK: u64 = 0xf;
const RANGE_MASK: u64 = 0x7ff_ffff;
const STAGE_MASK: u64 = 0x3f;
const DYN_OFFSET_MASK: u64 = 0xff;

impl ShaderBindingInfo {
    pub fn new(
        set_index: u32,
        binding: u32,
        count: u32,
        descriptor_type: vk::DescriptorType,
        range: u32,
        stages: vk::ShaderStageFlags,
        name_hash: u64,
    ) -> Self {
        assert!(set_index as u64 <= SET_MASK, "set index {set_index} out of range");
        assert!(binding as u64 <= BINDING_MASK, "binding {binding} out of range");
        assert!(count as u64 <= COUNT_MASK, "descriptor count {count} out of range");
        assert!(range as u64 <= RANGE_MASK, "uniform range {range} out of range");

        let packed = ((set_index as u64 & SET_MASK) << SET_SHIFT)
            | ((binding as u64 & BINDING_MASK) << BINDING_SHIFT)
            | ((count as u64 & COUNT_MASK) << COUNT_SHIFT)
            | ((descriptor_type_code(descriptor_type) & TYPE_MASK) << TYPE_SHIFT)
            | ((range as u64 & RANGE_MASK) << RANGE_SHIFT)
            | ((stage_bits(stages) & STAGE_MASK) << STAGE_SHIFT);

        Self { packed, name_hash }
    }

    #[inline]
    pub fn packed(&self) -> u64 {
        self.packed
    }

    #[inline]
    pub fn set_index(&self) -> u32 {
        ((self.packed >> SET_SHIFT) & SET_MASK) as u32
    }

    #[inline]
    pub fn binding(&self) -> u32 {
        ((self.packed >> BINDING_SHIFT) & BINDING_MASK) as u32
    }

    #[inline]
    pub fn count(&self) -> u32 {
        ((self.packed >> COUNT_SHIFT) & COUNT_MASK) as u32
    }

    #[inline]
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        descriptor_type_from_code((self.packed >> TYPE_SHIFT) & TYPE_MASK)
    }

    #[inline]
    pub fn range(&self) -> u32 {
        ((self.packed >> RANGE_SHIFT) & RANGE_MASK) as u32
    }

    #[inline]
    pub fn stages(&self) -> vk::ShaderStageFlags {
        stage_flags(((self.packed >> STAGE_SHIFT) & STAGE_MASK) as u32)
    }

    #[inline]
    pub fn dynamic_offset_index(&self) -> u32 {
        (self.packed & DYN_OFFSET_MASK) as u32
    }

    #[inline]
    pub fn with_dynamic_offset_index(mut self, index: u32) -> Self {
        assert!(index as u64 <= DYN_OFFSET_MASK);
        self.packed = (self.packed & !DYN_OFFSET_MASK) | (index as u64 & DYN_OFFSET_MASK);
        self
    }

    /// 除 stage 和 dynamic offset 之外的字段；两个 stage 合并时这些必须一致
    #[inline]
    fn conflict_key(&self) -> u64 {
        self.packed & !((STAGE_MASK << STAGE_SHIFT) | DYN_OFFSET_MASK)
    }

    fn or_stages(&mut self, other: &Self) {
        self.packed |= other.packed & (STAGE_MASK << STAGE_SHIFT);
    }
}

impl std::fmt::Debug for ShaderBindingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Binding(set={}, binding={}, count={}, type={:?}, range={}, stages={:?})",
            self.set_index(),
            self.binding(),
            self.count(),
            self.descriptor_type(),
            self.range(),
            self.stages(),
        )
    }
}

/// `vk::DescriptorType` 压缩到 4 bit
fn descriptor_type_code(ty: vk::DescriptorType) -> u64 {
    match ty {
        vk::DescriptorType::SAMPLER => 0,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => 1,
        vk::DescriptorType::SAMPLED_IMAGE => 2,
        vk::DescriptorType::STORAGE_IMAGE => 3,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER => 4,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER => 5,
        vk::DescriptorType::UNIFORM_BUFFER => 6,
        vk::DescriptorType::STORAGE_BUFFER => 7,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => 8,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => 9,
        vk::DescriptorType::INPUT_ATTACHMENT => 10,
        vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => 11,
        _ => panic!("unsupported descriptor type: {ty:?}"),
    }
}

fn descriptor_type_from_code(code: u64) -> vk::DescriptorType {
    match code {
        0 => vk::DescriptorType::SAMPLER,
        1 => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        2 => vk::DescriptorType::SAMPLED_IMAGE,
        3 => vk::DescriptorType::STORAGE_IMAGE,
        4 => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        5 => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        6 => vk::DescriptorType::UNIFORM_BUFFER,
        7 => vk::DescriptorType::STORAGE_BUFFER,
        8 => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        9 => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        10 => vk::DescriptorType::INPUT_ATTACHMENT,
        11 => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        _ => panic!("invalid descriptor type code: {code}"),
    }
}

/// 经典 6 个 stage 压缩到 6 bit；光追 stage 不区分，统一视作 ALL
fn stage_bits(stages: vk::ShaderStageFlags) -> u64 {
    const CLASSIC: [(vk::ShaderStageFlags, u64); 6] = [
        (vk::ShaderStageFlags::VERTEX, 1 << 0),
        (vk::ShaderStageFlags::TESSELLATION_CONTROL, 1 << 1),
        (vk::ShaderStageFlags::TESSELLATION_EVALUATION, 1 << 2),
        (vk::ShaderStageFlags::GEOMETRY, 1 << 3),
        (vk::ShaderStageFlags::FRAGMENT, 1 << 4),
        (vk::ShaderStageFlags::COMPUTE, 1 << 5),
    ];

    let mut classic_mask = vk::ShaderStageFlags::empty();
    let mut bits = 0;
    for (flag, bit) in CLASSIC {
        classic_mask |= flag;
        if stages.contains(flag) {
            bits |= bit;
        }
    }

    if stages.intersects(!classic_mask) {
        // 光追等扩展 stage 超出 6 bit 的表达范围
        STAGE_MASK
    } else {
        bits
    }
}

fn stage_flags(bits: u32) -> vk::ShaderStageFlags {
    if bits as u64 == STAGE_MASK {
        return vk::ShaderStageFlags::ALL;
    }

    let mut flags = vk::ShaderStageFlags::empty();
    if bits & (1 << 0) != 0 {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if bits & (1 << 1) != 0 {
        flags |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if bits & (1 << 2) != 0 {
        flags |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if bits & (1 << 3) != 0 {
        flags |= vk::ShaderStageFlags::GEOMETRY;
    }
    if bits & (1 << 4) != 0 {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if bits & (1 << 5) != 0 {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

/// shader 参数名的 fnv-1a 哈希，编码器和反射使用同一套
pub fn shader_arg_hash(name: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 合并多个 stage 的 binding 列表，得到规范化的 layout 描述
///
/// - 结果按 packed word 升序，即 (set, binding) 升序
/// - 同一个 (set, binding) 出现在多个 stage：stage 位取并集
/// - type/count/range 不一致 → `PipelineError::BindingConflict`
pub fn merge_binding_infos(per_stage: &[&[ShaderBindingInfo]]) -> Result<Vec<ShaderBindingInfo>, PipelineError> {
    let mut all: Vec<ShaderBindingInfo> = per_stage.iter().flat_map(|s| s.iter().copied()).collect();
    all.sort();

    let mut merged: Vec<ShaderBindingInfo> = Vec::with_capacity(all.len());
    for info in all {
        match merged.last_mut() {
            Some(last) if last.set_index() == info.set_index() && last.binding() == info.binding() => {
                if last.conflict_key() != info.conflict_key() {
                    return Err(PipelineError::BindingConflict {
                        set: info.set_index(),
                        binding: info.binding(),
                        reason: format!("incompatible declarations: {last:?} vs {info:?}"),
                    });
                }
                if last.name_hash != info.name_hash {
                    return Err(PipelineError::BindingConflict {
                        set: info.set_index(),
                        binding: info.binding(),
                        reason: "argument name differs between stages".to_string(),
                    });
                }
                last.or_stages(&info);
            }
            _ => merged.push(info),
        }
    }
    Ok(merged)
}

/// descriptor 更新时的扁平数据记录
///
/// 字段顺序有要求：`sampler/image_view/image_layout` 可以按
/// `vk::DescriptorImageInfo` 解释，`buffer/offset/range` 可以按
/// `vk::DescriptorBufferInfo` 解释，update template 直接取字段地址。
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DescriptorData {
    pub sampler: vk::Sampler,
    pub image_view: vk::ImageView,
    pub image_layout: vk::ImageLayout,
    pub descriptor_type: vk::DescriptorType,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
    pub binding_number: u32,
    pub array_index: u32,
}

impl Default for DescriptorData {
    fn default() -> Self {
        Self {
            sampler: vk::Sampler::null(),
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
            binding_number: 0,
            array_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(set: u32, binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> ShaderBindingInfo {
        ShaderBindingInfo::new(set, binding, 1, ty, 0, stages, shader_arg_hash("arg"))
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let info = ShaderBindingInfo::new(
            5,
            200,
            16,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            0x7ff_ffff,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            42,
        );
        assert_eq!(info.set_index(), 5);
        assert_eq!(info.binding(), 200);
        assert_eq!(info.count(), 16);
        assert_eq!(info.descriptor_type(), vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(info.range(), 0x7ff_ffff);
        assert_eq!(info.stages(), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(info.name_hash, 42);
    }

    #[test]
    fn test_packed_word_sorts_by_set_then_binding() {
        // (set, binding) 在高位，u64 排序即 layout 排序
        let b_2_0 = binding(2, 0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let b_0_7 = binding(0, 7, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE);
        let b_0_3 = binding(0, 3, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT);
        let b_1_0 = binding(1, 0, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT);

        let mut infos = vec![b_2_0, b_0_7, b_0_3, b_1_0];
        infos.sort();

        let order: Vec<(u32, u32)> = infos.iter().map(|i| (i.set_index(), i.binding())).collect();
        assert_eq!(order, vec![(0, 3), (0, 7), (1, 0), (2, 0)]);
    }

    #[test]
    fn test_merge_unions_stage_bits() {
        let vs = binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let fs = binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT);

        let merged = merge_binding_infos(&[&[vs], &[fs]]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].stages(), vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_merge_detects_type_conflict() {
        let vs = binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let fs = binding(0, 0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::FRAGMENT);

        let result = merge_binding_infos(&[&[vs], &[fs]]);
        assert!(matches!(result, Err(PipelineError::BindingConflict { set: 0, binding: 0, .. })));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = binding(1, 2, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT);
        let b = binding(0, 1, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let c = binding(0, 0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE);

        let m1 = merge_binding_infos(&[&[a, b, c]]).unwrap();
        let m2 = merge_binding_infos(&[&[c], &[a], &[b]]).unwrap();
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_ray_tracing_stages_widen_to_all() {
        let info = binding(0, 0, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, vk::ShaderStageFlags::RAYGEN_KHR);
        assert_eq!(info.stages(), vk::ShaderStageFlags::ALL);
    }

    #[test]
    fn test_arg_hash_distinguishes_names() {
        assert_ne!(shader_arg_hash("u_camera"), shader_arg_hash("u_model"));
        assert_eq!(shader_arg_hash("u_camera"), shader_arg_hash("u_camera"));
    }
}
