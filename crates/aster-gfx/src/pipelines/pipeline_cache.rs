//! pipeline interning
//!
//! graphics / compute / ray-tracing pipeline 共用一张表。
//! key 是固定功能状态 + shader digest + set layout 哈希 + render pass
//! 兼容性签名的内容哈希；每个 key 至多构建一次，其余调用方等待。

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::pipelines::shader::{ShaderModuleRef, VertexInputDesc};

/// 通用的 interning 表
///
/// - 并发读不阻塞
/// - 每个 key 一把构建锁，保证同一个 key 至多构建一次
/// - `invalidate_all` 递增 generation，旧条目在下次访问时重建
pub struct InternTable<V: Clone> {
    entries: RwLock<HashMap<u64, Slot<V>>>,
    build_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
    generation: AtomicU64,
    /// 被新 generation 顶替的旧值，teardown 时统一销毁
    retired: Mutex<Vec<V>>,
}

#[derive(Clone)]
struct Slot<V> {
    value: V,
    generation: u64,
}

impl<V: Clone> Default for InternTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> InternTable<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// 查表；不存在（或已失效）则调用 `build` 构建
    pub fn get_or_create<E>(&self, key: u64, build: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let current_gen = self.generation.load(Ordering::Acquire);

        if let Some(slot) = self.entries.read().get(&key)
            && slot.generation >= current_gen
        {
            return Ok(slot.value.clone());
        }

        let key_lock = self.build_locks.lock().entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = key_lock.lock();

        // 拿到构建锁之后可能已经有人建好了
        if let Some(slot) = self.entries.read().get(&key)
            && slot.generation >= current_gen
        {
            return Ok(slot.value.clone());
        }

        let value = build()?;
        let old = self.entries.write().insert(
            key,
            Slot {
                value: value.clone(),
                generation: current_gen,
            },
        );
        if let Some(old) = old {
            self.retired.lock().push(old.value);
        }
        Ok(value)
    }

    /// 整表失效；条目保留，在下次访问时按需重建
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// 取出所有 value（含被顶替的旧值），用于 teardown
    pub fn drain(&mut self) -> Vec<V> {
        let mut values: Vec<V> = self.entries.get_mut().drain().map(|(_, slot)| slot.value).collect();
        values.append(self.retired.get_mut());
        values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// 每个 color attachment 的 blend 状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl BlendState {
    pub fn alpha_blend() -> Self {
        Self {
            enable: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

/// graphics pipeline 的固定功能状态 + shader stage 引用
///
/// `vertex_input` 为 None 时从 vertex shader 的反射推导。
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub shader_stages: Vec<ShaderModuleRef>,

    pub vertex_input: Option<VertexInputDesc>,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,

    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,

    pub samples: vk::SampleCountFlags,

    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,

    /// 与 color attachment 一一对应
    pub blend_states: Vec<BlendState>,

    pub patch_control_points: u32,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            shader_stages: vec![],
            vertex_input: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            stencil_test: false,
            blend_states: vec![BlendState::default()],
            patch_control_points: 0,
        }
    }
}

impl GraphicsPipelineDesc {
    /// 固定功能状态的哈希（不含 shader digest 和 layout，它们单独参与 key）
    pub fn state_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        if let Some(vertex_input) = &self.vertex_input {
            vertex_input.hash(&mut hasher);
        }
        self.topology.hash(&mut hasher);
        self.primitive_restart.hash(&mut hasher);
        self.polygon_mode.hash(&mut hasher);
        self.cull_mode.hash(&mut hasher);
        self.front_face.hash(&mut hasher);
        self.line_width.to_bits().hash(&mut hasher);
        self.samples.hash(&mut hasher);
        self.depth_test.hash(&mut hasher);
        self.depth_write.hash(&mut hasher);
        self.depth_compare.hash(&mut hasher);
        self.stencil_test.hash(&mut hasher);
        self.blend_states.hash(&mut hasher);
        self.patch_control_points.hash(&mut hasher);
        hasher.finish()
    }
}

/// 组合出最终的 pipeline key
pub fn pipeline_key(
    state_hash: u64,
    shader_digests: &[u64],
    set_layout_hashes: &[u64],
    render_pass_signature: u64,
) -> u64 {
    let mut digests = shader_digests.to_vec();
    digests.sort_unstable();

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    state_hash.hash(&mut hasher);
    digests.hash(&mut hasher);
    set_layout_hashes.hash(&mut hasher);
    render_pass_signature.hash(&mut hasher);
    hasher.finish()
}

/// pipeline 与 pipeline layout 的 interning 表
///
/// 默认不做淘汰；shader 热重载通过 `invalidate_pipelines` 触发惰性重建。
#[derive(Default)]
pub struct PipelineCache {
    pub(crate) pipelines: InternTable<vk::Pipeline>,
    pub(crate) pipeline_layouts: InternTable<vk::PipelineLayout>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn pipelines(&self) -> &InternTable<vk::Pipeline> {
        &self.pipelines
    }

    #[inline]
    pub fn pipeline_layouts(&self) -> &InternTable<vk::PipelineLayout> {
        &self.pipeline_layouts
    }

    /// shader 重载后调用：所有 pipeline 下次使用时重建
    pub fn invalidate_pipelines(&self) {
        self.pipelines.invalidate_all();
    }

    /// device teardown 时调用
    pub fn destroy(mut self) {
        let device = crate::gfx::Gfx::get().device();
        unsafe {
            for pipeline in self.pipelines.drain() {
                device.destroy_pipeline(pipeline, None);
            }
            for layout in self.pipeline_layouts.drain() {
                device.destroy_pipeline_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_equal_keys_build_once() {
        // 相同 key 的两次请求只触发一次构建
        let table: InternTable<usize> = InternTable::new();
        let builds = AtomicUsize::new(0);

        let build = || -> Result<usize, ()> {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        };

        let a = table.get_or_create(0x1234, build).unwrap();
        let b = table
            .get_or_create(0x1234, || -> Result<usize, ()> {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(8)
            })
            .unwrap();

        assert_eq!(a, 7);
        assert_eq!(b, 7);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_build_error_is_not_cached() {
        let table: InternTable<usize> = InternTable::new();

        let failed = table.get_or_create(1, || -> Result<usize, &str> { Err("nope") });
        assert!(failed.is_err());

        let ok = table.get_or_create(1, || -> Result<usize, &str> { Ok(3) }).unwrap();
        assert_eq!(ok, 3);
    }

    #[test]
    fn test_invalidate_rebuilds_on_next_access() {
        let table: InternTable<usize> = InternTable::new();
        let builds = AtomicUsize::new(0);

        let mut build = || {
            let n = builds.fetch_add(1, Ordering::SeqCst);
            Ok::<usize, ()>(n)
        };

        assert_eq!(table.get_or_create(9, &mut build).unwrap(), 0);
        assert_eq!(table.get_or_create(9, &mut build).unwrap(), 0);

        table.invalidate_all();
        assert_eq!(table.get_or_create(9, &mut build).unwrap(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pipeline_key_ignores_shader_order() {
        let key1 = pipeline_key(11, &[1, 2, 3], &[7], 99);
        let key2 = pipeline_key(11, &[3, 1, 2], &[7], 99);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_pipeline_key_depends_on_render_pass_signature() {
        let key1 = pipeline_key(11, &[1], &[7], 99);
        let key2 = pipeline_key(11, &[1], &[7], 100);
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_state_hash_distinguishes_fixed_function_state() {
        let desc = GraphicsPipelineDesc::default();
        let mut culled = GraphicsPipelineDesc::default();
        culled.cull_mode = vk::CullModeFlags::BACK;

        assert_eq!(desc.state_hash(), GraphicsPipelineDesc::default().state_hash());
        assert_ne!(desc.state_hash(), culled.state_hash());
    }
}
