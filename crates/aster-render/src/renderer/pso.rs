//! pipeline state object 注册表
//!
//! encoder 录制的是 PSO 句柄；真正的 `vk::Pipeline` 在回放时结合当前
//! render pass 的兼容性签名，从 `PipelineCache` 解析（或构建）。

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use aster_gfx::pipelines::{
    graphics_pipeline::ShaderGroupInfo,
    pipeline_cache::GraphicsPipelineDesc,
    shader::ShaderModuleRef,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GraphicsPsoHandle(u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComputePsoHandle(u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RayTracingPsoHandle(u64);

impl GraphicsPsoHandle {
    #[inline]
    pub fn key(&self) -> u64 {
        self.0
    }
}

impl ComputePsoHandle {
    #[inline]
    pub fn key(&self) -> u64 {
        self.0
    }
}

impl RayTracingPsoHandle {
    #[inline]
    pub fn key(&self) -> u64 {
        self.0
    }
}

/// ray tracing PSO 的描述
#[derive(Clone)]
pub struct RayTracingPsoDesc {
    pub stages: Vec<ShaderModuleRef>,
    /// group 0 约定为 raygen，接下来 `miss_group_count` 个是 miss，其余是 hit
    pub groups: Vec<ShaderGroupInfo>,
    pub miss_group_count: u32,
    pub max_recursion_depth: u32,
}

#[derive(Default)]
pub struct PsoRegistry {
    graphics: HashMap<u64, GraphicsPipelineDesc>,
    compute: HashMap<u64, ShaderModuleRef>,
    ray_tracing: HashMap<u64, RayTracingPsoDesc>,
}

impl PsoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 graphics PSO；内容相同的描述返回相同句柄
    pub fn register_graphics(&mut self, desc: GraphicsPipelineDesc) -> GraphicsPsoHandle {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        desc.state_hash().hash(&mut hasher);
        desc.shader_stages.hash(&mut hasher);
        let key = hasher.finish();

        self.graphics.entry(key).or_insert(desc);
        GraphicsPsoHandle(key)
    }

    pub fn register_compute(&mut self, shader: ShaderModuleRef) -> ComputePsoHandle {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        shader.hash(&mut hasher);
        let key = hasher.finish();

        self.compute.entry(key).or_insert(shader);
        ComputePsoHandle(key)
    }

    pub fn register_ray_tracing(&mut self, desc: RayTracingPsoDesc) -> RayTracingPsoHandle {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        desc.stages.hash(&mut hasher);
        desc.max_recursion_depth.hash(&mut hasher);
        desc.groups.len().hash(&mut hasher);
        let key = hasher.finish();

        self.ray_tracing.entry(key).or_insert(desc);
        RayTracingPsoHandle(key)
    }

    #[inline]
    pub fn graphics(&self, key: u64) -> Option<&GraphicsPipelineDesc> {
        self.graphics.get(&key)
    }

    #[inline]
    pub fn compute(&self, key: u64) -> Option<ShaderModuleRef> {
        self.compute.get(&key).copied()
    }

    #[inline]
    pub fn ray_tracing(&self, key: u64) -> Option<&RayTracingPsoDesc> {
        self.ray_tracing.get(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_graphics_desc_interns_to_same_handle() {
        let mut registry = PsoRegistry::new();
        let a = registry.register_graphics(GraphicsPipelineDesc::default());
        let b = registry.register_graphics(GraphicsPipelineDesc::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_state_gets_different_handle() {
        let mut registry = PsoRegistry::new();
        let a = registry.register_graphics(GraphicsPipelineDesc::default());

        let mut wireframe = GraphicsPipelineDesc::default();
        wireframe.polygon_mode = ash::vk::PolygonMode::LINE;
        let b = registry.register_graphics(wireframe);
        assert_ne!(a, b);
    }
}
