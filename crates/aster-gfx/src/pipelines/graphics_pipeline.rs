//! 从 `GraphicsPipelineDesc` 构建 `vk::Pipeline`
//!
//! 先解析 shader 反射、合并 descriptor layout，再按内容哈希查
//! `PipelineCache`，未命中才真正调用 `vkCreate*Pipelines`。

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::{
    error::PipelineError,
    gfx::Gfx,
    pipelines::{
        binding::{ShaderBindingInfo, merge_binding_infos},
        descriptor_layout::{DescriptorSetLayout, DescriptorSetLayoutCache},
        pipeline_cache::{GraphicsPipelineDesc, PipelineCache, pipeline_key},
        shader::{ShaderModuleCache, ShaderModuleRef, VertexInputDesc},
    },
};

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// 构建完成的 pipeline 以及绑定参数需要的 layout 信息
#[derive(Clone)]
pub struct BoundPipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    /// set index → layout；参数更新时按 set 查找
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

/// 解析各 stage 的反射，按 set 分组并合并
fn resolve_set_layouts(
    shader_cache: &ShaderModuleCache,
    layout_cache: &DescriptorSetLayoutCache,
    stages: &[ShaderModuleRef],
) -> Result<(Vec<u64>, Vec<Arc<DescriptorSetLayout>>), PipelineError> {
    let per_stage: Vec<&[ShaderBindingInfo]> = stages
        .iter()
        .map(|&s| {
            shader_cache
                .get(s)
                .map(|m| m.compiled.bindings.as_slice())
                .ok_or_else(|| PipelineError::LayoutMismatch {
                    reason: "stale shader module reference".to_string(),
                })
        })
        .try_collect()?;

    let merged = merge_binding_infos(&per_stage)?;

    let set_count = merged.iter().map(|b| b.set_index() + 1).max().unwrap_or(0);

    let mut hashes = Vec::with_capacity(set_count as usize);
    let mut layouts = Vec::with_capacity(set_count as usize);
    for set_index in 0..set_count {
        // merged 已按 (set, binding) 排序，直接切片
        let set_bindings = merged.iter().filter(|b| b.set_index() == set_index).copied().collect_vec();
        let (hash, layout) = layout_cache.get_or_create(&set_bindings);
        hashes.push(hash);
        layouts.push(layout);
    }
    Ok((hashes, layouts))
}

/// 合并所有 stage 的 push constant range
fn merge_push_constants(shader_cache: &ShaderModuleCache, stages: &[ShaderModuleRef]) -> Vec<vk::PushConstantRange> {
    let mut ranges: Vec<vk::PushConstantRange> = vec![];
    for &stage in stages {
        let Some(module) = shader_cache.get(stage) else { continue };
        for range in &module.compiled.push_constants {
            match ranges.iter_mut().find(|r| r.offset == range.offset && r.size == range.size) {
                Some(existing) => existing.stage_flags |= range.stage_flags,
                None => ranges.push(*range),
            }
        }
    }
    ranges
}

fn intern_pipeline_layout(
    pipeline_cache: &PipelineCache,
    set_layout_hashes: &[u64],
    set_layouts: &[Arc<DescriptorSetLayout>],
    push_constants: &[vk::PushConstantRange],
) -> vk::PipelineLayout {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    set_layout_hashes.hash(&mut hasher);
    for range in push_constants {
        (range.stage_flags, range.offset, range.size).hash(&mut hasher);
    }
    let key = hasher.finish();

    pipeline_cache
        .pipeline_layouts()
        .get_or_create(key, || {
            let vk_set_layouts = set_layouts.iter().map(|l| l.vk_layout).collect_vec();
            let layout_ci = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&vk_set_layouts)
                .push_constant_ranges(push_constants);
            Ok::<_, std::convert::Infallible>(unsafe {
                Gfx::get().device().create_pipeline_layout(&layout_ci, None).unwrap()
            })
        })
        .unwrap()
}

/// 构建（或命中缓存的）graphics pipeline
pub fn get_or_create_graphics_pipeline(
    desc: &GraphicsPipelineDesc,
    shader_cache: &mut ShaderModuleCache,
    layout_cache: &DescriptorSetLayoutCache,
    pipeline_cache: &PipelineCache,
    render_pass: vk::RenderPass,
    render_pass_signature: u64,
    debug_name: &str,
) -> Result<BoundPipeline, PipelineError> {
    let (set_layout_hashes, set_layouts) = resolve_set_layouts(shader_cache, layout_cache, &desc.shader_stages)?;
    let push_constants = merge_push_constants(shader_cache, &desc.shader_stages);
    let pipeline_layout = intern_pipeline_layout(pipeline_cache, &set_layout_hashes, &set_layouts, &push_constants);

    let shader_digests = desc.shader_stages.iter().filter_map(|&s| shader_cache.get(s).map(|m| m.digest)).collect_vec();
    let key = pipeline_key(desc.state_hash(), &shader_digests, &set_layout_hashes, render_pass_signature);

    let pipeline = pipeline_cache.pipelines().get_or_create(key, || {
        create_graphics_pipeline(desc, shader_cache, pipeline_layout, render_pass, debug_name)
    })?;

    Ok(BoundPipeline {
        pipeline,
        pipeline_layout,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        set_layouts,
    })
}

fn create_graphics_pipeline(
    desc: &GraphicsPipelineDesc,
    shader_cache: &mut ShaderModuleCache,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    debug_name: &str,
) -> Result<vk::Pipeline, PipelineError> {
    // shader stage
    let mut stage_infos = vec![];
    let mut vertex_reflection: Option<VertexInputDesc> = None;
    for &stage_ref in &desc.shader_stages {
        let module = shader_cache.get_mut(stage_ref).ok_or_else(|| PipelineError::LayoutMismatch {
            reason: "stale shader module reference".to_string(),
        })?;
        if module.stage == vk::ShaderStageFlags::VERTEX {
            vertex_reflection = module.compiled.vertex_input.clone();
        }
        stage_infos.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(module.stage)
                .module(module.vk_module())
                .name(SHADER_ENTRY),
        );
    }

    // 顶点输入：显式声明优先，否则用 vertex shader 的反射
    let vertex_input = desc.vertex_input.clone().or(vertex_reflection).unwrap_or_default();
    let attribute_descs = vertex_input
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: a.binding,
            format: a.format,
            offset: a.offset,
        })
        .collect_vec();
    let binding_descs = vertex_input
        .bindings
        .iter()
        .map(|b| vk::VertexInputBindingDescription {
            binding: b.binding,
            stride: b.stride,
            input_rate: b.input_rate,
        })
        .collect_vec();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_attribute_descriptions(&attribute_descs)
        .vertex_binding_descriptions(&binding_descs);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(desc.topology)
        .primitive_restart_enable(desc.primitive_restart);

    let tessellation_state =
        vk::PipelineTessellationStateCreateInfo::default().patch_control_points(desc.patch_control_points);

    // viewport/scissor 运行时动态设置
    let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(desc.polygon_mode)
        .cull_mode(desc.cull_mode)
        .front_face(desc.front_face)
        .line_width(desc.line_width);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(desc.samples);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(desc.depth_compare)
        .stencil_test_enable(desc.stencil_test);

    let blend_attachments = desc
        .blend_states
        .iter()
        .map(|b| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(b.enable)
                .src_color_blend_factor(b.src_color)
                .dst_color_blend_factor(b.dst_color)
                .color_blend_op(b.color_op)
                .src_alpha_blend_factor(b.src_alpha)
                .dst_alpha_blend_factor(b.dst_alpha)
                .alpha_blend_op(b.alpha_op)
                .color_write_mask(b.write_mask)
        })
        .collect_vec();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR, vk::DynamicState::LINE_WIDTH];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stage_infos)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .tessellation_state(&tessellation_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipeline = unsafe {
        Gfx::get()
            .device()
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
            .map_err(|(_, e)| PipelineError::LayoutMismatch {
                reason: format!("vkCreateGraphicsPipelines failed: {e:?}"),
            })?[0]
    };
    Gfx::get().device().set_object_debug_name(pipeline, format!("Pipeline::{debug_name}"));
    Ok(pipeline)
}

/// 构建（或命中缓存的）compute pipeline
pub fn get_or_create_compute_pipeline(
    shader: ShaderModuleRef,
    shader_cache: &mut ShaderModuleCache,
    layout_cache: &DescriptorSetLayoutCache,
    pipeline_cache: &PipelineCache,
    debug_name: &str,
) -> Result<BoundPipeline, PipelineError> {
    let stages = [shader];
    let (set_layout_hashes, set_layouts) = resolve_set_layouts(shader_cache, layout_cache, &stages)?;
    let push_constants = merge_push_constants(shader_cache, &stages);
    let pipeline_layout = intern_pipeline_layout(pipeline_cache, &set_layout_hashes, &set_layouts, &push_constants);

    let digest = shader_cache.get(shader).map(|m| m.digest).unwrap_or_default();
    let key = pipeline_key(0, &[digest], &set_layout_hashes, 0);

    let pipeline = pipeline_cache.pipelines().get_or_create(key, || {
        let module = shader_cache.get_mut(shader).ok_or_else(|| PipelineError::LayoutMismatch {
            reason: "stale shader module reference".to_string(),
        })?;

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module.vk_module())
            .name(SHADER_ENTRY);

        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(pipeline_layout);
        let pipeline = unsafe {
            Gfx::get()
                .device()
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
                .map_err(|(_, e)| PipelineError::LayoutMismatch {
                    reason: format!("vkCreateComputePipelines failed: {e:?}"),
                })?[0]
        };
        Gfx::get().device().set_object_debug_name(pipeline, format!("Pipeline::{debug_name}"));
        Ok(pipeline)
    })?;

    Ok(BoundPipeline {
        pipeline,
        pipeline_layout,
        bind_point: vk::PipelineBindPoint::COMPUTE,
        set_layouts,
    })
}

/// ray tracing shader group（pipeline create info 中的 group 描述）
#[derive(Clone, Copy, Debug)]
pub struct ShaderGroupInfo {
    pub ty: vk::RayTracingShaderGroupTypeKHR,
    pub general: u32,
    pub closest_hit: u32,
    pub any_hit: u32,
    pub intersection: u32,
}

impl ShaderGroupInfo {
    pub const fn unused() -> Self {
        Self {
            ty: vk::RayTracingShaderGroupTypeKHR::GENERAL,
            general: vk::SHADER_UNUSED_KHR,
            closest_hit: vk::SHADER_UNUSED_KHR,
            any_hit: vk::SHADER_UNUSED_KHR,
            intersection: vk::SHADER_UNUSED_KHR,
        }
    }

    pub const fn general(index: u32) -> Self {
        let mut info = Self::unused();
        info.general = index;
        info
    }
}

/// 构建（或命中缓存的）ray tracing pipeline
pub fn get_or_create_ray_tracing_pipeline(
    stages: &[ShaderModuleRef],
    groups: &[ShaderGroupInfo],
    max_recursion_depth: u32,
    shader_cache: &mut ShaderModuleCache,
    layout_cache: &DescriptorSetLayoutCache,
    pipeline_cache: &PipelineCache,
    debug_name: &str,
) -> Result<BoundPipeline, PipelineError> {
    let (set_layout_hashes, set_layouts) = resolve_set_layouts(shader_cache, layout_cache, stages)?;
    let push_constants = merge_push_constants(shader_cache, stages);
    let pipeline_layout = intern_pipeline_layout(pipeline_cache, &set_layout_hashes, &set_layouts, &push_constants);

    let shader_digests = stages.iter().filter_map(|&s| shader_cache.get(s).map(|m| m.digest)).collect_vec();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for group in groups {
        (group.ty, group.general, group.closest_hit, group.any_hit, group.intersection).hash(&mut hasher);
    }
    max_recursion_depth.hash(&mut hasher);
    let key = pipeline_key(hasher.finish(), &shader_digests, &set_layout_hashes, 0);

    let pipeline = pipeline_cache.pipelines().get_or_create(key, || {
        let mut stage_infos = vec![];
        for &stage_ref in stages {
            let module = shader_cache.get_mut(stage_ref).ok_or_else(|| PipelineError::LayoutMismatch {
                reason: "stale shader module reference".to_string(),
            })?;
            stage_infos.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(module.stage)
                    .module(module.vk_module())
                    .name(SHADER_ENTRY),
            );
        }

        let group_infos = groups
            .iter()
            .map(|g| {
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(g.ty)
                    .general_shader(g.general)
                    .closest_hit_shader(g.closest_hit)
                    .any_hit_shader(g.any_hit)
                    .intersection_shader(g.intersection)
            })
            .collect_vec();

        let pipeline_ci = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stage_infos)
            .groups(&group_infos)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(pipeline_layout);

        let pipeline = unsafe {
            Gfx::get()
                .device()
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&pipeline_ci),
                    None,
                )
                .map_err(|e| PipelineError::LayoutMismatch {
                    reason: format!("vkCreateRayTracingPipelinesKHR failed: {e:?}"),
                })?[0]
        };
        Gfx::get().device().set_object_debug_name(pipeline, format!("Pipeline::{debug_name}"));
        Ok(pipeline)
    })?;

    Ok(BoundPipeline {
        pipeline,
        pipeline_layout,
        bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
        set_layouts,
    })
}
