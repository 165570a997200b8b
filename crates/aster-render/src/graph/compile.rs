//! rendergraph 编译
//!
//! 输入是 `RenderModule` 和 swapchain 资源句柄（隐式 root）。
//! 编译分两个阶段：
//!
//! 1. `ExecutionPlan::plan`：使用集合收集、声明校验、root 标记、剪枝、
//!    拓扑排序。此时 setup 回调还没有跑。
//! 2. `ExecutionPlan::finalize`：在 setup 回调淘汰掉被取消的 pass 之后，
//!    构建 sync chain、推导 barrier 和 attachment 的 load/store。

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use ash::vk;
use aster_gfx::pipelines::render_pass::{AttachmentDesc, render_pass_signature};
use indexmap::IndexMap;

use crate::{
    error::{RenderError, RendergraphError, ResourceError},
    graph::{
        dependency::DependencyGraph,
        handle::{ResourceHandle, ResourceKind, display_name},
        resource::{ImageInfo, ResourceInfo},
        state::RgImageState,
        sync_chain::{BufferBarrierDesc, ImageBarrierDesc, PassBarriers, SyncChain, SyncState},
        usage::ResourceUsage,
    },
    module::RenderModule,
    pass::{PassType, RenderPass},
};

/// plan 阶段的单个 pass 条目
pub struct PlanEntry {
    pub pass: Rc<RefCell<RenderPass>>,
    pub usages: Vec<ResourceUsage>,
    /// 已解析的 pass 尺寸（0,0 表示非 draw pass）
    pub extent: (u32, u32),
}

/// 剪枝和排序之后、sync chain 之前的执行计划
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
    declared: IndexMap<ResourceHandle, ResourceInfo>,
    swapchain: ResourceHandle,
}

/// 编译完成的 pass
pub struct CompiledPass {
    pub pass: Rc<RefCell<RenderPass>>,
    pub name: String,
    pub pass_type: PassType,
    pub extent: (u32, u32),
    pub usages: Vec<ResourceUsage>,

    /// 进入该 pass 前需要插入的 barrier
    pub barriers: PassBarriers,

    /// draw pass 的 attachment 描述（load/store 已推导）
    pub color_attachments: Vec<AttachmentDesc>,
    pub depth_stencil_attachment: Option<AttachmentDesc>,
    /// attachment 的句柄（颜色在前，depth 在最后），framebuffer 解析用
    pub attachment_handles: Vec<ResourceHandle>,
    pub clear_values: Vec<vk::ClearValue>,
    pub render_pass_signature: u64,

    /// (资源, pre 偏移, post 偏移)，指向该资源的 sync chain
    pub sync_offsets: Vec<(ResourceHandle, u32, u32)>,
}

impl std::fmt::Debug for CompiledPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPass")
            .field("name", &self.name)
            .field("pass_type", &self.pass_type)
            .field("extent", &self.extent)
            .field("usages", &self.usages)
            .field("barriers", &self.barriers)
            .field("color_attachments", &self.color_attachments)
            .field("depth_stencil_attachment", &self.depth_stencil_attachment)
            .field("attachment_handles", &self.attachment_handles)
            .field("render_pass_signature", &self.render_pass_signature)
            .field("sync_offsets", &self.sync_offsets)
            .finish()
    }
}

/// 编译结果
#[derive(Debug)]
pub struct Rendergraph {
    pub passes: Vec<CompiledPass>,
    pub sync_chains: HashMap<ResourceHandle, SyncChain>,
    /// 整帧末尾的收尾 barrier（swapchain → PRESENT、显式 final layout）
    pub final_barriers: PassBarriers,
    pub swapchain: ResourceHandle,
    pub declared: IndexMap<ResourceHandle, ResourceInfo>,
}

impl ExecutionPlan {
    /// 第一阶段：校验、root 标记、剪枝、拓扑排序
    pub fn plan(
        module: &RenderModule,
        swapchain: ResourceHandle,
        swapchain_info: Option<ImageInfo>,
    ) -> Result<Self, RenderError> {
        let mut declared = module.declared_resources().clone();
        if let Some(info) = swapchain_info {
            declared.insert(swapchain, ResourceInfo::Image(info));
        }

        // 1. 使用集合 + 声明校验 + 尺寸解析
        let mut usages_per_pass = vec![];
        let mut extents = vec![];
        for pass in module.passes() {
            let pass_ref = pass.borrow();
            let usages = pass_ref.collect_usages()?;

            for usage in &usages {
                if usage.handle != swapchain && !declared.contains_key(&usage.handle) {
                    return Err(ResourceError::NotDeclared {
                        pass: pass_ref.name().to_string(),
                        resource: display_name(usage.handle),
                    }
                    .into());
                }
            }

            extents.push(Self::resolve_extent(&pass_ref, &declared)?);
            usages_per_pass.push(usages);
        }

        // 2. 资源溯源
        let pass_count = module.passes().len();
        let mut reads: Vec<Vec<ResourceHandle>> = vec![vec![]; pass_count];
        let mut writes: Vec<Vec<ResourceHandle>> = vec![vec![]; pass_count];
        for (pass_idx, usages) in usages_per_pass.iter().enumerate() {
            for usage in usages {
                if usage.access.reads() {
                    reads[pass_idx].push(usage.handle);
                }
                if usage.access.writes() {
                    writes[pass_idx].push(usage.handle);
                }
            }
        }

        // 3. root 标记：显式 root ∪ swapchain writer，再沿 producer 边反向闭包
        let mut marked: Vec<bool> = module
            .passes()
            .iter()
            .enumerate()
            .map(|(i, p)| p.borrow().is_root() || writes[i].contains(&swapchain))
            .collect();

        let mut resource_writers: HashMap<ResourceHandle, Vec<usize>> = HashMap::new();
        for (pass_idx, written) in writes.iter().enumerate() {
            for &handle in written {
                resource_writers.entry(handle).or_default().push(pass_idx);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for pass_idx in 0..pass_count {
                if !marked[pass_idx] {
                    continue;
                }
                for &handle in &reads[pass_idx] {
                    for &writer in resource_writers.get(&handle).map(Vec::as_slice).unwrap_or_default() {
                        if writer != pass_idx && !marked[writer] {
                            marked[writer] = true;
                            changed = true;
                        }
                    }
                }
            }
        }

        if !marked.iter().any(|&m| m) {
            return Err(RendergraphError::NoRoot.into());
        }

        // 4. 剪枝
        let surviving: Vec<usize> = (0..pass_count).filter(|&i| marked[i]).collect();
        for (pass_idx, pass) in module.passes().iter().enumerate() {
            if !marked[pass_idx] {
                log::debug!("rendergraph: pruned pass `{}`", pass.borrow().name());
            }
        }

        let surviving_reads: Vec<Vec<ResourceHandle>> = surviving.iter().map(|&i| reads[i].clone()).collect();
        let surviving_writes: Vec<Vec<ResourceHandle>> = surviving.iter().map(|&i| writes[i].clone()).collect();
        let sort_keys: Vec<u64> = surviving.iter().map(|&i| module.passes()[i].borrow().sort_key()).collect();

        // 5. 拓扑排序（sort_key、插入顺序决定并列时的次序）
        let graph = DependencyGraph::analyze(&surviving_reads, &surviving_writes);
        let order = graph.topological_sort(&sort_keys).map_err(|cycle| {
            let passes = cycle.iter().map(|&i| module.passes()[surviving[i]].borrow().name().to_string()).collect();
            RendergraphError::Cycle { passes }
        })?;

        for (producer, consumer, edge) in graph.edges() {
            log::debug!(
                "rendergraph: edge `{}` -> `{}` over {:?}",
                module.passes()[surviving[producer]].borrow().name(),
                module.passes()[surviving[consumer]].borrow().name(),
                edge.resources,
            );
        }

        let entries = order
            .into_iter()
            .map(|local_idx| {
                let module_idx = surviving[local_idx];
                PlanEntry {
                    pass: module.passes()[module_idx].clone(),
                    usages: usages_per_pass[module_idx].clone(),
                    extent: extents[module_idx],
                }
            })
            .collect();

        Ok(Self {
            entries,
            declared,
            swapchain,
        })
    }

    /// pass 尺寸：显式给定则校验每个 attachment；否则取第一个 attachment
    fn resolve_extent(
        pass: &RenderPass,
        declared: &IndexMap<ResourceHandle, ResourceInfo>,
    ) -> Result<(u32, u32), ResourceError> {
        if pass.pass_type() != PassType::Draw {
            return Ok((0, 0));
        }

        let attachment_handles = pass
            .color_attachments()
            .iter()
            .map(|a| a.handle)
            .chain(pass.depth_stencil_attachment().map(|a| a.handle))
            .collect::<Vec<_>>();

        let (mut width, mut height) = pass.extent();
        for handle in attachment_handles {
            let Some(info) = declared.get(&handle).and_then(|i| i.as_image()) else {
                continue;
            };
            if width == 0 && height == 0 {
                (width, height) = (info.width, info.height);
            } else if info.width != width || info.height != height {
                return Err(ResourceError::ExtentMismatch {
                    pass: pass.name().to_string(),
                    resource: display_name(handle),
                    expected_width: width,
                    expected_height: height,
                    actual_width: info.width,
                    actual_height: info.height,
                });
            }
        }
        Ok((width, height))
    }

    #[inline]
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// setup 回调淘汰之后调用；`rejected` 是 `entries` 的下标
    pub fn remove_rejected(&mut self, rejected: &HashSet<usize>) {
        if rejected.is_empty() {
            return;
        }
        let mut idx = 0;
        self.entries.retain(|_| {
            let keep = !rejected.contains(&idx);
            idx += 1;
            keep
        });
    }

    /// 第二阶段：sync chain 构建与 attachment 推导
    pub fn finalize(self) -> Result<Rendergraph, RenderError> {
        let mut chains: HashMap<ResourceHandle, SyncChain> = HashMap::new();
        let mut compiled = vec![];

        // A. 状态时间线与 pre-pass barrier
        for entry in &self.entries {
            let pass_ref = entry.pass.borrow();
            let mut barriers = PassBarriers::new();
            let mut sync_offsets = vec![];

            for usage in &entry.usages {
                let chain = chains.entry(usage.handle).or_default();

                if chain.states.is_empty() {
                    if usage.access == crate::graph::usage::AccessKind::Read && usage.handle != self.swapchain {
                        return Err(RendergraphError::UnreachableResource {
                            resource: display_name(usage.handle),
                        }
                        .into());
                    }
                    // 条目 0：资源的初始状态
                    chain.append(SyncState::from_image_state(RgImageState::UNDEFINED));
                }

                let prev = *chain.last().unwrap();
                let next = SyncState {
                    stage: usage.stage,
                    access: usage.access_mask,
                    layout: usage.layout,
                };
                let offset = chain.append(next);
                sync_offsets.push((usage.handle, offset, offset));

                match usage.handle.kind() {
                    ResourceKind::Image => {
                        let aspect = self
                            .declared
                            .get(&usage.handle)
                            .and_then(|i| i.as_image())
                            .map(|i| i.aspect())
                            .unwrap_or(vk::ImageAspectFlags::COLOR);
                        barriers.add_image_barrier(ImageBarrierDesc::new(usage.handle, prev, next).with_aspect(aspect));
                    }
                    _ => {
                        barriers.add_buffer_barrier(BufferBarrierDesc::new(usage.handle, prev, next));
                    }
                }
            }

            compiled.push(CompiledPass {
                name: pass_ref.name().to_string(),
                pass_type: pass_ref.pass_type(),
                extent: entry.extent,
                usages: entry.usages.clone(),
                barriers,
                color_attachments: vec![],
                depth_stencil_attachment: None,
                attachment_handles: vec![],
                clear_values: vec![],
                render_pass_signature: 0,
                sync_offsets,
                pass: entry.pass.clone(),
            });
        }

        // B. 收尾 barrier：swapchain → PRESENT，显式 final layout
        let mut final_barriers = PassBarriers::new();
        if let Some(chain) = chains.get_mut(&self.swapchain)
            && let Some(&last) = chain.last()
        {
            let present = SyncState::from_image_state(RgImageState::PRESENT);
            chain.append(present);
            final_barriers.add_image_barrier(ImageBarrierDesc::new(self.swapchain, last, present));
        }
        for entry in &self.entries {
            let pass_ref = entry.pass.borrow();
            let declared_finals = pass_ref
                .color_attachments()
                .iter()
                .chain(pass_ref.depth_stencil_attachment())
                .filter_map(|a| a.final_layout.map(|l| (a.handle, l)))
                .collect::<Vec<_>>();
            for (handle, layout) in declared_finals {
                let chain = chains.entry(handle).or_default();
                let Some(&last) = chain.last() else { continue };
                if last.layout == layout {
                    continue;
                }
                let target = SyncState {
                    stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                    access: vk::AccessFlags2::NONE,
                    layout,
                };
                chain.append(target);
                let aspect = self
                    .declared
                    .get(&handle)
                    .and_then(|i| i.as_image())
                    .map(|i| i.aspect())
                    .unwrap_or(vk::ImageAspectFlags::COLOR);
                final_barriers.add_image_barrier(ImageBarrierDesc::new(handle, last, target).with_aspect(aspect));
            }
        }

        // C. draw pass 的 attachment 推导
        for compiled_pass in &mut compiled {
            if compiled_pass.pass_type != PassType::Draw {
                continue;
            }
            Self::infer_attachments(compiled_pass, &chains, &self.declared);
        }

        let rendergraph = Rendergraph {
            passes: compiled,
            sync_chains: chains,
            final_barriers,
            swapchain: self.swapchain,
            declared: self.declared,
        };
        rendergraph.dump_execution_plan();
        Ok(rendergraph)
    }

    fn infer_attachments(
        compiled_pass: &mut CompiledPass,
        chains: &HashMap<ResourceHandle, SyncChain>,
        declared: &IndexMap<ResourceHandle, ResourceInfo>,
    ) {
        let pass_ref = compiled_pass.pass.clone();
        let pass_ref = pass_ref.borrow();
        let samples = pass_ref.samples();

        let mut describe = |attachment: &crate::pass::AttachmentInfo, default_store_when_tail: vk::AttachmentStoreOp| {
            let handle = attachment.handle;
            let chain = &chains[&handle];
            let (_, pre, post) =
                *compiled_pass.sync_offsets.iter().find(|(h, _, _)| *h == handle).expect("attachment has no usage");

            // 条目 0 是初始的 UNDEFINED；偏移 1 就是链上的第一次真实使用
            let first_writer = pre == 1;
            let load_op = attachment.load_op.unwrap_or(if first_writer {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            });

            // 链上还有后续条目（消费者、PRESENT、显式 final layout）→ 必须 STORE
            let has_consumer = (post as usize) < chain.states.len() - 1;
            let store_op = attachment.store_op.unwrap_or(if has_consumer || pass_ref.is_root() {
                vk::AttachmentStoreOp::STORE
            } else {
                default_store_when_tail
            });

            let render_layout = chain.state_at(pre).layout;
            let format =
                declared.get(&handle).and_then(|i| i.as_image()).map(|i| i.format).unwrap_or(vk::Format::UNDEFINED);

            AttachmentDesc {
                format,
                samples,
                load_op,
                store_op,
                // layout 转换全部由显式 barrier 完成，render pass 自身不转换
                initial_layout: render_layout,
                final_layout: render_layout,
            }
        };

        let mut clear_values = vec![];
        let mut attachment_handles = vec![];

        let color_descs = pass_ref
            .color_attachments()
            .iter()
            .map(|a| {
                clear_values.push(a.clear_value);
                attachment_handles.push(a.handle);
                describe(a, vk::AttachmentStoreOp::STORE)
            })
            .collect::<Vec<_>>();

        let depth_desc = pass_ref.depth_stencil_attachment().map(|a| {
            clear_values.push(a.clear_value);
            attachment_handles.push(a.handle);
            describe(a, vk::AttachmentStoreOp::DONT_CARE)
        });

        compiled_pass.render_pass_signature = render_pass_signature(&color_descs, depth_desc.as_ref());
        compiled_pass.color_attachments = color_descs;
        compiled_pass.depth_stencil_attachment = depth_desc;
        compiled_pass.clear_values = clear_values;
        compiled_pass.attachment_handles = attachment_handles;
    }
}

impl Rendergraph {
    /// 一步完成编译（plan + finalize，不经过 setup 淘汰）
    pub fn compile(
        module: &RenderModule,
        swapchain: ResourceHandle,
        swapchain_info: Option<ImageInfo>,
    ) -> Result<Self, RenderError> {
        ExecutionPlan::plan(module, swapchain, swapchain_info)?.finalize()
    }

    /// 执行顺序中的 pass 名字
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    /// 诊断输出：执行计划与 sync chain
    pub fn dump_execution_plan(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        log::debug!("=== rendergraph execution plan ===");
        for (order, pass) in self.passes.iter().enumerate() {
            log::debug!(
                "[{}] `{}` ({:?}) - {} image barriers, {} buffer barriers",
                order,
                pass.name,
                pass.pass_type,
                pass.barriers.image_barriers.len(),
                pass.barriers.buffer_barriers.len(),
            );
        }
        for (handle, chain) in &self.sync_chains {
            log::debug!("chain {:?}:", handle);
            for (offset, state) in chain.states.iter().enumerate() {
                log::debug!("  [{}] stage={:?} access={:?} layout={:?}", offset, state.stage, state.access, state.layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::handle::{produce_buffer_handle, produce_image_handle};
    use crate::graph::state::RgBufferState;
    use crate::graph::usage::AccessKind;
    use crate::pass::AttachmentInfo;

    fn swapchain_info() -> ImageInfo {
        ImageInfo::new_2d(800, 600, vk::Format::B8G8R8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT)
    }

    /// E1: 单个 draw pass 写 swapchain
    #[test]
    fn test_triangle_to_swapchain_barriers() {
        let swapchain = produce_image_handle("compile-e1-swapchain");
        let mut module = RenderModule::new();
        module.add_pass(
            RenderPass::new("triangle", PassType::Draw)
                .add_color_attachment(AttachmentInfo::new(swapchain).with_clear_color([0.0, 0.0, 0.0, 1.0])),
        );

        let graph = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap();
        assert_eq!(graph.pass_names(), vec!["triangle"]);

        // acquire 之后：UNDEFINED → COLOR_ATTACHMENT
        let pre = &graph.passes[0].barriers.image_barriers;
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].src.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(pre[0].dst.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        // 帧末：COLOR_ATTACHMENT → PRESENT_SRC
        let fin = &graph.final_barriers.image_barriers;
        assert_eq!(fin.len(), 1);
        assert_eq!(fin[0].src.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(fin[0].dst.layout, vk::ImageLayout::PRESENT_SRC_KHR);

        // 首个 writer → CLEAR；swapchain 有 PRESENT 后继 → STORE
        let desc = &graph.passes[0].color_attachments[0];
        assert_eq!(desc.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.store_op, vk::AttachmentStoreOp::STORE);
    }

    /// E2: depth pre-pass + 主 pass
    #[test]
    fn test_depth_prepass_transition() {
        let swapchain = produce_image_handle("compile-e2-swapchain");
        let depth = produce_image_handle("compile-e2-depth");

        let mut module = RenderModule::new();
        module.declare_resource(
            depth,
            ResourceInfo::Image(ImageInfo::new_2d(
                800,
                600,
                vk::Format::D32_SFLOAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            )),
        );
        // 插入顺序故意反过来，拓扑排序应该纠正
        module.add_pass(
            RenderPass::new("main", PassType::Draw)
                .add_color_attachment(AttachmentInfo::new(swapchain))
                .sample_texture(depth),
        );
        module.add_pass(
            RenderPass::new("depth-prepass", PassType::Draw)
                .set_depth_stencil_attachment(AttachmentInfo::new(depth).with_clear_depth(1.0, 0)),
        );

        let graph = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap();
        assert_eq!(graph.pass_names(), vec!["depth-prepass", "main"]);

        // D 在两个 pass 之间：DEPTH_STENCIL_ATTACHMENT → SHADER_READ_ONLY
        let main_barriers = &graph.passes[1].barriers.image_barriers;
        let depth_barrier = main_barriers.iter().find(|b| b.handle == depth).unwrap();
        assert_eq!(depth_barrier.src.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth_barrier.dst.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(depth_barrier.aspect, vk::ImageAspectFlags::DEPTH);

        // depth 被后续 pass 消费 → STORE
        let prepass_depth = graph.passes[0].depth_stencil_attachment.as_ref().unwrap();
        assert_eq!(prepass_depth.store_op, vk::AttachmentStoreOp::STORE);
    }

    /// E3: 没有 root 消费的 pass 被剪掉
    #[test]
    fn test_unconsumed_pass_is_pruned() {
        let swapchain = produce_image_handle("compile-e3-swapchain");
        let orphan = produce_image_handle("compile-e3-orphan");

        let mut module = RenderModule::new();
        module.declare_resource(
            orphan,
            ResourceInfo::Image(ImageInfo::new_2d(128, 128, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT)),
        );
        module.add_pass(RenderPass::new("present", PassType::Draw).add_color_attachment(AttachmentInfo::new(swapchain)));
        module.add_pass(RenderPass::new("orphan", PassType::Draw).add_color_attachment(AttachmentInfo::new(orphan)));

        let graph = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap();
        assert_eq!(graph.pass_names(), vec!["present"]);
    }

    /// E4: 循环依赖报错并点名参与的 pass
    #[test]
    fn test_cycle_is_reported_with_names() {
        let swapchain = produce_image_handle("compile-e4-swapchain");
        let r1 = produce_buffer_handle("compile-e4-r1");
        let r2 = produce_buffer_handle("compile-e4-r2");

        let mut module = RenderModule::new();
        module.declare_resource(r1, ResourceInfo::Buffer(crate::graph::resource::BufferInfo::new(256, vk::BufferUsageFlags::STORAGE_BUFFER)));
        module.declare_resource(r2, ResourceInfo::Buffer(crate::graph::resource::BufferInfo::new(256, vk::BufferUsageFlags::STORAGE_BUFFER)));

        module.add_pass(
            RenderPass::new("P", PassType::Compute)
                .set_is_root(true)
                .use_resource(ResourceUsage::buffer(r1, AccessKind::Write, RgBufferState::STORAGE_READ_WRITE_COMPUTE))
                .use_resource(ResourceUsage::buffer(r2, AccessKind::Read, RgBufferState::STORAGE_READ_COMPUTE)),
        );
        module.add_pass(
            RenderPass::new("Q", PassType::Compute)
                .set_is_root(true)
                .use_resource(ResourceUsage::buffer(r2, AccessKind::Write, RgBufferState::STORAGE_READ_WRITE_COMPUTE))
                .use_resource(ResourceUsage::buffer(r1, AccessKind::Read, RgBufferState::STORAGE_READ_COMPUTE)),
        );

        let err = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap_err();
        match err {
            RenderError::Rendergraph(RendergraphError::Cycle { passes }) => {
                assert!(passes.contains(&"P".to_string()));
                assert!(passes.contains(&"Q".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_no_root_is_an_error() {
        let swapchain = produce_image_handle("compile-noroot-swapchain");
        let target = produce_image_handle("compile-noroot-target");

        let mut module = RenderModule::new();
        module.declare_resource(
            target,
            ResourceInfo::Image(ImageInfo::new_2d(64, 64, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT)),
        );
        module.add_pass(RenderPass::new("offscreen", PassType::Draw).add_color_attachment(AttachmentInfo::new(target)));

        let err = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap_err();
        assert!(matches!(err, RenderError::Rendergraph(RendergraphError::NoRoot)));
    }

    #[test]
    fn test_undeclared_resource_is_an_error() {
        let swapchain = produce_image_handle("compile-undeclared-swapchain");
        let ghost = produce_image_handle("compile-undeclared-ghost");

        let mut module = RenderModule::new();
        module.add_pass(
            RenderPass::new("haunted", PassType::Draw)
                .add_color_attachment(AttachmentInfo::new(swapchain))
                .sample_texture(ghost),
        );

        let err = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap_err();
        assert!(matches!(err, RenderError::Resource(ResourceError::NotDeclared { .. })));
    }

    #[test]
    fn test_read_without_producer_is_unreachable() {
        let swapchain = produce_image_handle("compile-unreachable-swapchain");
        let noise = produce_image_handle("compile-unreachable-noise");

        let mut module = RenderModule::new();
        module.declare_resource(
            noise,
            ResourceInfo::Image(ImageInfo::new_2d(800, 600, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED)),
        );
        module.add_pass(
            RenderPass::new("composite", PassType::Draw)
                .add_color_attachment(AttachmentInfo::new(swapchain))
                .sample_texture(noise),
        );

        let err = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap_err();
        assert!(matches!(err, RenderError::Rendergraph(RendergraphError::UnreachableResource { .. })));
    }

    #[test]
    fn test_extent_mismatch_is_an_error() {
        let swapchain = produce_image_handle("compile-extent-swapchain");
        let small = produce_image_handle("compile-extent-small");

        let mut module = RenderModule::new();
        module.declare_resource(
            small,
            ResourceInfo::Image(ImageInfo::new_2d(128, 128, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)),
        );
        module.add_pass(
            RenderPass::new("mismatched", PassType::Draw)
                .add_color_attachment(AttachmentInfo::new(swapchain))
                .set_depth_stencil_attachment(AttachmentInfo::new(small)),
        );

        let err = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap_err();
        assert!(matches!(err, RenderError::Resource(ResourceError::ExtentMismatch { .. })));
    }

    /// P1: 编译顺序是 (插入顺序, 声明, sort key) 的纯函数
    #[test]
    fn test_execution_order_is_deterministic() {
        let build_module = |suffix: &str| {
            let swapchain = produce_image_handle("compile-det-swapchain");
            let a = produce_image_handle(&format!("compile-det-a-{suffix}"));
            let b = produce_image_handle(&format!("compile-det-b-{suffix}"));

            let mut module = RenderModule::new();
            let info = ImageInfo::new_2d(800, 600, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED);
            module.declare_resource(a, ResourceInfo::Image(info));
            module.declare_resource(b, ResourceInfo::Image(info));

            module.add_pass(RenderPass::new("write-b", PassType::Draw).set_sort_key(2).add_color_attachment(AttachmentInfo::new(b)));
            module.add_pass(RenderPass::new("write-a", PassType::Draw).set_sort_key(1).add_color_attachment(AttachmentInfo::new(a)));
            module.add_pass(
                RenderPass::new("composite", PassType::Draw)
                    .add_color_attachment(AttachmentInfo::new(swapchain))
                    .sample_texture(a)
                    .sample_texture(b),
            );
            (module, swapchain)
        };

        let (m1, swapchain) = build_module("x");
        let g1 = Rendergraph::compile(&m1, swapchain, Some(swapchain_info())).unwrap();
        let (m2, _) = build_module("x2");
        let g2 = Rendergraph::compile(&m2, swapchain, Some(swapchain_info())).unwrap();

        // sort key 小的先执行
        assert_eq!(g1.pass_names(), vec!["write-a", "write-b", "composite"]);
        assert_eq!(g1.pass_names(), g2.pass_names());
    }

    /// P2: 相邻使用之间 barrier 的 src/dst 覆盖前后状态
    #[test]
    fn test_sync_chain_soundness() {
        let swapchain = produce_image_handle("compile-p2-swapchain");
        let color = produce_image_handle("compile-p2-color");

        let mut module = RenderModule::new();
        module.declare_resource(
            color,
            ResourceInfo::Image(ImageInfo::new_2d(
                800,
                600,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            )),
        );
        module.add_pass(RenderPass::new("scene", PassType::Draw).add_color_attachment(AttachmentInfo::new(color)));
        module.add_pass(
            RenderPass::new("post", PassType::Draw)
                .add_color_attachment(AttachmentInfo::new(swapchain))
                .sample_texture(color),
        );

        let graph = Rendergraph::compile(&module, swapchain, Some(swapchain_info())).unwrap();

        let chain = &graph.sync_chains[&color];
        // [UNDEFINED 初始, scene 写, post 读]
        assert_eq!(chain.states.len(), 3);

        for pass in &graph.passes {
            for barrier in &pass.barriers.image_barriers {
                let chain = &graph.sync_chains[&barrier.handle];
                let (_, pre, _) = *pass.sync_offsets.iter().find(|(h, _, _)| *h == barrier.handle).unwrap();
                // dst 恰好是本 pass 的 pre 状态，src 是链上前一个条目
                assert_eq!(barrier.dst, *chain.state_at(pre));
                assert_eq!(barrier.src, *chain.state_at(pre - 1));
            }
        }
    }
}
