//! 命令流回放
//!
//! 把每个 pass 的 encoder 字节流翻译成 `vk::CommandBuffer` 调用：
//! 在 pass 之间插入 sync chain 推导出的 barrier，draw pass 包在
//! render pass scope 里，参数记录收集成 `DescriptorData` 数组后用
//! update template 一次写入。

use std::collections::HashMap;

use ash::vk;
use aster_gfx::{
    commands::command_buffer::GfxCommandBuffer,
    gfx::Gfx,
    pipelines::{
        binding::DescriptorData,
        descriptor_layout::DescriptorSetLayoutCache,
        graphics_pipeline::{
            BoundPipeline, get_or_create_compute_pipeline, get_or_create_graphics_pipeline,
            get_or_create_ray_tracing_pipeline,
        },
        pipeline_cache::PipelineCache,
        render_pass::{FramebufferCache, FramebufferKey, RenderPassCache},
        shader::{ShaderCompiler, ShaderModuleCache},
    },
    resources::{
        buffer::GfxBuffer,
        image::GfxImage,
        image_view::{GfxImageView, GfxImageViewDesc},
    },
};
use itertools::Itertools;

use crate::{
    encoder::{
        command::{BUFFER_SOURCE_SCRATCH, Command, CommandStream},
        encoder::CommandEncoder,
    },
    error::{PipelineError, RenderError},
    graph::{
        compile::{CompiledPass, Rendergraph},
        handle::{ResourceHandle, display_name},
        resource::{BufferInfo, ImageInfo, ResourceInfo},
        sync_chain::PassBarriers,
    },
    pass::PassType,
    renderer::{frame_context::FrameContext, pso::PsoRegistry},
};

/// 声明出来的资源对应的物理对象
enum PhysicalResource {
    Image { image: GfxImage, view: GfxImageView },
    Buffer { buffer: GfxBuffer },
}

/// 加速结构对象（BLAS/TLAS 共用）
pub struct AccelerationStructure {
    pub vk_handle: vk::AccelerationStructureKHR,
    pub device_address: vk::DeviceAddress,
    _buffer: GfxBuffer,
}

/// BLAS 的几何描述；app 在 build 之前注册
#[derive(Clone, Copy, Debug)]
pub struct BlasGeometryDesc {
    pub vertex_buffer: ResourceHandle,
    pub vertex_format: vk::Format,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_buffer: Option<ResourceHandle>,
    pub index_type: vk::IndexType,
    pub primitive_count: u32,
}

/// shader binding table（每个 RT pipeline 一份，惰性构建）
struct SbtRegions {
    _buffer: GfxBuffer,
    raygen: vk::StridedDeviceAddressRegionKHR,
    miss: vk::StridedDeviceAddressRegionKHR,
    hit: vk::StridedDeviceAddressRegionKHR,
    callable: vk::StridedDeviceAddressRegionKHR,
}

#[derive(Clone, Copy)]
struct RtProps {
    handle_size: u32,
    handle_alignment: u32,
    base_alignment: u32,
}

pub struct RenderBackend {
    pub shader_cache: ShaderModuleCache,
    pub layout_cache: DescriptorSetLayoutCache,
    pub pipeline_cache: PipelineCache,
    pub render_pass_cache: RenderPassCache,
    pub framebuffer_cache: FramebufferCache,
    pub pso_registry: PsoRegistry,

    resources: HashMap<ResourceHandle, PhysicalResource>,
    acceleration_structures: HashMap<ResourceHandle, AccelerationStructure>,
    blas_geometry: HashMap<ResourceHandle, BlasGeometryDesc>,

    sbt_cache: HashMap<u64, SbtRegions>,
    rt_props: Option<RtProps>,
    default_sampler: Option<vk::Sampler>,

    /// 本帧 swapchain 句柄与物理 image 的绑定，execute 期间有效
    swapchain_binding: Option<(ResourceHandle, vk::Image, vk::ImageView)>,
}

impl RenderBackend {
    pub fn new(compiler: Box<dyn ShaderCompiler>, hot_reload: bool) -> Self {
        Self {
            shader_cache: ShaderModuleCache::new(compiler, hot_reload),
            layout_cache: DescriptorSetLayoutCache::new(),
            pipeline_cache: PipelineCache::new(),
            render_pass_cache: RenderPassCache::new(),
            framebuffer_cache: FramebufferCache::new(),
            pso_registry: PsoRegistry::new(),
            resources: HashMap::new(),
            acceleration_structures: HashMap::new(),
            blas_geometry: HashMap::new(),
            sbt_cache: HashMap::new(),
            rt_props: None,
            default_sampler: None,
            swapchain_binding: None,
        }
    }

    /// 注册 BLAS 的几何输入；`build_blas` 回放时查表
    pub fn register_blas_geometry(&mut self, blas: ResourceHandle, desc: BlasGeometryDesc) {
        self.blas_geometry.insert(blas, desc);
    }

    pub fn acceleration_structure(&self, handle: ResourceHandle) -> Option<&AccelerationStructure> {
        self.acceleration_structures.get(&handle)
    }

    /// 为声明的资源创建物理对象（已存在的跳过）
    pub fn prepare_resources(&mut self, graph: &Rendergraph) {
        for (&handle, info) in &graph.declared {
            if handle == graph.swapchain || self.resources.contains_key(&handle) {
                continue;
            }
            let name = display_name(handle);
            let physical = match info {
                ResourceInfo::Image(image_info) => Self::create_image(image_info, &name),
                ResourceInfo::Buffer(buffer_info) => Self::create_buffer(buffer_info, &name),
            };
            self.resources.insert(handle, physical);
        }
    }

    fn create_image(info: &ImageInfo, name: &str) -> PhysicalResource {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: info.depth,
            })
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(info.samples)
            .tiling(info.tiling)
            .usage(info.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = GfxImage::new(&image_ci, name);
        let view = GfxImageView::new(&image, GfxImageViewDesc::new_2d(info.format, info.aspect()), name);
        PhysicalResource::Image { image, view }
    }

    fn create_buffer(info: &BufferInfo, name: &str) -> PhysicalResource {
        PhysicalResource::Buffer {
            buffer: GfxBuffer::new(info.size, info.usage, None, false, name),
        }
    }

    fn resolve_image(&self, handle: ResourceHandle) -> (vk::Image, vk::ImageView) {
        if let Some((swapchain, image, view)) = self.swapchain_binding
            && handle == swapchain
        {
            return (image, view);
        }
        match self.resources.get(&handle) {
            Some(PhysicalResource::Image { image, view }) => (image.vk_image(), view.vk_image_view()),
            _ => panic!("image resource `{}` has no physical backing", display_name(handle)),
        }
    }

    fn resolve_buffer(&self, handle: ResourceHandle) -> vk::Buffer {
        match self.resources.get(&handle) {
            Some(PhysicalResource::Buffer { buffer }) => buffer.vk_buffer(),
            _ => panic!("buffer resource `{}` has no physical backing", display_name(handle)),
        }
    }

    fn resolve_buffer_address(&self, handle: ResourceHandle) -> vk::DeviceAddress {
        match self.resources.get(&handle) {
            Some(PhysicalResource::Buffer { buffer }) => buffer.device_address(),
            _ => panic!("buffer resource `{}` has no physical backing", display_name(handle)),
        }
    }

    fn default_sampler(&mut self) -> vk::Sampler {
        *self.default_sampler.get_or_insert_with(|| {
            let sampler_ci = vk::SamplerCreateInfo::default()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(vk::LOD_CLAMP_NONE);
            unsafe { Gfx::get().device().create_sampler(&sampler_ci, None).unwrap() }
        })
    }

    /// 整帧回放：barrier + pass 命令流 + 收尾 barrier
    pub fn execute(
        &mut self,
        graph: &Rendergraph,
        encoders: &[CommandEncoder],
        frame: &mut FrameContext,
        swapchain_image: (vk::Image, vk::ImageView),
    ) -> Result<GfxCommandBuffer, RenderError> {
        debug_assert_eq!(graph.passes.len(), encoders.len());
        self.swapchain_binding = Some((graph.swapchain, swapchain_image.0, swapchain_image.1));

        let cmd = frame.alloc_command_buffer("graph-execute");
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "rendergraph");

        for (pass, encoder) in graph.passes.iter().zip(encoders.iter()) {
            self.record_barriers(&cmd, &pass.barriers);

            cmd.begin_label(&pass.name);
            let render_scope = if pass.pass_type == PassType::Draw {
                Some(self.begin_draw_pass(&cmd, pass))
            } else {
                None
            };

            let signature = render_scope.as_ref().map(|s| s.1).unwrap_or(0);
            let render_pass = render_scope.as_ref().map(|s| s.0).unwrap_or(vk::RenderPass::null());
            self.replay(&cmd, encoder, pass, frame, render_pass, signature)?;

            if render_scope.is_some() {
                cmd.end_render_pass();
            }
            cmd.end_label();
        }

        self.record_barriers(&cmd, &graph.final_barriers);
        cmd.end();
        self.swapchain_binding = None;
        Ok(cmd)
    }

    fn record_barriers(&self, cmd: &GfxCommandBuffer, barriers: &PassBarriers) {
        if !barriers.has_barriers() {
            return;
        }

        let image_barriers = barriers
            .image_barriers
            .iter()
            .map(|desc| {
                let (image, _) = self.resolve_image(desc.handle);
                desc.to_gfx_barrier(image)
            })
            .collect_vec();
        if !image_barriers.is_empty() {
            cmd.image_memory_barrier(&image_barriers);
        }

        let buffer_barriers = barriers
            .buffer_barriers
            .iter()
            .map(|desc| desc.to_gfx_barrier(self.resolve_buffer(desc.handle)))
            .collect_vec();
        if !buffer_barriers.is_empty() {
            cmd.buffer_memory_barrier(&buffer_barriers);
        }
    }

    /// render pass + framebuffer，返回 (render pass, 兼容性签名)
    fn begin_draw_pass(&mut self, cmd: &GfxCommandBuffer, pass: &CompiledPass) -> (vk::RenderPass, u64) {
        let (signature, render_pass) = self.render_pass_cache.get_or_create(
            &pass.color_attachments,
            pass.depth_stencil_attachment.as_ref(),
            &pass.name,
        );

        let views = pass.attachment_handles.iter().map(|&handle| self.resolve_image(handle).1).collect_vec();

        let (width, height) = pass.extent;
        let framebuffer = self.framebuffer_cache.get_or_create(
            FramebufferKey {
                signature,
                attachments: views,
                width,
                height,
            },
            render_pass,
        );

        let extent = vk::Extent2D { width, height };
        cmd.begin_render_pass(render_pass, framebuffer, extent, &pass.clear_values);

        // 默认覆盖整个 attachment；encoder 里可以覆写
        cmd.set_viewport(
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        cmd.set_scissor(0, &[vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }]);

        (render_pass, signature)
    }

    fn replay(
        &mut self,
        cmd: &GfxCommandBuffer,
        encoder: &CommandEncoder,
        pass: &CompiledPass,
        frame: &mut FrameContext,
        render_pass: vk::RenderPass,
        render_pass_signature: u64,
    ) -> Result<(), RenderError> {
        let mut pipeline: Option<BoundPipeline> = None;
        let mut current_rt_pso: Option<u64> = None;
        let mut args: HashMap<u64, ArgValue> = HashMap::new();
        let mut args_dirty = false;

        for command in CommandStream::new(encoder.stream()) {
            match command {
                Command::BindGraphicsPipeline(bind) => {
                    let desc = self
                        .pso_registry
                        .graphics(bind.pso)
                        .ok_or_else(|| PipelineError::LayoutMismatch {
                            reason: format!("unknown graphics pso key {:#x} in pass `{}`", bind.pso, pass.name),
                        })?
                        .clone();
                    let bound = get_or_create_graphics_pipeline(
                        &desc,
                        &mut self.shader_cache,
                        &self.layout_cache,
                        &self.pipeline_cache,
                        render_pass,
                        render_pass_signature,
                        &pass.name,
                    )?;
                    cmd.bind_pipeline(bound.bind_point, bound.pipeline);
                    pipeline = Some(bound);
                    args_dirty = true;
                }
                Command::BindComputePipeline(bind) => {
                    let shader = self.pso_registry.compute(bind.pso).ok_or_else(|| PipelineError::LayoutMismatch {
                        reason: format!("unknown compute pso key {:#x} in pass `{}`", bind.pso, pass.name),
                    })?;
                    let bound = get_or_create_compute_pipeline(
                        shader,
                        &mut self.shader_cache,
                        &self.layout_cache,
                        &self.pipeline_cache,
                        &pass.name,
                    )?;
                    cmd.bind_pipeline(bound.bind_point, bound.pipeline);
                    pipeline = Some(bound);
                    args_dirty = true;
                }
                Command::BindRayTracingPipeline(bind) => {
                    let desc = self
                        .pso_registry
                        .ray_tracing(bind.pso)
                        .ok_or_else(|| PipelineError::LayoutMismatch {
                            reason: format!("unknown ray tracing pso key {:#x} in pass `{}`", bind.pso, pass.name),
                        })?
                        .clone();
                    let bound = get_or_create_ray_tracing_pipeline(
                        &desc.stages,
                        &desc.groups,
                        desc.max_recursion_depth,
                        &mut self.shader_cache,
                        &self.layout_cache,
                        &self.pipeline_cache,
                        &pass.name,
                    )?;
                    cmd.bind_pipeline(bound.bind_point, bound.pipeline);
                    self.ensure_sbt(bind.pso, bound.pipeline, &desc);
                    current_rt_pso = Some(bind.pso);
                    pipeline = Some(bound);
                    args_dirty = true;
                }

                Command::BindVertexBuffer(bind) => {
                    let buffer = if bind.source == BUFFER_SOURCE_SCRATCH {
                        frame.scratch.borrow().chunk_buffer(bind.buffer as u32)
                    } else {
                        self.resolve_buffer(ResourceHandle::from_raw(bind.buffer))
                    };
                    cmd.bind_vertex_buffers(bind.binding, &[buffer], &[bind.offset]);
                }
                Command::BindIndexBuffer(bind) => {
                    let buffer = if bind.source == BUFFER_SOURCE_SCRATCH {
                        frame.scratch.borrow().chunk_buffer(bind.buffer as u32)
                    } else {
                        self.resolve_buffer(ResourceHandle::from_raw(bind.buffer))
                    };
                    cmd.bind_index_buffer(buffer, bind.offset, vk::IndexType::from_raw(bind.index_type));
                }

                Command::SetViewport(viewport) => {
                    cmd.set_viewport(
                        0,
                        &[vk::Viewport {
                            x: viewport.x,
                            y: viewport.y,
                            width: viewport.width,
                            height: viewport.height,
                            min_depth: viewport.min_depth,
                            max_depth: viewport.max_depth,
                        }],
                    );
                }
                Command::SetScissor(scissor) => {
                    cmd.set_scissor(0, &[vk::Rect2D {
                        offset: vk::Offset2D {
                            x: scissor.x,
                            y: scissor.y,
                        },
                        extent: vk::Extent2D {
                            width: scissor.width,
                            height: scissor.height,
                        },
                    }]);
                }
                Command::SetLineWidth(line_width) => cmd.set_line_width(line_width.width),

                Command::SetArgumentData(arg) => {
                    args.insert(arg.name_hash, ArgValue::Data {
                        chunk: arg.chunk,
                        offset: arg.offset,
                        range: arg.range,
                    });
                    args_dirty = true;
                }
                Command::SetArgumentTexture(arg) => {
                    args.insert(arg.name_hash, ArgValue::Texture {
                        handle: ResourceHandle::from_raw(arg.resource),
                    });
                    args_dirty = true;
                }
                Command::SetArgumentImage(arg) => {
                    args.insert(arg.name_hash, ArgValue::Image {
                        handle: ResourceHandle::from_raw(arg.resource),
                    });
                    args_dirty = true;
                }
                Command::SetArgumentTlas(arg) => {
                    args.insert(arg.name_hash, ArgValue::Tlas {
                        handle: ResourceHandle::from_raw(arg.resource),
                    });
                    args_dirty = true;
                }
                Command::BindArgumentBuffer(arg) => {
                    args.insert(arg.name_hash, ArgValue::Buffer {
                        handle: ResourceHandle::from_raw(arg.buffer),
                        offset: arg.offset,
                        range: arg.range,
                    });
                    args_dirty = true;
                }

                Command::Draw(draw) => {
                    self.flush_arguments(cmd, frame, &pipeline, &args, &mut args_dirty);
                    cmd.draw(draw.vertex_count, draw.instance_count, draw.first_vertex, draw.first_instance);
                }
                Command::DrawIndexed(draw) => {
                    self.flush_arguments(cmd, frame, &pipeline, &args, &mut args_dirty);
                    cmd.draw_indexed(
                        draw.index_count,
                        draw.instance_count,
                        draw.first_index,
                        draw.vertex_offset,
                        draw.first_instance,
                    );
                }
                Command::DrawMeshTasks(draw) => {
                    self.flush_arguments(cmd, frame, &pipeline, &args, &mut args_dirty);
                    cmd.draw_mesh_tasks(draw.group_count_x, draw.group_count_y, draw.group_count_z);
                }
                Command::Dispatch(dispatch) => {
                    self.flush_arguments(cmd, frame, &pipeline, &args, &mut args_dirty);
                    cmd.dispatch(glam::uvec3(dispatch.group_count_x, dispatch.group_count_y, dispatch.group_count_z));
                }
                Command::TraceRays(trace) => {
                    self.flush_arguments(cmd, frame, &pipeline, &args, &mut args_dirty);
                    let pso_key = current_rt_pso.expect("trace_rays without a bound ray tracing pipeline");
                    let sbt = &self.sbt_cache[&pso_key];
                    cmd.trace_rays(&sbt.raygen, &sbt.miss, &sbt.hit, &sbt.callable, [
                        trace.width,
                        trace.height,
                        trace.depth,
                    ]);
                }

                Command::WriteToBuffer(write) => {
                    let src = frame.staging.borrow().chunk_buffer(write.chunk);
                    let dst = self.resolve_buffer(ResourceHandle::from_raw(write.dst));
                    cmd.copy_buffer(src, dst, &[vk::BufferCopy {
                        src_offset: write.src_offset,
                        dst_offset: write.dst_offset,
                        size: write.size,
                    }]);
                }
                Command::WriteToImage(write) => {
                    let src = frame.staging.borrow().chunk_buffer(write.chunk);
                    let handle = ResourceHandle::from_raw(write.dst);
                    let (image, _) = self.resolve_image(handle);
                    cmd.copy_buffer_to_image(src, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[
                        vk::BufferImageCopy {
                            buffer_offset: write.src_offset,
                            buffer_row_length: 0,
                            buffer_image_height: 0,
                            image_subresource: vk::ImageSubresourceLayers {
                                aspect_mask: vk::ImageAspectFlags::from_raw(write.aspect),
                                mip_level: write.mip_level,
                                base_array_layer: write.array_layer,
                                layer_count: 1,
                            },
                            image_offset: vk::Offset3D::default(),
                            image_extent: vk::Extent3D {
                                width: write.width,
                                height: write.height,
                                depth: write.depth,
                            },
                        },
                    ]);
                }

                Command::BuildBlas(build) => {
                    self.build_blas(cmd, frame, ResourceHandle::from_raw(build.blas));
                }
                Command::BuildTlas(build) => {
                    self.build_tlas(cmd, frame, build.tlas, build.chunk, build.offset, build.instance_count);
                }
            }
        }
        Ok(())
    }
}

/// 参数值（按名字哈希暂存，draw/dispatch 前统一落盘）
enum ArgValue {
    Data { chunk: u32, offset: u64, range: u64 },
    Texture { handle: ResourceHandle },
    Image { handle: ResourceHandle },
    Tlas { handle: ResourceHandle },
    Buffer { handle: ResourceHandle, offset: u64, range: u64 },
}

impl RenderBackend {
    /// 把暂存的参数写进 descriptor set 并绑定
    fn flush_arguments(
        &mut self,
        cmd: &GfxCommandBuffer,
        frame: &FrameContext,
        pipeline: &Option<BoundPipeline>,
        args: &HashMap<u64, ArgValue>,
        args_dirty: &mut bool,
    ) {
        if !*args_dirty {
            return;
        }
        let Some(pipeline) = pipeline else {
            return;
        };
        *args_dirty = false;

        let default_sampler = self.default_sampler();

        for (set_index, layout) in pipeline.set_layouts.iter().enumerate() {
            if layout.bindings.is_empty() {
                continue;
            }

            let descriptor_set = frame.alloc_descriptor_set(layout.vk_layout);

            let mut tlas_writes: Vec<(u32, vk::AccelerationStructureKHR)> = vec![];
            let descriptor_data = layout
                .bindings
                .iter()
                .map(|binding| {
                    let mut data = DescriptorData {
                        descriptor_type: binding.descriptor_type(),
                        binding_number: binding.binding(),
                        ..Default::default()
                    };
                    match args.get(&binding.name_hash) {
                        Some(ArgValue::Data { chunk, offset, range }) => {
                            data.buffer = frame.scratch.borrow().chunk_buffer(*chunk);
                            data.offset = *offset;
                            data.range = *range;
                        }
                        Some(ArgValue::Buffer { handle, offset, range }) => {
                            data.buffer = self.resolve_buffer(*handle);
                            data.offset = *offset;
                            data.range = *range;
                        }
                        Some(ArgValue::Texture { handle }) => {
                            let (_, view) = self.resolve_image(*handle);
                            data.sampler = default_sampler;
                            data.image_view = view;
                            data.image_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
                        }
                        Some(ArgValue::Image { handle }) => {
                            let (_, view) = self.resolve_image(*handle);
                            data.image_view = view;
                            data.image_layout = vk::ImageLayout::GENERAL;
                        }
                        Some(ArgValue::Tlas { handle }) => {
                            if let Some(tlas) = self.acceleration_structures.get(handle) {
                                tlas_writes.push((binding.binding(), tlas.vk_handle));
                            } else {
                                log::warn!("tlas `{}` not built yet", display_name(*handle));
                            }
                        }
                        None => {
                            log::warn!(
                                "argument (set={}, binding={}) has no value recorded",
                                set_index,
                                binding.binding()
                            );
                        }
                    }
                    data
                })
                .collect_vec();

            if let Some(template) = layout.update_template {
                unsafe {
                    Gfx::get().device().update_descriptor_set_with_template(
                        descriptor_set,
                        template,
                        descriptor_data.as_ptr() as *const std::ffi::c_void,
                    );
                }
            }

            // 加速结构不走 template，单独 write
            for (binding, tlas) in &tlas_writes {
                let structures = [*tlas];
                let mut as_write =
                    vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(&structures);
                let mut write = vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                    .push_next(&mut as_write);
                write.descriptor_count = 1;
                unsafe {
                    Gfx::get().device().update_descriptor_sets(&[write], &[]);
                }
            }

            cmd.bind_descriptor_sets(
                pipeline.bind_point,
                pipeline.pipeline_layout,
                set_index as u32,
                &[descriptor_set],
                &[],
            );
        }
    }
}

// 加速结构构建
impl RenderBackend {
    fn build_blas(&mut self, cmd: &GfxCommandBuffer, frame: &mut FrameContext, blas: ResourceHandle) {
        let Some(desc) = self.blas_geometry.get(&blas).copied() else {
            log::warn!("blas `{}` has no registered geometry, skipping build", display_name(blas));
            return;
        };

        let vertex_address = self.resolve_buffer_address(desc.vertex_buffer);
        let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(desc.vertex_format)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: vertex_address,
            })
            .vertex_stride(desc.vertex_stride)
            .max_vertex(desc.vertex_count.saturating_sub(1));
        if let Some(index_buffer) = desc.index_buffer {
            triangles = triangles.index_type(desc.index_type).index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.resolve_buffer_address(index_buffer),
            });
        } else {
            triangles = triangles.index_type(vk::IndexType::NONE_KHR);
        }

        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE);

        self.build_acceleration_structure(
            cmd,
            frame,
            blas,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometry,
            desc.primitive_count,
        );
    }

    fn build_tlas(
        &mut self,
        cmd: &GfxCommandBuffer,
        frame: &mut FrameContext,
        tlas_raw: u64,
        chunk: u32,
        offset: u64,
        instance_count: u32,
    ) {
        let instances_address = frame.scratch.borrow().chunk_device_address(chunk) + offset;
        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instances_address,
            });

        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances });

        self.build_acceleration_structure(
            cmd,
            frame,
            ResourceHandle::from_raw(tlas_raw),
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            instance_count,
        );
    }

    fn build_acceleration_structure(
        &mut self,
        cmd: &GfxCommandBuffer,
        frame: &mut FrameContext,
        handle: ResourceHandle,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: vk::AccelerationStructureGeometryKHR<'_>,
        primitive_count: u32,
    ) {
        let device = Gfx::get().device();
        let geometries = [geometry];

        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            device.acceleration_structure().get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
                &mut sizes,
            );
        }

        let name = display_name(handle);
        let as_buffer = GfxBuffer::new(
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            None,
            false,
            format!("{name}-as"),
        );

        let as_ci = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(as_buffer.vk_buffer())
            .size(sizes.acceleration_structure_size)
            .ty(ty);
        let vk_handle = unsafe { device.acceleration_structure().create_acceleration_structure(&as_ci, None).unwrap() };
        let device_address = unsafe {
            device.acceleration_structure().get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(vk_handle),
            )
        };

        // build scratch 的对齐要求按保守值 256
        let build_scratch = GfxBuffer::new(
            sizes.build_scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            Some(256),
            false,
            format!("{name}-build-scratch"),
        );

        build_info = build_info.dst_acceleration_structure(vk_handle).scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: build_scratch.device_address(),
        });

        let range = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);
        cmd.build_acceleration_structure(&build_info, &[range]);

        // 旧的 AS（如重建场景）替换掉；build scratch 活到帧末
        if let Some(old) = self.acceleration_structures.insert(handle, AccelerationStructure {
            vk_handle,
            device_address,
            _buffer: as_buffer,
        }) {
            unsafe {
                device.acceleration_structure().destroy_acceleration_structure(old.vk_handle, None);
            }
        }
        frame.keep_alive_buffers.push(build_scratch);
    }
}

// shader binding table
impl RenderBackend {
    fn rt_props(&mut self) -> RtProps {
        *self.rt_props.get_or_insert_with(|| {
            let mut rt = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut rt);
            unsafe {
                Gfx::get()
                    .ash_instance()
                    .get_physical_device_properties2(Gfx::get().physical_device().vk_handle(), &mut props2);
            }
            RtProps {
                handle_size: rt.shader_group_handle_size,
                handle_alignment: rt.shader_group_handle_alignment,
                base_alignment: rt.shader_group_base_alignment,
            }
        })
    }

    fn ensure_sbt(&mut self, pso_key: u64, pipeline: vk::Pipeline, desc: &crate::renderer::pso::RayTracingPsoDesc) {
        if self.sbt_cache.contains_key(&pso_key) {
            return;
        }

        let props = self.rt_props();
        let align_up = |value: u64, align: u64| (value + align - 1) & !(align - 1);

        let handle_size = props.handle_size as u64;
        let handle_stride = align_up(handle_size, props.handle_alignment as u64);
        let base_align = props.base_alignment as u64;

        let group_count = desc.groups.len() as u32;
        let miss_count = desc.miss_group_count as u64;
        let hit_count = (group_count as u64).saturating_sub(1 + miss_count);

        let raygen_size = align_up(handle_stride, base_align);
        let miss_size = align_up(miss_count * handle_stride, base_align);
        let hit_size = align_up(hit_count * handle_stride, base_align);
        let total = raygen_size + miss_size + hit_size;

        let handles = unsafe {
            Gfx::get()
                .device()
                .ray_tracing_pipeline()
                .get_ray_tracing_shader_group_handles(pipeline, 0, group_count, (group_count as u64 * handle_size) as usize)
                .unwrap()
        };

        let buffer = GfxBuffer::new(
            total,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            Some(base_align),
            true,
            "sbt",
        );

        // 按 [raygen | miss... | hit...] 排布拷贝 group handle
        let mut write_group = |group_index: u64, dst_offset: u64| {
            let src = &handles[(group_index * handle_size) as usize..((group_index + 1) * handle_size) as usize];
            buffer.write_bytes(dst_offset, src);
        };
        write_group(0, 0);
        for i in 0..miss_count {
            write_group(1 + i, raygen_size + i * handle_stride);
        }
        for i in 0..hit_count {
            write_group(1 + miss_count + i, raygen_size + miss_size + i * handle_stride);
        }

        let base_address = buffer.device_address();
        let regions = SbtRegions {
            raygen: vk::StridedDeviceAddressRegionKHR {
                device_address: base_address,
                stride: raygen_size,
                size: raygen_size,
            },
            miss: vk::StridedDeviceAddressRegionKHR {
                device_address: base_address + raygen_size,
                stride: handle_stride,
                size: miss_size,
            },
            hit: vk::StridedDeviceAddressRegionKHR {
                device_address: base_address + raygen_size + miss_size,
                stride: handle_stride,
                size: hit_size,
            },
            callable: vk::StridedDeviceAddressRegionKHR::default(),
            _buffer: buffer,
        };
        self.sbt_cache.insert(pso_key, regions);
    }
}

// teardown
impl RenderBackend {
    pub fn destroy(mut self) {
        let device = Gfx::get().device();
        unsafe {
            for (_, acceleration_structure) in self.acceleration_structures.drain() {
                device
                    .acceleration_structure()
                    .destroy_acceleration_structure(acceleration_structure.vk_handle, None);
            }
            if let Some(sampler) = self.default_sampler.take() {
                device.destroy_sampler(sampler, None);
            }
        }
        self.sbt_cache.clear();
        self.resources.clear();

        self.framebuffer_cache.destroy();
        self.render_pass_cache.destroy();
        self.pipeline_cache.destroy();
        self.layout_cache.destroy();
        self.shader_cache.destroy();
    }
}
