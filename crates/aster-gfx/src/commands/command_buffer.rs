use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        command_pool::GfxCommandPool,
    },
    foundation::debug::DebugType,
    gfx::Gfx,
};

#[derive(Clone)]
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    _command_pool: vk::CommandPool,
}

impl DebugType for GfxCommandBuffer {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

// 创建
impl GfxCommandBuffer {
    pub fn new(command_pool: &GfxCommandPool, debug_name: &str) -> Self {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.vk_handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let vk_handle = unsafe { Gfx::get().device().allocate_command_buffers(&alloc_info).unwrap()[0] };
        let cmd = Self {
            vk_handle,
            _command_pool: command_pool.vk_handle(),
        };
        Gfx::get().device().set_debug_name(&cmd, debug_name);
        cmd
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }
}

// 录制的开始与结束
impl GfxCommandBuffer {
    /// 开始录制，同时打上 debug label
    pub fn begin(&self, usage: vk::CommandBufferUsageFlags, debug_label: &str) {
        unsafe {
            Gfx::get()
                .device()
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage))
                .unwrap();
        }
        self.begin_label(debug_label);
    }

    pub fn end(&self) {
        self.end_label();
        unsafe {
            Gfx::get().device().end_command_buffer(self.vk_handle).unwrap();
        }
    }
}

// render pass scope
impl GfxCommandBuffer {
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            Gfx::get().device().cmd_begin_render_pass(self.vk_handle, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            Gfx::get().device().cmd_end_render_pass(self.vk_handle);
        }
    }
}

// 状态绑定
impl GfxCommandBuffer {
    #[inline]
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            Gfx::get().device().cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    #[inline]
    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            Gfx::get().device().cmd_bind_vertex_buffers(self.vk_handle, first_binding, buffers, offsets);
        }
    }

    #[inline]
    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            Gfx::get().device().cmd_bind_index_buffer(self.vk_handle, buffer, offset, index_type);
        }
    }

    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            Gfx::get().device().cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                dynamic_offsets,
            );
        }
    }

    #[inline]
    pub fn set_viewport(&self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            Gfx::get().device().cmd_set_viewport(self.vk_handle, first_viewport, viewports);
        }
    }

    #[inline]
    pub fn set_scissor(&self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            Gfx::get().device().cmd_set_scissor(self.vk_handle, first_scissor, scissors);
        }
    }

    #[inline]
    pub fn set_line_width(&self, line_width: f32) {
        unsafe {
            Gfx::get().device().cmd_set_line_width(self.vk_handle, line_width);
        }
    }

    #[inline]
    pub fn push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            Gfx::get().device().cmd_push_constants(self.vk_handle, pipeline_layout, stages, offset, data);
        }
    }
}

// 绘制与 dispatch
impl GfxCommandBuffer {
    #[inline]
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            Gfx::get().device().cmd_draw(self.vk_handle, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    #[inline]
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            Gfx::get().device().cmd_draw_indexed(
                self.vk_handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    #[inline]
    pub fn draw_mesh_tasks(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            Gfx::get().device().mesh_shader.cmd_draw_mesh_tasks(
                self.vk_handle,
                group_count_x,
                group_count_y,
                group_count_z,
            );
        }
    }

    #[inline]
    pub fn dispatch(&self, group_count: glam::UVec3) {
        unsafe {
            Gfx::get().device().cmd_dispatch(self.vk_handle, group_count.x, group_count.y, group_count.z);
        }
    }

    #[inline]
    pub fn trace_rays(
        &self,
        raygen_table: &vk::StridedDeviceAddressRegionKHR,
        miss_table: &vk::StridedDeviceAddressRegionKHR,
        hit_table: &vk::StridedDeviceAddressRegionKHR,
        callable_table: &vk::StridedDeviceAddressRegionKHR,
        size: [u32; 3],
    ) {
        unsafe {
            Gfx::get().device().ray_tracing_pipeline.cmd_trace_rays(
                self.vk_handle,
                raygen_table,
                miss_table,
                hit_table,
                callable_table,
                size[0],
                size[1],
                size[2],
            );
        }
    }
}

// 数据传输
impl GfxCommandBuffer {
    #[inline]
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            Gfx::get().device().cmd_copy_buffer(self.vk_handle, src, dst, regions);
        }
    }

    #[inline]
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            Gfx::get().device().cmd_copy_buffer_to_image(self.vk_handle, src, dst, dst_layout, regions);
        }
    }

    /// 单次最多 64KB，且必须在 render pass 之外
    #[inline]
    pub fn update_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe {
            Gfx::get().device().cmd_update_buffer(self.vk_handle, buffer, offset, data);
        }
    }
}

// 加速结构
impl GfxCommandBuffer {
    pub fn build_acceleration_structure(
        &self,
        geometry_info: &vk::AccelerationStructureBuildGeometryInfoKHR,
        ranges: &[vk::AccelerationStructureBuildRangeInfoKHR],
    ) {
        unsafe {
            Gfx::get().device().acceleration_structure.cmd_build_acceleration_structures(
                self.vk_handle,
                std::slice::from_ref(geometry_info),
                &[ranges],
            );
        }
    }
}

// 同步
impl GfxCommandBuffer {
    pub fn memory_barrier(&self, barriers: &[vk::MemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::default().memory_barriers(barriers);
        unsafe {
            Gfx::get().device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    pub fn image_memory_barrier(&self, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            Gfx::get().device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    pub fn buffer_memory_barrier(&self, barriers: &[GfxBufferBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe {
            Gfx::get().device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}

// debug label
impl GfxCommandBuffer {
    pub fn begin_label(&self, label_name: &str) {
        let name = std::ffi::CString::new(label_name).unwrap();
        unsafe {
            Gfx::get()
                .device()
                .debug_utils
                .cmd_begin_debug_utils_label(self.vk_handle, &vk::DebugUtilsLabelEXT::default().label_name(&name));
        }
    }

    pub fn end_label(&self) {
        unsafe {
            Gfx::get().device().debug_utils.cmd_end_debug_utils_label(self.vk_handle);
        }
    }
}
