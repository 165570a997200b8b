//! 乱序录制的命令编码器
//!
//! 每个 pass 一个 encoder。高层操作被追加成 tagged record，之后由 backend
//! 统一回放进 `vk::CommandBuffer`。内联数据（顶点/索引/参数/上传）经由
//! 每帧的 scratch 分配器中转，命令里只记录 (chunk, offset, range)。
//!
//! scratch 耗尽不会 panic：encoder 记下第一个错误并把后续操作变成 no-op，
//! 帧编排器在提交前检查并放弃整帧。

use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;
use aster_gfx::pipelines::binding::shader_arg_hash;
use bytemuck::Pod;

use crate::{
    encoder::command::*,
    error::ResourceError,
    graph::handle::ResourceHandle,
    renderer::pso::{ComputePsoHandle, GraphicsPsoHandle, RayTracingPsoHandle},
    scratch::ScratchAllocator,
};

/// uniform 数据在 scratch 里的对齐；覆盖常见硬件的 minUniformBufferOffsetAlignment
const ARGUMENT_DATA_ALIGN: u64 = 256;
const VERTEX_DATA_ALIGN: u64 = 16;
const STAGING_ALIGN: u64 = 16;

/// `write_to_image` 的目标描述
#[derive(Clone, Copy, Debug)]
pub struct WriteToImageInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_layer: u32,
    pub aspect: vk::ImageAspectFlags,
}

impl Default for WriteToImageInfo {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            mip_level: 0,
            array_layer: 0,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

pub struct CommandEncoder {
    stream: Vec<u8>,
    command_count: usize,
    extent: vk::Extent2D,

    /// device 侧 ring：内联顶点/索引/参数数据
    scratch: Rc<RefCell<ScratchAllocator>>,
    /// staging ring：write_to_buffer / write_to_image 的源
    staging: Rc<RefCell<ScratchAllocator>>,

    /// 第一个出错的操作；之后的录制全部跳过
    error: Option<ResourceError>,
}

impl CommandEncoder {
    pub fn new(
        extent: vk::Extent2D,
        scratch: Rc<RefCell<ScratchAllocator>>,
        staging: Rc<RefCell<ScratchAllocator>>,
    ) -> Self {
        Self {
            stream: Vec::with_capacity(4 << 10),
            command_count: 0,
            extent,
            scratch,
            staging,
            error: None,
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn command_count(&self) -> usize {
        self.command_count
    }

    /// 录制完成的字节流
    #[inline]
    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    /// 录制期间遇到的第一个错误
    #[inline]
    pub fn take_error(&mut self) -> Option<ResourceError> {
        self.error.take()
    }

    pub fn reset(&mut self) {
        self.stream.clear();
        self.command_count = 0;
        self.error = None;
    }

    fn record<T: Pod>(&mut self, tag: CmdTag, payload: &T) {
        if self.error.is_some() {
            return;
        }
        let header = CmdHeader {
            tag: tag as u32,
            size: std::mem::size_of::<T>() as u32,
        };
        self.stream.extend_from_slice(bytemuck::bytes_of(&header));
        self.stream.extend_from_slice(bytemuck::bytes_of(payload));
        self.command_count += 1;
    }

    fn scratch_write(&mut self, data: &[u8], align: u64) -> Option<crate::scratch::ScratchSlice> {
        if self.error.is_some() {
            return None;
        }
        match self.scratch.borrow_mut().write(data, align) {
            Ok(slice) => Some(slice),
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }

    fn staging_write(&mut self, data: &[u8]) -> Option<crate::scratch::ScratchSlice> {
        if self.error.is_some() {
            return None;
        }
        match self.staging.borrow_mut().write(data, STAGING_ALIGN) {
            Ok(slice) => Some(slice),
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }
}

// pipeline 与固定状态
impl CommandEncoder {
    pub fn bind_graphics_pipeline(&mut self, pso: GraphicsPsoHandle) {
        self.record(CmdTag::BindGraphicsPipeline, &BindPipelineCmd { pso: pso.key() });
    }

    pub fn bind_compute_pipeline(&mut self, pso: ComputePsoHandle) {
        self.record(CmdTag::BindComputePipeline, &BindPipelineCmd { pso: pso.key() });
    }

    pub fn bind_ray_tracing_pipeline(&mut self, pso: RayTracingPsoHandle) {
        self.record(CmdTag::BindRayTracingPipeline, &BindPipelineCmd { pso: pso.key() });
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.record(
            CmdTag::SetViewport,
            &SetViewportCmd {
                x,
                y,
                width,
                height,
                min_depth,
                max_depth,
            },
        );
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.record(CmdTag::SetScissor, &SetScissorCmd { x, y, width, height });
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.record(CmdTag::SetLineWidth, &SetLineWidthCmd { width, _pad: 0 });
    }
}

// 顶点与索引数据
impl CommandEncoder {
    /// 绑定 app 声明的 vertex buffer
    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: ResourceHandle, offset: u64) {
        self.record(
            CmdTag::BindVertexBuffer,
            &BindVertexBufferCmd {
                source: BUFFER_SOURCE_RESOURCE,
                binding,
                buffer: buffer.to_raw(),
                offset,
            },
        );
    }

    pub fn bind_index_buffer(&mut self, buffer: ResourceHandle, offset: u64, index_type: vk::IndexType) {
        self.record(
            CmdTag::BindIndexBuffer,
            &BindIndexBufferCmd {
                source: BUFFER_SOURCE_RESOURCE,
                index_type: index_type.as_raw(),
                buffer: buffer.to_raw(),
                offset,
            },
        );
    }

    /// 内联顶点数据：拷贝进 scratch，再绑定到指定 binding
    ///
    /// data 为空时不产生任何命令。
    pub fn set_vertex_data(&mut self, binding: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(slice) = self.scratch_write(data, VERTEX_DATA_ALIGN) else {
            return;
        };
        self.record(
            CmdTag::BindVertexBuffer,
            &BindVertexBufferCmd {
                source: BUFFER_SOURCE_SCRATCH,
                binding,
                buffer: slice.chunk as u64,
                offset: slice.offset,
            },
        );
    }

    /// 内联索引数据
    pub fn set_index_data(&mut self, data: &[u8], index_type: vk::IndexType) {
        if data.is_empty() {
            return;
        }
        let Some(slice) = self.scratch_write(data, VERTEX_DATA_ALIGN) else {
            return;
        };
        self.record(
            CmdTag::BindIndexBuffer,
            &BindIndexBufferCmd {
                source: BUFFER_SOURCE_SCRATCH,
                index_type: index_type.as_raw(),
                buffer: slice.chunk as u64,
                offset: slice.offset,
            },
        );
    }
}

// 绘制、dispatch、光追
impl CommandEncoder {
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record(
            CmdTag::Draw,
            &DrawCmd {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(
            CmdTag::DrawIndexed,
            &DrawIndexedCmd {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
                _pad: 0,
            },
        );
    }

    pub fn draw_mesh_tasks(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.record(
            CmdTag::DrawMeshTasks,
            &DrawMeshTasksCmd {
                group_count_x,
                group_count_y,
                group_count_z,
                _pad: 0,
            },
        );
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.record(
            CmdTag::Dispatch,
            &DispatchCmd {
                group_count_x,
                group_count_y,
                group_count_z,
                _pad: 0,
            },
        );
    }

    pub fn trace_rays(&mut self, width: u32, height: u32, depth: u32) {
        self.record(CmdTag::TraceRays, &TraceRaysCmd { width, height, depth, _pad: 0 });
    }
}

// shader 参数
impl CommandEncoder {
    /// 内联 uniform 数据；按参数名绑定
    pub fn set_argument_data(&mut self, name: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(slice) = self.scratch_write(data, ARGUMENT_DATA_ALIGN) else {
            return;
        };
        self.record(
            CmdTag::SetArgumentData,
            &SetArgumentDataCmd {
                name_hash: shader_arg_hash(name),
                chunk: slice.chunk,
                _pad: 0,
                offset: slice.offset,
                range: slice.size,
            },
        );
    }

    pub fn set_argument_texture(&mut self, name: &str, texture: ResourceHandle, array_index: u32) {
        self.record(
            CmdTag::SetArgumentTexture,
            &SetArgumentResourceCmd {
                name_hash: shader_arg_hash(name),
                resource: texture.to_raw(),
                array_index,
                _pad: 0,
            },
        );
    }

    pub fn set_argument_image(&mut self, name: &str, image: ResourceHandle, array_index: u32) {
        self.record(
            CmdTag::SetArgumentImage,
            &SetArgumentResourceCmd {
                name_hash: shader_arg_hash(name),
                resource: image.to_raw(),
                array_index,
                _pad: 0,
            },
        );
    }

    pub fn set_argument_tlas(&mut self, name: &str, tlas: ResourceHandle, array_index: u32) {
        self.record(
            CmdTag::SetArgumentTlas,
            &SetArgumentResourceCmd {
                name_hash: shader_arg_hash(name),
                resource: tlas.to_raw(),
                array_index,
                _pad: 0,
            },
        );
    }

    pub fn bind_argument_buffer(&mut self, name: &str, buffer: ResourceHandle, offset: u64, range: u64) {
        self.record(
            CmdTag::BindArgumentBuffer,
            &BindArgumentBufferCmd {
                name_hash: shader_arg_hash(name),
                buffer: buffer.to_raw(),
                offset,
                range,
            },
        );
    }
}

// 资源上传
impl CommandEncoder {
    /// 经 staging 上传到 device buffer
    pub fn write_to_buffer(&mut self, dst: ResourceHandle, dst_offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(slice) = self.staging_write(data) else {
            return;
        };
        self.record(
            CmdTag::WriteToBuffer,
            &WriteToBufferCmd {
                dst: dst.to_raw(),
                dst_offset,
                chunk: slice.chunk,
                _pad: 0,
                src_offset: slice.offset,
                size: slice.size,
            },
        );
    }

    /// 经 staging 上传到 image 的指定 mip/layer
    pub fn write_to_image(&mut self, dst: ResourceHandle, info: WriteToImageInfo, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(slice) = self.staging_write(data) else {
            return;
        };
        self.record(
            CmdTag::WriteToImage,
            &WriteToImageCmd {
                dst: dst.to_raw(),
                chunk: slice.chunk,
                _pad: 0,
                src_offset: slice.offset,
                size: slice.size,
                width: info.width,
                height: info.height,
                depth: info.depth,
                mip_level: info.mip_level,
                array_layer: info.array_layer,
                aspect: info.aspect.as_raw(),
            },
        );
    }
}

// 加速结构
impl CommandEncoder {
    pub fn build_blas(&mut self, blas_handles: &[ResourceHandle]) {
        for handle in blas_handles {
            self.record(CmdTag::BuildBlas, &BuildBlasCmd { blas: handle.to_raw() });
        }
    }

    /// `instance_data` 是打包好的 `VkAccelerationStructureInstanceKHR` 数组
    pub fn build_tlas(&mut self, tlas: ResourceHandle, instance_count: u32, instance_data: &[u8]) {
        let Some(slice) = self.scratch_write(instance_data, 16) else {
            return;
        };
        self.record(
            CmdTag::BuildTlas,
            &BuildTlasCmd {
                tlas: tlas.to_raw(),
                chunk: slice.chunk,
                instance_count,
                offset: slice.offset,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::command::Command;
    use crate::graph::handle::produce_buffer_handle;

    fn make_encoder() -> CommandEncoder {
        let scratch = Rc::new(RefCell::new(ScratchAllocator::new_host(1024, 1 << 20)));
        let staging = Rc::new(RefCell::new(ScratchAllocator::new_host(1024, 1 << 20)));
        CommandEncoder::new(vk::Extent2D { width: 800, height: 600 }, scratch, staging)
    }

    #[test]
    fn test_records_decode_in_submission_order() {
        let mut encoder = make_encoder();
        encoder.set_viewport(0.0, 0.0, 800.0, 600.0, 0.0, 1.0);
        encoder.set_scissor(0, 0, 800, 600);
        encoder.draw(3, 1, 0, 0);

        let commands: Vec<Command> = CommandStream::new(encoder.stream()).collect();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], Command::SetViewport(v) if v.width == 800.0));
        assert!(matches!(commands[1], Command::SetScissor(s) if s.height == 600));
        assert!(matches!(commands[2], Command::Draw(d) if d.vertex_count == 3));
    }

    #[test]
    fn test_set_vertex_data_goes_through_scratch() {
        let mut encoder = make_encoder();
        let vertices = [0u8; 96];
        encoder.set_vertex_data(0, &vertices);

        let commands: Vec<Command> = CommandStream::new(encoder.stream()).collect();
        assert_eq!(commands.len(), 1);
        match commands[0] {
            Command::BindVertexBuffer(cmd) => {
                assert_eq!(cmd.source, BUFFER_SOURCE_SCRATCH);
                assert_eq!(cmd.binding, 0);
                assert_eq!(cmd.offset % VERTEX_DATA_ALIGN, 0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_consecutive_inline_data_gets_distinct_ranges() {
        let mut encoder = make_encoder();
        encoder.set_vertex_data(0, &[0u8; 64]);
        encoder.set_vertex_data(1, &[0u8; 64]);

        let commands: Vec<Command> = CommandStream::new(encoder.stream()).collect();
        let offsets: Vec<u64> = commands
            .iter()
            .map(|c| match c {
                Command::BindVertexBuffer(cmd) => cmd.offset,
                other => panic!("unexpected command: {other:?}"),
            })
            .collect();
        assert_ne!(offsets[0], offsets[1]);
    }

    #[test]
    fn test_scratch_overflow_marks_encoder_failed() {
        let scratch = Rc::new(RefCell::new(ScratchAllocator::new_host(1024, 4096)));
        let staging = Rc::new(RefCell::new(ScratchAllocator::new_host(1024, 1 << 20)));
        let mut encoder =
            CommandEncoder::new(vk::Extent2D { width: 16, height: 16 }, scratch, staging);

        // 超过 scratch 上限的内联上传
        encoder.set_vertex_data(0, &vec![0u8; 4097]);
        encoder.draw(3, 1, 0, 0);

        // 后续命令不再录制，错误被保留
        assert_eq!(encoder.command_count(), 0);
        assert!(matches!(encoder.take_error(), Some(ResourceError::ScratchExhausted { .. })));
    }

    #[test]
    fn test_argument_data_is_aligned_for_ubo() {
        let mut encoder = make_encoder();
        encoder.set_argument_data("u_frame", &[0u8; 17]);
        encoder.set_argument_data("u_object", &[0u8; 17]);

        let commands: Vec<Command> = CommandStream::new(encoder.stream()).collect();
        for command in &commands {
            match command {
                Command::SetArgumentData(cmd) => assert_eq!(cmd.offset % ARGUMENT_DATA_ALIGN, 0),
                other => panic!("unexpected command: {other:?}"),
            }
        }
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_write_to_buffer_uses_staging() {
        let mut encoder = make_encoder();
        let dst = produce_buffer_handle("encoder-staging-dst");
        encoder.write_to_buffer(dst, 128, &[7u8; 32]);

        let commands: Vec<Command> = CommandStream::new(encoder.stream()).collect();
        match commands[0] {
            Command::WriteToBuffer(cmd) => {
                assert_eq!(cmd.dst, dst.to_raw());
                assert_eq!(cmd.dst_offset, 128);
                assert_eq!(cmd.size, 32);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_empty_data_is_a_no_op() {
        let mut encoder = make_encoder();
        encoder.set_vertex_data(0, &[]);
        encoder.set_index_data(&[], vk::IndexType::UINT16);
        assert_eq!(encoder.command_count(), 0);
    }
}
