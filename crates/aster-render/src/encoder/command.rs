//! 命令流的记录格式
//!
//! 每条记录 = 8 字节 header {tag, size} + `Pod` payload，连续排布在一个
//! 字节缓冲里。payload 大小都补齐到 8 的倍数；解码用 unaligned 读取，
//! 不依赖缓冲本身的对齐。

use bytemuck::{Pod, Zeroable};

/// 记录类型标签
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum CmdTag {
    BindGraphicsPipeline = 1,
    BindComputePipeline,
    BindRayTracingPipeline,
    BindVertexBuffer,
    BindIndexBuffer,
    SetViewport,
    SetScissor,
    SetLineWidth,
    Draw,
    DrawIndexed,
    DrawMeshTasks,
    Dispatch,
    TraceRays,
    SetArgumentData,
    SetArgumentTexture,
    SetArgumentImage,
    SetArgumentTlas,
    BindArgumentBuffer,
    WriteToBuffer,
    WriteToImage,
    BuildBlas,
    BuildTlas,
}

impl CmdTag {
    pub fn from_u32(raw: u32) -> Option<Self> {
        if (1..=CmdTag::BuildTlas as u32).contains(&raw) {
            // SAFETY: repr(u32)，取值连续且已做范围检查
            Some(unsafe { std::mem::transmute::<u32, CmdTag>(raw) })
        } else {
            None
        }
    }
}

/// 记录头
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct CmdHeader {
    pub tag: u32,
    /// payload 字节数（不含 header）
    pub size: u32,
}

/// buffer 来源：app 声明的资源，或者每帧 scratch 的某个 chunk
pub const BUFFER_SOURCE_RESOURCE: u32 = 0;
pub const BUFFER_SOURCE_SCRATCH: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BindPipelineCmd {
    /// PSO 注册表里的 key
    pub pso: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BindVertexBufferCmd {
    /// `BUFFER_SOURCE_*`
    pub source: u32,
    pub binding: u32,
    /// resource handle 或 scratch chunk 序号
    pub buffer: u64,
    pub offset: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BindIndexBufferCmd {
    pub source: u32,
    /// `vk::IndexType` 的 raw 值
    pub index_type: i32,
    pub buffer: u64,
    pub offset: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SetViewportCmd {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SetScissorCmd {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SetLineWidthCmd {
    pub width: f32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawCmd {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawIndexedCmd {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawMeshTasksCmd {
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DispatchCmd {
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TraceRaysCmd {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SetArgumentDataCmd {
    /// 参数名哈希（`shader_arg_hash`）
    pub name_hash: u64,
    pub chunk: u32,
    pub _pad: u32,
    pub offset: u64,
    pub range: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SetArgumentResourceCmd {
    pub name_hash: u64,
    /// texture/image/tlas 的 resource handle
    pub resource: u64,
    pub array_index: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BindArgumentBufferCmd {
    pub name_hash: u64,
    pub buffer: u64,
    pub offset: u64,
    pub range: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct WriteToBufferCmd {
    pub dst: u64,
    pub dst_offset: u64,
    /// staging scratch 的位置
    pub chunk: u32,
    pub _pad: u32,
    pub src_offset: u64,
    pub size: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct WriteToImageCmd {
    pub dst: u64,
    pub chunk: u32,
    pub _pad: u32,
    pub src_offset: u64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_layer: u32,
    pub aspect: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BuildBlasCmd {
    pub blas: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BuildTlasCmd {
    pub tlas: u64,
    /// 实例数据在 scratch 中的位置
    pub chunk: u32,
    pub instance_count: u32,
    pub offset: u64,
}

/// 解码出的单条命令
#[derive(Clone, Copy, Debug)]
pub enum Command {
    BindGraphicsPipeline(BindPipelineCmd),
    BindComputePipeline(BindPipelineCmd),
    BindRayTracingPipeline(BindPipelineCmd),
    BindVertexBuffer(BindVertexBufferCmd),
    BindIndexBuffer(BindIndexBufferCmd),
    SetViewport(SetViewportCmd),
    SetScissor(SetScissorCmd),
    SetLineWidth(SetLineWidthCmd),
    Draw(DrawCmd),
    DrawIndexed(DrawIndexedCmd),
    DrawMeshTasks(DrawMeshTasksCmd),
    Dispatch(DispatchCmd),
    TraceRays(TraceRaysCmd),
    SetArgumentData(SetArgumentDataCmd),
    SetArgumentTexture(SetArgumentResourceCmd),
    SetArgumentImage(SetArgumentResourceCmd),
    SetArgumentTlas(SetArgumentResourceCmd),
    BindArgumentBuffer(BindArgumentBufferCmd),
    WriteToBuffer(WriteToBufferCmd),
    WriteToImage(WriteToImageCmd),
    BuildBlas(BuildBlasCmd),
    BuildTlas(BuildTlasCmd),
}

/// 命令流的解码迭代器
pub struct CommandStream<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> CommandStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    fn read_payload<T: Pod>(&self, payload: &[u8]) -> T {
        bytemuck::pod_read_unaligned(&payload[..std::mem::size_of::<T>()])
    }
}

impl<'a> Iterator for CommandStream<'a> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        if self.cursor >= self.bytes.len() {
            return None;
        }

        let header_size = std::mem::size_of::<CmdHeader>();
        let header: CmdHeader = bytemuck::pod_read_unaligned(&self.bytes[self.cursor..self.cursor + header_size]);
        let payload_start = self.cursor + header_size;
        let payload = &self.bytes[payload_start..payload_start + header.size as usize];
        self.cursor = payload_start + header.size as usize;

        let tag = CmdTag::from_u32(header.tag).expect("corrupt command stream");
        let command = match tag {
            CmdTag::BindGraphicsPipeline => Command::BindGraphicsPipeline(self.read_payload(payload)),
            CmdTag::BindComputePipeline => Command::BindComputePipeline(self.read_payload(payload)),
            CmdTag::BindRayTracingPipeline => Command::BindRayTracingPipeline(self.read_payload(payload)),
            CmdTag::BindVertexBuffer => Command::BindVertexBuffer(self.read_payload(payload)),
            CmdTag::BindIndexBuffer => Command::BindIndexBuffer(self.read_payload(payload)),
            CmdTag::SetViewport => Command::SetViewport(self.read_payload(payload)),
            CmdTag::SetScissor => Command::SetScissor(self.read_payload(payload)),
            CmdTag::SetLineWidth => Command::SetLineWidth(self.read_payload(payload)),
            CmdTag::Draw => Command::Draw(self.read_payload(payload)),
            CmdTag::DrawIndexed => Command::DrawIndexed(self.read_payload(payload)),
            CmdTag::DrawMeshTasks => Command::DrawMeshTasks(self.read_payload(payload)),
            CmdTag::Dispatch => Command::Dispatch(self.read_payload(payload)),
            CmdTag::TraceRays => Command::TraceRays(self.read_payload(payload)),
            CmdTag::SetArgumentData => Command::SetArgumentData(self.read_payload(payload)),
            CmdTag::SetArgumentTexture => Command::SetArgumentTexture(self.read_payload(payload)),
            CmdTag::SetArgumentImage => Command::SetArgumentImage(self.read_payload(payload)),
            CmdTag::SetArgumentTlas => Command::SetArgumentTlas(self.read_payload(payload)),
            CmdTag::BindArgumentBuffer => Command::BindArgumentBuffer(self.read_payload(payload)),
            CmdTag::WriteToBuffer => Command::WriteToBuffer(self.read_payload(payload)),
            CmdTag::WriteToImage => Command::WriteToImage(self.read_payload(payload)),
            CmdTag::BuildBlas => Command::BuildBlas(self.read_payload(payload)),
            CmdTag::BuildTlas => Command::BuildTlas(self.read_payload(payload)),
        };
        Some(command)
    }
}
