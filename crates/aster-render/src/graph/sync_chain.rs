//! 每资源的 sync chain 以及 barrier 推导
//!
//! 按执行顺序走一遍所有 pass，每次使用在该资源的 chain 上追加一个状态
//! 条目，pass 记下自己的 pre/post 偏移。相邻条目之间的状态变化即 barrier：
//! 执行依赖 (src stage → dst stage)、内存依赖 (src access → dst access)、
//! 以及图像的 layout 转换。

use ash::vk;
use aster_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};

use crate::graph::{
    handle::ResourceHandle,
    state::{RgBufferState, RgImageState},
};

/// chain 上的一个条目
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl SyncState {
    pub const fn from_image_state(state: RgImageState) -> Self {
        Self {
            stage: state.stage,
            access: state.access,
            layout: state.layout,
        }
    }

    pub const fn from_buffer_state(state: RgBufferState) -> Self {
        Self {
            stage: state.stage,
            access: state.access,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }

    #[inline]
    pub fn image_state(&self) -> RgImageState {
        RgImageState::new(self.stage, self.access, self.layout)
    }
}

/// 单个资源的状态时间线
#[derive(Clone, Debug, Default)]
pub struct SyncChain {
    pub states: Vec<SyncState>,
}

impl SyncChain {
    /// 追加一个状态，返回它在 chain 中的偏移
    pub fn append(&mut self, state: SyncState) -> u32 {
        self.states.push(state);
        (self.states.len() - 1) as u32
    }

    #[inline]
    pub fn state_at(&self, offset: u32) -> &SyncState {
        &self.states[offset as usize]
    }

    #[inline]
    pub fn last(&self) -> Option<&SyncState> {
        self.states.last()
    }
}

/// 图像 barrier 的描述（尚未解析出 vk::Image）
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrierDesc {
    pub handle: ResourceHandle,
    pub src: SyncState,
    pub dst: SyncState,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageBarrierDesc {
    pub fn new(handle: ResourceHandle, src: SyncState, dst: SyncState) -> Self {
        Self {
            handle,
            src,
            dst,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// layout 相同且两侧都是只读时可以省略 barrier
    pub fn needs_barrier(&self) -> bool {
        if self.src.layout != self.dst.layout {
            return true;
        }
        self.src.image_state().is_write() || self.dst.image_state().is_write()
    }

    pub fn to_gfx_barrier(&self, image: vk::Image) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .layouts(self.src.layout, self.dst.layout)
            .src(self.src.stage, self.src.image_state().src_access())
            .dst(self.dst.stage, self.dst.access)
            .aspect(self.aspect)
    }
}

/// 缓冲区 barrier 的描述
#[derive(Clone, Copy, Debug)]
pub struct BufferBarrierDesc {
    pub handle: ResourceHandle,
    pub src: SyncState,
    pub dst: SyncState,
}

impl BufferBarrierDesc {
    pub fn new(handle: ResourceHandle, src: SyncState, dst: SyncState) -> Self {
        Self { handle, src, dst }
    }

    pub fn needs_barrier(&self) -> bool {
        let src_state = RgBufferState::new(self.src.stage, self.src.access);
        let dst_state = RgBufferState::new(self.dst.stage, self.dst.access);
        src_state.is_write() || dst_state.is_write()
    }

    pub fn to_gfx_barrier(&self, buffer: vk::Buffer) -> GfxBufferBarrier {
        GfxBufferBarrier::new()
            .buffer(buffer, 0, vk::WHOLE_SIZE)
            .src(self.src.stage, self.src.access)
            .dst(self.dst.stage, self.dst.access)
    }
}

/// 一个 pass 执行前（或整帧结束前）需要插入的 barrier 集合
#[derive(Clone, Debug, Default)]
pub struct PassBarriers {
    pub image_barriers: Vec<ImageBarrierDesc>,
    pub buffer_barriers: Vec<BufferBarrierDesc>,
}

impl PassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 仅在需要时记录
    pub fn add_image_barrier(&mut self, barrier: ImageBarrierDesc) {
        if barrier.needs_barrier() {
            self.image_barriers.push(barrier);
        }
    }

    pub fn add_buffer_barrier(&mut self, barrier: BufferBarrierDesc) {
        if barrier.needs_barrier() {
            self.buffer_barriers.push(barrier);
        }
    }

    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::handle::produce_image_handle;

    #[test]
    fn test_layout_change_needs_barrier() {
        let handle = produce_image_handle("chain-layout-change");
        let barrier = ImageBarrierDesc::new(
            handle,
            SyncState::from_image_state(RgImageState::UNDEFINED),
            SyncState::from_image_state(RgImageState::COLOR_ATTACHMENT_WRITE),
        );
        assert!(barrier.needs_barrier());
    }

    #[test]
    fn test_read_to_read_same_layout_skips_barrier() {
        let handle = produce_image_handle("chain-read-read");
        let barrier = ImageBarrierDesc::new(
            handle,
            SyncState::from_image_state(RgImageState::SHADER_READ_FRAGMENT),
            SyncState::from_image_state(RgImageState::SHADER_READ_COMPUTE),
        );
        assert!(!barrier.needs_barrier());
    }

    #[test]
    fn test_write_to_read_needs_barrier() {
        let handle = produce_image_handle("chain-write-read");
        let barrier = ImageBarrierDesc::new(
            handle,
            SyncState::from_image_state(RgImageState::STORAGE_WRITE_COMPUTE),
            SyncState::from_image_state(RgImageState::SHADER_READ_COMPUTE),
        );
        assert!(barrier.needs_barrier());
    }

    #[test]
    fn test_barrier_src_access_drops_reads() {
        let handle = produce_image_handle("chain-src-access");
        let barrier = ImageBarrierDesc::new(
            handle,
            SyncState::from_image_state(RgImageState::STORAGE_READ_WRITE_COMPUTE),
            SyncState::from_image_state(RgImageState::SHADER_READ_FRAGMENT),
        );
        let gfx_barrier = barrier.to_gfx_barrier(vk::Image::null());
        let inner = gfx_barrier.inner();
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::SHADER_SAMPLED_READ);
    }

    #[test]
    fn test_chain_offsets_are_sequential() {
        let mut chain = SyncChain::default();
        let a = chain.append(SyncState::from_image_state(RgImageState::UNDEFINED));
        let b = chain.append(SyncState::from_image_state(RgImageState::COLOR_ATTACHMENT_WRITE));
        assert_eq!((a, b), (0, 1));
        assert_eq!(chain.state_at(b).layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }
}
