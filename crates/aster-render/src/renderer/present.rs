//! 呈现面（windowing/swapchain 协作者）的接口
//!
//! swapchain 的创建与重建由外部驱动负责；renderer 只依赖这组操作。

use ash::vk;
use aster_gfx::commands::semaphore::GfxSemaphore;

use crate::{error::FrameError, graph::handle::ResourceHandle};

pub trait PresentDriver {
    /// swapchain 资源的句柄（rendergraph 的隐式 root）
    fn swapchain_resource(&self) -> ResourceHandle;

    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
    fn image_count(&self) -> usize;

    fn image(&self, index: u32) -> vk::Image;
    fn image_view(&self, index: u32) -> vk::ImageView;

    /// 获取下一张 image；`signal` 在 image 可用时触发
    ///
    /// # Errors
    /// surface 失效 → `FrameError::SwapchainOutOfDate`
    fn acquire(&mut self, signal: &GfxSemaphore) -> Result<u32, FrameError>;

    /// 提交呈现；`wait` 是渲染完成的 semaphore
    fn present(&mut self, index: u32, wait: &GfxSemaphore) -> Result<(), FrameError>;

    /// `SwapchainOutOfDate` 之后重建 swapchain
    fn recreate(&mut self) -> Result<(), FrameError>;
}
