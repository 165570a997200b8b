use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{fence::GfxFence, submit_info::GfxSubmitInfo},
    foundation::{device::GfxDevice, physical_device::QueueFamily},
};

/// Vulkan Queue 封装
///
/// queue 本身不需要销毁，随 device 一起释放。
pub struct GfxCommandQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: QueueFamily,
    pub(crate) device: Rc<GfxDevice>,
}

impl GfxCommandQueue {
    #[inline]
    pub fn vk_queue(&self) -> vk::Queue {
        self.vk_queue
    }

    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }

    pub fn submit(&self, submit_infos: Vec<GfxSubmitInfo>, fence: Option<&GfxFence>) {
        let vk_submit_infos = submit_infos.iter().map(|si| si.submit_info()).collect_vec();
        unsafe {
            self.device
                .queue_submit2(
                    self.vk_queue,
                    &vk_submit_infos,
                    fence.map_or(vk::Fence::null(), |f| f.vk_fence()),
                )
                .unwrap();
        }
    }

    pub fn wait_idle(&self) {
        unsafe {
            self.device.queue_wait_idle(self.vk_queue).unwrap();
        }
    }
}
