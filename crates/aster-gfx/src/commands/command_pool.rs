use std::rc::Rc;

use ash::vk;

use crate::{
    foundation::{debug::DebugType, device::GfxDevice},
    gfx::Gfx,
};

pub struct GfxCommandPool {
    vk_handle: vk::CommandPool,
    queue_family_index: u32,
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

// 创建与销毁
impl GfxCommandPool {
    pub fn new(queue_family_index: u32, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> Self {
        Self::new_internal(
            Gfx::get().gfx_core.gfx_device.clone(),
            queue_family_index,
            flags,
            debug_name,
        )
    }

    /// Gfx 单例尚未就绪时使用的构造路径
    pub(crate) fn new_internal(
        device: Rc<GfxDevice>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> Self {
        let pool_ci = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index).flags(flags);
        let vk_handle = unsafe { device.create_command_pool(&pool_ci, None).unwrap() };

        let pool = Self {
            vk_handle,
            queue_family_index,
        };
        device.set_debug_name(&pool, debug_name);
        pool
    }

    pub fn destroy(self) {
        self.destroy_internal(Gfx::get().device());
    }

    pub(crate) fn destroy_internal(&self, device: &GfxDevice) {
        unsafe {
            device.destroy_command_pool(self.vk_handle, None);
        }
    }
}

impl GfxCommandPool {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandPool {
        self.vk_handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// 重置 pool 中所有 command buffer，释放其记录的命令
    pub fn reset(&self) {
        unsafe {
            Gfx::get()
                .device()
                .reset_command_pool(self.vk_handle, vk::CommandPoolResetFlags::empty())
                .unwrap();
        }
    }
}
