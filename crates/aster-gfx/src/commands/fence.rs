use ash::vk;

use crate::{foundation::debug::DebugType, gfx::Gfx};

/// # Destroy
/// 可以 Clone，因此需要手动 destroy
#[derive(Clone)]
pub struct GfxFence {
    fence: vk::Fence,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

impl GfxFence {
    pub fn new(signaled: bool, debug_name: &str) -> Self {
        let device = Gfx::get().device();
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None).unwrap() };

        let fence = Self { fence };
        device.set_debug_name(&fence, debug_name);
        fence
    }

    #[inline]
    pub fn vk_fence(&self) -> vk::Fence {
        self.fence
    }

    /// 等待 fence signal
    ///
    /// # Return
    /// 超时返回 `false`
    pub fn wait(&self, timeout_ns: u64) -> bool {
        let device = Gfx::get().device();
        match unsafe { device.wait_for_fences(std::slice::from_ref(&self.fence), true, timeout_ns) } {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(e) => panic!("wait_for_fences failed: {e:?}"),
        }
    }

    pub fn reset(&self) {
        unsafe {
            Gfx::get().device().reset_fences(std::slice::from_ref(&self.fence)).unwrap();
        }
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            Gfx::get().device().destroy_fence(self.fence, None);
        }
    }
}
