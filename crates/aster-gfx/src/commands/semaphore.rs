use ash::vk;

use crate::{foundation::debug::DebugType, gfx::Gfx};

/// # Destroy
/// 可以 Clone，因此需要手动 destroy
#[derive(Clone)]
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}

impl GfxSemaphore {
    /// binary semaphore
    pub fn new(debug_name: &str) -> Self {
        let device = Gfx::get().device();
        let semaphore = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None).unwrap() };

        let semaphore = Self { semaphore };
        device.set_debug_name(&semaphore, debug_name);
        semaphore
    }

    /// timeline semaphore
    pub fn new_timeline(initial_value: u64, debug_name: &str) -> Self {
        let device = Gfx::get().device();
        let mut type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut type_ci);
        let semaphore = unsafe { device.create_semaphore(&semaphore_ci, None).unwrap() };

        let semaphore = Self { semaphore };
        device.set_debug_name(&semaphore, debug_name);
        semaphore
    }

    #[inline]
    pub fn vk_semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// 阻塞等待 timeline 达到 value
    ///
    /// # Return
    /// 超时返回 `false`
    pub fn wait_timeline(&self, value: u64, timeout_ns: u64) -> bool {
        let device = Gfx::get().device();
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(std::slice::from_ref(&self.semaphore))
            .values(std::slice::from_ref(&value));
        match unsafe { device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => true,
            Err(vk::Result::TIMEOUT) => false,
            Err(e) => panic!("wait_semaphores failed: {e:?}"),
        }
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            Gfx::get().device().destroy_semaphore(self.semaphore, None);
        }
    }
}
