use std::ffi::{CStr, CString};

use ash::vk;
use itertools::Itertools;

use crate::foundation::debug::GfxDebugMessenger;

/// Vulkan Instance 封装
pub struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,
}

impl GfxInstance {
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_exts: Vec<&'static CStr>,
    ) -> Self {
        let app_name = CString::new(app_name).unwrap();
        let engine_name = CString::new(engine_name).unwrap();

        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .engine_name(engine_name.as_c_str())
            .api_version(vk::API_VERSION_1_3);

        let mut exts = extra_exts;
        exts.push(ash::ext::debug_utils::NAME);
        let ext_ptrs = exts.iter().map(|e| e.as_ptr()).collect_vec();
        log::info!("instance exts: {:?}", exts);

        // validation layer 由环境（vkconfig 或 VK_INSTANCE_LAYERS）控制是否启用
        let mut debug_ci = GfxDebugMessenger::messenger_ci();
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&ext_ptrs)
            .push_next(&mut debug_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None).unwrap() };
        Self { ash_instance }
    }

    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }

    pub fn destroy(self) {
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}
