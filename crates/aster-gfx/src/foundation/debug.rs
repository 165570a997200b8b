use std::ffi::CStr;

use ash::vk;

/// 为 Vulkan 对象提供统一的 debug name 前缀
pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

/// Debug messenger，将 validation layer 的输出转发到 log
pub struct GfxDebugMessenger {
    debug_utils_instance: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMessenger {
    pub fn new(vk_entry: &ash::Entry, instance: &ash::Instance) -> Self {
        let debug_utils_instance = ash::ext::debug_utils::Instance::new(vk_entry, instance);
        let messenger = unsafe {
            debug_utils_instance.create_debug_utils_messenger(&Self::messenger_ci(), None).unwrap()
        };
        Self {
            debug_utils_instance,
            messenger,
        }
    }

    pub fn destroy(self) {
        unsafe {
            self.debug_utils_instance.destroy_debug_utils_messenger(self.messenger, None);
        }
    }

    pub fn messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let msg = unsafe {
        let callback_data = *p_callback_data;
        if callback_data.p_message.is_null() {
            std::borrow::Cow::from("")
        } else {
            CStr::from_ptr(callback_data.p_message).to_string_lossy()
        }
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{message_type:?}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{message_type:?}] {msg}"),
        _ => log::info!("[{message_type:?}] {msg}"),
    }

    // 只有 layer 开发者才需要返回 TRUE
    vk::FALSE
}
