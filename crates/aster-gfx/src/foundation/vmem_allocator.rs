use std::ops::Deref;

use ash::vk;

/// VMA 分配器封装
///
/// # Destroy
/// 需要手动调用 `destroy`，且必须晚于所有 buffer/image 的销毁。
pub struct VMemAllocator {
    allocator: vk_mem::Allocator,
}

impl VMemAllocator {
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> Self {
        let mut create_info = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        create_info.vulkan_api_version = vk::API_VERSION_1_3;
        create_info.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;

        let allocator = unsafe { vk_mem::Allocator::new(create_info).unwrap() };
        Self { allocator }
    }

    pub fn destroy(self) {
        // allocator 的 Drop 会调用 vmaDestroyAllocator
        drop(self.allocator);
    }
}

impl Deref for VMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.allocator
    }
}
