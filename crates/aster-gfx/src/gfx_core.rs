use std::ffi::CStr;
use std::rc::Rc;

use ash::vk;

use crate::{
    commands::command_queue::GfxCommandQueue,
    foundation::{
        debug::GfxDebugMessenger, device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice,
    },
};

/// Vulkan 核心对象集合
///
/// Entry、Instance、PhysicalDevice、Device、Queue。
/// 不包含内存分配器等高层抽象。
pub struct GfxCore {
    /// Vulkan 库入口
    ///
    /// drop 之后会卸载动态库，需要保证该字段最后销毁
    pub(crate) vk_entry: ash::Entry,

    pub(crate) instance: GfxInstance,
    pub(crate) physical_device: GfxPhysicalDevice,

    /// 使用 `Rc` 共享设备函数指针：Queue、CommandBuffer 等都需要它，
    /// 且设备必须在所有引用者之后销毁
    pub(crate) gfx_device: Rc<GfxDevice>,

    pub(crate) debug_messenger: GfxDebugMessenger,

    pub(crate) gfx_queue: GfxCommandQueue,
    pub(crate) transfer_queue: GfxCommandQueue,
}

// 创建与销毁
impl GfxCore {
    pub fn new(app_name: &str, engine_name: &str, instance_extra_exts: Vec<&'static CStr>) -> Self {
        let vk_entry = unsafe { ash::Entry::load() }.expect("failed to load vulkan entry");
        let instance = GfxInstance::new(&vk_entry, app_name, engine_name, instance_extra_exts);
        let physical_device = GfxPhysicalDevice::new_discrete_gpu(instance.ash_instance());

        // 从同一个 queue family 申请两个 queue：graphics + transfer。
        // transfer 用独立 queue 可以让上传和渲染在驱动层面并行提交。
        let gfx_family_idx = physical_device.gfx_queue_family.queue_family_index;
        let queue_count = physical_device.gfx_queue_family.queue_count.min(2);
        let priorities = vec![1.0; queue_count as usize];
        let queue_create_infos =
            [vk::DeviceQueueCreateInfo::default().queue_family_index(gfx_family_idx).queue_priorities(&priorities)];

        let device = Rc::new(GfxDevice::new(instance.ash_instance(), physical_device.vk_handle, &queue_create_infos));

        let gfx_queue = GfxCommandQueue {
            vk_queue: unsafe { device.get_device_queue(gfx_family_idx, 0) },
            queue_family: physical_device.gfx_queue_family.clone(),
            device: device.clone(),
        };
        // queue family 里只有一个 queue 时，transfer 与 graphics 共用
        let transfer_queue = GfxCommandQueue {
            vk_queue: unsafe { device.get_device_queue(gfx_family_idx, queue_count - 1) },
            queue_family: physical_device.gfx_queue_family.clone(),
            device: device.clone(),
        };

        let debug_messenger = GfxDebugMessenger::new(&vk_entry, instance.ash_instance());

        device.set_object_debug_name(gfx_queue.vk_queue, "GfxQueue::graphics");
        device.set_object_debug_name(transfer_queue.vk_queue, "GfxQueue::transfer");

        Self {
            vk_entry,
            instance,
            physical_device,
            gfx_device: device,
            debug_messenger,
            gfx_queue,
            transfer_queue,
        }
    }

    pub fn destroy(self) {
        self.debug_messenger.destroy();
        self.gfx_device.destroy();
        self.physical_device.destroy();
        self.instance.destroy();
    }
}
