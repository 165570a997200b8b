use ash::vk;
use itertools::Itertools;

/// Queue family 信息
#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// 物理设备封装
///
/// 选取独显，并缓存 properties 和 queue family 信息。
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,
    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    pub(crate) gfx_queue_family: QueueFamily,
}

impl GfxPhysicalDevice {
    /// 选择第一个 discrete GPU；没有独显时回退到任意支持 graphics 的设备
    pub fn new_discrete_gpu(instance: &ash::Instance) -> Self {
        let pdevices = unsafe { instance.enumerate_physical_devices().unwrap() };
        assert!(!pdevices.is_empty(), "no vulkan physical device found");

        let candidates = pdevices
            .iter()
            .map(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(*pdevice) };
                (*pdevice, props)
            })
            .collect_vec();

        let (vk_handle, basic_props) = candidates
            .iter()
            .find(|(_, props)| props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| candidates.first())
            .copied()
            .unwrap();

        let device_name = basic_props.device_name_as_c_str().unwrap_or(c"unknown");
        log::info!("physical device: {:?}", device_name);

        let gfx_queue_family = Self::find_gfx_queue_family(instance, vk_handle);

        Self {
            vk_handle,
            basic_props,
            gfx_queue_family,
        }
    }

    fn find_gfx_queue_family(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> QueueFamily {
        let family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        family_props
            .iter()
            .enumerate()
            .find(|(_, props)| {
                props.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
            })
            .map(|(idx, props)| QueueFamily {
                queue_family_index: idx as u32,
                queue_flags: props.queue_flags,
                queue_count: props.queue_count,
            })
            .expect("no queue family supporting graphics + compute + transfer")
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.vk_handle
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.basic_props
    }

    /// uniform buffer 的 descriptor 更新时，offset 必须是这个值的整数倍
    #[inline]
    pub fn min_ubo_offset_align(&self) -> vk::DeviceSize {
        self.basic_props.limits.min_uniform_buffer_offset_alignment
    }

    pub fn destroy(self) {
        // physical device 没有需要销毁的资源
    }
}
