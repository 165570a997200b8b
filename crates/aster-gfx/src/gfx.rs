use std::ffi::CStr;

use ash::vk;

use crate::{
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, command_queue::GfxCommandQueue,
        submit_info::GfxSubmitInfo,
    },
    foundation::{device::GfxDevice, physical_device::GfxPhysicalDevice, vmem_allocator::VMemAllocator},
    gfx_core::GfxCore,
};

/// Vulkan 图形上下文单例
///
/// 管理 Instance、Device、Queue、内存分配器。单例模式只适用于单线程环境，
/// API 提交本身也是单线程的。
///
/// # 初始化流程
/// ```ignore
/// Gfx::init("my-app", vec![]);
/// let device = Gfx::get().device();
/// // ...
/// Gfx::shutdown();
/// ```
pub struct Gfx {
    pub(crate) gfx_core: GfxCore,
    pub(crate) vm_allocator: VMemAllocator,

    /// 用于 one-shot 命令的临时 command pool
    pub(crate) temp_command_pool: GfxCommandPool,
}

impl Gfx {
    const ENGINE_NAME: &'static str = "Aster";

    fn new(app_name: &str, instance_extra_exts: Vec<&'static CStr>) -> Self {
        let gfx_core = GfxCore::new(app_name, Self::ENGINE_NAME, instance_extra_exts);

        let temp_command_pool = GfxCommandPool::new_internal(
            gfx_core.gfx_device.clone(),
            gfx_core.physical_device.gfx_queue_family.queue_family_index,
            vk::CommandPoolCreateFlags::empty(),
            "gfx-temp",
        );

        let vm_allocator = VMemAllocator::new(
            gfx_core.instance.ash_instance(),
            gfx_core.physical_device.vk_handle,
            &gfx_core.gfx_device.device,
        );

        Self {
            gfx_core,
            vm_allocator,
            temp_command_pool,
        }
    }
}

// 仅用于单线程环境
static mut G_GFX: Option<Gfx> = None;

// 单例
impl Gfx {
    /// # Panics
    /// 未初始化时 panic
    #[inline]
    pub fn get() -> &'static Gfx {
        unsafe {
            let ptr = std::ptr::addr_of!(G_GFX);
            (*ptr).as_ref().expect("Gfx not initialized. Call Gfx::init() first.")
        }
    }

    pub fn is_initialized() -> bool {
        unsafe {
            let ptr = std::ptr::addr_of!(G_GFX);
            (*ptr).is_some()
        }
    }

    /// # Panics
    /// 重复初始化时 panic
    pub fn init(app_name: &str, instance_extra_exts: Vec<&'static CStr>) {
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            assert!((*ptr).is_none(), "Gfx already initialized");
            *ptr = Some(Self::new(app_name, instance_extra_exts));
        }
    }

    /// 销毁单例；之后不允许再调用 `Gfx::get()`
    pub fn shutdown() {
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            let gfx = (*ptr).take().expect("Gfx not initialized");

            gfx.gfx_core.gfx_device.wait_idle();
            gfx.temp_command_pool.destroy_internal(&gfx.gfx_core.gfx_device);
            gfx.vm_allocator.destroy();
            gfx.gfx_core.destroy();
        }
    }
}

// getters
impl Gfx {
    #[inline]
    pub fn device(&self) -> &GfxDevice {
        &self.gfx_core.gfx_device
    }

    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        self.gfx_core.instance.ash_instance()
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.gfx_core.physical_device
    }

    #[inline]
    pub fn allocator(&self) -> &VMemAllocator {
        &self.vm_allocator
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.gfx_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.transfer_queue
    }
}

// tools
impl Gfx {
    /// 在候选格式中筛选出 tiling/feature 都支持的格式
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Vec<vk::Format> {
        candidates
            .iter()
            .filter(|f| {
                let props = unsafe {
                    self.gfx_core
                        .instance
                        .ash_instance()
                        .get_physical_device_format_properties(self.physical_device().vk_handle(), **f)
                };
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                    _ => panic!("unsupported tiling"),
                }
            })
            .copied()
            .collect()
    }

    /// 立即执行一个 command，并同步等待完成
    pub fn one_time_exec<F, R>(&self, func: F, name: impl AsRef<str>) -> R
    where
        F: FnOnce(&GfxCommandBuffer) -> R,
    {
        let cmd = GfxCommandBuffer::new(&self.temp_command_pool, &format!("one-time-{}", name.as_ref()));

        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name.as_ref());
        let result = func(&cmd);
        cmd.end();

        self.gfx_queue().submit(vec![GfxSubmitInfo::new(std::slice::from_ref(&cmd))], None);
        self.gfx_queue().wait_idle();
        unsafe {
            self.device().free_command_buffers(self.temp_command_pool.vk_handle(), &[cmd.vk_handle()]);
        }

        result
    }

    pub fn wait_idle(&self) {
        self.device().wait_idle();
    }
}
