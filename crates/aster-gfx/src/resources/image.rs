use ash::vk;
use vk_mem::Alloc;

use crate::{foundation::debug::DebugType, gfx::Gfx};

/// VMA 分配的 image
///
/// swapchain image 通过 `from_external` 接管，不持有 allocation，也不负责销毁。
pub struct GfxImage {
    handle: vk::Image,
    allocation: Option<vk_mem::Allocation>,

    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    array_layers: u32,
    samples: vk::SampleCountFlags,

    debug_name: String,
}

impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxImage {
    fn drop(&mut self) {
        if let Some(allocation) = &mut self.allocation {
            unsafe {
                Gfx::get().allocator().destroy_image(self.handle, allocation);
            }
        }
    }
}

// 创建与销毁
impl GfxImage {
    pub fn new(image_ci: &vk::ImageCreateInfo, name: impl AsRef<str>) -> Self {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (handle, allocation) = unsafe { Gfx::get().allocator().create_image(image_ci, &alloc_ci).unwrap() };

        let image = Self {
            handle,
            allocation: Some(allocation),
            format: image_ci.format,
            extent: image_ci.extent,
            mip_levels: image_ci.mip_levels,
            array_layers: image_ci.array_layers,
            samples: image_ci.samples,
            debug_name: name.as_ref().to_string(),
        };
        Gfx::get().device().set_debug_name(&image, name);
        image
    }

    /// 接管外部创建的 image（swapchain image）
    pub fn from_external(
        handle: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        name: impl AsRef<str>,
    ) -> Self {
        let image = Self {
            handle,
            allocation: None,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            debug_name: name.as_ref().to_string(),
        };
        Gfx::get().device().set_debug_name(&image, name);
        image
    }

    #[inline]
    pub fn destroy(self) {
        drop(self);
    }
}

// getters
impl GfxImage {
    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
