use ash::vk;

use crate::{foundation::debug::DebugType, gfx::Gfx, resources::image::GfxImage};

/// image view 的描述，同时作为 view cache 的 key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxImageViewDesc {
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
}

impl GfxImageViewDesc {
    #[inline]
    pub fn new_2d(format: vk::Format, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            format,
            aspect,
            base_mip_level: 0,
            level_count: 1,
        }
    }
}

pub struct GfxImageView {
    handle: vk::ImageView,
    desc: GfxImageViewDesc,
}

impl DebugType for GfxImageView {
    fn debug_type_name() -> &'static str {
        "GfxImageView"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxImageView {
    fn drop(&mut self) {
        unsafe {
            Gfx::get().device().destroy_image_view(self.handle, None);
        }
    }
}

impl GfxImageView {
    pub fn new(image: &GfxImage, desc: GfxImageViewDesc, name: impl AsRef<str>) -> Self {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image.vk_image())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: desc.base_mip_level,
                level_count: desc.level_count,
                base_array_layer: 0,
                layer_count: 1,
            });

        let handle = unsafe { Gfx::get().device().create_image_view(&view_ci, None).unwrap() };
        let view = Self { handle, desc };
        Gfx::get().device().set_debug_name(&view, name);
        view
    }

    #[inline]
    pub fn vk_image_view(&self) -> vk::ImageView {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxImageViewDesc {
        &self.desc
    }

    #[inline]
    pub fn destroy(self) {
        drop(self);
    }
}
