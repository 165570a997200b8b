//! 资源的声明式描述
//!
//! 句柄绑定的 `ResourceInfo` 在 backing 分配的生命周期内不变；
//! 重新绑定需要重新声明。

use ash::vk;

/// 图像的声明信息
#[derive(Clone, Copy, Debug)]
pub struct ImageInfo {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            format: vk::Format::R8G8B8A8_UNORM,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED,
        }
    }
}

impl ImageInfo {
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// 该格式是否带 depth aspect
    pub fn has_depth(&self) -> bool {
        matches!(
            self.format,
            vk::Format::D16_UNORM
                | vk::Format::X8_D24_UNORM_PACK32
                | vk::Format::D32_SFLOAT
                | vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
        )
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.has_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// 缓冲区的声明信息
#[derive(Clone, Copy, Debug)]
pub struct BufferInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }
}

impl BufferInfo {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self { size, usage }
    }
}

/// 句柄 → 声明信息
#[derive(Clone, Copy, Debug)]
pub enum ResourceInfo {
    Image(ImageInfo),
    Buffer(BufferInfo),
}

impl ResourceInfo {
    #[inline]
    pub fn as_image(&self) -> Option<&ImageInfo> {
        match self {
            ResourceInfo::Image(info) => Some(info),
            _ => None,
        }
    }

    #[inline]
    pub fn as_buffer(&self) -> Option<&BufferInfo> {
        match self {
            ResourceInfo::Buffer(info) => Some(info),
            _ => None,
        }
    }
}
