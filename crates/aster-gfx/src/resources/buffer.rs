use ash::vk;
use vk_mem::Alloc;

use crate::{foundation::debug::DebugType, gfx::Gfx};

/// VMA 分配的 buffer
///
/// Drop 时自动释放；mapped 指针在创建时确定，生命周期内不变。
pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,
    map_ptr: Option<*mut u8>,
    device_addr: Option<vk::DeviceAddress>,

    debug_name: String,
}

impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxBuffer {
    fn drop(&mut self) {
        let allocator = Gfx::get().allocator();
        unsafe {
            if self.map_ptr.is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
    }
}

// 创建与销毁
impl GfxBuffer {
    /// - `align`: buffer 起始地址的对齐要求，None 表示使用默认的 8 字节
    /// - `mem_map`: 是否常驻 map，用于 host 直接写入
    pub fn new(
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        align: Option<vk::DeviceSize>,
        mem_map: bool,
        name: impl AsRef<str>,
    ) -> Self {
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if mem_map {
                // host 顺序写入的场景
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (handle, mut allocation) = unsafe {
            Gfx::get()
                .allocator()
                .create_buffer_with_alignment(&buffer_ci, &alloc_ci, align.unwrap_or(8))
                .unwrap()
        };

        let map_ptr = if mem_map {
            Some(unsafe { Gfx::get().allocator().map_memory(&mut allocation).unwrap() })
        } else {
            None
        };

        let device_addr = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            Gfx::get()
                .device()
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(handle))
        });

        let buffer = Self {
            handle,
            allocation,
            size,
            map_ptr,
            device_addr,
            debug_name: name.as_ref().to_string(),
        };
        Gfx::get().device().set_debug_name(&buffer, name);
        buffer
    }

    /// host visible 的传输源 buffer
    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize, name: impl AsRef<str>) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC, None, true, name)
    }

    #[inline]
    pub fn destroy(self) {
        drop(self);
    }
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_addr.expect("buffer was not created with SHADER_DEVICE_ADDRESS usage")
    }

    #[inline]
    pub fn mapped_ptr(&self) -> *mut u8 {
        self.map_ptr.expect("buffer is not host mapped")
    }
}

// 数据写入
impl GfxBuffer {
    /// 通过 mmap 写入数据并 flush
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) {
        assert!(offset + data.len() as vk::DeviceSize <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped_ptr().add(offset as usize), data.len());
        }
        Gfx::get().allocator().flush_allocation(&self.allocation, offset, data.len() as vk::DeviceSize).unwrap();
    }

    /// 用临时 stage buffer 将大块数据同步上传到 device local buffer
    pub fn upload_sync(&self, data: &[u8]) {
        let stage = Self::new_stage_buffer(data.len() as vk::DeviceSize, format!("{}-stage", self.debug_name));
        stage.write_bytes(0, data);

        Gfx::get().one_time_exec(
            |cmd| {
                cmd.copy_buffer(
                    stage.vk_buffer(),
                    self.handle,
                    &[vk::BufferCopy {
                        size: data.len() as vk::DeviceSize,
                        ..Default::default()
                    }],
                );
            },
            format!("{}-upload", self.debug_name),
        );
    }
}
