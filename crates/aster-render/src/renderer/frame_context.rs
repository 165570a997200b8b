//! 每个在飞帧的瞬态状态
//!
//! encoder、scratch、command buffer、descriptor pool、同步原语都是
//! 帧私有的，绝不跨帧共享；帧 fence 完成之后统一回收。

use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;
use aster_gfx::{
    commands::{command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence, semaphore::GfxSemaphore},
    gfx::Gfx,
    resources::buffer::GfxBuffer,
};

use crate::{renderer::settings::RendererSettings, scratch::ScratchAllocator};

pub struct FrameContext {
    label: usize,

    command_pool: GfxCommandPool,
    /// 本帧 alloc 出去的 command buffer，reset 时统一释放
    allocated_commands: Vec<vk::CommandBuffer>,

    pub fence: GfxFence,
    pub image_acquired: GfxSemaphore,

    pub scratch: Rc<RefCell<ScratchAllocator>>,
    pub staging: Rc<RefCell<ScratchAllocator>>,

    /// 本帧内录制的命令还在引用的临时 buffer（如加速结构的 build scratch）
    pub keep_alive_buffers: Vec<GfxBuffer>,

    descriptor_pool: vk::DescriptorPool,
}

impl FrameContext {
    pub fn new(label: usize, settings: &RendererSettings) -> Self {
        let command_pool = GfxCommandPool::new(
            Gfx::get().gfx_queue().queue_family().queue_family_index,
            vk::CommandPoolCreateFlags::empty(),
            &format!("frame-{label}"),
        );

        let scratch = ScratchAllocator::new_device(
            format!("frame-{label}-scratch"),
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            settings.scratch_initial_size,
            settings.scratch_max_size,
        );
        let staging = ScratchAllocator::new_device(
            format!("frame-{label}-staging"),
            vk::BufferUsageFlags::TRANSFER_SRC,
            settings.staging_initial_size,
            settings.staging_max_size,
        );

        let descriptor_pool = Self::create_descriptor_pool(label);

        Self {
            label,
            command_pool,
            allocated_commands: vec![],
            keep_alive_buffers: vec![],
            // 初始为 signaled，第一次 wait 直接通过
            fence: GfxFence::new(true, &format!("frame-{label}")),
            image_acquired: GfxSemaphore::new(&format!("frame-{label}-image-acquired")),
            scratch: Rc::new(RefCell::new(scratch)),
            staging: Rc::new(RefCell::new(staging)),
            descriptor_pool,
        }
    }

    fn create_descriptor_pool(label: usize) -> vk::DescriptorPool {
        const PER_TYPE: u32 = 1024;
        let pool_sizes = [
            vk::DescriptorPoolSize::default().ty(vk::DescriptorType::UNIFORM_BUFFER).descriptor_count(PER_TYPE),
            vk::DescriptorPoolSize::default().ty(vk::DescriptorType::STORAGE_BUFFER).descriptor_count(PER_TYPE),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(PER_TYPE),
            vk::DescriptorPoolSize::default().ty(vk::DescriptorType::STORAGE_IMAGE).descriptor_count(PER_TYPE),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(64),
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo::default().max_sets(1024).pool_sizes(&pool_sizes);
        let pool = unsafe { Gfx::get().device().create_descriptor_pool(&pool_ci, None).unwrap() };
        Gfx::get().device().set_object_debug_name(pool, format!("DescriptorPool::frame-{label}"));
        pool
    }

    #[inline]
    pub fn label(&self) -> usize {
        self.label
    }

    #[inline]
    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    /// 等待本帧上一轮的 GPU 工作完成
    ///
    /// # Return
    /// 超时返回 `false`
    pub fn wait_retired(&self, timeout_ns: u64) -> bool {
        self.fence.wait(timeout_ns)
    }

    /// fence 通过之后回收本帧所有瞬态资源
    pub fn reset(&mut self) {
        self.fence.reset();

        if !self.allocated_commands.is_empty() {
            unsafe {
                Gfx::get().device().free_command_buffers(self.command_pool.vk_handle(), &self.allocated_commands);
            }
            self.allocated_commands.clear();
        }
        self.command_pool.reset();

        self.scratch.borrow_mut().reset();
        self.staging.borrow_mut().reset();
        self.keep_alive_buffers.clear();

        unsafe {
            Gfx::get()
                .device()
                .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
                .unwrap();
        }
    }

    pub fn alloc_command_buffer(&mut self, name: &str) -> GfxCommandBuffer {
        let cmd = GfxCommandBuffer::new(&self.command_pool, &format!("frame-{}-{}", self.label, name));
        self.allocated_commands.push(cmd.vk_handle());
        cmd
    }

    /// 从本帧的 pool 分配 descriptor set
    pub fn alloc_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        let layouts = [layout];
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.descriptor_pool).set_layouts(&layouts);
        unsafe { Gfx::get().device().allocate_descriptor_sets(&alloc_info).unwrap()[0] }
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().device().destroy_descriptor_pool(self.descriptor_pool, None);
        }
        self.fence.destroy();
        self.image_acquired.destroy();
        self.command_pool.destroy();
        // scratch/staging 的 GfxBuffer 随 Rc drop 释放
    }
}
