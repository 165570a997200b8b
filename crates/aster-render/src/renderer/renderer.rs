//! 帧编排
//!
//! 单线程驱动整帧：acquire → 回收退役帧 → 编译 rendergraph → setup 回调
//! → execute 回调录制 → 回放提交 → present。同时在飞的帧数由配置决定，
//! 上限是 swapchain 的 image 数量。

use std::collections::HashSet;
use std::path::Path;

use ash::vk;
use aster_gfx::{
    commands::{semaphore::GfxSemaphore, submit_info::GfxSubmitInfo},
    gfx::Gfx,
    pipelines::shader::{ShaderCompiler, ShaderModuleRef},
};

use crate::{
    encoder::encoder::CommandEncoder,
    error::{FrameError, PipelineError, RenderError},
    graph::{compile::ExecutionPlan, handle::ResourceHandle, resource::ImageInfo},
    module::RenderModule,
    renderer::{backend::RenderBackend, frame_context::FrameContext, present::PresentDriver, settings::RendererSettings},
};

pub struct Renderer {
    settings: RendererSettings,
    driver: Box<dyn PresentDriver>,

    backend: RenderBackend,
    frames: Vec<FrameContext>,
    frame_counter: u64,

    /// 每张 swapchain image 一个「渲染完成」semaphore
    render_complete: Vec<GfxSemaphore>,

    /// 连续 fence 超时的次数；超过预算视为设备丢失
    timeout_strikes: u32,
    device_lost: bool,
}

// 生命周期
impl Renderer {
    /// `Gfx` 必须先初始化（present driver 创建 surface 也依赖它）
    pub fn new(settings: RendererSettings, driver: Box<dyn PresentDriver>, compiler: Box<dyn ShaderCompiler>) -> Self {
        assert!(Gfx::is_initialized(), "Gfx must be initialized before creating a Renderer");

        let fif_count = settings.frames_in_flight.clamp(1, driver.image_count());
        let frames = (0..fif_count).map(|label| FrameContext::new(label, &settings)).collect();

        let render_complete = (0..driver.image_count())
            .map(|i| GfxSemaphore::new(&format!("render-complete-{i}")))
            .collect();

        let backend = RenderBackend::new(compiler, settings.shader_hot_reload);

        log::info!("renderer up: {} frames in flight, {} swapchain images", fif_count, driver.image_count());

        Self {
            settings,
            driver,
            backend,
            frames,
            frame_counter: 0,
            render_complete,
            timeout_strikes: 0,
            device_lost: false,
        }
    }

    pub fn destroy(mut self) {
        Gfx::get().wait_idle();

        for frame in self.frames.drain(..) {
            frame.destroy();
        }
        for semaphore in self.render_complete.drain(..) {
            semaphore.destroy();
        }
        self.backend.destroy();
    }
}

// getters
impl Renderer {
    #[inline]
    pub fn swapchain_resource(&self) -> ResourceHandle {
        self.driver.swapchain_resource()
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.driver.extent()
    }

    /// PSO 注册、BLAS 几何注册等都走 backend
    #[inline]
    pub fn backend(&mut self) -> &mut RenderBackend {
        &mut self.backend
    }

    /// 创建（或复用）shader module；编译委托给外部编译器
    pub fn create_shader_module(
        &mut self,
        path: impl AsRef<Path>,
        stage: vk::ShaderStageFlags,
        macros: &[(String, String)],
    ) -> Result<ShaderModuleRef, PipelineError> {
        self.backend.shader_cache.create(path, stage, macros)
    }
}

// 帧循环
impl Renderer {
    /// 渲染并呈现一帧
    ///
    /// rendergraph 错误只放弃当前帧，上一帧的输出保持在屏上；
    /// `SwapchainOutOfDate` 内部重建后重试一次 acquire；
    /// fence 超时在预算内返回 `Timeout`，预算耗尽转为 `DeviceLost`。
    pub fn update(&mut self, module: &RenderModule) -> Result<(), RenderError> {
        if self.device_lost {
            return Err(FrameError::DeviceLost.into());
        }

        let frame_idx = (self.frame_counter % self.frames.len() as u64) as usize;

        // 1. 等待本 slot 的上一帧退役
        if !self.frames[frame_idx].wait_retired(self.settings.fence_timeout_ns) {
            self.timeout_strikes += 1;
            if self.timeout_strikes > self.settings.fence_retry_budget {
                self.device_lost = true;
                log::error!("fence timeout budget exhausted, declaring device lost");
                return Err(FrameError::DeviceLost.into());
            }
            return Err(FrameError::Timeout.into());
        }
        self.timeout_strikes = 0;

        // 2. 回收瞬态资源
        self.frames[frame_idx].reset();

        // 3. shader 热重载
        if self.settings.shader_hot_reload && self.backend.shader_cache.poll_sources() > 0 {
            self.backend.pipeline_cache.invalidate_pipelines();
        }

        // 4. acquire；OUT_OF_DATE 重建后重试一次
        let image_index = match self.driver.acquire(&self.frames[frame_idx].image_acquired) {
            Ok(index) => index,
            Err(FrameError::SwapchainOutOfDate) => {
                log::info!("swapchain out of date, recreating");
                self.driver.recreate()?;
                self.backend.framebuffer_cache.clear();
                self.driver.acquire(&self.frames[frame_idx].image_acquired)?
            }
            Err(e) => return Err(e.into()),
        };

        // 5. 编译
        let extent = self.driver.extent();
        let swapchain_info = ImageInfo::new_2d(
            extent.width,
            extent.height,
            self.driver.format(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        let mut plan = ExecutionPlan::plan(module, self.driver.swapchain_resource(), Some(swapchain_info))?;

        // 6. setup 回调：返回 false 的 pass 软取消
        let mut rejected = HashSet::new();
        for (idx, entry) in plan.entries().iter().enumerate() {
            let mut pass = entry.pass.borrow_mut();
            let pass_name = pass.name().to_string();
            if let Some(setup) = pass.setup_fn.as_mut()
                && !setup()
            {
                log::debug!("pass `{pass_name}` cancelled by setup callback");
                rejected.insert(idx);
            }
        }
        plan.remove_rejected(&rejected);

        // 7. sync chain 与 attachment 推导
        let graph = plan.finalize()?;

        // 8. 物理资源
        self.backend.prepare_resources(&graph);

        // 9. execute 回调录制命令流；scratch 耗尽则放弃整帧（不提交）
        let frame = &mut self.frames[frame_idx];
        let mut encoders = Vec::with_capacity(graph.passes.len());
        for pass in &graph.passes {
            let encoder_extent = if pass.extent == (0, 0) {
                extent
            } else {
                vk::Extent2D {
                    width: pass.extent.0,
                    height: pass.extent.1,
                }
            };
            let mut encoder = CommandEncoder::new(encoder_extent, frame.scratch.clone(), frame.staging.clone());

            let mut pass_ref = pass.pass.borrow_mut();
            if let Some(execute) = pass_ref.execute_fn.as_mut() {
                execute(&mut encoder);
            }
            drop(pass_ref);

            if let Some(err) = encoder.take_error() {
                log::error!("pass `{}` failed during recording, frame aborted: {err}", pass.name);
                return Err(err.into());
            }
            encoders.push(encoder);
        }

        // 10. 回放进 command buffer
        let swapchain_image = (self.driver.image(image_index), self.driver.image_view(image_index));
        let cmd = self.backend.execute(&graph, &encoders, frame, swapchain_image)?;

        // 11. 提交：等 image 可用，发渲染完成信号，挂帧 fence
        let submit_info = GfxSubmitInfo::new(std::slice::from_ref(&cmd))
            .wait(&frame.image_acquired, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, None)
            .signal(
                &self.render_complete[image_index as usize],
                vk::PipelineStageFlags2::ALL_COMMANDS,
                None,
            );
        Gfx::get().gfx_queue().submit(vec![submit_info], Some(&frame.fence));

        // 12. present；此处的 OUT_OF_DATE 下一帧处理
        match self.driver.present(image_index, &self.render_complete[image_index as usize]) {
            Ok(()) => {}
            Err(FrameError::SwapchainOutOfDate) => {
                log::info!("present reported out of date, deferring recreation to next frame");
            }
            Err(e) => return Err(e.into()),
        }

        self.frame_counter += 1;
        Ok(())
    }
}
