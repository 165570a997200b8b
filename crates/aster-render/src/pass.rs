//! render pass 的声明
//!
//! attachment、采样纹理、显式资源使用都在构建期声明；setup 回调只做
//! 放行/取消的决定，execute 回调拿到 encoder 录制命令。
//! attachment 的声明顺序就是 shader 看到的绑定顺序。

use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;

use crate::{
    encoder::encoder::CommandEncoder,
    error::ResourceError,
    graph::{
        handle::ResourceHandle,
        state::RgImageState,
        usage::{AccessKind, ResourceUsage, merge_usages},
    },
};

pub const MAX_COLOR_ATTACHMENTS: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PassType {
    Draw,
    Compute,
    Transfer,
}

/// attachment 声明
///
/// load/store 为 `None` 时由编译器根据 sync chain 推断；
/// `final_layout` 只对非 swapchain 的 root pass 有意义，显式声明
/// 离开该 pass 之后的 layout。
#[derive(Clone, Copy)]
pub struct AttachmentInfo {
    pub handle: ResourceHandle,
    pub load_op: Option<vk::AttachmentLoadOp>,
    pub store_op: Option<vk::AttachmentStoreOp>,
    pub clear_value: vk::ClearValue,
    pub final_layout: Option<vk::ImageLayout>,
}

impl AttachmentInfo {
    pub fn new(handle: ResourceHandle) -> Self {
        Self {
            handle,
            load_op: None,
            store_op: None,
            clear_value: vk::ClearValue::default(),
            final_layout: None,
        }
    }

    #[inline]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_value = vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        };
        self
    }

    #[inline]
    pub fn with_clear_depth(mut self, depth: f32, stencil: u32) -> Self {
        self.clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        };
        self
    }

    #[inline]
    pub fn with_load_op(mut self, load_op: vk::AttachmentLoadOp) -> Self {
        self.load_op = Some(load_op);
        self
    }

    #[inline]
    pub fn with_store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.store_op = Some(store_op);
        self
    }

    #[inline]
    pub fn with_final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.final_layout = Some(layout);
        self
    }
}

pub type SetupFn = Box<dyn FnMut() -> bool>;
pub type ExecuteFn = Box<dyn FnMut(&mut CommandEncoder)>;

pub struct RenderPass {
    name: String,
    pass_type: PassType,

    width: u32,
    height: u32,
    samples: vk::SampleCountFlags,

    is_root: bool,
    sort_key: u64,

    color_attachments: Vec<AttachmentInfo>,
    depth_stencil_attachment: Option<AttachmentInfo>,
    sampled_textures: Vec<ResourceHandle>,
    explicit_uses: Vec<ResourceUsage>,

    pub(crate) setup_fn: Option<SetupFn>,
    pub(crate) execute_fn: Option<ExecuteFn>,
}

// 构建
impl RenderPass {
    pub fn new(name: impl Into<String>, pass_type: PassType) -> Self {
        Self {
            name: name.into(),
            pass_type,
            width: 0,
            height: 0,
            samples: vk::SampleCountFlags::TYPE_1,
            is_root: false,
            sort_key: 0,
            color_attachments: vec![],
            depth_stencil_attachment: None,
            sampled_textures: vec![],
            explicit_uses: vec![],
            setup_fn: None,
            execute_fn: None,
        }
    }

    pub fn add_color_attachment(mut self, attachment: AttachmentInfo) -> Self {
        assert!(
            self.color_attachments.len() < MAX_COLOR_ATTACHMENTS,
            "pass `{}` exceeds {MAX_COLOR_ATTACHMENTS} color attachments",
            self.name
        );
        self.color_attachments.push(attachment);
        self
    }

    pub fn set_depth_stencil_attachment(mut self, attachment: AttachmentInfo) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    /// 声明采样纹理；隐含 read 访问
    pub fn sample_texture(mut self, handle: ResourceHandle) -> Self {
        self.sampled_textures.push(handle);
        self
    }

    /// 显式声明一条资源使用
    pub fn use_resource(mut self, usage: ResourceUsage) -> Self {
        self.explicit_uses.push(usage);
        self
    }

    pub fn set_is_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    pub fn set_sort_key(mut self, sort_key: u64) -> Self {
        self.sort_key = sort_key;
        self
    }

    pub fn set_extent(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn set_sample_count(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn on_setup(mut self, setup: impl FnMut() -> bool + 'static) -> Self {
        self.setup_fn = Some(Box::new(setup));
        self
    }

    pub fn on_execute(mut self, execute: impl FnMut(&mut CommandEncoder) + 'static) -> Self {
        self.execute_fn = Some(Box::new(execute));
        self
    }

    /// 包进 Rc，app 侧可以便宜地持有引用
    pub fn into_shared(self) -> Rc<RefCell<RenderPass>> {
        Rc::new(RefCell::new(self))
    }
}

// getters
impl RenderPass {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn pass_type(&self) -> PassType {
        self.pass_type
    }

    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    #[inline]
    pub fn sort_key(&self) -> u64 {
        self.sort_key
    }

    #[inline]
    pub fn color_attachments(&self) -> &[AttachmentInfo] {
        &self.color_attachments
    }

    #[inline]
    pub fn depth_stencil_attachment(&self) -> Option<&AttachmentInfo> {
        self.depth_stencil_attachment.as_ref()
    }

    #[inline]
    pub fn sampled_textures(&self) -> &[ResourceHandle] {
        &self.sampled_textures
    }
}

// 使用集合
impl RenderPass {
    /// pass 的全部资源使用 = attachment ∪ 采样纹理 ∪ 显式声明
    ///
    /// 同一句柄的多条记录按 `merge_usages` 的规则合并。
    pub fn collect_usages(&self) -> Result<Vec<ResourceUsage>, ResourceError> {
        let mut usages = vec![];

        for attachment in &self.color_attachments {
            // LOAD 意味着读回已有内容
            let state = if attachment.load_op == Some(vk::AttachmentLoadOp::LOAD) {
                RgImageState::COLOR_ATTACHMENT_READ_WRITE
            } else {
                RgImageState::COLOR_ATTACHMENT_WRITE
            };
            let access = if attachment.load_op == Some(vk::AttachmentLoadOp::LOAD) {
                AccessKind::ReadWrite
            } else {
                AccessKind::Write
            };
            usages.push(ResourceUsage::image(attachment.handle, access, state));
        }

        if let Some(attachment) = &self.depth_stencil_attachment {
            usages.push(ResourceUsage::image(attachment.handle, AccessKind::Write, RgImageState::DEPTH_ATTACHMENT_WRITE));
        }

        let sampled_state = match self.pass_type {
            PassType::Compute => RgImageState::SHADER_READ_COMPUTE,
            _ => RgImageState::SHADER_READ_FRAGMENT,
        };
        for &texture in &self.sampled_textures {
            usages.push(ResourceUsage::image(texture, AccessKind::Read, sampled_state));
        }

        usages.extend_from_slice(&self.explicit_uses);

        merge_usages(&self.name, &usages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::handle::{produce_buffer_handle, produce_image_handle};
    use crate::graph::state::RgBufferState;

    #[test]
    fn test_usages_cover_attachments_and_samples() {
        let color = produce_image_handle("pass-usage-color");
        let depth = produce_image_handle("pass-usage-depth");
        let sampled = produce_image_handle("pass-usage-sampled");

        let pass = RenderPass::new("main", PassType::Draw)
            .add_color_attachment(AttachmentInfo::new(color))
            .set_depth_stencil_attachment(AttachmentInfo::new(depth))
            .sample_texture(sampled);

        let usages = pass.collect_usages().unwrap();
        assert_eq!(usages.len(), 3);
        assert!(usages.iter().any(|u| u.handle == color && u.access.writes()));
        assert!(usages.iter().any(|u| u.handle == depth && u.access.writes()));
        assert!(usages.iter().any(|u| u.handle == sampled && u.access == AccessKind::Read));
    }

    #[test]
    fn test_load_op_load_implies_read_write() {
        let color = produce_image_handle("pass-usage-load");
        let pass = RenderPass::new("overlay", PassType::Draw)
            .add_color_attachment(AttachmentInfo::new(color).with_load_op(vk::AttachmentLoadOp::LOAD));

        let usages = pass.collect_usages().unwrap();
        assert_eq!(usages[0].access, AccessKind::ReadWrite);
    }

    #[test]
    fn test_explicit_use_merges_with_sampled() {
        let buffer = produce_buffer_handle("pass-usage-ubo");
        let pass = RenderPass::new("lit", PassType::Draw)
            .use_resource(ResourceUsage::buffer(buffer, AccessKind::Read, RgBufferState::UNIFORM_VERTEX))
            .use_resource(ResourceUsage::buffer(buffer, AccessKind::Read, RgBufferState::UNIFORM_FRAGMENT));

        let usages = pass.collect_usages().unwrap();
        assert_eq!(usages.len(), 1);
        assert!(usages[0].stage.contains(vk::PipelineStageFlags2::VERTEX_SHADER));
        assert!(usages[0].stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
    }
}
