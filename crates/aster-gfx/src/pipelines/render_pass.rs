//! render pass 兼容性签名与 framebuffer 缓存
//!
//! pipeline 以签名为 key，而不是 render pass 对象本身：
//! 两个 pass 只要 attachment 的 {format, samples, load/store, layout}
//! 一致，pipeline 就可以复用。

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use ash::vk;
use itertools::Itertools;
use parking_lot::RwLock;

use crate::{gfx::Gfx, pipelines::pipeline_cache::InternTable};

/// 单个 attachment 的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// render pass 兼容性签名：attachment 描述序列的 64-bit 哈希
pub fn render_pass_signature(colors: &[AttachmentDesc], depth_stencil: Option<&AttachmentDesc>) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    colors.hash(&mut hasher);
    depth_stencil.hash(&mut hasher);
    hasher.finish()
}

/// 签名 → `vk::RenderPass`
#[derive(Default)]
pub struct RenderPassCache {
    table: InternTable<vk::RenderPass>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Return
    /// (签名, render pass)
    pub fn get_or_create(
        &self,
        colors: &[AttachmentDesc],
        depth_stencil: Option<&AttachmentDesc>,
        debug_name: &str,
    ) -> (u64, vk::RenderPass) {
        let signature = render_pass_signature(colors, depth_stencil);
        let render_pass = self
            .table
            .get_or_create(signature, || {
                Ok::<_, std::convert::Infallible>(Self::create_render_pass(colors, depth_stencil, debug_name))
            })
            .unwrap();
        (signature, render_pass)
    }

    fn create_render_pass(
        colors: &[AttachmentDesc],
        depth_stencil: Option<&AttachmentDesc>,
        debug_name: &str,
    ) -> vk::RenderPass {
        let mut attachments = colors
            .iter()
            .map(|a| {
                vk::AttachmentDescription::default()
                    .format(a.format)
                    .samples(a.samples)
                    .load_op(a.load_op)
                    .store_op(a.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(a.initial_layout)
                    .final_layout(a.final_layout)
            })
            .collect_vec();

        let color_refs = (0..colors.len() as u32)
            .map(|i| {
                vk::AttachmentReference::default()
                    .attachment(i)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .collect_vec();

        let depth_ref;
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        if let Some(ds) = depth_stencil {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(ds.format)
                    .samples(ds.samples)
                    .load_op(ds.load_op)
                    .store_op(ds.store_op)
                    .stencil_load_op(ds.load_op)
                    .stencil_store_op(ds.store_op)
                    .initial_layout(ds.initial_layout)
                    .final_layout(ds.final_layout),
            );
            depth_ref = vk::AttachmentReference::default()
                .attachment(colors.len() as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        let render_pass_ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass));

        let render_pass = unsafe { Gfx::get().device().create_render_pass(&render_pass_ci, None).unwrap() };
        Gfx::get().device().set_object_debug_name(render_pass, format!("RenderPass::{debug_name}"));
        render_pass
    }

    pub fn destroy(mut self) {
        let device = Gfx::get().device();
        unsafe {
            for render_pass in self.table.drain() {
                device.destroy_render_pass(render_pass, None);
            }
        }
    }
}

/// framebuffer 的 key：兼容性签名 + attachment view + 尺寸
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub signature: u64,
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
}

#[derive(Default)]
pub struct FramebufferCache {
    table: RwLock<HashMap<FramebufferKey, vk::Framebuffer>>,
}

impl FramebufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: FramebufferKey, render_pass: vk::RenderPass) -> vk::Framebuffer {
        if let Some(framebuffer) = self.table.read().get(&key) {
            return *framebuffer;
        }

        let framebuffer_ci = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&key.attachments)
            .width(key.width)
            .height(key.height)
            .layers(1);
        let framebuffer = unsafe { Gfx::get().device().create_framebuffer(&framebuffer_ci, None).unwrap() };

        self.table.write().insert(key, framebuffer);
        framebuffer
    }

    /// swapchain 或 attachment 重建后调用
    pub fn clear(&self) {
        let device = Gfx::get().device();
        let mut table = self.table.write();
        unsafe {
            for (_, framebuffer) in table.drain() {
                device.destroy_framebuffer(framebuffer, None);
            }
        }
    }

    pub fn destroy(self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_attachment(format: vk::Format, load_op: vk::AttachmentLoadOp) -> AttachmentDesc {
        AttachmentDesc {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    #[test]
    fn test_signature_matches_for_identical_attachments() {
        let a = [color_attachment(vk::Format::B8G8R8A8_UNORM, vk::AttachmentLoadOp::CLEAR)];
        let b = [color_attachment(vk::Format::B8G8R8A8_UNORM, vk::AttachmentLoadOp::CLEAR)];
        assert_eq!(render_pass_signature(&a, None), render_pass_signature(&b, None));
    }

    #[test]
    fn test_signature_differs_on_load_op() {
        let a = [color_attachment(vk::Format::B8G8R8A8_UNORM, vk::AttachmentLoadOp::CLEAR)];
        let b = [color_attachment(vk::Format::B8G8R8A8_UNORM, vk::AttachmentLoadOp::LOAD)];
        assert_ne!(render_pass_signature(&a, None), render_pass_signature(&b, None));
    }

    #[test]
    fn test_signature_differs_with_depth_attachment() {
        let color = [color_attachment(vk::Format::B8G8R8A8_UNORM, vk::AttachmentLoadOp::CLEAR)];
        let depth = AttachmentDesc {
            format: vk::Format::D32_SFLOAT,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        assert_ne!(render_pass_signature(&color, None), render_pass_signature(&color, Some(&depth)));
    }
}
