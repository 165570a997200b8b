//! 离线构建一个典型的延迟管线 render module，打印编译出的执行计划。
//! 不需要 Vulkan 设备，graph 编译是纯数据操作。

use ash::vk;
use aster_render::graph::compile::Rendergraph;
use aster_render::graph::handle::produce_image_handle;
use aster_render::graph::resource::{ImageInfo, ResourceInfo};
use aster_render::module::RenderModule;
use aster_render::pass::{AttachmentInfo, PassType, RenderPass};

fn main() {
    aster_crate_tools::init_log::init_log();

    let swapchain = produce_image_handle("swapchain");
    let depth = produce_image_handle("depth");
    let scene_color = produce_image_handle("scene-color");

    let extent = (1920, 1080);
    let mut module = RenderModule::new();
    module.declare_resource(
        depth,
        ResourceInfo::Image(ImageInfo::new_2d(
            extent.0,
            extent.1,
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )),
    );
    module.declare_resource(
        scene_color,
        ResourceInfo::Image(ImageInfo::new_2d(
            extent.0,
            extent.1,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )),
    );

    // 插入顺序故意打乱，执行顺序由依赖 + sort key 决定
    module.add_pass(
        RenderPass::new("tonemap", PassType::Draw)
            .add_color_attachment(AttachmentInfo::new(swapchain))
            .sample_texture(scene_color),
    );
    module.add_pass(
        RenderPass::new("forward", PassType::Draw)
            .set_sort_key(10)
            .add_color_attachment(AttachmentInfo::new(scene_color).with_clear_color([0.02, 0.02, 0.05, 1.0]))
            .sample_texture(depth),
    );
    module.add_pass(
        RenderPass::new("depth-prepass", PassType::Draw)
            .set_sort_key(1)
            .set_depth_stencil_attachment(AttachmentInfo::new(depth).with_clear_depth(1.0, 0)),
    );

    let swapchain_info =
        ImageInfo::new_2d(extent.0, extent.1, vk::Format::B8G8R8A8_UNORM, vk::ImageUsageFlags::COLOR_ATTACHMENT);

    match Rendergraph::compile(&module, swapchain, Some(swapchain_info)) {
        Ok(graph) => {
            log::info!("execution order:");
            for (order, pass) in graph.passes.iter().enumerate() {
                log::info!(
                    "  [{order}] {} ({:?}) - {} image barriers, {} buffer barriers",
                    pass.name,
                    pass.pass_type,
                    pass.barriers.image_barriers.len(),
                    pass.barriers.buffer_barriers.len(),
                );
            }
            log::info!("frame-end barriers: {}", graph.final_barriers.image_barriers.len());
            for (handle, chain) in &graph.sync_chains {
                log::info!("sync chain {:?}: {} states", handle, chain.states.len());
                for (offset, state) in chain.states.iter().enumerate() {
                    log::info!("    [{offset}] {:?}", state.layout);
                }
            }
        }
        Err(e) => log::error!("compile failed: {e}"),
    }
}
