pub mod binding;
pub mod descriptor_layout;
pub mod graphics_pipeline;
pub mod pipeline_cache;
pub mod render_pass;
pub mod shader;
