//! renderer 配置

/// 各项配置的缺省值见 `Default` 实现
#[derive(Clone, Debug)]
pub struct RendererSettings {
    pub app_name: String,

    /// 同时在飞的帧数；受 swapchain image 数量约束
    pub frames_in_flight: usize,

    /// 内联数据 scratch ring 的初始/上限
    pub scratch_initial_size: u64,
    pub scratch_max_size: u64,

    /// staging ring 的初始/上限
    pub staging_initial_size: u64,
    pub staging_max_size: u64,

    pub shader_hot_reload: bool,
    pub validation: bool,

    /// 帧 fence 的等待超时与重试预算；预算用尽视为设备丢失
    pub fence_timeout_ns: u64,
    pub fence_retry_budget: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            app_name: "aster".to_string(),
            frames_in_flight: 2,
            scratch_initial_size: 1 << 20,
            scratch_max_size: 64 << 20,
            staging_initial_size: 4 << 20,
            staging_max_size: 256 << 20,
            shader_hot_reload: false,
            validation: false,
            fence_timeout_ns: 1_000_000_000,
            fence_retry_budget: 3,
        }
    }
}
