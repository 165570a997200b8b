use thiserror::Error;

pub use aster_gfx::error::PipelineError;

/// 资源声明与使用相关的错误
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// pass 使用了未声明的资源
    #[error("pass `{pass}` uses undeclared resource `{resource}`")]
    NotDeclared { pass: String, resource: String },

    /// 同一个 pass 内对同一资源的声明不兼容（例如 layout 冲突）
    #[error("pass `{pass}` has conflicting usages of resource `{resource}`: {reason}")]
    UsageMismatch { pass: String, resource: String, reason: String },

    /// pass 的尺寸与 attachment 的尺寸不一致
    #[error("pass `{pass}`: attachment `{resource}` extent {actual_width}x{actual_height} does not match pass extent {expected_width}x{expected_height}")]
    ExtentMismatch {
        pass: String,
        resource: String,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// scratch ring 超出配置的上限
    #[error("scratch allocator `{name}` exhausted: requested {requested} bytes, ceiling {ceiling} bytes")]
    ScratchExhausted { name: String, requested: u64, ceiling: u64 },
}

/// rendergraph 编译错误
#[derive(Debug, Clone, Error)]
pub enum RendergraphError {
    /// pass 之间存在循环依赖
    #[error("dependency cycle involving passes: {passes:?}")]
    Cycle { passes: Vec<String> },

    /// 没有任何 root pass，整帧没有可提交的工作
    #[error("render module has no root pass")]
    NoRoot,

    /// 资源被消费但没有任何生产者
    #[error("resource `{resource}` is consumed but never produced")]
    UnreachableResource { resource: String },
}

/// 帧执行错误
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// swapchain 过期，需要重建后重试
    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    /// 设备丢失，renderer 实例不可恢复
    #[error("device lost")]
    DeviceLost,

    /// fence 等待超时
    #[error("frame fence timeout")]
    Timeout,
}

/// 对外统一的错误类型
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Rendergraph(#[from] RendergraphError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
