use thiserror::Error;

/// Pipeline 和 descriptor layout 构建过程中的错误
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// 多个 shader stage 对同一个 (set, binding) 给出了不兼容的声明
    #[error("binding conflict at (set={set}, binding={binding}): {reason}")]
    BindingConflict { set: u32, binding: u32, reason: String },

    /// 外部 shader 编译器报告的编译失败
    #[error("shader compile failed for `{path}`: {reason}")]
    ShaderCompileFailed { path: String, reason: String },

    /// Pipeline 引用的 descriptor set layout 与 shader 反射不一致
    #[error("descriptor set layout mismatch: {reason}")]
    LayoutMismatch { reason: String },
}
