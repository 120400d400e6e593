//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum KiekjeError {
    // ==================== 存储错误 ====================
    #[error("文档存储错误: {0}")]
    Store(String),

    #[error("文档存储超时: {operation}")]
    StoreTimeout { operation: String },

    // ==================== 配置与序列化 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, KiekjeError>;

impl KiekjeError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "STORE_ERROR",
            Self::StoreTimeout { .. } => "STORE_TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}
