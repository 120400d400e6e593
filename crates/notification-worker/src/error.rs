//! 通知服务错误类型
//!
//! 定义推送发送、触发事件解析和调度配置等场景的错误分类。
//! 决策逻辑内部使用这些错误传播，对触发宿主一律只记录日志不抛出。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("推送发送失败: token={token}, 原因={reason}")]
    SendFailed { token: String, reason: String },

    #[error("触发事件解析失败: {0}")]
    InvalidTrigger(String),

    #[error("调度表达式无效: {expression} ({reason})")]
    InvalidSchedule { expression: String, reason: String },

    #[error(transparent)]
    Shared(#[from] kiekje_shared::error::KiekjeError),
}

pub type Result<T> = std::result::Result<T, NotificationError>;
