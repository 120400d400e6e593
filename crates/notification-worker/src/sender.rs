//! 推送发送器
//!
//! 通过 `PushTransport` trait 抽象推送投递，`send_batch` 默认并行调用 `send`，
//! 单个令牌的失败只体现在该令牌的结果中。`LoggingPushTransport` 为模拟实现，
//! 只记录日志并返回生成的消息 ID；接入 FCM 等真实服务时实现同一 trait。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::models::PushToken;
use crate::templates::NotificationKind;

/// 推送消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// 客户端路由用的结构化数据（type、profileId、entryId）
    pub data: BTreeMap<String, String>,
}

/// 单个令牌的投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// 单个令牌的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub token: PushToken,
    pub status: SendStatus,
    /// 推送服务返回的消息标识
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent(token: PushToken, message_id: impl Into<String>) -> Self {
        Self {
            token,
            status: SendStatus::Sent,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(token: PushToken, error: impl Into<String>) -> Self {
        Self {
            token,
            status: SendStatus::Failed,
            message_id: None,
            error: Some(error.into()),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }
}

/// 推送投递接口
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// 投递到单个令牌，成功时返回消息 ID
    async fn send(
        &self,
        token: &PushToken,
        message: &PushMessage,
    ) -> Result<String, NotificationError>;

    /// 批量投递，按输入顺序为每个令牌返回一个结果
    async fn send_batch(&self, tokens: &[PushToken], message: &PushMessage) -> Vec<SendOutcome> {
        let futures = tokens.iter().map(|token| async move {
            match self.send(token, message).await {
                Ok(message_id) => SendOutcome::sent(token.clone(), message_id),
                Err(e) => SendOutcome::failed(token.clone(), e.to_string()),
            }
        });

        futures::future::join_all(futures).await
    }
}

/// 模拟推送发送器
///
/// 生产环境中替换为 FCM / APNs 的 SDK 调用
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPushTransport;

#[async_trait]
impl PushTransport for LoggingPushTransport {
    async fn send(
        &self,
        token: &PushToken,
        message: &PushMessage,
    ) -> Result<String, NotificationError> {
        let message_id = format!("push_{}", Uuid::now_v7());

        info!(
            kind = message.kind.as_str(),
            token = %token.masked(),
            message_id = %message_id,
            title = %message.title,
            "模拟发送 APP 推送通知"
        );

        Ok(message_id)
    }
}
