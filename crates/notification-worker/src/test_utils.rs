//! 测试工具模块
//!
//! 提供记录型推送发送器和测试数据生成器，供单元测试与集成测试共用。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::context::NotificationContext;
use crate::deferred::MemoryDeferredQueue;
use crate::error::NotificationError;
use crate::models::{Comment, Entry, Profile, PushToken, User};
use crate::sender::{PushMessage, PushTransport, SendOutcome};
use crate::store::MemoryDocumentStore;
use kiekje_shared::config::AppConfig;

// ==================== 记录型推送发送器 ====================

/// 一次推送调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Single {
        token: PushToken,
        message: PushMessage,
    },
    Batch {
        tokens: Vec<PushToken>,
        message: PushMessage,
    },
}

impl TransportCall {
    pub fn message(&self) -> &PushMessage {
        match self {
            Self::Single { message, .. } | Self::Batch { message, .. } => message,
        }
    }

    pub fn tokens(&self) -> Vec<PushToken> {
        match self {
            Self::Single { token, .. } => vec![token.clone()],
            Self::Batch { tokens, .. } => tokens.clone(),
        }
    }
}

/// 记录所有调用的推送发送器
///
/// `failing` 中的令牌投递失败，其余成功。
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    failing: HashSet<String>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn single_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Single { .. }))
            .count()
    }

    pub fn batch_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Batch { .. }))
            .count()
    }

    fn deliver(&self, token: &PushToken) -> Result<String, NotificationError> {
        if self.failing.contains(token.as_str()) {
            return Err(NotificationError::SendFailed {
                token: token.masked(),
                reason: "模拟投递失败".to_string(),
            });
        }
        Ok(format!("test_{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(
        &self,
        token: &PushToken,
        message: &PushMessage,
    ) -> Result<String, NotificationError> {
        self.calls.lock().push(TransportCall::Single {
            token: token.clone(),
            message: message.clone(),
        });
        self.deliver(token)
    }

    async fn send_batch(&self, tokens: &[PushToken], message: &PushMessage) -> Vec<SendOutcome> {
        self.calls.lock().push(TransportCall::Batch {
            tokens: tokens.to_vec(),
            message: message.clone(),
        });
        tokens
            .iter()
            .map(|token| match self.deliver(token) {
                Ok(message_id) => SendOutcome::sent(token.clone(), message_id),
                Err(e) => SendOutcome::failed(token.clone(), e.to_string()),
            })
            .collect()
    }
}

// ==================== 测试数据生成器 ====================

/// 测试数据生成器
pub struct TestDataGenerator;

impl TestDataGenerator {
    pub fn profile(id: &str, owner_id: &str, followers: &[&str]) -> Profile {
        Profile {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            followers: followers.iter().map(|f| f.to_string()).collect(),
            name: Some(format!("Profiel {id}")),
        }
    }

    pub fn user(id: &str, token: &str) -> User {
        User {
            id: id.to_string(),
            fcm_token: Some(token.to_string()),
            display_name: Some(format!("Gebruiker {id}")),
        }
    }

    pub fn user_without_token(id: &str) -> User {
        User {
            id: id.to_string(),
            fcm_token: None,
            display_name: Some(format!("Gebruiker {id}")),
        }
    }

    pub fn entry(date_key: &str, author_id: &str, likes: &[&str]) -> Entry {
        Entry {
            id: date_key.to_string(),
            user_id: Some(author_id.to_string()),
            likes: likes.iter().map(|l| l.to_string()).collect(),
            comments: Vec::new(),
        }
    }

    pub fn comment(user_id: &str, user_name: Option<&str>) -> Comment {
        Comment {
            id: format!("c-{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            user_name: user_name.map(str::to_string),
            text: Some("Wat een schatje!".to_string()),
        }
    }
}

/// 使用记录型发送器构造上下文
pub fn test_context(
    config: AppConfig,
    store: Arc<MemoryDocumentStore>,
) -> (NotificationContext, Arc<RecordingTransport>, Arc<MemoryDeferredQueue>) {
    let transport = Arc::new(RecordingTransport::new());
    let deferred = Arc::new(MemoryDeferredQueue::new());
    let ctx = NotificationContext::new(config, store, transport.clone(), deferred.clone());
    (ctx, transport, deferred)
}
