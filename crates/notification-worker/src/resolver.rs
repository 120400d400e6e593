//! 接收者解析
//!
//! 把用户 ID 解析为推送令牌。用户不存在或没有令牌都不返回 `Err`，
//! 只是被排除：用户不存在属于引用缺失，记录 error 日志；没有令牌只记录 info。
//! 只有存储访问失败才返回 `Err`。

use std::collections::HashSet;
use std::sync::Arc;

use kiekje_shared::error::Result;
use tracing::{error, info, warn};

use crate::models::{FALLBACK_USER_NAME, PushToken, RecipientSet};
use crate::store::DocumentStore;

/// 已解析的接收者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecipient {
    pub user_id: String,
    pub token: PushToken,
}

/// 单个用户的令牌查询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Found(PushToken),
    /// 引用的用户文档不存在
    UserMissing,
    /// 用户存在但没有可用令牌
    NoToken,
}

impl TokenLookup {
    pub fn into_token(self) -> Option<PushToken> {
        match self {
            Self::Found(token) => Some(token),
            Self::UserMissing | Self::NoToken => None,
        }
    }
}

#[derive(Clone)]
pub struct RecipientResolver {
    store: Arc<dyn DocumentStore>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// 查询单个用户的推送令牌，区分用户不存在与没有令牌
    pub async fn lookup(&self, user_id: &str) -> Result<TokenLookup> {
        let Some(user) = self.store.get_user(user_id).await? else {
            error!(user_id = %user_id, "用户不存在，跳过");
            return Ok(TokenLookup::UserMissing);
        };

        match user.push_token() {
            Some(token) => Ok(TokenLookup::Found(token)),
            None => {
                info!(user_id = %user_id, "用户没有推送令牌，跳过");
                Ok(TokenLookup::NoToken)
            }
        }
    }

    /// 解析单个用户的推送令牌
    pub async fn resolve(&self, user_id: &str) -> Result<Option<PushToken>> {
        Ok(self.lookup(user_id).await?.into_token())
    }

    /// 按集合顺序解析，丢弃无令牌用户；多个用户共用同一设备令牌时只保留第一个
    pub async fn resolve_many(&self, recipients: &RecipientSet) -> Vec<ResolvedRecipient> {
        let mut resolved = Vec::with_capacity(recipients.len());
        let mut seen_tokens: HashSet<PushToken> = HashSet::new();

        for user_id in recipients.iter() {
            match self.resolve(user_id).await {
                Ok(Some(token)) => {
                    if seen_tokens.insert(token.clone()) {
                        resolved.push(ResolvedRecipient {
                            user_id: user_id.to_string(),
                            token,
                        });
                    } else {
                        info!(user_id = %user_id, "推送令牌与其他接收者重复，跳过");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "解析推送令牌失败，跳过该接收者");
                }
            }
        }

        resolved
    }

    /// 用户展示名，用户不存在或读取失败时使用占位符
    pub async fn display_name(&self, user_id: &str) -> String {
        match self.store.get_user(user_id).await {
            Ok(Some(user)) => user.display_name().to_string(),
            Ok(None) => FALLBACK_USER_NAME.to_string(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "读取用户展示名失败，使用占位符");
                FALLBACK_USER_NAME.to_string()
            }
        }
    }
}
