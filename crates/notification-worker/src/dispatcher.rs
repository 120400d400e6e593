//! 通知分发器
//!
//! 封装 `PushTransport`，对调用方是 fire-and-forget：失败只记录日志和指标，
//! 不向上抛出，也不自动重试。批量发送中单个令牌的失败不影响其他令牌的投递与上报。

use std::sync::Arc;

use kiekje_shared::observability::metrics;
use tracing::{debug, info, warn};

use crate::models::PushToken;
use crate::sender::{PushMessage, PushTransport, SendOutcome};

/// 一次分发的汇总结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<SendOutcome>,
}

impl BatchReport {
    pub fn single(outcome: SendOutcome) -> Self {
        Self {
            outcomes: vec![outcome],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_sent()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// 部分成功：至少一个成功且至少一个失败
    pub fn is_partial_success(&self) -> bool {
        self.success_count() > 0 && self.failure_count() > 0
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn PushTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// 投递到单个令牌
    pub async fn send_one(&self, token: &PushToken, message: &PushMessage) -> SendOutcome {
        let outcome = match self.transport.send(token, message).await {
            Ok(message_id) => SendOutcome::sent(token.clone(), message_id),
            Err(e) => SendOutcome::failed(token.clone(), e.to_string()),
        };
        record(message, &outcome);
        outcome
    }

    /// 批量投递，每个令牌都有对应结果
    pub async fn send_many(&self, tokens: &[PushToken], message: &PushMessage) -> BatchReport {
        if tokens.is_empty() {
            debug!(kind = message.kind.as_str(), "没有可投递的令牌，跳过批量发送");
            return BatchReport::default();
        }

        let mut outcomes = self.transport.send_batch(tokens, message).await;

        // 推送服务漏报的令牌按失败处理，保证逐令牌上报
        if outcomes.len() < tokens.len() {
            let missing: Vec<SendOutcome> = tokens
                .iter()
                .filter(|t| !outcomes.iter().any(|o| &o.token == *t))
                .map(|t| SendOutcome::failed(t.clone(), "推送服务未返回结果"))
                .collect();
            outcomes.extend(missing);
        }

        for outcome in &outcomes {
            record(message, outcome);
        }

        let report = BatchReport { outcomes };
        info!(
            kind = message.kind.as_str(),
            total = report.outcomes.len(),
            success_count = report.success_count(),
            failure_count = report.failure_count(),
            "批量推送完成"
        );
        report
    }
}

fn record(message: &PushMessage, outcome: &SendOutcome) {
    metrics::record_notification(message.kind.as_str(), outcome.is_sent());

    if outcome.is_sent() {
        debug!(
            kind = message.kind.as_str(),
            token = %outcome.token.masked(),
            message_id = ?outcome.message_id,
            "推送成功"
        );
    } else {
        warn!(
            kind = message.kind.as_str(),
            token = %outcome.token.masked(),
            error = ?outcome.error,
            "推送失败"
        );
    }
}
