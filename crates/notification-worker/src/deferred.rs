//! 延迟投递队列
//!
//! 提醒分散发送时，每条提醒写入 `DeferredQueue`，到期后由轮询任务取出投递，
//! 而不是在触发调用内 sleep。生产环境的实现应落在持久化存储上（如带
//! `fire_at` 索引的任务表），保证进程重启后未到期任务不丢失；
//! `MemoryDeferredQueue` 仅用于本地运行与测试。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiekje_shared::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{BatchReport, Dispatcher};
use crate::models::PushToken;
use crate::sender::PushMessage;

/// 待投递的延迟通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredNotification {
    pub id: String,
    pub user_id: String,
    pub token: PushToken,
    pub message: PushMessage,
    pub fire_at: DateTime<Utc>,
}

impl DeferredNotification {
    pub fn new(
        user_id: impl Into<String>,
        token: PushToken,
        message: PushMessage,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            token,
            message,
            fire_at,
        }
    }
}

/// 延迟任务队列接口
#[async_trait]
pub trait DeferredQueue: Send + Sync {
    async fn schedule(&self, task: DeferredNotification) -> Result<()>;

    /// 取出 `fire_at <= now` 的任务，按到期时间排序；取出即出队
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DeferredNotification>>;

    async fn pending(&self) -> Result<usize>;
}

/// 内存延迟队列
#[derive(Debug, Default)]
pub struct MemoryDeferredQueue {
    tasks: Mutex<Vec<DeferredNotification>>,
}

impl MemoryDeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeferredQueue for MemoryDeferredQueue {
    async fn schedule(&self, task: DeferredNotification) -> Result<()> {
        self.tasks.lock().push(task);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DeferredNotification>> {
        let mut tasks = self.tasks.lock();
        let (mut due, pending): (Vec<_>, Vec<_>) =
            tasks.drain(..).partition(|t| t.fire_at <= now);
        *tasks = pending;
        due.sort_by_key(|t| t.fire_at);
        Ok(due)
    }

    async fn pending(&self) -> Result<usize> {
        Ok(self.tasks.lock().len())
    }
}

/// 投递所有到期的延迟通知
///
/// 队列读取失败只记录日志并返回空结果。
pub async fn deliver_due(
    queue: &dyn DeferredQueue,
    dispatcher: &Dispatcher,
    now: DateTime<Utc>,
) -> BatchReport {
    let due = match queue.take_due(now).await {
        Ok(due) => due,
        Err(e) => {
            error!(error = %e, "读取延迟队列失败");
            return BatchReport::default();
        }
    };

    if due.is_empty() {
        return BatchReport::default();
    }

    let mut report = BatchReport::default();
    for task in &due {
        let outcome = dispatcher.send_one(&task.token, &task.message).await;
        if outcome.is_sent() {
            info!(
                task_id = %task.id,
                user_id = %task.user_id,
                "延迟提醒已发送"
            );
        }
        report.merge(BatchReport::single(outcome));
    }

    info!(
        due = due.len(),
        success_count = report.success_count(),
        failure_count = report.failure_count(),
        "到期延迟通知处理完成"
    );
    report
}

/// 进程退出前清空队列：未到期的提醒提前投递，返回仍未投递的数量
///
/// 内存队列随进程消失，退出时不清空就会静默丢失提醒。
pub async fn drain_on_shutdown(queue: &dyn DeferredQueue, dispatcher: &Dispatcher) -> usize {
    let report = deliver_due(queue, dispatcher, DateTime::<Utc>::MAX_UTC).await;
    if !report.is_empty() {
        warn!(
            delivered = report.outcomes.len(),
            "关闭前提前投递未到期的延迟提醒"
        );
    }

    match queue.pending().await {
        Ok(0) => 0,
        Ok(remaining) => {
            error!(remaining, "关闭时仍有延迟提醒未投递，将会丢失");
            remaining
        }
        Err(e) => {
            error!(error = %e, "关闭时读取延迟队列失败");
            0
        }
    }
}
