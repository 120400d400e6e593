//! 定时调度 Worker
//!
//! - `ReminderSchedule`：按 cron 表达式触发每日提醒扫描
//! - `DeferredFlushWorker`：轮询延迟队列，投递到期的提醒
//!
//! 两者都在收到 shutdown 信号后退出主循环；`DeferredFlushWorker` 退出前清空延迟队列。

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::context::NotificationContext;
use crate::deferred::{deliver_due, drain_on_shutdown};
use crate::error::{NotificationError, Result};

/// 解析六段式 cron 表达式
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| NotificationError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// 等待 `duration` 或 shutdown 信号，收到 shutdown 或发送端关闭时返回 false
///
/// 信号值仍为 false 的变更不会提前结束等待。
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

/// 每日提醒调度
pub struct ReminderSchedule {
    ctx: NotificationContext,
    schedule: Schedule,
}

impl ReminderSchedule {
    pub fn new(ctx: NotificationContext) -> Result<Self> {
        let schedule = parse_schedule(&ctx.config.reminder.cron)?;
        Ok(Self { ctx, schedule })
    }

    /// `now` 之后的下一次执行时间
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    /// 主循环：到点执行提醒扫描，直到收到 shutdown 信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(cron = %self.ctx.config.reminder.cron, "ReminderSchedule 已启动");
        let scanner = self.ctx.reminder_scanner();

        while !*shutdown.borrow() {
            let now = Utc::now();
            let Some(next) = self.next_run_after(now) else {
                warn!("cron 表达式没有后续执行时间，调度退出");
                break;
            };

            info!(next_run = %next, "等待下一次提醒扫描");
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            if !sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }

            scanner.run().await;
        }

        info!("ReminderSchedule 已停止");
    }
}

/// 延迟队列轮询
pub struct DeferredFlushWorker {
    ctx: NotificationContext,
    poll_interval: Duration,
}

impl DeferredFlushWorker {
    pub fn new(ctx: NotificationContext) -> Self {
        let poll_interval = Duration::from_secs(ctx.config.deferred.poll_interval_secs);
        Self { ctx, poll_interval }
    }

    /// 创建带自定义轮询间隔的 Worker（主要用于测试）
    pub fn with_interval(ctx: NotificationContext, poll_interval: Duration) -> Self {
        Self { ctx, poll_interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "DeferredFlushWorker 已启动");

        while !*shutdown.borrow() {
            deliver_due(self.ctx.deferred.as_ref(), &self.ctx.dispatcher, Utc::now()).await;

            if !sleep_or_shutdown(self.poll_interval, &mut shutdown).await {
                break;
            }
        }

        drain_on_shutdown(self.ctx.deferred.as_ref(), &self.ctx.dispatcher).await;
        info!("DeferredFlushWorker 已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Timelike};
    use kiekje_shared::config::AppConfig;

    use crate::deferred::{DeferredNotification, DeferredQueue};
    use crate::models::PushToken;
    use crate::store::MemoryDocumentStore;
    use crate::templates::NotificationTemplates;
    use crate::test_utils::test_context;

    #[test]
    fn test_parse_schedule_rejects_invalid() {
        assert!(parse_schedule("0 0 9 * * *").is_ok());
        assert!(matches!(
            parse_schedule("every day 09:00"),
            Err(NotificationError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_next_run_after_default_is_nine_utc() {
        let (ctx, _, _) = test_context(AppConfig::default(), Arc::new(MemoryDocumentStore::new()));
        let schedule = ReminderSchedule::new(ctx).expect("默认 cron 应有效");

        let now = Utc
            .with_ymd_and_hms(2024, 3, 7, 10, 15, 0)
            .single()
            .expect("有效时间");
        let next = schedule.next_run_after(now).expect("应有下一次执行时间");

        assert_eq!(next.date_naive(), now.date_naive().succ_opt().expect("有效日期"));
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 0);
    }

    #[tokio::test]
    async fn test_sleep_ignores_change_without_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let sleeper = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_millis(200), &mut shutdown_rx).await
        });
        shutdown_tx.send(false).expect("发送信号失败");

        let completed = sleeper.await.expect("任务不应 panic");
        assert!(completed);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_sleep_returns_false_on_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let sleeper = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(3600), &mut shutdown_rx).await
        });
        shutdown_tx.send(true).expect("发送信号失败");

        let completed = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("应及时返回")
            .expect("任务不应 panic");
        assert!(!completed);
    }

    #[test]
    fn test_reminder_schedule_invalid_cron() {
        let mut config = AppConfig::default();
        config.reminder.cron = "not a cron".to_string();
        let (ctx, _, _) = test_context(config, Arc::new(MemoryDocumentStore::new()));
        assert!(ReminderSchedule::new(ctx).is_err());
    }

    #[tokio::test]
    async fn test_reminder_schedule_stops_on_shutdown() {
        let (ctx, transport, _) =
            test_context(AppConfig::default(), Arc::new(MemoryDocumentStore::new()));
        let schedule = ReminderSchedule::new(ctx).expect("默认 cron 应有效");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(schedule.run(shutdown_rx));
        shutdown_tx.send(true).expect("发送 shutdown 失败");

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("调度应及时退出")
            .expect("任务不应 panic");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_flush_worker_delivers_due_tasks() {
        let (ctx, transport, deferred) =
            test_context(AppConfig::default(), Arc::new(MemoryDocumentStore::new()));
        deferred
            .schedule(DeferredNotification::new(
                "owner-1",
                PushToken::parse(Some("tok-1")).expect("非空令牌"),
                NotificationTemplates::reminder(),
                Utc::now() - chrono::Duration::seconds(1),
            ))
            .await
            .expect("写入延迟队列失败");

        let worker = DeferredFlushWorker::with_interval(ctx, Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        for _ in 0..100 {
            if !transport.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).expect("发送 shutdown 失败");
        handle.await.expect("任务不应 panic");

        assert_eq!(transport.single_calls(), 1);
        assert_eq!(deferred.pending().await.expect("读取队列失败"), 0);
    }

    #[tokio::test]
    async fn test_deferred_flush_worker_drains_pending_on_shutdown() {
        let (ctx, transport, deferred) =
            test_context(AppConfig::default(), Arc::new(MemoryDocumentStore::new()));
        deferred
            .schedule(DeferredNotification::new(
                "owner-1",
                PushToken::parse(Some("tok-1")).expect("非空令牌"),
                NotificationTemplates::reminder(),
                Utc::now() + chrono::Duration::minutes(30),
            ))
            .await
            .expect("写入延迟队列失败");

        let worker = DeferredFlushWorker::with_interval(ctx, Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        shutdown_tx.send(true).expect("发送 shutdown 失败");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Worker 应及时退出")
            .expect("任务不应 panic");

        assert_eq!(transport.single_calls(), 1);
        assert_eq!(deferred.pending().await.expect("读取队列失败"), 0);
    }
}
