//! 触发事件
//!
//! 定时触发与文档变更触发统一为 `TriggerEvent`，由 `handle_trigger` 路由到
//! 提醒扫描或内容事件通知。宿主以 JSON 行的形式投递事件，解析失败的行只记录日志。

use kiekje_shared::observability::metrics;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span};

use crate::context::NotificationContext;
use crate::error::{NotificationError, Result};
use crate::models::{Comment, Entry};
use crate::notifier::EventOutcome;
use crate::reminder::ReminderReport;

/// 触发事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TriggerEvent {
    /// 定时触发，无负载
    DailyReminder,
    /// 档案下新建每日条目
    EntryCreated {
        profile_id: String,
        entry_id: String,
        entry: Entry,
    },
    /// 条目下新建评论
    CommentCreated {
        profile_id: String,
        entry_id: String,
        comment_id: String,
        comment: Comment,
    },
    /// 条目更新，携带前后快照
    EntryUpdated {
        profile_id: String,
        entry_id: String,
        before: Entry,
        after: Entry,
    },
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DailyReminder => "daily_reminder",
            Self::EntryCreated { .. } => "entry_created",
            Self::CommentCreated { .. } => "comment_created",
            Self::EntryUpdated { .. } => "entry_updated",
        }
    }
}

/// 触发处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Reminder(ReminderReport),
    Event(EventOutcome),
}

/// 解析一行 JSON 触发事件
pub fn parse_trigger(line: &str) -> Result<TriggerEvent> {
    serde_json::from_str(line).map_err(|e| NotificationError::InvalidTrigger(e.to_string()))
}

/// 处理单个触发事件，不向宿主返回错误
pub async fn handle_trigger(ctx: &NotificationContext, event: TriggerEvent) -> TriggerOutcome {
    let trigger = event.name();
    metrics::record_trigger(trigger);
    let span = info_span!("trigger", trigger);

    async move {
        match event {
            TriggerEvent::DailyReminder => {
                TriggerOutcome::Reminder(ctx.reminder_scanner().run().await)
            }
            TriggerEvent::EntryCreated {
                profile_id,
                entry_id,
                entry,
            } => TriggerOutcome::Event(
                ctx.event_notifier()
                    .on_entry_created(&profile_id, &entry_id, &entry)
                    .await,
            ),
            TriggerEvent::CommentCreated {
                profile_id,
                entry_id,
                comment_id,
                mut comment,
            } => {
                if comment.id.is_empty() {
                    comment.id = comment_id;
                }
                TriggerOutcome::Event(
                    ctx.event_notifier()
                        .on_comment_created(&profile_id, &entry_id, &comment)
                        .await,
                )
            }
            TriggerEvent::EntryUpdated {
                profile_id,
                entry_id,
                before,
                after,
            } => TriggerOutcome::Event(
                ctx.event_notifier()
                    .on_entry_updated(&profile_id, &entry_id, &before, &after)
                    .await,
            ),
        }
    }
    .instrument(span)
    .await
}

/// 逐行读取触发事件直到输入结束或收到 shutdown 信号，返回处理的事件数
pub async fn consume_lines<R>(
    ctx: NotificationContext,
    reader: R,
    mut shutdown: watch::Receiver<bool>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0usize;

    info!("触发事件消费者已启动");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line.map_err(|e| {
                NotificationError::InvalidTrigger(format!("读取触发输入失败: {e}"))
            })?,
        };

        let Some(line) = line else {
            info!("触发输入已结束");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_trigger(line) {
            Ok(event) => {
                let outcome = handle_trigger(&ctx, event).await;
                info!(outcome = ?outcome, "触发事件处理完成");
                handled += 1;
            }
            Err(e) => {
                error!(error = %e, "处理触发事件失败");
            }
        }
    }

    info!(handled, "触发事件消费者已停止");
    Ok(handled)
}
