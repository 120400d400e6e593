//! 每日发布提醒
//!
//! 遍历全部档案，按日期键检查当天的条目是否存在；没有条目的档案把所有者加入
//! 接收者集合，同一用户拥有多个未发布档案也只提醒一次。
//!
//! 同一用户每个自然日（UTC）最多被提醒一次，由 `ReminderLedger` 记录，
//! cron 多次触发或宿主重复投递 `daily_reminder` 都不会重复发送。
//!
//! 可选的分散发送：配置执行窗口后，窗口外的运行直接跳过；配置最大随机延迟后，
//! 每位用户的提醒写入延迟队列，到期时间独立随机抽取，而不是立即发送。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as LedgerEntry;
use futures::stream::{self, StreamExt};
use kiekje_shared::config::ReminderConfig;
use kiekje_shared::error::Result;
use kiekje_shared::observability::metrics;
use rand::Rng;
use tracing::{error, info, warn};

use crate::deferred::{DeferredNotification, DeferredQueue};
use crate::dispatcher::Dispatcher;
use crate::models::{RecipientSet, entry_date_key};
use crate::resolver::RecipientResolver;
use crate::store::DocumentStore;
use crate::templates::NotificationTemplates;

/// 单次提醒扫描的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderReport {
    /// 当天未发布的去重用户数
    pub candidates: usize,
    pub sent: usize,
    pub deferred: usize,
    pub skipped_no_token: usize,
    /// 当天已提醒过的用户
    pub skipped_already_reminded: usize,
    pub failed: usize,
    /// 不在执行窗口内，未做任何读取
    pub outside_window: bool,
}

/// 判断小时是否落在 `[start, end)` 内，`start > end` 表示跨越午夜，`start == end` 表示全天
pub fn within_window(hour: u32, (start, end): (u32, u32)) -> bool {
    match start.cmp(&end) {
        std::cmp::Ordering::Less => hour >= start && hour < end,
        std::cmp::Ordering::Greater => hour >= start || hour < end,
        std::cmp::Ordering::Equal => true,
    }
}

/// 在 `[0, max]` 内均匀抽取延迟
fn random_delay(max: Duration) -> Duration {
    let max_secs = max.as_secs();
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::rng().random_range(0..=max_secs))
}

/// 每位用户最近一次被提醒的日期
#[derive(Debug, Default)]
pub struct ReminderLedger {
    reminded: DashMap<String, NaiveDate>,
}

impl ReminderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记 `user_id` 在 `date` 已提醒；当天已标记过时返回 false
    pub fn try_mark(&self, user_id: &str, date: NaiveDate) -> bool {
        match self.reminded.entry(user_id.to_string()) {
            LedgerEntry::Occupied(mut entry) => {
                if *entry.get() >= date {
                    return false;
                }
                entry.insert(date);
                true
            }
            LedgerEntry::Vacant(entry) => {
                entry.insert(date);
                true
            }
        }
    }

    pub fn last_reminded(&self, user_id: &str) -> Option<NaiveDate> {
        self.reminded.get(user_id).map(|date| *date)
    }
}

pub struct ReminderScanner {
    store: Arc<dyn DocumentStore>,
    resolver: RecipientResolver,
    dispatcher: Dispatcher,
    deferred: Arc<dyn DeferredQueue>,
    ledger: Arc<ReminderLedger>,
    config: ReminderConfig,
}

impl ReminderScanner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: RecipientResolver,
        dispatcher: Dispatcher,
        deferred: Arc<dyn DeferredQueue>,
        ledger: Arc<ReminderLedger>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            dispatcher,
            deferred,
            ledger,
            config,
        }
    }

    pub async fn run(&self) -> ReminderReport {
        self.run_at(Utc::now()).await
    }

    /// 以 `now` 作为当前时间执行一次扫描
    pub async fn run_at(&self, now: DateTime<Utc>) -> ReminderReport {
        info!(now = %now, "开始每日提醒扫描");

        if let Some(window) = self.config.window() {
            if !within_window(now.hour(), window) {
                info!(hour = now.hour(), ?window, "不在提醒执行窗口内，跳过本次扫描");
                return ReminderReport {
                    outside_window: true,
                    ..Default::default()
                };
            }
        }

        let recipients = match self.collect_recipients(now.date_naive()).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(error = %e, "枚举档案失败，放弃本次提醒扫描");
                return ReminderReport::default();
            }
        };

        metrics::record_reminder_scan(recipients.len());

        if recipients.is_empty() {
            info!("所有档案今天都已发布，无需提醒");
            return ReminderReport::default();
        }

        info!(count = recipients.len(), "找到需要提醒的用户");

        let mut report = ReminderReport {
            candidates: recipients.len(),
            ..Default::default()
        };
        let message = NotificationTemplates::reminder();
        let max_spread = Duration::from_secs(self.config.max_spread_minutes * 60);
        let today = now.date_naive();

        for user_id in recipients.iter() {
            let token = match self.resolver.resolve(user_id).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    report.skipped_no_token += 1;
                    continue;
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "解析推送令牌失败");
                    report.failed += 1;
                    continue;
                }
            };

            if !self.ledger.try_mark(user_id, today) {
                info!(user_id = %user_id, "用户今天已提醒过，跳过");
                report.skipped_already_reminded += 1;
                continue;
            }

            if max_spread.is_zero() {
                let outcome = self.dispatcher.send_one(&token, &message).await;
                if outcome.is_sent() {
                    info!(user_id = %user_id, "提醒已发送");
                    report.sent += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            }

            let delay = random_delay(max_spread);
            let fire_at = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let task = DeferredNotification::new(user_id, token, message.clone(), fire_at);
            match self.deferred.schedule(task).await {
                Ok(()) => {
                    info!(user_id = %user_id, fire_at = %fire_at, "提醒已排入延迟队列");
                    report.deferred += 1;
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "写入延迟队列失败");
                    report.failed += 1;
                }
            }
        }

        info!(
            candidates = report.candidates,
            sent = report.sent,
            deferred = report.deferred,
            skipped_no_token = report.skipped_no_token,
            skipped_already_reminded = report.skipped_already_reminded,
            failed = report.failed,
            "每日提醒扫描完成"
        );
        report
    }

    /// 找出 `today` 没有条目的档案所有者
    ///
    /// 条目查询按 `scan_concurrency` 限制并发，结果按档案枚举顺序插入集合。
    /// 单个档案查询失败只跳过该档案。
    pub async fn collect_recipients(&self, today: NaiveDate) -> Result<RecipientSet> {
        let profiles = self.store.list_profiles().await?;
        let date_key = entry_date_key(today);
        let store = &self.store;
        let date_key = date_key.as_str();

        let mut missing: Vec<(usize, String)> = stream::iter(profiles.into_iter().enumerate())
            .map(|(index, profile)| async move {
                if !profile.has_owner() {
                    warn!(profile_id = %profile.id, "档案缺少所有者，跳过");
                    return None;
                }

                match store.get_entry(&profile.id, date_key).await {
                    Ok(Some(_)) => None,
                    Ok(None) => Some((index, profile.owner_id)),
                    Err(e) => {
                        error!(
                            profile_id = %profile.id,
                            error = %e,
                            "查询当日条目失败，跳过该档案"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .filter_map(|found| async move { found })
            .collect()
            .await;

        missing.sort_by_key(|(index, _)| *index);
        Ok(missing.into_iter().map(|(_, owner_id)| owner_id).collect())
    }
}
