//! 内容事件通知
//!
//! 处理新条目、新评论、新点赞三类文档变更触发，计算本次事件的受众并投递。
//! 受众中永远不包含触发事件的用户本人。读取按 档案 → 所有者 → 关注者 → 令牌
//! 顺序进行，任何一步缺失数据都只终止本次通知并记录日志，不向触发宿主抛出错误。

use std::collections::HashSet;
use std::sync::Arc;

use kiekje_shared::error::Result;
use tracing::{error, info};

use crate::dispatcher::{BatchReport, Dispatcher};
use crate::models::{Comment, Entry, Profile, PushToken, RecipientSet};
use crate::resolver::{RecipientResolver, TokenLookup};
use crate::store::DocumentStore;
use crate::templates::NotificationTemplates;

/// 未发送通知的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 引用的档案不存在
    ProfileNotFound,
    /// 档案缺少所有者
    MissingOwner,
    /// 排除触发者后没有受众
    NoAudience,
    /// 受众都没有可用的推送令牌
    NoTokens,
    /// 用户对自己的内容操作
    SelfAction,
    /// 点赞列表没有增长
    NoNewLike,
    /// 点赞列表增长但无法确定新点赞者
    UndeterminedLiker,
    /// 档案所有者的用户文档不存在
    OwnerNotFound,
    /// 档案所有者没有推送令牌
    OwnerUnreachable,
    /// 文档存储读取失败
    StoreUnavailable,
}

/// 单次事件处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Delivered(BatchReport),
    Skipped(SkipReason),
}

impl EventOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped(reason) => Some(*reason),
            Self::Delivered(_) => None,
        }
    }
}

/// 点赞列表的变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeChange {
    /// 新增的点赞者
    Added(String),
    /// 去重后的点赞数没有增长（取消点赞或无变化）
    NotGrown,
    /// 点赞数增长但差集为空
    Undetermined,
}

/// 对比前后两个快照，找出新点赞者
///
/// 一次更新新增多个点赞者时，取 `after` 中按存储顺序的第一个。
pub fn detect_new_liker(before: &[String], after: &[String]) -> LikeChange {
    let before_set: HashSet<&str> = before.iter().map(String::as_str).collect();
    let after_set: HashSet<&str> = after.iter().map(String::as_str).collect();

    if after_set.len() <= before_set.len() {
        return LikeChange::NotGrown;
    }

    after
        .iter()
        .find(|liker| !before_set.contains(liker.as_str()))
        .map(|liker| LikeChange::Added(liker.clone()))
        .unwrap_or(LikeChange::Undetermined)
}

/// 新条目的受众：关注者去掉档案所有者与条目作者
pub fn compute_audience(profile: &Profile, entry: &Entry) -> RecipientSet {
    let mut audience: RecipientSet = profile
        .followers
        .iter()
        .filter(|id| !id.trim().is_empty())
        .cloned()
        .collect();

    audience.remove(&profile.owner_id);
    if let Some(author_id) = entry.user_id.as_deref() {
        audience.remove(author_id);
    }
    audience
}

pub struct EventNotifier {
    store: Arc<dyn DocumentStore>,
    resolver: RecipientResolver,
    dispatcher: Dispatcher,
}

impl EventNotifier {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: RecipientResolver,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            resolver,
            dispatcher,
        }
    }

    /// 新条目：通知档案的关注者
    pub async fn on_entry_created(
        &self,
        profile_id: &str,
        entry_id: &str,
        entry: &Entry,
    ) -> EventOutcome {
        info!(profile_id = %profile_id, entry_id = %entry_id, "检测到新照片");
        self.try_entry_created(profile_id, entry_id, entry)
            .await
            .unwrap_or_else(|e| store_failure("new_post", profile_id, &e))
    }

    /// 新评论：通知条目所属档案的所有者
    pub async fn on_comment_created(
        &self,
        profile_id: &str,
        entry_id: &str,
        comment: &Comment,
    ) -> EventOutcome {
        info!(
            profile_id = %profile_id,
            entry_id = %entry_id,
            commenter_id = %comment.user_id,
            "检测到新评论"
        );
        self.try_comment_created(profile_id, entry_id, comment)
            .await
            .unwrap_or_else(|e| store_failure("comment", profile_id, &e))
    }

    /// 条目更新：点赞列表增长时通知所有者
    pub async fn on_entry_updated(
        &self,
        profile_id: &str,
        entry_id: &str,
        before: &Entry,
        after: &Entry,
    ) -> EventOutcome {
        self.try_entry_updated(profile_id, entry_id, before, after)
            .await
            .unwrap_or_else(|e| store_failure("like", profile_id, &e))
    }

    async fn try_entry_created(
        &self,
        profile_id: &str,
        entry_id: &str,
        entry: &Entry,
    ) -> Result<EventOutcome> {
        let profile = match self.load_profile(profile_id).await? {
            Ok(profile) => profile,
            Err(reason) => return Ok(EventOutcome::Skipped(reason)),
        };

        let audience = compute_audience(&profile, entry);
        if audience.is_empty() {
            info!(profile_id = %profile_id, "档案没有需要通知的关注者");
            return Ok(EventOutcome::Skipped(SkipReason::NoAudience));
        }

        let poster_name = self.resolver.display_name(&profile.owner_id).await;

        let tokens: Vec<PushToken> = self
            .resolver
            .resolve_many(&audience)
            .await
            .into_iter()
            .map(|r| r.token)
            .collect();
        if tokens.is_empty() {
            info!(
                profile_id = %profile_id,
                audience = audience.len(),
                "关注者均没有推送令牌"
            );
            return Ok(EventOutcome::Skipped(SkipReason::NoTokens));
        }

        let message = NotificationTemplates::new_post(
            &poster_name,
            profile.display_name(),
            profile_id,
            entry_id,
        );
        let report = self.dispatcher.send_many(&tokens, &message).await;
        Ok(EventOutcome::Delivered(report))
    }

    async fn try_comment_created(
        &self,
        profile_id: &str,
        entry_id: &str,
        comment: &Comment,
    ) -> Result<EventOutcome> {
        let profile = match self.load_profile(profile_id).await? {
            Ok(profile) => profile,
            Err(reason) => return Ok(EventOutcome::Skipped(reason)),
        };

        if comment.user_id == profile.owner_id {
            info!(profile_id = %profile_id, "用户评论了自己的照片，无需通知");
            return Ok(EventOutcome::Skipped(SkipReason::SelfAction));
        }

        let token = match self.resolver.lookup(&profile.owner_id).await? {
            TokenLookup::Found(token) => token,
            TokenLookup::UserMissing => {
                return Ok(EventOutcome::Skipped(SkipReason::OwnerNotFound));
            }
            TokenLookup::NoToken => {
                info!(owner_id = %profile.owner_id, "照片所有者没有推送令牌");
                return Ok(EventOutcome::Skipped(SkipReason::OwnerUnreachable));
            }
        };

        let message = NotificationTemplates::comment(comment.author_name(), profile_id, entry_id);
        let outcome = self.dispatcher.send_one(&token, &message).await;
        Ok(EventOutcome::Delivered(BatchReport::single(outcome)))
    }

    async fn try_entry_updated(
        &self,
        profile_id: &str,
        entry_id: &str,
        before: &Entry,
        after: &Entry,
    ) -> Result<EventOutcome> {
        let liker_id = match detect_new_liker(&before.likes, &after.likes) {
            LikeChange::Added(liker_id) => liker_id,
            LikeChange::NotGrown => {
                info!(entry_id = %entry_id, "点赞被取消或数量未变，无需通知");
                return Ok(EventOutcome::Skipped(SkipReason::NoNewLike));
            }
            LikeChange::Undetermined => {
                info!(entry_id = %entry_id, "无法确定新的点赞者，不发送通知");
                return Ok(EventOutcome::Skipped(SkipReason::UndeterminedLiker));
            }
        };

        info!(
            profile_id = %profile_id,
            entry_id = %entry_id,
            liker_id = %liker_id,
            "检测到新点赞"
        );

        let profile = match self.load_profile(profile_id).await? {
            Ok(profile) => profile,
            Err(reason) => return Ok(EventOutcome::Skipped(reason)),
        };

        if liker_id == profile.owner_id {
            info!(profile_id = %profile_id, "用户点赞了自己的照片，无需通知");
            return Ok(EventOutcome::Skipped(SkipReason::SelfAction));
        }

        let token = match self.resolver.lookup(&profile.owner_id).await? {
            TokenLookup::Found(token) => token,
            TokenLookup::UserMissing => {
                return Ok(EventOutcome::Skipped(SkipReason::OwnerNotFound));
            }
            TokenLookup::NoToken => {
                info!(owner_id = %profile.owner_id, "照片所有者没有推送令牌");
                return Ok(EventOutcome::Skipped(SkipReason::OwnerUnreachable));
            }
        };

        let liker_name = self.resolver.display_name(&liker_id).await;
        let message = NotificationTemplates::like(&liker_name, profile_id, entry_id);
        let outcome = self.dispatcher.send_one(&token, &message).await;
        Ok(EventOutcome::Delivered(BatchReport::single(outcome)))
    }

    /// 读取档案；不存在或缺少所有者时记录错误并返回对应的跳过原因
    async fn load_profile(
        &self,
        profile_id: &str,
    ) -> Result<std::result::Result<Profile, SkipReason>> {
        let Some(profile) = self.store.get_profile(profile_id).await? else {
            error!(profile_id = %profile_id, "档案不存在");
            return Ok(Err(SkipReason::ProfileNotFound));
        };

        if !profile.has_owner() {
            error!(profile_id = %profile_id, "档案缺少所有者");
            return Ok(Err(SkipReason::MissingOwner));
        }

        Ok(Ok(profile))
    }
}

fn store_failure(
    kind: &'static str,
    profile_id: &str,
    err: &kiekje_shared::error::KiekjeError,
) -> EventOutcome {
    error!(
        kind,
        profile_id = %profile_id,
        error = %err,
        code = err.code(),
        "读取文档失败，放弃本次通知"
    );
    EventOutcome::Skipped(SkipReason::StoreUnavailable)
}
