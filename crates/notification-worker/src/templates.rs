//! 通知模板
//!
//! 每类通知使用固定的荷兰语标题与正文，展示名缺失时由调用方传入占位符。
//! 除每日提醒外，`data` 中都携带 `type` 与档案 ID，供客户端跳转。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sender::PushMessage;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder,
    NewPost,
    Comment,
    Like,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::NewPost => "new_post",
            Self::Comment => "comment",
            Self::Like => "like",
        }
    }

    /// 写入 `data.type` 的值，每日提醒不携带
    pub fn data_type(&self) -> Option<&'static str> {
        match self {
            Self::Reminder => None,
            other => Some(other.as_str()),
        }
    }
}

/// 通知模板
pub struct NotificationTemplates;

impl NotificationTemplates {
    pub fn reminder() -> PushMessage {
        PushMessage {
            kind: NotificationKind::Reminder,
            title: "Tijd voor een kiekje!".to_string(),
            body: "Je hebt vandaag nog geen foto van je kleintje geplaatst. Tijd voor de dagelijkse update!"
                .to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn new_post(
        poster_name: &str,
        profile_name: &str,
        profile_id: &str,
        entry_id: &str,
    ) -> PushMessage {
        PushMessage {
            kind: NotificationKind::NewPost,
            title: "Nieuwe foto!".to_string(),
            body: format!("{poster_name} heeft een nieuwe foto geplaatst voor {profile_name}."),
            data: entry_data(NotificationKind::NewPost, profile_id, entry_id),
        }
    }

    pub fn comment(commenter_name: &str, profile_id: &str, entry_id: &str) -> PushMessage {
        PushMessage {
            kind: NotificationKind::Comment,
            title: "Nieuwe reactie".to_string(),
            body: format!("{commenter_name} heeft gereageerd op je foto."),
            data: entry_data(NotificationKind::Comment, profile_id, entry_id),
        }
    }

    pub fn like(liker_name: &str, profile_id: &str, entry_id: &str) -> PushMessage {
        PushMessage {
            kind: NotificationKind::Like,
            title: "Nieuwe like!".to_string(),
            body: format!("{liker_name} vindt je foto leuk."),
            data: entry_data(NotificationKind::Like, profile_id, entry_id),
        }
    }
}

fn entry_data(kind: NotificationKind, profile_id: &str, entry_id: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    if let Some(data_type) = kind.data_type() {
        data.insert("type".to_string(), data_type.to_string());
    }
    data.insert("profileId".to_string(), profile_id.to_string());
    data.insert("entryId".to_string(), entry_id.to_string());
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FALLBACK_PROFILE_NAME, FALLBACK_USER_NAME};

    #[test]
    fn test_render_reminder() {
        let message = NotificationTemplates::reminder();
        assert_eq!(message.kind, NotificationKind::Reminder);
        assert_eq!(message.title, "Tijd voor een kiekje!");
        assert!(message.data.is_empty());
    }

    #[test]
    fn test_render_new_post() {
        let message = NotificationTemplates::new_post("Sanne", "Noor", "p-1", "2024-03-07");
        assert_eq!(message.title, "Nieuwe foto!");
        assert_eq!(message.body, "Sanne heeft een nieuwe foto geplaatst voor Noor.");
        assert_eq!(message.data.get("type").map(String::as_str), Some("new_post"));
        assert_eq!(message.data.get("profileId").map(String::as_str), Some("p-1"));
        assert_eq!(message.data.get("entryId").map(String::as_str), Some("2024-03-07"));
    }

    #[test]
    fn test_render_with_fallback_names() {
        let message = NotificationTemplates::new_post(
            FALLBACK_USER_NAME,
            FALLBACK_PROFILE_NAME,
            "p-1",
            "2024-03-07",
        );
        assert_eq!(message.body, "Iemand heeft een nieuwe foto geplaatst voor een profiel.");
    }

    #[test]
    fn test_render_comment_and_like() {
        let comment = NotificationTemplates::comment("Opa", "p-1", "e-1");
        assert_eq!(comment.title, "Nieuwe reactie");
        assert_eq!(comment.body, "Opa heeft gereageerd op je foto.");
        assert_eq!(comment.data.get("type").map(String::as_str), Some("comment"));

        let like = NotificationTemplates::like("Oma", "p-1", "e-1");
        assert_eq!(like.title, "Nieuwe like!");
        assert_eq!(like.body, "Oma vindt je foto leuk.");
        assert_eq!(like.data.get("type").map(String::as_str), Some("like"));
    }

    #[test]
    fn test_kind_data_type() {
        assert_eq!(NotificationKind::Reminder.data_type(), None);
        assert_eq!(NotificationKind::NewPost.data_type(), Some("new_post"));
        assert_eq!(NotificationKind::Comment.data_type(), Some("comment"));
        assert_eq!(NotificationKind::Like.data_type(), Some("like"));
    }
}
