//! 文档模型
//!
//! 文档存储中档案、用户、每日条目与评论的类型化表示。
//! 存储侧字段均为可选，缺失的数组反序列化为空，缺失的字符串为 `None`，
//! 展示名称的回退策略集中在本模块定义。

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 用户展示名缺失时的占位符
pub const FALLBACK_USER_NAME: &str = "Iemand";

/// 档案名称缺失时的占位符
pub const FALLBACK_PROFILE_NAME: &str = "een profiel";

/// 生成每日条目的文档键（UTC 日期，`YYYY-MM-DD`）
pub fn entry_date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// 空白字符串视为缺失
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// PushToken
// ---------------------------------------------------------------------------

/// 推送令牌
///
/// 设备级的不透明投递地址，构造时保证非空。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushToken(String);

impl PushToken {
    /// 解析存储中的令牌字段，空值或纯空白返回 `None`
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        non_blank(raw).map(|t| Self(t.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志中使用的脱敏形式
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{prefix}***")
    }
}

impl fmt::Display for PushToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// 文档
// ---------------------------------------------------------------------------

/// 档案（例如一个孩子），拥有一个所有者和若干关注者
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// 文档 ID，由存储键填充
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    /// 关注者列表，保留存储顺序，可能包含所有者本人
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        non_blank(self.name.as_deref()).unwrap_or(FALLBACK_PROFILE_NAME)
    }

    pub fn has_owner(&self) -> bool {
        !self.owner_id.trim().is_empty()
    }
}

/// 用户
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl User {
    pub fn push_token(&self) -> Option<PushToken> {
        PushToken::parse(self.fcm_token.as_deref())
    }

    pub fn display_name(&self) -> &str {
        non_blank(self.display_name.as_deref()).unwrap_or(FALLBACK_USER_NAME)
    }
}

/// 每日条目，以日期为键挂在档案下
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(default)]
    pub id: String,
    /// 发布者
    #[serde(default)]
    pub user_id: Option<String>,
    /// 点赞用户，存储侧只追加
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

/// 评论
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    /// 评论时冗余保存的作者展示名
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Comment {
    pub fn author_name(&self) -> &str {
        non_blank(self.user_name.as_deref()).unwrap_or(FALLBACK_USER_NAME)
    }
}

// ---------------------------------------------------------------------------
// RecipientSet
// ---------------------------------------------------------------------------

/// 接收者集合
///
/// 按插入顺序迭代的去重用户 ID 集合，只在单次触发内存在。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入用户 ID，已存在时返回 false
    pub fn insert(&mut self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        if self.seen.contains(&user_id) {
            return false;
        }
        self.seen.insert(user_id.clone());
        self.order.push(user_id);
        true
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        if !self.seen.remove(user_id) {
            return false;
        }
        self.order.retain(|id| id != user_id);
        true
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.seen.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
