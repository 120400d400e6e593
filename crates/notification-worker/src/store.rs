//! 文档存储接口
//!
//! 决策逻辑只通过 `DocumentStore` 读取档案、用户与条目，从不写回。
//! `MemoryDocumentStore` 基于 DashMap，可从 JSON 快照初始化，
//! 用于本地运行和测试。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use kiekje_shared::error::{KiekjeError, Result};
use serde::Deserialize;
use tracing::info;

use crate::models::{Entry, Profile, User};

/// 文档存储只读接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>>;

    /// 列出全部档案，按存储定义的顺序返回
    async fn list_profiles(&self) -> Result<Vec<Profile>>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// 按日期键读取档案下的每日条目
    async fn get_entry(&self, profile_id: &str, date_key: &str) -> Result<Option<Entry>>;
}

/// 存储快照格式
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub profiles: HashMap<String, Profile>,
    pub users: HashMap<String, User>,
    /// profile_id -> date_key -> entry
    pub entries: HashMap<String, HashMap<String, Entry>>,
}

/// 内存文档存储
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    profiles: DashMap<String, Profile>,
    users: DashMap<String, User>,
    entries: DashMap<(String, String), Entry>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 快照构建，文档 ID 取自快照中的键
    pub fn from_snapshot(json: &str) -> Result<Self> {
        let snapshot: StoreSnapshot = serde_json::from_str(json)?;
        let store = Self::new();

        for (id, mut profile) in snapshot.profiles {
            profile.id = id;
            store.insert_profile(profile);
        }
        for (id, mut user) in snapshot.users {
            user.id = id;
            store.insert_user(user);
        }
        for (profile_id, entries) in snapshot.entries {
            for (date_key, mut entry) in entries {
                entry.id = date_key;
                store.insert_entry(&profile_id, entry);
            }
        }

        Ok(store)
    }

    /// 读取快照文件
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            KiekjeError::Store(format!("读取快照失败: {}: {}", path.display(), e))
        })?;
        let store = Self::from_snapshot(&json)?;

        info!(
            path = %path.display(),
            profiles = store.profiles.len(),
            users = store.users.len(),
            entries = store.entries.len(),
            "已加载存储快照"
        );

        Ok(store)
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// 以 `entry.id` 作为日期键插入条目
    pub fn insert_entry(&self, profile_id: &str, entry: Entry) {
        self.entries
            .insert((profile_id.to_string(), entry.id.clone()), entry);
    }

    pub fn remove_entry(&self, profile_id: &str, date_key: &str) -> Option<Entry> {
        self.entries
            .remove(&(profile_id.to_string(), date_key.to_string()))
            .map(|(_, v)| v)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>> {
        Ok(self.profiles.get(profile_id).map(|p| p.clone()))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        // DashMap 迭代顺序不稳定，按 ID 排序作为存储顺序
        let mut profiles: Vec<Profile> = self
            .profiles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(profiles)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn get_entry(&self, profile_id: &str, date_key: &str) -> Result<Option<Entry>> {
        Ok(self
            .entries
            .get(&(profile_id.to_string(), date_key.to_string()))
            .map(|e| e.clone()))
    }
}
